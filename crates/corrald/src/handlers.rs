//! Request dispatch: one request payload in, one response payload out.

use corral_core::errno;
use corral_proto::{
    Envelope, JobSubmit, JobSubmitResponse, MessageType, Payload, TriggerSetResponse,
};
use tracing::{debug, info, warn};

use crate::controller::Shared;
use crate::error::{ControllerError, ControllerResult};

pub(crate) fn dispatch(shared: &Shared, envelope: Envelope) -> Payload {
    let msg_type = envelope.message_type();
    let source = envelope.source;
    debug!(%msg_type, ?source, "dispatching request");

    match envelope.payload {
        Payload::Ping => Payload::rc(errno::SUCCESS),
        Payload::Reconfigure => reply(msg_type, shared.reconfigure()),
        Payload::Shutdown(msg) => {
            info!(?source, core = msg.core, "shutdown request received");
            shared.request_shutdown(msg.core);
            Payload::rc(errno::SUCCESS)
        }

        Payload::SubmitBatchJob(request) => match submit(shared, request) {
            Ok(job_id) => Payload::SubmitBatchJobResponse(JobSubmitResponse { job_id }),
            Err(e) => rejected(msg_type, &e),
        },
        Payload::CancelJob(msg) => {
            let result = shared.state.cancel_job(msg.job_id);
            reply_and_schedule(shared, msg_type, result)
        }
        Payload::UpdateJob(update) => {
            let result = shared.state.update_job(update);
            reply_and_schedule(shared, msg_type, result)
        }
        Payload::UpdateNode(update) => {
            let result = shared.state.update_node(update);
            reply_and_schedule(shared, msg_type, result)
        }
        Payload::UpdatePartition(update) => {
            let result = shared.state.update_partition(update);
            reply_and_schedule(shared, msg_type, result)
        }
        Payload::DeletePartition(msg) => reply(msg_type, shared.state.delete_partition(&msg.name)),

        Payload::SetTrigger(request) => match shared.state.set_trigger(request) {
            Ok(trigger_id) => Payload::SetTriggerResponse(TriggerSetResponse { trigger_id }),
            Err(e) => rejected(msg_type, &e),
        },
        Payload::ClearTrigger(msg) => reply(msg_type, shared.state.clear_trigger(msg.trigger_id)),

        Payload::JobStepInfo(request) => match shared.state.job_step_info(&request) {
            Some(response) => Payload::JobStepInfoResponse(response),
            None => Payload::rc(errno::NO_CHANGE_IN_DATA),
        },
        Payload::NodeSelectInfo(request) => match shared.state.node_select_info(request.last_update) {
            Some(response) => Payload::NodeSelectInfoResponse(response),
            None => Payload::rc(errno::NO_CHANGE_IN_DATA),
        },

        Payload::JobStepInfoResponse(_)
        | Payload::NodeSelectInfoResponse(_)
        | Payload::SetTriggerResponse(_)
        | Payload::SubmitBatchJobResponse(_)
        | Payload::ReturnCode(_) => {
            warn!(%msg_type, ?source, "response message sent as a request");
            Payload::rc(errno::UNEXPECTED_MSG_ERROR)
        }
    }
}

/// Priority comes from the active policy; a held submission gets 0.
fn submit(shared: &Shared, request: JobSubmit) -> ControllerResult<u32> {
    let priority = shared.driver.initial_priority(shared.state.last_priority());
    let job_id = shared.state.submit_job(request, priority)?;
    shared.driver.job_is_pending();
    shared.schedule();
    Ok(job_id)
}

fn reply(msg_type: MessageType, result: ControllerResult<()>) -> Payload {
    match result {
        Ok(()) => Payload::rc(errno::SUCCESS),
        Err(e) => rejected(msg_type, &e),
    }
}

/// Replies to a request that may have freed or added capacity.
fn reply_and_schedule(shared: &Shared, msg_type: MessageType, result: ControllerResult<()>) -> Payload {
    if result.is_ok() {
        shared.schedule();
    }
    reply(msg_type, result)
}

fn rejected(msg_type: MessageType, error: &ControllerError) -> Payload {
    info!(%msg_type, code = error.code(), error = %error, "request rejected");
    Payload::rc(error.code())
}
