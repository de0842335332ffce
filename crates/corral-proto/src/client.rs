//! Controller client — what CLI front-ends and peer daemons call.
//!
//! Administrative commands follow the dual-controller discipline:
//! - `shutdown` goes to the secondary first (failure tolerated), then the
//!   primary, whose result is authoritative.
//! - `ping` and `reconfigure` go to the one controller named by role.
//!
//! Ordinary requests go to the primary and fall back to the secondary
//! only when the primary cannot be connected to at all.

use std::time::Duration;

use corral_core::config::ControllersConfig;
use corral_core::{errno, ControllerRole, JobId, TriggerId};
use tracing::{debug, info, warn};

use crate::error::{RpcError, RpcResult, TransportError};
use crate::message::*;
use crate::rpc::{expect_rc, send_recv, send_recv_rc};

/// Client for one dual-controller pair.
#[derive(Debug, Clone)]
pub struct ControllerClient {
    primary: String,
    secondary: Option<String>,
    timeout: Duration,
}

impl ControllerClient {
    pub fn new(primary: impl Into<String>, secondary: Option<String>, timeout: Duration) -> Self {
        Self {
            primary: primary.into(),
            secondary,
            timeout,
        }
    }

    pub fn from_config(controllers: &ControllersConfig, timeout: Duration) -> Self {
        Self::new(
            controllers.primary.clone(),
            controllers.secondary.clone(),
            timeout,
        )
    }

    /// Resolve a role to an address without touching the network.
    pub fn addr_for(&self, role: ControllerRole) -> RpcResult<&str> {
        match role {
            ControllerRole::Primary => Ok(&self.primary),
            ControllerRole::Secondary => self
                .secondary
                .as_deref()
                .ok_or_else(|| RpcError::InvalidRole("no secondary controller configured".into())),
        }
    }

    fn role_from_index(index: i32) -> RpcResult<ControllerRole> {
        ControllerRole::from_index(index)
            .ok_or_else(|| RpcError::InvalidRole(format!("role index {index}")))
    }

    // ── Administrative ─────────────────────────────────────────────

    /// Check that the controller in `role` is answering.
    pub fn ping(&self, role: ControllerRole) -> RpcResult<()> {
        let addr = self.addr_for(role)?;
        send_recv_rc(addr, Payload::Ping, self.timeout)
    }

    /// [`ping`](Self::ping) with the numeric role argument (1 = primary, 2 = secondary).
    pub fn ping_index(&self, index: i32) -> RpcResult<()> {
        self.ping(Self::role_from_index(index)?)
    }

    /// Ask the controller in `role` to re-read its configuration.
    pub fn reconfigure(&self, role: ControllerRole) -> RpcResult<()> {
        let addr = self.addr_for(role)?;
        info!(%role, %addr, "requesting reconfigure");
        send_recv_rc(addr, Payload::Reconfigure, self.timeout)
    }

    pub fn reconfigure_index(&self, index: i32) -> RpcResult<()> {
        self.reconfigure(Self::role_from_index(index)?)
    }

    /// Shut down both controllers. The secondary is told first so it does
    /// not take over from a primary that is going away on purpose.
    pub fn shutdown(&self, core: bool) -> RpcResult<()> {
        let request = Payload::Shutdown(ShutdownMsg { core });

        if let Some(secondary) = &self.secondary {
            match send_recv_rc(secondary, request.clone(), self.timeout) {
                Ok(()) => debug!(%secondary, "secondary controller acknowledged shutdown"),
                Err(e) => warn!(%secondary, error = %e, "secondary controller shutdown failed, ignoring"),
            }
        }

        send_recv_rc(&self.primary, request, self.timeout)
    }

    // ── Requests ───────────────────────────────────────────────────

    /// Send to the primary; on a connect failure retry once on the secondary.
    fn send_to_controller(&self, request: Payload) -> RpcResult<Payload> {
        match send_recv(&self.primary, request.clone(), self.timeout) {
            Ok(env) => Ok(env.payload),
            Err(TransportError::Connect { addr, source }) => {
                let Some(secondary) = &self.secondary else {
                    return Err(TransportError::Connect { addr, source }.into());
                };
                warn!(primary = %addr, %secondary, error = %source, "primary unreachable, trying secondary");
                Ok(send_recv(secondary, request, self.timeout)?.payload)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn send_expect_rc(&self, request: Payload) -> RpcResult<()> {
        expect_rc(self.send_to_controller(request)?)
    }

    pub fn submit_job(&self, job: JobSubmit) -> RpcResult<JobId> {
        match self.send_to_controller(Payload::SubmitBatchJob(job))? {
            Payload::SubmitBatchJobResponse(resp) => Ok(resp.job_id),
            other => rejection(other),
        }
    }

    pub fn cancel_job(&self, job_id: JobId) -> RpcResult<()> {
        self.send_expect_rc(Payload::CancelJob(JobCancel { job_id }))
    }

    pub fn update_job(&self, update: JobUpdate) -> RpcResult<()> {
        self.send_expect_rc(Payload::UpdateJob(update))
    }

    pub fn update_node(&self, update: NodeUpdate) -> RpcResult<()> {
        self.send_expect_rc(Payload::UpdateNode(update))
    }

    pub fn update_partition(&self, update: PartitionUpdate) -> RpcResult<()> {
        self.send_expect_rc(Payload::UpdatePartition(update))
    }

    pub fn delete_partition(&self, name: &str) -> RpcResult<()> {
        self.send_expect_rc(Payload::DeletePartition(PartitionDelete {
            name: name.to_string(),
        }))
    }

    /// Fetch job step records. `Ok(None)` means nothing changed since
    /// `request.last_update`.
    pub fn job_step_info(&self, request: JobStepInfoRequest) -> RpcResult<Option<JobStepInfoResponse>> {
        match self.send_to_controller(Payload::JobStepInfo(request))? {
            Payload::JobStepInfoResponse(resp) => Ok(Some(resp)),
            other => no_change_or_error(other),
        }
    }

    /// Fetch per-node selection data. `Ok(None)` means nothing changed.
    pub fn node_select_info(&self, last_update: u64) -> RpcResult<Option<NodeSelectInfoResponse>> {
        match self.send_to_controller(Payload::NodeSelectInfo(NodeSelectInfoRequest { last_update }))? {
            Payload::NodeSelectInfoResponse(resp) => Ok(Some(resp)),
            other => no_change_or_error(other),
        }
    }

    pub fn set_trigger(&self, trigger: TriggerSet) -> RpcResult<TriggerId> {
        match self.send_to_controller(Payload::SetTrigger(trigger))? {
            Payload::SetTriggerResponse(resp) => Ok(resp.trigger_id),
            other => rejection(other),
        }
    }

    pub fn clear_trigger(&self, trigger_id: TriggerId) -> RpcResult<()> {
        self.send_expect_rc(Payload::ClearTrigger(TriggerClear { trigger_id }))
    }
}

/// Turn a response that is not the expected data message into an error.
fn rejection<T>(payload: Payload) -> RpcResult<T> {
    match payload {
        Payload::ReturnCode(rc) if rc.return_code != errno::SUCCESS => {
            Err(RpcError::Rejected(rc.return_code))
        }
        other => Err(TransportError::UnexpectedMessageType(other.message_type()).into()),
    }
}

fn no_change_or_error<T>(payload: Payload) -> RpcResult<Option<T>> {
    match payload {
        Payload::ReturnCode(rc) if rc.return_code == errno::NO_CHANGE_IN_DATA => Ok(None),
        other => rejection(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::mpsc;

    use crate::message::Envelope;
    use crate::transport::Connection;

    const TIMEOUT: Duration = Duration::from_secs(2);

    /// Serve `count` connections, reporting each request's type on `tx`.
    fn recording_server(count: usize, reply: Payload) -> (String, mpsc::Receiver<MessageType>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            for _ in 0..count {
                let (stream, _) = listener.accept().unwrap();
                let mut conn = Connection::from_stream(stream);
                let env = conn.receive(TIMEOUT).unwrap();
                tx.send(env.message_type()).unwrap();
                conn.send(&Envelope::new(reply.clone())).unwrap();
            }
        });
        (addr, rx)
    }

    fn dead_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    #[test]
    fn ping_invalid_index_never_touches_network() {
        // Addresses that would fail loudly if dialed.
        let client = ControllerClient::new("256.0.0.1:1", None, TIMEOUT);
        let err = client.ping_index(7).unwrap_err();
        assert!(matches!(err, RpcError::InvalidRole(_)), "{err}");
        assert_eq!(err.code(), errno::INVALID_ARGUMENT);
    }

    #[test]
    fn ping_secondary_without_one_is_invalid_role() {
        let client = ControllerClient::new("256.0.0.1:1", None, TIMEOUT);
        let err = client.ping(ControllerRole::Secondary).unwrap_err();
        assert!(matches!(err, RpcError::InvalidRole(_)), "{err}");
    }

    #[test]
    fn ping_targets_selected_role_only() {
        let (secondary, rx) = recording_server(1, Payload::rc(0));
        let client = ControllerClient::new(dead_addr(), Some(secondary), TIMEOUT);
        client.ping_index(2).unwrap();
        assert_eq!(rx.recv().unwrap(), MessageType::RequestPing);
    }

    #[test]
    fn shutdown_tolerates_unreachable_secondary() {
        let (primary, rx) = recording_server(1, Payload::rc(0));
        let client = ControllerClient::new(primary, Some(dead_addr()), TIMEOUT);
        client.shutdown(false).unwrap();
        assert_eq!(rx.recv().unwrap(), MessageType::RequestShutdown);
    }

    #[test]
    fn shutdown_reports_primary_result() {
        let (secondary, srx) = recording_server(1, Payload::rc(0));
        let (primary, prx) = recording_server(1, Payload::rc(errno::ACCESS_DENIED));
        let client = ControllerClient::new(primary, Some(secondary), TIMEOUT);

        let err = client.shutdown(true).unwrap_err();
        assert!(matches!(err, RpcError::Rejected(errno::ACCESS_DENIED)), "{err}");
        assert_eq!(srx.recv().unwrap(), MessageType::RequestShutdown);
        assert_eq!(prx.recv().unwrap(), MessageType::RequestShutdown);
    }

    #[test]
    fn shutdown_with_unreachable_primary_fails_with_connect() {
        let client = ControllerClient::new(dead_addr(), None, TIMEOUT);
        let err = client.shutdown(false).unwrap_err();
        assert!(
            matches!(err, RpcError::Transport(TransportError::Connect { .. })),
            "{err}"
        );
    }

    #[test]
    fn requests_fall_back_to_secondary_on_connect_failure() {
        let (secondary, rx) = recording_server(
            1,
            Payload::SubmitBatchJobResponse(JobSubmitResponse { job_id: 42 }),
        );
        let client = ControllerClient::new(dead_addr(), Some(secondary), TIMEOUT);
        let job_id = client
            .submit_job(JobSubmit {
                name: "sleep".into(),
                partition: None,
                num_cpus: 1,
                resources: Default::default(),
            })
            .unwrap();
        assert_eq!(job_id, 42);
        assert_eq!(rx.recv().unwrap(), MessageType::RequestSubmitBatchJob);
    }

    #[test]
    fn no_change_in_data_is_none() {
        let (primary, _rx) = recording_server(1, Payload::rc(errno::NO_CHANGE_IN_DATA));
        let client = ControllerClient::new(primary, None, TIMEOUT);
        assert!(client.node_select_info(100).unwrap().is_none());
    }
}
