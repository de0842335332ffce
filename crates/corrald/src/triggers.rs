//! Event triggers.
//!
//! A trigger is one-shot: when its event happens on its resource, its
//! program is run once with the resource id as the only argument and the
//! trigger is removed.

use std::process::Command;

use corral_core::{TriggerEvent, TriggerResource};
use corral_state::TriggerRecord;
use tracing::{debug, info, warn};

/// An event that happened to a job or node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub resource: TriggerResource,
    pub event: TriggerEvent,
}

impl Event {
    pub fn node(name: &str, event: TriggerEvent) -> Self {
        Self {
            resource: TriggerResource::Node(name.to_string()),
            event,
        }
    }

    pub fn job(job_id: u32, event: TriggerEvent) -> Self {
        Self {
            resource: TriggerResource::Job(job_id),
            event,
        }
    }

    pub fn matches(&self, trigger: &TriggerRecord) -> bool {
        trigger.resource == self.resource && trigger.event == self.event
    }
}

fn resource_arg(resource: &TriggerResource) -> String {
    match resource {
        TriggerResource::Job(id) => id.to_string(),
        TriggerResource::Node(name) => name.clone(),
    }
}

/// Run each fired trigger's program without waiting for it.
pub fn run(fired: Vec<TriggerRecord>) {
    for trigger in fired {
        let arg = resource_arg(&trigger.resource);
        info!(trigger = %trigger, program = %trigger.program, "trigger fired");
        match Command::new(&trigger.program).arg(&arg).spawn() {
            Ok(mut child) => {
                let trigger_id = trigger.trigger_id;
                // Reap the child off the request path.
                let reaped = std::thread::Builder::new()
                    .name(format!("trigger-{trigger_id}"))
                    .spawn(move || match child.wait() {
                        Ok(status) => debug!(trigger_id, %status, "trigger program exited"),
                        Err(e) => warn!(trigger_id, error = %e, "failed to wait for trigger program"),
                    });
                if let Err(e) = reaped {
                    warn!(trigger_id, error = %e, "failed to spawn trigger reaper");
                }
            }
            Err(e) => warn!(
                trigger_id = trigger.trigger_id,
                program = %trigger.program,
                error = %e,
                "failed to run trigger program"
            ),
        }
    }
}
