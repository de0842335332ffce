//! Bridge from the save coordinator to the redb store.

use std::sync::Weak;

use corral_state::{Checkpoint, StateCategory, StateResult, StateStore};

use crate::state::ControllerState;

/// Snapshots one category of live state and writes it wholesale.
///
/// Holds the state weakly: the coordinator thread must not keep the
/// state alive past controller shutdown.
pub struct StateCheckpointer {
    state: Weak<ControllerState>,
    store: StateStore,
}

impl StateCheckpointer {
    pub fn new(state: Weak<ControllerState>, store: StateStore) -> Self {
        Self { state, store }
    }
}

impl Checkpoint for StateCheckpointer {
    fn checkpoint(&self, category: StateCategory) -> StateResult<()> {
        let Some(state) = self.state.upgrade() else {
            return Ok(());
        };
        // Each snapshot releases the table lock before the write starts.
        match category {
            StateCategory::Jobs => self.store.save_jobs(&state.jobs()),
            StateCategory::Nodes => self.store.save_nodes(&state.nodes()),
            StateCategory::Partitions => self.store.save_partitions(&state.partitions()),
            StateCategory::Triggers => self.store.save_triggers(&state.triggers()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use corral_core::config::{ControllerConfig, NodeConfig, PartitionConfig};
    use corral_proto::JobSubmit;
    use corral_select::{ConsRes, CrPolicy};
    use corral_state::SaveCoordinator;

    use crate::state::SavedState;

    fn make_state() -> Arc<ControllerState> {
        let config = ControllerConfig {
            nodes: vec![NodeConfig {
                name: "n1".into(),
                cpus: 4,
                sockets: 1,
                cores_per_socket: 4,
                threads_per_core: 1,
            }],
            partitions: vec![PartitionConfig {
                name: "batch".into(),
                nodes: vec!["n1".into()],
                default: true,
                hidden: false,
                state_up: true,
            }],
            ..Default::default()
        };
        Arc::new(ControllerState::new(
            &config,
            SavedState::default(),
            Arc::new(ConsRes::new(CrPolicy::Default)),
            Arc::new(SaveCoordinator::new()),
        ))
    }

    #[test]
    fn writes_current_snapshot() {
        let state = make_state();
        let store = StateStore::open_in_memory().unwrap();
        state
            .submit_job(
                JobSubmit {
                    name: "a".into(),
                    partition: None,
                    num_cpus: 1,
                    resources: Default::default(),
                },
                10,
            )
            .unwrap();

        let checkpointer = StateCheckpointer::new(Arc::downgrade(&state), store.clone());
        for category in StateCategory::ALL {
            checkpointer.checkpoint(category).unwrap();
        }
        let saved = SavedState::load(&store).unwrap();
        assert_eq!(saved.jobs.len(), 1);
        assert_eq!(saved.nodes.len(), 1);
        assert_eq!(saved.partitions[0].name, "batch");
    }

    #[test]
    fn dropped_state_is_skipped() {
        let state = make_state();
        let store = StateStore::open_in_memory().unwrap();
        let checkpointer = StateCheckpointer::new(Arc::downgrade(&state), store.clone());
        drop(state);
        checkpointer.checkpoint(StateCategory::Jobs).unwrap();
        assert!(store.load_jobs().unwrap().is_empty());
    }
}
