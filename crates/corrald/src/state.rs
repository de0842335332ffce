//! Live controller state: jobs, nodes, partitions, triggers.
//!
//! Every mutation bumps the matching `last_update` stamp and marks its
//! category dirty with the [`SaveCoordinator`]; nothing here touches disk.
//! Trigger programs fired by a mutation run after the table lock is
//! released.
//!
//! # Recovery
//!
//! ```text
//! config nodes ─┬─ saved node state/reason (drain, down) wins
//! config parts ─┼─ saved partition with the same name wins; saved-only kept
//! saved jobs   ─┼─ running jobs re-charged to their nodes, requeued if they no longer fit
//! saved trigs  ─┘
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use corral_core::config::ControllerConfig;
use corral_core::{
    JobId, JobState, NodeState, ResourceRequest, SHOW_ALL, NO_VAL, TriggerEvent, TriggerId,
    TriggerResource, epoch_secs,
};
use corral_proto::{
    JobStepInfo, JobStepInfoRequest, JobStepInfoResponse, JobSubmit, JobUpdate, NodeSelectInfo,
    NodeSelectInfoResponse, NodeUpdate, PartitionUpdate, TriggerSet,
};
use corral_sched::{SchedulerHost, default_initial_priority};
use corral_select::{Allocated, NodeResources, ResourceSelector};
use corral_state::{
    JobRecord, NodeRecord, PartitionRecord, SaveCoordinator, StateResult, StateStore,
    TriggerRecord,
};
use tracing::{debug, info, warn};

use crate::error::{ControllerError, ControllerResult};
use crate::triggers::{self, Event};

/// The batch step every running job carries.
const BATCH_STEP: u32 = 0;

/// Records read back from the checkpoint store.
#[derive(Debug, Clone, Default)]
pub struct SavedState {
    pub jobs: Vec<JobRecord>,
    pub nodes: Vec<NodeRecord>,
    pub partitions: Vec<PartitionRecord>,
    pub triggers: Vec<TriggerRecord>,
}

impl SavedState {
    pub fn load(store: &StateStore) -> StateResult<Self> {
        Ok(Self {
            jobs: store.load_jobs()?,
            nodes: store.load_nodes()?,
            partitions: store.load_partitions()?,
            triggers: store.load_triggers()?,
        })
    }
}

// ── Tables ─────────────────────────────────────────────────────────

struct Tables {
    jobs: BTreeMap<JobId, JobRecord>,
    /// Config order.
    nodes: Vec<NodeRecord>,
    partitions: Vec<PartitionRecord>,
    triggers: BTreeMap<TriggerId, TriggerRecord>,
    next_job_id: JobId,
    next_trigger_id: TriggerId,
    /// Priority handed to the most recent unheld job.
    last_priority: u32,
    job_stamp: u64,
    node_stamp: u64,
    part_stamp: u64,
}

/// Advance a `last_update` stamp, strictly past its previous value.
fn bump(stamp: &mut u64) {
    *stamp = epoch_secs().max(*stamp + 1);
}

/// Allocation state implied by a node's charges. Drain and down stick.
fn derive_state(node: &NodeRecord) -> NodeState {
    match node.state {
        NodeState::Drain | NodeState::Down => node.state,
        _ if node.alloc_cpus == 0 => NodeState::Idle,
        _ if node.alloc_cpus >= node.cpus => NodeState::Allocated,
        _ => NodeState::Mixed,
    }
}

fn requeue(job: &mut JobRecord) {
    job.state = JobState::Pending;
    job.node = None;
    job.alloc_cpus = 0;
    job.alloc_sockets = 0;
    job.start_time = None;
}

fn to_resources(node: &NodeRecord) -> NodeResources {
    NodeResources {
        name: node.name.clone(),
        cpus: node.cpus,
        sockets: node.sockets,
        cores_per_socket: node.cores_per_socket,
        threads_per_core: node.threads_per_core,
        alloc_cpus: node.alloc_cpus,
        alloc_sockets: node.alloc_sockets,
    }
}

impl Tables {
    fn build(config: &ControllerConfig, saved: SavedState) -> Self {
        let now = epoch_secs();

        let saved_nodes: HashMap<String, NodeRecord> =
            saved.nodes.into_iter().map(|n| (n.name.clone(), n)).collect();
        let mut nodes: Vec<NodeRecord> = config
            .nodes
            .iter()
            .map(|c| {
                let mut node = NodeRecord::from_config(c);
                if let Some(prev) = saved_nodes.get(&c.name) {
                    if matches!(prev.state, NodeState::Drain | NodeState::Down) {
                        node.state = prev.state;
                    }
                    node.reason = prev.reason.clone();
                }
                node
            })
            .collect();
        let names: HashSet<String> = nodes.iter().map(|n| n.name.clone()).collect();

        let mut partitions: Vec<PartitionRecord> =
            config.partitions.iter().map(PartitionRecord::from).collect();
        for saved_part in saved.partitions {
            match partitions.iter_mut().find(|p| p.name == saved_part.name) {
                Some(p) => *p = saved_part,
                None => partitions.push(saved_part),
            }
        }
        for part in &mut partitions {
            part.nodes.retain(|n| names.contains(n));
        }

        let mut jobs: BTreeMap<JobId, JobRecord> =
            saved.jobs.into_iter().map(|j| (j.job_id, j)).collect();
        for job in jobs.values_mut().filter(|j| j.state == JobState::Running) {
            let slot = job
                .node
                .as_deref()
                .and_then(|name| nodes.iter().position(|n| n.name == name))
                .filter(|&i| {
                    let n = &nodes[i];
                    n.alloc_cpus + job.alloc_cpus <= n.cpus
                        && n.alloc_sockets + job.alloc_sockets <= n.sockets.max(1)
                });
            match slot {
                Some(i) => {
                    nodes[i].alloc_cpus += job.alloc_cpus;
                    nodes[i].alloc_sockets += job.alloc_sockets;
                }
                None => {
                    warn!(job_id = job.job_id, node = ?job.node, "allocation no longer fits, requeueing job");
                    requeue(job);
                }
            }
        }
        for node in &mut nodes {
            node.state = derive_state(node);
        }

        let triggers: BTreeMap<TriggerId, TriggerRecord> =
            saved.triggers.into_iter().map(|t| (t.trigger_id, t)).collect();

        let last_priority = jobs
            .values()
            .filter(|j| j.state == JobState::Pending && j.priority > 0)
            .map(|j| j.priority)
            .min()
            .unwrap_or(config.max_priority)
            .min(config.max_priority);

        Self {
            next_job_id: jobs.keys().next_back().map_or(1, |id| id + 1),
            next_trigger_id: triggers.keys().next_back().map_or(1, |id| id + 1),
            jobs,
            nodes,
            partitions,
            triggers,
            last_priority,
            job_stamp: now,
            node_stamp: now,
            part_stamp: now,
        }
    }

    fn snapshot(&self) -> SavedState {
        SavedState {
            jobs: self.jobs.values().cloned().collect(),
            nodes: self.nodes.clone(),
            partitions: self.partitions.clone(),
            triggers: self.triggers.values().cloned().collect(),
        }
    }

    fn node_index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    fn partition(&self, name: &str) -> Option<&PartitionRecord> {
        self.partitions.iter().find(|p| p.name == name)
    }

    fn default_partition(&self) -> Option<&PartitionRecord> {
        self.partitions
            .iter()
            .find(|p| p.default)
            .or_else(|| self.partitions.first())
    }

    fn job_mut(&mut self, job_id: JobId) -> ControllerResult<&mut JobRecord> {
        self.jobs
            .get_mut(&job_id)
            .ok_or(ControllerError::InvalidJob(job_id))
    }

    /// Return a running job's charges to its node.
    fn release(&mut self, job_id: JobId, events: &mut Vec<Event>) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        let (node, cpus, sockets) = (job.node.take(), job.alloc_cpus, job.alloc_sockets);
        job.alloc_cpus = 0;
        job.alloc_sockets = 0;

        let Some(i) = node.as_deref().and_then(|n| self.node_index(n)) else {
            return;
        };
        let node = &mut self.nodes[i];
        if node.alloc_cpus < cpus || node.alloc_sockets < sockets {
            warn!(job_id, node = %node.name, "node charges smaller than job allocation");
        }
        node.alloc_cpus = node.alloc_cpus.saturating_sub(cpus);
        node.alloc_sockets = node.alloc_sockets.saturating_sub(sockets);
        node.state = derive_state(node);
        if node.alloc_cpus == 0 {
            match node.state {
                NodeState::Idle => events.push(Event::node(&node.name, TriggerEvent::Idle)),
                NodeState::Drain => events.push(Event::node(&node.name, TriggerEvent::Drained)),
                _ => {}
            }
        }
    }

    /// Try to place one pending job.
    fn try_start(&mut self, job_id: JobId, selector: &dyn ResourceSelector) -> bool {
        let Some(job) = self.jobs.get(&job_id) else {
            return false;
        };
        let (num_cpus, request) = (job.num_cpus, job.resources);
        let Some(part) = self.partition(&job.partition) else {
            return false;
        };
        if !part.state_up {
            return false;
        }

        let candidates: Vec<usize> = part
            .nodes
            .iter()
            .filter_map(|n| self.node_index(n))
            .filter(|&i| self.nodes[i].state.is_schedulable())
            .collect();
        let resources: Vec<NodeResources> =
            candidates.iter().map(|&i| to_resources(&self.nodes[i])).collect();
        let Some(placement) = selector.select(&resources, num_cpus, &request) else {
            return false;
        };

        let i = candidates[placement.index];
        let Allocated { sockets, cpus } = placement.charge;
        let node = &mut self.nodes[i];
        node.alloc_cpus += cpus;
        node.alloc_sockets += sockets;
        node.state = derive_state(node);

        let now = epoch_secs();
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.state = JobState::Running;
            job.node = Some(placement.node.clone());
            job.alloc_cpus = cpus;
            job.alloc_sockets = sockets;
            job.start_time = Some(now);
        }
        info!(job_id, node = %placement.node, cpus, sockets, "job started");
        true
    }

    /// Remove and return every trigger matching one of `events`.
    fn take_fired(&mut self, events: &[Event]) -> Vec<TriggerRecord> {
        if events.is_empty() {
            return Vec::new();
        }
        let ids: Vec<TriggerId> = self
            .triggers
            .values()
            .filter(|t| events.iter().any(|e| e.matches(t)))
            .map(|t| t.trigger_id)
            .collect();
        ids.iter().filter_map(|id| self.triggers.remove(id)).collect()
    }

    fn resource_exists(&self, resource: &TriggerResource) -> ControllerResult<()> {
        match resource {
            TriggerResource::Job(id) if !self.jobs.contains_key(id) => {
                Err(ControllerError::InvalidJob(*id))
            }
            TriggerResource::Node(name) if self.node_index(name).is_none() => {
                Err(ControllerError::InvalidNode(name.clone()))
            }
            _ => Ok(()),
        }
    }
}

// ── ControllerState ────────────────────────────────────────────────

/// Shared, lock-protected controller state.
pub struct ControllerState {
    tables: RwLock<Tables>,
    selector: RwLock<Arc<dyn ResourceSelector>>,
    saves: Arc<SaveCoordinator>,
}

/// Which categories a mutation dirtied.
#[derive(Default)]
struct Dirty {
    jobs: bool,
    nodes: bool,
    partitions: bool,
    triggers: bool,
}

impl ControllerState {
    pub fn new(
        config: &ControllerConfig,
        saved: SavedState,
        selector: Arc<dyn ResourceSelector>,
        saves: Arc<SaveCoordinator>,
    ) -> Self {
        let tables = Tables::build(config, saved);
        info!(
            jobs = tables.jobs.len(),
            nodes = tables.nodes.len(),
            partitions = tables.partitions.len(),
            triggers = tables.triggers.len(),
            "controller state loaded"
        );
        Self {
            tables: RwLock::new(tables),
            selector: RwLock::new(selector),
            saves,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().expect("controller state lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().expect("controller state lock poisoned")
    }

    fn selector(&self) -> Arc<dyn ResourceSelector> {
        Arc::clone(&self.selector.read().expect("selector lock poisoned"))
    }

    pub fn select_type(&self) -> &'static str {
        self.selector().select_type()
    }

    fn mark(&self, dirty: Dirty) {
        if dirty.jobs {
            self.saves.schedule_job_save();
        }
        if dirty.nodes {
            self.saves.schedule_node_save();
        }
        if dirty.partitions {
            self.saves.schedule_part_save();
        }
        if dirty.triggers {
            self.saves.schedule_trigger_save();
        }
    }

    /// Rebuild from the current tables merged with a new config, and
    /// switch selectors.
    pub fn reconfigure(&self, config: &ControllerConfig, selector: Arc<dyn ResourceSelector>) {
        {
            let mut tables = self.write();
            let mut rebuilt = Tables::build(config, tables.snapshot());
            rebuilt.next_job_id = rebuilt.next_job_id.max(tables.next_job_id);
            rebuilt.next_trigger_id = rebuilt.next_trigger_id.max(tables.next_trigger_id);
            rebuilt.job_stamp = tables.job_stamp;
            rebuilt.node_stamp = tables.node_stamp;
            rebuilt.part_stamp = tables.part_stamp;
            bump(&mut rebuilt.job_stamp);
            bump(&mut rebuilt.node_stamp);
            bump(&mut rebuilt.part_stamp);
            *tables = rebuilt;
        }
        *self.selector.write().expect("selector lock poisoned") = selector;
        self.mark(Dirty {
            jobs: true,
            nodes: true,
            partitions: true,
            triggers: false,
        });
    }

    // ── Snapshots ──────────────────────────────────────────────────

    pub fn jobs(&self) -> Vec<JobRecord> {
        self.read().jobs.values().cloned().collect()
    }

    pub fn nodes(&self) -> Vec<NodeRecord> {
        self.read().nodes.clone()
    }

    pub fn partitions(&self) -> Vec<PartitionRecord> {
        self.read().partitions.clone()
    }

    pub fn triggers(&self) -> Vec<TriggerRecord> {
        self.read().triggers.values().cloned().collect()
    }

    pub fn job(&self, job_id: JobId) -> Option<JobRecord> {
        self.read().jobs.get(&job_id).cloned()
    }

    pub fn node(&self, name: &str) -> Option<NodeRecord> {
        let tables = self.read();
        tables.node_index(name).map(|i| tables.nodes[i].clone())
    }

    pub fn last_priority(&self) -> u32 {
        self.read().last_priority
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Queue a job with `priority` (0 = held).
    pub fn submit_job(&self, request: JobSubmit, priority: u32) -> ControllerResult<JobId> {
        let job_id = {
            let mut tables = self.write();
            let part = match &request.partition {
                Some(name) => tables.partition(name),
                None => tables.default_partition(),
            }
            .ok_or_else(|| {
                ControllerError::InvalidPartition(
                    request.partition.clone().unwrap_or_else(|| "(default)".to_string()),
                )
            })?;

            let num_cpus = request.num_cpus.max(1);
            let largest = part
                .nodes
                .iter()
                .filter_map(|n| tables.node_index(n))
                .map(|i| tables.nodes[i].cpus)
                .max()
                .unwrap_or(0);
            if num_cpus > largest {
                return Err(ControllerError::TooManyCpus {
                    partition: part.name.clone(),
                    requested: num_cpus,
                    largest,
                });
            }
            let partition = part.name.clone();

            let job_id = tables.next_job_id;
            tables.next_job_id += 1;
            if priority > 0 {
                tables.last_priority = priority;
            }
            let name = if request.name.is_empty() {
                format!("job{job_id}")
            } else {
                request.name
            };
            tables.jobs.insert(
                job_id,
                JobRecord {
                    job_id,
                    name,
                    partition: partition.clone(),
                    num_cpus,
                    resources: request.resources,
                    priority,
                    state: JobState::Pending,
                    node: None,
                    alloc_cpus: 0,
                    alloc_sockets: 0,
                    submit_time: epoch_secs(),
                    start_time: None,
                    end_time: None,
                },
            );
            bump(&mut tables.job_stamp);
            info!(job_id, %partition, num_cpus, priority, "job submitted");
            job_id
        };
        self.mark(Dirty {
            jobs: true,
            ..Default::default()
        });
        Ok(job_id)
    }

    pub fn cancel_job(&self, job_id: JobId) -> ControllerResult<()> {
        let mut events = Vec::new();
        let (was_running, fired) = {
            let mut tables = self.write();
            let job = tables.job_mut(job_id)?;
            if job.state.is_finished() {
                return Err(ControllerError::AlreadyDone(job_id));
            }
            let was_running = job.state == JobState::Running;
            if was_running {
                tables.release(job_id, &mut events);
                bump(&mut tables.node_stamp);
            }
            let job = tables.job_mut(job_id)?;
            job.state = JobState::Cancelled;
            job.end_time = Some(epoch_secs());
            bump(&mut tables.job_stamp);
            events.push(Event::job(job_id, TriggerEvent::Fini));
            (was_running, tables.take_fired(&events))
        };
        info!(job_id, was_running, "job cancelled");
        self.mark(Dirty {
            jobs: true,
            nodes: was_running,
            triggers: !fired.is_empty(),
            ..Default::default()
        });
        triggers::run(fired);
        Ok(())
    }

    pub fn update_job(&self, update: JobUpdate) -> ControllerResult<()> {
        {
            let mut tables = self.write();
            let next = default_initial_priority(tables.last_priority);
            let job = tables.job_mut(update.job_id)?;
            if job.state.is_finished() {
                return Err(ControllerError::AlreadyDone(update.job_id));
            }
            let mut released = false;
            match update.hold {
                Some(true) if job.state == JobState::Pending => job.priority = 0,
                Some(false) if job.is_held() => {
                    job.priority = next;
                    released = true;
                }
                _ => {}
            }
            if let Some(priority) = update.priority {
                job.priority = priority;
            }
            let priority = job.priority;
            if released && update.priority.is_none() {
                tables.last_priority = next;
            }
            bump(&mut tables.job_stamp);
            info!(job_id = update.job_id, priority, "job updated");
        }
        self.mark(Dirty {
            jobs: true,
            ..Default::default()
        });
        Ok(())
    }

    // ── Nodes ──────────────────────────────────────────────────────

    pub fn update_node(&self, update: NodeUpdate) -> ControllerResult<()> {
        let mut events = Vec::new();
        let (requeued, fired) = {
            let mut tables = self.write();
            let i = tables
                .node_index(&update.name)
                .ok_or_else(|| ControllerError::InvalidNode(update.name.clone()))?;
            let mut requeued = Vec::new();

            match update.state {
                None => {}
                Some(NodeState::Down) => {
                    requeued = tables
                        .jobs
                        .values()
                        .filter(|j| {
                            j.state == JobState::Running
                                && j.node.as_deref() == Some(update.name.as_str())
                        })
                        .map(|j| j.job_id)
                        .collect();
                    for job_id in &requeued {
                        if let Some(job) = tables.jobs.get_mut(job_id) {
                            requeue(job);
                        }
                    }
                    let node = &mut tables.nodes[i];
                    node.alloc_cpus = 0;
                    node.alloc_sockets = 0;
                    node.state = NodeState::Down;
                    events.push(Event::node(&update.name, TriggerEvent::Down));
                }
                Some(NodeState::Drain) => {
                    let node = &mut tables.nodes[i];
                    node.state = NodeState::Drain;
                    if node.alloc_cpus == 0 {
                        events.push(Event::node(&update.name, TriggerEvent::Drained));
                    }
                }
                Some(NodeState::Idle) => {
                    let node = &mut tables.nodes[i];
                    let was = node.state;
                    node.state = NodeState::Idle;
                    node.state = derive_state(node);
                    node.reason = None;
                    if was == NodeState::Down {
                        events.push(Event::node(&update.name, TriggerEvent::Up));
                    }
                    if node.state == NodeState::Idle && was != NodeState::Idle {
                        events.push(Event::node(&update.name, TriggerEvent::Idle));
                    }
                }
                Some(other) => {
                    return Err(ControllerError::InvalidArgument(format!(
                        "node state {other} cannot be set directly"
                    )));
                }
            }
            if let Some(reason) = update.reason {
                tables.nodes[i].reason = (!reason.is_empty()).then_some(reason);
            }
            if !requeued.is_empty() {
                bump(&mut tables.job_stamp);
            }
            bump(&mut tables.node_stamp);
            info!(node = %update.name, state = %tables.nodes[i].state, "node updated");
            (requeued, tables.take_fired(&events))
        };
        if !requeued.is_empty() {
            warn!(node = %update.name, jobs = ?requeued, "jobs requeued from downed node");
        }
        self.mark(Dirty {
            jobs: !requeued.is_empty(),
            nodes: true,
            triggers: !fired.is_empty(),
            ..Default::default()
        });
        triggers::run(fired);
        Ok(())
    }

    // ── Partitions ─────────────────────────────────────────────────

    /// Create or modify a partition.
    pub fn update_partition(&self, update: PartitionUpdate) -> ControllerResult<()> {
        if update.name.is_empty() {
            return Err(ControllerError::InvalidPartition(update.name));
        }
        let created = {
            let mut tables = self.write();
            if let Some(nodes) = &update.nodes {
                if let Some(missing) = nodes.iter().find(|n| tables.node_index(n).is_none()) {
                    return Err(ControllerError::InvalidNode(missing.clone()));
                }
            }

            let created = tables.partition(&update.name).is_none();
            if created {
                tables.partitions.push(PartitionRecord {
                    name: update.name.clone(),
                    nodes: Vec::new(),
                    default: false,
                    hidden: false,
                    state_up: true,
                });
            }
            if update.default == Some(true) {
                for part in &mut tables.partitions {
                    part.default = false;
                }
            }
            let part = tables
                .partitions
                .iter_mut()
                .find(|p| p.name == update.name)
                .ok_or_else(|| ControllerError::InvalidPartition(update.name.clone()))?;
            if let Some(nodes) = update.nodes {
                part.nodes = nodes;
            }
            if let Some(hidden) = update.hidden {
                part.hidden = hidden;
            }
            if let Some(state_up) = update.state_up {
                part.state_up = state_up;
            }
            if let Some(default) = update.default {
                part.default = default;
            }
            bump(&mut tables.part_stamp);
            created
        };
        info!(partition = %update.name, created, "partition updated");
        self.mark(Dirty {
            partitions: true,
            ..Default::default()
        });
        Ok(())
    }

    pub fn delete_partition(&self, name: &str) -> ControllerResult<()> {
        {
            let mut tables = self.write();
            let index = tables
                .partitions
                .iter()
                .position(|p| p.name == name)
                .ok_or_else(|| ControllerError::InvalidPartition(name.to_string()))?;
            if tables
                .jobs
                .values()
                .any(|j| j.partition == name && !j.state.is_finished())
            {
                return Err(ControllerError::PartitionInUse(name.to_string()));
            }
            tables.partitions.remove(index);
            bump(&mut tables.part_stamp);
        }
        info!(partition = %name, "partition deleted");
        self.mark(Dirty {
            partitions: true,
            ..Default::default()
        });
        Ok(())
    }

    // ── Triggers ───────────────────────────────────────────────────

    pub fn set_trigger(&self, request: TriggerSet) -> ControllerResult<TriggerId> {
        if request.program.trim().is_empty() {
            return Err(ControllerError::InvalidArgument("trigger program is empty".into()));
        }
        let record = {
            let mut tables = self.write();
            tables.resource_exists(&request.resource)?;
            let trigger_id = tables.next_trigger_id;
            tables.next_trigger_id += 1;
            let record = TriggerRecord {
                trigger_id,
                resource: request.resource,
                event: request.event,
                program: request.program,
                created_at: epoch_secs(),
            };
            tables.triggers.insert(trigger_id, record.clone());
            record
        };
        info!(trigger = %record, program = %record.program, "trigger set");
        self.mark(Dirty {
            triggers: true,
            ..Default::default()
        });
        Ok(record.trigger_id)
    }

    pub fn clear_trigger(&self, trigger_id: TriggerId) -> ControllerResult<()> {
        self.write()
            .triggers
            .remove(&trigger_id)
            .ok_or(ControllerError::InvalidTrigger(trigger_id))?;
        info!(trigger_id, "trigger cleared");
        self.mark(Dirty {
            triggers: true,
            ..Default::default()
        });
        Ok(())
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Running job steps, or `None` if no job changed since `last_update`.
    pub fn job_step_info(&self, request: &JobStepInfoRequest) -> Option<JobStepInfoResponse> {
        let tables = self.read();
        if request.last_update >= tables.job_stamp {
            return None;
        }
        let show_all = request.show_flags & SHOW_ALL != 0;
        let steps = tables
            .jobs
            .values()
            .filter(|j| j.state == JobState::Running)
            .filter(|j| request.job_id == NO_VAL || request.job_id == j.job_id)
            .filter(|_| request.step_id == NO_VAL || request.step_id == BATCH_STEP)
            .filter(|j| show_all || !tables.partition(&j.partition).is_some_and(|p| p.hidden))
            .map(|j| JobStepInfo {
                job_id: j.job_id,
                step_id: BATCH_STEP,
                name: j.name.clone(),
                partition: j.partition.clone(),
                node: j.node.clone().unwrap_or_default(),
                num_cpus: j.alloc_cpus,
                start_time: j.start_time.unwrap_or(0),
            })
            .collect();
        Some(JobStepInfoResponse {
            last_update: tables.job_stamp,
            steps,
        })
    }

    /// Per-node allocation as the active selector sees it, or `None` if no
    /// node changed since `last_update`.
    pub fn node_select_info(&self, last_update: u64) -> Option<NodeSelectInfoResponse> {
        let selector = self.selector();
        let tables = self.read();
        if last_update >= tables.node_stamp {
            return None;
        }
        let request = ResourceRequest::default();
        let nodes = tables
            .nodes
            .iter()
            .map(|n| NodeSelectInfo {
                name: n.name.clone(),
                state: n.state,
                cpus: n.cpus,
                alloc_cpus: n.alloc_cpus,
                sockets: n.sockets,
                alloc_sockets: n.alloc_sockets,
                avail_cpus: if n.state.is_schedulable() {
                    selector.available_cpus(&to_resources(n), &request)
                } else {
                    0
                },
            })
            .collect();
        Some(NodeSelectInfoResponse {
            last_update: tables.node_stamp,
            nodes,
        })
    }

    // ── Scheduling passes ──────────────────────────────────────────

    /// Start pending jobs in priority order. When `strict`, a job that
    /// does not fit blocks every lower-priority job in its partition.
    fn pass(&self, strict: bool) -> usize {
        let selector = self.selector();
        let started = {
            let mut tables = self.write();
            let mut order: Vec<(u32, JobId)> = tables
                .jobs
                .values()
                .filter(|j| j.state == JobState::Pending && j.priority > 0)
                .map(|j| (j.priority, j.job_id))
                .collect();
            order.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

            let mut blocked: HashSet<String> = HashSet::new();
            let mut started = 0;
            for (_, job_id) in order {
                let partition = tables.jobs[&job_id].partition.clone();
                if strict && blocked.contains(&partition) {
                    continue;
                }
                if tables.try_start(job_id, selector.as_ref()) {
                    started += 1;
                } else if strict {
                    blocked.insert(partition);
                }
            }
            if started > 0 {
                bump(&mut tables.job_stamp);
                bump(&mut tables.node_stamp);
            }
            started
        };
        if started > 0 {
            self.mark(Dirty {
                jobs: true,
                nodes: true,
                ..Default::default()
            });
        }
        debug!(strict, started, "scheduling pass complete");
        started
    }
}

impl SchedulerHost for ControllerState {
    fn run_pass(&self) -> usize {
        self.pass(true)
    }

    fn backfill_pass(&self) -> usize {
        self.pass(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::config::{NodeConfig, PartitionConfig};
    use corral_select::{ConsRes, CrPolicy, Linear};
    use corral_state::StateCategory;

    fn make_config() -> ControllerConfig {
        ControllerConfig {
            nodes: vec![
                NodeConfig {
                    name: "n1".into(),
                    cpus: 4,
                    sockets: 1,
                    cores_per_socket: 4,
                    threads_per_core: 1,
                },
                NodeConfig {
                    name: "n2".into(),
                    cpus: 8,
                    sockets: 2,
                    cores_per_socket: 4,
                    threads_per_core: 1,
                },
            ],
            partitions: vec![
                PartitionConfig {
                    name: "batch".into(),
                    nodes: vec!["n1".into(), "n2".into()],
                    default: true,
                    hidden: false,
                    state_up: true,
                },
                PartitionConfig {
                    name: "secret".into(),
                    nodes: vec!["n2".into()],
                    default: false,
                    hidden: true,
                    state_up: true,
                },
            ],
            max_priority: 1000,
            ..Default::default()
        }
    }

    fn make_state(saved: SavedState) -> (ControllerState, Arc<SaveCoordinator>) {
        let saves = Arc::new(SaveCoordinator::new());
        let state = ControllerState::new(
            &make_config(),
            saved,
            Arc::new(ConsRes::new(CrPolicy::Default)),
            Arc::clone(&saves),
        );
        (state, saves)
    }

    fn job(cpus: u32) -> JobSubmit {
        JobSubmit {
            name: "sim".into(),
            partition: None,
            num_cpus: cpus,
            resources: ResourceRequest::default(),
        }
    }

    fn steps(state: &ControllerState, job_id: u32, show_flags: u16) -> Vec<JobStepInfo> {
        state
            .job_step_info(&JobStepInfoRequest {
                last_update: 0,
                job_id,
                step_id: NO_VAL,
                show_flags,
            })
            .unwrap()
            .steps
    }

    #[test]
    fn submit_goes_to_default_partition_and_dirties_jobs() {
        let (state, saves) = make_state(SavedState::default());
        let id = state.submit_job(job(2), 999).unwrap();
        assert_eq!(id, 1);
        let record = state.job(id).unwrap();
        assert_eq!(record.partition, "batch");
        assert_eq!(record.state, JobState::Pending);
        assert_eq!(state.last_priority(), 999);
        assert_eq!(saves.pending(StateCategory::Jobs), 1);
    }

    #[test]
    fn submit_rejects_bad_partition_and_oversized_jobs() {
        let (state, _) = make_state(SavedState::default());
        let mut req = job(1);
        req.partition = Some("nope".into());
        assert!(matches!(
            state.submit_job(req, 1),
            Err(ControllerError::InvalidPartition(_))
        ));
        assert!(matches!(
            state.submit_job(job(9), 1),
            Err(ControllerError::TooManyCpus { largest: 8, .. })
        ));
    }

    #[test]
    fn pass_places_in_partition_order_and_charges_node() {
        let (state, saves) = make_state(SavedState::default());
        let a = state.submit_job(job(3), 10).unwrap();
        let b = state.submit_job(job(2), 9).unwrap();
        assert_eq!(state.run_pass(), 2);

        assert_eq!(state.job(a).unwrap().node.as_deref(), Some("n1"));
        assert_eq!(state.job(b).unwrap().node.as_deref(), Some("n2"));
        let n1 = state.node("n1").unwrap();
        assert_eq!(n1.alloc_cpus, 3);
        assert_eq!(n1.state, NodeState::Mixed);
        assert_eq!(saves.pending(StateCategory::Nodes), 1);
    }

    #[test]
    fn strict_pass_blocks_behind_big_job_backfill_does_not() {
        let (state, _) = make_state(SavedState::default());
        let filler = state.submit_job(job(8), 100).unwrap();
        assert_eq!(state.run_pass(), 1);
        assert_eq!(state.job(filler).unwrap().node.as_deref(), Some("n2"));

        let big = state.submit_job(job(8), 50).unwrap();
        let small = state.submit_job(job(1), 40).unwrap();
        assert_eq!(state.run_pass(), 0);
        assert_eq!(state.job(small).unwrap().state, JobState::Pending);

        assert_eq!(state.backfill_pass(), 1);
        assert_eq!(state.job(small).unwrap().state, JobState::Running);
        assert_eq!(state.job(big).unwrap().state, JobState::Pending);
    }

    #[test]
    fn held_jobs_never_start_until_released() {
        let (state, _) = make_state(SavedState::default());
        let id = state.submit_job(job(1), 0).unwrap();
        assert!(state.job(id).unwrap().is_held());
        assert_eq!(state.run_pass(), 0);

        state
            .update_job(JobUpdate {
                job_id: id,
                priority: None,
                hold: Some(false),
            })
            .unwrap();
        assert_eq!(state.job(id).unwrap().priority, 999);
        assert_eq!(state.run_pass(), 1);
    }

    #[test]
    fn cancel_releases_allocation() {
        let (state, _) = make_state(SavedState::default());
        let id = state.submit_job(job(4), 10).unwrap();
        state.run_pass();
        assert_eq!(state.node("n1").unwrap().state, NodeState::Allocated);

        state.cancel_job(id).unwrap();
        let n1 = state.node("n1").unwrap();
        assert_eq!((n1.alloc_cpus, n1.state), (0, NodeState::Idle));
        assert_eq!(state.job(id).unwrap().state, JobState::Cancelled);
        assert!(matches!(state.cancel_job(id), Err(ControllerError::AlreadyDone(_))));
        assert!(matches!(state.cancel_job(77), Err(ControllerError::InvalidJob(77))));
    }

    #[test]
    fn downing_a_node_requeues_its_jobs() {
        let (state, _) = make_state(SavedState::default());
        let id = state.submit_job(job(2), 10).unwrap();
        state.run_pass();
        state
            .update_node(NodeUpdate {
                name: "n1".into(),
                state: Some(NodeState::Down),
                reason: Some("bad dimm".into()),
            })
            .unwrap();

        let job = state.job(id).unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.node.is_none());
        let n1 = state.node("n1").unwrap();
        assert_eq!(n1.state, NodeState::Down);
        assert_eq!(n1.reason.as_deref(), Some("bad dimm"));

        // The job moves to the next node in the partition.
        state.run_pass();
        assert_eq!(state.job(id).unwrap().node.as_deref(), Some("n2"));
    }

    #[test]
    fn node_update_rejects_allocation_states() {
        let (state, _) = make_state(SavedState::default());
        let err = state
            .update_node(NodeUpdate {
                name: "n1".into(),
                state: Some(NodeState::Mixed),
                reason: None,
            })
            .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidArgument(_)));
        assert!(matches!(
            state.update_node(NodeUpdate {
                name: "zz".into(),
                state: None,
                reason: None
            }),
            Err(ControllerError::InvalidNode(_))
        ));
    }

    #[test]
    fn partition_create_modify_delete() {
        let (state, saves) = make_state(SavedState::default());
        state
            .update_partition(PartitionUpdate {
                name: "gpu".into(),
                nodes: Some(vec!["n2".into()]),
                hidden: None,
                state_up: None,
                default: Some(true),
            })
            .unwrap();
        let parts = state.partitions();
        assert!(parts.iter().find(|p| p.name == "gpu").unwrap().default);
        assert!(!parts.iter().find(|p| p.name == "batch").unwrap().default);

        let id = state.submit_job(job(1), 5).unwrap();
        assert_eq!(state.job(id).unwrap().partition, "gpu");
        assert!(matches!(
            state.delete_partition("gpu"),
            Err(ControllerError::PartitionInUse(_))
        ));
        state.cancel_job(id).unwrap();
        state.delete_partition("gpu").unwrap();
        assert!(matches!(
            state.delete_partition("gpu"),
            Err(ControllerError::InvalidPartition(_))
        ));
        assert_eq!(saves.pending(StateCategory::Partitions), 2);
    }

    #[test]
    fn partition_update_validates_nodes() {
        let (state, _) = make_state(SavedState::default());
        let err = state
            .update_partition(PartitionUpdate {
                name: "batch".into(),
                nodes: Some(vec!["n1".into(), "ghost".into()]),
                hidden: None,
                state_up: None,
                default: None,
            })
            .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidNode(n) if n == "ghost"));
    }

    #[test]
    fn step_info_filters_and_hides() {
        let (state, _) = make_state(SavedState::default());
        let visible = state.submit_job(job(1), 10).unwrap();
        let mut secret = job(1);
        secret.partition = Some("secret".into());
        let hidden = state.submit_job(secret, 9).unwrap();
        state.run_pass();

        let ids: Vec<u32> = steps(&state, NO_VAL, 0).iter().map(|s| s.job_id).collect();
        assert_eq!(ids, vec![visible]);
        assert_eq!(steps(&state, NO_VAL, SHOW_ALL).len(), 2);
        assert_eq!(steps(&state, hidden, SHOW_ALL)[0].node, "n2");
    }

    #[test]
    fn step_info_no_change() {
        let (state, _) = make_state(SavedState::default());
        let first = steps_response(&state, 0).unwrap();
        assert!(steps_response(&state, first.last_update).is_none());

        state.submit_job(job(1), 10).unwrap();
        assert!(steps_response(&state, first.last_update).is_some());
    }

    fn steps_response(state: &ControllerState, last_update: u64) -> Option<JobStepInfoResponse> {
        state.job_step_info(&JobStepInfoRequest {
            last_update,
            job_id: NO_VAL,
            step_id: NO_VAL,
            show_flags: 0,
        })
    }

    #[test]
    fn node_select_info_reports_selector_view() {
        let (state, _) = make_state(SavedState::default());
        state.submit_job(job(3), 10).unwrap();
        state.run_pass();
        let info = state.node_select_info(0).unwrap();
        let n1 = info.nodes.iter().find(|n| n.name == "n1").unwrap();
        assert_eq!((n1.alloc_cpus, n1.avail_cpus), (3, 1));
        assert!(state.node_select_info(info.last_update).is_none());
    }

    #[test]
    fn triggers_set_clear_and_validate() {
        let (state, saves) = make_state(SavedState::default());
        let id = state
            .set_trigger(TriggerSet {
                resource: TriggerResource::Node("n1".into()),
                event: TriggerEvent::Down,
                program: "/bin/true".into(),
            })
            .unwrap();
        assert_eq!(state.triggers().len(), 1);
        state.clear_trigger(id).unwrap();
        assert!(matches!(
            state.clear_trigger(id),
            Err(ControllerError::InvalidTrigger(_))
        ));
        assert!(matches!(
            state.set_trigger(TriggerSet {
                resource: TriggerResource::Job(99),
                event: TriggerEvent::Fini,
                program: "/bin/true".into(),
            }),
            Err(ControllerError::InvalidJob(99))
        ));
        assert_eq!(saves.pending(StateCategory::Triggers), 2);
    }

    #[test]
    fn trigger_fires_once() {
        let (state, _) = make_state(SavedState::default());
        state
            .set_trigger(TriggerSet {
                resource: TriggerResource::Node("n2".into()),
                event: TriggerEvent::Drained,
                program: "/bin/true".into(),
            })
            .unwrap();
        state
            .update_node(NodeUpdate {
                name: "n2".into(),
                state: Some(NodeState::Drain),
                reason: None,
            })
            .unwrap();
        assert!(state.triggers().is_empty());
    }

    #[test]
    fn recovery_merges_saved_state() {
        let (state, _) = make_state(SavedState::default());
        let running = state.submit_job(job(2), 10).unwrap();
        state.run_pass();
        state.submit_job(job(1), 0).unwrap();
        state
            .update_node(NodeUpdate {
                name: "n2".into(),
                state: Some(NodeState::Drain),
                reason: Some("maint".into()),
            })
            .unwrap();
        let mut saved = state.read().snapshot();
        // Charges are rebuilt from running jobs, not trusted from disk.
        for node in &mut saved.nodes {
            node.alloc_cpus = 0;
        }

        let (recovered, _) = make_state(saved);
        assert_eq!(recovered.job(running).unwrap().state, JobState::Running);
        let n1 = recovered.node("n1").unwrap();
        assert_eq!((n1.alloc_cpus, n1.state), (2, NodeState::Mixed));
        let n2 = recovered.node("n2").unwrap();
        assert_eq!((n2.state, n2.reason.as_deref()), (NodeState::Drain, Some("maint")));
        assert_eq!(recovered.submit_job(job(1), 5).unwrap(), 3);
    }

    #[test]
    fn recovery_requeues_jobs_on_vanished_nodes() {
        let saved = SavedState {
            jobs: vec![JobRecord {
                job_id: 7,
                name: "old".into(),
                partition: "batch".into(),
                num_cpus: 1,
                resources: ResourceRequest::default(),
                priority: 10,
                state: JobState::Running,
                node: Some("retired".into()),
                alloc_cpus: 1,
                alloc_sockets: 0,
                submit_time: 1,
                start_time: Some(2),
                end_time: None,
            }],
            ..Default::default()
        };
        let (state, _) = make_state(saved);
        let job = state.job(7).unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.node.is_none());
    }

    #[test]
    fn reconfigure_swaps_selector() {
        let (state, _) = make_state(SavedState::default());
        state.submit_job(job(1), 10).unwrap();
        state.run_pass();
        state.reconfigure(&make_config(), Arc::new(Linear));
        assert_eq!(state.select_type(), "select/linear");
        // n1 is partly used, so a linear job takes n2 whole.
        let id = state.submit_job(job(1), 9).unwrap();
        state.run_pass();
        let job = state.job(id).unwrap();
        assert_eq!((job.node.as_deref(), job.alloc_cpus), (Some("n2"), 8));
    }
}
