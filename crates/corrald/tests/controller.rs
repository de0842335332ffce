//! End-to-end tests: a real controller on a loopback port, driven through
//! the client library.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use corral_core::config::{ControllerConfig, NodeConfig, PartitionConfig};
use corral_core::{
    ControllerRole, JobState, NO_VAL, NodeState, ResourceRequest, TriggerEvent, TriggerResource,
    errno,
};
use corral_proto::{
    ControllerClient, JobStepInfoRequest, JobSubmit, JobUpdate, NodeUpdate, PartitionUpdate,
    RpcError, TriggerSet,
};
use corrald::{ControllerCore, ControllerError};

const TIMEOUT: Duration = Duration::from_secs(2);

fn make_config(dir: &Path) -> ControllerConfig {
    ControllerConfig {
        listen_addr: "127.0.0.1:0".into(),
        plugin_dir: dir.join("plugins"),
        state_save_location: dir.join("state"),
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
        partitions: vec![PartitionConfig {
            name: "batch".into(),
            nodes: vec!["n1".into(), "n2".into()],
            default: true,
            hidden: false,
            state_up: true,
        }],
        ..Default::default()
    }
}

fn write_config(dir: &Path, config: &ControllerConfig) -> PathBuf {
    let path = dir.join("corral.toml");
    std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
    path
}

fn client_for(core: &ControllerCore) -> ControllerClient {
    ControllerClient::new(core.local_addr().to_string(), None, TIMEOUT)
}

fn job(cpus: u32) -> JobSubmit {
    JobSubmit {
        name: "sim".into(),
        partition: None,
        num_cpus: cpus,
        resources: ResourceRequest::default(),
    }
}

fn all_steps(last_update: u64) -> JobStepInfoRequest {
    JobStepInfoRequest {
        last_update,
        job_id: NO_VAL,
        step_id: NO_VAL,
        show_flags: 0,
    }
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn rejected_with(result: Result<impl std::fmt::Debug, RpcError>, code: i32) {
    match result {
        Err(RpcError::Rejected(c)) => assert_eq!(c, code, "{}", errno::strerror(c)),
        other => panic!("expected rejection {code}, got {other:?}"),
    }
}

#[test]
fn ping_and_submit() {
    let dir = tempfile::tempdir().unwrap();
    let core = ControllerCore::start(make_config(dir.path()), None).unwrap();
    let client = client_for(&core);

    client.ping(ControllerRole::Primary).unwrap();
    assert_eq!(core.sched_type().as_deref(), Some("sched/builtin"));

    let job_id = client.submit_job(job(2)).unwrap();
    let record = core.state().job(job_id).unwrap();
    assert_eq!(record.state, JobState::Running);
    assert_eq!(record.node.as_deref(), Some("n1"));
    core.shutdown();
}

#[test]
fn submit_rejections() {
    let dir = tempfile::tempdir().unwrap();
    let core = ControllerCore::start(make_config(dir.path()), None).unwrap();
    let client = client_for(&core);

    rejected_with(client.submit_job(job(16)), errno::TOO_MANY_REQUESTED_CPUS);
    let mut elsewhere = job(1);
    elsewhere.partition = Some("gpu".into());
    rejected_with(client.submit_job(elsewhere), errno::INVALID_PARTITION_NAME);
}

#[test]
fn job_step_info_and_no_change() {
    let dir = tempfile::tempdir().unwrap();
    let core = ControllerCore::start(make_config(dir.path()), None).unwrap();
    let client = client_for(&core);

    let job_id = client.submit_job(job(1)).unwrap();
    let info = client.job_step_info(all_steps(0)).unwrap().unwrap();
    assert_eq!(info.steps.len(), 1);
    assert_eq!(info.steps[0].job_id, job_id);
    assert_eq!(info.steps[0].step_id, 0);

    assert!(client.job_step_info(all_steps(info.last_update)).unwrap().is_none());
}

#[test]
fn node_select_info_tracks_allocation() {
    let dir = tempfile::tempdir().unwrap();
    let core = ControllerCore::start(make_config(dir.path()), None).unwrap();
    let client = client_for(&core);

    client.submit_job(job(4)).unwrap();
    let info = client.node_select_info(0).unwrap().unwrap();
    let n1 = info.nodes.iter().find(|n| n.name == "n1").unwrap();
    assert_eq!(n1.state, NodeState::Allocated);
    assert_eq!(n1.avail_cpus, 0);
    let n2 = info.nodes.iter().find(|n| n.name == "n2").unwrap();
    assert_eq!(n2.avail_cpus, 8);

    assert!(client.node_select_info(info.last_update).unwrap().is_none());
}

#[test]
fn cancel_frees_capacity_for_queued_job() {
    let dir = tempfile::tempdir().unwrap();
    let core = ControllerCore::start(make_config(dir.path()), None).unwrap();
    let client = client_for(&core);

    let first = client.submit_job(job(8)).unwrap();
    let second = client.submit_job(job(8)).unwrap();
    assert_eq!(core.state().job(second).unwrap().state, JobState::Pending);

    client.cancel_job(first).unwrap();
    assert_eq!(core.state().job(first).unwrap().state, JobState::Cancelled);
    assert_eq!(core.state().job(second).unwrap().state, JobState::Running);

    rejected_with(client.cancel_job(first), errno::ALREADY_DONE);
    rejected_with(client.cancel_job(404), errno::INVALID_JOB_ID);
}

#[test]
fn partition_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let core = ControllerCore::start(make_config(dir.path()), None).unwrap();
    let client = client_for(&core);

    client
        .update_partition(PartitionUpdate {
            name: "big".into(),
            nodes: Some(vec!["n2".into()]),
            hidden: None,
            state_up: Some(false),
            default: None,
        })
        .unwrap();
    let mut queued = job(1);
    queued.partition = Some("big".into());
    let job_id = client.submit_job(queued).unwrap();
    assert_eq!(core.state().job(job_id).unwrap().state, JobState::Pending);

    // Bringing the partition up schedules the waiting job.
    client
        .update_partition(PartitionUpdate {
            name: "big".into(),
            nodes: None,
            hidden: None,
            state_up: Some(true),
            default: None,
        })
        .unwrap();
    assert_eq!(core.state().job(job_id).unwrap().node.as_deref(), Some("n2"));

    rejected_with(client.delete_partition("big"), errno::PARTITION_IN_USE);
    client.cancel_job(job_id).unwrap();
    client.delete_partition("big").unwrap();
    rejected_with(client.delete_partition("big"), errno::INVALID_PARTITION_NAME);
}

#[test]
fn node_trigger_runs_program() {
    let dir = tempfile::tempdir().unwrap();
    let core = ControllerCore::start(make_config(dir.path()), None).unwrap();
    let client = client_for(&core);

    let marker = dir.path().join("fired");
    let script = dir.path().join("on-down.sh");
    std::fs::write(
        &script,
        format!("#!/bin/sh\necho \"$1\" > {}\n", marker.display()),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let trigger_id = client
        .set_trigger(TriggerSet {
            resource: TriggerResource::Node("n1".into()),
            event: TriggerEvent::Down,
            program: script.display().to_string(),
        })
        .unwrap();
    assert_eq!(trigger_id, 1);

    client
        .update_node(NodeUpdate {
            name: "n1".into(),
            state: Some(NodeState::Down),
            reason: Some("test".into()),
        })
        .unwrap();
    wait_for(|| {
        std::fs::read_to_string(&marker).is_ok_and(|s| s.trim() == "n1")
    });

    // One-shot: the trigger is gone.
    rejected_with(client.clear_trigger(trigger_id), errno::INVALID_TRIGGER_ID);
}

#[test]
fn shutdown_request_reaches_waiter() {
    let dir = tempfile::tempdir().unwrap();
    let core = ControllerCore::start(make_config(dir.path()), None).unwrap();
    let client = client_for(&core);

    client.shutdown(true).unwrap();
    assert!(core.wait_for_shutdown_request());
    core.shutdown();
    assert!(client.ping(ControllerRole::Primary).is_err());
}

#[test]
fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (running, held) = {
        let core = ControllerCore::start(make_config(dir.path()), None).unwrap();
        let client = client_for(&core);
        let running = client.submit_job(job(2)).unwrap();
        client
            .update_node(NodeUpdate {
                name: "n2".into(),
                state: Some(NodeState::Drain),
                reason: Some("maintenance".into()),
            })
            .unwrap();
        let held = client.submit_job(job(8)).unwrap();
        client
            .update_job(JobUpdate {
                job_id: held,
                priority: None,
                hold: Some(true),
            })
            .unwrap();
        core.shutdown();
        (running, held)
    };

    let core = ControllerCore::start(make_config(dir.path()), None).unwrap();
    let state = core.state();
    assert_eq!(state.job(running).unwrap().state, JobState::Running);
    assert!(state.job(held).unwrap().is_held());
    assert_eq!(state.node("n1").unwrap().alloc_cpus, 2);
    let n2 = state.node("n2").unwrap();
    assert_eq!(n2.state, NodeState::Drain);
    assert_eq!(n2.reason.as_deref(), Some("maintenance"));

    let client = client_for(&core);
    let next = client.submit_job(job(1)).unwrap();
    assert!(next > held);
}

#[test]
fn hold_policy_holds_while_file_exists() {
    let dir = tempfile::tempdir().unwrap();
    let hold_file = dir.path().join("hold");
    std::fs::write(&hold_file, "").unwrap();
    let config = ControllerConfig {
        sched_type: "sched/hold".into(),
        hold_file: Some(hold_file.clone()),
        ..make_config(dir.path())
    };
    let core = ControllerCore::start(config, None).unwrap();
    let client = client_for(&core);

    let held = client.submit_job(job(1)).unwrap();
    let record = core.state().job(held).unwrap();
    assert!(record.is_held());

    std::fs::remove_file(&hold_file).unwrap();
    let free = client.submit_job(job(1)).unwrap();
    assert_eq!(core.state().job(free).unwrap().state, JobState::Running);

    client
        .update_job(JobUpdate {
            job_id: held,
            priority: None,
            hold: Some(false),
        })
        .unwrap();
    assert_eq!(core.state().job(held).unwrap().state, JobState::Running);
}

#[test]
fn backfill_agent_starts_small_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let config = ControllerConfig {
        sched_type: "sched/backfill".into(),
        backfill_interval_secs: 1,
        ..make_config(dir.path())
    };
    let core = ControllerCore::start(config, None).unwrap();
    let client = client_for(&core);

    client.submit_job(job(8)).unwrap();
    let blocked = client.submit_job(job(8)).unwrap();
    let small = client.submit_job(job(2)).unwrap();
    assert_eq!(core.state().job(small).unwrap().state, JobState::Pending);

    wait_for(|| core.state().job(small).unwrap().state == JobState::Running);
    assert_eq!(core.state().job(blocked).unwrap().state, JobState::Pending);
}

#[test]
fn reconfigure_switches_selector() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = make_config(dir.path());
    let path = write_config(dir.path(), &config);
    let core = ControllerCore::start(config.clone(), Some(path)).unwrap();
    let client = client_for(&core);
    assert_eq!(core.state().select_type(), "select/cons_res");

    config.select_type = "select/linear".into();
    write_config(dir.path(), &config);
    client.reconfigure(ControllerRole::Primary).unwrap();
    assert_eq!(core.state().select_type(), "select/linear");

    let job_id = client.submit_job(job(1)).unwrap();
    assert_eq!(core.state().job(job_id).unwrap().alloc_cpus, 4);
}

#[test]
fn reconfigure_without_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let core = ControllerCore::start(make_config(dir.path()), None).unwrap();
    rejected_with(
        client_for(&core).reconfigure(ControllerRole::Primary),
        errno::INVALID_ARGUMENT,
    );
}

#[test]
fn unknown_policy_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = ControllerConfig {
        sched_type: "sched/missing".into(),
        ..make_config(dir.path())
    };
    let err = ControllerCore::start(config, None).err().unwrap();
    assert!(matches!(err, ControllerError::Sched(_)), "{err}");
}
