//! Plugin-backed scheduling policies against a real shared library built
//! from `tests/fixtures/plugins/sched_fixture.c`.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use corral_core::errno;
use corral_plugin::{PluginError, PluginRegistry};
use corral_sched::{DriverState, DynamicPolicy, SchedDriver, SchedError, SchedulingPolicy};

const SCHED_TYPE: &str = "sched/fixture";

// ── Build helpers ─────────────────────────────────────────────────

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .to_path_buf()
}

/// A plugin directory holding one freshly built fixture, and the log its
/// calls append to.
struct Fixture {
    _dir: tempfile::TempDir,
    plugins: PathBuf,
    log: PathBuf,
}

impl Fixture {
    fn build(extra: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let plugins = dir.path().join("plugins");
        std::fs::create_dir(&plugins).unwrap();
        let log = dir.path().join("log");

        let cc = std::env::var("CC").unwrap_or_else(|_| "cc".to_string());
        let status = Command::new(&cc)
            .args(["-shared", "-fPIC", "-o"])
            .arg(plugins.join("sched_fixture.so"))
            .arg(format!("-DLOG_PATH=\"{}\"", log.display()))
            .args(extra.iter().map(|d| format!("-D{d}")))
            .arg(workspace_root().join("tests/fixtures/plugins/sched_fixture.c"))
            .status()
            .expect("failed to run the C compiler for the plugin fixture");
        assert!(status.success(), "plugin fixture build failed: {status}");

        Self {
            _dir: dir,
            plugins,
            log,
        }
    }

    fn registry(&self) -> Arc<PluginRegistry> {
        let registry = Arc::new(PluginRegistry::new());
        assert_eq!(registry.discover(&self.plugins).unwrap(), 1);
        registry
    }

    fn calls(&self, what: &str) -> usize {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .filter(|l| *l == what)
            .count()
    }
}

// ── Tests ─────────────────────────────────────────────────────────

#[test]
fn plugin_ops_round_trip() {
    let fixture = Fixture::build(&[]);
    let registry = fixture.registry();

    let policy = DynamicPolicy::load(Arc::clone(&registry), SCHED_TYPE).unwrap();
    assert_eq!(policy.sched_type(), SCHED_TYPE);
    assert_eq!(policy.schedule(), errno::SUCCESS);
    assert_eq!(policy.initial_priority(100), 50);
    policy.job_is_pending();
    assert_eq!(policy.errno(), 42);
    assert_eq!(policy.strerror(42).as_deref(), Some("plugin says 42"));
    assert_eq!(policy.strerror(7), None);
    assert_eq!(fixture.calls("schedule"), 1);
    assert_eq!(fixture.calls("pending"), 1);

    policy.fini();
    assert!(registry.get(SCHED_TYPE).is_none());
    assert_eq!(policy.schedule(), errno::DISABLED);
    drop(policy);

    assert_eq!(fixture.calls("init"), 1);
    assert_eq!(fixture.calls("fini"), 1);
}

#[test]
fn driver_runs_plugin_policy() {
    let fixture = Fixture::build(&[]);
    let registry = fixture.registry();
    let driver = SchedDriver::new();

    driver
        .start(Box::new(DynamicPolicy::load(Arc::clone(&registry), SCHED_TYPE).unwrap()))
        .unwrap();
    assert_eq!(driver.sched_type().as_deref(), Some(SCHED_TYPE));
    driver.schedule().unwrap();
    assert_eq!(driver.initial_priority(10), 5);
    assert_eq!(driver.errno(), 42);
    assert_eq!(driver.strerror(42), "plugin says 42");
    assert_eq!(driver.strerror(errno::INVALID_JOB_ID), errno::strerror(errno::INVALID_JOB_ID));

    driver.shutdown();
    assert_eq!(driver.state(), DriverState::Unloaded);
    assert!(registry.get(SCHED_TYPE).is_none());
    assert_eq!(fixture.calls("fini"), 1);
}

#[test]
fn missing_op_fails_load_and_unregisters() {
    let fixture = Fixture::build(&["OMIT_STRERROR"]);
    let registry = fixture.registry();

    let err = DynamicPolicy::load(Arc::clone(&registry), SCHED_TYPE)
        .err()
        .expect("load should fail");
    match &err {
        SchedError::Plugin(PluginError::SymbolMissing { symbol, .. }) => assert_eq!(symbol, "strerror"),
        other => panic!("expected SymbolMissing, got {other}"),
    }
    assert_eq!(err.code(), errno::PLUGIN_SYMBOL_MISSING);
    assert!(registry.loaded_types().is_empty());
    assert_eq!(fixture.calls("init"), 1);
    assert_eq!(fixture.calls("fini"), 1);
}

#[test]
fn second_policy_leaves_registration_alone() {
    let fixture = Fixture::build(&[]);
    let registry = fixture.registry();

    let first = DynamicPolicy::load(Arc::clone(&registry), SCHED_TYPE).unwrap();
    let second = DynamicPolicy::load(Arc::clone(&registry), SCHED_TYPE).unwrap();
    drop(second);

    assert!(registry.get(SCHED_TYPE).is_some());
    assert_eq!(first.schedule(), errno::SUCCESS);
    assert_eq!(fixture.calls("fini"), 0);

    first.fini();
    assert!(registry.get(SCHED_TYPE).is_none());
    assert_eq!(fixture.calls("init"), 1);
    assert_eq!(fixture.calls("fini"), 1);
}

#[test]
fn rejected_start_keeps_running_plugin_registered() {
    let fixture = Fixture::build(&[]);
    let registry = fixture.registry();
    let driver = SchedDriver::new();

    driver
        .start(Box::new(DynamicPolicy::load(Arc::clone(&registry), SCHED_TYPE).unwrap()))
        .unwrap();
    let duplicate = DynamicPolicy::load(Arc::clone(&registry), SCHED_TYPE).unwrap();
    let err = driver.start(Box::new(duplicate)).unwrap_err();
    assert!(matches!(err, SchedError::AlreadyActive(_)), "{err}");

    assert!(registry.get(SCHED_TYPE).is_some());
    driver.schedule().unwrap();
    driver.shutdown();
    assert_eq!(fixture.calls("fini"), 1);
}
