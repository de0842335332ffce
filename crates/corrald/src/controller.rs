//! Controller lifecycle: assemble subsystems, reconfigure, shut down.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, RwLock};

use corral_core::config::ControllerConfig;
use corral_plugin::PluginRegistry;
use corral_proto::Envelope;
use corral_sched::{PolicyOptions, SchedDriver, SchedError, SchedulerHost, policy_for};
use corral_select::{ResourceSelector, selector_for};
use corral_state::{SaveCoordinator, StateStore};
use tracing::{debug, info, warn};

use crate::checkpoint::StateCheckpointer;
use crate::error::{ControllerError, ControllerResult};
use crate::handlers;
use crate::server::{RpcServer, ServerHandle};
use crate::state::{ControllerState, SavedState};

fn policy_options(config: &ControllerConfig) -> PolicyOptions {
    PolicyOptions {
        backfill_interval: config.backfill_interval(),
        hold_file: config.hold_file.clone(),
    }
}

fn build_selector(config: &ControllerConfig) -> ControllerResult<Arc<dyn ResourceSelector>> {
    Ok(Arc::from(selector_for(
        &config.select_type,
        &config.select_type_parameters,
    )?))
}

/// What request handlers see.
pub(crate) struct Shared {
    pub(crate) config: RwLock<ControllerConfig>,
    config_path: Option<PathBuf>,
    pub(crate) state: Arc<ControllerState>,
    pub(crate) driver: SchedDriver,
    registry: Arc<PluginRegistry>,
    saves: Arc<SaveCoordinator>,
    /// Held for the whole of a reconfigure.
    reconfiguring: Mutex<()>,
    /// `Some(core)` once a shutdown was asked for.
    shutdown_request: Mutex<Option<bool>>,
    shutdown_wake: Condvar,
}

impl Shared {
    fn host(&self) -> Arc<dyn SchedulerHost> {
        Arc::clone(&self.state) as Arc<dyn SchedulerHost>
    }

    /// Ask the active policy for a pass.
    pub(crate) fn schedule(&self) {
        match self.driver.schedule() {
            Ok(()) => {}
            Err(SchedError::NotRunning) => debug!("no scheduling policy running"),
            Err(e) => warn!(error = %e, "scheduling pass failed"),
        }
    }

    /// Re-read the configuration file and apply it.
    pub(crate) fn reconfigure(&self) -> ControllerResult<()> {
        let _reconfiguring = self.reconfiguring.lock().expect("reconfigure lock poisoned");
        let path = self
            .config_path
            .as_ref()
            .ok_or_else(|| ControllerError::Config("no configuration file to re-read".into()))?;
        let new = ControllerConfig::from_file(path)
            .map_err(|e| ControllerError::Config(format!("{}: {e:#}", path.display())))?;
        let old = self.config.read().expect("config lock poisoned").clone();
        if new.listen_addr != old.listen_addr {
            warn!(old = %old.listen_addr, new = %new.listen_addr, "listen address change needs a restart");
        }

        let selector = build_selector(&new)?;
        self.state.reconfigure(&new, selector);

        let options = policy_options(&new);
        let old_options = policy_options(&old);
        if new.sched_type != old.sched_type
            || options.backfill_interval != old_options.backfill_interval
            || options.hold_file != old_options.hold_file
        {
            self.swap_policy(&new, &old)?;
        }

        info!(
            sched_type = %new.sched_type,
            select_type = %new.select_type,
            nodes = new.nodes.len(),
            partitions = new.partitions.len(),
            "reconfigured"
        );
        *self.config.write().expect("config lock poisoned") = new;
        self.schedule();
        Ok(())
    }

    /// Replace the running policy. If the new one will not start, the
    /// old one is restarted.
    fn swap_policy(&self, new: &ControllerConfig, old: &ControllerConfig) -> ControllerResult<()> {
        self.driver.shutdown();
        let started = policy_for(&new.sched_type, &policy_options(new), self.host(), &self.registry)
            .and_then(|policy| self.driver.start(policy));
        if let Err(e) = started {
            warn!(sched_type = %new.sched_type, error = %e, "new scheduling policy failed, restoring previous");
            let restored =
                policy_for(&old.sched_type, &policy_options(old), self.host(), &self.registry)
                    .and_then(|policy| self.driver.start(policy));
            if let Err(restore) = restored {
                warn!(sched_type = %old.sched_type, error = %restore, "previous scheduling policy failed to restart");
            }
            return Err(e.into());
        }
        Ok(())
    }

    pub(crate) fn request_shutdown(&self, core: bool) {
        let mut request = self.shutdown_request.lock().expect("shutdown lock poisoned");
        if request.is_none() {
            *request = Some(core);
            info!(core, "shutdown requested");
        }
        self.shutdown_wake.notify_all();
    }
}

/// A running controller.
pub struct ControllerCore {
    shared: Arc<Shared>,
    server: Mutex<Option<ServerHandle>>,
    local_addr: SocketAddr,
}

impl ControllerCore {
    /// Recover state, start persistence, the scheduling policy and the
    /// RPC listener, then run one scheduling pass.
    pub fn start(config: ControllerConfig, config_path: Option<PathBuf>) -> ControllerResult<Self> {
        let store = StateStore::open_dir(&config.state_save_location)?;
        let saved = SavedState::load(&store)?;
        let selector = build_selector(&config)?;

        let saves = Arc::new(SaveCoordinator::new());
        let state = Arc::new(ControllerState::new(&config, saved, selector, Arc::clone(&saves)));
        saves.start(Arc::new(StateCheckpointer::new(Arc::downgrade(&state), store)))?;

        let registry = Arc::new(PluginRegistry::new());
        if config.plugin_dir.is_dir() {
            match registry.discover(&config.plugin_dir) {
                Ok(found) => info!(dir = ?config.plugin_dir, found, "plugins discovered"),
                Err(e) => warn!(dir = ?config.plugin_dir, error = %e, "plugin discovery failed"),
            }
        }

        let driver = SchedDriver::new();
        let host = Arc::clone(&state) as Arc<dyn SchedulerHost>;
        driver.start(policy_for(
            &config.sched_type,
            &policy_options(&config),
            host,
            &registry,
        )?)?;

        let server = RpcServer::bind(&config.listen_addr, config.msg_timeout())?;
        let local_addr = server.local_addr();

        let shared = Arc::new(Shared {
            config: RwLock::new(config),
            config_path,
            state,
            driver,
            registry,
            saves,
            reconfiguring: Mutex::new(()),
            shutdown_request: Mutex::new(None),
            shutdown_wake: Condvar::new(),
        });

        let handler_shared = Arc::clone(&shared);
        let handle = server.spawn(Arc::new(move |envelope: Envelope| {
            handlers::dispatch(&handler_shared, envelope)
        }))?;

        shared.schedule();
        info!(%local_addr, select_type = shared.state.select_type(), "controller started");
        Ok(Self {
            shared,
            server: Mutex::new(Some(handle)),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<ControllerState> {
        &self.shared.state
    }

    /// The running scheduling policy, if any.
    pub fn sched_type(&self) -> Option<String> {
        self.shared.driver.sched_type()
    }

    pub fn reconfigure(&self) -> ControllerResult<()> {
        self.shared.reconfigure()
    }

    pub fn request_shutdown(&self, core: bool) {
        self.shared.request_shutdown(core);
    }

    /// Block until a shutdown is requested (or [`shutdown`](Self::shutdown)
    /// runs). Returns whether it was a core-only shutdown.
    pub fn wait_for_shutdown_request(&self) -> bool {
        let mut request = self
            .shared
            .shutdown_request
            .lock()
            .expect("shutdown lock poisoned");
        loop {
            if let Some(core) = *request {
                return core;
            }
            request = self
                .shared
                .shutdown_wake
                .wait(request)
                .expect("shutdown lock poisoned");
        }
    }

    /// Stop the listener, the policy and the save thread, flushing every
    /// dirty category. Idempotent.
    pub fn shutdown(&self) {
        let server = self.server.lock().expect("server lock poisoned").take();
        let Some(mut server) = server else {
            return;
        };
        server.stop();
        self.shared.driver.shutdown();
        self.shared.saves.shutdown();
        // Release anyone still waiting for a request.
        self.shared.request_shutdown(false);
        info!("controller stopped");
    }
}

impl Drop for ControllerCore {
    fn drop(&mut self) {
        self.shutdown();
    }
}
