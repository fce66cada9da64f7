use anyhow::{Context, Result};
use displayd_common::{
    build_request_from_session, format_duration, virtual_display_guid, ControlCommand,
    ControlResponse, DaemonStatus, DisplayApplyAction, DisplayApplyRequest, DisplayEnvironment,
    ErrorReporting, HelperClient, HelperProcess, HelperWatchdog, IpcServer, RecoveryOutcome,
    RunningAppEntry, SessionDescriptor, SessionDisplayPolicy, VirtualDisplayCreationResult,
    VirtualDisplayRecoveryParams, VirtualDisplaySpec, VirtualDisplaySupervisor, WatchdogHooks,
};
use displayd_config::Config;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A poisoned lock only means another thread panicked mid-update; the state
/// itself is still the best we have.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct DaemonState {
    session: Option<SessionDescriptor>,
    /// The launched app is still running after the stream ended.
    app_running: bool,
    /// Bumped on every session start and end; recovery aborts when it moves.
    session_generation: u64,
    running_apps: HashMap<String, RunningAppEntry>,
    virtual_display: Option<VirtualDisplaySpec>,
    virtual_display_device_id: Option<String>,
    /// Recovery gave up; nothing re-arms it until the next session starts.
    virtual_display_lost: bool,
    last_action: Option<DisplayApplyAction>,
    helper_ready: bool,
    recovering: bool,
}

impl DaemonState {
    fn environment(&self) -> HostEnvironment {
        HostEnvironment {
            virtual_display_device_id: self.virtual_display_device_id.clone(),
            running_apps: self.running_apps.clone(),
        }
    }

    fn status(&self) -> DaemonStatus {
        DaemonStatus {
            helper_ready: self.helper_ready,
            session: self.session.clone(),
            app_running: self.app_running,
            last_action: self.last_action,
            virtual_display_guid: self.virtual_display.as_ref().map(|spec| spec.guid),
            virtual_display_device_id: self.virtual_display_device_id.clone(),
            recovering: self.recovering,
            virtual_display_lost: self.virtual_display_lost,
        }
    }
}

/// Snapshot of host facts the decision logic asks about.
#[derive(Debug, Clone, Default)]
struct HostEnvironment {
    virtual_display_device_id: Option<String>,
    running_apps: HashMap<String, RunningAppEntry>,
}

impl DisplayEnvironment for HostEnvironment {
    fn resolve_any_virtual_display(&self) -> Option<String> {
        self.virtual_display_device_id.clone()
    }

    fn lookup_running_app(&self, app_id: &str) -> Option<RunningAppEntry> {
        self.running_apps.get(app_id).cloned()
    }
}

#[derive(Clone)]
struct Daemon {
    config: Arc<Config>,
    state: Arc<Mutex<DaemonState>>,
    client: HelperClient,
    helper: Arc<Mutex<HelperProcess>>,
    supervisor: Arc<Mutex<VirtualDisplaySupervisor<HelperClient>>>,
    watchdog: Arc<Mutex<HelperWatchdog>>,
}

impl Daemon {
    fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let client = HelperClient::new(config.helper.socket_path())
            .with_timeout(config.helper.request_timeout);

        let helper = Arc::new(Mutex::new(
            HelperProcess::new(config.helper.executable.clone(), client.clone())
                .with_args(config.helper.args.clone())
                .with_startup_timeout(config.helper.startup_timeout),
        ));
        let supervisor = Arc::new(Mutex::new(
            VirtualDisplaySupervisor::new(client.clone()).with_retry_delay(config.recovery.retry_delay),
        ));
        let state = Arc::new(Mutex::new(DaemonState::default()));

        let feature_enabled = config.helper.feature_enabled;
        let start_helper = Arc::clone(&helper);
        let ping_client = client.clone();
        let reset_helper = Arc::clone(&helper);
        let session_state = Arc::clone(&state);
        let process_state = Arc::clone(&state);
        let hooks = WatchdogHooks::new()
            .feature_enabled(move || feature_enabled)
            .ensure_helper_started(move || match lock(&start_helper).ensure_started() {
                Ok(()) => true,
                Err(e) => {
                    e.log_error("Display helper unavailable");
                    false
                }
            })
            .send_ping(move || ping_client.ping())
            .reset_connection(move || lock(&reset_helper).stop())
            .session_count(move || usize::from(lock(&session_state).session.is_some()))
            .running_processes(move || usize::from(lock(&process_state).app_running));

        Self {
            config,
            state,
            client,
            helper,
            supervisor,
            watchdog: Arc::new(Mutex::new(HelperWatchdog::new(hooks))),
        }
    }

    fn handle_control(&self, command: ControlCommand) -> Result<ControlResponse> {
        match command {
            ControlCommand::SessionStart { session, launch } => self.start_session(session, launch),
            ControlCommand::SessionEnd { app_running } => self.end_session(app_running),
            ControlCommand::Status => Ok(ControlResponse::Status(lock(&self.state).status())),
        }
    }

    fn start_session(&self, mut session: SessionDescriptor, launch: Option<RunningAppEntry>) -> Result<ControlResponse> {
        log::info!(
            "Session start: {}x{}@{} for client {:?}",
            session.width, session.height, session.fps, session.client_name
        );

        let environment = {
            let mut state = lock(&self.state);
            state.session_generation += 1;
            state.session = Some(session.clone());
            state.app_running = launch.is_some();
            state.virtual_display_lost = false;
            if let (Some(app_id), Some(entry)) = (session.app.app_id.clone(), launch) {
                state.running_apps.insert(app_id, entry);
            }
            state.environment()
        };

        let wants_virtual_display = SessionDisplayPolicy::new(&self.config.video, &session, &environment)
            .uses_virtual_display();
        if wants_virtual_display && session.virtual_display_device_id().is_none() {
            let spec = self.virtual_display_spec(&session);
            // Not fatal: the decision logic falls back to whatever virtual display it can find.
            match lock(&self.supervisor).create(&spec) {
                Ok(result) => {
                    session.virtual_display_device_id = result.device_id().map(str::to_string);
                    let mut state = lock(&self.state);
                    state.virtual_display = Some(spec);
                    state.virtual_display_device_id = session.virtual_display_device_id.clone();
                    state.session = Some(session.clone());
                }
                Err(e) => e.log_error("Failed to create virtual display"),
            }
        }

        let message = self.apply_for_session(&session)?;
        Ok(ControlResponse::Success { message })
    }

    fn end_session(&self, app_running: bool) -> Result<ControlResponse> {
        let virtual_display = {
            let mut state = lock(&self.state);
            state.session_generation += 1;
            state.session = None;
            state.app_running = app_running;
            if !app_running {
                state.running_apps.clear();
            }
            state.virtual_display_device_id = None;
            state.virtual_display_lost = false;
            state.virtual_display.take()
        };
        log::info!("Session end (app still running: {})", app_running);

        lock(&self.watchdog).reset();

        if let Err(e) = self.client.revert() {
            log::warn!("Failed to revert display configuration: {:#}", e);
        }
        lock(&self.state).last_action = Some(DisplayApplyAction::Revert);

        if let Some(spec) = virtual_display {
            let mut supervisor = lock(&self.supervisor);
            if supervisor.is_guid_tracked(&spec.guid) {
                if let Err(e) = supervisor.remove(spec.guid) {
                    e.log_error("Failed to remove virtual display");
                }
            }
        }

        Ok(ControlResponse::Success { message: "Session ended".to_string() })
    }

    fn virtual_display_spec(&self, session: &SessionDescriptor) -> VirtualDisplaySpec {
        VirtualDisplaySpec {
            guid: virtual_display_guid(self.config.video.virtual_display_mode, &session.client_uuid),
            width: session.width,
            height: session.height,
            fps: session.display_fps(),
            client_name: session.client_name.clone(),
            client_uuid: session.client_uuid.clone(),
            preferred_display_name: None,
            preferred_device_id: self.config.video.output_name().map(str::to_string),
        }
    }

    /// Build and send the apply request for `session`.
    fn apply_for_session(&self, session: &SessionDescriptor) -> Result<String> {
        let environment = lock(&self.state).environment();

        let Some(request) = build_request_from_session(&self.config.video, session, &environment) else {
            log::warn!("Display configuration could not be parsed, leaving displays untouched");
            lock(&self.state).last_action = Some(DisplayApplyAction::Skip);
            return Ok("Display configuration skipped".to_string());
        };

        self.send_request(&request)
            .with_context(|| "Failed to send display request to helper")?;
        Ok(format!("Display request sent ({:?})", request.action()))
    }

    fn send_request(&self, request: &DisplayApplyRequest) -> Result<()> {
        let action = request.action();
        log::info!("Dispatching {:?} for {:?}", action, request.target_device_id());

        match action {
            Some(DisplayApplyAction::Revert) => self.client.revert()?,
            Some(DisplayApplyAction::Skip) | None => {}
            Some(DisplayApplyAction::Apply) => self.client.apply(request)?,
        }

        lock(&self.state).last_action = action;
        Ok(())
    }

    /// Run one watchdog tick, then recover the session's virtual display if it
    /// vanished. Returns the delay before the next tick.
    fn tick(&self) -> std::time::Duration {
        let (interval, ready) = {
            let mut watchdog = lock(&self.watchdog);
            let interval = watchdog.tick();
            (interval, watchdog.helper_ready())
        };
        lock(&self.state).helper_ready = ready;

        if ready {
            if let Some(spec) = self.lost_virtual_display() {
                let daemon = self.clone();
                tokio::task::spawn_blocking(move || daemon.recover(spec));
            }
        }

        interval
    }

    /// The session's virtual display if it vanished and recovery should
    /// start. Marks the daemon as recovering before returning it.
    fn lost_virtual_display(&self) -> Option<VirtualDisplaySpec> {
        let spec = {
            let state = lock(&self.state);
            if state.recovering || state.session.is_none() {
                return None;
            }
            state.virtual_display.clone()?
        };

        let present = match self.client.query_virtual_display(spec.guid) {
            Ok(result) => result.is_some_and(|result| result.device_id().is_some()),
            Err(e) => {
                log::debug!("Virtual display query failed: {:#}", e);
                return None;
            }
        };

        let tracked = lock(&self.supervisor).is_guid_tracked(&spec.guid);
        if present && tracked {
            return None;
        }

        log::warn!("Virtual display {} is gone, starting recovery", spec.guid);
        lock(&self.supervisor).forget(&spec.guid);
        lock(&self.state).recovering = true;
        Some(spec)
    }

    fn recover(&self, spec: VirtualDisplaySpec) {
        let generation = lock(&self.state).session_generation;
        let abort_state = Arc::clone(&self.state);
        let reapply = self.clone();

        let params = VirtualDisplayRecoveryParams {
            spec,
            max_attempts: self.config.recovery.max_attempts,
            on_recovery_success: Box::new(move |result| reapply.reapply_after_recovery(result)),
            should_abort: Box::new(move || lock(&abort_state).session_generation != generation),
        };

        let outcome = lock(&self.supervisor).recover(params);

        let mut state = lock(&self.state);
        state.recovering = false;
        if let RecoveryOutcome::Exhausted { attempts } = outcome {
            if state.session_generation != generation {
                return;
            }
            log::error!(
                "Virtual display could not be restored after {} attempts; restart the session to retry",
                attempts
            );
            state.virtual_display = None;
            state.virtual_display_device_id = None;
            state.virtual_display_lost = true;
            if let Some(session) = state.session.as_mut() {
                session.virtual_display_device_id = None;
            }
        }
    }

    fn reapply_after_recovery(&self, result: VirtualDisplayCreationResult) {
        let session = {
            let mut state = lock(&self.state);
            let device_id = result.device_id().map(str::to_string);
            let Some(session) = state.session.as_mut() else {
                return;
            };
            session.virtual_display_device_id = device_id.clone();
            let session = session.clone();
            state.virtual_display_device_id = device_id;
            session
        };

        if let Err(e) = self.apply_for_session(&session) {
            log::error!("Failed to re-apply display configuration after recovery: {:#}", e);
        }
    }

    fn shutdown(&self) {
        let virtual_display = lock(&self.state).virtual_display.take();
        if let Some(spec) = virtual_display {
            if let Err(e) = lock(&self.supervisor).remove(spec.guid) {
                e.log_error("Failed to remove virtual display on shutdown");
            }
        }
        lock(&self.helper).stop();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    log::info!("Starting displayd daemon...");

    let config = Config::load()
        .map_err(|e| {
            log::error!("Configuration error: {}", e.user_friendly_message());
            anyhow::anyhow!("Configuration error: {}", e.user_friendly_message())
        })?;

    log::info!("Configuration loaded successfully");

    let control_socket = config.daemon.socket_path();
    let daemon = Daemon::new(config);

    let ipc_daemon = daemon.clone();
    std::thread::spawn(move || {
        let server = IpcServer::new(control_socket);
        if let Err(e) = server.start(move |command| ipc_daemon.handle_control(command)) {
            log::error!("IPC server error: {}", e);
        }
    });

    loop {
        let tick_daemon = daemon.clone();
        let next = tokio::task::spawn_blocking(move || tick_daemon.tick())
            .await
            .with_context(|| "Watchdog tick panicked")?;
        log::debug!("Next helper check in {}", format_duration(next));

        tokio::select! {
            _ = tokio::time::sleep(next) => {}
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                break;
            }
        }
    }

    tokio::task::spawn_blocking(move || daemon.shutdown())
        .await
        .with_context(|| "Shutdown panicked")?;

    Ok(())
}
