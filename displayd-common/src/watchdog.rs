//! Liveness state machine for the out-of-process display helper.
//!
//! The watchdog owns no thread. Something else calls [`HelperWatchdog::tick`]
//! periodically and sleeps for the returned interval. Calls must not overlap.

use std::time::Duration;

/// Poll interval while a session is streaming or nothing at all is running.
pub const ACTIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Poll interval while the host is idle but a launched app is still running.
pub const SUSPENDED_INTERVAL: Duration = Duration::from_secs(30);

type Check = Box<dyn Fn() -> bool + Send + Sync>;
type Action = Box<dyn Fn() + Send + Sync>;
type Count = Box<dyn Fn() -> usize + Send + Sync>;

/// Capability slots the watchdog calls into. An empty slot means "not
/// applicable" and is never treated as a failure.
#[derive(Default)]
pub struct WatchdogHooks {
    pub feature_enabled: Option<Check>,
    pub ensure_helper_started: Option<Check>,
    pub send_ping: Option<Check>,
    pub reset_connection: Option<Action>,
    pub session_count: Option<Count>,
    pub running_processes: Option<Count>,
}

impl WatchdogHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feature_enabled(mut self, hook: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.feature_enabled = Some(Box::new(hook));
        self
    }

    pub fn ensure_helper_started(mut self, hook: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.ensure_helper_started = Some(Box::new(hook));
        self
    }

    pub fn send_ping(mut self, hook: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.send_ping = Some(Box::new(hook));
        self
    }

    pub fn reset_connection(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.reset_connection = Some(Box::new(hook));
        self
    }

    pub fn session_count(mut self, hook: impl Fn() -> usize + Send + Sync + 'static) -> Self {
        self.session_count = Some(Box::new(hook));
        self
    }

    pub fn running_processes(mut self, hook: impl Fn() -> usize + Send + Sync + 'static) -> Self {
        self.running_processes = Some(Box::new(hook));
        self
    }

    fn check(hook: &Option<Check>) -> bool {
        hook.as_ref().map_or(true, |hook| hook())
    }

    fn is_feature_enabled(&self) -> bool {
        Self::check(&self.feature_enabled)
    }

    fn start_helper(&self) -> bool {
        Self::check(&self.ensure_helper_started)
    }

    fn ping(&self) -> bool {
        Self::check(&self.send_ping)
    }

    fn reset(&self) {
        if let Some(hook) = &self.reset_connection {
            hook();
        }
    }
}

pub struct HelperWatchdog {
    hooks: WatchdogHooks,
    helper_ready: bool,
}

impl HelperWatchdog {
    pub fn new(hooks: WatchdogHooks) -> Self {
        Self {
            hooks,
            helper_ready: false,
        }
    }

    pub fn helper_ready(&self) -> bool {
        self.helper_ready
    }

    /// Forget readiness without touching the helper, e.g. when a session ends.
    pub fn reset(&mut self) {
        self.helper_ready = false;
    }

    /// Run one health check and return how long to wait before the next one.
    pub fn tick(&mut self) -> Duration {
        let interval = self.interval();

        if !self.hooks.is_feature_enabled() {
            if self.helper_ready {
                log::info!("Display helper feature disabled, releasing connection");
                self.hooks.reset();
            }
            self.helper_ready = false;
            return interval;
        }

        if !self.helper_ready {
            if self.hooks.start_helper() {
                log::info!("Display helper is up");
                self.helper_ready = true;
                // Warms the channel; readiness does not depend on it.
                let _ = self.hooks.ping();
            } else {
                log::debug!("Display helper not available yet");
            }
            return interval;
        }

        if !self.hooks.ping() {
            log::warn!("Display helper did not answer ping, restarting");
            self.hooks.reset();
            self.helper_ready = if self.hooks.start_helper() {
                self.hooks.ping()
            } else {
                false
            };

            if self.helper_ready {
                log::info!("Display helper recovered");
            } else {
                log::error!("Display helper restart failed, will retry");
            }
        }

        interval
    }

    fn interval(&self) -> Duration {
        let sessions = self.hooks.session_count.as_ref().map(|hook| hook());
        let processes = self.hooks.running_processes.as_ref().map(|hook| hook());

        match (sessions, processes) {
            (Some(0), Some(running)) if running > 0 => SUSPENDED_INTERVAL,
            _ => ACTIVE_INTERVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Counters {
        starts: Arc<AtomicUsize>,
        pings: Arc<AtomicUsize>,
        resets: Arc<AtomicUsize>,
    }

    fn hooks_with(counters: &Counters, start_ok: Arc<AtomicBool>, ping_ok: Arc<AtomicBool>) -> WatchdogHooks {
        let starts = Arc::clone(&counters.starts);
        let pings = Arc::clone(&counters.pings);
        let resets = Arc::clone(&counters.resets);

        WatchdogHooks::new()
            .ensure_helper_started(move || {
                starts.fetch_add(1, Ordering::SeqCst);
                start_ok.load(Ordering::SeqCst)
            })
            .send_ping(move || {
                pings.fetch_add(1, Ordering::SeqCst);
                ping_ok.load(Ordering::SeqCst)
            })
            .reset_connection(move || {
                resets.fetch_add(1, Ordering::SeqCst);
            })
    }

    #[test]
    fn test_interval_selection() {
        let cases = [
            (0, 1, SUSPENDED_INTERVAL),
            (0, 3, SUSPENDED_INTERVAL),
            (0, 0, ACTIVE_INTERVAL),
            (1, 1, ACTIVE_INTERVAL),
            (2, 0, ACTIVE_INTERVAL),
        ];

        for (sessions, processes, expected) in cases {
            let hooks = WatchdogHooks::new()
                .session_count(move || sessions)
                .running_processes(move || processes);
            let mut watchdog = HelperWatchdog::new(hooks);
            assert_eq!(watchdog.tick(), expected, "sessions={} processes={}", sessions, processes);
        }

        let mut watchdog = HelperWatchdog::new(WatchdogHooks::new().session_count(|| 0));
        assert_eq!(watchdog.tick(), ACTIVE_INTERVAL);
    }

    #[test]
    fn test_start_marks_ready_regardless_of_ping() {
        let counters = Counters::default();
        let hooks = hooks_with(&counters, Arc::new(AtomicBool::new(true)), Arc::new(AtomicBool::new(false)));
        let mut watchdog = HelperWatchdog::new(hooks);

        assert!(!watchdog.helper_ready());
        watchdog.tick();
        assert!(watchdog.helper_ready());
        assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
        assert_eq!(counters.pings.load(Ordering::SeqCst), 1);
        assert_eq!(counters.resets.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_start_stays_not_ready() {
        let counters = Counters::default();
        let hooks = hooks_with(&counters, Arc::new(AtomicBool::new(false)), Arc::new(AtomicBool::new(true)));
        let mut watchdog = HelperWatchdog::new(hooks);

        watchdog.tick();
        watchdog.tick();
        assert!(!watchdog.helper_ready());
        assert_eq!(counters.starts.load(Ordering::SeqCst), 2);
        assert_eq!(counters.pings.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ping_failure_restarts_helper() {
        let starts = Arc::new(AtomicUsize::new(0));
        let pings = Arc::new(AtomicUsize::new(0));
        let resets = Arc::new(AtomicUsize::new(0));

        let start_count = Arc::clone(&starts);
        let ping_count = Arc::clone(&pings);
        let reset_count = Arc::clone(&resets);
        let hooks = WatchdogHooks::new()
            .ensure_helper_started(move || {
                start_count.fetch_add(1, Ordering::SeqCst);
                true
            })
            // Ping #1 is the warm-up after the first start, #2 fails, #3 follows the restart.
            .send_ping(move || ping_count.fetch_add(1, Ordering::SeqCst) != 1)
            .reset_connection(move || {
                reset_count.fetch_add(1, Ordering::SeqCst);
            });
        let mut watchdog = HelperWatchdog::new(hooks);

        watchdog.tick();
        assert!(watchdog.helper_ready());

        watchdog.tick();
        assert!(watchdog.helper_ready());
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert_eq!(pings.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_restart_failure_marks_not_ready() {
        let counters = Counters::default();
        let start_ok = Arc::new(AtomicBool::new(true));
        let ping_ok = Arc::new(AtomicBool::new(true));
        let hooks = hooks_with(&counters, Arc::clone(&start_ok), Arc::clone(&ping_ok));
        let mut watchdog = HelperWatchdog::new(hooks);

        watchdog.tick();
        assert!(watchdog.helper_ready());

        ping_ok.store(false, Ordering::SeqCst);
        start_ok.store(false, Ordering::SeqCst);
        watchdog.tick();
        assert!(!watchdog.helper_ready());
        assert_eq!(counters.resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_healthy_ping_keeps_state() {
        let counters = Counters::default();
        let hooks = hooks_with(&counters, Arc::new(AtomicBool::new(true)), Arc::new(AtomicBool::new(true)));
        let mut watchdog = HelperWatchdog::new(hooks);

        watchdog.tick();
        watchdog.tick();
        watchdog.tick();
        assert!(watchdog.helper_ready());
        assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
        assert_eq!(counters.resets.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disabled_feature_releases_connection() {
        let counters = Counters::default();
        let enabled = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&enabled);
        let hooks = hooks_with(&counters, Arc::new(AtomicBool::new(true)), Arc::new(AtomicBool::new(true)))
            .feature_enabled(move || flag.load(Ordering::SeqCst));
        let mut watchdog = HelperWatchdog::new(hooks);

        watchdog.tick();
        assert!(watchdog.helper_ready());

        enabled.store(false, Ordering::SeqCst);
        let pings_before = counters.pings.load(Ordering::SeqCst);
        watchdog.tick();
        assert!(!watchdog.helper_ready());
        assert_eq!(counters.resets.load(Ordering::SeqCst), 1);
        assert_eq!(counters.pings.load(Ordering::SeqCst), pings_before);

        // Already not ready: no second reset.
        watchdog.tick();
        assert_eq!(counters.resets.load(Ordering::SeqCst), 1);
        assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_absent_hooks_are_not_failures() {
        let mut watchdog = HelperWatchdog::new(WatchdogHooks::new());
        assert_eq!(watchdog.tick(), ACTIVE_INTERVAL);
        assert!(watchdog.helper_ready());
        watchdog.tick();
        assert!(watchdog.helper_ready());
    }

    #[test]
    fn test_reset_clears_ready_without_hooks() {
        let counters = Counters::default();
        let hooks = hooks_with(&counters, Arc::new(AtomicBool::new(true)), Arc::new(AtomicBool::new(true)));
        let mut watchdog = HelperWatchdog::new(hooks);

        watchdog.tick();
        assert!(watchdog.helper_ready());
        watchdog.reset();
        assert!(!watchdog.helper_ready());
        assert_eq!(counters.resets.load(Ordering::SeqCst), 0);
    }
}
