//! Launches and supervises the out-of-process display helper.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::{DisplaydError, HelperError};
use crate::ipc::HelperClient;
use crate::Result;

/// Looked up on `PATH` when no executable is configured.
pub const DEFAULT_HELPER_NAME: &str = "displayd-helper";

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(3);
const STARTUP_POLL: Duration = Duration::from_millis(50);

pub struct HelperProcess {
    executable: Option<PathBuf>,
    args: Vec<String>,
    client: HelperClient,
    startup_timeout: Duration,
    child: Option<Child>,
}

impl HelperProcess {
    pub fn new(executable: Option<PathBuf>, client: HelperClient) -> Self {
        Self {
            executable,
            args: Vec::new(),
            client,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            child: None,
        }
    }

    /// Extra arguments, passed before `--socket <path>`.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn client(&self) -> &HelperClient {
        &self.client
    }

    pub fn resolve_executable(&self) -> Result<PathBuf> {
        match &self.executable {
            Some(path) if path.is_file() => Ok(path.clone()),
            Some(path) => which::which(path).map_err(|_| {
                DisplaydError::Helper(HelperError::ExecutableNotFound {
                    name: path.display().to_string(),
                })
            }),
            None => which::which(DEFAULT_HELPER_NAME).map_err(|_| {
                DisplaydError::Helper(HelperError::ExecutableNotFound {
                    name: DEFAULT_HELPER_NAME.to_string(),
                })
            }),
        }
    }

    /// Whether the child we spawned is still alive. Reaps it if not.
    pub fn is_running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };

        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                log::warn!("Display helper exited: {}", status);
                self.child = None;
                false
            }
            Err(e) => {
                log::error!("Failed to query display helper status: {}", e);
                false
            }
        }
    }

    /// Make sure a helper is listening. An externally managed helper that
    /// already answers pings is accepted as is.
    pub fn ensure_started(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        if self.client.ping() {
            log::debug!("Using already running display helper at {:?}", self.client.socket_path());
            return Ok(());
        }

        let executable = self.resolve_executable()?;
        let socket_path = self.client.socket_path().to_path_buf();
        if socket_path.exists() {
            // Stale socket from a helper that died.
            let _ = std::fs::remove_file(&socket_path);
        }

        log::info!("Starting display helper {:?}", executable);
        let child = Command::new(&executable)
            .args(&self.args)
            .arg("--socket")
            .arg(&socket_path)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| HelperError::Spawn {
                path: executable.clone(),
                source,
            })?;
        self.child = Some(child);

        let deadline = Instant::now() + self.startup_timeout;
        loop {
            if socket_path.exists() {
                return Ok(());
            }

            if let Some(child) = self.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    self.child = None;
                    return Err(HelperError::Exited { code: status.code() }.into());
                }
            }

            if Instant::now() >= deadline {
                log::warn!("Display helper did not create {:?} in time", socket_path);
                self.stop();
                return Err(HelperError::Exited { code: None }.into());
            }

            std::thread::sleep(STARTUP_POLL);
        }
    }

    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                log::debug!("Display helper already gone: {}", e);
            }
            let _ = child.wait();
            log::info!("Display helper stopped");
        }
    }
}

impl Drop for HelperProcess {
    fn drop(&mut self) {
        self.stop();
    }
}
