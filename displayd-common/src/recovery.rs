//! Virtual display lifecycle: creation, tracked identity and bounded-retry
//! recovery after driver resets or sleep/wake.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{DisplaydError, VirtualDisplayError};
use crate::video::VirtualDisplayMode;
use crate::Result;

/// Namespace for per-client virtual display GUIDs.
const VIRTUAL_DISPLAY_NAMESPACE: Uuid = Uuid::from_u128(0x5f0c_9a43_6a1e_4c55_9b1d_2f6e_07d4_a3c1);

/// Stable GUID for a client's virtual display. Shared mode hands every client
/// the same display.
pub fn virtual_display_guid(mode: VirtualDisplayMode, client_uuid: &str) -> Uuid {
    match mode {
        VirtualDisplayMode::Shared => Uuid::new_v5(&VIRTUAL_DISPLAY_NAMESPACE, b"shared"),
        VirtualDisplayMode::PerClient | VirtualDisplayMode::Disabled => {
            Uuid::new_v5(&VIRTUAL_DISPLAY_NAMESPACE, client_uuid.as_bytes())
        }
    }
}

/// What to create and for whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDisplaySpec {
    pub guid: Uuid,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub client_name: String,
    pub client_uuid: String,
    pub preferred_display_name: Option<String>,
    pub preferred_device_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDisplayCreationResult {
    pub display_name: Option<String>,
    pub device_id: Option<String>,
    pub client_name: Option<String>,
    pub monitor_device_path: Option<String>,
    /// An existing display was reused rather than created.
    pub reused_existing: bool,
    pub ready_at: DateTime<Utc>,
}

impl VirtualDisplayCreationResult {
    /// Later configuration steps need the device id; without it the display
    /// is as good as missing.
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref().filter(|id| !id.trim().is_empty())
    }
}

/// Raw create/remove calls against the virtual display driver.
pub trait VirtualDisplayDriver {
    fn create(&mut self, spec: &VirtualDisplaySpec) -> Result<VirtualDisplayCreationResult>;

    fn remove(&mut self, guid: Uuid) -> Result<()>;
}

pub struct VirtualDisplayRecoveryParams<'a> {
    pub spec: VirtualDisplaySpec,
    pub max_attempts: u32,
    pub on_recovery_success: Box<dyn FnMut(VirtualDisplayCreationResult) + Send + 'a>,
    /// Polled before every attempt; must not block.
    pub should_abort: Box<dyn Fn() -> bool + Send + 'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Recovered { attempts: u32 },
    Aborted { attempts: u32 },
    Exhausted { attempts: u32 },
}

pub struct VirtualDisplaySupervisor<D> {
    driver: D,
    tracked: HashMap<Uuid, VirtualDisplayCreationResult>,
    retry_delay: Duration,
}

impl<D: VirtualDisplayDriver> VirtualDisplaySupervisor<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            tracked: HashMap::new(),
            retry_delay: Duration::ZERO,
        }
    }

    /// Pause between recovery attempts, giving a resetting driver time to settle.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn is_guid_tracked(&self, guid: &Uuid) -> bool {
        self.tracked.contains_key(guid)
    }

    pub fn tracked(&self, guid: &Uuid) -> Option<&VirtualDisplayCreationResult> {
        self.tracked.get(guid)
    }

    pub fn tracked_guids(&self) -> Vec<Uuid> {
        let mut guids: Vec<Uuid> = self.tracked.keys().copied().collect();
        guids.sort();
        guids
    }

    /// Create the display and start tracking its GUID.
    ///
    /// A display that never resolves to a device id is removed again before
    /// the failure is returned, since the driver may still hold it.
    pub fn create(&mut self, spec: &VirtualDisplaySpec) -> Result<VirtualDisplayCreationResult> {
        let result = match self.driver.create(spec) {
            Ok(result) if result.device_id().is_some() => result,
            Ok(_) | Err(DisplaydError::VirtualDisplay(VirtualDisplayError::DeviceIdUnresolved { .. })) => {
                if let Err(e) = self.driver.remove(spec.guid) {
                    log::warn!("Failed to discard unresolved virtual display {}: {}", spec.guid, e);
                }
                return Err(DisplaydError::VirtualDisplay(VirtualDisplayError::DeviceIdUnresolved {
                    guid: spec.guid,
                }));
            }
            Err(e) => return Err(e),
        };

        log::info!(
            "Virtual display {} ready as {} ({})",
            spec.guid,
            result.device_id().unwrap_or_default(),
            if result.reused_existing { "reused" } else { "created" }
        );
        self.tracked.insert(spec.guid, result.clone());
        Ok(result)
    }

    /// Remove the display and stop tracking it. Untracks even when the driver
    /// call fails, since the display is unusable either way.
    pub fn remove(&mut self, guid: Uuid) -> Result<()> {
        if self.tracked.remove(&guid).is_none() {
            return Err(DisplaydError::VirtualDisplay(VirtualDisplayError::NotTracked { guid }));
        }
        self.driver.remove(guid)
    }

    /// Stop tracking a display that vanished underneath us.
    pub fn forget(&mut self, guid: &Uuid) -> Option<VirtualDisplayCreationResult> {
        self.tracked.remove(guid)
    }

    /// Re-create the display described by `params`, at most `max_attempts`
    /// times. Exhaustion drops the GUID from tracking.
    pub fn recover(&mut self, params: VirtualDisplayRecoveryParams<'_>) -> RecoveryOutcome {
        let VirtualDisplayRecoveryParams {
            spec,
            max_attempts,
            mut on_recovery_success,
            should_abort,
        } = params;

        for attempt in 1..=max_attempts {
            if attempt > 1 && !self.retry_delay.is_zero() {
                std::thread::sleep(self.retry_delay);
            }

            if should_abort() {
                log::info!("Recovery of virtual display {} aborted", spec.guid);
                return RecoveryOutcome::Aborted { attempts: attempt - 1 };
            }

            match self.create(&spec) {
                Ok(result) => {
                    log::info!("Recovered virtual display {} on attempt {}/{}", spec.guid, attempt, max_attempts);
                    on_recovery_success(result);
                    return RecoveryOutcome::Recovered { attempts: attempt };
                }
                Err(e) => {
                    log::warn!(
                        "Virtual display {} recovery attempt {}/{} failed: {}",
                        spec.guid, attempt, max_attempts, e
                    );
                }
            }
        }

        log::error!("Giving up on virtual display {} after {} attempts", spec.guid, max_attempts);
        self.tracked.remove(&spec.guid);
        RecoveryOutcome::Exhausted { attempts: max_attempts }
    }
}
