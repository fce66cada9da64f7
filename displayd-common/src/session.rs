use serde::{Deserialize, Serialize};

use crate::display::VirtualDisplayArrangement;

/// Per-application hints attached to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMetadata {
    pub app_id: Option<String>,
    pub app_name: Option<String>,
    /// The application asked to be streamed from its own virtual screen.
    pub virtual_screen: bool,
    /// Lossless-scaling style frame generation needs a fixed high refresh.
    pub gen1_framegen_fix: bool,
    /// Driver-level frame generation needs a fixed high refresh.
    pub gen2_framegen_fix: bool,
}

/// What a streaming client asked for when the session started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Target refresh when frame generation doubles the client's fps.
    #[serde(default)]
    pub framegen_refresh_rate: Option<u32>,
    #[serde(default)]
    pub enable_hdr: bool,
    #[serde(default)]
    pub virtual_display: bool,
    /// Device id of a virtual display already created for this session.
    #[serde(default)]
    pub virtual_display_device_id: Option<String>,
    #[serde(default)]
    pub virtual_display_layout: Option<VirtualDisplayArrangement>,
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub client_uuid: String,
    #[serde(default)]
    pub app: AppMetadata,
}

impl SessionDescriptor {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps,
            framegen_refresh_rate: None,
            enable_hdr: false,
            virtual_display: false,
            virtual_display_device_id: None,
            virtual_display_layout: None,
            client_name: String::new(),
            client_uuid: String::new(),
            app: AppMetadata::default(),
        }
    }

    /// Refresh the display must run at: the frame generation target when set,
    /// otherwise the client fps.
    pub fn display_fps(&self) -> u32 {
        match self.framegen_refresh_rate {
            Some(rate) if rate > 0 => rate,
            _ => self.fps,
        }
    }

    pub fn virtual_display_device_id(&self) -> Option<&str> {
        self.virtual_display_device_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn framegen_fix_active(&self) -> bool {
        self.app.gen1_framegen_fix || self.app.gen2_framegen_fix
    }
}

/// Entry of the host's running-application registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningAppEntry {
    pub command_line: Option<String>,
    pub launcher_id: Option<String>,
}

impl RunningAppEntry {
    /// Neither a command nor an external launcher: the app is the desktop.
    pub fn is_desktop(&self) -> bool {
        let blank = |value: &Option<String>| value.as_deref().map_or(true, |v| v.trim().is_empty());
        blank(&self.command_line) && blank(&self.launcher_id)
    }
}

/// Host-side queries the decision logic needs but does not own.
pub trait DisplayEnvironment {
    /// Device id of any active virtual display, if one exists.
    fn resolve_any_virtual_display(&self) -> Option<String>;

    fn lookup_running_app(&self, app_id: &str) -> Option<RunningAppEntry>;

    /// Whether an external frame limiter can cap fps without vsync.
    fn frame_limiter_available(&self) -> bool {
        false
    }
}
