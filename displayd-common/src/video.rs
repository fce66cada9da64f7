use serde::{Deserialize, Serialize};

use crate::display::VirtualDisplayArrangement;

/// Which display preparation the operator asked for. `Disabled` turns off
/// display reconfiguration entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigurationOption {
    Disabled,
    #[default]
    VerifyOnly,
    EnsureActive,
    EnsurePrimary,
    EnsureOnlyDisplay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOption {
    Disabled,
    #[default]
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshRateOption {
    Disabled,
    #[default]
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HdrOption {
    Disabled,
    #[default]
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VirtualDisplayMode {
    #[default]
    Disabled,
    PerClient,
    Shared,
}

/// Operator-level display defaults, the `[video]` section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticVideoConfig {
    pub configuration_option: ConfigurationOption,
    pub resolution_option: ResolutionOption,
    pub manual_resolution: Option<String>,
    pub refresh_rate_option: RefreshRateOption,
    pub manual_refresh_rate: Option<String>,
    pub hdr_option: HdrOption,
    /// Output used when nothing more specific is known. Empty means the
    /// primary display.
    pub output_name: String,
    pub virtual_display_mode: VirtualDisplayMode,
    pub virtual_display_layout: VirtualDisplayArrangement,
    /// Assume an EDID dongle that only offers HDR at 30 Hz.
    pub dummy_plug_hdr10: bool,
    /// Toggle HDR off and on after applying to kick drivers that forget it.
    pub hdr_toggle: bool,
    pub disable_vsync: bool,
}

impl Default for StaticVideoConfig {
    fn default() -> Self {
        Self {
            configuration_option: ConfigurationOption::default(),
            resolution_option: ResolutionOption::default(),
            manual_resolution: None,
            refresh_rate_option: RefreshRateOption::default(),
            manual_refresh_rate: None,
            hdr_option: HdrOption::default(),
            output_name: String::new(),
            virtual_display_mode: VirtualDisplayMode::default(),
            virtual_display_layout: VirtualDisplayArrangement::default(),
            dummy_plug_hdr10: false,
            hdr_toggle: false,
            disable_vsync: false,
        }
    }
}

impl StaticVideoConfig {
    pub fn output_name(&self) -> Option<&str> {
        let name = self.output_name.trim();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}
