//! Value types describing a single display configuration as the helper
//! process understands it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ValidationError;

    /// Parses `WIDTHxHEIGHT`, e.g. `2560x1440`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidResolution { value: s.to_string() };
        let (width, height) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = width.trim().parse().map_err(|_| invalid())?;
        let height: u32 = height.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

/// Refresh rate in Hz. Fractional rates such as 59.94 are allowed.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct RefreshRate(pub f64);

impl RefreshRate {
    pub fn from_hz(hz: u32) -> Self {
        Self(f64::from(hz))
    }

    pub fn hz(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for RefreshRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz", self.0)
    }
}

impl FromStr for RefreshRate {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().trim_end_matches("Hz").trim_end_matches("hz").trim();
        match value.parse::<f64>() {
            Ok(hz) if hz.is_finite() && hz > 0.0 => Ok(Self(hz)),
            _ => Err(ValidationError::InvalidRefreshRate { value: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HdrState {
    Enabled,
    Disabled,
}

/// How the target display is made active relative to the other displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePreparation {
    VerifyOnly,
    EnsureActive,
    EnsurePrimary,
    EnsureOnlyDisplay,
}

/// Fully resolved settings for one display, as pushed to the helper.
///
/// `None` fields are left untouched by the helper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleDisplayConfiguration {
    pub device_id: String,
    pub device_prep: DevicePreparation,
    pub resolution: Option<Resolution>,
    pub refresh_rate: Option<RefreshRate>,
    pub hdr_state: Option<HdrState>,
}

impl Default for SingleDisplayConfiguration {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            device_prep: DevicePreparation::VerifyOnly,
            resolution: None,
            refresh_rate: None,
            hdr_state: None,
        }
    }
}

/// Where a virtual display sits relative to the physical desktop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VirtualDisplayArrangement {
    #[default]
    Extended,
    ExtendedPrimary,
    ExtendedIsolated,
    ExtendedPrimaryIsolated,
    Exclusive,
}

impl VirtualDisplayArrangement {
    pub fn is_isolated(&self) -> bool {
        matches!(
            self,
            VirtualDisplayArrangement::ExtendedIsolated
                | VirtualDisplayArrangement::ExtendedPrimaryIsolated
        )
    }

    pub fn device_preparation(&self) -> DevicePreparation {
        match self {
            VirtualDisplayArrangement::Exclusive => DevicePreparation::EnsureOnlyDisplay,
            VirtualDisplayArrangement::ExtendedPrimary
            | VirtualDisplayArrangement::ExtendedPrimaryIsolated => DevicePreparation::EnsurePrimary,
            VirtualDisplayArrangement::Extended
            | VirtualDisplayArrangement::ExtendedIsolated => DevicePreparation::EnsureActive,
        }
    }
}

impl fmt::Display for VirtualDisplayArrangement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VirtualDisplayArrangement::Extended => write!(f, "extended"),
            VirtualDisplayArrangement::ExtendedPrimary => write!(f, "extended_primary"),
            VirtualDisplayArrangement::ExtendedIsolated => write!(f, "extended_isolated"),
            VirtualDisplayArrangement::ExtendedPrimaryIsolated => write!(f, "extended_primary_isolated"),
            VirtualDisplayArrangement::Exclusive => write!(f, "exclusive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_parse() {
        assert_eq!("2560x1440".parse::<Resolution>().unwrap(), Resolution::new(2560, 1440));
        assert_eq!(" 1920 X 1080 ".parse::<Resolution>().unwrap(), Resolution::new(1920, 1080));
        assert!("1920".parse::<Resolution>().is_err());
        assert!("0x1080".parse::<Resolution>().is_err());
        assert!("widexhigh".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_refresh_rate_parse() {
        assert_eq!("59.94".parse::<RefreshRate>().unwrap(), RefreshRate(59.94));
        assert_eq!("144Hz".parse::<RefreshRate>().unwrap(), RefreshRate::from_hz(144));
        assert!("-60".parse::<RefreshRate>().is_err());
        assert!("fast".parse::<RefreshRate>().is_err());
    }

    #[test]
    fn test_arrangement_preparation() {
        assert_eq!(
            VirtualDisplayArrangement::Exclusive.device_preparation(),
            DevicePreparation::EnsureOnlyDisplay
        );
        assert_eq!(
            VirtualDisplayArrangement::ExtendedPrimaryIsolated.device_preparation(),
            DevicePreparation::EnsurePrimary
        );
        assert_eq!(
            VirtualDisplayArrangement::ExtendedIsolated.device_preparation(),
            DevicePreparation::EnsureActive
        );
        assert!(VirtualDisplayArrangement::ExtendedIsolated.is_isolated());
        assert!(!VirtualDisplayArrangement::ExtendedPrimary.is_isolated());
    }
}
