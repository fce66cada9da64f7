//! The applyable display request and the accumulator that composes it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::display::{Point, SingleDisplayConfiguration, VirtualDisplayArrangement};
use crate::session::SessionDescriptor;

/// What the session asked for, field by field. The helper falls back to these
/// when the configuration leaves a field unset or has to be re-derived, e.g.
/// after a virtual display was recreated. `None` defers to the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub framegen_refresh_rate: Option<u32>,
    pub device_id: Option<String>,
    pub virtual_display: Option<bool>,
}

/// Which outputs are combined, and where each one sits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub groups: Vec<Vec<String>>,
    pub positions: BTreeMap<String, Point>,
}

impl Topology {
    pub fn single(device_id: &str) -> Self {
        Self {
            groups: vec![vec![device_id.to_string()]],
            positions: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|group| group.is_empty())
    }

    pub fn first_device(&self) -> Option<&str> {
        self.groups.iter().flatten().map(String::as_str).next()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayApplyAction {
    Apply,
    Revert,
    Skip,
}

/// Immutable result of [`ApplyRequestBuilder::build`], handed to the helper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayApplyRequest {
    /// `None` only when the builder was never given an action.
    pub action: Option<DisplayApplyAction>,
    pub configuration: Option<SingleDisplayConfiguration>,
    pub session: Option<SessionDescriptor>,
    pub overrides: SessionOverrides,
    pub topology: Topology,
    /// Device excluded from later re-enumeration of physical outputs.
    pub device_blacklist: Option<String>,
    pub virtual_display_watchdog: bool,
    pub arrangement: VirtualDisplayArrangement,
    pub hdr_toggle: bool,
}

impl DisplayApplyRequest {
    pub fn action(&self) -> Option<DisplayApplyAction> {
        self.action
    }

    /// The device this request targets, preferring the override.
    pub fn target_device_id(&self) -> Option<&str> {
        self.overrides
            .device_id
            .as_deref()
            .or_else(|| self.configuration.as_ref().map(|c| c.device_id.as_str()))
            .filter(|id| !id.is_empty())
    }
}

/// Accumulates a [`DisplayApplyRequest`]. Setters never validate.
#[derive(Debug, Clone, Default)]
pub struct ApplyRequestBuilder {
    action: Option<DisplayApplyAction>,
    configuration: Option<SingleDisplayConfiguration>,
    session: Option<SessionDescriptor>,
    overrides: SessionOverrides,
    topology: Topology,
    device_blacklist: Option<String>,
    virtual_display_watchdog: bool,
    arrangement: VirtualDisplayArrangement,
    hdr_toggle: bool,
}

impl ApplyRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_session(&mut self, session: &SessionDescriptor) -> &mut Self {
        self.session = Some(session.clone());
        self
    }

    pub fn set_action(&mut self, action: DisplayApplyAction) -> &mut Self {
        self.action = Some(action);
        self
    }

    pub fn set_configuration(&mut self, configuration: SingleDisplayConfiguration) -> &mut Self {
        self.configuration = Some(configuration);
        self
    }

    pub fn clear_configuration(&mut self) -> &mut Self {
        self.configuration = None;
        self
    }

    pub fn set_device_blacklist(&mut self, device_id: Option<String>) -> &mut Self {
        self.device_blacklist = device_id;
        self
    }

    pub fn set_virtual_display_watchdog(&mut self, armed: bool) -> &mut Self {
        self.virtual_display_watchdog = armed;
        self
    }

    pub fn set_virtual_display_arrangement(&mut self, arrangement: VirtualDisplayArrangement) -> &mut Self {
        self.arrangement = arrangement;
        self
    }

    pub fn set_hdr_toggle_flag(&mut self, enabled: bool) -> &mut Self {
        self.hdr_toggle = enabled;
        self
    }

    pub fn mutable_session_overrides(&mut self) -> &mut SessionOverrides {
        &mut self.overrides
    }

    pub fn mutable_topology(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn action(&self) -> Option<DisplayApplyAction> {
        self.action
    }

    pub fn configuration(&self) -> Option<&SingleDisplayConfiguration> {
        self.configuration.as_ref()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Snapshot the accumulated fields. An empty topology is replaced with a
    /// single-device topology for the resolved device, when one is known.
    pub fn build(&self) -> DisplayApplyRequest {
        let mut request = DisplayApplyRequest {
            action: self.action,
            configuration: self.configuration.clone(),
            session: self.session.clone(),
            overrides: self.overrides.clone(),
            topology: self.topology.clone(),
            device_blacklist: self.device_blacklist.clone(),
            virtual_display_watchdog: self.virtual_display_watchdog,
            arrangement: self.arrangement,
            hdr_toggle: self.hdr_toggle,
        };

        if request.topology.is_empty() {
            if let Some(device_id) = request.target_device_id().map(str::to_string) {
                request.topology.groups = vec![vec![device_id]];
            }
        }

        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DevicePreparation;

    #[test]
    fn test_build_reflects_last_write() {
        let mut builder = ApplyRequestBuilder::new();
        builder
            .set_action(DisplayApplyAction::Revert)
            .set_action(DisplayApplyAction::Apply)
            .set_device_blacklist(Some("DISPLAY2".to_string()))
            .set_device_blacklist(None)
            .set_virtual_display_watchdog(true);

        let request = builder.build();
        assert_eq!(request.action(), Some(DisplayApplyAction::Apply));
        assert_eq!(request.device_blacklist, None);
        assert!(request.virtual_display_watchdog);
    }

    #[test]
    fn test_unset_action_builds() {
        let request = ApplyRequestBuilder::new().build();
        assert_eq!(request.action(), None);
        assert!(request.topology.is_empty());
    }

    #[test]
    fn test_build_synthesizes_single_device_topology() {
        let mut builder = ApplyRequestBuilder::new();
        builder.set_configuration(SingleDisplayConfiguration {
            device_id: "DISPLAY1".to_string(),
            device_prep: DevicePreparation::EnsureActive,
            ..Default::default()
        });
        builder.mutable_session_overrides().device_id = Some("DISPLAY5".to_string());

        let request = builder.build();
        assert_eq!(request.topology.groups, vec![vec!["DISPLAY5".to_string()]]);
    }

    #[test]
    fn test_build_keeps_explicit_topology() {
        let mut builder = ApplyRequestBuilder::new();
        builder.mutable_session_overrides().device_id = Some("DISPLAY5".to_string());
        builder.mutable_topology().groups = vec![vec!["A".to_string(), "B".to_string()]];

        let request = builder.build();
        assert_eq!(request.topology.groups, vec![vec!["A".to_string(), "B".to_string()]]);
        assert_eq!(request.topology.first_device(), Some("A"));
    }
}
