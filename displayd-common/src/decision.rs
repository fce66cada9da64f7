//! Turns a session plus the `[video]` config into a display request.
//!
//! Two paths exist. The virtual path targets a driver-backed virtual display
//! and arms the helper's virtual display watchdog. The standard path targets a
//! physical output and carries the refresh-rate and HDR workarounds needed by
//! frame generation and EDID dummy plugs.

use crate::display::{
    DevicePreparation, HdrState, Point, RefreshRate, Resolution, SingleDisplayConfiguration,
    VirtualDisplayArrangement,
};
use crate::parser::{DisplayConfigParser, ParsedConfiguration, StaticConfigParser};
use crate::request::{ApplyRequestBuilder, DisplayApplyAction, DisplayApplyRequest, Topology};
use crate::session::{DisplayEnvironment, SessionDescriptor};
use crate::video::{StaticVideoConfig, VirtualDisplayMode};

/// Refresh pinned when the stream must not let the display negotiate a lower
/// mode. The helper clamps it to the highest mode the display offers.
pub const FORCED_REFRESH_CEILING: RefreshRate = RefreshRate(10000.0);

/// EDID dummy plugs only expose HDR10 at this rate.
pub const DUMMY_PLUG_REFRESH: RefreshRate = RefreshRate(30.0);

/// Far outside any real desktop so window placement treats the display as
/// its own desktop.
pub const ISOLATED_DISPLAY_POSITION: Point = Point::new(16384, 16384);

/// Device id the helper resolves to the current primary display.
pub const PRIMARY_DEVICE_ID: &str = "primary";

static DEFAULT_PARSER: StaticConfigParser = StaticConfigParser;

pub struct SessionDisplayPolicy<'a> {
    config: &'a StaticVideoConfig,
    session: &'a SessionDescriptor,
    environment: &'a dyn DisplayEnvironment,
    parser: &'a dyn DisplayConfigParser,
}

impl<'a> SessionDisplayPolicy<'a> {
    pub fn new(
        config: &'a StaticVideoConfig,
        session: &'a SessionDescriptor,
        environment: &'a dyn DisplayEnvironment,
    ) -> Self {
        Self {
            config,
            session,
            environment,
            parser: &DEFAULT_PARSER,
        }
    }

    pub fn with_parser(mut self, parser: &'a dyn DisplayConfigParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn uses_virtual_display(&self) -> bool {
        self.session.virtual_display
            || matches!(
                self.config.virtual_display_mode,
                VirtualDisplayMode::PerClient | VirtualDisplayMode::Shared
            )
            || self.session.app.virtual_screen
    }

    /// Session layout override, else the configured default.
    pub fn effective_layout(&self) -> VirtualDisplayArrangement {
        self.session
            .virtual_display_layout
            .unwrap_or(self.config.virtual_display_layout)
    }

    /// Drive `builder` to a request. Returns false when nothing should be
    /// dispatched to the helper.
    pub fn configure(&self, builder: &mut ApplyRequestBuilder) -> bool {
        builder.set_session(self.session);

        let dispatch = if self.uses_virtual_display() {
            log::debug!("Using virtual display path for client '{}'", self.session.client_name);
            self.configure_virtual_display(builder)
        } else {
            log::debug!("Using standard display path for client '{}'", self.session.client_name);
            self.configure_standard(builder)
        };

        if !dispatch {
            return false;
        }

        if builder.configuration().is_some() {
            self.apply_monitor_position(builder);
        }

        true
    }

    fn configure_virtual_display(&self, builder: &mut ApplyRequestBuilder) -> bool {
        let mut configuration = match self.parser.parse(self.config, self.session) {
            ParsedConfiguration::Concrete(configuration) => configuration,
            ParsedConfiguration::Disabled | ParsedConfiguration::Failed => {
                log::warn!("Display configuration unavailable for virtual display session, skipping");
                builder.set_action(DisplayApplyAction::Skip);
                return false;
            }
        };

        let device_id = self
            .session
            .virtual_display_device_id()
            .map(str::to_string)
            .or_else(|| {
                self.environment
                    .resolve_any_virtual_display()
                    .filter(|id| !id.trim().is_empty())
            })
            .or_else(|| self.config.output_name().map(str::to_string))
            .unwrap_or_default();

        let layout = self.effective_layout();
        configuration.device_prep = layout.device_preparation();
        self.fill_from_session(&mut configuration, builder);
        configuration.device_id = device_id.clone();

        let overrides = builder.mutable_session_overrides();
        overrides.device_id = Some(device_id.clone()).filter(|id| !id.is_empty());
        overrides.virtual_display = Some(true);

        if device_id.is_empty() {
            log::warn!("No virtual display device id resolved yet");
            builder.set_device_blacklist(None);
        } else {
            *builder.mutable_topology() = Topology::single(&device_id);
            builder.set_device_blacklist(Some(device_id.clone()));
        }

        log::info!("Applying virtual display {} ({})", if device_id.is_empty() { "<pending>" } else { device_id.as_str() }, layout);
        builder
            .set_configuration(configuration)
            .set_virtual_display_watchdog(true)
            .set_virtual_display_arrangement(layout)
            .set_hdr_toggle_flag(self.config.hdr_toggle)
            .set_action(DisplayApplyAction::Apply);
        true
    }

    fn configure_standard(&self, builder: &mut ApplyRequestBuilder) -> bool {
        let desktop = self.targets_desktop();
        let dummy_plug = self.config.dummy_plug_hdr10 && !desktop;
        let force_refresh = self.needs_forced_refresh();

        match self.parser.parse(self.config, self.session) {
            ParsedConfiguration::Concrete(mut configuration) => {
                if let Some(device_id) = self.session.virtual_display_device_id() {
                    configuration.device_id = device_id.to_string();
                    configuration.device_prep = self.effective_layout().device_preparation();
                    builder.mutable_session_overrides().device_id = Some(device_id.to_string());
                }

                if dummy_plug {
                    configuration.refresh_rate = Some(DUMMY_PLUG_REFRESH);
                    configuration.hdr_state = Some(HdrState::Enabled);
                }

                if force_refresh {
                    log::debug!("Pinning refresh rate to {}", FORCED_REFRESH_CEILING);
                    configuration.refresh_rate = Some(FORCED_REFRESH_CEILING);
                    if configuration.resolution.is_none() {
                        configuration.resolution = self.session_resolution();
                    }
                }

                self.fill_from_session(&mut configuration, builder);
                builder.mutable_session_overrides().virtual_display = Some(self.session.virtual_display);

                log::info!("Applying display configuration to '{}'", configuration.device_id);
                builder
                    .set_configuration(configuration)
                    .set_device_blacklist(None)
                    .set_virtual_display_watchdog(false)
                    .set_hdr_toggle_flag(self.config.hdr_toggle)
                    .set_action(DisplayApplyAction::Apply);
                true
            }
            ParsedConfiguration::Disabled => {
                if dummy_plug {
                    let device_id = self
                        .session
                        .virtual_display_device_id()
                        .or_else(|| self.config.output_name())
                        .unwrap_or_default()
                        .to_string();

                    log::info!("Display configuration disabled, forcing dummy plug HDR mode");
                    builder.set_configuration(SingleDisplayConfiguration {
                        device_id,
                        device_prep: DevicePreparation::VerifyOnly,
                        resolution: None,
                        refresh_rate: Some(DUMMY_PLUG_REFRESH),
                        hdr_state: Some(HdrState::Enabled),
                    });
                    builder.set_action(DisplayApplyAction::Apply);
                } else {
                    log::info!("Display configuration disabled, reverting");
                    builder.clear_configuration().set_action(DisplayApplyAction::Revert);
                }

                builder
                    .set_device_blacklist(None)
                    .set_virtual_display_watchdog(false);
                true
            }
            ParsedConfiguration::Failed => {
                log::error!("Failed to parse display configuration, skipping");
                builder.set_action(DisplayApplyAction::Skip);
                false
            }
        }
    }

    /// Resolution and refresh are only filled when the parser left them unset.
    fn fill_from_session(&self, configuration: &mut SingleDisplayConfiguration, builder: &mut ApplyRequestBuilder) {
        let display_fps = self.session.display_fps();

        if configuration.resolution.is_none() {
            configuration.resolution = self.session_resolution();
        }
        if configuration.refresh_rate.is_none() && display_fps > 0 {
            configuration.refresh_rate = Some(RefreshRate::from_hz(display_fps));
        }

        let overrides = builder.mutable_session_overrides();
        overrides.width = Some(self.session.width).filter(|w| *w > 0);
        overrides.height = Some(self.session.height).filter(|h| *h > 0);
        overrides.fps = Some(display_fps).filter(|fps| *fps > 0);
        overrides.framegen_refresh_rate = self.session.framegen_refresh_rate.filter(|rate| *rate > 0);
    }

    fn session_resolution(&self) -> Option<Resolution> {
        if self.session.width > 0 && self.session.height > 0 {
            Some(Resolution::new(self.session.width, self.session.height))
        } else {
            None
        }
    }

    /// The app is the plain desktop: no app at all, or a registry entry with
    /// neither a command nor an external launcher.
    fn targets_desktop(&self) -> bool {
        match self.session.app.app_id.as_deref().filter(|id| !id.trim().is_empty()) {
            None => true,
            Some(app_id) => self
                .environment
                .lookup_running_app(app_id)
                .map_or(false, |entry| entry.is_desktop()),
        }
    }

    fn needs_forced_refresh(&self) -> bool {
        let framegen = self.session.framegen_fix_active();
        let uncapped = self.config.disable_vsync && !self.environment.frame_limiter_available();

        if !framegen && !uncapped {
            return false;
        }
        // Dummy plugs are stuck at 30 Hz for HDR; only frame generation may override that.
        if self.config.dummy_plug_hdr10 && !framegen {
            return false;
        }
        true
    }

    fn apply_monitor_position(&self, builder: &mut ApplyRequestBuilder) {
        let device_id = self
            .session
            .virtual_display_device_id()
            .or_else(|| self.config.output_name())
            .unwrap_or(PRIMARY_DEVICE_ID)
            .to_string();

        if builder.topology().is_empty() {
            *builder.mutable_topology() = Topology::single(&device_id);
        }

        let layout = self.effective_layout();
        // Only a virtual display owned by the session is moved off the desktop;
        // physical outputs keep their place even under an isolated layout.
        let targets_virtual = self.uses_virtual_display() || self.session.virtual_display_device_id().is_some();
        if targets_virtual && layout.is_isolated() {
            let target = builder
                .topology()
                .first_device()
                .unwrap_or(&device_id)
                .to_string();
            log::debug!("Isolating '{}' at {:?}", target, ISOLATED_DISPLAY_POSITION);
            builder
                .mutable_topology()
                .positions
                .insert(target, ISOLATED_DISPLAY_POSITION);
        }
    }
}

/// Build the request for a session, or `None` when nothing should be sent.
pub fn build_request_from_session(
    config: &StaticVideoConfig,
    session: &SessionDescriptor,
    environment: &dyn DisplayEnvironment,
) -> Option<DisplayApplyRequest> {
    let mut builder = ApplyRequestBuilder::new();
    if !SessionDisplayPolicy::new(config, session, environment).configure(&mut builder) {
        return None;
    }
    Some(builder.build())
}
