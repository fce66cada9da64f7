use crate::display::{DevicePreparation, HdrState, RefreshRate, Resolution, SingleDisplayConfiguration};
use crate::session::SessionDescriptor;
use crate::video::{
    ConfigurationOption, HdrOption, RefreshRateOption, ResolutionOption, StaticVideoConfig,
};

/// Outcome of turning static config plus a session into a display configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedConfiguration {
    Concrete(SingleDisplayConfiguration),
    /// The operator turned display reconfiguration off.
    Disabled,
    /// The configuration could not be interpreted, e.g. a bad manual value.
    Failed,
}

pub trait DisplayConfigParser {
    fn parse(&self, config: &StaticVideoConfig, session: &SessionDescriptor) -> ParsedConfiguration;
}

/// Maps the `[video]` section onto a single-display configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticConfigParser;

impl DisplayConfigParser for StaticConfigParser {
    fn parse(&self, config: &StaticVideoConfig, session: &SessionDescriptor) -> ParsedConfiguration {
        let device_prep = match config.configuration_option {
            ConfigurationOption::Disabled => return ParsedConfiguration::Disabled,
            ConfigurationOption::VerifyOnly => DevicePreparation::VerifyOnly,
            ConfigurationOption::EnsureActive => DevicePreparation::EnsureActive,
            ConfigurationOption::EnsurePrimary => DevicePreparation::EnsurePrimary,
            ConfigurationOption::EnsureOnlyDisplay => DevicePreparation::EnsureOnlyDisplay,
        };

        let resolution = match config.resolution_option {
            ResolutionOption::Disabled => None,
            ResolutionOption::Automatic => {
                if session.width == 0 || session.height == 0 {
                    log::warn!("Session requested {}x{}, leaving resolution untouched", session.width, session.height);
                    None
                } else {
                    Some(Resolution::new(session.width, session.height))
                }
            }
            ResolutionOption::Manual => {
                match config.manual_resolution.as_deref().map(str::parse::<Resolution>) {
                    Some(Ok(resolution)) => Some(resolution),
                    Some(Err(e)) => {
                        log::error!("Failed to parse manual resolution: {}", e);
                        return ParsedConfiguration::Failed;
                    }
                    None => {
                        log::error!("resolution_option is manual but manual_resolution is not set");
                        return ParsedConfiguration::Failed;
                    }
                }
            }
        };

        let refresh_rate = match config.refresh_rate_option {
            RefreshRateOption::Disabled => None,
            RefreshRateOption::Automatic => {
                Some(session.display_fps()).filter(|fps| *fps > 0).map(RefreshRate::from_hz)
            }
            RefreshRateOption::Manual => {
                match config.manual_refresh_rate.as_deref().map(str::parse::<RefreshRate>) {
                    Some(Ok(rate)) => Some(rate),
                    Some(Err(e)) => {
                        log::error!("Failed to parse manual refresh rate: {}", e);
                        return ParsedConfiguration::Failed;
                    }
                    None => {
                        log::error!("refresh_rate_option is manual but manual_refresh_rate is not set");
                        return ParsedConfiguration::Failed;
                    }
                }
            }
        };

        let hdr_state = match config.hdr_option {
            HdrOption::Disabled => None,
            HdrOption::Automatic => Some(if session.enable_hdr {
                HdrState::Enabled
            } else {
                HdrState::Disabled
            }),
        };

        ParsedConfiguration::Concrete(SingleDisplayConfiguration {
            device_id: config.output_name().unwrap_or_default().to_string(),
            device_prep,
            resolution,
            refresh_rate,
            hdr_state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_config() -> StaticVideoConfig {
        StaticVideoConfig {
            configuration_option: ConfigurationOption::EnsureActive,
            output_name: "DISPLAY1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_option() {
        let config = StaticVideoConfig {
            configuration_option: ConfigurationOption::Disabled,
            ..Default::default()
        };
        let session = SessionDescriptor::new(1920, 1080, 60);
        assert_eq!(StaticConfigParser.parse(&config, &session), ParsedConfiguration::Disabled);
    }

    #[test]
    fn test_automatic_values_follow_session() {
        let mut session = SessionDescriptor::new(2560, 1440, 120);
        session.enable_hdr = true;

        let parsed = StaticConfigParser.parse(&enabled_config(), &session);
        let ParsedConfiguration::Concrete(configuration) = parsed else {
            panic!("expected a concrete configuration, got {:?}", parsed);
        };
        assert_eq!(configuration.device_id, "DISPLAY1");
        assert_eq!(configuration.device_prep, DevicePreparation::EnsureActive);
        assert_eq!(configuration.resolution, Some(Resolution::new(2560, 1440)));
        assert_eq!(configuration.refresh_rate, Some(RefreshRate::from_hz(120)));
        assert_eq!(configuration.hdr_state, Some(HdrState::Enabled));
    }

    #[test]
    fn test_manual_values() {
        let config = StaticVideoConfig {
            resolution_option: ResolutionOption::Manual,
            manual_resolution: Some("1280x720".to_string()),
            refresh_rate_option: RefreshRateOption::Manual,
            manual_refresh_rate: Some("59.94".to_string()),
            hdr_option: HdrOption::Disabled,
            ..enabled_config()
        };
        let session = SessionDescriptor::new(1920, 1080, 60);

        let parsed = StaticConfigParser.parse(&config, &session);
        let ParsedConfiguration::Concrete(configuration) = parsed else {
            panic!("expected a concrete configuration, got {:?}", parsed);
        };
        assert_eq!(configuration.resolution, Some(Resolution::new(1280, 720)));
        assert_eq!(configuration.refresh_rate, Some(RefreshRate(59.94)));
        assert_eq!(configuration.hdr_state, None);
    }

    #[test]
    fn test_bad_manual_value_fails() {
        let config = StaticVideoConfig {
            resolution_option: ResolutionOption::Manual,
            manual_resolution: Some("big".to_string()),
            ..enabled_config()
        };
        let session = SessionDescriptor::new(1920, 1080, 60);
        assert_eq!(StaticConfigParser.parse(&config, &session), ParsedConfiguration::Failed);

        let config = StaticVideoConfig {
            refresh_rate_option: RefreshRateOption::Manual,
            manual_refresh_rate: None,
            ..enabled_config()
        };
        assert_eq!(StaticConfigParser.parse(&config, &session), ParsedConfiguration::Failed);
    }

    #[test]
    fn test_zero_size_session_leaves_resolution_unset() {
        let session = SessionDescriptor::new(0, 0, 0);
        let parsed = StaticConfigParser.parse(&enabled_config(), &session);
        let ParsedConfiguration::Concrete(configuration) = parsed else {
            panic!("expected a concrete configuration, got {:?}", parsed);
        };
        assert_eq!(configuration.resolution, None);
        assert_eq!(configuration.refresh_rate, None);
    }
}
