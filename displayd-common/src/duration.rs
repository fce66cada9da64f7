use std::time::Duration;
use std::str::FromStr;

use crate::error::{DisplaydError, ValidationError};
use crate::Result;

/// Parse a human readable duration such as `2s` or `1m 30s`.
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    humantime::Duration::from_str(duration_str.trim())
        .map(|d| d.into())
        .map_err(|_| DisplaydError::Validation(ValidationError::InvalidDuration {
            duration: duration_str.to_string(),
        }))
}

pub fn format_duration(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration(" 1m 30s ").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert!(matches!(
            parse_duration("soon"),
            Err(DisplaydError::Validation(ValidationError::InvalidDuration { .. }))
        ));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
    }
}
