use std::time::Duration;

use crate::net::{is_duration, DURATION_PATTERN};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("'{0}' does not match duration pattern {DURATION_PATTERN}")]
pub struct DurationParseError(String);

/// Converts a spec-level duration string (`"30s"`, `"5m"`, `"1h"`) into a
/// canonical `Duration`. Per §9 ("Duration parsing"), conversion to seconds
/// happens here, once, before any value is embedded into an engine config —
/// no locale-dependent parsing anywhere downstream.
pub fn parse_duration(s: &str) -> Result<Duration, DurationParseError> {
    if !is_duration(s) {
        return Err(DurationParseError(s.to_owned()));
    }
    let (digits, unit) = s.split_at(s.len() - 1);
    let n: u64 = digits.parse().map_err(|_| DurationParseError(s.to_owned()))?;
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        _ => return Err(DurationParseError(s.to_owned())),
    };
    Ok(Duration::from_secs(secs))
}

/// Renders a `Duration` back into a canonical seconds-suffixed string, the
/// shape the DHCP and DNS engine configs expect.
pub fn render_seconds(d: Duration) -> String {
    format!("{}s", d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn rejects_malformed_durations() {
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("s30").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn render_seconds_roundtrips_canonical_form() {
        assert_eq!(render_seconds(Duration::from_secs(60)), "60s");
    }
}
