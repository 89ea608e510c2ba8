//! Human-readable durations in the settings file ("30s", "500ms", "10m").

use crate::error::{Error, Result};
use std::time::Duration;

/// Parse a duration string like "10s", "30s", "1m", "500ms", "1h".
///
/// A bare number means seconds. Returns `None` if the string cannot be
/// parsed.
///
/// # Examples
///
/// ```
/// use mission_control::config::parse_duration_string;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration_string("5s"), Some(Duration::from_secs(5)));
/// assert_eq!(parse_duration_string("500ms"), Some(Duration::from_millis(500)));
/// assert_eq!(parse_duration_string("10m"), Some(Duration::from_secs(600)));
/// assert_eq!(parse_duration_string("30"), Some(Duration::from_secs(30)));
/// ```
pub fn parse_duration_string(s: &str) -> Option<Duration> {
    let s = s.trim();

    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// [`parse_duration_string`] with a configuration error naming the field.
pub fn parse_setting(field: &str, value: &str) -> Result<Duration> {
    parse_duration_string(value).ok_or_else(|| {
        Error::Config(format!(
            "Invalid duration '{}' for {}. Use formats like '500ms', '30s', '10m'",
            value, field
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!(parse_duration_string("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration_string("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration_string("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(
            parse_duration_string("250ms"),
            Some(Duration::from_millis(250))
        );
        assert_eq!(parse_duration_string(" 45 "), Some(Duration::from_secs(45)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration_string(""), None);
        assert_eq!(parse_duration_string("s"), None);
        assert_eq!(parse_duration_string("soon"), None);
        assert_eq!(parse_duration_string("-5s"), None);
    }

    #[test]
    fn setting_error_names_the_field() {
        let err = parse_setting("docker.pull_timeout", "forever").unwrap_err();
        assert!(err.to_string().contains("docker.pull_timeout"));
    }
}
