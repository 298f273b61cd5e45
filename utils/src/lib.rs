use std::time::Duration;

use thiserror::Error;

pub mod logging;
pub mod test_utils;

#[derive(Clone, Debug, Error)]
#[error("invalid duration {0:?}, expected a number with an optional ms/s/m/h/d suffix")]
pub struct ParseDurationError(String);

/// Parse a human-friendly duration like `500ms`, `20s`, `3m`, `1h` or `1d`.
///
/// A bare number is interpreted as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ParseDurationError> {
    let s = s.trim();
    let unit_start = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(unit_start);
    let value: f64 = number
        .parse()
        .map_err(|_| ParseDurationError(s.to_string()))?;
    let secs = match unit.trim() {
        "" | "s" => value,
        "ms" => value / 1000.0,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        "d" => value * 86400.0,
        _ => return Err(ParseDurationError(s.to_string())),
    };
    if !secs.is_finite() || secs < 0.0 {
        return Err(ParseDurationError(s.to_string()));
    }
    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("20s").unwrap(), Duration::from_secs(20));
        assert_eq!(parse_duration("3m").unwrap(), Duration::from_secs(180));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration(" 15s ").unwrap(), Duration::from_secs(15));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10y").is_err());
        assert!(parse_duration("").is_err());
    }
}
