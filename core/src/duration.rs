use std::time::Duration;

pub fn parse_duration(s: &str) -> Result<Duration, InvalidDuration> {
    use regex::Regex;

    let invalid = || InvalidDuration(s.trim().to_string());
    let re = Regex::new(r"^\s*(\d+)(ms|s|m|h)?\s*$").expect("duration regex");
    let cap = re.captures(s).ok_or_else(invalid)?;
    let magnitude: u64 = cap[1].parse().map_err(|_| invalid())?;
    let secs = |per: u64| magnitude.checked_mul(per).map(Duration::from_secs);
    match cap.get(2).map(|m| m.as_str()) {
        None if magnitude == 0 => Ok(Duration::ZERO),
        Some("ms") => Ok(Duration::from_millis(magnitude)),
        Some("s") => Ok(Duration::from_secs(magnitude)),
        Some("m") => secs(60).ok_or_else(invalid),
        Some("h") => secs(60 * 60).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Names the rejected input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidDuration(String);

impl std::fmt::Display for InvalidDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid duration {:?}; expected an integer with a unit of ms, s, m or h",
            self.0
        )
    }
}

impl std::error::Error for InvalidDuration {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        assert_eq!(parse_duration("0").unwrap(), Duration::from_secs(0));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration(" 10s ").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));

        assert!(parse_duration("10").is_err());
        assert!(parse_duration("1.5s").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn rejects_overflow() {
        assert_eq!(
            parse_duration("9999999999999999h").unwrap_err(),
            InvalidDuration("9999999999999999h".to_string())
        );
        assert!(parse_duration("9999999999999999999m").is_err());
        assert!(parse_duration("99999999999999999999s").is_err());
        assert_eq!(
            parse_duration(&format!("{}s", u64::MAX)).unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn error_names_input() {
        let msg = parse_duration(" soon ").unwrap_err().to_string();
        assert!(msg.contains("\"soon\""), "{}", msg);
    }
}
