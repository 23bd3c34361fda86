//! CLI to Config conversion utilities

use anyhow::{Context, Result};
use std::time::Duration;

/// Parse a duration string (e.g., "500ms", "60s", "5m", "1h")
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    let (num_str, millis_per_unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, 1u64)
    } else if let Some(num) = s.strip_suffix("sec").or_else(|| s.strip_suffix('s')) {
        (num, 1_000)
    } else if let Some(num) = s.strip_suffix("min").or_else(|| s.strip_suffix('m')) {
        (num, 60_000)
    } else if let Some(num) = s.strip_suffix("hr").or_else(|| s.strip_suffix('h')) {
        (num, 3_600_000)
    } else {
        (s.as_str(), 1_000)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration format: {}", s))?;

    let millis = num
        .checked_mul(millis_per_unit)
        .with_context(|| format!("Duration out of range: {}", s))?;
    Ok(Duration::from_millis(millis))
}

/// Inverse of [`parse_duration`] for whole units
pub fn format_duration_str(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1_000 != 0 {
        format!("{}ms", millis)
    } else if millis % 3_600_000 == 0 && millis > 0 {
        format!("{}h", millis / 3_600_000)
    } else if millis % 60_000 == 0 && millis > 0 {
        format!("{}m", millis / 60_000)
    } else {
        format!("{}s", millis / 1_000)
    }
}

/// Split a comma-separated host list, appending `default_port` where missing
pub fn parse_host_list(list: &str, default_port: u16) -> Result<Vec<String>> {
    let hosts: Vec<String> = list
        .split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(|host| {
            if host.contains(':') {
                host.to_string()
            } else {
                format!("{}:{}", host, default_port)
            }
        })
        .collect();

    if hosts.is_empty() {
        anyhow::bail!("Host list is empty");
    }

    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_millis() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("0ms").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_seconds() {
        assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("60sec").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("60").unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_duration_minutes() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("5min").unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn test_parse_duration_hours() {
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("2hr").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("1.5s").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_format_duration_str() {
        assert_eq!(format_duration_str(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration_str(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration_str(Duration::from_secs(300)), "5m");
        assert_eq!(format_duration_str(Duration::from_secs(7200)), "2h");
        assert_eq!(format_duration_str(Duration::ZERO), "0s");
        assert_eq!(parse_duration(&format_duration_str(Duration::from_millis(1500))).unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn test_parse_host_list() {
        let hosts = parse_host_list("10.0.1.10:9000, 10.0.1.11", 9999).unwrap();
        assert_eq!(hosts, vec!["10.0.1.10:9000", "10.0.1.11:9999"]);
        assert!(parse_host_list(" , ", 9999).is_err());
    }
}
