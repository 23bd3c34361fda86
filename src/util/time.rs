//! Duration and rate formatting for logs and reports

use std::time::Duration;

/// Human-readable duration, picking the largest unit that keeps it short
///
/// ```
/// use std::time::Duration;
/// use asyncalgo::util::time::format_duration;
///
/// assert_eq!(format_duration(Duration::from_micros(420)), "420us");
/// assert_eq!(format_duration(Duration::from_millis(12)), "12.0ms");
/// assert_eq!(format_duration(Duration::from_millis(3250)), "3.25s");
/// assert_eq!(format_duration(Duration::from_secs(754)), "12m34s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match duration.as_micros() {
        0 => format!("{}ns", duration.as_nanos()),
        us @ 1..=999 => format!("{}us", us),
        us if us < 1_000_000 => format!("{:.1}ms", us as f64 / 1e3),
        _ if secs < 60 => format!("{:.2}s", duration.as_secs_f64()),
        _ if secs < 3600 => format!("{}m{:02}s", secs / 60, secs % 60),
        _ => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

/// Events per second over `duration`, 0 for an empty interval
pub fn calculate_rate(count: u64, duration: Duration) -> f64 {
    match duration.as_secs_f64() {
        secs if secs > 0.0 => count as f64 / secs,
        _ => 0.0,
    }
}

/// Rate with a K/M suffix once it gets large
pub fn format_rate(rate: f64) -> String {
    const SUFFIXES: [(f64, &str); 2] = [(1e6, "M"), (1e3, "K")];
    SUFFIXES
        .iter()
        .find(|(scale, _)| rate >= *scale)
        .map(|(scale, suffix)| format!("{:.1}{}", rate / scale, suffix))
        .unwrap_or_else(|| format!("{:.0}", rate))
}
