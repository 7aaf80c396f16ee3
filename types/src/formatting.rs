//! Display helpers for statistics summaries.
//!
//! Used by the CLI when printing match and player tables.

/// Format a large count with K/M suffix for compact display.
///
/// # Examples
/// ```
/// use sitrep_types::formatting::format_compact;
/// assert_eq!(format_compact(500), "500");
/// assert_eq!(format_compact(1_500), "1.50K");
/// assert_eq!(format_compact(1_500_000), "1.50M");
/// ```
pub fn format_compact(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        format!("{}", n)
    }
}

/// Kill/death ratio with two decimals. Zero deaths reports the kill count.
///
/// # Examples
/// ```
/// use sitrep_types::formatting::format_kd_ratio;
/// assert_eq!(format_kd_ratio(10, 4), "2.50");
/// assert_eq!(format_kd_ratio(7, 0), "7.00");
/// assert_eq!(format_kd_ratio(0, 0), "0.00");
/// ```
pub fn format_kd_ratio(kills: u64, deaths: u64) -> String {
    let ratio = kills as f64 / deaths.max(1) as f64;
    format!("{:.2}", ratio)
}

/// Format a duration as `M:SS`, or `H:MM:SS` once it passes an hour.
///
/// # Examples
/// ```
/// use sitrep_types::formatting::format_duration;
/// assert_eq!(format_duration(125), "2:05");
/// assert_eq!(format_duration(3_725), "1:02:05");
/// ```
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    let hours = secs / 3_600;
    let mins = (secs % 3_600) / 60;
    let secs = secs % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_compact() {
        assert_eq!(format_compact(0), "0");
        assert_eq!(format_compact(999), "999");
        assert_eq!(format_compact(1_000), "1.00K");
        assert_eq!(format_compact(999_999), "1000.00K");
        assert_eq!(format_compact(1_000_000), "1.00M");
    }

    #[test]
    fn test_format_kd_ratio() {
        assert_eq!(format_kd_ratio(1, 3), "0.33");
        assert_eq!(format_kd_ratio(3, 1), "3.00");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(59), "0:59");
        assert_eq!(format_duration(60), "1:00");
        assert_eq!(format_duration(3_600), "1:00:00");
        assert_eq!(format_duration(-5), "0:00");
    }
}
