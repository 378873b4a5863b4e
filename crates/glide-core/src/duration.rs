//! Duration strings: "30s", "500ms", "5m", "1h", or a bare number of seconds.

use std::time::Duration;

/// Parse a duration string like "5s", "500ms", "2m", "1h".
///
/// A plain number is read as seconds, matching how pause durations
/// are written in Rollout manifests.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins = mins.parse::<u64>().ok()?;
        mins.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        let hours = hours.parse::<u64>().ok()?;
        hours.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Format whole seconds back into the shortest unit that divides evenly.
pub fn format_secs(secs: u64) -> String {
    if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn plain_number_is_seconds() {
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration(" 45 "), Some(Duration::from_secs(45)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("-5s"), None);
    }

    #[test]
    fn overflowing_units_are_rejected() {
        assert_eq!(parse_duration("5124095576030432h"), None);
        assert_eq!(parse_duration("307445734561825861m"), None);
    }

    #[test]
    fn formats_shortest_unit() {
        assert_eq!(format_secs(3600), "1h");
        assert_eq!(format_secs(300), "5m");
        assert_eq!(format_secs(45), "45s");
        assert_eq!(format_secs(0), "0s");
    }
}
