//! Gap Formatting
//!
//! Human-readable time differences for the leaderboard.

/// Differences below this many seconds are shown as a dead heat.
pub const DEAD_HEAT_SECS: f64 = 0.01;

/// Progress units per second when timing data is missing.
pub const NODES_PER_SECOND: f64 = 10.0;

/// Format a positive time difference in seconds.
///
/// `+S.SSS` below a minute, `+M:SS.SSS` from a minute up, `+0.000` for
/// anything under 10 ms (negative differences included).
pub fn format_gap_secs(diff: f64) -> String {
    if diff < DEAD_HEAT_SECS {
        return "+0.000".to_string();
    }
    if diff < 60.0 {
        return format!("+{:.3}", diff);
    }

    let mins = (diff / 60.0).floor() as u64;
    let secs = diff % 60.0;
    format!("+{}:{:06.3}", mins, secs)
}

/// Format the difference between two millisecond times (`behind - ahead`).
pub fn format_gap_ms(behind_ms: u64, ahead_ms: u64) -> String {
    format_gap_secs((behind_ms as f64 - ahead_ms as f64) / 1000.0)
}

/// Estimate a gap from track-progress nodes when no times are known.
///
/// Returns `None` when the entity is not actually behind.
pub fn approximate_gap_from_nodes(ahead_node: u16, behind_node: u16) -> Option<String> {
    let node_diff = i32::from(ahead_node) - i32::from(behind_node);
    if node_diff <= 0 {
        return None;
    }
    Some(format_gap_secs(f64::from(node_diff) / NODES_PER_SECOND))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reference_values() {
        assert_eq!(format_gap_secs(0.3004), "+0.300");
        assert_eq!(format_gap_secs(75.4), "+1:15.400");
        assert_eq!(format_gap_secs(0.009), "+0.000");
        assert_eq!(format_gap_secs(-2.0), "+0.000");
        assert_eq!(format_gap_secs(1.5), "+1.500");
        assert_eq!(format_gap_secs(60.0), "+1:00.000");
        assert_eq!(format_gap_secs(125.05), "+2:05.050");
    }

    #[test]
    fn test_gap_from_millis() {
        assert_eq!(format_gap_ms(91_500, 90_000), "+1.500");
        assert_eq!(format_gap_ms(90_000, 90_000), "+0.000");
    }

    #[test]
    fn test_node_approximation() {
        assert_eq!(approximate_gap_from_nodes(120, 100).as_deref(), Some("+2.000"));
        assert_eq!(approximate_gap_from_nodes(100, 100), None);
        assert_eq!(approximate_gap_from_nodes(90, 100), None);
        assert_eq!(approximate_gap_from_nodes(900, 100).as_deref(), Some("+1:20.000"));
    }

    proptest! {
        #[test]
        fn prop_short_gaps_have_seconds_form(ms in 10u64..59_000) {
            let s = format_gap_ms(ms, 0);
            prop_assert!(s.starts_with('+'));
            prop_assert!(!s.contains(':'));
        }

        #[test]
        fn prop_long_gaps_have_minutes_form(ms in 60_000u64..3_600_000) {
            let s = format_gap_ms(ms, 0);
            prop_assert!(s.contains(':'));
            let secs = s.split(':').nth(1).unwrap();
            prop_assert_eq!(secs.len(), 6);
        }

        #[test]
        fn prop_dead_heat(ms in 0u64..10) {
            prop_assert_eq!(format_gap_ms(ms, 0), "+0.000");
        }
    }
}
