//! Projection of a remotely reported position to "now".

/// Project `current_time` (seconds) forward by the time elapsed since the
/// sender stamped it. A paused position does not drift, and a missing or
/// non-finite timestamp leaves the value untouched.
#[must_use]
pub fn compensate(current_time: f64, is_playing: bool, event_timestamp: Option<f64>) -> f64 {
    compensate_at(
        chrono::Utc::now().timestamp_millis(),
        current_time,
        is_playing,
        event_timestamp,
    )
}

/// [`compensate`] against an explicit `now_ms`
#[must_use]
pub fn compensate_at(
    now_ms: i64,
    current_time: f64,
    is_playing: bool,
    event_timestamp: Option<f64>,
) -> f64 {
    if !is_playing {
        return current_time;
    }
    match event_timestamp {
        Some(sent_at) if sent_at.is_finite() => {
            #[allow(clippy::cast_precision_loss)]
            let elapsed_ms = (now_ms as f64 - sent_at).max(0.0);
            current_time + elapsed_ms / 1000.0
        }
        _ => current_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_playing_position_moves_forward() {
        let adjusted = compensate_at(NOW, 100.0, true, Some((NOW - 5_000) as f64));
        assert!((adjusted - 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_paused_position_is_unchanged() {
        assert_eq!(compensate_at(NOW, 100.0, false, Some((NOW - 5_000) as f64)), 100.0);
        assert_eq!(compensate_at(NOW, 100.0, false, None), 100.0);
    }

    #[test]
    fn test_missing_or_bad_timestamp_is_ignored() {
        assert_eq!(compensate_at(NOW, 42.0, true, None), 42.0);
        assert_eq!(compensate_at(NOW, 42.0, true, Some(f64::NAN)), 42.0);
        assert_eq!(compensate_at(NOW, 42.0, true, Some(f64::INFINITY)), 42.0);
    }

    #[test]
    fn test_future_timestamp_is_clamped() {
        assert_eq!(compensate_at(NOW, 42.0, true, Some((NOW + 3_000) as f64)), 42.0);
    }

    #[test]
    fn test_wall_clock_variant() {
        let sent = (chrono::Utc::now().timestamp_millis() - 5_000) as f64;
        let adjusted = compensate(10.0, true, Some(sent));
        assert!((adjusted - 15.0).abs() < 0.5);
    }
}
