//! Shuttle CLI Library
//!
//! Operator surface for the orchestration daemon: run it in the foreground,
//! inspect its persisted state, and ask it to stop.

pub mod daemon_cmd;
pub mod status_cmd;

/// Render a duration in seconds as a short human string (`"1h 5m"`).
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86_400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_pick_two_units() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3_900), "1h 5m");
        assert_eq!(format_duration(90_000), "1d 1h");
    }
}
