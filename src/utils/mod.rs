pub mod dependency_check;
pub mod paths;
pub mod progress;
pub mod update;

/// Rough human wording for a duration in seconds.
pub fn format_duration(seconds: u64) -> String {
    match seconds {
        s if s < 60 => format!("{} seconds", s),
        s if s < 3600 => format!("{:.1} minutes", s as f64 / 60.0),
        s => format!("{:.1} hours", s as f64 / 3600.0),
    }
}
