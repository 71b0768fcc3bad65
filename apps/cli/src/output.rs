//! Output formatting utilities

use crate::OutputFormat;
use serde::Serialize;

/// Print a value as pretty JSON, or through `human` otherwise
pub fn print_output<T: Serialize>(
    value: &T,
    format: OutputFormat,
    human: impl FnOnce(&T),
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Human | OutputFormat::Table => human(value),
    }
    Ok(())
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// Format speed as human-readable
pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{}/s", human_bytes::human_bytes(bytes_per_sec as f64))
}

/// Format a byte cap, where 0 means no cap
pub fn format_limit(bytes_per_sec: u64) -> String {
    if bytes_per_sec == 0 {
        "Unlimited".to_string()
    } else {
        format_speed(bytes_per_sec)
    }
}

/// Format remaining time as human-readable
pub fn format_eta(seconds: Option<u64>) -> String {
    let Some(seconds) = seconds else {
        return "-".to_string();
    };

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Format a duration given in milliseconds
pub fn format_elapsed(ms: u64) -> String {
    format_eta(Some(ms / 1000))
}
