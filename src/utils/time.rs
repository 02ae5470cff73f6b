//! Timestamp formatting for output file names

use chrono::{DateTime, Utc};

/// Second-granularity layout used in segment and clip file names
pub const FILENAME_TIMESTAMP_FORMAT: &str = "%S-%M-%H-%d-%m-%y";

/// Format a capture timestamp for a file name (`SS-MM-HH-dd-mm-yy`)
pub fn format_filename_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(FILENAME_TIMESTAMP_FORMAT).to_string()
}

/// Format a duration in seconds as `MM:SS.mmm` or `HH:MM:SS.mmm`
pub fn format_seconds(seconds: f64) -> String {
    let hours = (seconds / 3600.0) as u32;
    let minutes = ((seconds % 3600.0) / 60.0) as u32;
    let secs = (seconds % 60.0) as u32;
    let milliseconds = ((seconds % 1.0) * 1000.0) as u32;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, milliseconds)
    } else {
        format!("{:02}:{:02}.{:03}", minutes, secs, milliseconds)
    }
}
