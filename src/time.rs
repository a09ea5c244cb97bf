//! Conversions between presentation seconds and a representation's integer
//! index timescale.
//!
//! All timeline arithmetic happens in whole ticks of the representation's
//! timescale. The `index_time_offset` maps presentation time (what playback
//! sees) onto media time (what the manifest and the segments themselves
//! declare); it is fixed per representation.

/// Convert presentation seconds into media time, rounding to the nearest
/// tick.
pub fn to_index_time(seconds: f64, timescale: u64, index_time_offset: i64) -> i64 {
    (seconds * timescale as f64).round() as i64 + index_time_offset
}

/// Convert presentation seconds into media time, rounding down.
///
/// Used where overestimating would make a not-yet-available segment look
/// requestable.
pub fn to_index_time_floor(seconds: f64, timescale: u64, index_time_offset: i64) -> i64 {
    (seconds * timescale as f64).floor() as i64 + index_time_offset
}

/// Convert media time back into presentation seconds.
pub fn from_index_time(ticks: i64, timescale: u64, index_time_offset: i64) -> f64 {
    (ticks - index_time_offset) as f64 / timescale as f64
}

/// Scale a duration in seconds to ticks, without any offset.
pub fn seconds_to_ticks(seconds: f64, timescale: u64) -> i64 {
    (seconds * timescale as f64).round() as i64
}

/// Scale a duration in ticks to seconds, without any offset.
pub fn ticks_to_seconds(ticks: i64, timescale: u64) -> f64 {
    ticks as f64 / timescale as f64
}
