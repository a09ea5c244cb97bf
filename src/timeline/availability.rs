//! Stateless availability and discontinuity queries.
//!
//! Every function here operates on a table snapshot plus bounds
//! information and holds no state of its own. Live manifests routinely
//! declare a run whose final member has not finished encoding; separating
//! "declared" from "requestable" keeps the fetch layer from requesting
//! such a segment and getting a partial body or a 404 back.

use crate::bounds::ManifestBoundsCalculator;
use crate::time::to_index_time_floor;
use crate::timeline::TimelineEntry;
use crate::timeline::index::MediaSegment;

/// The last segment that is currently safe to request on a dynamic
/// representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastRequestableSegment {
    /// Index of the run in the descriptor table.
    pub entry_index: usize,
    /// Position within the run, `0..=repeat_count`.
    pub repeat_index: u64,
    /// Media time of that segment's start, in ticks.
    pub scaled_start: i64,
    /// `true` when this is genuinely the final declared segment, `false`
    /// when more segments are declared but not requestable yet.
    pub is_last_of_timeline: bool,
}

/// Find the last segment whose nominal end, reduced by
/// `availability_time_offset`, has already passed the bounds calculator's
/// maximum position, and which does not extend past a known period end.
///
/// Returns `None` when the table is empty, the bounds are unknown, or
/// nothing qualifies yet.
pub fn last_requestable_segment(
    entries: &[TimelineEntry],
    timescale: u64,
    index_time_offset: i64,
    availability_time_offset: f64,
    bounds: &ManifestBoundsCalculator,
    scaled_period_end: Option<i64>,
) -> Option<LastRequestableSegment> {
    let maximum = bounds.maximum_position()?;
    let mut limit = to_index_time_floor(
        maximum + availability_time_offset,
        timescale,
        index_time_offset,
    );
    if let Some(period_end) = scaled_period_end {
        limit = limit.min(period_end);
    }

    for (entry_index, entry) in entries.iter().enumerate().rev() {
        let Some(duration) = entry.duration else {
            // An unknown-duration tail is by definition incomplete.
            continue;
        };
        if duration <= 0 {
            continue;
        }
        if entry.start + duration > limit {
            continue;
        }
        let complete = (((limit - entry.start) / duration) as u64).min(entry.segment_count());
        let repeat_index = complete - 1;
        let is_last_of_timeline =
            entry_index + 1 == entries.len() && complete == entry.segment_count();
        return Some(LastRequestableSegment {
            entry_index,
            repeat_index,
            scaled_start: entry.start + duration * repeat_index as i64,
            is_last_of_timeline,
        });
    }
    None
}

/// Whether a previously returned segment is still inside the availability
/// window and still declared by the (possibly refreshed) table.
///
/// Compares by timing only; URLs are not unique across representations
/// while timing is. Returns `None` while the bounds are not yet known.
pub fn is_segment_still_available(
    segment: &MediaSegment,
    entries: &[TimelineEntry],
    bounds: &ManifestBoundsCalculator,
) -> Option<bool> {
    let minimum = bounds.minimum_position()?;
    let maximum = bounds.maximum_position()?;

    let end = segment.time + segment.duration;
    if end < minimum || end > maximum {
        return Some(false);
    }

    Some(is_declared(segment, entries))
}

fn is_declared(segment: &MediaSegment, entries: &[TimelineEntry]) -> bool {
    for entry in entries {
        if entry.start > segment.scaled_start {
            return false;
        }
        match entry.duration {
            Some(duration) if duration > 0 => {
                let offset = segment.scaled_start - entry.start;
                if offset % duration == 0
                    && (offset / duration) as u64 <= entry.repeat_count
                    && duration == segment.scaled_duration
                {
                    return true;
                }
            }
            Some(_) => {}
            // The trailing sentinel declares a single segment at its start.
            None => return segment.scaled_start == entry.start,
        }
    }
    false
}

/// Whether `scaled_time` falls in a gap between two declared entries.
///
/// Returns the next entry's start when the given time is at or past the
/// current entry's end (within a one-tick tolerance, since declared
/// integer boundaries can be off by one tick from encoder rounding) and
/// the next entry starts strictly later. `None` when the time is covered,
/// or when the timeline simply ends.
pub fn check_discontinuity(entries: &[TimelineEntry], scaled_time: i64) -> Option<i64> {
    let mut current = None;
    for (position, entry) in entries.iter().enumerate() {
        if entry.start > scaled_time {
            break;
        }
        current = Some(position);
    }

    let position = current?;
    let end = entries[position].end()?;
    let next = entries.get(position + 1)?;

    if next.start > end && scaled_time >= end - 1 {
        Some(next.start)
    } else {
        None
    }
}
