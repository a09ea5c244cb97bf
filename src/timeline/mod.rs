//! Segment descriptor table.
//!
//! The canonical form of a representation's declared timeline: an ordered
//! run-length table where each entry stands for `repeat_count + 1`
//! contiguous equal-duration segments. The table is kept structurally
//! identical to the manifest's S elements (one entry per declared element,
//! no merging of adjacent runs) because refresh merges locate their graft
//! point by comparing exact `(start, duration, repeat)` shapes.

pub mod availability;
pub mod index;

use crate::error::{IndexError, Result};
use dash_mpd::S;
use serde::Serialize;
use std::fmt;

/// Inclusive byte range of a segment within its media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteRange {
    pub first: u64,
    pub last: u64,
}

/// One run of `repeat_count + 1` contiguous equal-duration segments.
///
/// `duration: None` marks a trailing entry whose duration is not yet
/// declared; it extends to the live edge and is refined by a later manifest
/// refresh. Such an entry is only legal at the end of the table, with a
/// repeat count of zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    /// Media time of the run's first segment, in index-timescale ticks.
    pub start: i64,
    /// Duration of each segment in the run, in ticks.
    pub duration: Option<i64>,
    /// Number of additional segments after the first.
    pub repeat_count: u64,
    /// Byte range shared by the run's segments, when addressed by range.
    pub range: Option<ByteRange>,
}

impl TimelineEntry {
    pub fn new(start: i64, duration: i64, repeat_count: u64) -> Self {
        Self {
            start,
            duration: Some(duration),
            repeat_count,
            range: None,
        }
    }

    /// Number of segments this entry expands to.
    pub fn segment_count(&self) -> u64 {
        self.repeat_count + 1
    }

    /// Media time one past the run's last segment; `None` while the
    /// duration is unknown.
    pub fn end(&self) -> Option<i64> {
        self.duration
            .map(|d| self.start + d * (self.repeat_count as i64 + 1))
    }
}

/// Known upper edges used to resolve open-ended repeat counts during
/// materialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeResolution {
    /// The owning period's end, in ticks of this index's timescale.
    pub scaled_period_end: Option<i64>,
    /// The current live edge, in the same ticks.
    pub scaled_live_edge: Option<i64>,
}

/// Where a not-yet-materialized timeline comes from.
pub enum TimelineSource {
    /// Entries already in canonical form.
    Entries(Vec<TimelineEntry>),
    /// Raw S elements as delivered by the manifest parser.
    Elements(Vec<S>),
    /// A one-shot producer, for parsers that defer S-element extraction.
    Producer(Box<dyn FnOnce() -> Vec<S> + Send>),
}

impl fmt::Debug for TimelineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entries(entries) => f.debug_tuple("Entries").field(&entries.len()).finish(),
            Self::Elements(elements) => f.debug_tuple("Elements").field(&elements.len()).finish(),
            Self::Producer(_) => f.write_str("Producer"),
        }
    }
}

/// A timeline that has not been converted to its canonical table yet.
///
/// Materialization is draining: the first call produces the full table and
/// releases the source; every later call yields an empty table. The
/// authoritative mutable copy lives in the owning index from then on, and
/// very long manifests never pay the parse cost for entries nobody queries.
#[derive(Debug)]
pub struct DeferredTimeline {
    source: Option<TimelineSource>,
}

impl DeferredTimeline {
    pub fn new(source: TimelineSource) -> Self {
        Self {
            source: Some(source),
        }
    }

    pub fn is_drained(&self) -> bool {
        self.source.is_none()
    }

    /// Produce the canonical table, once.
    pub fn materialize(
        &mut self,
        is_dynamic: bool,
        edges: EdgeResolution,
    ) -> Result<Vec<TimelineEntry>> {
        let Some(source) = self.source.take() else {
            return Ok(Vec::new());
        };
        let entries = match source {
            TimelineSource::Entries(entries) => entries,
            TimelineSource::Elements(elements) => {
                entries_from_elements(&elements, is_dynamic, edges)?
            }
            TimelineSource::Producer(producer) => {
                entries_from_elements(&producer(), is_dynamic, edges)?
            }
        };
        validate_entries(&entries)?;
        Ok(entries)
    }
}

/// Convert declared S elements into canonical entries, one entry per
/// element.
///
/// An absent `t` continues from the previous run's end (0 for the first
/// element, per the DASH data model). A negative `r` is an open-ended run:
/// it is resolved against the next element's start, or, on the final
/// element, against the period end (static) or live edge (dynamic).
pub(crate) fn entries_from_elements(
    elements: &[S],
    is_dynamic: bool,
    edges: EdgeResolution,
) -> Result<Vec<TimelineEntry>> {
    let mut entries = Vec::with_capacity(elements.len());
    let mut next_start: i64 = 0;

    for (position, element) in elements.iter().enumerate() {
        let start = match element.t {
            Some(t) => ticks(t)?,
            None => next_start,
        };
        let duration = ticks(element.d)?;

        let declared_repeat = element.r.unwrap_or(0);
        let repeat_count = if declared_repeat >= 0 {
            declared_repeat as u64
        } else {
            resolve_open_repeat(start, duration, elements.get(position + 1), is_dynamic, edges)?
        };

        entries.push(TimelineEntry {
            start,
            duration: Some(duration),
            repeat_count,
            range: None,
        });
        next_start = start + duration * (repeat_count as i64 + 1);
    }

    Ok(entries)
}

/// Resolve an `r="-1"` run to a concrete repeat count.
fn resolve_open_repeat(
    start: i64,
    duration: i64,
    next: Option<&S>,
    is_dynamic: bool,
    edges: EdgeResolution,
) -> Result<u64> {
    if duration <= 0 {
        return Err(IndexError::MalformedTimeline(format!(
            "open-ended run at t={start} with non-positive duration"
        )));
    }

    let until = match next {
        Some(next) => match next.t {
            Some(t) => ticks(t)?,
            None => {
                return Err(IndexError::MalformedTimeline(format!(
                    "open-ended run at t={start} followed by an untimed element"
                )));
            }
        },
        None => {
            let edge = if is_dynamic {
                edges.scaled_live_edge.or(edges.scaled_period_end)
            } else {
                edges.scaled_period_end
            };
            edge.ok_or_else(|| {
                IndexError::MalformedTimeline(format!(
                    "open-ended run at t={start} with no known period end or live edge"
                ))
            })?
        }
    };

    if until <= start {
        return Ok(0);
    }
    Ok((((until - start) / duration) - 1).max(0) as u64)
}

/// Check the table invariants: strictly ascending starts, no overlapping
/// spans, the unknown-duration sentinel only on a trailing single segment.
pub(crate) fn validate_entries(entries: &[TimelineEntry]) -> Result<()> {
    for (position, entry) in entries.iter().enumerate() {
        if entry.duration.is_some_and(|duration| duration < 0) {
            return Err(IndexError::MalformedTimeline(format!(
                "negative duration at t={}",
                entry.start
            )));
        }

        let is_last = position + 1 == entries.len();
        match entry.end() {
            Some(end) => {
                if let Some(next) = entries.get(position + 1) {
                    if next.start < end || next.start <= entry.start {
                        return Err(IndexError::MalformedTimeline(format!(
                            "entry at t={} overlaps the one at t={}",
                            next.start, entry.start
                        )));
                    }
                }
            }
            None => {
                if !is_last {
                    return Err(IndexError::MalformedTimeline(format!(
                        "unknown duration at t={} before the end of the timeline",
                        entry.start
                    )));
                }
                if entry.repeat_count != 0 {
                    return Err(IndexError::MalformedTimeline(format!(
                        "unknown duration at t={} cannot repeat",
                        entry.start
                    )));
                }
            }
        }
    }
    Ok(())
}

fn ticks(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| IndexError::TimeOverflow(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(t: Option<u64>, d: u64, r: Option<i64>) -> S {
        S {
            t,
            d,
            r,
            ..Default::default()
        }
    }

    #[test]
    fn entries_match_declared_elements_one_to_one() {
        let elements = vec![
            s(Some(0), 4, Some(2)),
            s(None, 4, None),
            s(Some(20), 2, Some(1)),
        ];
        let entries =
            entries_from_elements(&elements, false, EdgeResolution::default()).unwrap();

        assert_eq!(
            entries,
            vec![
                TimelineEntry::new(0, 4, 2),
                TimelineEntry::new(12, 4, 0),
                TimelineEntry::new(20, 2, 1),
            ]
        );
    }

    #[test]
    fn interior_open_repeat_fills_to_next_start() {
        let elements = vec![s(Some(0), 4, Some(-1)), s(Some(20), 4, Some(0))];
        let entries =
            entries_from_elements(&elements, false, EdgeResolution::default()).unwrap();

        // [0, 20) at 4 ticks each: 5 segments
        assert_eq!(entries[0].repeat_count, 4);
        assert_eq!(entries[0].end(), Some(20));
    }

    #[test]
    fn trailing_open_repeat_fills_to_period_end() {
        let elements = vec![s(Some(0), 4, Some(-1))];
        let edges = EdgeResolution {
            scaled_period_end: Some(22),
            scaled_live_edge: None,
        };
        let entries = entries_from_elements(&elements, false, edges).unwrap();

        // Only whole segments fit: [0,4) .. [16,20)
        assert_eq!(entries[0].repeat_count, 4);
    }

    #[test]
    fn trailing_open_repeat_prefers_live_edge_when_dynamic() {
        let elements = vec![s(Some(0), 4, Some(-1))];
        let edges = EdgeResolution {
            scaled_period_end: Some(1000),
            scaled_live_edge: Some(13),
        };
        let entries = entries_from_elements(&elements, true, edges).unwrap();
        assert_eq!(entries[0].repeat_count, 2);
    }

    #[test]
    fn trailing_open_repeat_without_edge_is_rejected() {
        let elements = vec![s(Some(0), 4, Some(-1))];
        let result = entries_from_elements(&elements, true, EdgeResolution::default());
        assert!(matches!(result, Err(IndexError::MalformedTimeline(_))));
    }

    #[test]
    fn materialization_drains_after_first_call() {
        let mut deferred = DeferredTimeline::new(TimelineSource::Elements(vec![s(
            Some(0),
            4,
            Some(2),
        )]));

        let first = deferred
            .materialize(false, EdgeResolution::default())
            .unwrap();
        assert_eq!(first.len(), 1);
        assert!(deferred.is_drained());

        let second = deferred
            .materialize(false, EdgeResolution::default())
            .unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn producer_source_runs_once() {
        let mut deferred = DeferredTimeline::new(TimelineSource::Producer(Box::new(|| {
            vec![s(Some(0), 2, Some(0)), s(Some(2), 2, Some(0))]
        })));

        let first = deferred
            .materialize(false, EdgeResolution::default())
            .unwrap();
        assert_eq!(first.len(), 2);
        assert!(deferred
            .materialize(false, EdgeResolution::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn overlapping_entries_are_rejected() {
        let entries = vec![TimelineEntry::new(0, 4, 2), TimelineEntry::new(8, 4, 0)];
        assert!(matches!(
            validate_entries(&entries),
            Err(IndexError::MalformedTimeline(_))
        ));
    }

    #[test]
    fn gap_between_entries_is_legal() {
        let entries = vec![TimelineEntry::new(0, 4, 0), TimelineEntry::new(10, 4, 0)];
        assert!(validate_entries(&entries).is_ok());
    }

    #[test]
    fn unknown_duration_only_legal_at_the_tail() {
        let trailing = vec![
            TimelineEntry::new(0, 4, 0),
            TimelineEntry {
                start: 4,
                duration: None,
                repeat_count: 0,
                range: None,
            },
        ];
        assert!(validate_entries(&trailing).is_ok());

        let interior = vec![
            TimelineEntry {
                start: 0,
                duration: None,
                repeat_count: 0,
                range: None,
            },
            TimelineEntry::new(4, 4, 0),
        ];
        assert!(matches!(
            validate_entries(&interior),
            Err(IndexError::MalformedTimeline(_))
        ));
    }

    #[test]
    fn entry_span_arithmetic() {
        let entry = TimelineEntry::new(8, 4, 2);
        assert_eq!(entry.segment_count(), 3);
        assert_eq!(entry.end(), Some(20));
    }
}
