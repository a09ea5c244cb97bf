//! Timeline representation index.
//!
//! One instance per Representation per manifest version. Owns the segment
//! descriptor table, answers retrieval and availability queries, and
//! reconciles the table across manifest refreshes: a live refresh usually
//! carries only the tail of the full timeline, so the refreshed entries are
//! grafted onto the existing table instead of reparsing history that can
//! run to tens of thousands of entries.

use crate::bounds::ManifestBoundsCalculator;
use crate::error::{IndexError, RequestFailure, Result};
use crate::metrics;
use crate::options::IndexOptions;
use crate::template::{SegmentUrlTemplate, TemplateValues};
use crate::time::{from_index_time, seconds_to_ticks, ticks_to_seconds, to_index_time, to_index_time_floor};
use crate::timeline::availability::{self, LastRequestableSegment};
use crate::timeline::{
    ByteRange, DeferredTimeline, EdgeResolution, TimelineEntry, TimelineSource,
};
use dash_mpd::SegmentTemplate;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, warn};
use url::Url;

/// Per-Representation context supplied by the manifest layer.
#[derive(Debug, Clone, Default)]
pub struct RepresentationContext {
    /// The owning period's start, in presentation seconds.
    pub period_start: f64,
    /// The owning period's end, when known.
    pub period_end: Option<f64>,
    /// Whether the manifest describes live content.
    pub is_dynamic: bool,
    /// Whether the owning period is the manifest's last.
    pub is_last_period: bool,
    pub representation_id: String,
    pub bandwidth: Option<u64>,
    /// Base against which segment templates resolve.
    pub base_url: Option<Url>,
    /// `schemeIdUri` values of inband event streams the player accepts.
    pub accepted_inband_schemes: Vec<String>,
}

/// Raw per-Representation index description, as handed over by the
/// manifest parser.
#[derive(Debug)]
pub struct TimelineIndexArgs {
    pub timescale: Option<u64>,
    pub presentation_time_offset: Option<u64>,
    /// Media segment URL template.
    pub media: Option<String>,
    /// Initialization segment URL template.
    pub initialization: Option<String>,
    pub init_range: Option<ByteRange>,
    pub start_number: Option<u64>,
    pub end_number: Option<u64>,
    pub availability_time_offset: Option<f64>,
    pub availability_time_complete: Option<bool>,
    pub timeline: TimelineSource,
}

impl TimelineIndexArgs {
    /// Map a parsed `SegmentTemplate` node. Fails when the node lacks a
    /// SegmentTimeline; the timescale is checked at index construction.
    pub fn from_segment_template(template: &SegmentTemplate) -> Result<Self> {
        let timeline = template
            .SegmentTimeline
            .as_ref()
            .ok_or(IndexError::MissingTimeline)?;
        Ok(Self {
            timescale: template.timescale,
            presentation_time_offset: template.presentationTimeOffset,
            media: template.media.clone(),
            initialization: template.initialization.clone(),
            init_range: None,
            start_number: template.startNumber,
            end_number: None,
            availability_time_offset: template.availabilityTimeOffset,
            availability_time_complete: template.availabilityTimeComplete,
            timeline: TimelineSource::Elements(timeline.segments.clone()),
        })
    }
}

/// A concrete media segment, ready for the fetch layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaSegment {
    pub id: String,
    /// Filled template, possibly still relative.
    pub uri: Option<String>,
    /// Absolute URL, when a base was known.
    pub url: Option<Url>,
    /// Presentation start, in seconds, clipped to the period.
    pub time: f64,
    /// Presentation duration, in seconds, clipped to the period.
    pub duration: f64,
    pub number: Option<u64>,
    pub byte_range: Option<ByteRange>,
    /// Declared media time of the segment, in ticks.
    pub scaled_start: i64,
    /// Declared duration, in ticks, before any period clipping.
    pub scaled_duration: i64,
    /// `false` when the segment may still be growing at the live edge.
    pub is_complete: bool,
}

/// The initialization segment of a Representation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitSegment {
    pub uri: Option<String>,
    pub url: Option<Url>,
    pub byte_range: Option<ByteRange>,
}

/// Where a refreshed timeline grafts onto the existing table.
struct GraftPoint {
    /// Entries of the old table kept as-is.
    keep: usize,
    /// A leading part of a split run, kept ahead of the graft.
    trimmed: Option<TimelineEntry>,
}

/// Segment index for one Representation addressed by a SegmentTimeline.
#[derive(Debug)]
pub struct TimelineRepresentationIndex {
    timescale: u64,
    index_time_offset: i64,
    media_template: Option<SegmentUrlTemplate>,
    init_template: Option<SegmentUrlTemplate>,
    init_range: Option<ByteRange>,
    availability_time_offset: f64,
    availability_time_complete: bool,
    start_number: u64,
    end_number: Option<u64>,
    scaled_period_start: i64,
    scaled_period_end: Option<i64>,
    is_dynamic: bool,
    is_last_period: bool,
    representation_id: String,
    bandwidth: Option<u64>,
    base_url: Option<Url>,
    accepted_inband_schemes: Vec<String>,
    timeline: Option<Vec<TimelineEntry>>,
    deferred: Option<DeferredTimeline>,
    last_update: Instant,
    options: IndexOptions,
}

impl TimelineRepresentationIndex {
    pub fn new(args: TimelineIndexArgs, ctx: &RepresentationContext) -> Result<Self> {
        let timescale = args
            .timescale
            .filter(|timescale| *timescale > 0)
            .ok_or(IndexError::MissingTimescale)?;

        let presentation_time_offset =
            i64::try_from(args.presentation_time_offset.unwrap_or(0))
                .map_err(|_| IndexError::TimeOverflow("presentationTimeOffset".to_string()))?;
        let index_time_offset =
            presentation_time_offset - seconds_to_ticks(ctx.period_start, timescale);

        let scaled_period_start = to_index_time(ctx.period_start, timescale, index_time_offset);
        let scaled_period_end = ctx
            .period_end
            .map(|end| to_index_time(end, timescale, index_time_offset));

        Ok(Self {
            timescale,
            index_time_offset,
            media_template: args.media.map(SegmentUrlTemplate::new),
            init_template: args.initialization.map(SegmentUrlTemplate::new),
            init_range: args.init_range,
            availability_time_offset: args.availability_time_offset.unwrap_or(0.0),
            availability_time_complete: args.availability_time_complete.unwrap_or(true),
            start_number: args.start_number.unwrap_or(1),
            end_number: args.end_number,
            scaled_period_start,
            scaled_period_end,
            is_dynamic: ctx.is_dynamic,
            is_last_period: ctx.is_last_period,
            representation_id: ctx.representation_id.clone(),
            bandwidth: ctx.bandwidth,
            base_url: ctx.base_url.clone(),
            accepted_inband_schemes: ctx.accepted_inband_schemes.clone(),
            timeline: None,
            deferred: Some(DeferredTimeline::new(args.timeline)),
            last_update: Instant::now(),
            options: IndexOptions::default(),
        })
    }

    pub fn with_options(mut self, options: IndexOptions) -> Self {
        self.options = options;
        self
    }

    pub fn timescale(&self) -> u64 {
        self.timescale
    }

    pub fn index_time_offset(&self) -> i64 {
        self.index_time_offset
    }

    pub fn is_dynamic(&self) -> bool {
        self.is_dynamic
    }

    pub fn is_last_period(&self) -> bool {
        self.is_last_period
    }

    pub fn start_number(&self) -> u64 {
        self.start_number
    }

    /// When this structure was last built or refreshed.
    pub fn last_update(&self) -> Instant {
        self.last_update
    }

    pub fn is_materialized(&self) -> bool {
        self.timeline.is_some()
    }

    /// The current table snapshot; empty until first materialization.
    pub fn entries(&self) -> &[TimelineEntry] {
        self.timeline.as_deref().unwrap_or(&[])
    }

    pub fn is_inband_event_whitelisted(&self, scheme_id_uri: &str) -> bool {
        self.accepted_inband_schemes
            .iter()
            .any(|scheme| scheme == scheme_id_uri)
    }

    /// This index never needs an out-of-band partial update between
    /// manifest refreshes; the table is self-sufficient.
    pub fn should_refresh(&self) -> bool {
        false
    }

    pub fn init_segment(&self) -> Option<InitSegment> {
        if self.init_template.is_none() && self.init_range.is_none() {
            return None;
        }
        let values = TemplateValues {
            representation_id: &self.representation_id,
            bandwidth: self.bandwidth,
            number: None,
            time: None,
        };
        Some(InitSegment {
            uri: self
                .init_template
                .as_ref()
                .map(|template| template.fill(&values)),
            url: self
                .init_template
                .as_ref()
                .and_then(|template| template.resolve(&values, self.base_url.as_ref())),
            byte_range: self.init_range,
        })
    }

    /// All segments intersecting the wanted half-open range
    /// `[from, from + duration)`, in presentation seconds.
    pub fn get_segments(
        &mut self,
        from: f64,
        duration: f64,
        bounds: &ManifestBoundsCalculator,
    ) -> Result<Vec<MediaSegment>> {
        self.ensure_table(bounds)?;
        if self.options.prune_expired_entries {
            self.refresh_timeline(bounds);
        }

        let from = from.max(0.0);
        let duration = duration.max(0.0);
        let scaled_from = to_index_time(from, self.timescale, self.index_time_offset);
        let scaled_to = to_index_time(from + duration, self.timescale, self.index_time_offset);
        let live_edge = self.live_edge_scaled(bounds);

        let entries = self.timeline.as_deref().unwrap_or(&[]);
        let entry_count = entries.len();
        let mut out = Vec::new();
        let mut number = self.start_number;

        for (position, entry) in entries.iter().enumerate() {
            if entry.start >= scaled_to {
                break;
            }
            match entry.duration {
                Some(duration) if duration > 0 => {
                    let span_end = entry.start + duration * entry.segment_count() as i64;
                    if span_end <= scaled_from {
                        number += entry.segment_count();
                        continue;
                    }
                    let first = if scaled_from > entry.start {
                        ((scaled_from - entry.start) / duration) as u64
                    } else {
                        0
                    };
                    number += first;
                    for repeat in first..entry.segment_count() {
                        let scaled_start = entry.start + duration * repeat as i64;
                        if scaled_start >= scaled_to {
                            break;
                        }
                        if self.past_end_number(number) {
                            return Ok(out);
                        }
                        let is_final_declared =
                            position + 1 == entry_count && repeat == entry.repeat_count;
                        let is_complete = !(self.is_dynamic
                            && !self.availability_time_complete
                            && is_final_declared);
                        if let Some(segment) = self.make_segment(
                            scaled_start,
                            duration,
                            scaled_start + duration,
                            Some(number),
                            entry.range,
                            is_complete,
                        ) {
                            out.push(segment);
                        }
                        number += 1;
                    }
                }
                Some(_) => {
                    // Zero-duration runs carry no retrievable media.
                    number += entry.segment_count();
                }
                None => {
                    if !self.is_dynamic {
                        break;
                    }
                    let Some(edge) = live_edge else { break };
                    if edge <= entry.start || edge <= scaled_from {
                        break;
                    }
                    if self.past_end_number(number) {
                        return Ok(out);
                    }
                    // A segment with no declared duration is still growing.
                    if let Some(segment) = self.make_segment(
                        entry.start,
                        edge - entry.start,
                        edge,
                        Some(number),
                        entry.range,
                        false,
                    ) {
                        out.push(segment);
                    }
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Whether a previously returned segment is still retrievable.
    /// `None` while the table or the manifest bounds are not known yet.
    pub fn is_segment_still_available(
        &self,
        segment: &MediaSegment,
        bounds: &ManifestBoundsCalculator,
    ) -> Option<bool> {
        let entries = self.timeline.as_deref()?;
        availability::is_segment_still_available(segment, entries, bounds)
    }

    /// See [`availability::last_requestable_segment`].
    pub fn last_requestable_segment_info(
        &self,
        bounds: &ManifestBoundsCalculator,
    ) -> Option<LastRequestableSegment> {
        let entries = self.timeline.as_deref()?;
        availability::last_requestable_segment(
            entries,
            self.timescale,
            self.index_time_offset,
            self.availability_time_offset,
            bounds,
            self.scaled_period_end,
        )
    }

    /// Whether `time` (presentation seconds) falls in a gap between
    /// declared entries. Returns where playable content resumes.
    pub fn check_discontinuity(&self, time: f64) -> Option<f64> {
        let entries = self.timeline.as_deref()?;
        let scaled_time = to_index_time(time, self.timescale, self.index_time_offset);
        availability::check_discontinuity(entries, scaled_time)
            .map(|start| from_index_time(start, self.timescale, self.index_time_offset))
    }

    /// Classify a segment request failure as possibly caused by the client
    /// clock drifting against the server's availability window.
    pub fn can_be_out_of_sync_error(
        &self,
        failure: &RequestFailure,
        segment: &MediaSegment,
        bounds: &ManifestBoundsCalculator,
    ) -> bool {
        if !self.is_dynamic || failure.http_status != Some(404) {
            return false;
        }
        let Some(maximum) = bounds.maximum_position() else {
            return false;
        };
        segment.time + segment.duration >= maximum - self.options.out_of_sync_edge_tolerance
    }

    /// Earliest presentation position covered by the table.
    pub fn first_available_position(&self) -> Option<f64> {
        let entries = self.timeline.as_deref()?;
        let first = entries.first()?;
        let start = first.start.max(self.scaled_period_start);
        Some(from_index_time(
            start,
            self.timescale,
            self.index_time_offset,
        ))
    }

    /// Latest presentation position covered by the table. For a trailing
    /// unknown-duration entry this is the current live edge.
    pub fn last_available_position(
        &self,
        bounds: &ManifestBoundsCalculator,
    ) -> Option<f64> {
        let entries = self.timeline.as_deref()?;
        let last = entries.last()?;
        let mut end = match last.end() {
            Some(end) => end,
            None => self.live_edge_scaled(bounds)?.max(last.start),
        };
        if let Some(period_end) = self.scaled_period_end {
            end = end.min(period_end);
        }
        Some(from_index_time(end, self.timescale, self.index_time_offset))
    }

    /// Whether no further segments will ever be declared.
    pub fn is_finished(&self) -> bool {
        if !self.is_dynamic {
            return true;
        }
        let Some(period_end) = self.scaled_period_end else {
            return false;
        };
        match self.timeline.as_deref().and_then(|entries| {
            entries.last().and_then(TimelineEntry::end)
        }) {
            // One-tick tolerance against encoder rounding of the final run.
            Some(end) => end + 1 >= period_end,
            None => false,
        }
    }

    /// Unconditional swap against a freshly parsed index of the same
    /// Representation. Used on initial load and whenever structural
    /// assumptions changed enough that an incremental merge is unsafe.
    pub fn replace(&mut self, new_index: TimelineRepresentationIndex) {
        metrics::record_timeline_update("replace");
        let options = self.options.clone();
        *self = new_index;
        self.options = options;
        self.last_update = Instant::now();
    }

    /// Graft a freshly fetched (usually tail-only) timeline onto the
    /// existing table. Falls back to [`replace`](Self::replace) when no
    /// graft point exists, which is the recovery path for a manifest reset
    /// or a gap wider than one refresh cycle.
    pub fn update(
        &mut self,
        mut new_index: TimelineRepresentationIndex,
        bounds: &ManifestBoundsCalculator,
    ) -> Result<()> {
        if new_index.timescale != self.timescale
            || new_index.index_time_offset != self.index_time_offset
        {
            warn!(
                "Timescale or offset changed across refresh for {}, replacing index",
                self.representation_id
            );
            self.replace(new_index);
            return Ok(());
        }

        self.ensure_table(bounds)?;
        new_index.ensure_table(bounds)?;
        let new_entries = new_index.timeline.take().unwrap_or_default();
        if new_entries.is_empty() {
            debug!(
                "Refreshed timeline for {} is empty, keeping existing entries",
                self.representation_id
            );
            self.last_update = Instant::now();
            return Ok(());
        }

        let entries = self.timeline.get_or_insert_with(Vec::new);
        match graft_point(entries, &new_entries[0]) {
            Some(graft) => {
                entries.truncate(graft.keep);
                if let Some(trimmed) = graft.trimmed {
                    entries.push(trimmed);
                }
                entries.extend(new_entries);

                self.scaled_period_end = new_index.scaled_period_end;
                self.availability_time_offset = new_index.availability_time_offset;
                self.availability_time_complete = new_index.availability_time_complete;
                self.end_number = new_index.end_number;
                self.last_update = Instant::now();
                metrics::record_timeline_update("merge");
                debug!(
                    "Merged refreshed timeline for {} ({} entries kept)",
                    self.representation_id, graft.keep
                );
                Ok(())
            }
            None => {
                warn!(
                    "No overlap between refreshed and existing timeline for {}, replacing",
                    self.representation_id
                );
                metrics::record_timeline_update("merge_fallback");
                new_index.timeline = Some(new_entries);
                self.replace(new_index);
                Ok(())
            }
        }
    }

    /// Drop segments that have fully exited the timeshift window from the
    /// head of the table, bounding memory over long live sessions. Called
    /// opportunistically from queries, never on a timer.
    pub fn refresh_timeline(&mut self, bounds: &ManifestBoundsCalculator) {
        if !self.is_dynamic {
            return;
        }
        let Some(minimum) = bounds.minimum_position() else {
            return;
        };
        let scaled_minimum =
            to_index_time_floor(minimum, self.timescale, self.index_time_offset);
        let Some(entries) = self.timeline.as_mut() else {
            return;
        };

        let mut removed_segments: u64 = 0;
        let mut expired_entries = 0;
        for entry in entries.iter() {
            match entry.end() {
                Some(end) if end <= scaled_minimum => {
                    removed_segments += entry.segment_count();
                    expired_entries += 1;
                }
                _ => break,
            }
        }
        if expired_entries > 0 {
            entries.drain(..expired_entries);
        }

        // A partially expired leading run advances past its dead segments.
        if let Some(first) = entries.first_mut() {
            if let Some(duration) = first.duration {
                if duration > 0 && first.start < scaled_minimum {
                    let expired = ((scaled_minimum - first.start) / duration) as u64;
                    if expired > 0 {
                        first.start += duration * expired as i64;
                        first.repeat_count -= expired;
                        removed_segments += expired;
                    }
                }
            }
        }

        if removed_segments > 0 {
            // Numbering is anchored to the table head; keep it stable.
            self.start_number += removed_segments;
            metrics::record_pruned_segments(removed_segments);
            debug!(
                "Pruned {} segments out of the timeshift window for {}",
                removed_segments, self.representation_id
            );
        }
    }

    fn ensure_table(&mut self, bounds: &ManifestBoundsCalculator) -> Result<()> {
        if self.timeline.is_some() {
            return Ok(());
        }
        let edges = EdgeResolution {
            scaled_period_end: self.scaled_period_end,
            scaled_live_edge: self.live_edge_scaled(bounds),
        };
        let entries = match self.deferred.as_mut() {
            Some(deferred) => deferred.materialize(self.is_dynamic, edges)?,
            None => Vec::new(),
        };
        self.deferred = None;
        metrics::record_materialized_entries(entries.len() as u64);
        self.timeline = Some(entries);
        Ok(())
    }

    fn live_edge_scaled(&self, bounds: &ManifestBoundsCalculator) -> Option<i64> {
        bounds
            .maximum_position()
            .map(|maximum| to_index_time_floor(maximum, self.timescale, self.index_time_offset))
    }

    fn past_end_number(&self, number: u64) -> bool {
        self.end_number.is_some_and(|end| number > end)
    }

    /// Build one concrete segment, clipped to the period bounds. Returns
    /// `None` when the clip leaves nothing visible.
    fn make_segment(
        &self,
        scaled_start: i64,
        scaled_duration: i64,
        declared_end: i64,
        number: Option<u64>,
        byte_range: Option<ByteRange>,
        is_complete: bool,
    ) -> Option<MediaSegment> {
        let visible_start = scaled_start.max(self.scaled_period_start);
        let mut visible_end = declared_end;
        if let Some(period_end) = self.scaled_period_end {
            visible_end = visible_end.min(period_end);
        }
        if visible_end <= visible_start {
            return None;
        }

        let values = TemplateValues {
            representation_id: &self.representation_id,
            bandwidth: self.bandwidth,
            number,
            time: Some(scaled_start),
        };

        Some(MediaSegment {
            id: format!("{}_{}", self.representation_id, scaled_start),
            uri: self
                .media_template
                .as_ref()
                .map(|template| template.fill(&values)),
            url: self
                .media_template
                .as_ref()
                .and_then(|template| template.resolve(&values, self.base_url.as_ref())),
            time: from_index_time(visible_start, self.timescale, self.index_time_offset),
            duration: ticks_to_seconds(visible_end - visible_start, self.timescale),
            number,
            byte_range,
            scaled_start,
            scaled_duration,
            is_complete,
        })
    }
}

/// Locate where a refreshed timeline overlaps the existing one.
///
/// The refreshed head must either share a run start with the old table
/// (with agreeing durations, or refining an unknown-duration tail), or
/// land on a sub-segment boundary inside or immediately after an old run.
/// Anything else means the tables have desynchronized.
fn graft_point(entries: &[TimelineEntry], first_new: &TimelineEntry) -> Option<GraftPoint> {
    for position in (0..entries.len()).rev() {
        let entry = entries[position];

        if entry.start == first_new.start {
            return match (entry.duration, first_new.duration) {
                (None, _) => Some(GraftPoint {
                    keep: position,
                    trimmed: None,
                }),
                (Some(old), Some(new)) if old == new => Some(GraftPoint {
                    keep: position,
                    trimmed: None,
                }),
                _ => None,
            };
        }

        if entry.start < first_new.start {
            let duration = entry.duration.filter(|duration| *duration > 0)?;
            let offset = first_new.start - entry.start;
            if offset % duration != 0 {
                return None;
            }
            let boundary = (offset / duration) as u64;
            if boundary < entry.segment_count() {
                return Some(GraftPoint {
                    keep: position,
                    trimmed: Some(TimelineEntry {
                        start: entry.start,
                        duration: Some(duration),
                        repeat_count: boundary - 1,
                        range: entry.range,
                    }),
                });
            }
            if boundary == entry.segment_count() {
                return Some(GraftPoint {
                    keep: position + 1,
                    trimmed: None,
                });
            }
            return None;
        }
    }
    None
}
