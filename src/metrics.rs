//! Engine counters, recorded through the `metrics` facade.
//!
//! The hosting process decides whether and where these are exported; with
//! no recorder installed every call is a no-op.

/// Record a timeline refresh outcome.
///
/// `kind` is one of `"merge"`, `"replace"`, or `"merge_fallback"` (a merge
/// that found no graft point and degraded to a full replace).
pub fn record_timeline_update(kind: &'static str) {
    ::metrics::counter!("tidemark_timeline_updates_total", "kind" => kind).increment(1);
}

/// Record segments pruned out of the timeshift window.
pub fn record_pruned_segments(count: u64) {
    if count > 0 {
        ::metrics::counter!("tidemark_pruned_segments_total").increment(count);
    }
}

/// Record entries produced by a one-shot timeline materialization.
pub fn record_materialized_entries(count: u64) {
    ::metrics::counter!("tidemark_materialized_entries_total").increment(count);
}
