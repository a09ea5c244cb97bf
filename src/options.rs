//! Engine tuning options.

/// Default distance from the estimated live edge, in seconds, within which
/// a 404 on a dynamic representation is treated as possible clock drift
/// rather than a genuine content error. Roughly one manifest refresh cycle.
pub const DEFAULT_OUT_OF_SYNC_EDGE_TOLERANCE: f64 = 3.0;

/// Tuning knobs for a [`TimelineRepresentationIndex`].
///
/// [`TimelineRepresentationIndex`]: crate::TimelineRepresentationIndex
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Segments whose end falls within this many seconds of the live edge
    /// qualify for out-of-sync classification on a 404.
    pub out_of_sync_edge_tolerance: f64,
    /// Prune entries that have fully exited the timeshift window during
    /// queries. Disable to keep the full declared history in memory.
    pub prune_expired_entries: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            out_of_sync_edge_tolerance: DEFAULT_OUT_OF_SYNC_EDGE_TOLERANCE,
            prune_expired_entries: true,
        }
    }
}
