//! Error taxonomy for the segment index engine.
//!
//! Construction errors are the only hard failures: an index built from
//! incomplete timing data would corrupt every downstream availability
//! decision, so required fields are validated up front and never defaulted.
//! Indeterminate query outcomes are expressed as `Option`/`None` by the
//! query APIs themselves and never surface here.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors raised while building or merging a representation index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The SegmentTemplate carried no usable timescale.
    #[error("SegmentTemplate has no timescale")]
    MissingTimescale,

    /// The SegmentTemplate carried no SegmentTimeline element.
    #[error("SegmentTemplate has no SegmentTimeline")]
    MissingTimeline,

    /// The declared timeline violates ordering or run-length invariants.
    #[error("Malformed timeline: {0}")]
    MalformedTimeline(String),

    /// A declared timing value does not fit the index arithmetic domain.
    #[error("Timeline value out of range: {0}")]
    TimeOverflow(String),
}

/// Minimal description of a failed segment request, as reported by the
/// fetch layer. The engine only classifies it (see
/// [`TimelineRepresentationIndex::can_be_out_of_sync_error`]); recovery
/// stays with the caller.
///
/// [`TimelineRepresentationIndex::can_be_out_of_sync_error`]:
/// crate::TimelineRepresentationIndex::can_be_out_of_sync_error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFailure {
    /// HTTP status of the failed request, when one was received.
    pub http_status: Option<u16>,
}
