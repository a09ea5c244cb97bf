//! Segment index engine for DASH adaptive streaming playback.
//!
//! Given the segment-timeline description of one Representation, this
//! crate computes which media segments exist, which are currently
//! downloadable, when new ones become downloadable, and how to reconcile
//! that state across manifest refreshes for both live and on-demand
//! content. Manifest transport, XML parsing (the raw node types come from
//! `dash-mpd`), adaptive-bitrate selection and media buffering are the
//! caller's business; this engine only turns declared timelines into
//! answerable segment queries.

#![forbid(unsafe_code)]

pub mod bounds;
pub mod error;
pub mod metrics;
pub mod options;
pub mod periods;
pub mod template;
pub mod time;
pub mod timeline;

pub use bounds::{ManifestBounds, ManifestBoundsCalculator};
pub use error::{IndexError, RequestFailure, Result};
pub use options::IndexOptions;
pub use periods::RetiredPeriodCache;
pub use template::{SegmentUrlTemplate, TemplateValues};
pub use timeline::availability::LastRequestableSegment;
pub use timeline::index::{
    InitSegment, MediaSegment, RepresentationContext, TimelineIndexArgs,
    TimelineRepresentationIndex,
};
pub use timeline::{ByteRange, DeferredTimeline, EdgeResolution, TimelineEntry, TimelineSource};
