//! End-to-end lifecycle scenarios: build an index from parsed manifest
//! nodes, query it, merge refreshes onto it, and watch availability evolve
//! as the live window slides.

use dash_mpd::{S, SegmentTemplate, SegmentTimeline};
use tidemark::{
    IndexOptions, ManifestBounds, ManifestBoundsCalculator, RepresentationContext,
    RequestFailure, RetiredPeriodCache, TimelineIndexArgs, TimelineRepresentationIndex,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn s(t: Option<u64>, d: u64, r: Option<i64>) -> S {
    S {
        t,
        d,
        r,
        ..Default::default()
    }
}

/// A 1 Hz-timescale live template declaring `runs` of (t, d, r).
fn template(runs: &[(Option<u64>, u64, Option<i64>)]) -> SegmentTemplate {
    SegmentTemplate {
        timescale: Some(1),
        media: Some("chunk-$Number$-$Time$.m4s".to_string()),
        initialization: Some("init-$RepresentationID$.m4s".to_string()),
        SegmentTimeline: Some(SegmentTimeline {
            segments: runs.iter().map(|&(t, d, r)| s(t, d, r)).collect(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn live_ctx() -> RepresentationContext {
    RepresentationContext {
        is_dynamic: true,
        is_last_period: true,
        representation_id: "audio-128k".to_string(),
        bandwidth: Some(128_000),
        ..Default::default()
    }
}

fn build(
    runs: &[(Option<u64>, u64, Option<i64>)],
    ctx: &RepresentationContext,
) -> TimelineRepresentationIndex {
    let args = TimelineIndexArgs::from_segment_template(&template(runs)).unwrap();
    TimelineRepresentationIndex::new(args, ctx).unwrap()
}

fn bounds_at(max_position: f64, depth: Option<f64>) -> ManifestBoundsCalculator {
    let mut bounds = ManifestBoundsCalculator::new(ManifestBounds::live(depth, None));
    bounds.set_last_position(max_position);
    bounds
}

#[test]
fn on_demand_index_answers_the_whole_timeline() {
    init_logging();
    let ctx = RepresentationContext {
        representation_id: "video-hd".to_string(),
        ..Default::default()
    };
    let mut index = build(&[(Some(0), 4, Some(2))], &ctx);
    let bounds = ManifestBoundsCalculator::new(ManifestBounds::on_demand());

    let segments = index.get_segments(0.0, 12.0, &bounds).unwrap();
    let spans: Vec<(f64, f64)> = segments
        .iter()
        .map(|segment| (segment.time, segment.time + segment.duration))
        .collect();
    assert_eq!(spans, vec![(0.0, 4.0), (4.0, 8.0), (8.0, 12.0)]);

    assert!(index.is_finished());
    assert_eq!(
        index.init_segment().unwrap().uri.as_deref(),
        Some("init-video-hd.m4s")
    );
}

#[test]
fn live_session_merges_refreshes_and_slides_the_window() {
    init_logging();
    let ctx = live_ctx();
    // 30s timeshift window, edge currently at 12s.
    let mut bounds = bounds_at(12.0, Some(30.0));

    // First manifest load: three 4s segments.
    let mut index = build(&[(Some(0), 4, Some(2))], &ctx);
    let initial = index.get_segments(0.0, 120.0, &bounds).unwrap();
    assert_eq!(initial.len(), 3);
    assert_eq!(initial[0].uri.as_deref(), Some("chunk-1-0.m4s"));

    // A refresh carries only the tail plus newly declared segments.
    let refreshed = build(&[(Some(8), 4, Some(0)), (Some(12), 4, Some(1))], &ctx);
    index.update(refreshed, &bounds).unwrap();

    let merged = index.get_segments(0.0, 120.0, &bounds).unwrap();
    let starts: Vec<f64> = merged.iter().map(|segment| segment.time).collect();
    assert_eq!(starts, vec![0.0, 4.0, 8.0, 12.0, 16.0]);
    // Numbering continued across the merge.
    assert_eq!(merged[3].number, Some(4));

    // The edge has only produced 13.5s: [12,16) is declared but not yet
    // requestable, and [16,20) even less so.
    bounds.set_last_position(13.5);
    let last = index.last_requestable_segment_info(&bounds).unwrap();
    assert_eq!(last.scaled_start, 8);
    assert!(!last.is_last_of_timeline);

    // Much later, the window has slid past the first two segments.
    bounds.set_last_position(40.0);
    assert_eq!(
        index.is_segment_still_available(&merged[0], &bounds),
        Some(false)
    );
    assert_eq!(
        index.is_segment_still_available(&merged[3], &bounds),
        Some(true)
    );

    // Querying again prunes the expired head and renumbers from there.
    let windowed = index.get_segments(0.0, 120.0, &bounds).unwrap();
    assert_eq!(windowed.first().unwrap().time, 8.0);
    assert_eq!(windowed.first().unwrap().number, Some(3));
}

#[test]
fn desynchronized_refresh_recovers_through_replace() {
    init_logging();
    let ctx = live_ctx();
    let bounds = bounds_at(100.0, None);

    let mut index = build(&[(Some(0), 4, Some(1))], &ctx);
    index.get_segments(0.0, 1.0, &bounds).unwrap();

    // The packager restarted: the refreshed timeline shares nothing with
    // the old one.
    let refreshed = build(&[(Some(60), 4, Some(2))], &ctx);
    index.update(refreshed, &bounds).unwrap();

    let segments = index.get_segments(0.0, 120.0, &bounds).unwrap();
    assert_eq!(segments.first().unwrap().time, 60.0);
}

#[test]
fn gap_in_coverage_is_reported_as_a_discontinuity() {
    init_logging();
    let ctx = live_ctx();
    let bounds = bounds_at(100.0, None);

    let mut index = build(&[(Some(0), 4, Some(0)), (Some(10), 4, Some(1))], &ctx);
    index.get_segments(0.0, 1.0, &bounds).unwrap();

    assert_eq!(index.check_discontinuity(6.0), Some(10.0));
    assert_eq!(index.check_discontinuity(11.0), None);
}

#[test]
fn missing_segment_near_the_edge_is_classified_as_out_of_sync() {
    init_logging();
    let ctx = live_ctx();
    let bounds = bounds_at(20.0, None);

    let mut index = build(&[(Some(0), 4, Some(4))], &ctx);
    let segments = index.get_segments(0.0, 20.0, &bounds).unwrap();
    let not_found = RequestFailure {
        http_status: Some(404),
    };

    assert!(index.can_be_out_of_sync_error(&not_found, segments.last().unwrap(), &bounds));
    assert!(!index.can_be_out_of_sync_error(&not_found, &segments[0], &bounds));
}

#[test]
fn open_ended_run_tracks_the_live_edge() {
    init_logging();
    let ctx = live_ctx();
    let bounds = bounds_at(17.0, None);

    // r="-1" on the trailing element: repeats up to the live edge.
    let mut index = build(&[(Some(0), 4, Some(-1))], &ctx);
    let segments = index.get_segments(0.0, 120.0, &bounds).unwrap();

    // Edge at 17s: [0,4) [4,8) [8,12) [12,16) are fully produced runs.
    assert_eq!(segments.len(), 4);
    assert_eq!(segments.last().unwrap().time, 12.0);
}

#[test]
fn retired_period_outlives_the_manifest_only_while_referenced() {
    init_logging();
    let cache = RetiredPeriodCache::new();
    let ctx = live_ctx();
    let bounds = bounds_at(100.0, None);

    let retained = {
        let mut index = build(&[(Some(0), 4, Some(1))], &ctx);
        index.get_segments(0.0, 8.0, &bounds).unwrap();
        std::sync::Arc::new(index)
    };
    cache.insert("period-1", &retained);

    // Historical read-only queries still work through the cache.
    let historical = cache.get("period-1").unwrap();
    assert_eq!(historical.first_available_position(), Some(0.0));

    drop(retained);
    drop(historical);
    assert!(cache.get("period-1").is_none());
}

#[test]
fn pruning_can_be_disabled() {
    init_logging();
    let ctx = live_ctx();
    let mut index = build(&[(Some(0), 4, Some(1)), (Some(8), 4, Some(4))], &ctx)
        .with_options(IndexOptions {
            prune_expired_entries: false,
            ..IndexOptions::default()
        });

    // Window floor well past the first run.
    let bounds = bounds_at(100.0, Some(30.0));
    index.get_segments(0.0, 1.0, &bounds).unwrap();

    assert_eq!(index.entries().len(), 2);
    assert_eq!(index.start_number(), 1);
}
