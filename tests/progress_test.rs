// Progress reporting, async ingest and cancellation
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use blueprint_ingest::{
    CancelToken, ChannelSink, EngineConfig, IngestEngine, IngestError, ProgressEvent, ProgressStage,
};
use common::{manual_page, EventLog, PdfBuilder};
use rstest::rstest;

#[test]
fn hundred_twenty_pages_in_batches_of_twenty_five() {
    let dir = tempfile::tempdir().unwrap();
    let path = PdfBuilder::new().pages(120, manual_page).write(dir.path(), "manual.pdf");
    let log = EventLog::default();
    let engine = IngestEngine::new(EngineConfig::builder().batch_size(25).progress_sink(log.sink()).build()).unwrap();

    let result = engine.ingest(&path).unwrap();

    assert_eq!(result.total_pages, 120);
    assert_eq!(log.percents(), vec![21, 42, 62, 83, 100]);
    let events = log.events();
    assert_eq!(events[0].message, "Processed pages 1-25 of 120");
    assert_eq!(events[4].message, "Processed all 120 pages");
}

#[rstest]
#[case(1, 25)]
#[case(7, 2)]
#[case(99, 10)]
#[case(200, 3)]
#[case(201, 200)]
fn events_are_monotonic_with_a_single_terminal(#[case] pages: u32, #[case] batch_size: usize) {
    let dir = tempfile::tempdir().unwrap();
    let path = PdfBuilder::new().pages(pages, manual_page).write(dir.path(), "manual.pdf");
    let log = EventLog::default();
    let engine = IngestEngine::new(EngineConfig::builder().batch_size(batch_size).progress_sink(log.sink()).build())
        .unwrap();

    engine.ingest(&path).unwrap();

    let events = log.events();
    assert_eq!(events.len(), pages.div_ceil(batch_size as u32) as usize);
    assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
    let (last, rest) = events.split_last().unwrap();
    assert_eq!(last.percent, 100);
    assert_eq!(last.stage, ProgressStage::Complete);
    assert!(rest.iter().all(|e| e.percent < 100 && e.stage == ProgressStage::Extracting));
}

#[test]
fn rendering_stage_is_reported_with_thumbnails() {
    let dir = tempfile::tempdir().unwrap();
    let path = PdfBuilder::new().pages(4, manual_page).write(dir.path(), "manual.pdf");
    let log = EventLog::default();
    let engine = IngestEngine::new(
        EngineConfig::builder()
            .batch_size(2)
            .generate_thumbnails(true)
            .thumbnail_max_edge(32)
            .progress_sink(log.sink())
            .build(),
    )
    .unwrap();

    engine.ingest(&path).unwrap();

    let stages: Vec<ProgressStage> = log.events().iter().map(|e| e.stage).collect();
    assert_eq!(stages, vec![ProgressStage::Rendering, ProgressStage::Complete]);
}

fn exploding_sink(_: &ProgressEvent) {
    panic!("display went away");
}

#[test]
fn a_panicking_sink_does_not_abort_the_ingest() {
    let dir = tempfile::tempdir().unwrap();
    let path = PdfBuilder::new().pages(5, manual_page).write(dir.path(), "manual.pdf");
    let engine = IngestEngine::new(EngineConfig::builder().batch_size(2).progress_sink(exploding_sink).build()).unwrap();

    let result = engine.ingest(&path).unwrap();
    assert_eq!(result.total_pages, 5);
}

#[tokio::test]
async fn async_ingest_streams_events_through_a_channel() {
    let dir = tempfile::tempdir().unwrap();
    let path = PdfBuilder::new().pages(30, manual_page).write(dir.path(), "manual.pdf");
    let (sink, mut events) = ChannelSink::new();
    let engine = IngestEngine::new(EngineConfig::builder().batch_size(10).progress_sink(sink).build()).unwrap();

    let result = engine.ingest_async(path).await.unwrap();
    drop(engine);

    let mut percents = Vec::new();
    while let Some(event) = events.recv().await {
        percents.push(event.percent);
    }
    assert_eq!(result.total_pages, 30);
    assert_eq!(percents, vec![33, 67, 100]);
}

#[test]
fn cancellation_between_batches_returns_no_result() {
    let dir = tempfile::tempdir().unwrap();
    let path = PdfBuilder::new().pages(50, manual_page).write(dir.path(), "manual.pdf");
    let token = CancelToken::new();
    let seen = Arc::new(AtomicUsize::new(0));
    let sink = {
        let token = token.clone();
        let seen = Arc::clone(&seen);
        move |_: &ProgressEvent| {
            if seen.fetch_add(1, Ordering::SeqCst) == 1 {
                token.cancel();
            }
        }
    };
    let engine = IngestEngine::new(EngineConfig::builder().batch_size(10).progress_sink(sink).build()).unwrap();

    let err = engine.ingest_with_cancel(&path, &token).unwrap_err();

    assert!(matches!(err, IngestError::Cancelled { pages_completed: 20 }), "{err:?}");
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[test]
fn cancelled_before_start_still_validates_the_file() {
    let token = CancelToken::new();
    token.cancel();
    let engine = IngestEngine::new(EngineConfig::default()).unwrap();

    let err = engine.ingest_with_cancel("missing.pdf", &token).unwrap_err();
    assert!(matches!(err, IngestError::FileNotFound { .. }));
}
