// Progress reporting for long-running ingests
use std::ops::RangeInclusive;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    Loading,
    Extracting,
    Rendering,
    Complete,
}

impl ProgressStage {
    pub fn label(self) -> &'static str {
        match self {
            ProgressStage::Loading => "loading",
            ProgressStage::Extracting => "extracting",
            ProgressStage::Rendering => "rendering",
            ProgressStage::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    pub percent: u8,
    pub message: String,
}

/// Receives progress events. Invoked synchronously from the ingest thread
/// after each batch, so implementations should return quickly.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Forwards events to an async reporting task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn on_progress(&self, event: &ProgressEvent) {
        if self.tx.send(event.clone()).is_err() {
            debug!(percent = event.percent, "progress receiver dropped, event discarded");
        }
    }
}

/// `round(done / total * 100)` in exact integer arithmetic, ties to even.
pub fn percent_complete(done: u32, total: u32) -> u8 {
    if total == 0 || done >= total {
        return 100;
    }
    let scaled = u64::from(done) * 100;
    let total = u64::from(total);
    let mut quotient = scaled / total;
    let twice_remainder = (scaled % total) * 2;
    if twice_remainder > total || (twice_remainder == total && quotient % 2 == 1) {
        quotient += 1;
    }
    quotient.min(100) as u8
}

/// Per-call emitter. Owns the monotonic and single-terminal guarantees.
pub(crate) struct ProgressReporter<'a> {
    sink: Option<&'a dyn ProgressSink>,
    total_pages: u32,
    working_stage: ProgressStage,
    last_percent: u8,
    finished: bool,
}

impl<'a> ProgressReporter<'a> {
    pub(crate) fn new(sink: Option<&'a dyn ProgressSink>, total_pages: u32, rendering: bool) -> Self {
        Self {
            sink,
            total_pages,
            working_stage: if rendering { ProgressStage::Rendering } else { ProgressStage::Extracting },
            last_percent: 0,
            finished: false,
        }
    }

    /// Report that every page up to the end of `pages` is done.
    pub(crate) fn batch_completed(&mut self, pages: &RangeInclusive<u32>) {
        if self.finished {
            return;
        }
        let done = *pages.end();
        // Only the batch holding the last page may report 100.
        let percent = if done >= self.total_pages {
            100
        } else {
            percent_complete(done, self.total_pages).min(99)
        };
        let percent = percent.max(self.last_percent);
        let (stage, message) = if percent == 100 {
            self.finished = true;
            (
                ProgressStage::Complete,
                format!("Processed all {} pages", self.total_pages),
            )
        } else {
            (
                self.working_stage,
                format!(
                    "Processed pages {}-{} of {}",
                    pages.start(),
                    pages.end(),
                    self.total_pages
                ),
            )
        };
        self.last_percent = percent;
        self.emit(ProgressEvent { stage, percent, message });
    }

    fn emit(&self, event: ProgressEvent) {
        let Some(sink) = self.sink else {
            return;
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| sink.on_progress(&event)));
        if outcome.is_err() {
            warn!(
                percent = event.percent,
                stage = event.stage.label(),
                "progress sink panicked; continuing ingest"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for Recorder {
        fn on_progress(&self, event: &ProgressEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn percent_rounds_half_to_even() {
        assert_eq!(percent_complete(25, 120), 21);
        assert_eq!(percent_complete(50, 120), 42);
        assert_eq!(percent_complete(75, 120), 62);
        assert_eq!(percent_complete(100, 120), 83);
        assert_eq!(percent_complete(120, 120), 100);
        assert_eq!(percent_complete(1, 8), 12);
        assert_eq!(percent_complete(3, 8), 38);
    }

    #[test]
    fn nearly_done_batches_never_claim_completion() {
        let recorder = Recorder::default();
        let mut reporter = ProgressReporter::new(Some(&recorder), 1000, false);
        reporter.batch_completed(&(1..=998));
        reporter.batch_completed(&(999..=1000));
        let events = recorder.0.lock().unwrap();
        assert_eq!(events[0].percent, 99);
        assert_eq!(events[0].stage, ProgressStage::Extracting);
        assert_eq!(events[1].percent, 100);
        assert_eq!(events[1].stage, ProgressStage::Complete);
    }

    #[test]
    fn terminal_event_is_emitted_once() {
        let recorder = Recorder::default();
        let mut reporter = ProgressReporter::new(Some(&recorder), 10, true);
        reporter.batch_completed(&(1..=5));
        reporter.batch_completed(&(6..=10));
        reporter.batch_completed(&(6..=10));
        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].stage, ProgressStage::Rendering);
        assert_eq!(events[0].message, "Processed pages 1-5 of 10");
    }

    fn panicking_sink(_: &ProgressEvent) {
        panic!("display went away");
    }

    #[test]
    fn panicking_sink_is_isolated() {
        let mut reporter = ProgressReporter::new(Some(&panicking_sink), 2, false);
        reporter.batch_completed(&(1..=1));
        reporter.batch_completed(&(2..=2));
        assert!(reporter.finished);
    }

    #[test]
    fn channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::new();
        let mut reporter = ProgressReporter::new(Some(&sink), 4, false);
        reporter.batch_completed(&(1..=2));
        reporter.batch_completed(&(3..=4));
        assert_eq!(rx.try_recv().unwrap().percent, 50);
        assert_eq!(rx.try_recv().unwrap().stage, ProgressStage::Complete);
    }
}
