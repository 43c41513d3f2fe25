use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use courier_consumer::{consume, ConsumeSummary, FetchBatch, FetchError, FetchedRecord, RecordSource};
use courier_domain::services::ConsumptionMetrics;
use tokio_util::sync::CancellationToken;

/// Replays queued batches, then cancels the token once the script runs dry.
struct ScriptedSource {
    script: Mutex<VecDeque<Step>>,
    polls: AtomicUsize,
}

enum Step {
    Deliver(FetchBatch),
    /// Cancels while the poll is in flight, still handing back the batch.
    CancelDuring(FetchBatch),
}

impl ScriptedSource {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            polls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RecordSource for ScriptedSource {
    async fn poll(&self, shutdown: &CancellationToken) -> FetchBatch {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Step::Deliver(batch)) => batch,
            Some(Step::CancelDuring(batch)) => {
                shutdown.cancel();
                batch
            }
            None => {
                shutdown.cancel();
                FetchBatch::default()
            }
        }
    }
}

#[derive(Default)]
struct CountingMetrics {
    consumed: AtomicUsize,
}

impl ConsumptionMetrics for CountingMetrics {
    fn record_consumed(&self) {
        self.consumed.fetch_add(1, Ordering::SeqCst);
    }
}

fn records(topic: &str, value: &str) -> FetchBatch {
    FetchBatch::from_records(vec![FetchedRecord::new(topic, 0, value.as_bytes())])
}

#[tokio::test]
async fn fetch_errors_do_not_stop_the_loop() {
    let source = ScriptedSource::new(vec![
        Step::Deliver(records("orders", "hello")),
        Step::Deliver(FetchBatch::from_errors(vec![FetchError::new(
            "orders",
            3,
            "broker transport failure",
        )])),
        Step::Deliver(records("payments", "world")),
    ]);
    let metrics = CountingMetrics::default();
    let token = CancellationToken::new();

    let summary = consume(&source, &metrics, &token).await;

    assert_eq!(
        summary,
        ConsumeSummary {
            consumed: 2,
            failed_batches: 1,
        }
    );
    assert_eq!(metrics.consumed.load(Ordering::SeqCst), 2);
    assert_eq!(source.polls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn cancellation_during_a_poll_drops_its_records() {
    let source = ScriptedSource::new(vec![
        Step::Deliver(records("orders", "a")),
        Step::CancelDuring(records("orders", "b")),
        Step::Deliver(records("orders", "c")),
    ]);
    let metrics = CountingMetrics::default();
    let token = CancellationToken::new();

    let summary = consume(&source, &metrics, &token).await;

    assert_eq!(summary.consumed, 1);
    assert_eq!(metrics.consumed.load(Ordering::SeqCst), 1);
    assert_eq!(source.polls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn already_cancelled_token_consumes_nothing() {
    let source = ScriptedSource::new(vec![Step::Deliver(records("orders", "late"))]);
    let metrics = CountingMetrics::default();
    let token = CancellationToken::new();
    token.cancel();

    let summary = consume(&source, &metrics, &token).await;

    assert_eq!(summary, ConsumeSummary::default());
    assert_eq!(metrics.consumed.load(Ordering::SeqCst), 0);
    assert_eq!(source.polls.load(Ordering::SeqCst), 1);
}
