use courier_domain::services::ConsumptionMetrics;
use tracing::{error, info};

use crate::source::FetchBatch;

/// What happened to one polled batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every record was logged and counted.
    Consumed(usize),
    /// The batch carried fetch errors; nothing in it was counted.
    Failed(usize),
}

/// Handles one batch. A batch with any fetch error is rejected whole: each
/// error is logged and no record is counted, even records delivered alongside
/// the errors.
pub fn process_batch<M>(metrics: &M, batch: &FetchBatch) -> BatchOutcome
where
    M: ConsumptionMetrics + ?Sized,
{
    if batch.has_errors() {
        for fetch_error in &batch.errors {
            error!(
                topic = %fetch_error.topic,
                partition = fetch_error.partition,
                error = %fetch_error.message,
                "fetch error"
            );
        }
        return BatchOutcome::Failed(batch.errors.len());
    }

    for record in &batch.records {
        info!(
            topic = %record.topic,
            partition = record.partition,
            msg = %record.value_lossy(),
            "message consumed"
        );
        metrics.record_consumed();
    }

    BatchOutcome::Consumed(batch.records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FetchError, FetchedRecord};
    use std::{
        io,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
    };

    #[derive(Default)]
    struct MockMetrics {
        consumed: AtomicUsize,
    }

    impl ConsumptionMetrics for MockMetrics {
        fn record_consumed(&self) {
            self.consumed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn lines_containing(&self, needle: &str) -> Vec<String> {
            let text = String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned();
            text.lines()
                .filter(|line| line.contains(needle))
                .map(str::to_owned)
                .collect::<Vec<_>>()
        }
    }

    fn with_captured_logs<T>(f: impl FnOnce() -> T) -> (T, CapturedLogs) {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let out = tracing::subscriber::with_default(subscriber, f);
        (out, logs)
    }

    fn record(topic: &str, value: &str) -> FetchedRecord {
        FetchedRecord::new(topic, 0, value.as_bytes())
    }

    #[test]
    fn counts_each_delivered_record() {
        let metrics = MockMetrics::default();
        let batch = FetchBatch::from_records(vec![record("orders", "hello")]);

        assert_eq!(process_batch(&metrics, &batch), BatchOutcome::Consumed(1));
        assert_eq!(metrics.consumed.load(Ordering::SeqCst), 1);

        let batch = FetchBatch::from_records(vec![
            record("orders", "a"),
            record("payments", "b"),
            record("orders", "c"),
        ]);
        assert_eq!(process_batch(&metrics, &batch), BatchOutcome::Consumed(3));
        assert_eq!(metrics.consumed.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn one_record_logs_one_entry() {
        let metrics = MockMetrics::default();
        let batch = FetchBatch::from_records(vec![record("orders", "hello")]);

        let (outcome, logs) = with_captured_logs(|| process_batch(&metrics, &batch));

        assert_eq!(outcome, BatchOutcome::Consumed(1));
        let consumed = logs.lines_containing("message consumed");
        assert_eq!(consumed.len(), 1);
        assert!(consumed[0].contains("orders"));
        assert!(consumed[0].contains("hello"));
        assert!(logs.lines_containing("fetch error").is_empty());
    }

    #[test]
    fn each_fetch_error_is_logged() {
        let metrics = MockMetrics::default();
        let batch = FetchBatch::from_errors(vec![
            FetchError::new("orders", 2, "broker down"),
            FetchError::new("payments", 0, "leader not available"),
        ]);

        let (_, logs) = with_captured_logs(|| process_batch(&metrics, &batch));

        let errors = logs.lines_containing("fetch error");
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("broker down"));
        assert!(errors[1].contains("leader not available"));
        assert!(logs.lines_containing("message consumed").is_empty());
    }

    #[test]
    fn errors_suppress_the_whole_batch() {
        let metrics = MockMetrics::default();
        let batch = FetchBatch {
            records: vec![record("orders", "hello")],
            errors: vec![
                FetchError::new("orders", 2, "broker down"),
                FetchError::new("payments", 0, "leader not available"),
            ],
        };

        assert_eq!(process_batch(&metrics, &batch), BatchOutcome::Failed(2));
        assert_eq!(metrics.consumed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_batch_counts_nothing() {
        let metrics = MockMetrics::default();

        assert_eq!(
            process_batch(&metrics, &FetchBatch::default()),
            BatchOutcome::Consumed(0)
        );
        assert_eq!(metrics.consumed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn non_utf8_payloads_are_still_counted() {
        let metrics = MockMetrics::default();
        let batch = FetchBatch::from_records(vec![FetchedRecord::new(
            "orders",
            1,
            vec![0xff, 0xfe, b'x'],
        )]);

        assert_eq!(process_batch(&metrics, &batch), BatchOutcome::Consumed(1));
        assert_eq!(metrics.consumed.load(Ordering::SeqCst), 1);
    }
}
