// Batches handed from a record source to the consumption loop. Neither type is
// persisted; a batch is observed once and dropped.

use std::borrow::Cow;

/// One delivered record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRecord {
    pub topic: String,
    pub partition: i32,
    pub value: Vec<u8>,
}

impl FetchedRecord {
    pub fn new(topic: impl Into<String>, partition: i32, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            value: value.into(),
        }
    }

    /// Payload as text, with invalid UTF-8 replaced.
    pub fn value_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

/// A per-topic/partition failure reported by the client. `topic` is empty
/// and `partition` is -1 when the client could not attribute the error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub topic: String,
    pub partition: i32,
    pub message: String,
}

impl FetchError {
    pub fn new(topic: impl Into<String>, partition: i32, message: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            message: message.into(),
        }
    }
}

/// Everything one poll returned, in client delivery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchBatch {
    pub records: Vec<FetchedRecord>,
    pub errors: Vec<FetchError>,
}

impl FetchBatch {
    pub fn from_records(records: Vec<FetchedRecord>) -> Self {
        Self {
            records,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<FetchError>) -> Self {
        Self {
            records: Vec::new(),
            errors,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
