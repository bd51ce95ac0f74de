use bosk_core::Update;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a log record carries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordBody {
    Update(Update),
    /// Written by `flush`; carries nothing but its own position.
    Barrier,
}

/// One entry of the shared, totally ordered change feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Position in the log, assigned by the backend on append. Dense and
    /// strictly increasing.
    pub seq: u64,
    /// Correlates the record with the submitter's logs.
    pub correlation: Uuid,
    pub body: RecordBody,
}

impl LogRecord {
    pub fn is_barrier(&self) -> bool {
        matches!(self.body, RecordBody::Barrier)
    }
}
