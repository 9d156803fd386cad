use chrono::{DateTime, Utc};
use chunkdrop_store::FileId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One unit of work for the worker pool.
///
/// Serializable so a broker-backed [`JobQueue`](crate::JobQueue) can
/// carry it as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassemblyJob {
    pub task_id: Uuid,
    pub file_id: FileId,
    /// 1-based attempt number.
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl ReassemblyJob {
    /// First attempt for `file_id`.
    pub fn new(file_id: FileId) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            file_id,
            attempt: 1,
            enqueued_at: Utc::now(),
        }
    }

    /// Follow-up job for a retry. Keeps the task id.
    pub fn next_attempt(&self) -> Self {
        Self {
            task_id: self.task_id,
            file_id: self.file_id,
            attempt: self.attempt + 1,
            enqueued_at: Utc::now(),
        }
    }
}
