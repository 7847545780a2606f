//! Stage task messages.

use chrono::{DateTime, Utc};
use reframe_models::JobId;
use serde::{Deserialize, Serialize};

/// Instruction to run one stage of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTask {
    pub job_id: JobId,
    /// Stage the job must still be at for the task to run
    pub stage_index: usize,
    pub enqueued_at: DateTime<Utc>,
}

impl StageTask {
    pub fn new(job_id: JobId, stage_index: usize) -> Self {
        Self {
            job_id,
            stage_index,
            enqueued_at: Utc::now(),
        }
    }

    /// At most one live message per `(job, stage)` pair.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.job_id, self.stage_index)
    }
}

/// A task handed to a consumer, to be acknowledged once handled.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message_id: String,
    pub task: StageTask,
    /// How many times this message has been handed out, including this one
    pub delivery_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_serde_roundtrip() {
        let task = StageTask::new(JobId::from_string("job-9"), 2);
        let json = serde_json::to_string(&task).unwrap();
        let parsed: StageTask = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, task);
        assert_eq!(task.idempotency_key(), "job-9:2");
    }
}
