use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

/// A submission waiting to be graded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub user_id: String,
    pub problem_id: String,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct QueuedJob {
    /// Position in submission order
    pub id: usize,
    pub submission: Submission,
}

pub struct JobQueue {
    queue: Mutex<VecDeque<QueuedJob>>,
    notify: Notify,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, job: QueuedJob) {
        self.queue.lock().await.push_back(job);
        self.notify.notify_one();
    }

    /// Waits until a job is available and takes it
    pub async fn pop(&self) -> QueuedJob {
        loop {
            if let Some(job) = self.queue.lock().await.pop_front() {
                return job;
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }
}
