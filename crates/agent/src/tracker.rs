use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// State of one on-demand background job.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobState {
    pub id: String,
    pub job_type: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Request payload echoed back on status queries.
    pub detail: serde_json::Value,
}

impl JobState {
    pub fn new(id: String, job_type: &str, detail: serde_json::Value) -> JobState {
        JobState {
            id,
            job_type: job_type.to_string(),
            status: JobStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            detail,
        }
    }
}

#[derive(Default)]
struct LogQueue {
    deque: Mutex<VecDeque<String>>,
    notify: Notify,
}

/// Process-wide registry of on-demand jobs and their FIFO log queues.
/// Workers push log lines from blocking or async contexts; one SSE stream
/// per job pops them with a deadline.
#[derive(Clone, Default)]
pub struct JobTracker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: Mutex<HashMap<String, JobState>>,
    queues: Mutex<HashMap<String, Arc<LogQueue>>>,
}

impl JobTracker {
    pub fn new() -> JobTracker {
        JobTracker::default()
    }

    /// Register a job and create its log queue.
    pub fn set_job(&self, state: JobState) {
        let job_id = state.id.clone();
        self.inner.jobs.lock().unwrap().insert(job_id.clone(), state);
        self.inner
            .queues
            .lock()
            .unwrap()
            .entry(job_id)
            .or_default();
    }

    pub fn get_job(&self, job_id: &str) -> Option<JobState> {
        self.inner.jobs.lock().unwrap().get(job_id).cloned()
    }

    /// Mutate one job's state in place.
    pub fn update_job(&self, job_id: &str, update: impl FnOnce(&mut JobState)) {
        if let Some(state) = self.inner.jobs.lock().unwrap().get_mut(job_id) {
            update(state);
        }
    }

    pub fn set_status(&self, job_id: &str, status: JobStatus, error: Option<String>) {
        self.update_job(job_id, |state| {
            state.status = status;
            if status.is_terminal() {
                state.completed_at = Some(Utc::now());
            }
            if error.is_some() {
                state.error = error;
            }
        });
    }

    /// Append a log line to the job's queue. A job whose queue was already
    /// removed drops the line.
    pub fn push_log(&self, job_id: &str, message: impl Into<String>) {
        let queue = {
            let queues = self.inner.queues.lock().unwrap();
            queues.get(job_id).cloned()
        };
        if let Some(queue) = queue {
            queue.deque.lock().unwrap().push_back(message.into());
            // notify_one stores a permit when nobody waits yet, so a push
            // racing ahead of the consumer's registration still wakes it.
            queue.notify.notify_one();
        }
    }

    /// Pop the next log line, waiting up to `timeout` for one to arrive.
    pub async fn pop_log(&self, job_id: &str, timeout: Duration) -> Option<String> {
        let queue = {
            let queues = self.inner.queues.lock().unwrap();
            queues.get(job_id).cloned()
        }?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before the emptiness re-check so a push
            // between the check and the await still wakes us.
            let notified = queue.notify.notified();
            if let Some(message) = queue.deque.lock().unwrap().pop_front() {
                return Some(message);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return queue.deque.lock().unwrap().pop_front();
            }
        }
    }

    /// Drop the job's log queue once its stream has fully drained.
    pub fn remove_queue(&self, job_id: &str) {
        self.inner.queues.lock().unwrap().remove(job_id);
    }

    pub fn has_queue(&self, job_id: &str) -> bool {
        self.inner.queues.lock().unwrap().contains_key(job_id)
    }
}
