use std::time::Duration;

use axum::response::sse::Event;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::tracker::{JobStatus, JobTracker};

const RUNNING_POLL: Duration = Duration::from_millis(500);

/// Drain-phase tuning, read from settings per stream.
#[derive(Debug, Copy, Clone)]
pub struct DrainConfig {
    /// Stream stays open this long after the last message once the job is
    /// terminal.
    pub timeout: Duration,
    /// Queue poll cadence during the drain phase.
    pub poll_interval: Duration,
}

impl Default for DrainConfig {
    fn default() -> DrainConfig {
        DrainConfig {
            timeout: Duration::from_secs_f64(models::defaults::SSE_DRAIN_TIMEOUT_SECONDS),
            poll_interval: Duration::from_secs_f64(models::defaults::SSE_DRAIN_POLL_INTERVAL),
        }
    }
}

/// Events emitted over one job's stream, in order: any number of `Message`s,
/// then `Status`, then `Complete`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Message {
        message: String,
        timestamp: DateTime<Utc>,
    },
    Status {
        status: JobStatus,
        error: Option<String>,
    },
    Complete {
        status: JobStatus,
    },
}

impl StreamEvent {
    pub fn into_sse(self) -> Event {
        match self {
            StreamEvent::Message { message, timestamp } => Event::default().data(
                serde_json::json!({ "message": message, "timestamp": timestamp }).to_string(),
            ),
            StreamEvent::Status { status, error } => Event::default()
                .data(serde_json::json!({ "status": status, "error": error }).to_string()),
            StreamEvent::Complete { status } => Event::default()
                .event("complete")
                .data(serde_json::json!({ "status": status }).to_string()),
        }
    }
}

/// Pump one job's log queue into `tx` until the job finishes and its queue
/// runs dry.
///
/// While the job runs, the queue is polled on a half-second deadline. Once
/// the status turns terminal the drain phase begins: parallel workers may
/// still be pushing lines, so the stream keeps consuming, resetting its exit
/// timer on every delivered message, and only closes after
/// `drain.timeout` passes with nothing new. Final status and `complete`
/// events follow, and the queue entry is dropped.
pub async fn drive_stream(
    tracker: JobTracker,
    job_id: String,
    drain: DrainConfig,
    tx: mpsc::Sender<StreamEvent>,
) {
    let send = |event: StreamEvent| {
        let tx = tx.clone();
        async move {
            // A closed receiver means the client went away; stop pumping.
            tx.send(event).await.is_ok()
        }
    };

    loop {
        let Some(job) = tracker.get_job(&job_id) else {
            return;
        };
        if job.status.is_terminal() {
            break;
        }
        if let Some(message) = tracker.pop_log(&job_id, RUNNING_POLL).await {
            if !send(StreamEvent::Message {
                message,
                timestamp: Utc::now(),
            })
            .await
            {
                return;
            }
        }
    }

    // Drain phase: every delivered message pushes the exit deadline out.
    let mut last_message = tokio::time::Instant::now();
    loop {
        match tracker.pop_log(&job_id, drain.poll_interval).await {
            Some(message) => {
                if !send(StreamEvent::Message {
                    message,
                    timestamp: Utc::now(),
                })
                .await
                {
                    return;
                }
                last_message = tokio::time::Instant::now();
            }
            None => {
                if last_message.elapsed() >= drain.timeout {
                    break;
                }
            }
        }
    }

    if let Some(job) = tracker.get_job(&job_id) {
        if !send(StreamEvent::Status {
            status: job.status,
            error: job.error.clone(),
        })
        .await
        {
            return;
        }
        let _ = send(StreamEvent::Complete { status: job.status }).await;
    }
    tracker.remove_queue(&job_id);
}

/// Spawn the stream pump and return its event receiver.
pub fn stream_events(
    tracker: JobTracker,
    job_id: String,
    drain: DrainConfig,
) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(drive_stream(tracker, job_id, drain, tx));
    rx
}
