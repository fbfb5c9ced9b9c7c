//! Ordered, at-least-once job queue over the shared store.
//!
//! Pending jobs live in the `queue` tree keyed by a monotonic sequence;
//! dequeued jobs move to `queue_inflight` with a visibility deadline. A job
//! that is never acked reappears once its deadline passes, so handlers must
//! be idempotent (hydration relies on checksum-gated version creation).

use crate::store::{be_key, get_json, put_json, Store, StoreError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Kinds of work carried by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Hydration,
    Learning,
    Evaluation,
    ToolRun,
}

/// Correlation headers propagated from the HTTP boundary into workers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobHeaders {
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

/// Queue envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub headers: JobHeaders,
}

/// A dequeued job plus the sequence number needed to ack it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveredJob {
    pub seq: u64,
    pub job: Job,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InflightRecord {
    job: Job,
    deadline_ms: i64,
    attempts: u32,
}

/// Sled-backed FIFO with visibility timeouts.
pub struct JobQueue {
    store: Store,
}

impl JobQueue {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Append a job; returns its sequence number.
    pub fn enqueue(&self, job: Job) -> Result<u64, StoreError> {
        let seq = self.store.next_id("jobs")?;
        let tree = self.store.tree("queue")?;
        put_json(&tree, be_key(seq), &job)?;
        debug!(
            target: "warden::queue",
            seq,
            job_type = ?job.job_type,
            correlation_id = %job.headers.correlation_id,
            "job enqueued"
        );
        Ok(seq)
    }

    /// Pop the next job, preferring redelivery of expired in-flight jobs.
    /// The job stays invisible for `visibility` until acked.
    pub fn dequeue(&self, visibility: Duration) -> Result<Option<DeliveredJob>, StoreError> {
        let now_ms = Utc::now().timestamp_millis();
        let deadline_ms = now_ms + visibility.as_millis() as i64;
        let inflight = self.store.tree("queue_inflight")?;

        // Redeliver the oldest expired in-flight job first.
        for entry in inflight.iter() {
            let (key, bytes) = entry?;
            let mut record: InflightRecord = serde_json::from_slice(&bytes)?;
            if record.deadline_ms <= now_ms {
                record.deadline_ms = deadline_ms;
                record.attempts += 1;
                put_json(&inflight, &key, &record)?;
                let seq = decode_seq(&key);
                debug!(target: "warden::queue", seq, attempts = record.attempts, "job redelivered");
                return Ok(Some(DeliveredJob {
                    seq,
                    job: record.job,
                    attempts: record.attempts,
                }));
            }
        }

        let pending = self.store.tree("queue")?;
        let Some((key, bytes)) = pending.pop_min()? else {
            return Ok(None);
        };
        let job: Job = serde_json::from_slice(&bytes)?;
        let record = InflightRecord {
            job: job.clone(),
            deadline_ms,
            attempts: 1,
        };
        put_json(&inflight, &key, &record)?;
        let seq = decode_seq(&key);
        Ok(Some(DeliveredJob {
            seq,
            job,
            attempts: 1,
        }))
    }

    /// Acknowledge a delivered job so it is never redelivered.
    pub fn ack(&self, seq: u64) -> Result<bool, StoreError> {
        let inflight = self.store.tree("queue_inflight")?;
        Ok(inflight.remove(be_key(seq))?.is_some())
    }

    /// Pending + in-flight job count.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.store.tree("queue")?.len() + self.store.tree("queue_inflight")?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Peek a delivered-but-unacked job by sequence (used by tests and ops).
    pub fn inflight(&self, seq: u64) -> Result<Option<Job>, StoreError> {
        let inflight = self.store.tree("queue_inflight")?;
        let record: Option<InflightRecord> = get_json(&inflight, be_key(seq))?;
        Ok(record.map(|r| r.job))
    }
}

fn decode_seq(key: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let len = key.len().min(8);
    buf[8 - len..].copy_from_slice(&key[..len]);
    u64::from_be_bytes(buf)
}
