use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::api::JobStatus;

/// Delay between polls of an empty or unreachable queue.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    /// Delay after the first empty poll, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound of the delay, in milliseconds.
    pub max_delay_ms: u64,
    attempt: u32,
}

impl PollBackoff {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            attempt: 0,
        }
    }

    /// delay = base_delay_ms * 2^(attempt - 1), capped at `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// Records one more empty poll and returns how long to wait.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(self.delay_for_attempt(self.attempt))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Status bookkeeping of one claimed job.
#[derive(Debug, Clone, Serialize)]
pub struct JobTracker {
    pub job_id: Uuid,
    status: JobStatus,
    history: Vec<JobStatus>,
    pub claimed_at: DateTime<Utc>,
}

impl JobTracker {
    pub fn claimed(job_id: Uuid) -> Self {
        Self {
            job_id,
            status: JobStatus::Claimed,
            history: vec![JobStatus::Claimed],
            claimed_at: Utc::now(),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn history(&self) -> &[JobStatus] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves to `next` if the transition is allowed; returns whether it was.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(job_id = %self.job_id, from = %self.status, to = %next, "ignoring invalid status transition");
            return false;
        }
        self.status = next;
        self.history.push(next);
        true
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.claimed_at).num_milliseconds()
    }
}
