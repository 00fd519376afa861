//! Per-question grading retry, specialized to two fixed backoffs. Shaped
//! after the workspace-wide exponential retry policy but deliberately
//! narrowed: the orchestrator retries a failed question exactly twice, at
//! 1s and then 4s, before giving up on it.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn fixed(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Delay before retry attempt `attempt` (0-based: the first retry after
    /// the initial try is attempt 0).
    pub fn delay_for_attempt(&self, attempt: usize) -> Option<Duration> {
        self.delays.get(attempt).copied()
    }

    /// Total retries this policy allows (not counting the initial attempt).
    pub fn max_retries(&self) -> usize {
        self.delays.len()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(vec![Duration::from_secs(1), Duration::from_secs(4)])
    }
}
