//! Client retry timing.
//!
//! A call is bounded by two clocks:
//! - the **attempt timeout**, how long to wait for a reply after each send;
//! - the **retry deadline**, the total time budget measured from the first
//!   send, after which an at-least-once call gives up.
//!
//! [`AttemptClock`] turns a [`RetryPolicy`] into concrete per-attempt
//! deadlines, clipping the last attempt so a call never outlives its budget.

use std::time::Duration;

use tokio::time::Instant;

/// Adjustable timeout parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait per attempt before resending (or giving up).
    pub attempt_timeout: Duration,
    /// Cumulative budget across all attempts.
    pub retry_deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_millis(1000),
            retry_deadline: Duration::from_secs(30),
        }
    }
}

/// Deadline bookkeeping for one call.
#[derive(Debug, Clone)]
pub struct AttemptClock {
    policy: RetryPolicy,
    started: Instant,
    attempts: u32,
}

impl AttemptClock {
    /// Start the clock at the moment of the first send.
    pub fn start(policy: RetryPolicy) -> Self {
        Self {
            policy,
            started: Instant::now(),
            attempts: 0,
        }
    }

    /// Record a send and return the deadline for its reply.
    pub fn begin_attempt(&mut self) -> Instant {
        self.attempts += 1;
        let attempt_end = Instant::now() + self.policy.attempt_timeout;
        attempt_end.min(self.overall_deadline())
    }

    /// Point after which no further attempt may start.
    pub fn overall_deadline(&self) -> Instant {
        self.started + self.policy.retry_deadline
    }

    /// `true` once the cumulative budget is spent.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.overall_deadline()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
