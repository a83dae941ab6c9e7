use crate::error::{Result, UpdaterError};
use std::time::{Duration, Instant};

pub const DEFAULT_PASS_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Process-wide deadline shared by every blocking call of a pass.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            expires_at: Instant::now() + timeout,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Time left before the deadline, or `Timeout` naming `operation` once it passed.
    pub fn remaining(&self, operation: &str) -> Result<Duration> {
        let now = Instant::now();
        if now >= self.expires_at {
            return Err(UpdaterError::Timeout(operation.to_string()));
        }
        Ok(self.expires_at - now)
    }

    /// Per-call timeout bounded by the pass deadline.
    pub fn bounded(&self, per_call: Duration, operation: &str) -> Result<Duration> {
        Ok(self.remaining(operation)?.min(per_call))
    }
}
