//! Sync configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::stacks::{PollBudget, DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_DELAY};

/// Settings for one sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Project namespace the run belongs to
    pub namespace: String,
    /// Maximum waits for stack frames across the whole run
    pub poll_attempts: u32,
    /// Pause between two waits
    pub poll_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            namespace: std::env::var("VITEST_NAMESPACE").unwrap_or_default(),
            poll_attempts: std::env::var("TESTSYNC_POLL_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_POLL_ATTEMPTS),
            poll_delay: std::env::var("TESTSYNC_POLL_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_POLL_DELAY),
        }
    }
}

impl SyncConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create config for a namespace with default polling
    pub fn new(namespace: &str) -> Self {
        SyncConfig {
            namespace: namespace.to_string(),
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
            poll_delay: DEFAULT_POLL_DELAY,
        }
    }

    /// Set the polling budget
    pub fn with_polling(mut self, attempts: u32, delay: Duration) -> Self {
        self.poll_attempts = attempts;
        self.poll_delay = delay;
        self
    }

    /// Reject configs a sync cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(SyncError::Config(
                "namespace is empty (set VITEST_NAMESPACE or --namespace)".to_string(),
            ));
        }
        Ok(())
    }

    /// Fresh retry budget for one run.
    pub fn poll_budget(&self) -> PollBudget {
        PollBudget::new(self.poll_attempts, self.poll_delay)
    }
}
