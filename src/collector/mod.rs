//! Collector tasks and their lifecycle.
//!
//! A collector is one long-running tokio task driving one acquisition
//! strategy (live tracking or daily paging) for one source. The
//! runner owns the state machine and the retry envelope; strategies
//! only know how to wire interception and drive the page.

pub mod daily;
pub mod live;
pub mod runner;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::random_range;

use crate::config::RetryConfig;

/// Lifecycle of a collector task.
///
/// Legal transitions:
///
/// ```text
/// Idle -> Setup -> Running <-> RetryWait
///                     |             |
///                     v             v
///                  Stopping      Failed (terminal)
///                     |
///                     v
///                  Stopped (terminal)
/// ```
///
/// `Failed` is terminal: recovery is a new task created through the
/// coordinator, never reuse of the failed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Setup,
    Running,
    RetryWait,
    Stopping,
    Stopped,
    Failed,
}

impl CollectorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CollectorState::Stopped | CollectorState::Failed)
    }

    pub fn name(self) -> &'static str {
        match self {
            CollectorState::Idle => "idle",
            CollectorState::Setup => "setup",
            CollectorState::Running => "running",
            CollectorState::RetryWait => "retry_wait",
            CollectorState::Stopping => "stopping",
            CollectorState::Stopped => "stopped",
            CollectorState::Failed => "failed",
        }
    }
}

/// What kind of acquisition a collector performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorMode {
    /// Permanent residence on a live page
    Live,
    /// Finite date-range paging
    Daily,
}

impl CollectorMode {
    pub fn name(self) -> &'static str {
        match self {
            CollectorMode::Live => "live",
            CollectorMode::Daily => "daily",
        }
    }
}

/// Mutable task state shared between the runner and the coordinator's
/// status queries. Lock is held only for field reads and writes.
pub struct CollectorShared {
    pub id: String,
    pub source_key: String,
    pub mode: CollectorMode,
    pub state: CollectorState,
    /// Recoverable failures so far
    pub attempt: u32,
    pub last_error: Option<String>,
    /// Unix ms of the next retry, while in `RetryWait`
    pub next_retry_at: Option<i64>,
    /// `(done, total)` date-paging progress for daily collectors
    pub progress: Option<(u32, u32)>,
}

impl CollectorShared {
    pub fn new(id: String, source_key: String, mode: CollectorMode) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            id,
            source_key,
            mode,
            state: CollectorState::Idle,
            attempt: 0,
            last_error: None,
            next_retry_at: None,
            progress: None,
        }))
    }

    pub fn snapshot(&self) -> CollectorStatus {
        CollectorStatus {
            id: self.id.clone(),
            source_key: self.source_key.clone(),
            mode: self.mode,
            state: self.state,
            attempt: self.attempt,
            last_error: self.last_error.clone(),
            next_retry_at: self.next_retry_at,
            progress: self.progress,
        }
    }
}

/// Point-in-time status of one collector, as reported by the
/// coordinator.
#[derive(Debug, Clone)]
pub struct CollectorStatus {
    pub id: String,
    pub source_key: String,
    pub mode: CollectorMode,
    pub state: CollectorState,
    pub attempt: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<i64>,
    pub progress: Option<(u32, u32)>,
}

/// Exponential backoff envelope with jitter.
///
/// delay(n) = min(base * 2^n, cap) + uniform(0..=jitter)
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    base: Duration,
    cap: Duration,
    jitter: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base: Duration::from_secs(config.base_delay_secs),
            cap: Duration::from_secs(config.cap_delay_secs),
            jitter: Duration::from_secs(config.jitter_secs),
        }
    }

    /// Backoff before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.cap);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            exp
        } else {
            exp + Duration::from_millis(random_range(0..=jitter_ms))
        }
    }
}
