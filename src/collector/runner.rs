//! The collector runner: state machine + retry envelope.
//!
//! One runner invocation drives one strategy to a terminal state.
//! Every attempt gets a fresh browser context; the previous attempt's
//! context is always released before a retry is scheduled, so a
//! collector never holds more than one context no matter how often it
//! fails.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::collector::{CollectorMode, CollectorShared, CollectorState, RetryPolicy};
use crate::error::CollectError;
use crate::intercept::Interceptor;
use crate::metrics::METRICS;
use crate::pool::{BrowserContextHandle, BrowserContextPool};
use crate::ratelimit::RateLimiter;
use crate::util;

/// Everything a strategy needs while an attempt is running.
pub struct CollectContext {
    pub handle: Arc<BrowserContextHandle>,
    pub pool: Arc<BrowserContextPool>,
    pub rate: Arc<RateLimiter>,
    pub cancel: CancellationToken,
    shared: Arc<Mutex<CollectorShared>>,
}

impl CollectContext {
    /// Publish date-paging progress into the collector's status.
    pub fn report_progress(&self, done: u32, total: u32) {
        self.shared.lock().unwrap().progress = Some((done, total));
    }
}

/// One acquisition behavior (live tracking, daily paging).
///
/// CONTRACT:
/// - `collect` must return promptly once `cx.cancel` fires; every
///   wait inside it goes through a cancellable primitive.
/// - `collect` returning `Ok` means the work is complete (daily) or
///   was cleanly cancelled (live).
#[async_trait]
pub trait CollectStrategy: Send + Sync {
    fn collector_id(&self) -> String;

    fn source_key(&self) -> &str;

    fn mode(&self) -> CollectorMode;

    /// Build the interception wiring for a fresh page. Called once
    /// per attempt.
    fn build_interceptors(&self) -> Result<Vec<Arc<dyn Interceptor>>, CollectError>;

    /// Drive collection until done or cancelled.
    async fn collect(&self, cx: &CollectContext) -> Result<(), CollectError>;
}

pub struct CollectorRunner {
    pool: Arc<BrowserContextPool>,
    rate: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl CollectorRunner {
    pub fn new(pool: Arc<BrowserContextPool>, rate: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self { pool, rate, policy }
    }

    /// Drive `strategy` to a terminal state.
    ///
    /// GUARANTEES:
    /// - The browser context of every attempt is released before the
    ///   task waits or ends, whatever the outcome.
    /// - The source's rate-limiter gates are cleared on the way out.
    /// - The final state is exactly `Stopped` or `Failed`.
    pub async fn run(
        &self,
        strategy: Arc<dyn CollectStrategy>,
        shared: Arc<Mutex<CollectorShared>>,
        cancel: CancellationToken,
    ) {
        METRICS.collectors_active.fetch_add(1, Ordering::Relaxed);
        let source = strategy.source_key().to_string();
        let id = strategy.collector_id();
        log::info!("collector '{}' starting ({})", id, strategy.mode().name());

        loop {
            if cancel.is_cancelled() {
                set_state(&shared, CollectorState::Stopped);
                break;
            }
            set_state(&shared, CollectorState::Setup);

            match self.attempt(&strategy, &shared, &cancel).await {
                Ok(()) => {
                    set_state(&shared, CollectorState::Stopped);
                    break;
                }
                Err(e) if e.is_shutdown() => {
                    set_state(&shared, CollectorState::Stopped);
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    METRICS.collector_retries.fetch_add(1, Ordering::Relaxed);
                    let attempt = {
                        let mut s = shared.lock().unwrap();
                        s.attempt += 1;
                        s.last_error = Some(e.to_string());
                        s.attempt
                    };
                    if attempt > self.policy.max_attempts {
                        log::error!(
                            "collector '{}' exhausted its {} retries: {}",
                            id,
                            self.policy.max_attempts,
                            e
                        );
                        set_state(&shared, CollectorState::Failed);
                        break;
                    }

                    let delay = self.policy.delay(attempt - 1);
                    log::warn!(
                        "collector '{}' attempt {} failed ({}), retrying in {:?}",
                        id,
                        attempt,
                        e,
                        delay
                    );
                    shared.lock().unwrap().next_retry_at =
                        Some(util::now_ms() + delay.as_millis() as i64);
                    set_state(&shared, CollectorState::RetryWait);

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            set_state(&shared, CollectorState::Stopped);
                            break;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    shared.lock().unwrap().next_retry_at = None;
                }
                Err(e) => {
                    log::error!("collector '{}' failed terminally: {}", id, e);
                    shared.lock().unwrap().last_error = Some(e.to_string());
                    set_state(&shared, CollectorState::Failed);
                    break;
                }
            }
        }

        self.rate.clear(&source).await;
        METRICS.collectors_active.fetch_sub(1, Ordering::Relaxed);
        let final_state = shared.lock().unwrap().state;
        log::info!("collector '{}' finished: {}", id, final_state.name());
    }

    /// One attempt: acquire, wire, collect, release.
    async fn attempt(
        &self,
        strategy: &Arc<dyn CollectStrategy>,
        shared: &Arc<Mutex<CollectorShared>>,
        cancel: &CancellationToken,
    ) -> Result<(), CollectError> {
        let handle = self.pool.acquire(strategy.source_key()).await?;

        let interceptors = match strategy.build_interceptors() {
            Ok(interceptors) => interceptors,
            Err(e) => {
                self.pool.release(&handle).await;
                return Err(e);
            }
        };
        for interceptor in interceptors {
            self.pool.attach(&handle, interceptor);
        }

        set_state(shared, CollectorState::Running);
        let cx = CollectContext {
            handle: handle.clone(),
            pool: self.pool.clone(),
            rate: self.rate.clone(),
            cancel: cancel.clone(),
            shared: shared.clone(),
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(CollectError::ShutdownRequested),
            r = strategy.collect(&cx) => r,
        };

        let clean_exit = match &result {
            Ok(()) => true,
            Err(e) => e.is_shutdown(),
        };
        if clean_exit {
            set_state(shared, CollectorState::Stopping);
        }
        self.pool.release(&handle).await;
        result
    }
}

fn set_state(shared: &Arc<Mutex<CollectorShared>>, state: CollectorState) {
    let mut s = shared.lock().unwrap();
    if s.state != state {
        log::debug!("collector '{}': {} -> {}", s.id, s.state.name(), state.name());
        s.state = state;
    }
}
