use std::collections::HashMap;

use rand::random_range;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant, sleep};
use tokio_util::sync::CancellationToken;

use crate::config::RateConfig;
use crate::error::CollectError;

/// Operations the limiter gates, each with its own minimum interval.
///
/// `refresh` is deliberately absent: the 300 s reload cadence is
/// enforced by the pool's own timer, not by per-call gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpClass {
    /// Page navigation; randomized 2–5 s minimum spacing
    Navigate,
    /// Historical date paging; fixed 10 s spacing
    Backfill,
}

/// Self-imposed rate limiter over `(source, operation class)` pairs.
///
/// GUARANTEES:
/// - Gates are monotonic: `earliest_next` never moves earlier.
/// - `await_gate` atomically advances the gate before returning, so
///   two concurrent callers can never both pass for the same slot.
///   No two navigations for one source ever run closer together than
///   the configured minimum.
/// - Waits are cancellable; a cancelled wait returns
///   `ShutdownRequested` without touching the gate.
pub struct RateLimiter {
    gates: Mutex<HashMap<(String, OpClass), Instant>>,
    navigate_min: Duration,
    navigate_max: Duration,
    backfill: Duration,
}

impl RateLimiter {
    pub fn new(config: &RateConfig) -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
            navigate_min: Duration::from_secs(config.navigation_delay_min_secs),
            navigate_max: Duration::from_secs(config.navigation_delay_max_secs),
            backfill: Duration::from_secs(config.backfill_delay_secs),
        }
    }

    /// Block the calling task until the gate for `(source, class)`
    /// opens, then advance it.
    ///
    /// The check-and-advance happens under one lock acquisition;
    /// sleeping happens outside it, after which the gate is
    /// re-checked (another caller may have claimed the slot first).
    pub async fn await_gate(
        &self,
        source: &str,
        class: OpClass,
        cancel: &CancellationToken,
    ) -> Result<(), CollectError> {
        let key = (source.to_string(), class);
        loop {
            let wait = {
                let mut gates = self.gates.lock().await;
                let now = Instant::now();
                let earliest = gates.get(&key).copied().unwrap_or(now);
                if now >= earliest {
                    gates.insert(key, now + self.delay(class));
                    return Ok(());
                }
                earliest - now
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(CollectError::ShutdownRequested),
                _ = sleep(wait) => {}
            }
        }
    }

    /// Remove every gate belonging to a source. Called when its
    /// collector task is destroyed.
    pub async fn clear(&self, source: &str) {
        self.gates
            .lock()
            .await
            .retain(|(key_source, _), _| key_source != source);
    }

    fn delay(&self, class: OpClass) -> Duration {
        match class {
            OpClass::Navigate => {
                let min = self.navigate_min.as_millis() as u64;
                let max = self.navigate_max.as_millis() as u64;
                Duration::from_millis(if min >= max { min } else { random_range(min..=max) })
            }
            OpClass::Backfill => self.backfill,
        }
    }
}
