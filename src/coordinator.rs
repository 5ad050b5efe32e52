//! Orchestrates collector tasks.
//!
//! The coordinator is the only place collectors are created, looked
//! up, and destroyed. It owns an explicit registry keyed by collector
//! id; there is no global state anywhere in the pipeline.
//!
//! GUARANTEES:
//! - Isolated failure domains: one collector going `Failed` never
//!   touches its siblings; each runs in its own task with its own
//!   browser context and cancellation token.
//! - Destroying a collector is idempotent and always runs the full
//!   cleanup chain (cancel, join, rate-gate clearing inside the
//!   runner), even for a task that already went terminal on its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collector::runner::{CollectStrategy, CollectorRunner};
use crate::collector::daily::DailyCollector;
use crate::collector::live::LiveTracker;
use crate::collector::{CollectorShared, CollectorStatus, RetryPolicy};
use crate::config::Config;
use crate::error::CollectError;
use crate::handlers::DataHandler;
use crate::pool::BrowserContextPool;
use crate::ratelimit::RateLimiter;
use crate::storage::StoreHandle;

struct CollectorEntry {
    shared: Arc<Mutex<CollectorShared>>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

pub struct Coordinator {
    config: Config,
    pool: Arc<BrowserContextPool>,
    rate: Arc<RateLimiter>,
    data: DataHandler,
    policy: RetryPolicy,
    registry: Mutex<HashMap<String, CollectorEntry>>,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(config: Config, pool: Arc<BrowserContextPool>, store: StoreHandle) -> Self {
        let rate = Arc::new(RateLimiter::new(&config.rate));
        let policy = RetryPolicy::new(&config.retry);
        Self {
            config,
            pool,
            rate,
            data: DataHandler::new(store),
            policy,
            registry: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start a live tracker for one sport.
    ///
    /// Unknown sports are a configuration error. A tracker that
    /// already exists for the sport is left alone (warn + no-op);
    /// replacing it requires `remove` first.
    pub fn add_live_tracker(&self, sport: &str) -> Result<(), CollectError> {
        let source = self.source(sport)?;
        let strategy = Arc::new(LiveTracker::new(
            source,
            self.config.browser.refresh_interval(),
            self.data.clone(),
        ));
        self.spawn(strategy)
    }

    /// Start live trackers for every enabled source.
    pub fn add_live_trackers_for_all_sports(&self) {
        for sport in self.config.enabled_sports() {
            if let Err(e) = self.add_live_tracker(&sport) {
                log::error!("live tracker for '{}' not started: {}", sport, e);
            }
        }
    }

    /// Start a daily collector over an inclusive date range.
    pub fn add_daily_collector(
        &self,
        sport: &str,
        start: NaiveDate,
        end: NaiveDate,
        backfill: bool,
    ) -> Result<(), CollectError> {
        if start > end {
            return Err(CollectError::InvalidSource(format!(
                "date range {}..{} is inverted",
                start, end
            )));
        }
        let source = self.source(sport)?;
        let strategy = Arc::new(DailyCollector::new(
            source,
            start,
            end,
            backfill,
            self.data.clone(),
        ));
        self.spawn(strategy)
    }

    /// Page through the coming days for one sport.
    pub fn collect_upcoming_matches(&self, sport: &str, days_ahead: u64) -> Result<(), CollectError> {
        let today = chrono::Utc::now().date_naive();
        self.add_daily_collector(sport, today, today + chrono::Days::new(days_ahead), false)
    }

    /// Page backwards through history for one sport, at backfill
    /// pace.
    pub fn backfill_historical_data(&self, sport: &str, days_back: u64) -> Result<(), CollectError> {
        let today = chrono::Utc::now().date_naive();
        self.add_daily_collector(sport, today - chrono::Days::new(days_back), today, true)
    }

    /// Cancel a collector and wait for its cleanup to finish.
    ///
    /// Removing an id that does not exist, or one already removed by
    /// a concurrent caller, is a no-op.
    pub async fn remove(&self, id: &str) {
        let entry = self.registry.lock().unwrap().remove(id);
        let Some(entry) = entry else {
            log::debug!("remove: no collector '{}'", id);
            return;
        };
        entry.cancel.cancel();
        if let Err(e) = entry.join.await {
            log::warn!("collector '{}' task join: {}", id, e);
        }
        log::info!("collector '{}' removed", id);
    }

    /// Status snapshot of every known collector, including ones that
    /// already reached a terminal state.
    pub fn get_status(&self) -> Vec<CollectorStatus> {
        let registry = self.registry.lock().unwrap();
        let mut statuses: Vec<CollectorStatus> = registry
            .values()
            .map(|e| e.shared.lock().unwrap().snapshot())
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    /// Run until Ctrl-C or an explicit shutdown, then tear everything
    /// down in order.
    pub async fn run_forever(&self) {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupt received, shutting down");
            }
            _ = self.shutdown.cancelled() => {
                log::info!("shutdown requested");
            }
        }
        self.shutdown_all().await;
    }

    /// Trigger `run_forever` to unwind without a signal.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Cancel and join every collector, then close the engine.
    /// Idempotent; concurrent callers each drain whatever is left.
    pub async fn shutdown_all(&self) {
        loop {
            let ids: Vec<String> = self.registry.lock().unwrap().keys().cloned().collect();
            if ids.is_empty() {
                break;
            }
            for id in ids {
                self.remove(&id).await;
            }
        }
        self.pool.shutdown().await;
        log::info!("coordinator shut down");
    }

    fn source(&self, sport: &str) -> Result<crate::config::SourceConfig, CollectError> {
        self.config
            .source(sport)
            .cloned()
            .ok_or_else(|| CollectError::InvalidSource(format!("unknown sport '{}'", sport)))
    }

    fn spawn(&self, strategy: Arc<dyn CollectStrategy>) -> Result<(), CollectError> {
        let id = strategy.collector_id();
        let mut registry = self.registry.lock().unwrap();
        if registry.contains_key(&id) {
            log::warn!("collector '{}' already exists, ignoring", id);
            return Ok(());
        }

        let shared = CollectorShared::new(
            id.clone(),
            strategy.source_key().to_string(),
            strategy.mode(),
        );
        let cancel = self.shutdown.child_token();
        let runner = CollectorRunner::new(
            self.pool.clone(),
            self.rate.clone(),
            self.policy.clone(),
        );

        let join = {
            let shared = shared.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                runner.run(strategy, shared, cancel).await;
            })
        };

        registry.insert(
            id.clone(),
            CollectorEntry {
                shared,
                cancel,
                join,
            },
        );
        log::info!("collector '{}' registered", id);
        Ok(())
    }
}
