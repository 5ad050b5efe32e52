//! Daily collector: finite paging over a date range.
//!
//! Visits one schedule page per date, dwells long enough for the
//! page's API calls to land in the interceptors, and moves on.
//! Backfill runs walk the range newest-first and use the slower
//! backfill gate; upcoming runs walk oldest-first at navigation pace.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::collector::CollectorMode;
use crate::collector::runner::{CollectContext, CollectStrategy};
use crate::config::SourceConfig;
use crate::dispatch::PatternDispatcher;
use crate::error::CollectError;
use crate::handlers::DataHandler;
use crate::intercept::{Interceptor, ResponseInterceptor};
use crate::ratelimit::OpClass;
use crate::util;

/// How long to stay on each date page so its API traffic arrives.
const PAGE_DWELL: Duration = Duration::from_secs(3);

pub struct DailyCollector {
    source: SourceConfig,
    start: NaiveDate,
    end: NaiveDate,
    /// Historical run: slower pacing, newest dates first.
    backfill: bool,
    data: DataHandler,
}

impl DailyCollector {
    pub fn new(
        source: SourceConfig,
        start: NaiveDate,
        end: NaiveDate,
        backfill: bool,
        data: DataHandler,
    ) -> Self {
        Self {
            source,
            start,
            end,
            backfill,
            data,
        }
    }

    fn dates(&self) -> Vec<NaiveDate> {
        let mut dates = Vec::new();
        let mut date = self.start;
        while date <= self.end {
            dates.push(date);
            date = date + chrono::Days::new(1);
        }
        if self.backfill {
            dates.reverse();
        }
        dates
    }

    fn gate_class(&self) -> OpClass {
        if self.backfill {
            OpClass::Backfill
        } else {
            OpClass::Navigate
        }
    }
}

#[async_trait]
impl CollectStrategy for DailyCollector {
    fn collector_id(&self) -> String {
        util::daily_collector_id(&self.source.sport, self.start, self.end)
    }

    fn source_key(&self) -> &str {
        &self.source.sport
    }

    fn mode(&self) -> CollectorMode {
        CollectorMode::Daily
    }

    fn build_interceptors(&self) -> Result<Vec<Arc<dyn Interceptor>>, CollectError> {
        let mut dispatcher = PatternDispatcher::with_default_patterns();
        let handler = self
            .data
            .event_batch_handler(Some(self.source.sport.clone()));
        for pattern in ["scheduled", "inverse"] {
            dispatcher.on(pattern, handler.clone())?;
        }
        Ok(vec![Arc::new(ResponseInterceptor::new(Arc::new(
            dispatcher,
        )))])
    }

    /// Walk the date range.
    ///
    /// A date whose navigation fails is logged and skipped; one bad
    /// day must not abort the rest of the range. Only a run where
    /// every single date failed is reported as a failure, which puts
    /// it under the retry envelope.
    async fn collect(&self, cx: &CollectContext) -> Result<(), CollectError> {
        let dates = self.dates();
        let total = dates.len() as u32;
        cx.report_progress(0, total);
        let mut failures = 0u32;

        for (i, date) in dates.iter().enumerate() {
            if cx.cancel.is_cancelled() {
                return Err(CollectError::ShutdownRequested);
            }
            cx.rate
                .await_gate(&self.source.sport, self.gate_class(), &cx.cancel)
                .await?;

            let url = self.source.daily_url(*date);
            if let Err(e) = cx.pool.navigate(&cx.handle, &url).await {
                if e.is_shutdown() {
                    return Err(e);
                }
                failures += 1;
                log::warn!(
                    "daily '{}': skipping {} after navigation failure: {}",
                    self.source.sport,
                    date,
                    e
                );
                cx.report_progress(i as u32 + 1, total);
                continue;
            }

            tokio::select! {
                _ = cx.cancel.cancelled() => return Err(CollectError::ShutdownRequested),
                _ = tokio::time::sleep(PAGE_DWELL) => {}
            }
            cx.report_progress(i as u32 + 1, total);
        }

        if total > 0 && failures == total {
            return Err(CollectError::TransientNetwork(format!(
                "all {} dates failed for '{}'",
                total, self.source.sport
            )));
        }
        log::info!(
            "daily '{}' finished: {}/{} dates collected",
            self.source.sport,
            total - failures,
            total
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::runner::CollectorRunner;
    use crate::collector::{CollectorShared, CollectorState, RetryPolicy};
    use crate::config::{RateConfig, RetryConfig};
    use crate::engine::mock::MockEngine;
    use crate::pool::BrowserContextPool;
    use crate::ratelimit::RateLimiter;
    use crate::storage::StoreHandle;
    use tokio_util::sync::CancellationToken;

    fn football_source() -> SourceConfig {
        SourceConfig {
            sport: "football".into(),
            enabled: true,
            live_url: "https://x/football".into(),
            daily_url_template: "https://x/football/{date}".into(),
        }
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, d).unwrap()
    }

    fn collector(start: u32, end: u32, backfill: bool) -> DailyCollector {
        DailyCollector::new(
            football_source(),
            date(start),
            date(end),
            backfill,
            DataHandler::new(StoreHandle::spawn()),
        )
    }

    async fn run_to_completion(
        engine: Arc<MockEngine>,
        strategy: DailyCollector,
    ) -> Arc<std::sync::Mutex<CollectorShared>> {
        let runner = CollectorRunner::new(
            Arc::new(BrowserContextPool::new(engine, Duration::from_secs(5))),
            Arc::new(RateLimiter::new(&RateConfig::default())),
            RetryPolicy::new(&RetryConfig::default()),
        );
        let shared = CollectorShared::new(
            strategy.collector_id(),
            "football".into(),
            CollectorMode::Daily,
        );
        runner
            .run(Arc::new(strategy), shared.clone(), CancellationToken::new())
            .await;
        shared
    }

    #[tokio::test]
    async fn upcoming_walks_forward_and_backfill_backward() {
        let upcoming = collector(20, 22, false);
        assert_eq!(upcoming.dates(), vec![date(20), date(21), date(22)]);
        assert_eq!(upcoming.gate_class(), OpClass::Navigate);

        let backfill = collector(20, 22, true);
        assert_eq!(backfill.dates(), vec![date(22), date(21), date(20)]);
        assert_eq!(backfill.gate_class(), OpClass::Backfill);
    }

    #[tokio::test]
    async fn single_day_range_is_one_date() {
        assert_eq!(collector(24, 24, false).dates(), vec![date(24)]);
    }

    #[tokio::test(start_paused = true)]
    async fn visits_every_date_and_stops() {
        let engine = MockEngine::new();
        let shared = run_to_completion(engine.clone(), collector(20, 22, false)).await;

        {
            let s = shared.lock().unwrap();
            assert_eq!(s.state, CollectorState::Stopped);
            assert_eq!(s.progress, Some((3, 3)));
        }
        let page = engine.last_page().unwrap();
        assert_eq!(
            page.visited(),
            vec![
                "https://x/football/2026-08-20".to_string(),
                "https://x/football/2026-08-21".to_string(),
                "https://x/football/2026-08-22".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_date_is_skipped_not_fatal() {
        let engine = MockEngine::new();
        engine.fail_next_navigations(1);
        let shared = run_to_completion(engine.clone(), collector(20, 22, false)).await;

        {
            let s = shared.lock().unwrap();
            assert_eq!(s.state, CollectorState::Stopped);
            assert_eq!(s.attempt, 0);
            assert_eq!(s.progress, Some((3, 3)));
        }
        // The first date was lost, the rest were visited.
        let page = engine.last_page().unwrap();
        assert_eq!(page.visited().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn all_dates_failing_is_recoverable() {
        let engine = MockEngine::new();
        // First attempt loses every date, the retry succeeds.
        engine.fail_next_navigations(3);
        let shared = run_to_completion(engine.clone(), collector(20, 22, false)).await;

        let s = shared.lock().unwrap();
        assert_eq!(s.state, CollectorState::Stopped);
        assert_eq!(s.attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_walk() {
        let engine = MockEngine::new();
        let runner = CollectorRunner::new(
            Arc::new(BrowserContextPool::new(
                engine.clone(),
                Duration::from_secs(5),
            )),
            Arc::new(RateLimiter::new(&RateConfig::default())),
            RetryPolicy::new(&RetryConfig::default()),
        );
        let strategy = Arc::new(collector(1, 28, true));
        let shared = CollectorShared::new(
            strategy.collector_id(),
            "football".into(),
            CollectorMode::Daily,
        );
        let cancel = CancellationToken::new();

        let task = {
            let shared = shared.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { runner.run(strategy, shared, cancel).await })
        };

        // A couple of dates in, pull the plug.
        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        task.await.unwrap();

        let s = shared.lock().unwrap();
        assert_eq!(s.state, CollectorState::Stopped);
        let (done, total) = s.progress.unwrap();
        assert_eq!(total, 28);
        assert!(done < total);
    }
}
