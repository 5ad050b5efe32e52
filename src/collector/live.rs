//! Live tracker: permanent residence on a sport's live page.
//!
//! Navigates once, lets the site's own polling and push feeds flow
//! through the interceptors, and relies on the pool's periodic
//! refresh to keep the session warm. The strategy itself then just
//! parks until cancelled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::collector::CollectorMode;
use crate::collector::runner::{CollectContext, CollectStrategy};
use crate::config::SourceConfig;
use crate::dispatch::PatternDispatcher;
use crate::error::CollectError;
use crate::handlers::DataHandler;
use crate::intercept::{InterceptMode, Interceptor, ResponseInterceptor, StreamInterceptor};
use crate::ratelimit::OpClass;
use crate::util;

/// Event-summary patterns a live tracker subscribes to.
const SUMMARY_PATTERNS: &[&str] = &["scheduled", "inverse", "live", "featured"];

pub struct LiveTracker {
    source: SourceConfig,
    refresh_interval: Duration,
    data: DataHandler,
}

impl LiveTracker {
    pub fn new(source: SourceConfig, refresh_interval: Duration, data: DataHandler) -> Self {
        Self {
            source,
            refresh_interval,
            data,
        }
    }
}

#[async_trait]
impl CollectStrategy for LiveTracker {
    fn collector_id(&self) -> String {
        util::live_collector_id(&self.source.sport)
    }

    fn source_key(&self) -> &str {
        &self.source.sport
    }

    fn mode(&self) -> CollectorMode {
        CollectorMode::Live
    }

    fn build_interceptors(&self) -> Result<Vec<Arc<dyn Interceptor>>, CollectError> {
        let mut dispatcher = PatternDispatcher::with_default_patterns();
        let handler = self
            .data
            .event_batch_handler(Some(self.source.sport.clone()));
        for pattern in SUMMARY_PATTERNS {
            dispatcher.on(pattern, handler.clone())?;
        }

        let stream = StreamInterceptor::new(InterceptMode::LiveScore);
        stream.on_score_update(self.data.score_handler());
        stream.on_incident(self.data.incident_handler());

        Ok(vec![
            Arc::new(ResponseInterceptor::new(Arc::new(dispatcher))),
            Arc::new(stream),
        ])
    }

    async fn collect(&self, cx: &CollectContext) -> Result<(), CollectError> {
        cx.rate
            .await_gate(&self.source.sport, OpClass::Navigate, &cx.cancel)
            .await?;
        cx.pool.navigate(&cx.handle, &self.source.live_url).await?;
        cx.pool
            .start_periodic_refresh(&cx.handle, self.refresh_interval);

        // Data flows through the interceptors from here on; the task
        // itself only waits for shutdown.
        cx.cancel.cancelled().await;
        Err(CollectError::ShutdownRequested)
    }
}
