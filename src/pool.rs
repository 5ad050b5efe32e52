use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::{BrowserContext, BrowserEngine, Page};
use crate::error::CollectError;
use crate::intercept::Interceptor;
use crate::metrics::METRICS;

/// A live browsing session for one source.
///
/// INVARIANT:
/// - At most one handle exists per source key at any time. The pool
///   enforces this; a second `acquire` for an active key fails with
///   `AlreadyActive` instead of silently replacing the first.
/// - All operations on one handle are serialized by its owning
///   collector task; the pool never runs refresh and release
///   concurrently for the same handle.
pub struct BrowserContextHandle {
    source_key: String,
    context: Arc<dyn BrowserContext>,
    page: Arc<dyn Page>,
    /// Interceptors currently wired to the page; re-attached after
    /// every refresh.
    interceptors: Mutex<Vec<Arc<dyn Interceptor>>>,
    refresh: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    released: AtomicBool,
}

impl BrowserContextHandle {
    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    pub fn page(&self) -> &Arc<dyn Page> {
        &self.page
    }
}

/// Owns one isolated browsing session per data source.
///
/// Responsibilities:
/// - Context/page creation with per-source isolation
/// - Navigation with a bounded wait
/// - Periodic page refresh that is invisible to registered handlers
///   (interceptors are re-attached right after each reload)
/// - Ordered teardown: interceptors detach before the page closes,
///   the page closes before the context closes
pub struct BrowserContextPool {
    engine: Arc<dyn BrowserEngine>,
    active: Mutex<HashSet<String>>,
    navigation_timeout: Duration,
    shut_down: AtomicBool,
}

impl BrowserContextPool {
    pub fn new(engine: Arc<dyn BrowserEngine>, navigation_timeout: Duration) -> Self {
        Self {
            engine,
            active: Mutex::new(HashSet::new()),
            navigation_timeout,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Create an isolated context and page for `source_key`.
    ///
    /// Fails with `AlreadyActive` if a handle already exists for the
    /// key; replacing a handle requires an explicit release first.
    pub async fn acquire(
        &self,
        source_key: &str,
    ) -> Result<Arc<BrowserContextHandle>, CollectError> {
        {
            let mut active = self.active.lock().unwrap();
            if !active.insert(source_key.to_string()) {
                return Err(CollectError::AlreadyActive(source_key.to_string()));
            }
        }

        let context = match self.engine.create_context().await {
            Ok(context) => context,
            Err(e) => {
                self.active.lock().unwrap().remove(source_key);
                return Err(e);
            }
        };
        let page = match context.new_page().await {
            Ok(page) => page,
            Err(e) => {
                let _ = context.close().await;
                self.active.lock().unwrap().remove(source_key);
                return Err(e);
            }
        };

        METRICS.contexts_active.fetch_add(1, Ordering::Relaxed);
        log::info!("browser context created for '{}'", source_key);

        Ok(Arc::new(BrowserContextHandle {
            source_key: source_key.to_string(),
            context,
            page,
            interceptors: Mutex::new(Vec::new()),
            refresh: Mutex::new(None),
            released: AtomicBool::new(false),
        }))
    }

    /// Wire an interceptor to the handle's page and remember it so
    /// refreshes can re-attach it.
    pub fn attach(&self, handle: &BrowserContextHandle, interceptor: Arc<dyn Interceptor>) {
        interceptor.attach(&*handle.page);
        handle.interceptors.lock().unwrap().push(interceptor);
    }

    /// Navigate the handle's page and wait for the load to settle.
    ///
    /// A timeout is recoverable for the caller, not a crash.
    pub async fn navigate(
        &self,
        handle: &BrowserContextHandle,
        url: &str,
    ) -> Result<(), CollectError> {
        log::info!("navigating '{}' to {}", handle.source_key, url);
        handle
            .page
            .navigate(url, self.navigation_timeout)
            .await
            .inspect_err(|e| {
                METRICS.navigation_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("navigation failed for '{}': {}", handle.source_key, e);
            })
    }

    /// Reload the handle's page every `interval` to keep the session
    /// alive. After each reload the registered interceptors are
    /// re-attached, so the refresh is invisible to handlers except
    /// for the brief reconnection gap. Reload failures are logged and
    /// the timer keeps trying.
    pub fn start_periodic_refresh(
        &self,
        handle: &Arc<BrowserContextHandle>,
        interval: Duration,
    ) {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let task_handle = handle.clone();
        let navigation_timeout = self.navigation_timeout;

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if task_handle.page.is_closed() {
                    log::warn!(
                        "page closed for '{}', stopping refresh timer",
                        task_handle.source_key
                    );
                    break;
                }

                log::info!("refreshing page for '{}'", task_handle.source_key);
                let reloaded = tokio::select! {
                    _ = task_token.cancelled() => break,
                    r = task_handle.page.reload(navigation_timeout) => r,
                };
                match reloaded {
                    Ok(()) => {
                        // Restore the exact interception wiring that
                        // was active before the reload.
                        task_handle.page.clear_listeners();
                        let interceptors = task_handle.interceptors.lock().unwrap().clone();
                        for interceptor in interceptors {
                            interceptor.attach(&*task_handle.page);
                        }
                        METRICS.page_refreshes.fetch_add(1, Ordering::Relaxed);
                        log::debug!("page refreshed for '{}'", task_handle.source_key);
                    }
                    Err(e) => {
                        log::error!(
                            "refresh failed for '{}': {}",
                            task_handle.source_key,
                            e
                        );
                    }
                }
            }
        });

        let mut refresh = handle.refresh.lock().unwrap();
        if let Some((old_token, _)) = refresh.replace((token, join)) {
            old_token.cancel();
        }
        log::info!(
            "started periodic refresh for '{}' (interval {:?})",
            handle.source_key,
            interval
        );
    }

    /// Tear down a handle.
    ///
    /// Order matters: refresh timer stops, interceptors detach, the
    /// page closes, then the context closes. Idempotent: releasing
    /// an already-released handle is a no-op.
    pub async fn release(&self, handle: &BrowserContextHandle) {
        if handle.released.swap(true, Ordering::SeqCst) {
            return;
        }

        let refresh = handle.refresh.lock().unwrap().take();
        if let Some((token, join)) = refresh {
            token.cancel();
            let _ = join.await;
        }

        handle.page.clear_listeners();
        handle.interceptors.lock().unwrap().clear();

        if let Err(e) = handle.page.close().await {
            log::warn!("closing page for '{}': {}", handle.source_key, e);
        }
        if let Err(e) = handle.context.close().await {
            log::warn!("closing context for '{}': {}", handle.source_key, e);
        }

        self.active.lock().unwrap().remove(&handle.source_key);
        METRICS.contexts_active.fetch_sub(1, Ordering::Relaxed);
        log::info!("browser context released for '{}'", handle.source_key);
    }

    /// Tear down the engine connection. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.engine.close().await {
            log::warn!("engine close: {}", e);
        }
    }
}
