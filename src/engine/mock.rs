//! Scripted in-memory engine for tests.
//!
//! Lets tests inject responses and WebSocket frames into pages, fail
//! navigations on demand, and assert on teardown ordering without a
//! real browser anywhere near the test suite.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    BrowserContext, BrowserEngine, Page, PageResponse, ResponseCallback, SocketCallback,
    SocketEvent,
};
use crate::error::CollectError;

/// Shared recorder for lifecycle ordering assertions.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub struct MockEngine {
    pub log: EventLog,
    contexts: Mutex<Vec<Arc<MockContext>>>,
    fail_navigations: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Arc::new(Mutex::new(Vec::new())),
            contexts: Mutex::new(Vec::new()),
            fail_navigations: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        })
    }

    /// Make the next `n` navigations (or reloads) fail with a
    /// navigation timeout.
    pub fn fail_next_navigations(&self, n: usize) {
        self.fail_navigations.store(n, Ordering::SeqCst);
    }

    pub fn context(&self, idx: usize) -> Arc<MockContext> {
        self.contexts.lock().unwrap()[idx].clone()
    }

    pub fn context_count(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }

    /// The most recently created page, if any.
    pub fn last_page(&self) -> Option<Arc<MockPage>> {
        let contexts = self.contexts.lock().unwrap();
        contexts.iter().rev().find_map(|c| c.last_page())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserEngine for MockEngine {
    async fn create_context(&self) -> Result<Arc<dyn BrowserContext>, CollectError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CollectError::ResourceExhausted("engine closed".into()));
        }
        let ctx = Arc::new(MockContext {
            log: self.log.clone(),
            pages: Mutex::new(Vec::new()),
            fail_navigations: self.fail_navigations.clone(),
            closed: AtomicBool::new(false),
        });
        self.contexts.lock().unwrap().push(ctx.clone());
        self.log.lock().unwrap().push("context created".into());
        Ok(ctx)
    }

    async fn close(&self) -> Result<(), CollectError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.log.lock().unwrap().push("engine closed".into());
        }
        Ok(())
    }
}

pub struct MockContext {
    log: EventLog,
    pages: Mutex<Vec<Arc<MockPage>>>,
    fail_navigations: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl MockContext {
    pub fn last_page(&self) -> Option<Arc<MockPage>> {
        self.pages.lock().unwrap().last().cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserContext for MockContext {
    async fn new_page(&self) -> Result<Arc<dyn Page>, CollectError> {
        let page = Arc::new(MockPage {
            log: self.log.clone(),
            navigations: Mutex::new(Vec::new()),
            response_callbacks: Mutex::new(Vec::new()),
            socket_callbacks: Mutex::new(Vec::new()),
            fail_navigations: self.fail_navigations.clone(),
            closed: AtomicBool::new(false),
        });
        self.pages.lock().unwrap().push(page.clone());
        self.log.lock().unwrap().push("page created".into());
        Ok(page)
    }

    async fn close(&self) -> Result<(), CollectError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.log.lock().unwrap().push("context closed".into());
        }
        Ok(())
    }
}

pub struct MockPage {
    log: EventLog,
    navigations: Mutex<Vec<String>>,
    response_callbacks: Mutex<Vec<ResponseCallback>>,
    socket_callbacks: Mutex<Vec<SocketCallback>>,
    fail_navigations: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl MockPage {
    /// Deliver a response to every registered response listener.
    pub fn emit_response(&self, response: PageResponse) {
        let callbacks = self.response_callbacks.lock().unwrap().clone();
        for cb in callbacks {
            cb(response.clone());
        }
    }

    /// Deliver a socket event to every registered socket listener.
    pub fn emit_socket(&self, event: SocketEvent) {
        let callbacks = self.socket_callbacks.lock().unwrap().clone();
        for cb in callbacks {
            cb(event.clone());
        }
    }

    /// Convenience: a 200 JSON response for `url`.
    pub fn emit_json(&self, url: &str, body: &str) {
        self.emit_response(PageResponse {
            url: url.to_string(),
            status: 200,
            content_type: "application/json; charset=utf-8".to_string(),
            body: body.to_string(),
        });
    }

    pub fn visited(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.response_callbacks.lock().unwrap().len()
            + self.socket_callbacks.lock().unwrap().len()
    }

    fn take_navigation_failure(&self) -> bool {
        self.fail_navigations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Page for MockPage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), CollectError> {
        if self.take_navigation_failure() {
            return Err(CollectError::NavigationTimeout(timeout, url.to_string()));
        }
        self.navigations.lock().unwrap().push(url.to_string());
        self.log.lock().unwrap().push(format!("navigate {}", url));
        Ok(())
    }

    async fn reload(&self, timeout: Duration) -> Result<(), CollectError> {
        if self.take_navigation_failure() {
            return Err(CollectError::NavigationTimeout(timeout, "reload".into()));
        }
        self.navigations.lock().unwrap().push("reload".to_string());
        self.log.lock().unwrap().push("reload".into());
        Ok(())
    }

    fn on_response(&self, callback: ResponseCallback) {
        self.response_callbacks.lock().unwrap().push(callback);
    }

    fn on_websocket(&self, callback: SocketCallback) {
        self.socket_callbacks.lock().unwrap().push(callback);
    }

    fn clear_listeners(&self) {
        self.response_callbacks.lock().unwrap().clear();
        self.socket_callbacks.lock().unwrap().clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), CollectError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.log.lock().unwrap().push("page closed".into());
        }
        Ok(())
    }
}
