/// Browser engine capability interface.
///
/// The capture pipeline never talks to a browser directly; it drives
/// an external engine through these traits. The engine is assumed to
/// deliver network events in real time and to support context
/// isolation; everything else about its internals is opaque.
///
/// DESIGN:
/// - One trait per engine object (engine / context / page), mirroring
///   the isolation hierarchy: the engine hosts many contexts, each
///   context owns an independent cookie/storage jar, each page lives
///   inside exactly one context.
/// - Listener registrations persist until `clear_listeners`; the
///   pool clears and re-attaches interceptors around each refresh so
///   handlers never observe stale wiring.
pub mod cdp;
#[cfg(test)]
pub mod mock;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CollectError;

/// An HTTP response the page received, as observed by the engine.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub url: String,
    pub status: u16,
    pub content_type: String,
    /// Raw body text; interceptors parse it lazily
    pub body: String,
}

impl PageResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_json(&self) -> bool {
        self.content_type.contains("application/json")
    }
}

/// Lifecycle of a WebSocket connection the page opened.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    Opened { id: String, url: String },
    /// A received frame. `payload` is the raw frame text.
    Frame { id: String, payload: String },
    Closed { id: String },
}

/// Callback invoked for every response the page receives.
///
/// CONTRACT:
/// - Must not block the scheduler; parse + handoff only.
pub type ResponseCallback = Arc<dyn Fn(PageResponse) + Send + Sync>;

/// Callback invoked for every WebSocket lifecycle event on the page.
pub type SocketCallback = Arc<dyn Fn(SocketEvent) + Send + Sync>;

/// The engine itself: a running browser reachable over its control
/// channel.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Create an isolated browsing context (independent cookie and
    /// storage jar).
    async fn create_context(&self) -> Result<Arc<dyn BrowserContext>, CollectError>;

    /// Tear down the control connection. Idempotent.
    async fn close(&self) -> Result<(), CollectError>;
}

/// An isolated browsing session inside the engine.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn new_page(&self) -> Result<Arc<dyn Page>, CollectError>;

    /// Close the context and everything in it. Idempotent.
    async fn close(&self) -> Result<(), CollectError>;
}

/// A single page (tab) inside a context.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate and wait for the load to settle.
    ///
    /// A timeout is a recoverable error for the caller, not a crash.
    /// Registered listeners keep firing across the navigation, so
    /// traffic during the load is observed.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), CollectError>;

    /// Reload the current document. Listener registrations persist,
    /// like `navigate`.
    async fn reload(&self, timeout: Duration) -> Result<(), CollectError>;

    /// Subscribe to the page's response stream.
    fn on_response(&self, callback: ResponseCallback);

    /// Subscribe to WebSocket lifecycle events on the page.
    fn on_websocket(&self, callback: SocketCallback);

    /// Drop every registered listener. Used on release.
    fn clear_listeners(&self);

    fn is_closed(&self) -> bool;

    /// Close the page. Idempotent.
    async fn close(&self) -> Result<(), CollectError>;
}

/// Parse a frame or body as JSON, if it is JSON.
///
/// Shared by interceptors; kept here so both HTTP and WS paths treat
/// malformed payloads identically (drop, never retry).
pub fn parse_json_payload(raw: &str) -> Option<Value> {
    serde_json::from_str(raw).ok()
}
