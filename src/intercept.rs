use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::dispatch::{EventSource, PatternDispatcher};
use crate::engine::{Page, PageResponse, SocketEvent, parse_json_payload};
use crate::metrics::METRICS;

/// An adapter that can be attached to a page and survives page
/// refresh: the pool re-attaches every registered interceptor after a
/// reload, so refresh is invisible to handlers except for the brief
/// reconnection gap.
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Subscribe to the page streams this interceptor consumes.
    ///
    /// Called once on setup and again after every refresh. Must be
    /// idempotent with respect to the interceptor's own state.
    fn attach(&self, page: &dyn Page);
}

// ------------------------------------------------------------
// HTTP response interception
// ------------------------------------------------------------

/// Turns the page's response stream into dispatcher invocations.
///
/// Filtering:
/// - only successful (2xx) responses
/// - only JSON-bearing responses
/// - the body is parsed lazily, and only once at least one pattern
///   with a registered handler matches the URL. Irrelevant traffic
///   never pays the parsing cost.
///
/// A body that fails to parse is logged and dropped; bad upstream
/// data is never retried.
pub struct ResponseInterceptor {
    dispatcher: Arc<PatternDispatcher>,
}

impl ResponseInterceptor {
    pub fn new(dispatcher: Arc<PatternDispatcher>) -> Self {
        Self { dispatcher }
    }

    fn process(dispatcher: &PatternDispatcher, response: PageResponse) {
        METRICS.responses_seen.fetch_add(1, Ordering::Relaxed);

        if !response.ok() {
            log::debug!(
                "skipping non-OK response: {} (status {})",
                response.url,
                response.status
            );
            return;
        }
        if !response.is_json() {
            log::debug!("skipping non-JSON response: {}", response.url);
            return;
        }
        if !dispatcher.wants(&response.url) {
            return;
        }

        let Some(body) = parse_json_payload(&response.body) else {
            METRICS.parse_errors.fetch_add(1, Ordering::Relaxed);
            log::warn!("failed to parse JSON body from {}", response.url);
            return;
        };

        METRICS.responses_matched.fetch_add(1, Ordering::Relaxed);
        log::info!("intercepted {}", response.url);
        dispatcher.dispatch(EventSource::Http, &response.url, &body);
    }
}

impl Interceptor for ResponseInterceptor {
    fn name(&self) -> &'static str {
        "http"
    }

    fn attach(&self, page: &dyn Page) {
        let dispatcher = self.dispatcher.clone();
        page.on_response(Arc::new(move |response| {
            Self::process(&dispatcher, response);
        }));
        log::debug!("response interceptor attached");
    }
}

// ------------------------------------------------------------
// WebSocket interception
// ------------------------------------------------------------

/// Handler for a parsed WebSocket frame.
pub type FrameHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Demultiplexing behavior of a [`StreamInterceptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptMode {
    /// Every parsed frame goes to all `on_message` handlers.
    Generic,
    /// Frames are routed by their `type` discriminator into score and
    /// incident channels; unrecognized types fall through to the
    /// generic handlers if any are registered, otherwise they are
    /// dropped with a debug log.
    LiveScore,
}

/// Message types announcing a score change.
const SCORE_TYPES: &[&str] = &["score", "scoreChange", "scoreUpdate"];

/// Message types announcing a match incident.
const INCIDENT_TYPES: &[&str] = &["incident", "incidentChange", "newIncident"];

struct StreamState {
    mode: InterceptMode,
    message_handlers: Mutex<Vec<FrameHandler>>,
    score_handlers: Mutex<Vec<FrameHandler>>,
    incident_handlers: Mutex<Vec<FrameHandler>>,
    /// Socket ids currently open on the page. Closed connections are
    /// pruned; a page that reopens a socket is picked up transparently
    /// because the page-level subscription survives the socket.
    connections: Mutex<HashSet<String>>,
}

/// Turns WebSocket frames on a page into handler invocations.
pub struct StreamInterceptor {
    state: Arc<StreamState>,
}

impl StreamInterceptor {
    pub fn new(mode: InterceptMode) -> Self {
        Self {
            state: Arc::new(StreamState {
                mode,
                message_handlers: Mutex::new(Vec::new()),
                score_handlers: Mutex::new(Vec::new()),
                incident_handlers: Mutex::new(Vec::new()),
                connections: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Register a handler receiving every parsed frame (generic
    /// channel).
    pub fn on_message(&self, handler: FrameHandler) {
        self.state.message_handlers.lock().unwrap().push(handler);
    }

    /// Register a handler on the score-update channel (live-score
    /// mode).
    pub fn on_score_update(&self, handler: FrameHandler) {
        self.state.score_handlers.lock().unwrap().push(handler);
    }

    /// Register a handler on the incident channel (live-score mode).
    pub fn on_incident(&self, handler: FrameHandler) {
        self.state.incident_handlers.lock().unwrap().push(handler);
    }

    /// Number of currently tracked open connections.
    pub fn active_connections(&self) -> usize {
        self.state.connections.lock().unwrap().len()
    }
}

impl StreamState {
    fn handle(&self, event: SocketEvent) {
        match event {
            SocketEvent::Opened { id, url } => {
                log::info!("websocket opened: {}", url);
                self.connections.lock().unwrap().insert(id);
            }
            SocketEvent::Closed { id } => {
                log::info!("websocket closed");
                self.connections.lock().unwrap().remove(&id);
            }
            SocketEvent::Frame { id, payload } => {
                // A frame on an untracked socket means the page
                // reopened one; track it and keep going.
                self.connections.lock().unwrap().insert(id);
                METRICS.ws_frames_seen.fetch_add(1, Ordering::Relaxed);

                let Some(data) = parse_json_payload(&payload) else {
                    log::debug!("non-JSON websocket frame dropped");
                    return;
                };
                self.route(&data);
            }
        }
    }

    fn route(&self, data: &Value) {
        if self.mode == InterceptMode::LiveScore {
            let message_type = data.get("type").and_then(Value::as_str).unwrap_or("");
            if SCORE_TYPES.contains(&message_type) {
                Self::invoke(&self.score_handlers, data);
                return;
            }
            if INCIDENT_TYPES.contains(&message_type) {
                Self::invoke(&self.incident_handlers, data);
                return;
            }
            if self.message_handlers.lock().unwrap().is_empty() {
                log::debug!("unrecognized frame type '{}' dropped", message_type);
                return;
            }
        }
        Self::invoke(&self.message_handlers, data);
    }

    fn invoke(handlers: &Mutex<Vec<FrameHandler>>, data: &Value) {
        let handlers = handlers.lock().unwrap().clone();
        for handler in handlers {
            handler(data);
        }
    }
}

impl Interceptor for StreamInterceptor {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn attach(&self, page: &dyn Page) {
        let state = self.state.clone();
        page.on_websocket(Arc::new(move |event| state.handle(event)));
        log::debug!("stream interceptor attached");
    }
}
