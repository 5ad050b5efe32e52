//! Chrome DevTools Protocol implementation of the engine capability
//! interface.
//!
//! One WebSocket connection to the browser carries everything:
//! commands are matched to responses by id, protocol events fan out
//! to per-session subscribers. Context isolation maps onto CDP
//! browser contexts, pages onto flat-attached targets.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Notify, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{
    BrowserContext, BrowserEngine, Page, PageResponse, ResponseCallback, SocketCallback,
    SocketEvent,
};
use crate::error::CollectError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Callback invoked with the `params` object of a protocol event.
type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// How long to wait for the browser to answer a single command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Low-level protocol client: command/response matching plus event
/// fan-out.
///
/// DESIGN:
/// - Single WebSocket per browser; sessions multiplex over it.
/// - No locks on the receive path; pending map and subscriber map
///   are concurrent.
/// - Fail fast: a command error is returned to the caller, no
///   internal retrying.
pub struct CdpClient {
    next_id: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<Value>>,
    /// Key: "{session_id}\u{0}{method}" ("" session for browser-level
    /// events).
    subscribers: DashMap<String, Vec<EventCallback>>,
    sink: tokio::sync::Mutex<WsSink>,
    closed: AtomicBool,
}

fn subscriber_key(session_id: &str, method: &str) -> String {
    format!("{}\u{0}{}", session_id, method)
}

impl CdpClient {
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>, CollectError> {
        let (ws, _) = connect_async(ws_url)
            .await
            .map_err(|e| CollectError::TransientNetwork(format!("cdp connect: {}", e)))?;
        let (sink, mut stream) = ws.split();

        let client = Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            subscribers: DashMap::new(),
            sink: tokio::sync::Mutex::new(sink),
            closed: AtomicBool::new(false),
        });

        // Reader task: route responses to pending commands, events to
        // subscribers. Exits when the socket closes.
        let reader = client.clone();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => reader.route_message(text.as_str()),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("cdp socket error: {}", e);
                        break;
                    }
                }
            }
            reader.closed.store(true, Ordering::SeqCst);
            reader.pending.clear();
            log::info!("cdp connection closed");
        });

        Ok(client)
    }

    fn route_message(&self, raw: &str) {
        let msg: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("unparseable cdp message: {}", e);
                return;
            }
        };

        if let Some(id) = msg.get("id").and_then(Value::as_u64) {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(msg);
            }
            return;
        }

        let Some(method) = msg.get("method").and_then(Value::as_str) else {
            return;
        };
        let session = msg.get("sessionId").and_then(Value::as_str).unwrap_or("");
        let params = msg.get("params").cloned().unwrap_or(Value::Null);
        if let Some(subs) = self.subscribers.get(&subscriber_key(session, method)) {
            for cb in subs.iter() {
                cb(&params);
            }
        }
    }

    /// Send a command, optionally scoped to a session, and wait for
    /// its response's `result` object.
    pub async fn send(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, CollectError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CollectError::ResourceExhausted("cdp connection closed".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut request = json!({ "id": id, "method": method, "params": params });
        if let Some(session) = session_id {
            request["sessionId"] = json!(session);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Text(request.to_string().into()))
                .await
                .map_err(|e| {
                    self.pending.remove(&id);
                    CollectError::TransientNetwork(format!("cdp send: {}", e))
                })?;
        }

        let response = tokio::time::timeout(COMMAND_TIMEOUT, rx)
            .await
            .map_err(|_| {
                self.pending.remove(&id);
                CollectError::TransientNetwork(format!("cdp command '{}' timed out", method))
            })?
            .map_err(|_| CollectError::ResourceExhausted("cdp connection closed".into()))?;

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            return Err(CollectError::TransientNetwork(format!(
                "cdp '{}': {}",
                method, message
            )));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    pub fn subscribe(&self, session_id: &str, method: &str, callback: EventCallback) {
        self.subscribers
            .entry(subscriber_key(session_id, method))
            .or_default()
            .push(callback);
    }

    /// Drop every subscription scoped to a session. Called when the
    /// page closes so routing stops referencing it.
    pub fn unsubscribe_session(&self, session_id: &str) {
        let prefix = format!("{}\u{0}", session_id);
        self.subscribers.retain(|key, _| !key.starts_with(&prefix));
    }

    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
    }
}

/// The engine-facing wrapper around a protocol client.
pub struct CdpEngine {
    client: Arc<CdpClient>,
}

impl CdpEngine {
    /// Connect to a running browser's DevTools endpoint.
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>, CollectError> {
        let client = CdpClient::connect(ws_url).await?;
        Ok(Arc::new(Self { client }))
    }
}

#[async_trait]
impl BrowserEngine for CdpEngine {
    async fn create_context(&self) -> Result<Arc<dyn BrowserContext>, CollectError> {
        let result = self
            .client
            .send(
                "Target.createBrowserContext",
                json!({ "disposeOnDetach": true }),
                None,
            )
            .await?;
        let context_id = result
            .get("browserContextId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CollectError::ResourceExhausted("no browserContextId in response".into())
            })?
            .to_string();

        Ok(Arc::new(CdpContext {
            client: self.client.clone(),
            context_id,
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), CollectError> {
        self.client.shutdown().await;
        Ok(())
    }
}

/// An isolated CDP browser context.
pub struct CdpContext {
    client: Arc<CdpClient>,
    context_id: String,
    closed: AtomicBool,
}

#[async_trait]
impl BrowserContext for CdpContext {
    async fn new_page(&self) -> Result<Arc<dyn Page>, CollectError> {
        let result = self
            .client
            .send(
                "Target.createTarget",
                json!({ "url": "about:blank", "browserContextId": self.context_id }),
                None,
            )
            .await?;
        let target_id = result
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| CollectError::ResourceExhausted("no targetId in response".into()))?
            .to_string();

        let result = self
            .client
            .send(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?;
        let session_id = result
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| CollectError::ResourceExhausted("no sessionId in response".into()))?
            .to_string();

        let page = Arc::new(CdpPage {
            client: self.client.clone(),
            session_id: session_id.clone(),
            target_id,
            response_callbacks: RwLock::new(Vec::new()),
            socket_callbacks: RwLock::new(Vec::new()),
            response_meta: DashMap::new(),
            load_notify: Notify::new(),
            closed: AtomicBool::new(false),
        });

        self.client
            .send("Page.enable", json!({}), Some(&session_id))
            .await?;
        self.client
            .send("Network.enable", json!({}), Some(&session_id))
            .await?;
        CdpPage::wire_events(&page);

        Ok(page)
    }

    async fn close(&self) -> Result<(), CollectError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.client
            .send(
                "Target.disposeBrowserContext",
                json!({ "browserContextId": self.context_id }),
                None,
            )
            .await?;
        Ok(())
    }
}

/// Response metadata held between `responseReceived` and
/// `loadingFinished`; the body only becomes fetchable at the latter.
struct ResponseMeta {
    url: String,
    status: u16,
    content_type: String,
}

/// A page backed by a flat-attached CDP target.
pub struct CdpPage {
    client: Arc<CdpClient>,
    session_id: String,
    target_id: String,
    response_callbacks: RwLock<Vec<ResponseCallback>>,
    socket_callbacks: RwLock<Vec<SocketCallback>>,
    response_meta: DashMap<String, ResponseMeta>,
    load_notify: Notify,
    closed: AtomicBool,
}

impl CdpPage {
    /// Subscribe this page to the protocol events it translates into
    /// engine callbacks. Weak references keep the subscriber map from
    /// pinning a closed page alive.
    fn wire_events(page: &Arc<CdpPage>) {
        let session = page.session_id.clone();
        let client = page.client.clone();

        let weak = Arc::downgrade(page);
        client.subscribe(
            &session,
            "Page.loadEventFired",
            Arc::new(move |_| {
                if let Some(page) = weak.upgrade() {
                    page.load_notify.notify_one();
                }
            }),
        );

        let weak = Arc::downgrade(page);
        client.subscribe(
            &session,
            "Network.responseReceived",
            Arc::new(move |params| {
                if let Some(page) = weak.upgrade() {
                    page.on_response_received(params);
                }
            }),
        );

        let weak = Arc::downgrade(page);
        client.subscribe(
            &session,
            "Network.loadingFinished",
            Arc::new(move |params| {
                if let Some(page) = weak.upgrade() {
                    page.on_loading_finished(params);
                }
            }),
        );

        for method in [
            "Network.webSocketCreated",
            "Network.webSocketFrameReceived",
            "Network.webSocketClosed",
        ] {
            let weak = Arc::downgrade(page);
            let method_name = method;
            client.subscribe(
                &session,
                method,
                Arc::new(move |params| {
                    if let Some(page) = weak.upgrade() {
                        page.on_websocket_event(method_name, params);
                    }
                }),
            );
        }
    }

    fn on_response_received(&self, params: &Value) {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return;
        };
        let response = &params["response"];
        let meta = ResponseMeta {
            url: response
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            status: response.get("status").and_then(Value::as_u64).unwrap_or(0) as u16,
            content_type: response
                .get("mimeType")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        };
        self.response_meta.insert(request_id.to_string(), meta);
    }

    /// Bodies are only fetchable once loading finished; fetch off the
    /// routing path so the reader task is never blocked.
    fn on_loading_finished(&self, params: &Value) {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return;
        };
        let Some((request_id, meta)) = self.response_meta.remove(request_id) else {
            return;
        };
        let callbacks = self.response_callbacks.read().unwrap().clone();
        if callbacks.is_empty() {
            return;
        }

        let client = self.client.clone();
        let session = self.session_id.clone();
        tokio::spawn(async move {
            let result = client
                .send(
                    "Network.getResponseBody",
                    json!({ "requestId": request_id }),
                    Some(&session),
                )
                .await;
            let body = match result {
                Ok(v) => {
                    if v.get("base64Encoded").and_then(Value::as_bool) == Some(true) {
                        // Binary bodies are never pattern targets.
                        log::debug!("skipping base64 body for {}", meta.url);
                        return;
                    }
                    v.get("body")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                }
                Err(e) => {
                    log::debug!("could not fetch body for {}: {}", meta.url, e);
                    return;
                }
            };
            let response = PageResponse {
                url: meta.url,
                status: meta.status,
                content_type: meta.content_type,
                body,
            };
            for cb in callbacks {
                cb(response.clone());
            }
        });
    }

    fn on_websocket_event(&self, method: &str, params: &Value) {
        let id = params
            .get("requestId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let event = match method {
            "Network.webSocketCreated" => SocketEvent::Opened {
                id,
                url: params
                    .get("url")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            "Network.webSocketFrameReceived" => SocketEvent::Frame {
                id,
                payload: params["response"]
                    .get("payloadData")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            "Network.webSocketClosed" => SocketEvent::Closed { id },
            _ => return,
        };
        let callbacks = self.socket_callbacks.read().unwrap().clone();
        for cb in callbacks {
            cb(event.clone());
        }
    }

    async fn load_and_wait(&self, method: &str, params: Value, timeout: Duration) -> Result<(), CollectError> {
        self.response_meta.clear();

        // Arm the waiter before issuing the command so a fast load
        // event cannot be missed.
        let loaded = self.load_notify.notified();
        let label = params
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or("reload")
            .to_string();
        self.client.send(method, params, Some(&self.session_id)).await?;
        tokio::time::timeout(timeout, loaded)
            .await
            .map_err(|_| CollectError::NavigationTimeout(timeout, label))
    }
}

#[async_trait]
impl Page for CdpPage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), CollectError> {
        self.load_and_wait("Page.navigate", json!({ "url": url }), timeout)
            .await
    }

    async fn reload(&self, timeout: Duration) -> Result<(), CollectError> {
        self.load_and_wait("Page.reload", json!({}), timeout).await
    }

    fn on_response(&self, callback: ResponseCallback) {
        self.response_callbacks.write().unwrap().push(callback);
    }

    fn on_websocket(&self, callback: SocketCallback) {
        self.socket_callbacks.write().unwrap().push(callback);
    }

    fn clear_listeners(&self) {
        self.response_callbacks.write().unwrap().clear();
        self.socket_callbacks.write().unwrap().clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), CollectError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.clear_listeners();
        self.client.unsubscribe_session(&self.session_id);
        self.client
            .send(
                "Target.closeTarget",
                json!({ "targetId": self.target_id }),
                None,
            )
            .await?;
        Ok(())
    }
}

// Keep the weak back-references from outliving an explicitly closed
// page even if a caller forgets to close it.
impl Drop for CdpPage {
    fn drop(&mut self) {
        self.client.unsubscribe_session(&self.session_id);
    }
}
