//! RPC client: links, correlation, timeouts, and reconnect
//!
//! A client holds one link per endpoint. Targets resolve three ways: a
//! `ws://`/`rpc://` URL is used directly, an AID goes through the directory,
//! and anything else is treated as a capability whose first advertiser is
//! called. Every outgoing request is signed with the client's identity key.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use convoy_core::{is_valid_aid, time, Aid, KeyPair};
use convoy_events::{Event, EventFilter};
use convoy_fleet::DirectoryProvider;

use crate::auth::{sign_full_request, sign_payload, SignaturePolicy};
use crate::config::RpcClientConfig;
use crate::envelope::{classify_frame, Auth, Frame, Request, Response};
use crate::error::{Error, Result};

/// Per-endpoint lifecycle notifications.
#[derive(Clone, Debug)]
pub enum ClientEvent {
    Connected { url: String },
    Disconnected { url: String },
    Reconnecting { url: String, attempt: u32 },
}

type PendingSender = oneshot::Sender<Result<Value>>;

struct Link {
    url: String,
    out: mpsc::UnboundedSender<WsMessage>,
    pending: Mutex<HashMap<String, PendingSender>>,
    subscriptions: Mutex<Vec<EventFilter>>,
    closed: AtomicBool,
    intentional: AtomicBool,
}

impl Link {
    fn reject_pending(&self, reason: &str) {
        let drained: Vec<PendingSender> = {
            let mut pending = lock(&self.pending);
            pending.drain().map(|(_, sender)| sender).collect()
        };
        for sender in drained {
            let _ = sender.send(Err(Error::Transport(reason.to_string())));
        }
    }
}

struct ClientInner {
    keypair: KeyPair,
    aid: Aid,
    config: RpcClientConfig,
    directory: Arc<dyn DirectoryProvider>,
    links: tokio::sync::Mutex<HashMap<String, Arc<Link>>>,
    counter: AtomicU64,
    closed: AtomicBool,
    events_tx: broadcast::Sender<ClientEvent>,
    notifications_tx: broadcast::Sender<Request>,
    remote_events_tx: broadcast::Sender<Event>,
}

/// Framed JSON-RPC client with a signing identity.
///
/// Cloning is cheap; clones share links and identity.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    pub fn new(
        keypair: KeyPair,
        directory: Arc<dyn DirectoryProvider>,
        config: RpcClientConfig,
    ) -> Self {
        let aid = Aid::from_public_key(&keypair.public_key());
        let (events_tx, _) = broadcast::channel(64);
        let (notifications_tx, _) = broadcast::channel(64);
        let (remote_events_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(ClientInner {
                keypair,
                aid,
                config,
                directory,
                links: tokio::sync::Mutex::new(HashMap::new()),
                counter: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                events_tx,
                notifications_tx,
                remote_events_tx,
            }),
        }
    }

    /// This client's identity.
    pub fn aid(&self) -> &Aid {
        &self.inner.aid
    }

    /// Issue a signed request with the configured default timeout.
    pub async fn request(&self, to: &str, method: &str, params: Option<Value>) -> Result<Value> {
        self.request_with_timeout(to, method, params, self.inner.config.request_timeout_ms)
            .await
    }

    /// Issue a signed request with an explicit timeout in milliseconds.
    pub async fn request_with_timeout(
        &self,
        to: &str,
        method: &str,
        params: Option<Value>,
        timeout_ms: u64,
    ) -> Result<Value> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let url = self.inner.resolve(to).await?;
        let link = self.inner.ensure_link(&url).await?;

        let seq = self.inner.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("req-{seq}-{}", time::now_millis());

        let mut request = Request::new(id.clone(), method, params);
        request.auth = Some(Auth {
            from: self.inner.aid.clone(),
            signature: String::new(),
        });
        let signature = match self.inner.config.signature_policy {
            SignaturePolicy::PayloadOnly => {
                sign_payload(&self.inner.keypair, method, request.params.as_ref())?
            }
            SignaturePolicy::FullRequest => sign_full_request(&self.inner.keypair, &request)?,
        };
        if let Some(auth) = &mut request.auth {
            auth.signature = signature;
        }

        let (done_tx, done_rx) = oneshot::channel();
        lock(&link.pending).insert(id.clone(), done_tx);

        let text = serde_json::to_string(&request)?;
        if link.out.send(WsMessage::Text(text)).is_err() {
            lock(&link.pending).remove(&id);
            return Err(Error::Transport("link closed".to_string()));
        }

        match tokio::time::timeout(Duration::from_millis(timeout_ms), done_rx).await {
            Err(_elapsed) => {
                lock(&link.pending).remove(&id);
                Err(Error::Timeout(timeout_ms))
            }
            Ok(Err(_sender_dropped)) => Err(Error::Transport("link closed".to_string())),
            Ok(Ok(outcome)) => outcome,
        }
    }

    /// Open (or reuse) a link to a target without sending a request.
    pub async fn connect(&self, to: &str) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let url = self.inner.resolve(to).await?;
        self.inner.ensure_link(&url).await.map(|_| ())
    }

    /// Amend the event-stream filter on a link; the server resends replay
    /// matching the new filter. The filter is re-sent after reconnects.
    pub async fn subscribe_events(&self, to: &str, filter: EventFilter) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let url = self.inner.resolve(to).await?;
        let link = self.inner.ensure_link(&url).await?;

        lock(&link.subscriptions).push(filter.clone());
        send_subscribe(&link, &filter)
    }

    /// Close every link, rejecting all pending requests. Subsequent calls
    /// on this client fail with [`Error::Closed`].
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let links: Vec<Arc<Link>> = {
            let mut links = self.inner.links.lock().await;
            links.drain().map(|(_, link)| link).collect()
        };
        for link in links {
            link.intentional.store(true, Ordering::Release);
            link.reject_pending("Client closed");
            let _ = link.out.send(WsMessage::Close(None));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Per-endpoint connect/disconnect/reconnect notifications.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Server-initiated notification frames.
    pub fn notifications(&self) -> broadcast::Receiver<Request> {
        self.inner.notifications_tx.subscribe()
    }

    /// Events relayed from remote event streams.
    pub fn remote_events(&self) -> broadcast::Receiver<Event> {
        self.inner.remote_events_tx.subscribe()
    }
}

impl ClientInner {
    /// Resolve a target to a WebSocket URL.
    async fn resolve(&self, to: &str) -> Result<String> {
        if to.starts_with("ws://") || to.starts_with("wss://") {
            return Ok(to.to_string());
        }
        if let Some(rest) = to.strip_prefix("rpc://") {
            return Ok(format!("ws://{rest}"));
        }

        if is_valid_aid(to) {
            let aid = Aid::parse(to)?;
            return self.endpoint_for(&aid).await;
        }

        // Anything else is a capability: call the first advertiser.
        let discovered = self
            .directory_call(self.directory.discover(to))
            .await?;
        let first = discovered.first().ok_or_else(|| {
            Error::Discovery(format!("no agent advertises capability {to:?}"))
        })?;
        self.endpoint_for(first).await
    }

    async fn endpoint_for(&self, aid: &Aid) -> Result<String> {
        let meta = self
            .directory_call(self.directory.lookup(aid))
            .await?
            .ok_or_else(|| Error::Discovery(format!("no directory entry for {aid}")))?;
        meta.endpoints
            .rpc
            .ok_or_else(|| Error::Discovery(format!("{aid} has no rpc endpoint")))
    }

    /// Directory calls may suspend; bound them so discovery can never stall
    /// a request past the configured deadline.
    async fn directory_call<T>(
        &self,
        call: impl std::future::Future<Output = convoy_fleet::Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(Duration::from_millis(self.config.directory_timeout_ms), call)
            .await
        {
            Err(_elapsed) => Err(Error::Discovery("directory call timed out".to_string())),
            Ok(Err(e)) => Err(Error::Discovery(e.to_string())),
            Ok(Ok(value)) => Ok(value),
        }
    }

    /// One link per endpoint: reuse a live link or open a fresh one.
    async fn ensure_link(self: &Arc<Self>, url: &str) -> Result<Arc<Link>> {
        let mut links = self.links.lock().await;
        if let Some(link) = links.get(url) {
            if !link.closed.load(Ordering::Acquire) {
                return Ok(Arc::clone(link));
            }
            links.remove(url);
        }

        let link = self
            .open_link(url, self.config.subscriptions.clone())
            .await?;
        links.insert(url.to_string(), Arc::clone(&link));
        Ok(link)
    }

    fn open_link<'a>(
        self: &'a Arc<Self>,
        url: &'a str,
        subscriptions: Vec<EventFilter>,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<Link>>> + Send + 'a>> {
        Box::pin(self.open_link_impl(url, subscriptions))
    }

    async fn open_link_impl(
        self: &Arc<Self>,
        url: &str,
        subscriptions: Vec<EventFilter>,
    ) -> Result<Arc<Link>> {
        let (ws, _handshake) = connect_async(url).await?;
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WsMessage>();

        let link = Arc::new(Link {
            url: url.to_string(),
            out: out_tx,
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(subscriptions.clone()),
            closed: AtomicBool::new(false),
            intentional: AtomicBool::new(false),
        });

        for filter in &subscriptions {
            let _ = send_subscribe(&link, filter);
        }

        let inner = Arc::downgrade(self);
        let io_link = Arc::clone(&link);
        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    outbound = out_rx.recv() => match outbound {
                        Some(message) => {
                            let closing = matches!(message, WsMessage::Close(_));
                            if ws_tx.send(message).await.is_err() {
                                break "Server closed";
                            }
                            if closing {
                                break "Client closed";
                            }
                        }
                        None => break "Client closed",
                    },
                    inbound = ws_rx.next() => match inbound {
                        Some(Ok(WsMessage::Text(text))) => {
                            if let Some(inner) = inner.upgrade() {
                                inner.handle_inbound(&io_link, &text);
                            }
                        }
                        Some(Ok(WsMessage::Ping(payload))) => {
                            let _ = io_link.out.send(WsMessage::Pong(payload));
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break "Server closed",
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!(url = %io_link.url, error = %e, "websocket error");
                            break "Server closed";
                        }
                    },
                }
            };
            if let Some(inner) = inner.upgrade() {
                inner.link_closed(&io_link, reason).await;
            }
        });

        tracing::debug!(%url, "link open");
        let _ = self.events_tx.send(ClientEvent::Connected {
            url: url.to_string(),
        });
        Ok(link)
    }

    fn handle_inbound(&self, link: &Arc<Link>, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(url = %link.url, error = %e, "unparseable inbound frame");
                return;
            }
        };

        match classify_frame(value) {
            Frame::Response(response) => self.complete(link, *response),
            Frame::Request(request) => {
                let _ = self.notifications_tx.send(*request);
            }
            Frame::Event(event) => {
                let _ = self.remote_events_tx.send(*event);
            }
            other => {
                tracing::debug!(url = %link.url, frame = ?other, "ignoring frame");
            }
        }
    }

    fn complete(&self, link: &Arc<Link>, response: Response) {
        let key = response.id.key();
        let Some(sender) = lock(&link.pending).remove(&key) else {
            tracing::debug!(url = %link.url, id = %response.id, "response for unknown request");
            return;
        };
        let outcome = match response.error {
            Some(error) => Err(Error::Rpc(error)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        let _ = sender.send(outcome);
    }

    async fn link_closed(self: &Arc<Self>, link: &Arc<Link>, reason: &str) {
        if link.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(url = %link.url, reason, "link closed");

        {
            let mut links = self.links.lock().await;
            if links
                .get(&link.url)
                .is_some_and(|current| Arc::ptr_eq(current, link))
            {
                links.remove(&link.url);
            }
        }

        link.reject_pending(reason);
        let _ = self.events_tx.send(ClientEvent::Disconnected {
            url: link.url.clone(),
        });

        let intentional = link.intentional.load(Ordering::Acquire);
        if !intentional && !self.closed.load(Ordering::Acquire) && self.config.auto_reconnect {
            let subscriptions = lock(&link.subscriptions).clone();
            let inner = Arc::clone(self);
            let url = link.url.clone();
            tokio::spawn(async move {
                inner.reconnect(url, subscriptions).await;
            });
        }
    }

    /// Exponential-backoff reconnect; backoff resets once a link reopens.
    async fn reconnect(self: Arc<Self>, url: String, subscriptions: Vec<EventFilter>) {
        let mut delay = Duration::from_millis(self.config.reconnect_initial_ms);
        let cap = Duration::from_millis(self.config.reconnect_max_ms);

        for attempt in 1..=self.config.reconnect_max_attempts {
            let _ = self.events_tx.send(ClientEvent::Reconnecting {
                url: url.clone(),
                attempt,
            });
            tokio::time::sleep(delay).await;

            if self.closed.load(Ordering::Acquire) {
                return;
            }

            let opened = {
                let mut links = self.links.lock().await;
                if links.contains_key(&url) {
                    // Another task already reopened this endpoint.
                    return;
                }
                match self.open_link(&url, subscriptions.clone()).await {
                    Ok(link) => {
                        links.insert(url.clone(), link);
                        true
                    }
                    Err(e) => {
                        tracing::debug!(%url, attempt, error = %e, "reconnect attempt failed");
                        false
                    }
                }
            };

            if opened {
                tracing::info!(%url, attempt, "reconnected");
                return;
            }
            delay = (delay * self.config.reconnect_factor).min(cap);
        }
        tracing::warn!(%url, attempts = self.config.reconnect_max_attempts, "giving up on reconnect");
    }
}

fn send_subscribe(link: &Arc<Link>, filter: &EventFilter) -> Result<()> {
    let frame = serde_json::json!({ "type": "subscribe", "filter": filter });
    link.out
        .send(WsMessage::Text(frame.to_string()))
        .map_err(|_| Error::Transport("link closed".to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
