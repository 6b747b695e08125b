//! RPC server: connection management, authentication, dispatch, heartbeats
//!
//! Connections live in an arena keyed by connection id; frames, middleware,
//! and the heartbeat sweep all address connections by id, never by
//! back-pointer. Each connection runs one task that multiplexes the inbound
//! WebSocket stream with an outbound queue.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use convoy_core::{time, Aid};
use convoy_events::{Event, EventFilter, EventStream, Subscription};

use crate::auth::verify_request;
use crate::config::RpcServerConfig;
use crate::envelope::{ErrorObject, Request, RequestId, Response, JSONRPC_VERSION};
use crate::error::{Error, Result};
use crate::middleware::{Middleware, Next, RequestContext};

/// Outcome of a method handler: a result value, or a wire error chosen by
/// the handler (e.g. `ErrorObject::invalid_params`).
pub type HandlerResult = std::result::Result<Value, ErrorObject>;

type HandlerFuture = BoxFuture<'static, HandlerResult>;
type Handler = Arc<dyn Fn(Option<Value>, Option<Aid>) -> HandlerFuture + Send + Sync>;

type ConnId = u64;

/// Lifecycle notifications observable via [`RpcServer::events`].
#[derive(Clone, Debug)]
pub enum ServerEvent {
    /// First authenticated request seen on a connection.
    ClientConnected { aid: Aid },
    /// An authenticated connection closed or was terminated.
    ClientDisconnected { aid: Aid },
}

/// Method dispatch table; the terminal stage of the middleware chain.
pub struct MethodTable {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl MethodTable {
    fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    fn register<F, Fut>(&self, method: String, handler: F)
    where
        F: Fn(Option<Value>, Option<Aid>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        let wrapped: Handler = Arc::new(move |params, from| handler(params, from).boxed());
        self.lock_write().insert(method, wrapped);
    }

    pub(crate) async fn dispatch(&self, ctx: &mut RequestContext) -> Response {
        let id = ctx.request.id.clone();
        let handler = self.lock_read().get(&ctx.request.method).cloned();
        let Some(handler) = handler else {
            return Response::failure(id, ErrorObject::method_not_found(&ctx.request.method));
        };

        let future = handler(ctx.request.params.clone(), ctx.from.clone());
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(result)) => Response::success(id, result),
            Ok(Err(error)) => Response::failure(id, error),
            Err(panic) => {
                let message = panic_message(&panic);
                tracing::warn!(method = %ctx.request.method, panic = %message, "handler panicked");
                #[allow(unused_mut)]
                let mut error = ErrorObject::internal(format!("handler panicked: {message}"));
                #[cfg(debug_assertions)]
                {
                    error = error.with_data(serde_json::json!({ "panic": message }));
                }
                Response::failure(id, error)
            }
        }
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Handler>> {
        self.handlers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Handler>> {
        self.handlers.write().unwrap_or_else(|e| e.into_inner())
    }
}

struct ConnectionHandle {
    tx: mpsc::UnboundedSender<WsMessage>,
    aid: Option<Aid>,
    alive: bool,
    relay_filter: Option<EventFilter>,
    /// While a replay is being assembled, live events buffer here so the
    /// snapshot is always delivered first.
    relay_gate: bool,
    relay_pending: Vec<Event>,
}

pub(crate) struct ServerInner {
    config: RpcServerConfig,
    pub(crate) methods: MethodTable,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    connections: Mutex<HashMap<ConnId, ConnectionHandle>>,
    next_conn_id: AtomicU64,
    events_tx: broadcast::Sender<ServerEvent>,
    event_stream: Mutex<Option<EventStream>>,
    relay_subscription: Mutex<Option<Subscription>>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

/// Framed JSON-RPC server over WebSockets.
///
/// Cloning is cheap; clones share the same server. Handlers and middleware
/// may be registered before or after [`RpcServer::serve`].
#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<ServerInner>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(ServerInner {
                config,
                methods: MethodTable::new(),
                middleware: RwLock::new(Vec::new()),
                connections: Mutex::new(HashMap::new()),
                next_conn_id: AtomicU64::new(0),
                events_tx,
                event_stream: Mutex::new(None),
                relay_subscription: Mutex::new(None),
                shutdown_tx: Mutex::new(None),
                local_addr: Mutex::new(None),
            }),
        }
    }

    /// Register a method handler.
    pub fn register<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>, Option<Aid>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner.methods.register(method.into(), handler);
    }

    /// Append a middleware stage; stages run in registration order.
    pub fn add_middleware<M: Middleware + 'static>(&self, middleware: M) {
        self.inner
            .middleware
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(middleware));
    }

    /// Relay an event stream to connected peers: new connections receive
    /// the buffered history, then live events matching their filter.
    pub fn attach_events(&self, stream: &EventStream) {
        *lock(&self.inner.event_stream) = Some(stream.clone());

        let weak = Arc::downgrade(&self.inner);
        let subscription = stream.subscribe(None, move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.relay_event(event);
            }
        });
        *lock(&self.inner.relay_subscription) = Some(subscription);
    }

    /// Bind and start serving; returns the bound address.
    pub async fn serve(&self, addr: &str) -> Result<SocketAddr> {
        {
            let slot = lock(&self.inner.shutdown_tx);
            if slot.is_some() {
                return Err(Error::Transport("server already started".to_string()));
            }
        }

        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        *lock(&self.inner.local_addr) = Some(local);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *lock(&self.inner.shutdown_tx) = Some(shutdown_tx);

        let inner = Arc::clone(&self.inner);
        let accept_shutdown = shutdown_rx.clone();
        tokio::spawn(accept_loop(inner, listener, accept_shutdown));

        if let Some(interval_ms) = self.inner.config.heartbeat_interval_ms {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(heartbeat_loop(inner, interval_ms, shutdown_rx));
        }

        tracing::info!(%local, "rpc server listening");
        Ok(local)
    }

    /// Address the server is bound to, once serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.inner.local_addr)
    }

    /// Stop accepting, terminate every connection, and stop relaying.
    pub fn shutdown(&self) {
        let sender = lock(&self.inner.shutdown_tx).take();
        if let Some(sender) = sender {
            let _ = sender.send(true);
        }
        if let Some(subscription) = lock(&self.inner.relay_subscription).take() {
            subscription.cancel();
        }

        let handles: Vec<ConnectionHandle> = self
            .inner
            .lock_connections()
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in handles {
            let _ = handle.tx.send(WsMessage::Close(None));
            if let Some(aid) = handle.aid {
                let _ = self
                    .inner
                    .events_tx
                    .send(ServerEvent::ClientDisconnected { aid });
            }
        }
        *lock(&self.inner.local_addr) = None;
        tracing::info!("rpc server shut down");
    }

    /// Subscribe to connection lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Send a notification to the connection authenticated as `aid`.
    /// Returns whether a matching, writable connection was found.
    pub fn notify(&self, aid: &Aid, method: &str, params: Option<Value>) -> bool {
        let request = Request::new(format!("notify-{}", time::now_millis()), method, params);
        let Ok(text) = serde_json::to_string(&request) else {
            return false;
        };
        let conns = self.inner.lock_connections();
        for handle in conns.values() {
            if handle.aid.as_ref() == Some(aid) {
                return handle.tx.send(WsMessage::Text(text)).is_ok();
            }
        }
        false
    }

    /// Fan a notification out to every writable connection; returns the
    /// number of connections it was sent to.
    pub fn broadcast(&self, method: &str, params: Option<Value>) -> usize {
        let request = Request::new(format!("notify-{}", time::now_millis()), method, params);
        let Ok(text) = serde_json::to_string(&request) else {
            return 0;
        };
        let conns = self.inner.lock_connections();
        conns
            .values()
            .filter(|handle| handle.tx.send(WsMessage::Text(text.clone())).is_ok())
            .count()
    }

    /// AIDs of currently connected, authenticated peers (sorted).
    pub fn authenticated_clients(&self) -> Vec<Aid> {
        let conns = self.inner.lock_connections();
        let mut aids: Vec<Aid> = conns.values().filter_map(|h| h.aid.clone()).collect();
        aids.sort();
        aids.dedup();
        aids
    }

    /// Number of live connections, authenticated or not.
    pub fn connection_count(&self) -> usize {
        self.inner.lock_connections().len()
    }

    #[cfg(test)]
    pub(crate) fn next_for_tests(&self) -> Next<'_> {
        Next {
            chain: &[],
            table: &self.inner.methods,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn accept_loop(
    inner: Arc<ServerInner>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    let inner = Arc::clone(&inner);
                    tokio::spawn(async move {
                        match tokio_tungstenite::accept_async(socket).await {
                            Ok(ws) => run_connection(inner, ws, peer).await,
                            Err(e) => {
                                tracing::debug!(%peer, error = %e, "websocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
        }
    }
    tracing::debug!("accept loop stopped");
}

async fn heartbeat_loop(
    inner: Arc<ServerInner>,
    interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = Duration::from_millis(interval_ms);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let mut dead: Vec<(ConnId, Option<Aid>)> = Vec::new();
        {
            let mut conns = inner.lock_connections();
            for (id, handle) in conns.iter_mut() {
                if handle.alive {
                    handle.alive = false;
                    let _ = handle.tx.send(WsMessage::Ping(Vec::new()));
                } else {
                    dead.push((*id, handle.aid.clone()));
                }
            }
            for (id, _) in &dead {
                if let Some(handle) = conns.remove(id) {
                    let _ = handle.tx.send(WsMessage::Close(None));
                }
            }
        }

        for (id, aid) in dead {
            tracing::debug!(conn_id = id, "terminating unresponsive connection");
            if let Some(aid) = aid {
                let _ = inner.events_tx.send(ServerEvent::ClientDisconnected { aid });
            }
        }
    }
}

async fn run_connection(
    inner: Arc<ServerInner>,
    ws: WebSocketStream<TcpStream>,
    peer: SocketAddr,
) {
    let conn_id = inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WsMessage>();

    {
        let mut conns = inner.lock_connections();
        conns.insert(
            conn_id,
            ConnectionHandle {
                tx: out_tx.clone(),
                aid: None,
                alive: true,
                relay_filter: None,
                relay_gate: false,
                relay_pending: Vec::new(),
            },
        );
    }
    tracing::debug!(conn_id, %peer, "connection open");

    // Event-relaying servers send the full buffer to every late joiner
    // before any live event.
    let stream = lock(&inner.event_stream).clone();
    if let Some(stream) = stream {
        inner.send_replay(conn_id, &stream, None);
    }

    let (mut ws_tx, mut ws_rx) = ws.split();
    loop {
        tokio::select! {
            outbound = out_rx.recv() => match outbound {
                Some(message) => {
                    let closing = matches!(message, WsMessage::Close(_));
                    if ws_tx.send(message).await.is_err() {
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                None => break,
            },
            inbound = ws_rx.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    // Handlers may suspend for a while; process off the
                    // connection task so the link keeps draining frames.
                    // Concurrent requests on one link may complete in any
                    // order; correlation is by id.
                    let inner = Arc::clone(&inner);
                    let out_tx = out_tx.clone();
                    tokio::spawn(async move {
                        inner.handle_text(conn_id, &out_tx, text).await;
                    });
                }
                Some(Ok(WsMessage::Ping(payload))) => {
                    let _ = out_tx.send(WsMessage::Pong(payload));
                }
                Some(Ok(WsMessage::Pong(_))) => {
                    inner.mark_alive(conn_id);
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id, error = %e, "websocket error");
                    break;
                }
            },
        }
    }

    let removed = inner.lock_connections().remove(&conn_id);
    if let Some(handle) = removed {
        if let Some(aid) = handle.aid {
            let _ = inner
                .events_tx
                .send(ServerEvent::ClientDisconnected { aid });
        }
    }
    tracing::debug!(conn_id, %peer, "connection closed");
}

impl ServerInner {
    fn lock_connections(&self) -> MutexGuard<'_, HashMap<ConnId, ConnectionHandle>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mark_alive(&self, conn_id: ConnId) {
        if let Some(handle) = self.lock_connections().get_mut(&conn_id) {
            handle.alive = true;
        }
    }

    async fn handle_text(
        self: &Arc<Self>,
        conn_id: ConnId,
        out_tx: &mpsc::UnboundedSender<WsMessage>,
        text: String,
    ) {
        let value: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(conn_id, error = %e, "unparseable frame");
                send_response(
                    out_tx,
                    Response::failure(RequestId::PARSE_ERROR, ErrorObject::parse_error()),
                );
                return;
            }
        };

        if let Some(obj) = value.as_object() {
            if obj.get("type").and_then(Value::as_str) == Some("subscribe")
                && !obj.contains_key("sequence")
            {
                let filter: EventFilter = obj
                    .get("filter")
                    .cloned()
                    .and_then(|f| serde_json::from_value(f).ok())
                    .unwrap_or_default();
                let stream = lock(&self.event_stream).clone();
                match stream {
                    Some(stream) => self.send_replay(conn_id, &stream, Some(filter)),
                    None => {
                        tracing::debug!(conn_id, "subscribe frame without an attached event stream");
                    }
                }
                return;
            }
        }

        if let Some(error) = request_shape_error(&value) {
            let id = salvage_id(&value);
            send_response(out_tx, Response::failure(id, error));
            return;
        }

        let request: Request = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(conn_id, error = %e, "malformed request");
                send_response(
                    out_tx,
                    Response::failure(RequestId::PARSE_ERROR, ErrorObject::invalid_request()),
                );
                return;
            }
        };

        let response = self.process_request(conn_id, request).await;
        send_response(out_tx, response);
    }

    async fn process_request(self: &Arc<Self>, conn_id: ConnId, request: Request) -> Response {
        let mut from: Option<Aid> = None;

        if self.config.require_auth {
            if request.auth.is_none() {
                return Response::failure(
                    request.id,
                    ErrorObject::authentication_failed("missing auth block"),
                );
            }
            if !verify_request(&request, self.config.signature_policy) {
                return Response::failure(
                    request.id,
                    ErrorObject::authentication_failed("signature verification failed"),
                );
            }
            from = request.auth.as_ref().map(|auth| auth.from.clone());
        } else if request.auth.is_some() && verify_request(&request, self.config.signature_policy)
        {
            // Opportunistic identification when auth is optional.
            from = request.auth.as_ref().map(|auth| auth.from.clone());
        }

        if let Some(aid) = &from {
            let newly_authenticated = {
                let mut conns = self.lock_connections();
                match conns.get_mut(&conn_id) {
                    Some(handle) if handle.aid.is_none() => {
                        handle.aid = Some(aid.clone());
                        true
                    }
                    _ => false,
                }
            };
            if newly_authenticated {
                tracing::debug!(conn_id, %aid, "client authenticated");
                let _ = self
                    .events_tx
                    .send(ServerEvent::ClientConnected { aid: aid.clone() });
            }
        }

        let mut ctx = RequestContext {
            request,
            from,
            received_at: time::now_millis(),
            metadata: HashMap::new(),
        };
        let chain: Vec<Arc<dyn Middleware>> = self
            .middleware
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        Next {
            chain: &chain,
            table: &self.methods,
        }
        .run(&mut ctx)
        .await
    }

    /// Queue a replay to one connection, gating live relay so the snapshot
    /// always lands first.
    fn send_replay(&self, conn_id: ConnId, stream: &EventStream, new_filter: Option<EventFilter>) {
        let snapshot_filter = {
            let mut conns = self.lock_connections();
            let Some(handle) = conns.get_mut(&conn_id) else {
                return;
            };
            if let Some(filter) = new_filter {
                handle.relay_filter = Some(filter);
            }
            handle.relay_gate = true;
            handle.relay_pending.clear();
            handle.relay_filter.clone()
        };

        let snapshot = stream.replay(snapshot_filter.as_ref());

        let mut conns = self.lock_connections();
        let Some(handle) = conns.get_mut(&conn_id) else {
            return;
        };
        let newest = snapshot.last().map(|e| e.sequence);
        for event in &snapshot {
            send_event(&handle.tx, event);
        }
        // Events emitted while the snapshot was being taken: forward the
        // ones the snapshot missed.
        let pending = std::mem::take(&mut handle.relay_pending);
        for event in pending {
            if newest.is_some_and(|n| event.sequence <= n) {
                continue;
            }
            if handle
                .relay_filter
                .as_ref()
                .map_or(true, |f| f.matches(&event))
            {
                send_event(&handle.tx, &event);
            }
        }
        handle.relay_gate = false;
    }

    /// Live fan-out of one emitted event to every subscribed connection.
    fn relay_event(&self, event: &Event) {
        let Ok(text) = serde_json::to_string(event) else {
            return;
        };
        let mut conns = self.lock_connections();
        for handle in conns.values_mut() {
            if handle.relay_gate {
                handle.relay_pending.push(event.clone());
                continue;
            }
            if handle
                .relay_filter
                .as_ref()
                .map_or(true, |f| f.matches(event))
                && handle.tx.send(WsMessage::Text(text.clone())).is_err()
            {
                tracing::debug!(sequence = event.sequence, "dropped event for closed connection");
            }
        }
    }
}

fn send_response(out_tx: &mpsc::UnboundedSender<WsMessage>, response: Response) {
    match serde_json::to_string(&response) {
        Ok(text) => {
            let _ = out_tx.send(WsMessage::Text(text));
        }
        Err(e) => tracing::warn!(error = %e, "failed to serialize response"),
    }
}

fn send_event(out_tx: &mpsc::UnboundedSender<WsMessage>, event: &Event) {
    if let Ok(text) = serde_json::to_string(event) {
        let _ = out_tx.send(WsMessage::Text(text));
    }
}

/// JSON-RPC 2.0 shape check; `None` means the value is a valid request.
fn request_shape_error(value: &Value) -> Option<ErrorObject> {
    let Some(obj) = value.as_object() else {
        return Some(ErrorObject::invalid_request());
    };
    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Some(ErrorObject::invalid_request());
    }
    match obj.get("method").and_then(Value::as_str) {
        Some(method) if !method.is_empty() => {}
        _ => return Some(ErrorObject::invalid_request()),
    }
    match obj.get("id") {
        Some(Value::String(s)) if !s.is_empty() => None,
        Some(Value::Number(_)) => None,
        _ => Some(ErrorObject::invalid_request()),
    }
}

/// Best-effort id recovery so invalid requests still echo their id.
fn salvage_id(value: &Value) -> RequestId {
    value
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value::<RequestId>(id).ok())
        .filter(RequestId::is_valid)
        .unwrap_or(RequestId::PARSE_ERROR)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
