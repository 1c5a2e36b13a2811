//! RPC socket - the correlation layer over a transport endpoint.
//!
//! The socket consumes the endpoint's inbound message stream, produces
//! outbound packets, and maps local calls to remote responses by
//! correlation id, with per-call timeouts and bidirectional named-function
//! dispatch. The lifecycle mirrors a builder-started client:
//! 1. Configure handlers on the [`RpcSocketBuilder`]
//! 2. `start()` spawns the outbound writer task and the dispatch loop
//! 3. `call()` correlates requests with their responses
//! 4. `wait_for_shutdown()` blocks until the endpoint closes
//!
//! # Example
//!
//! ```ignore
//! use portlink::rpc::RpcSocket;
//! use portlink::transport::channel;
//! use serde_json::{json, Value};
//!
//! let ((a_in, a_out), (b_in, b_out)) = channel::link();
//!
//! let server = RpcSocket::builder()
//!     .handle("echo", |v: Value| async move { Ok(v) })
//!     .start(b_in, b_out);
//! let client = RpcSocket::builder().start(a_in, a_out);
//!
//! let reply = client.call("echo", json!({"v": 5})).await?;
//! assert_eq!(reply, json!({"v": 5}));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;

use crate::error::{PortlinkError, Result};
use crate::rpc::packet::{reason_text, Inbound, Packet};
use crate::rpc::registry::HandlerRegistry;
use crate::transport::{InboundEndpoint, OutboundEndpoint, TransferList};

/// Default maximum concurrently running handlers.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Default outbound channel capacity.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

/// Configuration for an RPC socket.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Timeout applied by [`RpcSocket::call`] when none is given explicitly.
    pub default_timeout: Option<Duration>,
    /// Accepted clock skew when judging a peer-stamped request expiry.
    pub clock_skew_tolerance: Duration,
    /// Maximum concurrently running handlers.
    pub max_concurrent_handlers: usize,
    /// Outbound packet channel capacity.
    pub outbound_capacity: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            default_timeout: None,
            clock_skew_tolerance: Duration::ZERO,
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// One message queued for the outbound writer task.
pub struct Outgoing {
    /// The wire message.
    pub message: Value,
    /// Transfer hint forwarded to the transport.
    pub transfer: TransferList,
}

/// Settlement of a pending call.
enum Settlement {
    Value(Value),
    Error(Value),
}

/// Local bookkeeping for one in-flight outbound request.
struct PendingCall {
    tx: oneshot::Sender<Settlement>,
    /// Absolute deadline echoed into the request packet, if any.
    expiry: Option<u64>,
}

struct Shared {
    /// Pending calls keyed by locally allocated correlation id.
    pending: Mutex<HashMap<u64, PendingCall>>,
    /// Named-function dispatch table; looked up at packet arrival.
    registry: Mutex<HandlerRegistry>,
    next_id: AtomicU64,
    /// Set once the inbound endpoint closes; guarded by the pending lock so
    /// no call can be recorded after the table is drained.
    closed: AtomicBool,
    /// Whether [`RpcSocket::take_passthrough`] has handed out the receiver.
    passthrough_taken: AtomicBool,
    config: SocketConfig,
}

/// Builder for configuring and starting an RPC socket.
pub struct RpcSocketBuilder {
    registry: HandlerRegistry,
    config: SocketConfig,
}

impl RpcSocketBuilder {
    /// Create a new socket builder.
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            config: SocketConfig::default(),
        }
    }

    /// Register a named function handler.
    ///
    /// The handler receives the deserialized argument payload; its result
    /// is serialized into the `response` packet. Last registration wins.
    pub fn handle<F, T, R, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.registry.register(name, handler);
        self
    }

    /// Set the timeout applied when `call()` is given none explicitly.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = Some(timeout);
        self
    }

    /// Set the accepted clock skew for peer-stamped request expiries.
    ///
    /// Expiry correlates the two endpoints' clocks, so an exact comparison
    /// would misjudge requests whenever the clocks drift; the tolerance is
    /// added to the deadline before a request is considered expired.
    pub fn clock_skew_tolerance(mut self, tolerance: Duration) -> Self {
        self.config.clock_skew_tolerance = tolerance;
        self
    }

    /// Set the maximum number of concurrently running handlers.
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.config.max_concurrent_handlers = limit;
        self
    }

    /// Set the outbound channel capacity.
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_capacity = capacity;
        self
    }

    /// Start the socket over the given endpoint halves.
    ///
    /// Spawns the outbound writer task and the inbound dispatch loop.
    pub fn start<I, O>(self, inbound: I, outbound: O) -> RpcSocket
    where
        I: InboundEndpoint,
        O: OutboundEndpoint,
    {
        RpcSocket::start(self.registry, self.config, inbound, outbound)
    }
}

impl Default for RpcSocketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running correlation layer bound to one transport endpoint.
///
/// Each socket exclusively owns its pending-call table and handler
/// registry; run one socket per endpoint and never share them.
pub struct RpcSocket {
    shared: Arc<Shared>,
    out_tx: mpsc::Sender<Outgoing>,
    passthrough_rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    shutdown_rx: oneshot::Receiver<()>,
    _writer_task: JoinHandle<()>,
}

impl RpcSocket {
    /// Create a new socket builder.
    pub fn builder() -> RpcSocketBuilder {
        RpcSocketBuilder::new()
    }

    fn start<I, O>(
        registry: HandlerRegistry,
        config: SocketConfig,
        inbound: I,
        outbound: O,
    ) -> Self
    where
        I: InboundEndpoint,
        O: OutboundEndpoint,
    {
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            registry: Mutex::new(registry),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            passthrough_taken: AtomicBool::new(false),
            config,
        });

        let (out_tx, out_rx) = mpsc::channel(shared.config.outbound_capacity);
        let writer_task = tokio::spawn(writer_loop(out_rx, outbound));

        let (passthrough_tx, passthrough_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let semaphore = Arc::new(Semaphore::new(shared.config.max_concurrent_handlers));

        let loop_shared = shared.clone();
        let loop_out = out_tx.clone();
        tokio::spawn(async move {
            read_loop(inbound, &loop_shared, loop_out, passthrough_tx, semaphore).await;
            close_pending(&loop_shared);
            let _ = shutdown_tx.send(());
        });

        Self {
            shared,
            out_tx,
            passthrough_rx: Mutex::new(Some(passthrough_rx)),
            shutdown_rx,
            _writer_task: writer_task,
        }
    }

    /// Call a named function on the peer with the default timeout.
    pub async fn call(&self, function: &str, args: Value) -> Result<Value> {
        self.call_with(function, args, Vec::new(), self.shared.config.default_timeout)
            .await
    }

    /// Call a named function on the peer.
    ///
    /// Allocates a fresh correlation id (retrying on collision with a
    /// currently pending id), records the pending call *before* the request
    /// packet is queued outbound, and awaits settlement. When `timeout` is
    /// given, the matching absolute expiry is embedded in the packet so the
    /// responder can skip work the caller has already abandoned.
    ///
    /// A local timeout rejects the call and discards the pending entry
    /// without notifying the peer; the peer's late response is then dropped
    /// as an unknown id.
    pub async fn call_with(
        &self,
        function: &str,
        args: Value,
        transfer: TransferList,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let (tx, mut rx) = oneshot::channel();
        let expiry = timeout.map(|t| now_ms().saturating_add(t.as_millis() as u64));

        let id = {
            let mut pending = self.shared.pending.lock();
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(PortlinkError::Closed);
            }
            let id = loop {
                let candidate = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
                if !pending.contains_key(&candidate) {
                    break candidate;
                }
            };
            pending.insert(id, PendingCall { tx, expiry });
            id
        };

        let request = Packet::Request {
            id: json!(id),
            function: function.to_string(),
            args,
            expiry,
        };
        if self
            .out_tx
            .send(Outgoing {
                message: request.to_value(),
                transfer,
            })
            .await
            .is_err()
        {
            self.shared.pending.lock().remove(&id);
            return Err(PortlinkError::Closed);
        }

        let settlement = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut rx).await {
                Ok(settled) => settled,
                Err(_) => {
                    if let Some(timed_out) = self.shared.pending.lock().remove(&id) {
                        tracing::trace!(id, expiry = ?timed_out.expiry, "call timed out; entry discarded");
                        return Err(PortlinkError::CallTimeout(limit));
                    }
                    // The settlement raced the timeout and won; honor it.
                    match rx.try_recv() {
                        Ok(settled) => Ok(settled),
                        Err(_) => return Err(PortlinkError::CallTimeout(limit)),
                    }
                }
            },
            None => rx.await,
        };

        match settlement {
            Ok(Settlement::Value(value)) => Ok(value),
            Ok(Settlement::Error(reason)) => Err(PortlinkError::Remote(reason_text(&reason))),
            Err(_) => Err(PortlinkError::Closed),
        }
    }

    /// Register a named function handler on the running socket.
    ///
    /// Handlers are looked up at packet arrival, so a request already in
    /// flight is dispatched to whichever handler is registered at that
    /// moment. Last registration wins.
    pub fn register<F, T, R, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.shared.registry.lock().register(name, handler);
    }

    /// Remove the handler registered under `name`.
    pub fn unregister(&self, name: &str) -> bool {
        self.shared.registry.lock().unregister(name)
    }

    /// Number of currently pending outbound calls.
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Take the receiver of non-protocol traffic.
    ///
    /// Inbound messages not shaped `{id, kind, ...}` are forwarded here
    /// untouched. Messages arriving before the receiver is taken are
    /// dropped, not buffered. Returns `None` if already taken.
    pub fn take_passthrough(&self) -> Option<mpsc::UnboundedReceiver<Value>> {
        let receiver = self.passthrough_rx.lock().take();
        if receiver.is_some() {
            self.shared.passthrough_taken.store(true, Ordering::Release);
        }
        receiver
    }

    /// Block until the endpoint closes and the dispatch loop exits.
    pub async fn wait_for_shutdown(self) -> Result<()> {
        let _ = self.shutdown_rx.await;
        Ok(())
    }
}

/// Outbound writer task: drains the channel into the endpoint.
async fn writer_loop<O: OutboundEndpoint>(mut rx: mpsc::Receiver<Outgoing>, mut outbound: O) {
    while let Some(out) = rx.recv().await {
        if let Err(e) = outbound.send(out.message, out.transfer).await {
            tracing::error!("outbound send failed: {}", e);
            break;
        }
    }
}

/// Inbound dispatch loop: processes messages in arrival order until the
/// endpoint closes. No single message's outcome halts the loop.
async fn read_loop<I: InboundEndpoint>(
    mut inbound: I,
    shared: &Arc<Shared>,
    out_tx: mpsc::Sender<Outgoing>,
    passthrough: mpsc::UnboundedSender<Value>,
    semaphore: Arc<Semaphore>,
) {
    while let Some(message) = inbound.recv().await {
        dispatch_message(message, shared, &out_tx, &passthrough, &semaphore).await;
    }
    tracing::debug!("inbound endpoint closed; dispatch loop exiting");
}

/// Mark the socket closed and fail every pending call.
///
/// The flag is flipped while holding the pending lock, so a concurrent
/// `call_with` either observes the closure before recording its entry or has
/// its entry drained here; dropping an entry's sender settles the caller
/// with [`PortlinkError::Closed`].
fn close_pending(shared: &Shared) {
    let dropped = {
        let mut pending = shared.pending.lock();
        shared.closed.store(true, Ordering::Release);
        pending.drain().count()
    };
    if dropped > 0 {
        tracing::debug!(calls = dropped, "endpoint closed; failing pending calls");
    }
}

/// Route a single inbound message.
async fn dispatch_message(
    message: Value,
    shared: &Arc<Shared>,
    out_tx: &mpsc::Sender<Outgoing>,
    passthrough: &mpsc::UnboundedSender<Value>,
    semaphore: &Arc<Semaphore>,
) {
    match Packet::classify(message) {
        Inbound::Passthrough(message) => {
            // Other traffic sharing the channel; never a protocol error.
            // Buffered only once a receiver exists, so an uninterested
            // socket does not accumulate traffic it will never drain.
            if shared.passthrough_taken.load(Ordering::Acquire) {
                let _ = passthrough.send(message);
            } else {
                tracing::debug!("no passthrough receiver; message dropped");
            }
        }
        Inbound::Invalid { id } => {
            send_packet(
                out_tx,
                Packet::Error {
                    id,
                    reason: json!("invalid packet"),
                },
            )
            .await;
        }
        Inbound::Packet(Packet::Request {
            id,
            function,
            args,
            expiry,
        }) => {
            dispatch_request(id, function, args, expiry, shared, out_tx, semaphore).await;
        }
        Inbound::Packet(Packet::Response { id, value }) => {
            settle(shared, &id, Settlement::Value(value));
        }
        Inbound::Packet(Packet::Error { id, reason }) => {
            settle(shared, &id, Settlement::Error(reason));
        }
    }
}

/// Dispatch one inbound request to its registered handler.
async fn dispatch_request(
    id: Value,
    function: String,
    args: Value,
    expiry: Option<u64>,
    shared: &Arc<Shared>,
    out_tx: &mpsc::Sender<Outgoing>,
    semaphore: &Arc<Semaphore>,
) {
    if let Some(deadline) = expiry {
        let tolerance = shared.config.clock_skew_tolerance.as_millis() as u64;
        if now_ms() > deadline.saturating_add(tolerance) {
            // The caller has already given up; answering is wasted work.
            tracing::debug!(function = %function, "dropping expired request");
            return;
        }
    }

    let handler = shared.registry.lock().get(&function);
    let handler = match handler {
        Some(h) => h,
        None => {
            send_packet(
                out_tx,
                Packet::Error {
                    id,
                    reason: json!(format!("unregistered function: {function}")),
                },
            )
            .await;
            return;
        }
    };

    let permit = match semaphore.clone().try_acquire_owned() {
        Ok(p) => p,
        Err(_) => {
            tracing::warn!(function = %function, "handler capacity exhausted; rejecting request");
            send_packet(
                out_tx,
                Packet::Error {
                    id,
                    reason: json!("handler capacity exhausted"),
                },
            )
            .await;
            return;
        }
    };

    // Handlers run in their own task: arrival order does not bound
    // completion order, and a handler failure becomes an error packet
    // rather than propagating into the dispatch loop.
    let out_tx = out_tx.clone();
    tokio::spawn(async move {
        let _permit = permit;
        let packet = match handler.call(args).await {
            Ok(value) => Packet::Response { id, value },
            Err(e) => Packet::Error {
                id,
                reason: json!(e.to_string()),
            },
        };
        send_packet(&out_tx, packet).await;
    });
}

/// Settle-and-remove the pending call matching `id`, if any.
///
/// An unknown or foreign-shaped id is an expected race between local expiry
/// and peer completion: dropped silently, no state change.
fn settle(shared: &Arc<Shared>, id: &Value, settlement: Settlement) {
    let key = match id.as_u64() {
        Some(k) => k,
        None => {
            tracing::trace!("dropping settlement with foreign id shape");
            return;
        }
    };
    match shared.pending.lock().remove(&key) {
        Some(pending) => {
            let _ = pending.tx.send(settlement);
        }
        None => tracing::trace!(id = key, "dropping packet for unknown or expired call id"),
    }
}

/// Queue one packet for the outbound writer.
async fn send_packet(out_tx: &mpsc::Sender<Outgoing>, packet: Packet) {
    let outgoing = Outgoing {
        message: packet.to_value(),
        transfer: Vec::new(),
    };
    if out_tx.send(outgoing).await.is_err() {
        tracing::debug!("outbound channel closed; packet dropped");
    }
}

/// Current wall clock in epoch milliseconds.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
