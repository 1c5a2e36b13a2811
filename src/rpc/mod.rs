//! Correlation layer - request/response RPC over a transport endpoint.
//!
//! Turns an unreliable, ordered, message-passing channel into a
//! call/response abstraction with timeouts, per-call correlation ids and
//! bidirectional named-function dispatch. See [`RpcSocket`].

mod packet;
mod registry;
mod socket;

pub use packet::{reason_text, Inbound, Packet};
pub use registry::{BoxFuture, Handler, HandlerRegistry, HandlerResult, TypedHandler};
pub use socket::{
    Outgoing, RpcSocket, RpcSocketBuilder, SocketConfig, DEFAULT_MAX_CONCURRENT_HANDLERS,
    DEFAULT_OUTBOUND_CAPACITY,
};
