//! # portlink
//!
//! Transport-agnostic asynchronous stream primitives layered under a
//! request/response correlation protocol.
//!
//! ## Architecture
//!
//! - **Stream plumbing** ([`stream`]): broadcast signals, pull-driven
//!   sources and sinks, pipes and buffered transforms - reusable
//!   independently.
//! - **Correlation layer** ([`rpc`]): maps local calls to remote responses
//!   by id over any [`transport`] endpoint, with per-call timeouts and
//!   bidirectional named-function dispatch.
//!
//! The core assumes an ordered, at-most-once delivery channel per endpoint
//! pair; it does not guarantee exactly-once delivery or ordering across
//! independent calls.
//!
//! ## Example
//!
//! ```ignore
//! use portlink::rpc::RpcSocket;
//! use portlink::transport::channel;
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> portlink::Result<()> {
//!     let (local, remote) = channel::link();
//!
//!     let _server = RpcSocket::builder()
//!         .handle("echo", |v: Value| async move { Ok(v) })
//!         .start(remote.0, remote.1);
//!
//!     let client = RpcSocket::builder().start(local.0, local.1);
//!     let reply = client.call("echo", json!({"v": 5})).await?;
//!     assert_eq!(reply, json!({"v": 5}));
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod rpc;
pub mod stream;
pub mod transport;

pub use error::{PortlinkError, Result};
pub use rpc::{HandlerRegistry, RpcSocket, RpcSocketBuilder};
pub use stream::{pipe, Signal, Sink, SinkItem, Source, Step, Transform};
