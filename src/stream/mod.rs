//! Stream primitives - the general-purpose asynchronous plumbing.
//!
//! - [`Signal`] - a re-triggerable broadcast wake-up with no buffering
//! - [`Source`] - a cancellable producer with multi-consumer iteration
//! - [`Sink`] - a single-owner consumer callback with lock semantics
//! - [`pipe`] - drains a source into a sink until termination
//! - [`Transform`] - a buffered, cycle-driven intermediate stage
//!
//! These are reusable independently of the RPC layer built on top of them.

mod pipe;
mod signal;
mod sink;
mod source;
mod transform;

pub use pipe::{pipe, pipe_with_stop};
pub use signal::Signal;
pub use sink::{Sink, SinkHandle, SinkItem};
pub use source::{Cursor, Source, SourceOutput, Step};
pub use transform::{combine, BoxFuture, StepContext, Transform};
