//! Transform node - a buffered intermediate stage with its own pull queue,
//! driven by an external "cycle" trigger.
//!
//! A [`Transform`] exposes an `input` sink that appends arriving items to an
//! internal unbounded FIFO, and an `output` source whose driver, each time
//! the cycle fires, pulls one item out of that queue (awaiting cooperatively
//! while it is empty) and runs a user-supplied step. The step may consume
//! further inputs via [`StepContext::pull`] and emit outputs via
//! [`StepContext::put`]. This decouples inbound arrival rate from outbound
//! processing rate.
//!
//! The cycle is a one-slot wakeup (`tokio::sync::Notify`): a trigger fired
//! while the driver is mid-step is retained for the next iteration.
//!
//! [`combine`] composes N transforms into one by chaining each stage's
//! output directly into the next stage's input through an internal hand-off
//! task, leaving only the first input and the last output externally
//! visible.
//!
//! # Example
//!
//! ```ignore
//! use portlink::stream::{SinkItem, StepContext, Transform};
//!
//! fn double(v: i32, ctx: &mut StepContext<i32>) -> BoxFuture<'_, Result<()>> {
//!     Box::pin(async move {
//!         ctx.put(v * 2).await;
//!         Ok(())
//!     })
//! }
//!
//! let stage = Transform::new(double);
//! stage.input().handle().send(SinkItem::Value(21))?;
//! let mut out = stage.output().iter();
//! let next = out.next(); // arm before triggering
//! stage.trigger();
//! assert_eq!(next.await?, Step::Item(42));
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

use crate::error::Result;
use crate::stream::sink::{Sink, SinkItem};
use crate::stream::source::{Source, SourceOutput, Step};

/// Boxed future used by transform steps.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

enum Queued<T> {
    Item(T),
    Eof,
}

/// Capabilities handed to a transform step: pull further inputs, emit
/// outputs.
pub struct StepContext<T> {
    rx: mpsc::UnboundedReceiver<Queued<T>>,
    out: SourceOutput<T>,
    ended: bool,
    emitted: bool,
}

impl<T: Clone> StepContext<T> {
    /// Consume the next queued input, awaiting cooperatively while the
    /// queue is empty. Returns `None` once the input side has ended.
    pub async fn pull(&mut self) -> Option<T> {
        if self.ended {
            return None;
        }
        match self.rx.recv().await {
            Some(Queued::Item(v)) => Some(v),
            Some(Queued::Eof) | None => {
                self.ended = true;
                None
            }
        }
    }

    /// Emit one output value to the stage's output source.
    pub async fn put(&mut self, value: T) {
        self.emitted = true;
        self.out.put(value).await;
    }
}

/// A buffered transform stage between a sink-shaped input and a
/// source-shaped output.
pub struct Transform<T> {
    input: Sink<T>,
    output: Source<T>,
    cycle: Arc<Notify>,
}

impl<T: Clone + Send + 'static> Transform<T> {
    /// Build a stage around `step`.
    ///
    /// The step runs once per pulled item; what it emits (zero or more
    /// values) goes to the output source before the driver yields.
    pub fn new<F>(step: F) -> Self
    where
        F: for<'a> FnMut(T, &'a mut StepContext<T>) -> BoxFuture<'a, Result<()>> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let cycle = Arc::new(Notify::new());

        let tx_end = tx.clone();
        let input = Sink::with_end(
            move |v| {
                let _ = tx.send(Queued::Item(v));
            },
            move || {
                let _ = tx_end.send(Queued::Eof);
            },
        );

        let driver_cycle = cycle.clone();
        let output = Source::new(move |out| {
            let mut step = step;
            let mut ctx = StepContext {
                rx,
                out,
                ended: false,
                emitted: false,
            };
            async move {
                loop {
                    driver_cycle.notified().await;
                    match ctx.pull().await {
                        Some(item) => {
                            ctx.emitted = false;
                            step(item, &mut ctx).await?;
                            if !ctx.emitted {
                                // The step consumed its cycle without creating
                                // downstream demand; keep the queue draining.
                                driver_cycle.notify_one();
                            }
                        }
                        None => return Ok(None),
                    }
                }
            }
        });

        Self {
            input,
            output,
            cycle,
        }
    }

    /// The stage's input sink.
    pub fn input(&self) -> &Sink<T> {
        &self.input
    }

    /// The stage's output source.
    pub fn output(&self) -> &Source<T> {
        &self.output
    }

    /// Fire the cycle: process one queued item.
    pub fn trigger(&self) {
        self.cycle.notify_one();
    }
}

/// Step used for a zero-stage [`combine`]: pass every item through.
fn identity_step<T: Clone + Send + 'static>(
    v: T,
    ctx: &mut StepContext<T>,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        ctx.put(v).await;
        Ok(())
    })
}

/// Compose `stages` into a single transform by chaining each stage's output
/// into the next stage's input through internal hand-off tasks.
///
/// Only the first stage's input and the last stage's output (and cycle)
/// remain externally visible; the hand-offs take the intermediate sink
/// handles, so previously minted handles for those sinks become stale.
///
/// An empty `stages` yields an identity stage.
pub fn combine<T>(mut stages: Vec<Transform<T>>) -> Transform<T>
where
    T: Clone + Send + 'static,
{
    let mut combined = match stages.pop() {
        Some(stage) => stage,
        None => Transform::new(identity_step),
    };
    while let Some(upstream) = stages.pop() {
        combined = chain(upstream, combined);
    }
    combined
}

/// Wire `upstream`'s output into `downstream`'s input.
fn chain<T>(upstream: Transform<T>, downstream: Transform<T>) -> Transform<T>
where
    T: Clone + Send + 'static,
{
    tokio::spawn(handoff(
        upstream.output.clone(),
        upstream.cycle.clone(),
        downstream.input.clone(),
    ));
    Transform {
        input: upstream.input,
        output: downstream.output,
        cycle: downstream.cycle,
    }
}

/// Free-running pump between two adjacent stages.
async fn handoff<T>(up_out: Source<T>, up_cycle: Arc<Notify>, down_in: Sink<T>)
where
    T: Clone + Send + 'static,
{
    let mut cursor = up_out.iter();
    let handle = down_in.handle();
    loop {
        // Arm before triggering so the produced value cannot be missed.
        let next = cursor.next();
        up_cycle.notify_one();
        match next.await {
            Ok(Step::Item(v)) => {
                if handle.send(SinkItem::Value(v)).is_err() {
                    break;
                }
            }
            Ok(Step::Done(_)) => {
                let _ = handle.send(SinkItem::End);
                break;
            }
            Err(e) => {
                tracing::debug!("transform hand-off stopped: {}", e);
                break;
            }
        }
    }
}
