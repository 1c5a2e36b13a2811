//! Pipe - drains a source node into a sink node until termination.
//!
//! The pipe owns neither endpoint, only the draining loop: it repeatedly
//! pulls the next value from the source and forwards it to the sink's
//! freshly minted handle. Source completion surfaces as the pipe's own
//! completion value; a source failure propagates as the pipe's failure.

use crate::error::{PortlinkError, Result};
use crate::stream::signal::Signal;
use crate::stream::sink::{Sink, SinkItem};
use crate::stream::source::{Source, Step};

/// Drain `source` into `sink` until the source terminates.
///
/// On termination the End sentinel is forwarded to the sink (unlocking it)
/// and the source's terminal value becomes the pipe's completion value.
pub async fn pipe<T>(source: &Source<T>, sink: &Sink<T>) -> Result<Option<T>>
where
    T: Clone + Send + 'static,
{
    let mut cursor = source.iter();
    let handle = sink.handle();
    loop {
        match cursor.next().await? {
            Step::Item(v) => handle.send(SinkItem::Value(v))?,
            Step::Done(terminal) => {
                handle.send(SinkItem::End)?;
                return Ok(terminal);
            }
        }
    }
}

/// Like [`pipe`], with cooperative early termination.
///
/// When `stop` triggers, the cancellation request is forwarded into the
/// underlying source cursor and the pipe returns
/// [`PortlinkError::Cancelled`]. Values already delivered to the sink are
/// not retracted.
pub async fn pipe_with_stop<T>(source: &Source<T>, sink: &Sink<T>, stop: &Signal) -> Result<Option<T>>
where
    T: Clone + Send + 'static,
{
    let mut cursor = source.iter();
    let handle = sink.handle();
    loop {
        let stopped = stop.wait();
        let next = cursor.next();
        tokio::select! {
            _ = stopped => {
                cursor.cancel();
                return Err(PortlinkError::Cancelled);
            }
            step = next => match step? {
                Step::Item(v) => handle.send(SinkItem::Value(v))?,
                Step::Done(terminal) => {
                    handle.send(SinkItem::End)?;
                    return Ok(terminal);
                }
            }
        }
    }
}
