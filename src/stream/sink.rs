//! Sink node - a single-owner consumer callback with explicit
//! lock/invalidate semantics.
//!
//! A [`Sink`] wraps a plain callback. The [`Sink::handle`] accessor mints a
//! new [`SinkHandle`] on every access and invalidates any previously minted
//! handle for the same sink; invoking a stale handle fails loudly with
//! [`PortlinkError::StaleSink`] instead of silently forwarding. This
//! prevents a sink from being unknowingly bound to two concurrent producers.
//!
//! The [`End`](SinkItem::End) sentinel unlocks the sink (permits
//! re-binding), the [`Noop`](SinkItem::Noop) sentinel is ignored, any other
//! item is forwarded to the wrapped callback. The callback's return value is
//! discarded - the contract is fire-and-forget.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{PortlinkError, Result};

/// One item delivered to a sink handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkItem<T> {
    /// A payload, forwarded to the wrapped callback.
    Value(T),
    /// Ignored entirely.
    Noop,
    /// "No more input": runs the end hook and unlocks the sink.
    End,
}

struct Inner<T> {
    callback: Mutex<Box<dyn FnMut(T) + Send>>,
    /// Runs on the End sentinel, before unlock.
    on_end: Mutex<Box<dyn FnMut() + Send>>,
    /// Generation of the currently valid handle.
    generation: AtomicU64,
    locked: AtomicBool,
}

/// A single-owner consumer callback.
///
/// Cloning a `Sink` clones the handle to the same underlying callback and
/// lock state.
pub struct Sink<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// A minted callback token; invalidated when a newer handle is taken.
pub struct SinkHandle<T> {
    inner: Arc<Inner<T>>,
    generation: u64,
}

impl<T> Sink<T> {
    /// Wrap `callback` in a new, unlocked sink.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        Self::with_end(callback, || {})
    }

    /// Wrap `callback` with an additional hook invoked on the End sentinel.
    pub fn with_end<F, E>(callback: F, on_end: E) -> Self
    where
        F: FnMut(T) + Send + 'static,
        E: FnMut() + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                callback: Mutex::new(Box::new(callback)),
                on_end: Mutex::new(Box::new(on_end)),
                generation: AtomicU64::new(0),
                locked: AtomicBool::new(false),
            }),
        }
    }

    /// Mint a new handle, invalidating any previously minted one, and lock
    /// the sink.
    ///
    /// Taking a handle while an earlier one is still live is permitted (that
    /// is the invalidation mechanism) but usually indicates a dangling
    /// producer, so it is logged.
    pub fn handle(&self) -> SinkHandle<T> {
        // The generation bump is serialized with in-flight deliveries: a
        // send already holding the callback lock completes under its old
        // generation; any later send on that handle observes the bump.
        let _delivery = self.inner.callback.lock();
        if self.inner.locked.swap(true, Ordering::AcqRel) {
            tracing::warn!("sink handle re-taken while locked; prior handle invalidated");
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        SinkHandle {
            inner: self.inner.clone(),
            generation,
        }
    }

    /// True while a handle is bound and no End sentinel has arrived.
    pub fn is_locked(&self) -> bool {
        self.inner.locked.load(Ordering::Acquire)
    }
}

impl<T> SinkHandle<T> {
    /// Deliver one item through this handle.
    ///
    /// Fails with [`PortlinkError::StaleSink`] if a newer handle has been
    /// minted since this one. The staleness check happens under the
    /// callback lock, so a handle minted concurrently cannot let a stale
    /// value slip through to the callback.
    pub fn send(&self, item: SinkItem<T>) -> Result<()> {
        match item {
            SinkItem::Value(v) => {
                let mut callback = self.inner.callback.lock();
                if self.is_stale() {
                    return Err(PortlinkError::StaleSink);
                }
                // Return value of the callback is deliberately discarded.
                (callback)(v);
            }
            SinkItem::Noop => {
                if self.is_stale() {
                    return Err(PortlinkError::StaleSink);
                }
            }
            SinkItem::End => {
                let _delivery = self.inner.callback.lock();
                if self.is_stale() {
                    return Err(PortlinkError::StaleSink);
                }
                (self.inner.on_end.lock())();
                self.inner.locked.store(false, Ordering::Release);
            }
        }
        Ok(())
    }

    fn is_stale(&self) -> bool {
        self.inner.generation.load(Ordering::Acquire) != self.generation
    }
}
