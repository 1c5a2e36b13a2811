//! Source node - a cancellable asynchronous producer with a multi-consumer
//! iteration protocol over a single in-flight value slot.
//!
//! A [`Source`] is constructed from a *driver* routine that receives a
//! [`SourceOutput`] capability. Each `put` resolves every consumer currently
//! awaiting the next value and atomically re-arms a fresh slot. There is no
//! history: a consumer that arms its cursor after a `put` does not observe
//! the missed value, and two cursors reading at different moments can
//! observe different values.
//!
//! Values crossing the boundary are defensively copied: every armed consumer
//! receives its own [`Clone`] of the value (for owned payloads such as
//! `serde_json::Value` this is a deep, structure-preserving copy). To opt
//! out and share zero-copy, produce `Arc<T>` items - cloning is then
//! reference-count only.
//!
//! # Example
//!
//! ```ignore
//! use portlink::stream::{Source, Step};
//!
//! let source = Source::new(|out| async move {
//!     out.put(1).await;
//!     out.put(2).await;
//!     Ok(Some(0)) // terminal value
//! });
//!
//! let mut cursor = source.iter();
//! while let Step::Item(v) = cursor.next().await? {
//!     println!("{v}");
//! }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

use crate::error::{PortlinkError, Result};

/// One step of a cursor's iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// The next produced value.
    Item(T),
    /// The stream terminated; carries the driver's terminal value.
    Done(Option<T>),
}

/// Event delivered to an armed waiter.
enum Event<T> {
    Item(T),
    Done(Option<T>),
    Failed(String),
}

enum State<T> {
    /// Producing: the slot holds the currently armed waiters.
    Open { waiters: Vec<oneshot::Sender<Event<T>>> },
    /// Driver returned; terminal value retained for late cursors.
    Done(Option<T>),
    /// Driver failed; reason re-raised to every consumer.
    Failed(String),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    /// Cleared by cooperative cancellation; drivers poll it.
    producing: AtomicBool,
    /// True while the driver task is alive.
    processing: AtomicBool,
}

/// A cancellable asynchronous producer.
///
/// Cloning a `Source` clones the handle, not the stream: all clones observe
/// the same underlying slot.
pub struct Source<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// The single operation handed to a source's driver routine.
pub struct SourceOutput<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for SourceOutput<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// An independent iteration cursor over a source.
///
/// Obtained from [`Source::iter`]; each call yields a fresh cursor.
pub struct Cursor<T> {
    shared: Arc<Shared<T>>,
}

/// Pre-resolved or armed state of one `next()` call.
enum Armed<T> {
    Ready(Result<Step<T>>),
    Wait(oneshot::Receiver<Event<T>>),
}

impl<T: Clone + Send + 'static> Source<T> {
    /// Spawn `driver` and expose its output as a source.
    ///
    /// The driver's return value becomes the terminal value observed by
    /// every pending and future consumer; a driver failure is re-raised to
    /// them as [`PortlinkError::Stream`].
    pub fn new<F, Fut>(driver: F) -> Self
    where
        F: FnOnce(SourceOutput<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::Open {
                waiters: Vec::new(),
            }),
            producing: AtomicBool::new(true),
            processing: AtomicBool::new(true),
        });

        let output = SourceOutput {
            shared: shared.clone(),
        };
        let driver_shared = shared.clone();

        tokio::spawn(async move {
            let result = driver(output).await;
            finish(&driver_shared, result);
        });

        Self { shared }
    }

    /// Function-driven variant: each time `cycle` fires, put `f()`.
    ///
    /// Terminates with [`PortlinkError::Cancelled`] once [`Source::cancel`]
    /// is called and the next cycle fires.
    pub fn from_fn<F>(cycle: Arc<Notify>, mut f: F) -> Self
    where
        F: FnMut() -> T + Send + 'static,
    {
        Self::new(move |out| async move {
            loop {
                cycle.notified().await;
                if !out.is_producing() {
                    return Err(PortlinkError::Cancelled);
                }
                out.put(f()).await;
            }
        })
    }

    /// Iterator-driven variant: each time `cycle` fires, put the next item
    /// of `iter`; end of sequence terminates the stream.
    pub fn from_iter<I>(cycle: Arc<Notify>, iter: I) -> Self
    where
        I: IntoIterator<Item = T> + Send + 'static,
        I::IntoIter: Send,
    {
        Self::new(move |out| async move {
            let mut items = iter.into_iter();
            loop {
                cycle.notified().await;
                if !out.is_producing() {
                    return Err(PortlinkError::Cancelled);
                }
                match items.next() {
                    Some(v) => out.put(v).await,
                    None => return Ok(None),
                }
            }
        })
    }

    /// Start a fresh, independent iteration cursor.
    pub fn iter(&self) -> Cursor<T> {
        Cursor {
            shared: self.shared.clone(),
        }
    }

    /// Request cooperative cancellation: the driver stops producing once it
    /// next observes the flag. Already-delivered values are not retracted.
    pub fn cancel(&self) {
        self.shared.producing.store(false, Ordering::Release);
    }

    /// True while the driver task is alive.
    pub fn is_processing(&self) -> bool {
        self.shared.processing.load(Ordering::Acquire)
    }

    /// False once cancellation has been requested or the driver finished.
    pub fn is_producing(&self) -> bool {
        self.shared.producing.load(Ordering::Acquire)
    }
}

impl<T: Clone> SourceOutput<T> {
    /// Resolve every currently armed consumer with a clone of `value` and
    /// re-arm a fresh slot.
    ///
    /// The re-arm is the atomic swap of the waiter set; it happens before
    /// this call returns control to the driver. The trailing yield lets the
    /// woken consumers re-arm their cursors before the driver produces the
    /// next value.
    pub async fn put(&self, value: T) {
        let waiters = {
            match &mut *self.shared.state.lock() {
                State::Open { waiters } => std::mem::take(waiters),
                // Driver kept a clone past termination; nothing to deliver to.
                _ => Vec::new(),
            }
        };
        for waiter in waiters {
            let _ = waiter.send(Event::Item(value.clone()));
        }
        tokio::task::yield_now().await;
    }

    /// False once cancellation has been requested.
    pub fn is_producing(&self) -> bool {
        self.shared.producing.load(Ordering::Acquire)
    }
}

impl<T: Clone> Cursor<T> {
    /// Await the next value or the terminal step.
    ///
    /// The returned future is armed at *call* time, before its first poll,
    /// so a value put between `next()` and the `await` is observed.
    pub fn next(&mut self) -> impl Future<Output = Result<Step<T>>> + Send + 'static
    where
        T: Send + 'static,
    {
        let armed = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Open { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Armed::Wait(rx)
                }
                State::Done(terminal) => Armed::Ready(Ok(Step::Done(terminal.clone()))),
                State::Failed(reason) => Armed::Ready(Err(PortlinkError::Stream(reason.clone()))),
            }
        };
        async move {
            match armed {
                Armed::Ready(step) => step,
                Armed::Wait(rx) => match rx.await {
                    Ok(Event::Item(v)) => Ok(Step::Item(v)),
                    Ok(Event::Done(terminal)) => Ok(Step::Done(terminal)),
                    Ok(Event::Failed(reason)) => Err(PortlinkError::Stream(reason)),
                    Err(_) => Err(PortlinkError::Closed),
                },
            }
        }
    }

    /// Forward a cancellation request into the underlying source.
    pub fn cancel(&self) {
        self.shared.producing.store(false, Ordering::Release);
    }
}

/// Transition to the terminal state and settle every armed waiter.
fn finish<T: Clone>(shared: &Shared<T>, result: Result<Option<T>>) {
    let (terminal_state, waiters) = {
        let mut state = shared.state.lock();
        let waiters = match &mut *state {
            State::Open { waiters } => std::mem::take(waiters),
            _ => Vec::new(),
        };
        let next = match &result {
            Ok(terminal) => State::Done(terminal.clone()),
            Err(e) => State::Failed(e.to_string()),
        };
        *state = next;
        (result, waiters)
    };
    for waiter in waiters {
        let event = match &terminal_state {
            Ok(terminal) => Event::Done(terminal.clone()),
            Err(e) => Event::Failed(e.to_string()),
        };
        let _ = waiter.send(event);
    }
    shared.producing.store(false, Ordering::Release);
    shared.processing.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_fan_out_same_value() {
        let cycle = Arc::new(Notify::new());
        let mut counter = 0;
        let source = Source::from_fn(cycle.clone(), move || {
            counter += 1;
            counter
        });

        let mut c1 = source.iter();
        let mut c2 = source.iter();
        let f1 = c1.next();
        let f2 = c2.next();
        cycle.notify_one();

        let v1 = timeout(Duration::from_millis(200), f1).await.unwrap().unwrap();
        let v2 = timeout(Duration::from_millis(200), f2).await.unwrap().unwrap();
        assert_eq!(v1, Step::Item(1));
        assert_eq!(v2, Step::Item(1));
    }

    #[tokio::test]
    async fn test_late_consumer_misses_value() {
        let cycle = Arc::new(Notify::new());
        let source = Source::from_fn(cycle.clone(), || 42);

        let mut c1 = source.iter();
        let f1 = c1.next();
        cycle.notify_one();
        assert_eq!(
            timeout(Duration::from_millis(200), f1).await.unwrap().unwrap(),
            Step::Item(42)
        );

        // Armed after the put: no history, the value is gone.
        let mut c2 = source.iter();
        let f2 = c2.next();
        assert!(timeout(Duration::from_millis(50), f2).await.is_err());
    }

    #[tokio::test]
    async fn test_iterator_end_terminates_stream() {
        let cycle = Arc::new(Notify::new());
        let source = Source::from_iter(cycle.clone(), vec![10, 20]);
        let mut cursor = source.iter();

        for expected in [10, 20] {
            let f = cursor.next();
            cycle.notify_one();
            assert_eq!(
                timeout(Duration::from_millis(200), f).await.unwrap().unwrap(),
                Step::Item(expected)
            );
        }

        let f = cursor.next();
        cycle.notify_one();
        assert_eq!(
            timeout(Duration::from_millis(200), f).await.unwrap().unwrap(),
            Step::Done(None)
        );

        // Terminal state is retained for cursors arriving afterwards.
        let mut late = source.iter();
        assert_eq!(late.next().await.unwrap(), Step::Done(None));
    }

    #[tokio::test]
    async fn test_driver_return_value_delivered() {
        let source = Source::<i32>::new(|_out| async move { Ok(Some(7)) });
        let mut cursor = source.iter();
        assert_eq!(
            timeout(Duration::from_millis(200), cursor.next())
                .await
                .unwrap()
                .unwrap(),
            Step::Done(Some(7))
        );
    }

    #[tokio::test]
    async fn test_driver_failure_reraised_to_consumers() {
        let source = Source::<i32>::new(|_out| async move {
            Err(PortlinkError::Protocol("boom".into()))
        });
        let mut c1 = source.iter();
        let mut c2 = source.iter();

        let e1 = timeout(Duration::from_millis(200), c1.next())
            .await
            .unwrap()
            .unwrap_err();
        let e2 = timeout(Duration::from_millis(200), c2.next())
            .await
            .unwrap()
            .unwrap_err();
        assert!(e1.to_string().contains("boom"));
        assert!(e2.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_cancel_stops_producer() {
        let cycle = Arc::new(Notify::new());
        let source = Source::from_fn(cycle.clone(), || 1);

        source.cancel();
        let mut cursor = source.iter();
        let f = cursor.next();
        cycle.notify_one();

        let err = timeout(Duration::from_millis(200), f)
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, PortlinkError::Stream(_)));
        assert!(!source.is_producing());
    }
}
