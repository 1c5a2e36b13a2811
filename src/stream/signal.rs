//! Broadcast signal - a re-triggerable wake-up primitive.
//!
//! [`Signal`] is a pure synchronization primitive: `trigger()` wakes every
//! party currently awaiting the signal and immediately re-arms a fresh wait
//! point. No payload and no history are retained - a waiter that was not
//! already armed when `trigger()` fired does not observe that trigger.
//!
//! # Example
//!
//! ```ignore
//! use portlink::stream::Signal;
//!
//! let signal = Signal::new();
//! let wait = signal.wait(); // armed at call time
//! signal.trigger();
//! wait.await; // observes the trigger
//! ```

use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// A non-buffering broadcast wake-up primitive.
///
/// Think "condition variable without missed-wakeup buffering", as opposed
/// to a queue: triggers are delivered only to waiters armed at that instant.
#[derive(Debug, Default)]
pub struct Signal {
    waiters: Mutex<Vec<oneshot::Sender<()>>>,
}

impl Signal {
    /// Create a new signal with no armed waiters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every currently armed waiter and re-arm the signal.
    ///
    /// Waiters that arm after this call wait for the next trigger.
    pub fn trigger(&self) {
        let woken = std::mem::take(&mut *self.waiters.lock());
        for waiter in woken {
            let _ = waiter.send(());
        }
    }

    /// Arm a wait point and return a future that resolves on the next trigger.
    ///
    /// The wait point is armed when this method is *called*, not when the
    /// returned future is first polled, so `let w = s.wait(); s.trigger();`
    /// followed by `w.await` observes the trigger.
    ///
    /// If the signal is dropped before the next trigger the future resolves
    /// anyway; waiting on a dead signal is not an error.
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().push(tx);
        async move {
            let _ = rx.await;
        }
    }

    /// Number of currently armed waiters.
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_trigger_wakes_armed_waiter() {
        let signal = Signal::new();
        let wait = signal.wait();
        signal.trigger();
        timeout(Duration::from_millis(100), wait)
            .await
            .expect("armed waiter must be woken");
    }

    #[tokio::test]
    async fn test_late_waiter_misses_trigger() {
        let signal = Signal::new();
        signal.trigger();
        // Armed after the trigger: must not observe it.
        let wait = signal.wait();
        let result = timeout(Duration::from_millis(50), wait).await;
        assert!(result.is_err(), "late waiter must not observe past trigger");
    }

    #[tokio::test]
    async fn test_trigger_wakes_all_waiters_once() {
        let signal = Signal::new();
        let w1 = signal.wait();
        let w2 = signal.wait();
        assert_eq!(signal.waiter_count(), 2);

        signal.trigger();
        assert_eq!(signal.waiter_count(), 0);

        timeout(Duration::from_millis(100), w1).await.unwrap();
        timeout(Duration::from_millis(100), w2).await.unwrap();
    }

    #[tokio::test]
    async fn test_retrigger_after_rearm() {
        let signal = Signal::new();

        let w1 = signal.wait();
        signal.trigger();
        timeout(Duration::from_millis(100), w1).await.unwrap();

        // The signal re-armed itself; a second round works identically.
        let w2 = signal.wait();
        signal.trigger();
        timeout(Duration::from_millis(100), w2).await.unwrap();
    }
}
