//! One-shot cancellation channel between the host and scope logic.
//!
//! The host side holds a [`CancelSignal`]; scope logic observes through a
//! [`CancelObserver`]. Cancellation is delivered at most once and is never
//! reset. Polling is a single atomic load; blocking waits park on a condvar
//! and async waits use a [`CancellationToken`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Channel {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    wakeup: Condvar,
    token: CancellationToken,
}

/// Sending half, owned by a lifecycle adapter.
#[derive(Debug)]
pub struct CancelSignal {
    channel: Arc<Channel>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        Self {
            channel: Arc::new(Channel {
                cancelled: AtomicBool::new(false),
                lock: Mutex::new(()),
                wakeup: Condvar::new(),
                token: CancellationToken::new(),
            }),
        }
    }

    /// Deliver cancellation. Returns `false` if it was already delivered.
    pub fn cancel(&self) -> bool {
        if self.channel.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Taking the lock orders this wakeup after any waiter's flag check.
        drop(self.channel.lock.lock().unwrap_or_else(PoisonError::into_inner));
        self.channel.wakeup.notify_all();
        self.channel.token.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.channel.cancelled.load(Ordering::Acquire)
    }

    /// A receiving half for scope logic.
    pub fn observer(&self) -> CancelObserver {
        CancelObserver {
            channel: self.channel.clone(),
        }
    }
}

/// Receiving half handed to scope logic.
#[derive(Debug, Clone)]
pub struct CancelObserver {
    channel: Arc<Channel>,
}

impl CancelObserver {
    pub fn is_cancelled(&self) -> bool {
        self.channel.cancelled.load(Ordering::Acquire)
    }

    /// Block until cancelled or `timeout` elapses; returns whether cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self
            .channel
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !self.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .channel
                .wakeup
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Resolve once cancellation is delivered.
    pub async fn cancelled(&self) {
        self.channel.token.cancelled().await;
    }

    /// A token cancelled together with this channel.
    pub fn token(&self) -> CancellationToken {
        self.channel.token.child_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_one_shot() {
        let signal = CancelSignal::new();
        let observer = signal.observer();
        assert!(!observer.is_cancelled());

        assert!(signal.cancel());
        assert!(!signal.cancel());
        assert!(observer.is_cancelled());
        assert!(observer.token().is_cancelled());
    }

    #[test]
    fn test_wait_times_out() {
        let signal = CancelSignal::new();
        let observer = signal.observer();
        let started = Instant::now();
        assert!(!observer.wait_timeout(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_wakes_on_cancel_from_other_thread() {
        let signal = CancelSignal::new();
        let observer = signal.observer();
        let waiter = std::thread::spawn(move || observer.wait_timeout(Duration::from_secs(10)));

        std::thread::sleep(Duration::from_millis(10));
        signal.cancel();
        assert!(waiter.join().unwrap());
    }

    #[tokio::test]
    async fn test_async_observer() {
        let signal = CancelSignal::new();
        let observer = signal.observer();
        let task = tokio::spawn(async move { observer.cancelled().await });
        signal.cancel();
        task.await.unwrap();
    }
}
