//! Request coalescing ("singleflight").
//!
//! Concurrent requests for the same key share one unit of work: the first
//! caller becomes the leader and runs it, later callers wait for the leader's
//! result. If the leader is cancelled before finishing, waiters wake up and
//! one of them takes over.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

/// State for one in-flight key.
struct Flight<T> {
    /// Notification for waiters
    notify: Notify,
    /// Result of the work (set when complete)
    result: Mutex<Option<T>>,
}

impl<T: Clone> Flight<T> {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            result: Mutex::new(None),
        }
    }

    fn result(&self) -> Option<T> {
        lock(&self.result).clone()
    }
}

/// Coalesces concurrent work by key.
pub struct SingleFlight<T> {
    in_flight: Mutex<HashMap<String, Arc<Flight<T>>>>,
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys currently being worked on.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Run `work` for `key`, or wait for the caller already running it.
    ///
    /// `work` is only invoked if this caller ends up as the leader.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let flight = loop {
            let (flight, is_leader) = self.join(key);
            if is_leader {
                break flight;
            }

            let notified = flight.notify.notified();
            tokio::pin!(notified);

            // Register before checking, so a completion between the check and
            // the await still wakes us
            notified.as_mut().enable();
            if let Some(result) = flight.result() {
                return result;
            }
            notified.await;

            if let Some(result) = flight.result() {
                return result;
            }
            // Leader went away without a result; try again
        };

        let guard = LeaderGuard {
            owner: self,
            key,
            flight: &flight,
        };

        let result = work().await;
        *lock(&flight.result) = Some(result.clone());
        drop(guard);

        result
    }

    /// Look up or register the flight for `key`. Returns `true` for the leader.
    fn join(&self, key: &str) -> (Arc<Flight<T>>, bool) {
        let mut in_flight = lock(&self.in_flight);
        if let Some(flight) = in_flight.get(key) {
            return (flight.clone(), false);
        }

        let flight = Arc::new(Flight::new());
        in_flight.insert(key.to_string(), flight.clone());
        (flight, true)
    }
}

/// Removes the leader's entry and wakes waiters, whether the leader
/// finished or was dropped mid-flight.
struct LeaderGuard<'a, T> {
    owner: &'a SingleFlight<T>,
    key: &'a str,
    flight: &'a Arc<Flight<T>>,
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        {
            let mut in_flight = lock(&self.owner.in_flight);
            if in_flight
                .get(self.key)
                .is_some_and(|current| Arc::ptr_eq(current, self.flight))
            {
                in_flight.remove(self.key);
            }
        }
        self.flight.notify.notify_waiters();
    }
}

/// Lock a std mutex, ignoring poisoning (the guarded data stays consistent).
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
