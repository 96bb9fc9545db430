//! Single-flight memoizing cache.
//!
//! [`SyncCache`] memoizes the result of an expensive async computation per
//! key for the lifetime of a resolver session. It backs both the project
//! cache (`"<clone-url>#<ref>"` keys) and the build-file cache.
//!
//! # Concurrency Model
//!
//! - **Per-key single flight**: the first caller for a key becomes the leader
//!   and runs the computation; concurrent callers for the same key wait for
//!   it and observe the same value or the same error
//! - **Lock-free map**: a `DashMap` of [`Slot`]s, so different keys never
//!   contend and no lock is held while a computation runs
//! - **Notification-based waiting**: waiters hold a `tokio::sync::Notify`
//!   future created *before* the map shard is released, so a leader that
//!   finishes in between cannot be missed
//!
//! # Failure Semantics
//!
//! Errors are never cached: the leader removes its pending slot, publishes
//! the error to current waiters, and the next caller starts a fresh
//! computation. Cancellation is special: a cancelled leader's waiters do not
//! adopt [`GitCtxError::Cancelled`] but retry, and a leader whose future is
//! dropped mid-computation releases the key the same way through a drop
//! guard.

use crate::core::GitCtxError;
use anyhow::Result;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// State of one in-flight computation.
#[derive(Debug)]
struct Flight<V> {
    notify: Notify,
    outcome: OnceLock<Result<V, GitCtxError>>,
}

impl<V> Flight<V> {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            outcome: OnceLock::new(),
        }
    }
}

/// Cache slot for one key.
#[derive(Debug)]
enum Slot<V> {
    /// A leader is computing the value
    Pending(Arc<Flight<V>>),
    /// The value is available
    Ready(V),
}

/// Releases the key when the leader's future is dropped before completing.
struct FlightGuard<'a, V> {
    map: &'a DashMap<String, Slot<V>>,
    key: &'a str,
    flight: Arc<Flight<V>>,
    completed: bool,
}

impl<V: Clone> FlightGuard<'_, V> {
    fn complete(mut self, result: Result<V, GitCtxError>) -> Result<V, GitCtxError> {
        self.completed = true;
        match &result {
            Ok(value) => {
                self.map.insert(self.key.to_string(), Slot::Ready(value.clone()));
            }
            Err(_) => {
                self.release();
            }
        }
        let _ = self.flight.outcome.set(result.clone());
        self.flight.notify.notify_waiters();
        result
    }
}

impl<V> FlightGuard<'_, V> {
    /// Remove the slot if it still belongs to this flight.
    fn release(&self) {
        self.map.remove_if(self.key, |_, slot| {
            matches!(slot, Slot::Pending(flight) if Arc::ptr_eq(flight, &self.flight))
        });
    }
}

impl<V> Drop for FlightGuard<'_, V> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        tracing::debug!(target: "gitctx::cache", "Computation for {} abandoned", self.key);
        self.release();
        self.flight.notify.notify_waiters();
    }
}

/// Concurrent memoizing cache with per-key single flight.
///
/// ```rust,no_run
/// use gitctx::cache::SyncCache;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), gitctx::core::GitCtxError> {
/// let cache: SyncCache<u64> = SyncCache::new("numbers");
/// let cancel = CancellationToken::new();
/// let v = cache.get_or_compute(&cancel, "answer", || async { Ok(42) }).await?;
/// assert_eq!(v, 42);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SyncCache<V> {
    name: &'static str,
    entries: DashMap<String, Slot<V>>,
}

impl<V> SyncCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty cache. `name` only appears in log lines.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: DashMap::new(),
        }
    }

    /// Return the value for `key`, computing it at most once concurrently.
    ///
    /// `compute` only runs when this caller becomes the leader for `key`.
    ///
    /// # Errors
    ///
    /// Returns the leader's error (shared by all callers waiting on that
    /// computation), or [`GitCtxError::Cancelled`] when `cancel` fires while
    /// this caller waits or computes.
    pub async fn get_or_compute<F, Fut>(
        &self,
        cancel: &CancellationToken,
        key: &str,
        compute: F,
    ) -> Result<V, GitCtxError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, GitCtxError>>,
    {
        loop {
            if cancel.is_cancelled() {
                return Err(GitCtxError::Cancelled);
            }

            let flight = match self.entries.entry(key.to_string()) {
                Entry::Occupied(entry) => match entry.get() {
                    Slot::Ready(value) => {
                        tracing::debug!(target: "gitctx::cache", "[{}] hit {}", self.name, key);
                        return Ok(value.clone());
                    }
                    Slot::Pending(flight) => {
                        let flight = flight.clone();
                        // Register before releasing the shard so a leader that
                        // completes right after the drop still wakes us.
                        let notified = flight.notify.notified();
                        tokio::pin!(notified);
                        notified.as_mut().enable();
                        drop(entry);

                        tracing::debug!(target: "gitctx::cache", "[{}] waiting for {}", self.name, key);
                        if flight.outcome.get().is_none() {
                            tokio::select! {
                                () = cancel.cancelled() => return Err(GitCtxError::Cancelled),
                                () = &mut notified => {}
                            }
                        }

                        match flight.outcome.get() {
                            Some(Ok(value)) => return Ok(value.clone()),
                            Some(Err(e)) if !e.is_cancelled() => return Err(e.clone()),
                            // Leader cancelled or abandoned: compete for the key again.
                            _ => continue,
                        }
                    }
                },
                Entry::Vacant(entry) => {
                    let flight = Arc::new(Flight::new());
                    entry.insert(Slot::Pending(flight.clone()));
                    flight
                }
            };

            tracing::debug!(target: "gitctx::cache", "[{}] miss {}", self.name, key);
            let guard = FlightGuard {
                map: &self.entries,
                key,
                flight,
                completed: false,
            };
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(GitCtxError::Cancelled),
                result = compute() => result,
            };
            return guard.complete(result);
        }
    }

    /// Insert `value` under `key` unless the key is already present.
    ///
    /// # Errors
    ///
    /// Fails when the key holds a value or a computation is in flight for it.
    pub fn add(&self, key: &str, value: V) -> Result<()> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => Err(anyhow::anyhow!("[{}] key {} already present", self.name, key)),
            Entry::Vacant(entry) => {
                entry.insert(Slot::Ready(value));
                tracing::debug!(target: "gitctx::cache", "[{}] added {}", self.name, key);
                Ok(())
            }
        }
    }

    /// The ready value for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).and_then(|slot| match slot.value() {
            Slot::Ready(value) => Some(value.clone()),
            Slot::Pending(_) => None,
        })
    }

    /// Whether `key` holds a value or a computation in flight.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of keys, pending ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All keys currently holding a value, sorted.
    #[must_use]
    pub fn ready_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| matches!(e.value(), Slot::Ready(_)))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }
}
