//! Keyed single-flight async cache with LRU eviction.
//!
//! Each key has at most one in-flight producer at a time: the first caller
//! starts it and every concurrent caller for the same key waits on the
//! same result. Completed values stay cached and are served without
//! re-running the producer; failures are never cached, so the next caller
//! retries.
//!
//! Cancellation is reference-counted. Every waiter holds its own
//! cancellation token; a waiter dropping out only decrements the entry's
//! waiter count, and the entry's shared token (handed to the producer)
//! fires only when the count reaches zero while the producer is still
//! running. The entry is removed at that point so a later caller starts
//! fresh.
//!
//! Bookkeeping (map, recency ticks, waiter counts) lives under one mutex;
//! producer futures run outside it as spawned tasks.

use crate::error::ContourError;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Shared handle to a single-flight LRU cache.
#[derive(Debug)]
pub struct AsyncCache<K, V> {
    state: Arc<Mutex<State<K, V>>>,
    max_size: usize,
}

impl<K, V> Clone for AsyncCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            max_size: self.max_size,
        }
    }
}

#[derive(Debug)]
struct State<K, V> {
    entries: HashMap<K, Entry<V>>,
    tick: u64,
    next_id: u64,
}

#[derive(Debug)]
struct Entry<V> {
    /// Distinguishes this entry from a later one under the same key, so
    /// stale completions and releases never touch a replacement.
    id: u64,
    last_used: u64,
    waiters: usize,
    cancel: CancellationToken,
    slot: Slot<V>,
}

#[derive(Debug)]
enum Slot<V> {
    Pending(broadcast::Sender<Result<V, ContourError>>),
    Ready(V),
}

enum Claim<V> {
    Hit(V),
    Wait(u64, broadcast::Receiver<Result<V, ContourError>>),
    Produce {
        id: u64,
        cancel: CancellationToken,
        tx: broadcast::Sender<Result<V, ContourError>>,
        rx: broadcast::Receiver<Result<V, ContourError>>,
    },
}

impl<K, V> AsyncCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create a cache retaining at most `max_size` entries.
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                entries: HashMap::new(),
                tick: 0,
                next_id: 0,
            })),
            max_size,
        }
    }

    /// Number of entries currently held (cached or in flight).
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    /// True when nothing is cached or in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when `key` has a cached or in-flight entry.
    pub fn contains(&self, key: &K) -> bool {
        self.state.lock().unwrap().entries.contains_key(key)
    }

    /// Look up `key`, starting `producer` only when no entry exists.
    ///
    /// The producer receives the key and the entry's shared cancellation
    /// token. `cancel` is this caller's own token: when it fires before
    /// the result arrives, the call returns [`ContourError::Cancelled`]
    /// and the shared token fires only if no other waiter remains.
    pub async fn get<F, Fut>(
        &self,
        key: &K,
        cancel: &CancellationToken,
        producer: F,
    ) -> Result<V, ContourError>
    where
        F: FnOnce(K, CancellationToken) -> Fut,
        Fut: Future<Output = Result<V, ContourError>> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(ContourError::Cancelled);
        }

        let claim = {
            let mut state = self.state.lock().unwrap();
            state.tick += 1;
            let tick = state.tick;
            if let Some(entry) = state.entries.get_mut(key) {
                entry.last_used = tick;
                match &entry.slot {
                    Slot::Ready(value) => Claim::Hit(value.clone()),
                    Slot::Pending(tx) => {
                        entry.waiters += 1;
                        Claim::Wait(entry.id, tx.subscribe())
                    }
                }
            } else {
                state.next_id += 1;
                let id = state.next_id;
                let shared_cancel = CancellationToken::new();
                let (tx, rx) = broadcast::channel(1);
                state.entries.insert(
                    key.clone(),
                    Entry {
                        id,
                        last_used: tick,
                        waiters: 1,
                        cancel: shared_cancel.clone(),
                        slot: Slot::Pending(tx.clone()),
                    },
                );
                if state.entries.len() > self.max_size {
                    Self::evict_least_recent(&mut state, id);
                }
                Claim::Produce {
                    id,
                    cancel: shared_cancel,
                    tx,
                    rx,
                }
            }
        };

        match claim {
            Claim::Hit(value) => Ok(value),
            Claim::Wait(id, rx) => self.wait(key, id, rx, cancel).await,
            Claim::Produce {
                id,
                cancel: shared_cancel,
                tx,
                rx,
            } => {
                let future = producer(key.clone(), shared_cancel);
                let state = Arc::clone(&self.state);
                let task_key = key.clone();
                tokio::spawn(async move {
                    let result = future.await;
                    {
                        let mut state = state.lock().unwrap();
                        match &result {
                            Ok(value) => {
                                if let Some(entry) = state.entries.get_mut(&task_key) {
                                    if entry.id == id {
                                        entry.slot = Slot::Ready(value.clone());
                                    }
                                }
                            }
                            Err(_) => {
                                // Failures are not cached; the next caller
                                // gets a fresh attempt.
                                if state
                                    .entries
                                    .get(&task_key)
                                    .is_some_and(|entry| entry.id == id)
                                {
                                    state.entries.remove(&task_key);
                                }
                            }
                        }
                    }
                    // Waiters keep their subscriptions even if the entry
                    // was evicted mid-flight; deliver regardless.
                    let _ = tx.send(result);
                });
                self.wait(key, id, rx, cancel).await
            }
        }
    }

    /// Wait for a pending entry's result or for the caller to cancel.
    async fn wait(
        &self,
        key: &K,
        id: u64,
        mut rx: broadcast::Receiver<Result<V, ContourError>>,
        cancel: &CancellationToken,
    ) -> Result<V, ContourError> {
        tokio::select! {
            _ = cancel.cancelled() => {
                self.release(key, id);
                Err(ContourError::Cancelled)
            }
            received = rx.recv() => {
                self.settle(key, id);
                match received {
                    Ok(result) => result,
                    // Sender dropped without a result: the entry was torn
                    // down underneath us (all other waiters cancelled).
                    Err(_) => Err(ContourError::Cancelled),
                }
            }
        }
    }

    /// Drop one waiter after a cancellation; tear the entry down when it
    /// was the last one and the producer has not finished.
    fn release(&self, key: &K, id: u64) {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };
        if entry.id != id {
            return;
        }
        entry.waiters = entry.waiters.saturating_sub(1);
        if entry.waiters == 0 {
            if let Slot::Pending(_) = entry.slot {
                trace!("last waiter cancelled; aborting shared producer");
                entry.cancel.cancel();
                state.entries.remove(key);
            }
        }
    }

    /// Drop one waiter after it observed the result; the entry stays.
    fn settle(&self, key: &K, id: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.get_mut(key) {
            if entry.id == id {
                entry.waiters = entry.waiters.saturating_sub(1);
            }
        }
    }

    /// Remove the entry with the smallest recency tick, sparing the one
    /// just inserted (the caller's own is always freshest).
    fn evict_least_recent(state: &mut State<K, V>, spare_id: u64) {
        let victim = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.id != spare_id)
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            state.entries.remove(&key);
        }
    }
}
