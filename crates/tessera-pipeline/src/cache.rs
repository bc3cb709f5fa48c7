// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Content-addressed cache for compiled units, plus in-flight request
//! coalescing.
//!
//! Entries are keyed by the compiled content hash: records whose
//! sources compile to identical normalized text share one entry and
//! one loadable reference. Eviction is least-recently-used; the
//! evicted entry is handed back so the caller can revoke its loadable.

use crate::error::PipelineError;
use crate::loader::{Executable, LoadableRef};
use crate::record::ContentHash;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::watch;

/// A cached compiled unit.
#[derive(Debug, Clone)]
pub struct CacheEntry<C> {
    /// The compiled text
    pub compiled_source: String,
    /// The shared loadable backing every record with this hash
    pub loadable: LoadableRef,
    /// The constructor extracted when the unit was loaded
    pub constructor: C,
    /// When the entry was created
    pub created_at: Instant,
    /// Rough size of the entry in bytes
    pub size_estimate: usize,
}

/// Bounded, recency-ordered cache of compiled units.
pub struct CacheManager<C> {
    entries: Mutex<LruCache<ContentHash, CacheEntry<C>>>,
}

impl<C: Clone> CacheManager<C> {
    /// Cache holding at most `max_entries` entries.
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).expect("capacity is at least one");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up an entry, extending its recency.
    pub fn get(&self, hash: &ContentHash) -> Option<CacheEntry<C>> {
        self.entries.lock().get(hash).cloned()
    }

    /// Insert an entry.
    ///
    /// Idempotent: a hash that is already cached only has its recency
    /// extended, so duplicate storage never occurs. Returns the entry
    /// evicted to make room, if any — the caller must revoke its
    /// loadable.
    pub fn put(&self, hash: ContentHash, entry: CacheEntry<C>) -> Option<CacheEntry<C>> {
        let mut entries = self.entries.lock();
        if entries.contains(&hash) {
            entries.promote(&hash);
            return None;
        }
        entries.push(hash, entry).map(|(_, evicted)| evicted)
    }

    /// Remove an entry. The caller takes over revocation of its
    /// loadable.
    pub fn remove(&self, hash: &ContentHash) -> Option<CacheEntry<C>> {
        self.entries.lock().pop(hash)
    }

    /// Evict the least recently used entry. The caller takes over
    /// revocation of its loadable. `put` evicts automatically at
    /// capacity; this is for hosts that shed cache under memory
    /// pressure.
    pub fn evict(&self) -> Option<CacheEntry<C>> {
        self.entries.lock().pop_lru().map(|(_, entry)| entry)
    }

    /// Whether a hash is cached (without touching recency).
    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.entries.lock().contains(hash)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Result broadcast to every caller coalesced on one hash.
pub(crate) type FlightResult<C> = Result<Executable<C>, PipelineError>;

struct FlightEntry<C> {
    rx: watch::Receiver<Option<FlightResult<C>>>,
    cancelled: Arc<AtomicBool>,
}

/// Deduplicates concurrent compiles of one content hash.
///
/// The first caller for a hash becomes the leader and runs the
/// compile/load; every later caller becomes a follower and awaits the
/// leader's broadcast. At most one load executes per hash at any time.
pub(crate) struct InFlightMap<C> {
    flights: Arc<DashMap<ContentHash, FlightEntry<C>>>,
}

impl<C: Clone> InFlightMap<C> {
    pub(crate) fn new() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
        }
    }

    /// Join the flight for `hash`, creating it when absent.
    pub(crate) fn begin(&self, hash: &ContentHash) -> FlightTicket<C> {
        use dashmap::mapref::entry::Entry;
        match self.flights.entry(hash.clone()) {
            Entry::Occupied(occupied) => FlightTicket::Follower(occupied.get().rx.clone()),
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                let cancelled = Arc::new(AtomicBool::new(false));
                vacant.insert(FlightEntry {
                    rx,
                    cancelled: Arc::clone(&cancelled),
                });
                FlightTicket::Leader(FlightGuard {
                    hash: hash.clone(),
                    flights: Arc::clone(&self.flights),
                    tx,
                    cancelled,
                    finished: false,
                })
            }
        }
    }

    /// Mark the in-flight entry for `hash` cancelled. The leader
    /// discards its result when it settles. Returns whether a flight
    /// was in progress.
    pub(crate) fn cancel(&self, hash: &ContentHash) -> bool {
        match self.flights.get(hash) {
            Some(entry) => {
                entry.cancelled.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

/// Outcome of joining a flight.
pub(crate) enum FlightTicket<C> {
    /// This caller runs the compile/load and must call
    /// [`FlightGuard::finish`]
    Leader(FlightGuard<C>),
    /// Another caller is already loading this hash; await the
    /// broadcast via [`await_flight`]
    Follower(watch::Receiver<Option<FlightResult<C>>>),
}

/// Leader's handle on an in-flight entry.
pub(crate) struct FlightGuard<C> {
    hash: ContentHash,
    flights: Arc<DashMap<ContentHash, FlightEntry<C>>>,
    tx: watch::Sender<Option<FlightResult<C>>>,
    cancelled: Arc<AtomicBool>,
    finished: bool,
}

impl<C> FlightGuard<C> {
    /// Whether the flight was cancelled while the load was running.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Settle the flight: remove it from the map and broadcast the
    /// result to every follower. Removal happens before the broadcast
    /// within one cooperative step, so no request can join a settled
    /// flight.
    pub(crate) fn finish(mut self, result: FlightResult<C>) {
        self.flights.remove(&self.hash);
        let _ = self.tx.send(Some(result));
        self.finished = true;
    }
}

impl<C> Drop for FlightGuard<C> {
    fn drop(&mut self) {
        // A leader that unwinds without settling must not strand its
        // followers.
        if !self.finished {
            self.flights.remove(&self.hash);
            let _ = self.tx.send(Some(Err(PipelineError::Cancelled)));
        }
    }
}

/// Await a leader's broadcast.
pub(crate) async fn await_flight<C: Clone>(
    mut rx: watch::Receiver<Option<FlightResult<C>>>,
) -> FlightResult<C> {
    loop {
        if let Some(result) = rx.borrow().clone() {
            return result;
        }
        if rx.changed().await.is_err() {
            return Err(PipelineError::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ModuleStore;

    fn entry(store: &ModuleStore, source: &str) -> (ContentHash, CacheEntry<String>) {
        let hash = ContentHash::of(source);
        let entry = CacheEntry {
            compiled_source: source.to_string(),
            loadable: store.materialize(source),
            constructor: "ctor".to_string(),
            created_at: Instant::now(),
            size_estimate: source.len(),
        };
        (hash, entry)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let store = ModuleStore::new();
        let cache: CacheManager<String> = CacheManager::new(4);
        let (hash, e) = entry(&store, "export default 1;");

        assert!(cache.put(hash.clone(), e.clone()).is_none());
        let got = cache.get(&hash).unwrap();
        assert_eq!(got.compiled_source, "export default 1;");
        assert_eq!(got.loadable, e.loadable);
    }

    #[test]
    fn test_put_is_idempotent() {
        let store = ModuleStore::new();
        let cache: CacheManager<String> = CacheManager::new(4);
        let (hash, first) = entry(&store, "export default 1;");
        let (_, second) = entry(&store, "export default 1;");

        cache.put(hash.clone(), first.clone());
        assert!(cache.put(hash.clone(), second).is_none());
        assert_eq!(cache.len(), 1);
        // The original entry survives; no duplicate storage.
        assert_eq!(cache.get(&hash).unwrap().loadable, first.loadable);
    }

    #[test]
    fn test_lru_eviction_returns_displaced_entry() {
        let store = ModuleStore::new();
        let cache: CacheManager<String> = CacheManager::new(2);
        let (h1, e1) = entry(&store, "a");
        let (h2, e2) = entry(&store, "b");
        let (h3, e3) = entry(&store, "c");

        cache.put(h1.clone(), e1.clone());
        cache.put(h2.clone(), e2);
        // Touch h1 so h2 becomes least recently used.
        cache.get(&h1);

        let evicted = cache.put(h3.clone(), e3).unwrap();
        assert_eq!(evicted.compiled_source, "b");
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&h1));
        assert!(!cache.contains(&h2));
        assert!(cache.contains(&h3));
    }

    #[test]
    fn test_explicit_evict_pops_lru() {
        let store = ModuleStore::new();
        let cache: CacheManager<String> = CacheManager::new(4);
        let (h1, e1) = entry(&store, "a");
        let (h2, e2) = entry(&store, "b");

        cache.put(h1.clone(), e1);
        cache.put(h2, e2);
        cache.get(&h1);

        let evicted = cache.evict().unwrap();
        assert_eq!(evicted.compiled_source, "b");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_idempotent_put_extends_recency() {
        let store = ModuleStore::new();
        let cache: CacheManager<String> = CacheManager::new(2);
        let (h1, e1) = entry(&store, "a");
        let (h2, e2) = entry(&store, "b");
        let (h3, e3) = entry(&store, "c");
        let (_, e1_again) = entry(&store, "a");

        cache.put(h1.clone(), e1);
        cache.put(h2.clone(), e2);
        // Re-putting h1 promotes it; h2 is now the eviction candidate.
        cache.put(h1.clone(), e1_again);

        let evicted = cache.put(h3, e3).unwrap();
        assert_eq!(evicted.compiled_source, "b");
        assert!(cache.contains(&h1));
    }

    #[tokio::test]
    async fn test_single_leader_per_hash() {
        let inflight: InFlightMap<String> = InFlightMap::new();
        let store = ModuleStore::new();
        let hash = ContentHash::of("x");

        let FlightTicket::Leader(guard) = inflight.begin(&hash) else {
            panic!("first caller must lead");
        };
        let FlightTicket::Follower(rx) = inflight.begin(&hash) else {
            panic!("second caller must follow");
        };

        let loadable = store.materialize("x");
        let executable = Executable {
            constructor: "ctor".to_string(),
            loadable,
        };
        guard.finish(Ok(executable.clone()));

        let followed = await_flight(rx).await.unwrap();
        assert_eq!(followed.loadable, executable.loadable);

        // The flight settled; a new request leads again.
        assert!(matches!(inflight.begin(&hash), FlightTicket::Leader(_)));
    }

    #[tokio::test]
    async fn test_cancel_marks_flight() {
        let inflight: InFlightMap<String> = InFlightMap::new();
        let hash = ContentHash::of("x");

        let FlightTicket::Leader(guard) = inflight.begin(&hash) else {
            panic!("first caller must lead");
        };
        assert!(!guard.is_cancelled());
        assert!(inflight.cancel(&hash));
        assert!(guard.is_cancelled());

        // No flight, nothing to cancel.
        guard.finish(Err(PipelineError::Cancelled));
        assert!(!inflight.cancel(&hash));
    }

    #[tokio::test]
    async fn test_dropped_leader_does_not_strand_followers() {
        let inflight: InFlightMap<String> = InFlightMap::new();
        let hash = ContentHash::of("x");

        let FlightTicket::Leader(guard) = inflight.begin(&hash) else {
            panic!("first caller must lead");
        };
        let FlightTicket::Follower(rx) = inflight.begin(&hash) else {
            panic!("second caller must follow");
        };

        drop(guard);
        assert_eq!(await_flight(rx).await.unwrap_err(), PipelineError::Cancelled);
    }
}
