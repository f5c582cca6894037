//! Request/response correlation.
//!
//! Outbound correlated requests register a [`PendingTable`] entry keyed
//! by a generated request id; the receive path completes the entry when
//! a response with the same id arrives. Entries leave the table exactly
//! once: on completion, on individual failure, or through the periodic
//! sweep. The per-route lock set implements in-flight request
//! deduplication with the same exactly-once release discipline.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::warn;

use crate::core::{RequestError, RequestResult, SessionStats};
use crate::protocol::Envelope;

/// Generates request ids, cycling within `1..=i32::MAX`.
///
/// Zero is reserved for non-correlated messages and never produced.
#[derive(Debug)]
pub struct RequestIdGenerator {
    counter: AtomicI32,
}

impl RequestIdGenerator {
    /// Start a generator at 1.
    pub fn new() -> Self {
        Self {
            counter: AtomicI32::new(1),
        }
    }

    /// Produce the next id.
    pub fn next_id(&self) -> i32 {
        loop {
            let id = self.counter.fetch_add(1, Ordering::Relaxed);
            if id > 0 {
                return id;
            }
            // Wrapped past i32::MAX; one racer resets, everyone retries.
            let _ = self.counter.compare_exchange(
                id.wrapping_add(1),
                1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            );
        }
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// One in-flight correlated request.
struct PendingEntry {
    route: u32,
    created_at: Instant,
    /// Whether this request holds its route's dedup lock.
    route_locked: bool,
    completion: oneshot::Sender<RequestResult<Envelope>>,
}

/// The concurrent pending-request table plus the route-lock set.
///
/// Shared between the send path, the receive path, and the background
/// sweep.
pub struct PendingTable {
    entries: Mutex<HashMap<i32, PendingEntry>>,
    route_locks: Mutex<HashSet<u32>>,
    ids: RequestIdGenerator,
    stats: Arc<SessionStats>,
}

impl PendingTable {
    /// Create an empty table reporting into the given counters.
    pub fn new(stats: Arc<SessionStats>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            route_locks: Mutex::new(HashSet::new()),
            ids: RequestIdGenerator::new(),
            stats,
        }
    }

    /// Allocate a fresh request id.
    pub fn next_id(&self) -> i32 {
        self.ids.next_id()
    }

    /// Try to take the dedup lock for a route.
    ///
    /// Returns `false` if another request on the route is in flight.
    pub fn lock_route(&self, route: u32) -> bool {
        let mut locks = lock(&self.route_locks);
        let acquired = locks.insert(route);
        if acquired {
            self.stats
                .route_locks_held
                .store(locks.len(), Ordering::Relaxed);
        }
        acquired
    }

    /// Release a route's dedup lock. No-op if not held.
    pub fn unlock_route(&self, route: u32) {
        let mut locks = lock(&self.route_locks);
        if locks.remove(&route) {
            self.stats
                .route_locks_held
                .store(locks.len(), Ordering::Relaxed);
        }
    }

    /// Register a pending entry for a request about to be sent.
    ///
    /// `route_locked` records whether this request holds the route's
    /// dedup lock, so whichever path removes the entry releases the
    /// lock exactly once. Fails hard on a duplicate id.
    pub fn register(
        &self,
        request_id: i32,
        route: u32,
        route_locked: bool,
    ) -> RequestResult<oneshot::Receiver<RequestResult<Envelope>>> {
        let (tx, rx) = oneshot::channel();
        let mut entries = lock(&self.entries);
        if entries.contains_key(&request_id) {
            return Err(RequestError::DuplicateRequestId { id: request_id });
        }
        entries.insert(
            request_id,
            PendingEntry {
                route,
                created_at: Instant::now(),
                route_locked,
                completion: tx,
            },
        );
        self.stats
            .pending_in_flight
            .store(entries.len(), Ordering::Relaxed);
        Ok(rx)
    }

    /// Complete an entry with a matching response.
    ///
    /// Returns the response back when no entry with that id is live (a
    /// late response or a server-correlated push), so the caller can
    /// still broadcast it.
    pub fn try_complete(&self, request_id: i32, response: Envelope) -> Option<Envelope> {
        let Some(entry) = self.take(request_id) else {
            return Some(response);
        };
        SessionStats::bump(&self.stats.requests_completed);
        let _ = entry.completion.send(Ok(response));
        None
    }

    /// Remove an entry without signaling, releasing its route lock.
    ///
    /// Used by the request path's own cleanup; a no-op if the entry is
    /// already gone.
    pub fn abort(&self, request_id: i32) {
        let _ = self.take(request_id);
    }

    /// Fail every live entry, releasing every route lock.
    pub fn fail_all(&self, error: impl Fn() -> RequestError) {
        let drained: Vec<PendingEntry> = {
            let mut entries = lock(&self.entries);
            let drained = entries.drain().map(|(_, entry)| entry).collect();
            self.stats.pending_in_flight.store(0, Ordering::Relaxed);
            drained
        };
        for entry in drained {
            if entry.route_locked {
                self.unlock_route(entry.route);
            }
            let _ = entry.completion.send(Err(error()));
        }
    }

    /// One sweep pass.
    ///
    /// Reaps entries whose waiter has already gone away, force-fails
    /// entries older than `cutoff` with a timeout error, and warns when
    /// the live count crosses `high_water`. Returns the number of
    /// entries removed.
    pub fn sweep(&self, cutoff: Duration, high_water: usize) -> usize {
        let now = Instant::now();
        let removed: Vec<PendingEntry> = {
            let mut entries = lock(&self.entries);
            let stale: Vec<i32> = entries
                .iter()
                .filter(|(_, entry)| {
                    entry.completion.is_closed()
                        || now.duration_since(entry.created_at) >= cutoff
                })
                .map(|(id, _)| *id)
                .collect();
            let removed: Vec<PendingEntry> = stale
                .into_iter()
                .filter_map(|id| entries.remove(&id))
                .collect();
            self.stats
                .pending_in_flight
                .store(entries.len(), Ordering::Relaxed);
            if entries.len() > high_water {
                warn!(
                    pending = entries.len(),
                    high_water, "pending request count above high-water mark"
                );
            }
            removed
        };

        let count = removed.len();
        for entry in removed {
            if entry.route_locked {
                self.unlock_route(entry.route);
            }
            SessionStats::bump(&self.stats.swept_entries);
            let _ = entry.completion.send(Err(RequestError::Timeout));
        }
        count
    }

    /// Number of live pending entries.
    pub fn pending_count(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Number of held route locks.
    pub fn locked_count(&self) -> usize {
        lock(&self.route_locks).len()
    }

    fn take(&self, request_id: i32) -> Option<PendingEntry> {
        let entry = {
            let mut entries = lock(&self.entries);
            let entry = entries.remove(&request_id);
            self.stats
                .pending_in_flight
                .store(entries.len(), Ordering::Relaxed);
            entry
        };
        if let Some(entry) = &entry {
            if entry.route_locked {
                self.unlock_route(entry.route);
            }
        }
        entry
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
