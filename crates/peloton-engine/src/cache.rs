//! Snapshot cache and invalidation signalling.
//!
//! The cache is an explicit, injectable interface scoped per game id; its
//! lifecycle is owned by the caller, never by process-global state. Staleness
//! travels over an explicit channel the reconciler subscribes to, so
//! detection latency is not tied to a fixed polling timer.

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::snapshot::Snapshot;

/// Get/set/invalidate access to cached snapshots, keyed by game id.
pub trait SnapshotCache: Send + Sync {
    /// Fetch the cached snapshot for a game, if any.
    fn get(&self, game_id: &str) -> Option<Snapshot>;

    /// Store a snapshot for a game.
    fn set(&self, game_id: &str, snapshot: Snapshot);

    /// Drop the cached snapshot for a game so the next read is forced
    /// fresh.
    fn invalidate(&self, game_id: &str);
}

/// In-memory snapshot cache backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemorySnapshotCache {
    snapshots: DashMap<String, Snapshot>,
}

impl MemorySnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached games (diagnostics).
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl SnapshotCache for MemorySnapshotCache {
    fn get(&self, game_id: &str) -> Option<Snapshot> {
        self.snapshots.get(game_id).map(|entry| entry.clone())
    }

    fn set(&self, game_id: &str, snapshot: Snapshot) {
        self.snapshots.insert(game_id.to_string(), snapshot);
    }

    fn invalidate(&self, game_id: &str) {
        if self.snapshots.remove(game_id).is_some() {
            debug!(game_id, "snapshot cache invalidated");
        }
    }
}

/// Broadcast channel carrying game ids whose cached state became stale
/// (e.g. a bid placed from another device).
#[derive(Debug, Clone)]
pub struct InvalidationBus {
    sender: broadcast::Sender<String>,
}

impl InvalidationBus {
    /// Create a bus with the given channel capacity. Slow subscribers that
    /// lag past the capacity miss older signals and simply reload on the
    /// next one.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Signal that a game's cached state is stale.
    pub fn notify(&self, game_id: &str) {
        // Send fails only when there are no subscribers, which is fine.
        let _ = self.sender.send(game_id.to_string());
    }

    /// Subscribe to invalidation signals.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new(16)
    }
}
