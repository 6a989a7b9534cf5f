//! Snapshot reconciliation: merging cached and fresh game state into one
//! consistent in-memory view.
//!
//! A `Snapshot` holds only raw state (game, participant, bids, sold index).
//! Rider annotations — effective minimum bid, sold status, my-bid fields,
//! highest bid — are always re-derived from the raw state at read time,
//! never stored, because the underlying config (e.g. admin-edited rider
//! values) may change independently of the bid data.
//!
//! The projection shared with the lifecycle manager is replaced wholesale
//! after any round trip that could have changed other participants' state;
//! it is never patched field-by-field across a fetch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use peloton_common::{
    Bid, BidStatus, Game, GameMode, Participant, Rider, SoldRider, SoldRiderIndex,
};

use crate::cache::{InvalidationBus, SnapshotCache};
use crate::error::EngineError;
use crate::pricing::{effective_minimum_bid, is_offered};
use crate::store::{BidFilter, GameStore, StoreError};

/// Who is looking at the game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub user_id: String,
    /// Admins see the rider-level highest bid/bidder and may view games
    /// they have not joined.
    pub is_admin: bool,
}

impl Viewer {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: true,
        }
    }
}

/// Raw, consistent view of one game for one viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub game: Game,
    pub participant: Participant,
    /// True when the participant is a synthesized placeholder (admin
    /// viewing a game they have not joined). Mutations are refused.
    pub read_only: bool,
    /// The viewer's own bids, all statuses.
    pub my_bids: Vec<Bid>,
    /// Every participant's bids; fetched for admin viewers only.
    pub all_bids: Option<Vec<Bid>>,
    /// Finalized ownership records (bidding-type games only; empty
    /// otherwise).
    pub sold: SoldRiderIndex,
    pub loaded_at: DateTime<Utc>,
}

impl Snapshot {
    /// The viewer's live reservation on a rider, if any.
    pub fn my_bid_on(&self, rider_key: &str) -> Option<&Bid> {
        self.my_bids.iter().find(|bid| bid.reserves(rider_key))
    }

    /// The highest currently-active bid on a rider across all
    /// participants. Ties keep the first-encountered bid: the scan uses a
    /// strictly-greater comparison over the stable store order.
    pub fn highest_active(&self, rider_key: &str) -> Option<&Bid> {
        let all = self.all_bids.as_deref()?;
        let mut highest: Option<&Bid> = None;
        for bid in all
            .iter()
            .filter(|bid| bid.status == BidStatus::Active && bid.rider_name_id == rider_key)
        {
            match highest {
                Some(current) if bid.amount <= current.amount => {}
                _ => highest = Some(bid),
            }
        }
        highest
    }

    /// Derive the annotated rider listing for this snapshot.
    ///
    /// Riders not offered in this game (full-grid riders without an
    /// admin-assigned value) are excluded entirely. The highest bid/bidder
    /// is derived only for admin viewers in auction mode; the asymmetry is
    /// inherited from the product and preserved as-is.
    pub fn rider_views(&self, riders: &[Rider], viewer: &Viewer) -> Vec<RiderView> {
        riders
            .iter()
            .filter(|rider| is_offered(rider, &self.game))
            .map(|rider| self.annotate(rider, viewer))
            .collect()
    }

    /// Annotate a single rider against this snapshot.
    pub fn annotate(&self, rider: &Rider, viewer: &Viewer) -> RiderView {
        let key = rider.key();
        let my_bid = self.my_bid_on(key);

        let show_highest =
            viewer.is_admin && self.game.mode() == GameMode::Auction;
        let highest = if show_highest {
            self.highest_active(key)
        } else {
            None
        };

        RiderView {
            rider: rider.clone(),
            minimum_bid: effective_minimum_bid(rider, &self.game),
            sold_to: self.sold.get(key).cloned(),
            my_bid: my_bid.map(|bid| bid.amount),
            my_bid_status: my_bid.map(|bid| bid.status),
            my_bid_id: my_bid.map(|bid| bid.id.clone()),
            highest_bid: highest.map(|bid| bid.amount),
            highest_bidder: highest.map(|bid| bid.user_id.clone()),
        }
    }
}

/// A rider annotated with everything the bidding UI needs. Derived, never
/// cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiderView {
    pub rider: Rider,
    /// Price floor (or fixed price) for this game.
    pub minimum_bid: Decimal,
    pub sold_to: Option<SoldRider>,
    pub my_bid: Option<Decimal>,
    pub my_bid_status: Option<BidStatus>,
    pub my_bid_id: Option<String>,
    /// Admin-only, auction mode only.
    pub highest_bid: Option<Decimal>,
    pub highest_bidder: Option<String>,
}

impl RiderView {
    pub fn is_sold(&self) -> bool {
        self.sold_to.is_some()
    }
}

/// Shared, atomically-replaced projection of the current snapshot.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    inner: Arc<RwLock<Option<Snapshot>>>,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole view. The only way state from a server round trip
    /// enters the projection.
    pub fn replace(&self, snapshot: Snapshot) {
        *self.inner.write() = Some(snapshot);
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    /// Clone out the current snapshot.
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.inner.read().clone()
    }

    /// Run a closure against the current snapshot without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> Option<R> {
        self.inner.read().as_ref().map(f)
    }

    /// Mutate the current snapshot under the write lock. Used by the
    /// lifecycle manager for the viewer's own bid set after the store has
    /// confirmed a mutation; observers never see a half-applied update.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut Snapshot) -> R) -> Option<R> {
        self.inner.write().as_mut().map(f)
    }
}

/// Loads snapshots, reconciling the cache with the external store.
pub struct SnapshotReconciler<S, C> {
    store: Arc<S>,
    cache: Arc<C>,
    bus: InvalidationBus,
    viewer: Viewer,
    projection: Projection,
    /// Reference rider data; a cache hit is unusable until this is set.
    reference_riders: RwLock<Option<Vec<Rider>>>,
    /// Games whose cache was already invalidated once this session.
    entered: DashSet<String>,
}

impl<S, C> SnapshotReconciler<S, C>
where
    S: GameStore,
    C: SnapshotCache,
{
    pub fn new(store: Arc<S>, cache: Arc<C>, viewer: Viewer) -> Self {
        Self {
            store,
            cache,
            bus: InvalidationBus::default(),
            viewer,
            projection: Projection::new(),
            reference_riders: RwLock::new(None),
            entered: DashSet::new(),
        }
    }

    /// Share an invalidation bus with other components (e.g. a push
    /// listener fed by the transport layer).
    pub fn with_bus(mut self, bus: InvalidationBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn bus(&self) -> &InvalidationBus {
        &self.bus
    }

    /// The shared projection; the lifecycle manager holds a clone.
    pub fn projection(&self) -> Projection {
        self.projection.clone()
    }

    /// Provide the reference rider data the annotations join against.
    pub fn set_reference_riders(&self, riders: Vec<Rider>) {
        *self.reference_riders.write() = Some(riders);
    }

    pub fn reference_riders(&self) -> Option<Vec<Rider>> {
        self.reference_riders.read().clone()
    }

    /// Mark page entry for a game: proactively invalidate its cache once,
    /// before any read, so a fresh page load never shows bid state left
    /// over from a previous session. Subsequent calls are no-ops.
    pub fn begin_session(&self, game_id: &str) {
        if self.entered.insert(game_id.to_string()) {
            debug!(game_id, "session start, invalidating snapshot cache");
            self.cache.invalidate(game_id);
        }
    }

    /// Load a consistent snapshot for the game.
    ///
    /// Tries the cache first unless `skip_cache` is set or the reference
    /// rider data is not available yet. A cache hit carries only raw state;
    /// all annotations are re-derived by the caller via
    /// [`Snapshot::rider_views`], so admin-edited config changes are picked
    /// up even on a hit.
    pub async fn load(&self, game_id: &str, skip_cache: bool) -> Result<Snapshot, EngineError> {
        let cache_usable = !skip_cache && self.reference_riders.read().is_some();
        if cache_usable {
            if let Some(snapshot) = self.cache.get(game_id) {
                debug!(game_id, "snapshot cache hit");
                self.projection.replace(snapshot.clone());
                return Ok(snapshot);
            }
        }

        let snapshot = self.fetch(game_id).await?;
        self.cache.set(game_id, snapshot.clone());
        self.projection.replace(snapshot.clone());
        info!(
            game_id,
            my_bids = snapshot.my_bids.len(),
            read_only = snapshot.read_only,
            "snapshot loaded from store"
        );
        Ok(snapshot)
    }

    /// Fetch everything fresh from the store and merge.
    async fn fetch(&self, game_id: &str) -> Result<Snapshot, EngineError> {
        let game = self.store.game(game_id).await.map_err(EngineError::from_store)?;

        let participant = self
            .store
            .participant(game_id, &self.viewer.user_id)
            .await
            .map_err(EngineError::from_store)?;
        let (participant, read_only) = match participant {
            Some(participant) => (participant, false),
            None if self.viewer.is_admin => (
                Participant::read_only_placeholder(game_id, &self.viewer.user_id),
                true,
            ),
            None => {
                return Err(EngineError::Transport(StoreError::NotFound {
                    kind: "participant",
                    id: self.viewer.user_id.clone(),
                }))
            }
        };

        let my_bids = self
            .store
            .bids(game_id, BidFilter::for_user(&self.viewer.user_id))
            .await
            .map_err(EngineError::from_store)?;

        let all_bids = if self.viewer.is_admin {
            Some(
                self.store
                    .bids(game_id, BidFilter::all())
                    .await
                    .map_err(EngineError::from_store)?,
            )
        } else {
            None
        };

        // Sold state only exists in bidding-type games.
        let sold = if game.mode().is_bidding() {
            SoldRiderIndex::from_records(
                self.store
                    .sold_riders(game_id)
                    .await
                    .map_err(EngineError::from_store)?,
            )
        } else {
            SoldRiderIndex::default()
        };

        Ok(Snapshot {
            game,
            participant,
            read_only,
            my_bids,
            all_bids,
            sold,
            loaded_at: Utc::now(),
        })
    }

    /// Run the invalidation loop: every signal for `game_id` triggers a
    /// fresh load (cache skipped). Returns when the bus closes.
    pub async fn watch(&self, game_id: &str) {
        let mut receiver = self.bus.subscribe();
        loop {
            match receiver.recv().await {
                Ok(signalled) if signalled == game_id => {
                    self.cache.invalidate(game_id);
                    if let Err(err) = self.load(game_id, true).await {
                        warn!(game_id, error = %err, "reload after invalidation failed");
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(game_id, missed, "invalidation receiver lagged, reloading");
                    self.cache.invalidate(game_id);
                    if let Err(err) = self.load(game_id, true).await {
                        warn!(game_id, error = %err, "reload after lag failed");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
