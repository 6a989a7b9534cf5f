//! Bid lifecycle management: placing, adjusting, cancelling, and resetting
//! bids.
//!
//! The manager is the only component that mutates the shared projection,
//! and it does so strictly after the external store has confirmed the
//! mutation — a failed store call leaves local state untouched, so there is
//! nothing to roll back.
//!
//! One mutation per rider may be in flight at a time from one client; the
//! UI is expected to disable the control for that rider until the request
//! resolves, and the manager enforces the same rule defensively via an
//! in-flight guard.

use std::sync::Arc;

use dashmap::DashSet;
use futures::future::join_all;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use peloton_common::{Bid, BidStatus, Rider};

use crate::eligibility::{validate_placement, PlacementCheck};
use crate::error::EngineError;
use crate::pricing::effective_minimum_bid;
use crate::snapshot::{Projection, Snapshot, Viewer};
use crate::store::{BidDraft, GameStore};
use crate::cache::SnapshotCache;

/// Result of a best-effort reset batch.
///
/// The batch tolerates partial failure: local state is synchronized only
/// for the cancellations that succeeded.
#[derive(Debug, Default)]
pub struct ResetOutcome {
    /// Bid ids cancelled in the store and removed locally.
    pub cancelled: Vec<String>,
    /// Bid ids whose cancellation failed, with the store's message.
    pub failed: Vec<(String, String)>,
}

impl ResetOutcome {
    /// True when every attempted cancellation succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.cancelled.len() + self.failed.len()
    }
}

/// Orchestrates bid mutations against the external store and keeps the
/// local projection consistent.
pub struct BidLifecycleManager<S, C> {
    store: Arc<S>,
    cache: Arc<C>,
    viewer: Viewer,
    projection: Projection,
    /// Rider keys with a mutation currently in flight.
    in_flight: Arc<DashSet<String>>,
}

/// Removes the rider key from the in-flight set when the operation
/// resolves, on every path.
struct InFlightGuard {
    set: Arc<DashSet<String>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

impl<S, C> BidLifecycleManager<S, C>
where
    S: GameStore,
    C: SnapshotCache,
{
    pub fn new(store: Arc<S>, cache: Arc<C>, viewer: Viewer, projection: Projection) -> Self {
        Self {
            store,
            cache,
            viewer,
            projection,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Whether a mutation for this rider is currently in flight.
    pub fn is_in_flight(&self, rider_key: &str) -> bool {
        self.in_flight.contains(rider_key)
    }

    fn acquire(&self, rider_key: &str) -> Result<InFlightGuard, EngineError> {
        if !self.in_flight.insert(rider_key.to_string()) {
            return Err(EngineError::InFlight {
                rider_key: rider_key.to_string(),
            });
        }
        Ok(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            key: rider_key.to_string(),
        })
    }

    fn current_snapshot(&self) -> Result<Snapshot, EngineError> {
        self.projection.snapshot().ok_or_else(|| EngineError::Stale {
            reason: "no snapshot loaded".to_string(),
        })
    }

    /// Place (or adjust) a bid on a rider.
    ///
    /// Runs the full eligibility validation; selection modes force the
    /// amount to the effective minimum bid, auction modes use the
    /// user-entered amount. The store upsert replaces any existing
    /// non-terminal bid by this user on this rider, and the local
    /// projection mirrors that replacement only after the store confirms.
    pub async fn place_bid(
        &self,
        rider: &Rider,
        amount: Decimal,
        all_riders: &[Rider],
    ) -> Result<Bid, EngineError> {
        let snapshot = self.current_snapshot()?;
        if snapshot.read_only {
            return Err(EngineError::ReadOnly);
        }

        let _guard = self.acquire(rider.key())?;

        let charged = if snapshot.game.mode().forces_minimum_amount() {
            effective_minimum_bid(rider, &snapshot.game)
        } else {
            amount
        };

        let check = PlacementCheck::new(rider, charged, &snapshot.game, &snapshot.participant)
            .with_bids(&snapshot.my_bids)
            .with_riders(all_riders)
            .with_sold(&snapshot.sold);
        validate_placement(&check).map_err(|rejection| {
            debug!(
                rider = rider.key(),
                code = rejection.code(),
                "placement rejected: {rejection}"
            );
            EngineError::Validation(rejection)
        })?;

        let draft = BidDraft::new(
            snapshot.game.id.clone(),
            &snapshot.participant,
            rider,
            charged,
        );
        let bid = self
            .store
            .upsert_bid(draft)
            .await
            .map_err(EngineError::from_store)?;

        // Store confirmed; now mirror the replacement locally.
        let rider_key = rider.key().to_string();
        let user_id = self.viewer.user_id.clone();
        self.projection.update(|snapshot| {
            snapshot
                .my_bids
                .retain(|existing| !existing.reserves(&rider_key));
            snapshot.my_bids.push(bid.clone());
            if let Some(all_bids) = snapshot.all_bids.as_mut() {
                all_bids.retain(|existing| {
                    !(existing.user_id == user_id && existing.reserves(&rider_key))
                });
                all_bids.push(bid.clone());
            }
        });
        self.cache.invalidate(&snapshot.game.id);

        info!(
            game_id = %snapshot.game.id,
            rider = %rider_key,
            amount = %bid.amount,
            "bid placed"
        );
        Ok(bid)
    }

    /// Cancel one of the viewer's bids.
    ///
    /// Permitted only while the bid is active or outbid; cancelling a bid
    /// that is already gone (or terminal) rejects rather than silently
    /// succeeding.
    pub async fn cancel_bid(&self, bid_id: &str) -> Result<(), EngineError> {
        let snapshot = self.current_snapshot()?;

        let bid = snapshot
            .my_bids
            .iter()
            .find(|bid| bid.id == bid_id)
            .cloned()
            .ok_or_else(|| EngineError::NotCancellable {
                bid_id: bid_id.to_string(),
            })?;
        if !bid.status.is_cancellable() {
            return Err(EngineError::NotCancellable {
                bid_id: bid_id.to_string(),
            });
        }

        let _guard = self.acquire(&bid.rider_name_id)?;

        self.store
            .cancel_bid(bid_id)
            .await
            .map_err(EngineError::from_store)?;

        self.remove_local(bid_id);
        self.cache.invalidate(&snapshot.game.id);

        info!(
            game_id = %snapshot.game.id,
            bid_id,
            rider = %bid.rider_name_id,
            "bid cancelled"
        );
        Ok(())
    }

    /// Cancel every currently-active bid as a best-effort parallel batch.
    ///
    /// Outbid bids are deliberately left untouched: a participant must not
    /// be able to discover they were outbid by watching which bids a reset
    /// silently skips — only bids they see as currently winning are reset.
    pub async fn reset_all_active_bids(&self) -> Result<ResetOutcome, EngineError> {
        let snapshot = self.current_snapshot()?;
        if snapshot.read_only {
            return Err(EngineError::ReadOnly);
        }

        let targets: Vec<Bid> = snapshot
            .my_bids
            .iter()
            .filter(|bid| bid.status == BidStatus::Active)
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(ResetOutcome::default());
        }

        // Hold every target rider's guard for the whole batch so no other
        // mutation interleaves with it; an already-in-flight rider aborts
        // the reset before anything is cancelled.
        let mut guards = Vec::with_capacity(targets.len());
        for bid in &targets {
            guards.push(self.acquire(&bid.rider_name_id)?);
        }

        let results = join_all(targets.iter().map(|bid| {
            let store = Arc::clone(&self.store);
            async move { (bid.id.clone(), store.cancel_bid(&bid.id).await) }
        }))
        .await;

        let mut outcome = ResetOutcome::default();
        for (bid_id, result) in results {
            match result {
                Ok(()) => {
                    self.remove_local(&bid_id);
                    outcome.cancelled.push(bid_id);
                }
                Err(err) => {
                    warn!(bid_id, error = %err, "reset: cancellation failed");
                    outcome.failed.push((bid_id, err.to_string()));
                }
            }
        }
        self.cache.invalidate(&snapshot.game.id);

        info!(
            game_id = %snapshot.game.id,
            cancelled = outcome.cancelled.len(),
            failed = outcome.failed.len(),
            "reset of active bids finished"
        );
        Ok(outcome)
    }

    /// Remove a bid from the projection's own and all-bids sets.
    fn remove_local(&self, bid_id: &str) {
        self.projection.update(|snapshot| {
            snapshot.my_bids.retain(|bid| bid.id != bid_id);
            if let Some(all_bids) = snapshot.all_bids.as_mut() {
                all_bids.retain(|bid| bid.id != bid_id);
            }
        });
    }
}
