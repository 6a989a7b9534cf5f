//! External store abstraction for games, participants, bids, and sold
//! riders.
//!
//! The engine is transport-agnostic: the `GameStore` trait is the only seam
//! to persistence. Implementations may talk HTTP/JSON, a document database,
//! or an in-memory fake for tests. Timeout and retry policy belong to the
//! implementation, not to the engine.
//!
//! ## Upsert contract
//!
//! `upsert_bid` must replace any existing non-terminal (active/outbid) bid
//! by the same user on the same rider. The engine relies on this to keep the
//! one-non-terminal-bid-per-(user, rider) invariant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use peloton_common::{Bid, BidStatus, Game, Participant, Rider, SoldRider};

/// Errors from the external store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The store detected the local view was stale (e.g. the rider was sold
    /// or its price changed since the view was rendered).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rejected by store: {0}")]
    Rejected(String),

    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Conflicts mean the caller must reload before retrying; everything
    /// else is a plain transport failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Filter for bid queries.
#[derive(Debug, Clone, Default)]
pub struct BidFilter {
    /// Restrict to one user's bids.
    pub user_id: Option<String>,
    /// Restrict to specific statuses; `None` means all.
    pub statuses: Option<Vec<BidStatus>>,
}

impl BidFilter {
    /// All bids in the game.
    pub fn all() -> Self {
        Self::default()
    }

    /// One user's bids, all statuses.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            statuses: None,
        }
    }

    /// Restrict to the given statuses.
    pub fn with_statuses(mut self, statuses: Vec<BidStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    /// Whether a bid passes this filter.
    pub fn matches(&self, bid: &Bid) -> bool {
        if let Some(user_id) = &self.user_id {
            if &bid.user_id != user_id {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&bid.status) {
                return false;
            }
        }
        true
    }
}

/// Fields for a new or replacing bid.
#[derive(Debug, Clone)]
pub struct BidDraft {
    /// Client-generated id for idempotent tracking.
    pub request_id: String,
    pub game_id: String,
    pub user_id: String,
    pub participant_id: String,
    pub rider_name_id: String,
    pub rider_name: String,
    pub rider_team: String,
    pub rider_jersey: Option<String>,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl BidDraft {
    /// Create a draft for a rider, snapshotting its display fields.
    pub fn new(
        game_id: impl Into<String>,
        participant: &Participant,
        rider: &Rider,
        amount: Decimal,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            game_id: game_id.into(),
            user_id: participant.user_id.clone(),
            participant_id: participant.id.clone(),
            rider_name_id: rider.key().to_string(),
            rider_name: rider.name.clone(),
            rider_team: rider.team.clone(),
            rider_jersey: rider.jersey.clone(),
            amount,
            timestamp: Utc::now(),
        }
    }
}

/// Async access to the external store.
///
/// All mutations are awaited to completion before the engine touches its
/// local projection; the engine never commits optimistically.
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Fetch a game by id.
    async fn game(&self, game_id: &str) -> Result<Game, StoreError>;

    /// Fetch a user's participant record, `None` if the user has not
    /// joined (admins may still view read-only).
    async fn participant(
        &self,
        game_id: &str,
        user_id: &str,
    ) -> Result<Option<Participant>, StoreError>;

    /// List bids in a game matching the filter.
    async fn bids(&self, game_id: &str, filter: BidFilter) -> Result<Vec<Bid>, StoreError>;

    /// List finalized ownership records for a game.
    async fn sold_riders(&self, game_id: &str) -> Result<Vec<SoldRider>, StoreError>;

    /// Create a bid, replacing any existing non-terminal bid by the same
    /// user on the same rider.
    async fn upsert_bid(&self, draft: BidDraft) -> Result<Bid, StoreError>;

    /// Cancel a bid by id. Fails if the bid is not active/outbid.
    async fn cancel_bid(&self, bid_id: &str) -> Result<(), StoreError>;
}
