//! Error taxonomy for the bidding engine.
//!
//! Three recoverable classes and no fatal one:
//! - `Validation`: user-correctable, surfaced verbatim, never auto-retried
//! - `Stale`: the view no longer matches the store; forces a fresh reload
//! - `Transport`: the external store call failed; the local mutation was
//!   not applied (the engine never commits optimistically)

use thiserror::Error;

use crate::eligibility::PlacementRejection;
use crate::store::StoreError;

/// Engine-level error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A placement failed an eligibility check.
    #[error("{0}")]
    Validation(#[from] PlacementRejection),

    /// The local view went stale; reload before retrying.
    #[error("stale view: {reason}")]
    Stale { reason: String },

    /// The external store call failed.
    #[error(transparent)]
    Transport(#[from] StoreError),

    /// Another mutation for the same rider is still in flight from this
    /// client; the control should have been disabled until it resolved.
    #[error("operation already in flight for rider {rider_key}")]
    InFlight { rider_key: String },

    /// The viewer holds a synthesized read-only participant (admin viewing
    /// a game they have not joined).
    #[error("read-only view: join the game to place bids")]
    ReadOnly,

    /// The bid is not in a cancellable state (already terminal, or not
    /// present in the current view).
    #[error("bid {bid_id} is not active/outbid")]
    NotCancellable { bid_id: String },
}

impl EngineError {
    /// Map a store error, promoting conflicts to the stale class so the
    /// caller reloads instead of blindly retrying.
    pub fn from_store(err: StoreError) -> Self {
        if err.is_conflict() {
            EngineError::Stale {
                reason: err.to_string(),
            }
        } else {
            EngineError::Transport(err)
        }
    }

    /// Whether the user can fix this by changing their input.
    pub fn is_user_correctable(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }

    /// Whether the caller must reload the snapshot before retrying.
    pub fn requires_reload(&self) -> bool {
        matches!(self, EngineError::Stale { .. })
    }
}
