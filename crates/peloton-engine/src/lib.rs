//! Auction/selection bidding engine for the peloton fantasy-cycling
//! platform.
//!
//! This crate implements the rules that decide whether a bid is legal, what
//! a participant's effective remaining budget is, how a rider's minimum
//! price is computed per game mode, and how the lifecycle of a bid is
//! reconciled against cached and freshly-fetched state. Persistence,
//! transport, and rendering are external collaborators behind the
//! `GameStore` and `SnapshotCache` traits.
//!
//! ## Modules
//!
//! - `pricing`: effective minimum bid per game mode
//! - `budget`: remaining-budget ledger derived from bid reservations
//! - `eligibility`: ordered pre-placement checks with user-facing reasons
//! - `lifecycle`: placing, cancelling, and resetting bids
//! - `snapshot`: cached/fresh state reconciliation and rider annotations
//! - `store`: external store trait seam
//! - `cache`: injectable snapshot cache and invalidation bus
//! - `error`: the validation / stale / transport taxonomy

pub mod budget;
pub mod cache;
pub mod eligibility;
pub mod error;
pub mod lifecycle;
pub mod pricing;
pub mod snapshot;
pub mod store;

pub use budget::remaining_budget;
pub use cache::{InvalidationBus, MemorySnapshotCache, SnapshotCache};
pub use eligibility::{
    is_neo_professional, qualifies_for_neo_quota, top200_active, validate_placement,
    PlacementCheck, PlacementRejection,
};
pub use error::EngineError;
pub use lifecycle::{BidLifecycleManager, ResetOutcome};
pub use pricing::{effective_minimum_bid, is_offered};
pub use snapshot::{Projection, RiderView, Snapshot, SnapshotReconciler, Viewer};
pub use store::{BidDraft, BidFilter, GameStore, StoreError};
