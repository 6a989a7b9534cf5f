//! Shared types for the peloton fantasy-cycling bidding engine.
//!
//! This crate contains the domain model shared by the engine and any
//! transport/UI layers built on top of it:
//! - Game, game mode, status, and per-mode configuration
//! - Rider, Participant, Bid, and bid status
//! - Sold-rider ownership records and index

pub mod types;

pub use types::*;
