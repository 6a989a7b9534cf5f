//! Domain types for the fantasy-cycling bidding engine.
//!
//! CRITICAL: All budgets, bid amounts, and ranking points use
//! `rust_decimal::Decimal`. NEVER use f64 for money math.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Game modes supported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameMode {
    /// Classic competitive auction: participants outbid each other.
    #[serde(rename = "auction")]
    Auction,
    /// Full-roster selection at computed prices.
    #[serde(rename = "worldtour-manager")]
    WorldTourManager,
    /// Points-based selection with no monetary budget.
    #[serde(rename = "marginal-gains")]
    MarginalGains,
    /// Fixed-price selection from an admin-assigned value grid.
    #[serde(rename = "full-grid")]
    FullGrid,
}

impl GameMode {
    /// Returns the wire/display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Auction => "auction",
            GameMode::WorldTourManager => "worldtour-manager",
            GameMode::MarginalGains => "marginal-gains",
            GameMode::FullGrid => "full-grid",
        }
    }

    /// Selection modes acquire riders directly at a computed price rather
    /// than by competitive bidding. Any number of participants may pick the
    /// same rider independently until finalization.
    pub fn is_selection(&self) -> bool {
        matches!(
            self,
            GameMode::WorldTourManager | GameMode::MarginalGains | GameMode::FullGrid
        )
    }

    /// Bidding modes compete for riders; a rider can be sold to one owner.
    pub fn is_bidding(&self) -> bool {
        matches!(self, GameMode::Auction)
    }

    /// Whether the mode constrains participants by a monetary budget.
    pub fn has_budget(&self) -> bool {
        !matches!(self, GameMode::MarginalGains)
    }

    /// Selection modes ignore the user-entered amount and acquire at the
    /// effective minimum bid.
    pub fn forces_minimum_amount(&self) -> bool {
        self.is_selection()
    }

    /// Modes subject to the neo-professional roster-composition rule.
    pub fn has_neo_pro_rule(&self) -> bool {
        matches!(self, GameMode::WorldTourManager | GameMode::MarginalGains)
    }
}

impl std::fmt::Display for GameMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Draft,
    Registration,
    Bidding,
    Active,
    Finished,
}

impl GameStatus {
    /// Once the auction/selection period has closed, `spent_budget` on the
    /// participant is the single source of truth for budget accounting.
    /// Bid statuses may have been rewritten during finalization and must not
    /// be used to recompute spend.
    pub fn is_closed(&self) -> bool {
        matches!(self, GameStatus::Active | GameStatus::Finished)
    }

    /// Whether participants may currently place or adjust bids.
    pub fn accepts_bids(&self) -> bool {
        matches!(self, GameStatus::Bidding)
    }
}

/// A time-boxed auction period within a game.
///
/// Carries no separate status field: only the time window decides whether a
/// period is active, so a desynchronized manual edit can never cause a false
/// top-200 restriction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionPeriod {
    #[serde(rename = "startDate")]
    pub start: DateTime<Utc>,
    #[serde(rename = "endDate")]
    pub end: DateTime<Utc>,
    /// Restrict bidding to riders ranked in the world top 200.
    #[serde(rename = "top200Only", default)]
    pub top200_only: bool,
}

impl AuctionPeriod {
    /// Inclusive containment check on the period window.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now <= self.end
    }
}

fn default_min_riders() -> u32 {
    27
}

/// Neo-professional qualification thresholds for selection modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeoProLimits {
    /// Maximum age (inclusive) to qualify as a neo-professional.
    #[serde(rename = "maxAge")]
    pub max_age: u32,
    /// Maximum ranking points for a neo-professional pick.
    #[serde(rename = "maxPoints")]
    pub max_points: u32,
}

/// Per-mode game configuration.
///
/// Tagged union keyed by game mode; each variant carries only the fields
/// relevant to that mode, so validation code never probes optional fields
/// that cannot exist for the mode at hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum GameConfig {
    #[serde(rename = "auction")]
    Auction {
        budget: Decimal,
        /// Maximum roster size, if the game caps it.
        #[serde(rename = "maxRiders", default)]
        max_riders: Option<u32>,
        /// Cap on a rider's minimum bid regardless of ranking points.
        #[serde(rename = "maxMinimumBid", default)]
        max_minimum_bid: Option<Decimal>,
        #[serde(rename = "auctionPeriods", default)]
        auction_periods: Vec<AuctionPeriod>,
    },
    #[serde(rename = "worldtour-manager")]
    WorldTourManager {
        budget: Decimal,
        /// Full roster size for the mode.
        #[serde(rename = "teamSize")]
        team_size: u32,
        /// Roster size at which the neo-professional quota kicks in.
        #[serde(rename = "minRiders", default = "default_min_riders")]
        min_riders: u32,
        #[serde(rename = "neoPro")]
        neo_pro: NeoProLimits,
        #[serde(rename = "maxMinimumBid", default)]
        max_minimum_bid: Option<Decimal>,
        #[serde(rename = "auctionPeriods", default)]
        auction_periods: Vec<AuctionPeriod>,
    },
    #[serde(rename = "marginal-gains")]
    MarginalGains {
        #[serde(rename = "maxRiders", default)]
        max_riders: Option<u32>,
        #[serde(rename = "minRiders", default = "default_min_riders")]
        min_riders: u32,
        #[serde(rename = "neoPro")]
        neo_pro: NeoProLimits,
    },
    #[serde(rename = "full-grid")]
    FullGrid {
        budget: Decimal,
        #[serde(rename = "maxRiders", default)]
        max_riders: Option<u32>,
        /// Admin-assigned fixed values per rider key. A rider absent from
        /// the map is not yet offered and must be hidden from listings.
        #[serde(rename = "riderValues", default)]
        rider_values: HashMap<String, Decimal>,
    },
}

impl GameConfig {
    /// The game mode this configuration belongs to.
    pub fn mode(&self) -> GameMode {
        match self {
            GameConfig::Auction { .. } => GameMode::Auction,
            GameConfig::WorldTourManager { .. } => GameMode::WorldTourManager,
            GameConfig::MarginalGains { .. } => GameMode::MarginalGains,
            GameConfig::FullGrid { .. } => GameMode::FullGrid,
        }
    }

    /// Total spendable budget. `None` for marginal-gains, which has none.
    pub fn budget(&self) -> Option<Decimal> {
        match self {
            GameConfig::Auction { budget, .. }
            | GameConfig::WorldTourManager { budget, .. }
            | GameConfig::FullGrid { budget, .. } => Some(*budget),
            GameConfig::MarginalGains { .. } => None,
        }
    }

    /// Maximum roster size, however the mode names it.
    pub fn max_roster_size(&self) -> Option<u32> {
        match self {
            GameConfig::Auction { max_riders, .. }
            | GameConfig::MarginalGains { max_riders, .. }
            | GameConfig::FullGrid { max_riders, .. } => *max_riders,
            GameConfig::WorldTourManager { team_size, .. } => Some(*team_size),
        }
    }

    /// Cap on a rider's minimum bid, if the game defines one.
    pub fn max_minimum_bid(&self) -> Option<Decimal> {
        match self {
            GameConfig::Auction {
                max_minimum_bid, ..
            }
            | GameConfig::WorldTourManager {
                max_minimum_bid, ..
            } => *max_minimum_bid,
            _ => None,
        }
    }

    /// Auction periods for modes that schedule them.
    pub fn auction_periods(&self) -> &[AuctionPeriod] {
        match self {
            GameConfig::Auction {
                auction_periods, ..
            }
            | GameConfig::WorldTourManager {
                auction_periods, ..
            } => auction_periods,
            _ => &[],
        }
    }

    /// Neo-professional thresholds plus quota threshold, for modes with the
    /// rule.
    pub fn neo_pro_rule(&self) -> Option<(u32, NeoProLimits)> {
        match self {
            GameConfig::WorldTourManager {
                min_riders,
                neo_pro,
                ..
            }
            | GameConfig::MarginalGains {
                min_riders,
                neo_pro,
                ..
            } => Some((*min_riders, *neo_pro)),
            _ => None,
        }
    }

    /// Admin-assigned fixed value for a rider (full-grid only).
    pub fn rider_value(&self, rider_key: &str) -> Option<Decimal> {
        match self {
            GameConfig::FullGrid { rider_values, .. } => rider_values.get(rider_key).copied(),
            _ => None,
        }
    }
}

/// A competition instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub name: String,
    pub status: GameStatus,
    #[serde(flatten)]
    pub config: GameConfig,
}

impl Game {
    pub fn mode(&self) -> GameMode {
        self.config.mode()
    }
}

/// A professional cyclist. Read-only from the engine's perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rider {
    pub id: String,
    /// Stable identifier; falls back to `id` when absent.
    #[serde(rename = "nameID", default)]
    pub name_id: Option<String>,
    pub name: String,
    pub team: String,
    #[serde(default)]
    pub jersey: Option<String>,
    /// Ranking points; drives the effective minimum bid.
    pub points: Decimal,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub retired: bool,
    /// World ranking position, if the rider is ranked.
    #[serde(rename = "worldRank", default)]
    pub world_rank: Option<u32>,
}

impl Rider {
    /// The stable key used everywhere bids and sold records reference a
    /// rider: `name_id` when present and non-empty, otherwise `id`.
    pub fn key(&self) -> &str {
        match self.name_id.as_deref() {
            Some(name_id) if !name_id.is_empty() => name_id,
            _ => &self.id,
        }
    }
}

/// One user's membership in a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "gameId")]
    pub game_id: String,
    /// Authoritative only after the game is finalized.
    #[serde(rename = "spentBudget", default)]
    pub spent_budget: Decimal,
    #[serde(rename = "rosterComplete", default)]
    pub roster_complete: bool,
    #[serde(default)]
    pub division: Option<String>,
}

impl Participant {
    /// Synthesized zero-budget participant for admins viewing a game they
    /// have not joined. Read-only; never persisted.
    pub fn read_only_placeholder(game_id: &str, user_id: &str) -> Self {
        Self {
            id: format!("viewer-{user_id}"),
            user_id: user_id.to_string(),
            game_id: game_id.to_string(),
            spent_budget: Decimal::ZERO,
            roster_complete: false,
            division: None,
        }
    }
}

/// Status of a bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BidStatus {
    /// Currently the participant's live claim on the rider.
    Active,
    /// Another bid became strictly higher. Still holds a budget reservation;
    /// only the external finalize process sets this.
    Outbid,
    /// Finalized in the participant's favor.
    Won,
    /// Finalized against the participant.
    Lost,
    /// Withdrawn by the participant while still active/outbid.
    Cancelled,
}

impl BidStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BidStatus::Won | BidStatus::Lost | BidStatus::Cancelled)
    }

    /// Non-terminal bids reserve budget: an outbid participant must be able
    /// to re-bid without a separate top-up step.
    pub fn holds_reservation(&self) -> bool {
        matches!(self, BidStatus::Active | BidStatus::Outbid)
    }

    /// Only active/outbid bids may be cancelled by the user.
    pub fn is_cancellable(&self) -> bool {
        self.holds_reservation()
    }
}

impl std::fmt::Display for BidStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BidStatus::Active => "active",
            BidStatus::Outbid => "outbid",
            BidStatus::Won => "won",
            BidStatus::Lost => "lost",
            BidStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A bid (or direct selection) on a rider.
///
/// Invariant: for a given (user, rider) pair there is at most one
/// non-terminal bid at any time. Placing again replaces, never appends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "participantId")]
    pub participant_id: String,
    #[serde(rename = "riderNameId")]
    pub rider_name_id: String,
    // Denormalized rider snapshot for display.
    #[serde(rename = "riderName")]
    pub rider_name: String,
    #[serde(rename = "riderTeam")]
    pub rider_team: String,
    #[serde(rename = "riderJersey", default)]
    pub rider_jersey: Option<String>,
    pub amount: Decimal,
    pub status: BidStatus,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Bid {
    /// Whether this bid is the user's live/reserved claim on `rider_key`.
    pub fn reserves(&self, rider_key: &str) -> bool {
        self.status.holds_reservation() && self.rider_name_id == rider_key
    }
}

/// Finalized ownership record for a rider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoldRider {
    #[serde(rename = "riderNameId")]
    pub rider_name_id: String,
    #[serde(rename = "ownerName")]
    pub owner_name: String,
    #[serde(rename = "pricePaid")]
    pub price_paid: Decimal,
}

/// Derived index rider key -> sold record.
///
/// Only meaningful in bidding-type games; in selection modes any number of
/// participants may pick the same rider, so "sold" is not a state there.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SoldRiderIndex {
    records: HashMap<String, SoldRider>,
}

impl SoldRiderIndex {
    pub fn from_records(records: impl IntoIterator<Item = SoldRider>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|r| (r.rider_name_id.clone(), r))
                .collect(),
        }
    }

    pub fn get(&self, rider_key: &str) -> Option<&SoldRider> {
        self.records.get(rider_key)
    }

    pub fn is_sold(&self, rider_key: &str) -> bool {
        self.records.contains_key(rider_key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
