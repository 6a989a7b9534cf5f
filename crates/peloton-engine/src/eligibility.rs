//! Pre-placement eligibility checks for bids.
//!
//! All checks run before a bid reaches the external store. They are
//! evaluated in a fixed order and short-circuit on the first rejection,
//! each carrying a specific user-facing reason:
//!
//! 1. **Already sold**: bidding-type games only
//! 2. **Top-200 window**: restriction resolved purely from period time windows
//! 3. **Offered**: full-grid riders without an admin-assigned value are not
//!    offered and cannot be placed
//! 4. **Minimum amount**: non-selection modes must meet the price floor
//! 5. **One rider per team**: full-grid only
//! 6. **Roster cap**: distinct active/outbid riders strictly below the cap
//! 7. **Budget**: skipped for marginal-gains
//! 8. **Neo-professional quota and points cap**: selection modes with the rule

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use peloton_common::{Bid, BidStatus, Game, GameMode, NeoProLimits, Participant, Rider, SoldRiderIndex};

use crate::budget::remaining_budget;
use crate::pricing::{effective_minimum_bid, is_offered};

/// Resolve whether a top-200 restriction is currently in force.
///
/// Scans the game's auction periods for one whose time window contains
/// `now` and returns its flag. Only the window matters; periods carry no
/// manually-edited status, so a desynchronized edit cannot cause a false
/// restriction.
pub fn top200_active(game: &Game, now: DateTime<Utc>) -> bool {
    game.config
        .auction_periods()
        .iter()
        .find(|period| period.contains(now))
        .map(|period| period.top200_only)
        .unwrap_or(false)
}

/// Whether the rider qualifies as a neo-professional by age.
pub fn is_neo_professional(rider: &Rider, limits: NeoProLimits) -> bool {
    rider.age.is_some_and(|age| age <= limits.max_age)
}

/// Whether the rider counts toward the neo-professional roster quota.
///
/// Quota qualification requires both the age threshold and the points cap;
/// a young rider over the cap is a neo-professional but does not satisfy
/// the quota (and cannot be placed at all, see check 7).
pub fn qualifies_for_neo_quota(rider: &Rider, limits: NeoProLimits) -> bool {
    is_neo_professional(rider, limits) && rider.points <= Decimal::from(limits.max_points)
}

/// Context for a placement check.
///
/// Contains everything needed to evaluate every placement check against one
/// proposed placement.
#[derive(Debug, Clone)]
pub struct PlacementCheck<'a> {
    /// The rider being placed.
    pub rider: &'a Rider,

    /// Proposed bid amount (ignored by selection modes, which force the
    /// effective minimum; still validated for auction).
    pub amount: Decimal,

    /// The game being played.
    pub game: &'a Game,

    /// The participant placing the bid.
    pub participant: &'a Participant,

    /// All of the participant's own bids in this game.
    pub my_bids: &'a [Bid],

    /// Reference rider data, used to resolve held riders for the
    /// neo-professional quota.
    pub all_riders: &'a [Rider],

    /// Finalized ownership records (bidding-type games).
    pub sold: &'a SoldRiderIndex,

    /// Evaluation instant for the top-200 window resolution.
    pub now: DateTime<Utc>,
}

impl<'a> PlacementCheck<'a> {
    /// Create a check context with empty bid/rider/sold state.
    pub fn new(
        rider: &'a Rider,
        amount: Decimal,
        game: &'a Game,
        participant: &'a Participant,
    ) -> Self {
        Self {
            rider,
            amount,
            game,
            participant,
            my_bids: &[],
            all_riders: &[],
            sold: empty_sold_index(),
            now: Utc::now(),
        }
    }

    /// Set the participant's bids.
    pub fn with_bids(mut self, my_bids: &'a [Bid]) -> Self {
        self.my_bids = my_bids;
        self
    }

    /// Set the reference rider data.
    pub fn with_riders(mut self, all_riders: &'a [Rider]) -> Self {
        self.all_riders = all_riders;
        self
    }

    /// Set the sold-rider index.
    pub fn with_sold(mut self, sold: &'a SoldRiderIndex) -> Self {
        self.sold = sold;
        self
    }

    /// Set the evaluation instant.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Whether the participant already holds a live reservation on the
    /// rider being placed (i.e. this placement adjusts an existing bid).
    fn is_adjusting(&self) -> bool {
        self.my_bids.iter().any(|bid| bid.reserves(self.rider.key()))
    }

    /// Distinct riders currently reserved (active/outbid), excluding the
    /// rider being placed.
    fn held_rider_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .my_bids
            .iter()
            .filter(|bid| bid.status.holds_reservation())
            .map(|bid| bid.rider_name_id.as_str())
            .filter(|key| *key != self.rider.key())
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    fn rider_by_key(&self, key: &str) -> Option<&'a Rider> {
        self.all_riders.iter().find(|rider| rider.key() == key)
    }
}

fn empty_sold_index() -> &'static SoldRiderIndex {
    static EMPTY: std::sync::OnceLock<SoldRiderIndex> = std::sync::OnceLock::new();
    EMPTY.get_or_init(SoldRiderIndex::default)
}

/// Reason a placement was rejected.
///
/// Every variant carries the context its user-facing message needs; the
/// message is surfaced verbatim and never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementRejection {
    /// The rider was already sold to another participant.
    RiderSold { owner_name: String },

    /// A top-200 restriction is in force and the rider is unranked or
    /// ranked below 200.
    OutsideTop200 { rank: Option<u32> },

    /// Full-grid: the rider has no admin-assigned value and is not offered.
    RiderNotOffered,

    /// The bid amount is zero or negative.
    InvalidAmount { amount: Decimal },

    /// The bid amount is below the rider's effective minimum.
    BelowMinimumBid { offered: Decimal, minimum: Decimal },

    /// Full-grid: already holding a rider from the same team.
    TeamConflict { team: String, held_rider: String },

    /// The roster already holds the maximum number of distinct riders.
    RosterFull { cap: u32 },

    /// The amount exceeds the participant's remaining budget.
    BudgetExceeded { amount: Decimal, remaining: Decimal },

    /// Reaching the roster threshold without any qualifying
    /// neo-professional.
    NeoProQuotaUnmet {
        min_riders: u32,
        max_age: u32,
        max_points: u32,
    },

    /// The rider is a neo-professional but exceeds the points cap.
    NeoProOverPoints { points: Decimal, max_points: u32 },
}

impl PlacementRejection {
    /// Short machine-readable code for logs and observability.
    pub fn code(&self) -> &'static str {
        match self {
            PlacementRejection::RiderSold { .. } => "SOLD",
            PlacementRejection::OutsideTop200 { .. } => "TOP200",
            PlacementRejection::RiderNotOffered => "NOT_OFFERED",
            PlacementRejection::InvalidAmount { .. } => "BAD_AMOUNT",
            PlacementRejection::BelowMinimumBid { .. } => "MIN_BID",
            PlacementRejection::TeamConflict { .. } => "TEAM",
            PlacementRejection::RosterFull { .. } => "ROSTER_FULL",
            PlacementRejection::BudgetExceeded { .. } => "BUDGET",
            PlacementRejection::NeoProQuotaUnmet { .. } => "NEO_QUOTA",
            PlacementRejection::NeoProOverPoints { .. } => "NEO_POINTS",
        }
    }
}

impl std::fmt::Display for PlacementRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlacementRejection::RiderSold { owner_name } => {
                write!(f, "already sold to {owner_name}")
            }
            PlacementRejection::OutsideTop200 { rank } => match rank {
                Some(rank) => write!(
                    f,
                    "bidding is currently restricted to the world top 200 (rider is ranked {rank})"
                ),
                None => write!(
                    f,
                    "bidding is currently restricted to the world top 200 (rider is unranked)"
                ),
            },
            PlacementRejection::RiderNotOffered => {
                write!(f, "rider is not offered in this game")
            }
            PlacementRejection::InvalidAmount { amount } => {
                write!(f, "bid amount must be a positive number, got {amount}")
            }
            PlacementRejection::BelowMinimumBid { minimum, .. } => {
                write!(f, "bid must be at least {minimum}")
            }
            PlacementRejection::TeamConflict { team, held_rider } => {
                write!(
                    f,
                    "only one rider per team: already holding {held_rider} ({team})"
                )
            }
            PlacementRejection::RosterFull { cap } => {
                write!(f, "roster is full ({cap} riders)")
            }
            PlacementRejection::BudgetExceeded { amount, remaining } => {
                write!(f, "bid of {amount} exceeds remaining budget of {remaining}")
            }
            PlacementRejection::NeoProQuotaUnmet {
                min_riders,
                max_age,
                max_points,
            } => {
                write!(
                    f,
                    "rosters of {min_riders} or more riders must include a neo-professional \
                     (age at most {max_age}, points at most {max_points})"
                )
            }
            PlacementRejection::NeoProOverPoints { points, max_points } => {
                write!(
                    f,
                    "neo-professional exceeds the points cap: {points} > {max_points}"
                )
            }
        }
    }
}

impl std::error::Error for PlacementRejection {}

/// Run all placement checks in order, returning the first rejection.
pub fn validate_placement(check: &PlacementCheck<'_>) -> Result<(), PlacementRejection> {
    if let Some(rejection) = check_sold(check) {
        return Err(rejection);
    }
    if let Some(rejection) = check_top200(check) {
        return Err(rejection);
    }
    if let Some(rejection) = check_offered(check) {
        return Err(rejection);
    }
    if let Some(rejection) = check_amount(check) {
        return Err(rejection);
    }
    if let Some(rejection) = check_team_conflict(check) {
        return Err(rejection);
    }
    if let Some(rejection) = check_roster_cap(check) {
        return Err(rejection);
    }
    if let Some(rejection) = check_budget(check) {
        return Err(rejection);
    }
    if let Some(rejection) = check_neo_pro(check) {
        return Err(rejection);
    }
    Ok(())
}

/// Check 1: the rider must not already be sold (bidding-type games only;
/// selection modes have no sold state before finalization).
fn check_sold(check: &PlacementCheck<'_>) -> Option<PlacementRejection> {
    if !check.game.mode().is_bidding() {
        return None;
    }
    check
        .sold
        .get(check.rider.key())
        .map(|record| PlacementRejection::RiderSold {
            owner_name: record.owner_name.clone(),
        })
}

/// Check 2: when a top-200 restriction is in force the rider must be
/// ranked 200 or better.
fn check_top200(check: &PlacementCheck<'_>) -> Option<PlacementRejection> {
    if !top200_active(check.game, check.now) {
        return None;
    }
    match check.rider.world_rank {
        Some(rank) if rank <= 200 => None,
        rank => Some(PlacementRejection::OutsideTop200 { rank }),
    }
}

/// Check 3: the rider must be offered in this game at all. Only full-grid
/// hides riders; their forced price of zero must never pass as a free
/// acquisition.
fn check_offered(check: &PlacementCheck<'_>) -> Option<PlacementRejection> {
    if is_offered(check.rider, check.game) {
        None
    } else {
        Some(PlacementRejection::RiderNotOffered)
    }
}

/// Check 4: non-selection modes require a positive amount at or above the
/// effective minimum. Selection modes force the amount later, so the
/// user-entered value is irrelevant there.
fn check_amount(check: &PlacementCheck<'_>) -> Option<PlacementRejection> {
    if check.game.mode().is_selection() {
        return None;
    }
    if check.amount <= Decimal::ZERO {
        return Some(PlacementRejection::InvalidAmount {
            amount: check.amount,
        });
    }
    let minimum = effective_minimum_bid(check.rider, check.game);
    if check.amount < minimum {
        return Some(PlacementRejection::BelowMinimumBid {
            offered: check.amount,
            minimum,
        });
    }
    None
}

/// Check 5: full-grid allows at most one rider per professional team.
/// Active and won bids both block; the rider being placed is excluded so
/// adjustments pass.
fn check_team_conflict(check: &PlacementCheck<'_>) -> Option<PlacementRejection> {
    if check.game.mode() != GameMode::FullGrid {
        return None;
    }
    check
        .my_bids
        .iter()
        .filter(|bid| matches!(bid.status, BidStatus::Active | BidStatus::Won))
        .filter(|bid| bid.rider_name_id != check.rider.key())
        .find(|bid| bid.rider_team == check.rider.team)
        .map(|bid| PlacementRejection::TeamConflict {
            team: check.rider.team.clone(),
            held_rider: bid.rider_name.clone(),
        })
}

/// Check 6: the count of distinct reserved riders must stay strictly below
/// the roster cap. Adjusting an already-held rider never trips the cap.
fn check_roster_cap(check: &PlacementCheck<'_>) -> Option<PlacementRejection> {
    let cap = check.game.config.max_roster_size()?;
    if check.is_adjusting() {
        return None;
    }
    if check.held_rider_keys().len() as u32 >= cap {
        return Some(PlacementRejection::RosterFull { cap });
    }
    None
}

/// Check 7: the amount must fit the remaining budget, excluding this
/// rider's own prior reservation. Marginal-gains has no budget at all.
fn check_budget(check: &PlacementCheck<'_>) -> Option<PlacementRejection> {
    let remaining = remaining_budget(
        check.participant,
        check.game,
        check.my_bids,
        Some(check.rider.key()),
    )?;
    // Selection modes charge the effective minimum regardless of the
    // user-entered amount.
    let charged = if check.game.mode().forces_minimum_amount() {
        effective_minimum_bid(check.rider, check.game)
    } else {
        check.amount
    };
    if charged > remaining {
        return Some(PlacementRejection::BudgetExceeded {
            amount: charged,
            remaining,
        });
    }
    None
}

/// Check 8: the neo-professional roster-composition rule for selection
/// modes that define it.
fn check_neo_pro(check: &PlacementCheck<'_>) -> Option<PlacementRejection> {
    if !check.game.mode().has_neo_pro_rule() {
        return None;
    }
    let (min_riders, limits) = check.game.config.neo_pro_rule()?;

    let rider_is_neo = is_neo_professional(check.rider, limits);

    if !rider_is_neo {
        // Counting the rider being placed, would the roster reach the
        // threshold without a single qualifying neo-professional?
        let held = check.held_rider_keys();
        let count_with_placement = held.len() as u32 + 1;
        if count_with_placement >= min_riders {
            let holds_neo = held
                .iter()
                .filter_map(|key| check.rider_by_key(key))
                .any(|rider| qualifies_for_neo_quota(rider, limits));
            if !holds_neo {
                return Some(PlacementRejection::NeoProQuotaUnmet {
                    min_riders,
                    max_age: limits.max_age,
                    max_points: limits.max_points,
                });
            }
        }
        return None;
    }

    if check.rider.points > Decimal::from(limits.max_points) {
        return Some(PlacementRejection::NeoProOverPoints {
            points: check.rider.points,
            max_points: limits.max_points,
        });
    }
    None
}
