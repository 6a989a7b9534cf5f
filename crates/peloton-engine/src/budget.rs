//! Budget ledger: a participant's remaining spendable budget.
//!
//! The budget is derived, never stored. While the auction is open it is
//! recomputed from the participant's bid reservations; once the game closes
//! (`active`/`finished`) the finalized `spent_budget` is the single source of
//! truth, because bid statuses may have been rewritten during finalization.

use rust_decimal::Decimal;

use peloton_common::{Bid, BidStatus, Game, Participant};

/// Compute the remaining spendable budget.
///
/// Returns `None` when the game mode has no monetary budget
/// (marginal-gains) — callers treat that as unconstrained.
///
/// `exclude_rider` removes that rider's own active/outbid reservation from
/// the sum, so re-validating an adjustment of an already-held bid does not
/// double-count its prior amount. Won amounts are always counted: a rider
/// won in an earlier auction period stays paid for.
pub fn remaining_budget(
    participant: &Participant,
    game: &Game,
    my_bids: &[Bid],
    exclude_rider: Option<&str>,
) -> Option<Decimal> {
    let budget = game.config.budget()?;

    if game.status.is_closed() {
        return Some(budget - participant.spent_budget);
    }

    let reserved: Decimal = my_bids
        .iter()
        .filter(|bid| bid.status.holds_reservation())
        .filter(|bid| exclude_rider != Some(bid.rider_name_id.as_str()))
        .map(|bid| bid.amount)
        .sum();

    let won: Decimal = my_bids
        .iter()
        .filter(|bid| bid.status == BidStatus::Won)
        .map(|bid| bid.amount)
        .sum();

    Some(budget - reserved - won)
}
