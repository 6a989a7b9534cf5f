//! Rider pricing: the effective minimum bid per game mode.
//!
//! Pure functions of (rider, game); no side effects. The rules, in priority
//! order:
//!
//! 1. Full-grid: the admin-assigned fixed value, or 0 when the rider is not
//!    yet offered (such riders are hidden from listings entirely).
//! 2. A configured `max_minimum_bid` caps riders whose ranking points exceed
//!    it.
//! 3. Selection modes never offer a rider for free: zero points prices at 1.
//! 4. Otherwise the minimum bid equals the rider's ranking points.

use rust_decimal::Decimal;

use peloton_common::{Game, GameMode, Rider};

/// Compute the price floor (or fixed price) a rider can be acquired for.
pub fn effective_minimum_bid(rider: &Rider, game: &Game) -> Decimal {
    if game.mode() == GameMode::FullGrid {
        // Absent from the value grid means not yet offered.
        return game.config.rider_value(rider.key()).unwrap_or(Decimal::ZERO);
    }

    if let Some(cap) = game.config.max_minimum_bid() {
        if rider.points > cap {
            return cap;
        }
    }

    if game.mode().is_selection() && rider.points.is_zero() {
        return Decimal::ONE;
    }

    rider.points
}

/// Whether the rider appears in listings for this game at all.
///
/// Only full-grid hides riders: a zero effective minimum there means the
/// admin has not priced the rider yet.
pub fn is_offered(rider: &Rider, game: &Game) -> bool {
    match game.mode() {
        GameMode::FullGrid => effective_minimum_bid(rider, game) > Decimal::ZERO,
        _ => true,
    }
}
