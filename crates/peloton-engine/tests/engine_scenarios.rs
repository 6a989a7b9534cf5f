//! End-to-end scenarios for the bidding engine against an in-memory store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashSet;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Notify;

use peloton_common::{
    AuctionPeriod, Bid, BidStatus, Game, GameConfig, GameStatus, NeoProLimits, Participant, Rider,
    SoldRider,
};
use peloton_engine::{
    BidDraft, BidFilter, BidLifecycleManager, EngineError, GameStore, InvalidationBus,
    MemorySnapshotCache, SnapshotCache, SnapshotReconciler, StoreError, Viewer,
};

/// Pauses `cancel_bid` calls: signals `entered` on arrival, then waits for
/// `release`.
#[derive(Clone, Default)]
struct CancelGate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

/// In-memory store fake. Upsert replaces non-terminal bids per
/// (user, rider); cancellations can be forced to fail per bid id or held
/// open via the gate.
struct FakeStore {
    game: Mutex<Game>,
    participants: Mutex<HashMap<String, Participant>>,
    bids: Mutex<Vec<Bid>>,
    sold: Mutex<Vec<SoldRider>>,
    fail_cancel: DashSet<String>,
    cancel_gate: Mutex<Option<CancelGate>>,
    next_id: AtomicU64,
}

impl FakeStore {
    fn new(game: Game) -> Self {
        Self {
            game: Mutex::new(game),
            participants: Mutex::new(HashMap::new()),
            bids: Mutex::new(Vec::new()),
            sold: Mutex::new(Vec::new()),
            fail_cancel: DashSet::new(),
            cancel_gate: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn with_participant(self, participant: Participant) -> Self {
        self.participants
            .lock()
            .insert(participant.user_id.clone(), participant);
        self
    }

    fn insert_bid(&self, bid: Bid) {
        self.bids.lock().push(bid);
    }

    fn non_terminal_bids(&self, user_id: &str, rider_key: &str) -> Vec<Bid> {
        self.bids
            .lock()
            .iter()
            .filter(|bid| {
                bid.user_id == user_id
                    && bid.rider_name_id == rider_key
                    && !bid.status.is_terminal()
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl GameStore for FakeStore {
    async fn game(&self, game_id: &str) -> Result<Game, StoreError> {
        let game = self.game.lock().clone();
        if game.id == game_id {
            Ok(game)
        } else {
            Err(StoreError::NotFound {
                kind: "game",
                id: game_id.to_string(),
            })
        }
    }

    async fn participant(
        &self,
        _game_id: &str,
        user_id: &str,
    ) -> Result<Option<Participant>, StoreError> {
        Ok(self.participants.lock().get(user_id).cloned())
    }

    async fn bids(&self, _game_id: &str, filter: BidFilter) -> Result<Vec<Bid>, StoreError> {
        Ok(self
            .bids
            .lock()
            .iter()
            .filter(|bid| filter.matches(bid))
            .cloned()
            .collect())
    }

    async fn sold_riders(&self, _game_id: &str) -> Result<Vec<SoldRider>, StoreError> {
        Ok(self.sold.lock().clone())
    }

    async fn upsert_bid(&self, draft: BidDraft) -> Result<Bid, StoreError> {
        let mut bids = self.bids.lock();
        for existing in bids.iter_mut() {
            if existing.user_id == draft.user_id
                && existing.rider_name_id == draft.rider_name_id
                && !existing.status.is_terminal()
            {
                existing.status = BidStatus::Cancelled;
            }
        }
        let bid = Bid {
            id: format!("bid-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            user_id: draft.user_id,
            participant_id: draft.participant_id,
            rider_name_id: draft.rider_name_id,
            rider_name: draft.rider_name,
            rider_team: draft.rider_team,
            rider_jersey: draft.rider_jersey,
            amount: draft.amount,
            status: BidStatus::Active,
            created_at: draft.timestamp,
        };
        bids.push(bid.clone());
        Ok(bid)
    }

    async fn cancel_bid(&self, bid_id: &str) -> Result<(), StoreError> {
        let gate = self.cancel_gate.lock().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.fail_cancel.contains(bid_id) {
            return Err(StoreError::Connection("store unreachable".to_string()));
        }
        let mut bids = self.bids.lock();
        let bid = bids
            .iter_mut()
            .find(|bid| bid.id == bid_id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "bid",
                id: bid_id.to_string(),
            })?;
        if !bid.status.is_cancellable() {
            return Err(StoreError::Rejected(format!(
                "bid {bid_id} is not active/outbid"
            )));
        }
        bid.status = BidStatus::Cancelled;
        Ok(())
    }
}

fn rider(key: &str, points: Decimal) -> Rider {
    Rider {
        id: key.to_string(),
        name_id: Some(key.to_string()),
        name: key.to_string(),
        team: format!("team-{key}"),
        jersey: None,
        points,
        age: Some(29),
        retired: false,
        world_rank: Some(50),
    }
}

fn participant(user_id: &str, game_id: &str) -> Participant {
    Participant {
        id: format!("p-{user_id}"),
        user_id: user_id.to_string(),
        game_id: game_id.to_string(),
        spent_budget: Decimal::ZERO,
        roster_complete: false,
        division: None,
    }
}

fn auction_game(budget: Decimal) -> Game {
    Game {
        id: "auctioneer".to_string(),
        name: "Auctioneer".to_string(),
        status: GameStatus::Bidding,
        config: GameConfig::Auction {
            budget,
            max_riders: None,
            max_minimum_bid: None,
            auction_periods: Vec::new(),
        },
    }
}

struct Harness {
    store: Arc<FakeStore>,
    cache: Arc<MemorySnapshotCache>,
    reconciler: SnapshotReconciler<FakeStore, MemorySnapshotCache>,
    manager: Arc<BidLifecycleManager<FakeStore, MemorySnapshotCache>>,
}

impl Harness {
    async fn start(store: FakeStore, viewer: Viewer, riders: Vec<Rider>) -> Self {
        let game_id = store.game.lock().id.clone();
        let store = Arc::new(store);
        let cache = Arc::new(MemorySnapshotCache::new());
        let reconciler =
            SnapshotReconciler::new(Arc::clone(&store), Arc::clone(&cache), viewer.clone());
        reconciler.set_reference_riders(riders);
        reconciler.begin_session(&game_id);
        reconciler
            .load(&game_id, false)
            .await
            .expect("initial load");
        let manager = Arc::new(BidLifecycleManager::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            viewer,
            reconciler.projection(),
        ));
        Self {
            store,
            cache,
            reconciler,
            manager,
        }
    }
}

// Scenario A: budget 100, rider points 40, no cap. 40 succeeds, 39 rejects.
#[tokio::test]
async fn scenario_a_minimum_bid_boundary() {
    let store = FakeStore::new(auction_game(dec!(100)))
        .with_participant(participant("u1", "auctioneer"));
    let riders = vec![rider("wout", dec!(40))];
    let h = Harness::start(store, Viewer::user("u1"), riders.clone()).await;

    let err = h
        .manager
        .place_bid(&riders[0], dec!(39), &riders)
        .await
        .unwrap_err();
    match err {
        EngineError::Validation(rejection) => {
            assert_eq!(rejection.code(), "MIN_BID");
            assert!(rejection.to_string().contains("must be at least 40"));
        }
        other => panic!("expected validation rejection, got {other:?}"),
    }

    let bid = h.manager.place_bid(&riders[0], dec!(40), &riders).await.unwrap();
    assert_eq!(bid.amount, dec!(40));
    assert_eq!(bid.status, BidStatus::Active);
}

// Scenario B: 27 non-neo riders held, zero neo-pros, 28th non-neo rejected.
#[tokio::test]
async fn scenario_b_neo_pro_quota() {
    let game = Game {
        id: "wtm".to_string(),
        name: "WorldTour Manager".to_string(),
        status: GameStatus::Bidding,
        config: GameConfig::WorldTourManager {
            budget: dec!(1000000),
            team_size: 30,
            min_riders: 27,
            neo_pro: NeoProLimits {
                max_age: 25,
                max_points: 300,
            },
            max_minimum_bid: None,
            auction_periods: Vec::new(),
        },
    };
    let store = FakeStore::new(game).with_participant(participant("u1", "wtm"));

    let mut riders: Vec<Rider> = (0..28).map(|i| rider(&format!("r{i}"), dec!(500))).collect();
    for (i, r) in riders.iter().enumerate().take(27) {
        store.insert_bid(Bid {
            id: format!("seed-{i}"),
            user_id: "u1".to_string(),
            participant_id: "p-u1".to_string(),
            rider_name_id: r.key().to_string(),
            rider_name: r.name.clone(),
            rider_team: r.team.clone(),
            rider_jersey: None,
            amount: dec!(500),
            status: BidStatus::Active,
            created_at: Utc::now(),
        });
    }

    let h = Harness::start(store, Viewer::user("u1"), riders.clone()).await;
    let err = h
        .manager
        .place_bid(&riders[27], dec!(500), &riders)
        .await
        .unwrap_err();
    match err {
        EngineError::Validation(rejection) => {
            assert_eq!(rejection.code(), "NEO_QUOTA");
            let message = rejection.to_string();
            assert!(message.contains("27"));
            assert!(message.contains("25"));
            assert!(message.contains("300"));
        }
        other => panic!("expected neo-pro quota rejection, got {other:?}"),
    }

    // A qualifying neo-professional 28th rider passes.
    let mut neo = rider("neo", dec!(100));
    neo.age = Some(21);
    riders.push(neo.clone());
    assert!(h.manager.place_bid(&neo, dec!(0), &riders).await.is_ok());
}

// Scenario C: full-grid value 0 hides the rider; value 500 sells at exactly
// 500 regardless of the entered amount.
#[tokio::test]
async fn scenario_c_full_grid_fixed_prices() {
    let game = Game {
        id: "grid".to_string(),
        name: "Full Grid".to_string(),
        status: GameStatus::Bidding,
        config: GameConfig::FullGrid {
            budget: dec!(1000),
            max_riders: None,
            rider_values: HashMap::from([
                ("rider-a".to_string(), dec!(0)),
                ("rider-b".to_string(), dec!(500)),
            ]),
        },
    };
    let store = FakeStore::new(game).with_participant(participant("u1", "grid"));
    let riders = vec![rider("rider-a", dec!(900)), rider("rider-b", dec!(900))];
    let h = Harness::start(store, Viewer::user("u1"), riders.clone()).await;

    let snapshot = h.reconciler.projection().snapshot().unwrap();
    let views = snapshot.rider_views(&riders, &Viewer::user("u1"));
    assert_eq!(views.len(), 1, "zero-valued rider must be hidden");
    assert_eq!(views[0].rider.key(), "rider-b");
    assert_eq!(views[0].minimum_bid, dec!(500));

    // The entered amount is ignored; the fixed value is charged.
    let bid = h.manager.place_bid(&riders[1], dec!(1), &riders).await.unwrap();
    assert_eq!(bid.amount, dec!(500));

    // The hidden zero-valued rider cannot be acquired either, at any
    // entered amount: the forced price of zero is not a free purchase.
    let err = h.manager.place_bid(&riders[0], dec!(1), &riders).await.unwrap_err();
    match err {
        EngineError::Validation(rejection) => assert_eq!(rejection.code(), "NOT_OFFERED"),
        other => panic!("expected not-offered rejection, got {other:?}"),
    }
    assert!(h.store.non_terminal_bids("u1", "rider-a").is_empty());
}

// Scenario D: reset cancels active bids only; outbid bids are untouched.
#[tokio::test]
async fn scenario_d_reset_leaves_outbid_alone() {
    let store = FakeStore::new(auction_game(dec!(100)))
        .with_participant(participant("u1", "auctioneer"));
    store.insert_bid(Bid {
        id: "bid-x".to_string(),
        user_id: "u1".to_string(),
        participant_id: "p-u1".to_string(),
        rider_name_id: "rider-x".to_string(),
        rider_name: "rider-x".to_string(),
        rider_team: "team-x".to_string(),
        rider_jersey: None,
        amount: dec!(30),
        status: BidStatus::Active,
        created_at: Utc::now(),
    });
    store.insert_bid(Bid {
        id: "bid-y".to_string(),
        user_id: "u1".to_string(),
        participant_id: "p-u1".to_string(),
        rider_name_id: "rider-y".to_string(),
        rider_name: "rider-y".to_string(),
        rider_team: "team-y".to_string(),
        rider_jersey: None,
        amount: dec!(20),
        status: BidStatus::Outbid,
        created_at: Utc::now(),
    });
    let riders = vec![rider("rider-x", dec!(30)), rider("rider-y", dec!(20))];
    let h = Harness::start(store, Viewer::user("u1"), riders).await;

    let outcome = h.manager.reset_all_active_bids().await.unwrap();
    assert!(outcome.is_complete());
    assert_eq!(outcome.cancelled, vec!["bid-x".to_string()]);

    let snapshot = h.reconciler.projection().snapshot().unwrap();
    assert!(snapshot.my_bid_on("rider-x").is_none());
    let y = snapshot.my_bid_on("rider-y").unwrap();
    assert_eq!(y.status, BidStatus::Outbid);

    // The store agrees: the outbid bid still holds its reservation.
    assert_eq!(h.store.non_terminal_bids("u1", "rider-y").len(), 1);
    assert!(h.store.non_terminal_bids("u1", "rider-x").is_empty());
}

// Scenario E: top-200 restriction rejects a rank-250 rider regardless of
// budget or quota state.
#[tokio::test]
async fn scenario_e_top200_restriction() {
    let now = Utc::now();
    let mut game = auction_game(dec!(100000));
    if let GameConfig::Auction {
        auction_periods, ..
    } = &mut game.config
    {
        auction_periods.push(AuctionPeriod {
            start: now - Duration::hours(1),
            end: now + Duration::hours(1),
            top200_only: true,
        });
    }
    let store = FakeStore::new(game).with_participant(participant("u1", "auctioneer"));
    let mut outsider = rider("outsider", dec!(10));
    outsider.world_rank = Some(250);
    let riders = vec![outsider.clone()];
    let h = Harness::start(store, Viewer::user("u1"), riders.clone()).await;

    let err = h.manager.place_bid(&outsider, dec!(10), &riders).await.unwrap_err();
    match err {
        EngineError::Validation(rejection) => assert_eq!(rejection.code(), "TOP200"),
        other => panic!("expected top-200 rejection, got {other:?}"),
    }
}

// Cancelling a bid twice: the second call must reject, not silently
// succeed.
#[tokio::test]
async fn cancel_is_not_idempotent() {
    let store = FakeStore::new(auction_game(dec!(100)))
        .with_participant(participant("u1", "auctioneer"));
    let riders = vec![rider("wout", dec!(40))];
    let h = Harness::start(store, Viewer::user("u1"), riders.clone()).await;

    let bid = h.manager.place_bid(&riders[0], dec!(40), &riders).await.unwrap();
    h.manager.cancel_bid(&bid.id).await.unwrap();

    let err = h.manager.cancel_bid(&bid.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotCancellable { .. }));
    assert!(err.to_string().contains("not active/outbid"));
}

// After any sequence of placements on one rider, at most one non-terminal
// bid exists for the (user, rider) pair; the replacement keeps the latest
// amount.
#[tokio::test]
async fn placing_replaces_rather_than_appends() {
    let store = FakeStore::new(auction_game(dec!(100)))
        .with_participant(participant("u1", "auctioneer"));
    let riders = vec![rider("wout", dec!(40))];
    let h = Harness::start(store, Viewer::user("u1"), riders.clone()).await;

    h.manager.place_bid(&riders[0], dec!(40), &riders).await.unwrap();
    h.manager.place_bid(&riders[0], dec!(55), &riders).await.unwrap();
    h.manager.place_bid(&riders[0], dec!(60), &riders).await.unwrap();

    let non_terminal = h.store.non_terminal_bids("u1", "wout");
    assert_eq!(non_terminal.len(), 1);
    assert_eq!(non_terminal[0].amount, dec!(60));

    let snapshot = h.reconciler.projection().snapshot().unwrap();
    let mine: Vec<_> = snapshot
        .my_bids
        .iter()
        .filter(|bid| bid.reserves("wout"))
        .collect();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].amount, dec!(60));
}

// A failed store call must leave local state untouched.
#[tokio::test]
async fn transport_failure_rolls_nothing_back() {
    let store = FakeStore::new(auction_game(dec!(100)))
        .with_participant(participant("u1", "auctioneer"));
    let riders = vec![rider("wout", dec!(40))];
    let h = Harness::start(store, Viewer::user("u1"), riders.clone()).await;

    let bid = h.manager.place_bid(&riders[0], dec!(40), &riders).await.unwrap();
    h.store.fail_cancel.insert(bid.id.clone());

    let err = h.manager.cancel_bid(&bid.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Transport(_)));

    // The bid is still held locally and in the store.
    let snapshot = h.reconciler.projection().snapshot().unwrap();
    assert!(snapshot.my_bid_on("wout").is_some());
    assert_eq!(h.store.non_terminal_bids("u1", "wout").len(), 1);
}

// Reset tolerates partial failure: successes are synchronized locally,
// failures are reported and keep their local state.
#[tokio::test]
async fn reset_partial_failure() {
    let store = FakeStore::new(auction_game(dec!(100)))
        .with_participant(participant("u1", "auctioneer"));
    let riders = vec![rider("a", dec!(10)), rider("b", dec!(10))];
    let h = Harness::start(store, Viewer::user("u1"), riders.clone()).await;

    h.manager.place_bid(&riders[0], dec!(10), &riders).await.unwrap();
    let doomed = h.manager.place_bid(&riders[1], dec!(10), &riders).await.unwrap();
    h.store.fail_cancel.insert(doomed.id.clone());

    let outcome = h.manager.reset_all_active_bids().await.unwrap();
    assert!(!outcome.is_complete());
    assert_eq!(outcome.attempted(), 2);
    assert_eq!(outcome.cancelled.len(), 1);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, doomed.id);

    let snapshot = h.reconciler.projection().snapshot().unwrap();
    assert!(snapshot.my_bid_on("a").is_none());
    assert!(snapshot.my_bid_on("b").is_some());
}

// The watch loop reloads fresh state whenever the bus signals the game,
// picking up bids placed from elsewhere.
#[tokio::test]
async fn watch_reloads_on_invalidation_signal() {
    let store = Arc::new(
        FakeStore::new(auction_game(dec!(100))).with_participant(participant("u1", "auctioneer")),
    );
    let cache = Arc::new(MemorySnapshotCache::new());
    let bus = InvalidationBus::default();
    let reconciler = Arc::new(
        SnapshotReconciler::new(Arc::clone(&store), cache, Viewer::user("u1"))
            .with_bus(bus.clone()),
    );
    reconciler.set_reference_riders(vec![rider("wout", dec!(40))]);
    reconciler.load("auctioneer", false).await.unwrap();
    assert!(reconciler.projection().snapshot().unwrap().my_bids.is_empty());

    let watcher = Arc::clone(&reconciler);
    let handle = tokio::spawn(async move { watcher.watch("auctioneer").await });

    // Another device places a bid; this client only hears about it via the
    // bus.
    store.insert_bid(Bid {
        id: "remote-bid".to_string(),
        user_id: "u1".to_string(),
        participant_id: "p-u1".to_string(),
        rider_name_id: "wout".to_string(),
        rider_name: "wout".to_string(),
        rider_team: "team-wout".to_string(),
        rider_jersey: None,
        amount: dec!(40),
        status: BidStatus::Active,
        created_at: Utc::now(),
    });

    // The subscriber registers inside the spawned task, so keep signalling
    // until the reload lands.
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        bus.notify("auctioneer");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let refreshed = reconciler
            .projection()
            .with(|snapshot| snapshot.my_bid_on("wout").is_some())
            .unwrap_or(false);
        if refreshed {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "watch never reloaded after invalidation"
        );
    }
    handle.abort();
}

// Reset is a mutation like any other: a read-only admin view cannot run it.
#[tokio::test]
async fn reset_rejects_read_only_viewer() {
    let store = FakeStore::new(auction_game(dec!(100)));
    let h = Harness::start(store, Viewer::admin("boss"), Vec::new()).await;

    let err = h.manager.reset_all_active_bids().await.unwrap_err();
    assert!(matches!(err, EngineError::ReadOnly));
}

// While a reset batch is running, its target riders are guarded: a
// concurrent placement on one of them is rejected instead of interleaving.
#[tokio::test]
async fn reset_holds_rider_guards_while_running() {
    let store = FakeStore::new(auction_game(dec!(100)))
        .with_participant(participant("u1", "auctioneer"));
    let riders = vec![rider("a", dec!(10))];
    let h = Harness::start(store, Viewer::user("u1"), riders.clone()).await;
    h.manager.place_bid(&riders[0], dec!(10), &riders).await.unwrap();

    let gate = CancelGate::default();
    *h.store.cancel_gate.lock() = Some(gate.clone());

    let manager = Arc::clone(&h.manager);
    let reset = tokio::spawn(async move { manager.reset_all_active_bids().await });

    // The store is now inside the cancellation; the guard must be held.
    gate.entered.notified().await;
    let err = h.manager.place_bid(&riders[0], dec!(10), &riders).await.unwrap_err();
    assert!(matches!(err, EngineError::InFlight { .. }));

    gate.release.notify_one();
    let outcome = reset.await.unwrap().unwrap();
    assert!(outcome.is_complete());
    assert_eq!(outcome.cancelled.len(), 1);
    assert!(!h.manager.is_in_flight("a"));
}

// An admin who has not joined the game gets a synthesized zero-budget
// participant and a read-only view.
#[tokio::test]
async fn admin_without_participant_is_read_only() {
    let store = FakeStore::new(auction_game(dec!(100)));
    let riders = vec![rider("wout", dec!(40))];
    let h = Harness::start(store, Viewer::admin("boss"), riders.clone()).await;

    let snapshot = h.reconciler.projection().snapshot().unwrap();
    assert!(snapshot.read_only);
    assert_eq!(snapshot.participant.spent_budget, Decimal::ZERO);

    let err = h.manager.place_bid(&riders[0], dec!(40), &riders).await.unwrap_err();
    assert!(matches!(err, EngineError::ReadOnly));
}

// A regular user who has not joined the game cannot load it at all.
#[tokio::test]
async fn regular_user_without_participant_fails_load() {
    let store = Arc::new(FakeStore::new(auction_game(dec!(100))));
    let cache = Arc::new(MemorySnapshotCache::new());
    let reconciler = SnapshotReconciler::new(store, cache, Viewer::user("stranger"));
    reconciler.set_reference_riders(Vec::new());

    let err = reconciler.load("auctioneer", false).await.unwrap_err();
    assert!(matches!(err, EngineError::Transport(StoreError::NotFound { .. })));
}

// Placing a bid invalidates the cached snapshot so the next read is forced
// fresh; the fresh load then reflects the new bid.
#[tokio::test]
async fn placement_invalidates_cache() {
    let store = FakeStore::new(auction_game(dec!(100)))
        .with_participant(participant("u1", "auctioneer"));
    let riders = vec![rider("wout", dec!(40))];
    let h = Harness::start(store, Viewer::user("u1"), riders.clone()).await;
    assert!(h.cache.get("auctioneer").is_some());

    h.manager.place_bid(&riders[0], dec!(40), &riders).await.unwrap();
    assert!(h.cache.get("auctioneer").is_none());

    let snapshot = h.reconciler.load("auctioneer", false).await.unwrap();
    assert!(snapshot.my_bid_on("wout").is_some());
}
