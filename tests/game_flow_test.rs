//! End-to-end game flows through the public hall interface

use async_trait::async_trait;
use bingohall::config::HallConfig;
use bingohall::errors::{GameError, InvalidClaim, LedgerError, StorageError};
use bingohall::game_store;
use bingohall::games::card::CardGrid;
use bingohall::games::draw_engine::{DrawSeed, DrawSequence};
use bingohall::games::types::{
    now_millis, Claim, ClaimKind, CompletionReason, GameId, GameStatus, NullSink, SettlementStatus, UserId,
};
use bingohall::hall::{BingoHall, HallServices};
use bingohall::ledger::{ComplianceGate, DenyListCompliance, InMemoryLedger, Ledger, LedgerReceipt};
use bingohall::storage::{BatchOp, KvStore, MemoryStore};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    hall: Arc<BingoHall>,
    store: Arc<MemoryStore>,
    ledger: Arc<InMemoryLedger>,
}

/// Hall whose store and ledger may wrap the memory store and ledger the
/// test inspects
fn harness_from(
    config: HallConfig,
    compliance: Arc<dyn ComplianceGate>,
    store: MemoryStore,
    hall_store: Arc<dyn KvStore>,
    wrap_ledger: impl FnOnce(Arc<InMemoryLedger>) -> Arc<dyn Ledger>,
) -> Harness {
    let ledger = Arc::new(InMemoryLedger::new());
    let hall = BingoHall::start(
        config,
        HallServices {
            store: hall_store,
            ledger: wrap_ledger(ledger.clone()),
            compliance,
            events: Arc::new(NullSink),
            metrics: None,
        },
    )
    .unwrap();
    Harness {
        hall,
        store: Arc::new(store),
        ledger,
    }
}

fn harness_with(config: HallConfig, compliance: Arc<dyn ComplianceGate>) -> Harness {
    let store = MemoryStore::new();
    harness_from(config, compliance, store.clone(), Arc::new(store), |ledger| ledger as Arc<dyn Ledger>)
}

fn harness() -> Harness {
    harness_with(HallConfig::testing(), Arc::new(DenyListCompliance::new()))
}

/// The full draw order committed for a game
fn draw_order(store: &MemoryStore, game_id: GameId) -> Vec<u8> {
    let record = game_store::load_seed(store, game_id).unwrap().unwrap();
    let mut sequence = DrawSequence::new(game_id, DrawSeed::from_hex(&record.seed_hex).unwrap());
    (0..90).map(|_| sequence.next().unwrap().0).collect()
}

/// Grid filled row by row from 24 numbers, free cell in the centre
fn grid_from(numbers: &[u8]) -> CardGrid {
    assert_eq!(numbers.len(), 24);
    let mut values = numbers.iter().copied();
    let mut cells = [[None; 5]; 5];
    for (r, row) in cells.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            if !(r == 2 && c == 2) {
                *cell = values.next();
            }
        }
    }
    CardGrid(cells)
}

async fn buy(h: &Harness, user: &str, game_id: GameId, grid: CardGrid, price: u64) -> bingohall::games::card::Card {
    let user = UserId::new(user);
    h.ledger.deposit(&user, price);
    h.hall.purchase_card(user, game_id, Some(grid), price).await.unwrap()
}

fn claim(game_id: GameId, card: &bingohall::games::card::Card, kind: ClaimKind) -> Claim {
    Claim {
        game_id,
        card_id: card.id,
        user_id: card.user_id.clone(),
        kind,
        submitted_at: now_millis(),
    }
}

async fn draw_times(h: &Harness, game_id: GameId, count: usize) {
    for _ in 0..count {
        h.hall.draw_next(game_id).await.unwrap();
    }
}

#[tokio::test]
async fn test_sole_quine_winner_on_draw_17() {
    let h = harness();
    let game_id = h.hall.schedule_game(now_millis()).unwrap().game.game.id;
    let order = draw_order(&h.store, game_id);

    // Card 0 completes its first row with draws 13..=17
    let mut numbers: Vec<u8> = order[12..17].to_vec();
    numbers.extend_from_slice(&order[60..79]);
    let winner = buy(&h, "player-0", game_id, grid_from(&numbers), 500).await;

    // Every other card only holds numbers drawn after the 17th call
    let late = &order[17..];
    for i in 1..20 {
        let start = (i * 3) % (late.len() - 24);
        buy(&h, &format!("player-{}", i), game_id, grid_from(&late[start..start + 24]), 500).await;
    }
    assert_eq!(h.hall.get_game_state(game_id).unwrap().game.total_pool, 10_000);

    h.hall.start_game(game_id).await.unwrap();
    draw_times(&h, game_id, 16).await;

    let early = h.hall.submit_claim(claim(game_id, &winner, ClaimKind::Quine)).await;
    assert!(matches!(
        early,
        Err(GameError::InvalidClaim(InvalidClaim::NumberNotDrawn { .. }))
    ));

    let draw = h.hall.draw_next(game_id).await.unwrap();
    assert_eq!(draw.sequence_index, 17);

    let verdict = h.hall.submit_claim(claim(game_id, &winner, ClaimKind::Quine)).await.unwrap();
    assert!(verdict.valid);
    assert_eq!(verdict.call_count, Some(17));
    assert_eq!(verdict.co_winners, 1);

    h.hall.force_stop(game_id).await.unwrap();
    let settled = h.hall.wait_for_settlement(game_id).await.unwrap();
    assert_eq!(settled.game.settlement, SettlementStatus::Paid);
    assert_eq!(settled.game.quine_winners.len(), 1);
    assert_eq!(settled.game.quine_winners[0].user_id, UserId::new("player-0"));
    assert_eq!(settled.game.quine_call_count, Some(17));
    assert_eq!(settled.game.prizes.quine, 1_500);
    assert_eq!(h.ledger.balance(&UserId::new("player-0")), 1_500);
    assert_eq!(h.ledger.balance(&UserId::new("player-1")), 0);
}

#[tokio::test]
async fn test_bingo_co_winners_on_the_same_draw() {
    let h = harness();
    let game_id = h.hall.schedule_game(now_millis()).unwrap().game.game.id;
    let order = draw_order(&h.store, game_id);

    let first_24 = &order[..24];
    let mut reversed = first_24.to_vec();
    reversed.reverse();
    let ana = buy(&h, "ana", game_id, grid_from(first_24), 5_000).await;
    let bo = buy(&h, "bo", game_id, grid_from(&reversed), 5_000).await;

    h.hall.start_game(game_id).await.unwrap();
    draw_times(&h, game_id, 24).await;

    let first = h.hall.submit_claim(claim(game_id, &ana, ClaimKind::Bingo)).await.unwrap();
    assert!(first.valid);
    assert_eq!(first.call_count, Some(24));
    assert!(first.jackpot_eligible);

    // Draws pause while the co-winner window is open
    assert!(h.hall.get_game_state(game_id).unwrap().closing);
    assert!(matches!(
        h.hall.draw_next(game_id).await,
        Err(GameError::InvalidState { .. })
    ));

    let second = h.hall.submit_claim(claim(game_id, &bo, ClaimKind::Bingo)).await.unwrap();
    assert!(second.valid);
    assert_eq!(second.call_count, Some(24));
    assert_eq!(second.co_winners, 2);

    let settled = h.hall.wait_for_settlement(game_id).await.unwrap();
    assert_eq!(settled.game.completion, Some(CompletionReason::Bingo));
    assert_eq!(settled.game.bingo_winners.len(), 2);
    assert!(settled.game.jackpot_won);

    let bingo_payouts: Vec<_> = settled
        .game
        .payouts
        .iter()
        .filter(|p| p.kind == ClaimKind::Bingo)
        .collect();
    assert_eq!(bingo_payouts.len(), 2);
    for payout in bingo_payouts {
        assert_eq!(payout.amount - payout.jackpot_share, 6_500 / 2);
        assert_eq!(payout.jackpot_share, 500);
    }
    assert_eq!(h.ledger.balance(&UserId::new("ana")), 3_750);
    assert_eq!(h.ledger.balance(&UserId::new("bo")), 3_750);
    assert_eq!(h.hall.get_jackpot_balance(), 0);
}

#[tokio::test]
async fn test_card_from_another_game_is_rejected_without_mutation() {
    let h = harness();
    let game_a = h.hall.schedule_game(now_millis()).unwrap().game.game.id;
    let game_b = h.hall.schedule_game(now_millis()).unwrap().game.game.id;
    let order_a = draw_order(&h.store, game_a);

    let card = buy(&h, "ana", game_a, grid_from(&order_a[..24]), 100).await;
    buy(&h, "bo", game_b, CardGrid::generate(&mut rand::thread_rng()), 100).await;

    h.hall.start_game(game_a).await.unwrap();
    h.hall.start_game(game_b).await.unwrap();
    draw_times(&h, game_a, 5).await;
    draw_times(&h, game_b, 5).await;

    let before_a = h.hall.get_game_state(game_a).unwrap();
    let before_b = h.hall.get_game_state(game_b).unwrap();

    let result = h.hall.submit_claim(claim(game_b, &card, ClaimKind::Quine)).await;
    assert!(matches!(
        result,
        Err(GameError::InvalidClaim(InvalidClaim::WrongGame { .. }))
    ));

    assert_eq!(h.hall.get_game_state(game_a).unwrap(), before_a);
    assert_eq!(h.hall.get_game_state(game_b).unwrap(), before_b);
}

#[tokio::test]
async fn test_claim_for_another_users_card_is_rejected() {
    let h = harness();
    let game_id = h.hall.schedule_game(now_millis()).unwrap().game.game.id;
    let order = draw_order(&h.store, game_id);
    let card = buy(&h, "ana", game_id, grid_from(&order[..24]), 100).await;

    h.hall.start_game(game_id).await.unwrap();
    draw_times(&h, game_id, 5).await;

    let mut stolen = claim(game_id, &card, ClaimKind::Quine);
    stolen.user_id = UserId::new("mallory");
    let result = h.hall.submit_claim(stolen).await;
    assert!(matches!(
        result,
        Err(GameError::InvalidClaim(InvalidClaim::NotCardOwner { .. }))
    ));
    assert!(h.hall.get_game_state(game_id).unwrap().game.quine_winners.is_empty());
}

#[tokio::test]
async fn test_complete_game_is_idempotent() {
    let h = harness();
    let game_id = h.hall.schedule_game(now_millis()).unwrap().game.game.id;
    h.hall.start_game(game_id).await.unwrap();
    draw_times(&h, game_id, 3).await;

    let first = h.hall.complete_game(game_id, CompletionReason::ForceStopped).await.unwrap();
    assert!(first.newly_completed);

    let second = h.hall.complete_game(game_id, CompletionReason::PoolExhausted).await.unwrap();
    assert!(!second.newly_completed);
    assert_eq!(second.reason, CompletionReason::ForceStopped);
    assert_eq!(second.ended_at, first.ended_at);
    assert_eq!(second.bingo_winners, first.bingo_winners);

    // Once the actor has settled and exited the stored outcome is returned
    h.hall.wait_for_settlement(game_id).await.unwrap();
    let third = h.hall.complete_game(game_id, CompletionReason::Bingo).await.unwrap();
    assert!(!third.newly_completed);
    assert_eq!(third.reason, CompletionReason::ForceStopped);
    assert_eq!(third.quine_winners, first.quine_winners);
}

#[tokio::test]
async fn test_jackpot_accumulates_then_resets_on_win() {
    let h = harness();

    // No winners: the contribution stays in the jackpot
    let quiet = h.hall.schedule_game(now_millis()).unwrap().game.game.id;
    buy(&h, "ana", quiet, CardGrid::generate(&mut rand::thread_rng()), 10_000).await;
    h.hall.start_game(quiet).await.unwrap();
    h.hall.force_stop(quiet).await.unwrap();
    h.hall.wait_for_settlement(quiet).await.unwrap();
    assert_eq!(h.hall.get_jackpot_balance(), 1_000);

    // Bingo on call 24 is within the threshold of 40
    let lucky = h.hall.schedule_game(now_millis()).unwrap().game.game.id;
    let order = draw_order(&h.store, lucky);
    let card = buy(&h, "bo", lucky, grid_from(&order[..24]), 10_000).await;
    h.hall.start_game(lucky).await.unwrap();
    draw_times(&h, lucky, 24).await;
    let verdict = h.hall.submit_claim(claim(lucky, &card, ClaimKind::Bingo)).await.unwrap();
    assert!(verdict.jackpot_eligible);

    let settled = h.hall.wait_for_settlement(lucky).await.unwrap();
    assert!(settled.game.jackpot_won);
    assert_eq!(settled.game.prizes.jackpot, 2_000);
    assert_eq!(h.hall.get_jackpot_balance(), 0);
    assert_eq!(h.ledger.balance(&UserId::new("bo")), 6_500 + 2_000);

    let treasury = h.hall.get_treasury();
    assert_eq!(treasury.organizer_wallet, 2_000);
    assert_eq!(treasury.games_settled, 2);
    // Unclaimed quine prizes of both games plus the unclaimed bingo of the first
    assert_eq!(treasury.carry, 1_500 + 6_500 + 1_500);
}

#[tokio::test]
async fn test_pool_exhaustion_completes_without_bingo() {
    let h = harness();
    let game_id = h.hall.schedule_game(now_millis()).unwrap().game.game.id;
    h.hall.start_game(game_id).await.unwrap();

    let mut seen = HashSet::new();
    for expected_index in 1..=90u32 {
        let draw = h.hall.draw_next(game_id).await.unwrap();
        assert_eq!(draw.sequence_index, expected_index);
        assert!((1..=90).contains(&draw.number));
        assert!(seen.insert(draw.number));
    }

    let result = h.hall.draw_next(game_id).await;
    assert!(matches!(result, Err(GameError::ExhaustedPool { .. })));

    let settled = h.hall.wait_for_settlement(game_id).await.unwrap();
    assert_eq!(settled.status(), GameStatus::Completed);
    assert_eq!(settled.game.completion, Some(CompletionReason::PoolExhausted));
    assert_eq!(settled.game.draws.len(), 90);
    assert!(settled.game.bingo_winners.is_empty());

    let report = h.hall.get_fairness_report(game_id).unwrap();
    assert!(report.commitment_valid);
    assert_eq!(report.draws_verified, 90);
    assert!(report.score >= 80.0);
}

#[tokio::test]
async fn test_force_stop_rules() {
    let h = harness();
    let game_id = h.hall.schedule_game(now_millis()).unwrap().game.game.id;

    let scheduled = h.hall.force_stop(game_id).await;
    assert!(matches!(
        scheduled,
        Err(GameError::InvalidState { status: GameStatus::Scheduled, .. })
    ));

    h.hall.start_game(game_id).await.unwrap();
    let outcome = h.hall.force_stop(game_id).await.unwrap();
    assert_eq!(outcome.reason, CompletionReason::ForceStopped);

    let settled = h.hall.wait_for_settlement(game_id).await.unwrap();
    let seed = settled.revealed_seed.expect("seed is revealed after completion");
    let commitment = h.hall.get_commitment(game_id).unwrap();
    assert_eq!(DrawSeed::from_hex(&seed).unwrap().commitment_hash(), commitment.seed_hash);

    assert!(matches!(
        h.hall.start_game(game_id).await,
        Err(GameError::InvalidState { status: GameStatus::Completed, .. })
    ));
}

#[tokio::test]
async fn test_automatic_draws_interrupted_by_force_stop() {
    let mut config = HallConfig::testing();
    config.rules.draw_interval_ms = 20;
    let h = harness_with(config, Arc::new(DenyListCompliance::new()));

    let game_id = h.hall.schedule_game(now_millis()).unwrap().game.game.id;
    h.hall.start_game(game_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let outcome = h.hall.force_stop(game_id).await.unwrap();
    let settled = h.hall.wait_for_settlement(game_id).await.unwrap();
    let drawn = settled.game.draws.len();
    assert!(drawn >= 1 && drawn < 90);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.hall.get_game_state(game_id).unwrap().game.draws.len(), drawn);
    assert_eq!(outcome.reason, CompletionReason::ForceStopped);
}

#[tokio::test]
async fn test_card_purchase_rules() {
    let compliance = Arc::new(DenyListCompliance::new());
    compliance.deny(&UserId::new("excluded"));
    let h = harness_with(HallConfig::testing(), compliance);
    let game_id = h.hall.schedule_game(now_millis()).unwrap().game.game.id;

    let broke = h
        .hall
        .purchase_card(UserId::new("broke"), game_id, None, 100)
        .await;
    assert!(matches!(
        broke,
        Err(GameError::Ledger(LedgerError::InsufficientFunds { .. }))
    ));

    h.ledger.deposit(&UserId::new("excluded"), 100);
    let excluded = h
        .hall
        .purchase_card(UserId::new("excluded"), game_id, None, 100)
        .await;
    assert!(matches!(
        excluded,
        Err(GameError::InvalidClaim(InvalidClaim::UserNotEligible { .. }))
    ));
    assert_eq!(h.ledger.balance(&UserId::new("excluded")), 100);

    let card = buy(&h, "ana", game_id, CardGrid::generate(&mut rand::thread_rng()), 250).await;
    assert_eq!(h.hall.get_card(card.id).unwrap(), card);
    let state = h.hall.get_game_state(game_id).unwrap();
    assert_eq!(state.game.cards_sold, 1);
    assert_eq!(state.game.total_pool, 250);

    h.hall.start_game(game_id).await.unwrap();
    h.ledger.deposit(&UserId::new("late"), 100);
    let late = h.hall.purchase_card(UserId::new("late"), game_id, None, 100).await;
    assert!(matches!(late, Err(GameError::InvalidState { .. })));
    assert_eq!(h.ledger.balance(&UserId::new("late")), 100);
}

/// Store whose next write blocks the calling thread
struct StallingStore {
    inner: MemoryStore,
    stall_next_write: AtomicBool,
}

impl KvStore for StallingStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key)
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        if self.stall_next_write.swap(false, Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(600));
        }
        self.inner.write_batch(ops)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        self.inner.scan_prefix(prefix)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unresponsive_game_fails_fast_and_drops_the_claim() {
    let mut config = HallConfig::testing();
    config.runtime.claim_timeout_ms = 100;
    let memory = MemoryStore::new();
    let stalling = Arc::new(StallingStore {
        inner: memory.clone(),
        stall_next_write: AtomicBool::new(false),
    });
    let h = harness_from(
        config,
        Arc::new(DenyListCompliance::new()),
        memory,
        stalling.clone(),
        |ledger| ledger as Arc<dyn Ledger>,
    );

    let game_id = h.hall.schedule_game(now_millis()).unwrap().game.game.id;
    let order = draw_order(&h.store, game_id);
    let card = buy(&h, "ana", game_id, grid_from(&order[..24]), 100).await;
    h.hall.start_game(game_id).await.unwrap();
    draw_times(&h, game_id, 5).await;

    // The next draw blocks the actor on its write
    stalling.stall_next_write.store(true, Ordering::SeqCst);
    let hall = h.hall.clone();
    let stuck_draw = tokio::spawn(async move { hall.draw_next(game_id).await });
    tokio::time::sleep(Duration::from_millis(30)).await;

    let started = std::time::Instant::now();
    let result = h.hall.submit_claim(claim(game_id, &card, ClaimKind::Quine)).await;
    assert!(matches!(result, Err(GameError::ServiceUnavailable { .. })));
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(matches!(stuck_draw.await.unwrap(), Err(GameError::ServiceUnavailable { .. })));

    // Once the actor recovers, the abandoned claim must not have been applied
    for _ in 0..40 {
        if h.hall.get_game_state(game_id).unwrap().game.draws.len() == 6 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    h.hall.draw_next(game_id).await.unwrap();
    assert!(h.hall.get_game_state(game_id).unwrap().game.quine_winners.is_empty());

    let verdict = h.hall.submit_claim(claim(game_id, &card, ClaimKind::Quine)).await.unwrap();
    assert!(verdict.valid);
    assert_eq!(verdict.call_count, Some(5));
}

/// Compliance gate that answers slowly but within the collaborator timeout
struct SlowGate {
    delay: Duration,
}

#[async_trait]
impl ComplianceGate for SlowGate {
    async fn is_user_eligible_to_play(&self, _user_id: &UserId) -> Result<bool, LedgerError> {
        tokio::time::sleep(self.delay).await;
        Ok(true)
    }
}

/// Ledger whose prize credits are slow but within the collaborator timeout
struct SlowLedger {
    inner: Arc<InMemoryLedger>,
    credit_delay: Duration,
}

#[async_trait]
impl Ledger for SlowLedger {
    async fn debit_card_purchase(
        &self,
        user_id: &UserId,
        amount: u64,
        game_id: GameId,
    ) -> Result<LedgerReceipt, LedgerError> {
        self.inner.debit_card_purchase(user_id, amount, game_id).await
    }

    async fn credit_prize(&self, user_id: &UserId, amount: u64, reference: &str) -> Result<LedgerReceipt, LedgerError> {
        tokio::time::sleep(self.credit_delay).await;
        self.inner.credit_prize(user_id, amount, reference).await
    }

    async fn reverse(&self, receipt: &LedgerReceipt) -> Result<LedgerReceipt, LedgerError> {
        self.inner.reverse(receipt).await
    }
}

/// 24 numbers whose first row is completed by the fifth call
fn row_on_fifth_call(order: &[u8], offset: usize) -> CardGrid {
    let mut numbers = order[..5].to_vec();
    numbers.extend_from_slice(&order[offset..offset + 19]);
    grid_from(&numbers)
}

#[tokio::test]
async fn test_slow_compliance_gate_does_not_time_out_co_winners() {
    // Three gate answers back to back would exceed the claim timeout
    let config = HallConfig::testing();
    assert!(config.runtime.claim_timeout_ms < 3 * 300);
    let h = harness_with(config, Arc::new(SlowGate {
        delay: Duration::from_millis(300),
    }));

    let game_id = h.hall.schedule_game(now_millis()).unwrap().game.game.id;
    let order = draw_order(&h.store, game_id);
    let ana = buy(&h, "ana", game_id, row_on_fifth_call(&order, 40), 100).await;
    let bo = buy(&h, "bo", game_id, row_on_fifth_call(&order, 59), 100).await;
    let cy = buy(&h, "cy", game_id, row_on_fifth_call(&order, 71), 100).await;
    h.hall.start_game(game_id).await.unwrap();
    draw_times(&h, game_id, 5).await;

    let (a, b, c) = tokio::join!(
        h.hall.submit_claim(claim(game_id, &ana, ClaimKind::Quine)),
        h.hall.submit_claim(claim(game_id, &bo, ClaimKind::Quine)),
        h.hall.submit_claim(claim(game_id, &cy, ClaimKind::Quine)),
    );
    let verdicts = [a.unwrap(), b.unwrap(), c.unwrap()];
    assert!(verdicts.iter().all(|v| v.valid && v.call_count == Some(5)));

    let mut co_winners: Vec<usize> = verdicts.iter().map(|v| v.co_winners).collect();
    co_winners.sort_unstable();
    assert_eq!(co_winners, vec![1, 2, 3]);
    assert_eq!(h.hall.get_game_state(game_id).unwrap().game.quine_winners.len(), 3);
}

#[tokio::test]
async fn test_completion_is_answered_while_settlement_runs() {
    let config = HallConfig::testing();
    let credit_delay = Duration::from_millis(400);
    assert!(credit_delay.as_millis() < config.runtime.collaborator_timeout_ms as u128);
    let store = MemoryStore::new();
    let h = harness_from(
        config,
        Arc::new(DenyListCompliance::new()),
        store.clone(),
        Arc::new(store),
        |inner| Arc::new(SlowLedger { inner, credit_delay }) as Arc<dyn Ledger>,
    );

    let game_id = h.hall.schedule_game(now_millis()).unwrap().game.game.id;
    let order = draw_order(&h.store, game_id);
    let ana = buy(&h, "ana", game_id, row_on_fifth_call(&order, 40), 1_000).await;
    let bo = buy(&h, "bo", game_id, row_on_fifth_call(&order, 59), 1_000).await;
    h.hall.start_game(game_id).await.unwrap();
    draw_times(&h, game_id, 5).await;
    h.hall.submit_claim(claim(game_id, &ana, ClaimKind::Quine)).await.unwrap();
    h.hall.submit_claim(claim(game_id, &bo, ClaimKind::Quine)).await.unwrap();

    // Two slow credits keep settlement busy past the claim timeout
    let first = h.hall.complete_game(game_id, CompletionReason::ForceStopped).await.unwrap();
    assert!(first.newly_completed);

    let started = std::time::Instant::now();
    let second = h.hall.complete_game(game_id, CompletionReason::PoolExhausted).await.unwrap();
    assert!(!second.newly_completed);
    assert_eq!(second.reason, CompletionReason::ForceStopped);
    assert_eq!(second.quine_winners.len(), 2);
    assert!(matches!(
        h.hall.draw_next(game_id).await,
        Err(GameError::InvalidState { .. })
    ));
    assert!(matches!(
        h.hall.submit_claim(claim(game_id, &ana, ClaimKind::Bingo)).await,
        Err(GameError::InvalidState { .. })
    ));
    assert!(started.elapsed() < credit_delay);
    assert_eq!(
        h.hall.get_game_state(game_id).unwrap().game.settlement,
        SettlementStatus::Unsettled
    );

    let settled = h.hall.wait_for_settlement(game_id).await.unwrap();
    assert_eq!(settled.game.settlement, SettlementStatus::Paid);
    assert_eq!(h.ledger.balance(&UserId::new("ana")), h.ledger.balance(&UserId::new("bo")));
    assert!(h.ledger.balance(&UserId::new("ana")) > 0);
}

#[tokio::test]
async fn test_unknown_game_is_not_found() {
    let h = harness();
    assert!(matches!(
        h.hall.get_game_state(GameId(404)),
        Err(GameError::NotFound { .. })
    ));
    assert!(matches!(
        h.hall.start_game(GameId(404)).await,
        Err(GameError::NotFound { .. })
    ));
}
