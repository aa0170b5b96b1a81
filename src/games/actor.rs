//! Per-game actor
//!
//! Each game runs on its own task that owns the [`GameStateMachine`], the
//! draw sequence and the cards sold for the game. Everything that touches
//! the game arrives as a [`GameCommand`] on one ordered channel, so a claim
//! is always validated against exactly the draws committed before it.
//!
//! The actor never awaits a collaborator. Once a game completes its
//! settlement runs on a separate task while the actor keeps answering
//! commands; when the treasury reports back the actor publishes the final
//! snapshot and exits. Readers keep the last snapshot through the `watch`
//! channel.
//!
//! A command whose caller stopped waiting (the hall's dispatch timeout) is
//! discarded unapplied, so a caller told `ServiceUnavailable` never sees
//! its request take effect later. Completion is the exception: it is
//! idempotent and a stop request must still stop the game.

use crate::errors::{AllocationError, GameError, GameResult, InvalidClaim};
use crate::game_store;
use crate::games::card::Card;
use crate::games::claims::ClaimValidator;
use crate::games::draw_engine::DrawSequence;
use crate::games::prizes::Allocation;
use crate::games::state_machine::GameStateMachine;
use crate::games::types::{
    now_millis, CardId, CategoryPrizes, Claim, ClaimKind, ClaimVerdict, CompletionOutcome, CompletionReason,
    Draw, GameEvent, GameEventSink, GameSnapshot, GameStatus, SettlementStatus, TieBreakPolicy,
    WinnerRecord,
};
use crate::metrics::HallMetrics;
use crate::storage::KvStore;
use crate::treasury::TreasuryHandle;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

pub enum GameCommand {
    Start {
        reply: oneshot::Sender<GameResult<GameSnapshot>>,
    },
    /// Draw one number now (manual draw mode or operator override)
    DrawNext {
        reply: oneshot::Sender<GameResult<Draw>>,
    },
    AddCard {
        card: Card,
        reply: oneshot::Sender<GameResult<u64>>,
    },
    Claim {
        claim: Claim,
        reply: oneshot::Sender<GameResult<ClaimVerdict>>,
    },
    Complete {
        reason: CompletionReason,
        reply: oneshot::Sender<GameResult<CompletionOutcome>>,
    },
}

/// Everything a game actor shares with the rest of the hall
#[derive(Clone)]
pub struct ActorContext {
    pub store: Arc<dyn KvStore>,
    pub events: Arc<dyn GameEventSink>,
    pub treasury: TreasuryHandle,
    pub validator: ClaimValidator,
    pub tie_break: TieBreakPolicy,
    pub draw_interval: Option<Duration>,
    pub claim_window: Duration,
    pub metrics: Option<Arc<HallMetrics>>,
}

#[derive(Clone)]
pub struct GameHandle {
    pub commands: mpsc::Sender<GameCommand>,
    pub snapshot: watch::Receiver<GameSnapshot>,
}

pub struct GameActor {
    machine: GameStateMachine,
    sequence: DrawSequence,
    cards: HashMap<CardId, Card>,
    ctx: ActorContext,
    snapshot: watch::Sender<GameSnapshot>,
    next_draw: Option<Instant>,
    /// Open while co-winning bingo claims are still accepted
    closing_deadline: Option<Instant>,
    /// Completed but not yet handed to the treasury
    settle_pending: bool,
    finished: bool,
}

impl GameActor {
    /// Start the actor task for a scheduled or active game
    pub fn spawn(
        machine: GameStateMachine,
        sequence: DrawSequence,
        cards: Vec<Card>,
        ctx: ActorContext,
        buffer: usize,
    ) -> GameHandle {
        let (commands, rx) = mpsc::channel(buffer);
        let (snapshot, snapshot_rx) = watch::channel(machine.snapshot(false, None));

        let next_draw = match (machine.status(), ctx.draw_interval) {
            (GameStatus::Active, Some(interval)) => Some(Instant::now() + interval),
            _ => None,
        };

        let actor = GameActor {
            machine,
            sequence,
            cards: cards.into_iter().map(|c| (c.id, c)).collect(),
            ctx,
            snapshot,
            next_draw,
            closing_deadline: None,
            settle_pending: false,
            finished: false,
        };
        tokio::spawn(actor.run(rx));

        GameHandle {
            commands,
            snapshot: snapshot_rx,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<GameCommand>) {
        let game_id = self.machine.id();
        debug!(game_id = %game_id, "Game actor started");

        let mut settlement: Option<JoinHandle<Result<Allocation, AllocationError>>> = None;

        while !self.finished {
            let draw_due = self.next_draw.filter(|_| self.closing_deadline.is_none());
            let closing = self.closing_deadline;
            let settling = settlement.is_some();

            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        // Hall is gone; still record how the treasury settled
                        if let Some(task) = settlement.take() {
                            self.finish_settlement(task.await);
                        }
                        break;
                    }
                },
                joined = async {
                    match settlement.as_mut() {
                        Some(task) => task.await,
                        None => std::future::pending().await,
                    }
                }, if settling => {
                    settlement = None;
                    self.finish_settlement(joined);
                }
                _ = sleep_until(draw_due.unwrap_or_else(Instant::now)), if draw_due.is_some() => {
                    self.next_draw = self.ctx.draw_interval.map(|interval| Instant::now() + interval);
                    if let Err(e) = self.draw() {
                        debug!(game_id = %game_id, "Scheduled draw stopped: {}", e);
                    }
                }
                _ = sleep_until(closing.unwrap_or_else(Instant::now)), if closing.is_some() => {
                    if let Err(e) = self.close(CompletionReason::Bingo) {
                        error!(game_id = %game_id, "Failed to close game after claim window: {}", e);
                    }
                }
            }

            if self.settle_pending {
                self.settle_pending = false;
                settlement = Some(self.spawn_settlement());
            }
        }

        debug!(game_id = %game_id, "Game actor stopped");
    }

    fn abandoned<T>(&self, reply: &oneshot::Sender<T>, command: &'static str) -> bool {
        if reply.is_closed() {
            debug!(game_id = %self.machine.id(), command, "Caller gave up, command discarded");
            return true;
        }
        false
    }

    fn handle(&mut self, command: GameCommand) {
        match command {
            GameCommand::Start { reply } => {
                if !self.abandoned(&reply, "start") {
                    let _ = reply.send(self.start());
                }
            }
            GameCommand::DrawNext { reply } => {
                if !self.abandoned(&reply, "draw") {
                    let _ = reply.send(self.draw());
                }
            }
            GameCommand::AddCard { card, reply } => {
                if !self.abandoned(&reply, "add card") {
                    let _ = reply.send(self.add_card(card));
                }
            }
            GameCommand::Claim { claim, reply } => {
                if !self.abandoned(&reply, "claim") {
                    let _ = reply.send(self.claim(claim));
                }
            }
            GameCommand::Complete { reason, reply } => {
                let _ = reply.send(self.close(reason));
            }
        }
    }

    fn publish_snapshot(&self) {
        let revealed = (self.machine.status() == GameStatus::Completed)
            .then(|| self.sequence.seed().to_hex());
        self.snapshot
            .send_replace(self.machine.snapshot(self.closing_deadline.is_some(), revealed));
    }

    fn persist_header(&self) {
        if let Err(e) = game_store::store_game(self.ctx.store.as_ref(), self.machine.game()) {
            error!(game_id = %self.machine.id(), "Failed to persist game: {}", e);
        }
    }

    fn start(&mut self) -> GameResult<GameSnapshot> {
        self.machine.start(now_millis())?;
        self.persist_header();
        self.next_draw = self.ctx.draw_interval.map(|interval| Instant::now() + interval);

        info!(
            game_id = %self.machine.id(),
            cards = self.machine.game().cards_sold,
            pool = self.machine.game().total_pool,
            "🎱 Game started"
        );
        self.publish_snapshot();
        Ok(self.snapshot.borrow().clone())
    }

    fn add_card(&mut self, card: Card) -> GameResult<u64> {
        if card.game_id != self.machine.id() {
            return Err(InvalidClaim::WrongGame {
                card_id: card.id,
                card_game: card.game_id,
                game_id: self.machine.id(),
            }
            .into());
        }
        let pool = self.machine.add_to_pool(card.purchase_price)?;
        self.cards.insert(card.id, card);
        self.persist_header();
        self.publish_snapshot();
        Ok(pool)
    }

    fn draw(&mut self) -> GameResult<Draw> {
        let game_id = self.machine.id();
        if self.machine.status() != GameStatus::Active {
            return Err(GameError::InvalidState {
                game_id,
                status: self.machine.status(),
                operation: "draw for",
            });
        }
        if self.closing_deadline.is_some() {
            return Err(GameError::InvalidState {
                game_id,
                status: self.machine.status(),
                operation: "draw during the claim window of",
            });
        }

        let (number, proof) = match self.sequence.next() {
            Ok(next) => next,
            Err(e @ GameError::ExhaustedPool { .. }) => {
                info!(game_id = %game_id, "All numbers drawn without a bingo");
                self.close(CompletionReason::PoolExhausted)?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let draw = match self.machine.record_draw(number, proof, now_millis()) {
            Ok(draw) => draw,
            Err(e @ GameError::DuplicateNumber { .. }) => {
                error!(game_id = %game_id, number, "Draw sequence produced a repeated number");
                self.close(CompletionReason::Fault)?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = game_store::append_draw(self.ctx.store.as_ref(), self.machine.game(), &draw) {
            error!(game_id = %game_id, sequence_index = draw.sequence_index, "Failed to persist draw: {}", e);
            self.machine.revert_draw(&draw);
            self.close(CompletionReason::Fault)?;
            return Err(e.into());
        }

        if let Some(m) = &self.ctx.metrics {
            m.draws_total.inc();
        }
        debug!(game_id = %game_id, number, sequence_index = draw.sequence_index, "Number drawn");

        self.ctx.events.publish(
            game_id,
            GameEvent::NumberDrawn {
                game_id,
                number: draw.number,
                sequence_index: draw.sequence_index,
            },
        );
        self.publish_snapshot();
        Ok(draw)
    }

    fn lookup_card(&self, claim: &Claim) -> GameResult<Card> {
        if let Some(card) = self.cards.get(&claim.card_id) {
            return Ok(card.clone());
        }
        // Cards of other games are only known to the store
        game_store::load_card(self.ctx.store.as_ref(), claim.card_id)?
            .ok_or_else(|| InvalidClaim::UnknownCard { card_id: claim.card_id }.into())
    }

    /// Eligibility is checked by the hall before the claim is queued
    fn claim(&mut self, claim: Claim) -> GameResult<ClaimVerdict> {
        let game_id = self.machine.id();
        if claim.game_id != game_id {
            return Err(GameError::NotFound { game_id: claim.game_id });
        }

        let card = self.lookup_card(&claim)?;
        let result = self.ctx.validator.validate(self.machine.game(), &card, &claim)?;

        let winner = WinnerRecord {
            user_id: claim.user_id.clone(),
            card_id: claim.card_id,
            call_count: result.call_count,
            jackpot_eligible: result.jackpot_eligible,
        };
        let admission = self.machine.record_win(claim.kind, winner, self.ctx.tie_break)?;
        self.persist_header();

        info!(
            game_id = %game_id,
            user_id = %claim.user_id,
            card_id = %claim.card_id,
            kind = %claim.kind,
            call_count = result.call_count,
            co_winners = admission.co_winners,
            "🏆 Winning claim recorded"
        );

        let verdict = ClaimVerdict::accepted(result.call_count, result.jackpot_eligible, admission.co_winners);

        if claim.kind == ClaimKind::Bingo && admission.first_in_category {
            let window = self.ctx.claim_window;
            if self.ctx.tie_break == TieBreakPolicy::SplitEvenly && !window.is_zero() {
                debug!(game_id = %game_id, window_ms = window.as_millis() as u64, "Bingo claim window opened");
                self.closing_deadline = Some(Instant::now() + window);
                self.publish_snapshot();
            } else {
                self.close(CompletionReason::Bingo)?;
            }
        } else {
            self.publish_snapshot();
        }

        Ok(verdict)
    }

    /// Move the game to `completed` and queue its settlement
    fn close(&mut self, reason: CompletionReason) -> GameResult<CompletionOutcome> {
        let outcome = self.machine.complete(reason, now_millis())?;
        if !outcome.newly_completed {
            return Ok(outcome);
        }

        self.next_draw = None;
        self.closing_deadline = None;
        self.settle_pending = true;
        self.persist_header();
        self.publish_snapshot();

        if let Some(m) = &self.ctx.metrics {
            let label = outcome.reason.to_string();
            m.games_completed.with_label_values(&[label.as_str()]).inc();
        }
        info!(
            game_id = %outcome.game_id,
            reason = %outcome.reason,
            draws = self.machine.game().draws.len(),
            quine_winners = outcome.quine_winners.len(),
            bingo_winners = outcome.bingo_winners.len(),
            "🏁 Game completed"
        );
        Ok(outcome)
    }

    fn spawn_settlement(&self) -> JoinHandle<Result<Allocation, AllocationError>> {
        let treasury = self.ctx.treasury.clone();
        let game = self.machine.game().clone();
        tokio::spawn(async move { treasury.settle(game).await })
    }

    fn finish_settlement(&mut self, joined: Result<Result<Allocation, AllocationError>, JoinError>) {
        let game_id = self.machine.id();
        let settled = match joined {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(format!("settlement task failed: {}", e)),
        };

        match settled {
            Ok(allocation) => {
                self.machine
                    .record_settlement(allocation.prizes, allocation.payouts, SettlementStatus::Paid);
                self.persist_header();
            }
            Err(reason) => {
                warn!(game_id = %game_id, "Game left unpaid: {}", reason);
                self.machine.record_settlement(
                    CategoryPrizes::default(),
                    Vec::new(),
                    SettlementStatus::NeedsReconciliation { reason: reason.clone() },
                );
                if let Err(e) =
                    game_store::flag_for_reconciliation(self.ctx.store.as_ref(), self.machine.game(), &reason)
                {
                    error!(game_id = %game_id, "Failed to flag game for reconciliation: {}", e);
                }
                if let Some(m) = &self.ctx.metrics {
                    m.settlement_failures.inc();
                }
            }
        }

        self.publish_snapshot();
        let game = self.machine.game();
        self.ctx.events.publish(
            game_id,
            GameEvent::GameCompleted {
                game_id,
                reason: game.completion.unwrap_or(CompletionReason::ForceStopped),
                quine_winners: game.quine_winners.clone(),
                bingo_winners: game.bingo_winners.clone(),
                payouts: game.payouts.clone(),
                prizes: game.prizes,
                settlement: game.settlement.clone(),
            },
        );
        self.finished = true;
    }
}
