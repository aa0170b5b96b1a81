//! The bingo hall: arena of running games and the query interface
//!
//! Games are reached only through their actor handles. The hall itself holds
//! no mutable game state: it allocates ids, writes the immutable rows
//! (seed commitments, cards) and forwards everything else as commands with
//! a bounded deadline.

use crate::config::HallConfig;
use crate::errors::{BingoResult, GameError, GameResult, InvalidClaim, LedgerError, StorageError};
use crate::fairness::{DrawVerification, FairnessAuditor, FairnessReport};
use crate::game_store::{self, SeedRecord};
use crate::games::actor::{ActorContext, GameActor, GameCommand, GameHandle};
use crate::games::card::{Card, CardGrid};
use crate::games::claims::ClaimValidator;
use crate::games::draw_engine::{DrawEngine, DrawSeed, DrawSequence, SeedCommitment};
use crate::games::prizes::PrizeAllocator;
use crate::games::state_machine::GameStateMachine;
use crate::games::types::{
    now_millis, CardId, Claim, ClaimVerdict, CompletionOutcome, CompletionReason, Draw, Game,
    GameEventSink, GameId, GameSnapshot, GameStatus, SettlementStatus, UserId,
};
use crate::ledger::{ComplianceGate, Ledger};
use crate::metrics::HallMetrics;
use crate::storage::KvStore;
use crate::treasury::{Treasury, TreasuryHandle, TreasuryState};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// External collaborators and sinks the hall is wired to
#[derive(Clone)]
pub struct HallServices {
    pub store: Arc<dyn KvStore>,
    pub ledger: Arc<dyn Ledger>,
    pub compliance: Arc<dyn ComplianceGate>,
    pub events: Arc<dyn GameEventSink>,
    pub metrics: Option<Arc<HallMetrics>>,
}

/// A freshly scheduled game with its published commitment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledGame {
    pub game: GameSnapshot,
    pub commitment: SeedCommitment,
}

/// Reply from a game actor, or its final snapshot if it has already exited
enum Dispatch<T> {
    Reply(GameResult<T>),
    Stopped(GameSnapshot),
}

pub struct BingoHall {
    config: HallConfig,
    store: Arc<dyn KvStore>,
    engine: DrawEngine,
    games: DashMap<GameId, GameHandle>,
    next_game_id: AtomicU64,
    next_card_id: AtomicU64,
    ledger: Arc<dyn Ledger>,
    compliance: Arc<dyn ComplianceGate>,
    treasury: TreasuryHandle,
    auditor: FairnessAuditor,
    actor_context: ActorContext,
    metrics: Option<Arc<HallMetrics>>,
}

impl BingoHall {
    /// Build the hall, start the treasury and resume unfinished games.
    /// Must be called from within a tokio runtime.
    pub fn start(config: HallConfig, services: HallServices) -> BingoResult<Arc<Self>> {
        config.validate()?;

        let allocator = PrizeAllocator::new(config.prizes).map_err(GameError::from)?;
        let treasury = Treasury::spawn(
            allocator,
            services.ledger.clone(),
            services.store.clone(),
            config.runtime.settlement_queue_capacity,
            config.collaborator_timeout(),
            services.metrics.clone(),
        )?;

        let actor_context = ActorContext {
            store: services.store.clone(),
            events: services.events.clone(),
            treasury: treasury.clone(),
            validator: ClaimValidator::new(config.rules.jackpot_threshold),
            tie_break: config.rules.tie_break,
            draw_interval: config.draw_interval(),
            claim_window: config.claim_window(),
            metrics: services.metrics.clone(),
        };

        let (last_game, last_card) = game_store::load_id_watermarks(services.store.as_ref())?;

        let hall = Arc::new(Self {
            auditor: FairnessAuditor::new(services.store.clone()),
            store: services.store,
            engine: DrawEngine::new_random(),
            games: DashMap::new(),
            next_game_id: AtomicU64::new(last_game + 1),
            next_card_id: AtomicU64::new(last_card + 1),
            ledger: services.ledger,
            compliance: services.compliance,
            treasury,
            actor_context,
            metrics: services.metrics,
            config,
        });

        hall.resume_games()?;
        info!(
            games = hall.games.len(),
            jackpot = hall.treasury.jackpot_balance(),
            "🎰 Bingo hall ready"
        );
        Ok(hall)
    }

    pub fn config(&self) -> &HallConfig {
        &self.config
    }

    /// Respawn actors for games that were scheduled or running at shutdown
    fn resume_games(&self) -> BingoResult<()> {
        for game in game_store::load_games(self.store.as_ref())? {
            if game.status == GameStatus::Completed {
                if game.settlement == SettlementStatus::Unsettled {
                    let mut flagged = game.clone();
                    let reason = "settlement interrupted by restart".to_string();
                    flagged.settlement = SettlementStatus::NeedsReconciliation { reason: reason.clone() };
                    game_store::flag_for_reconciliation(self.store.as_ref(), &flagged, &reason)?;
                }
                continue;
            }

            let Some(record) = game_store::load_seed(self.store.as_ref(), game.id)? else {
                warn!(game_id = %game.id, "Skipping game without a seed record");
                continue;
            };
            let seed = DrawSeed::from_hex(&record.seed_hex)
                .map_err(StorageError::CorruptedData)?;
            let drawn: Vec<u8> = game.draws.iter().map(|d| d.number).collect();
            let sequence = DrawSequence::resume(game.id, seed, &drawn);
            let cards = game_store::load_cards_for_game(self.store.as_ref(), game.id)?;

            info!(game_id = %game.id, status = %game.status, draws = drawn.len(), "♻️ Resuming game");
            let id = game.id;
            let handle = GameActor::spawn(
                GameStateMachine::new(game),
                sequence,
                cards,
                self.actor_context.clone(),
                self.config.runtime.command_buffer,
            );
            self.games.insert(id, handle);
        }
        Ok(())
    }

    /// Commit to a seed and open a game for card sales
    pub fn schedule_game(&self, scheduled_start: u64) -> GameResult<ScheduledGame> {
        let id = GameId(self.next_game_id.fetch_add(1, Ordering::SeqCst));
        let (seed, commitment) = self.engine.commit(id);
        let game = Game::new(id, scheduled_start, seed.commitment_hash());

        game_store::create_game(
            self.store.as_ref(),
            &game,
            &SeedRecord {
                seed_hex: seed.to_hex(),
                commitment: commitment.clone(),
            },
        )?;

        let handle = GameActor::spawn(
            GameStateMachine::new(game),
            DrawSequence::new(id, seed),
            Vec::new(),
            self.actor_context.clone(),
            self.config.runtime.command_buffer,
        );
        let snapshot = handle.snapshot.borrow().clone();
        self.games.insert(id, handle);

        if let Some(m) = &self.metrics {
            m.games_scheduled.inc();
        }
        info!(game_id = %id, seed_hash = %commitment.seed_hash, "📅 Game scheduled");

        Ok(ScheduledGame {
            game: snapshot,
            commitment,
        })
    }

    fn handle(&self, game_id: GameId) -> Option<GameHandle> {
        self.games.get(&game_id).map(|h| h.value().clone())
    }

    async fn dispatch<T>(
        &self,
        game_id: GameId,
        make: impl FnOnce(oneshot::Sender<GameResult<T>>) -> GameCommand,
    ) -> GameResult<Dispatch<T>> {
        let Some(handle) = self.handle(game_id) else {
            return match self.load_snapshot(game_id)? {
                Some(snapshot) => Ok(Dispatch::Stopped(snapshot)),
                None => Err(GameError::NotFound { game_id }),
            };
        };

        let (reply, mut response) = oneshot::channel();
        let command = make(reply);
        let timeout = self.config.claim_timeout();
        let deadline = Instant::now() + timeout;
        let unavailable = || {
            warn!(game_id = %game_id, timeout_ms = timeout.as_millis() as u64, "Game actor did not answer");
            GameError::ServiceUnavailable {
                game_id,
                timeout_ms: timeout.as_millis() as u64,
            }
        };

        match tokio::time::timeout_at(deadline, handle.commands.send(command)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Ok(Dispatch::Stopped(handle.snapshot.borrow().clone())),
            Err(_) => return Err(unavailable()),
        }

        match tokio::time::timeout_at(deadline, &mut response).await {
            Ok(Ok(result)) => Ok(Dispatch::Reply(result)),
            Ok(Err(_)) => Ok(Dispatch::Stopped(handle.snapshot.borrow().clone())),
            Err(_) => {
                // A closed reply makes the actor discard the queued command
                response.close();
                match response.try_recv() {
                    Ok(result) => Ok(Dispatch::Reply(result)),
                    Err(_) => Err(unavailable()),
                }
            }
        }
    }

    fn stopped_error(snapshot: &GameSnapshot, operation: &'static str) -> GameError {
        GameError::InvalidState {
            game_id: snapshot.game.id,
            status: snapshot.status(),
            operation,
        }
    }

    pub async fn start_game(&self, game_id: GameId) -> GameResult<GameSnapshot> {
        match self.dispatch(game_id, |reply| GameCommand::Start { reply }).await? {
            Dispatch::Reply(result) => result,
            Dispatch::Stopped(snapshot) => Err(Self::stopped_error(&snapshot, "start")),
        }
    }

    /// Draw the next number immediately
    pub async fn draw_next(&self, game_id: GameId) -> GameResult<Draw> {
        match self.dispatch(game_id, |reply| GameCommand::DrawNext { reply }).await? {
            Dispatch::Reply(result) => result,
            Dispatch::Stopped(snapshot) => Err(Self::stopped_error(&snapshot, "draw for")),
        }
    }

    /// Complete a game. Repeated calls return the first outcome.
    pub async fn complete_game(&self, game_id: GameId, reason: CompletionReason) -> GameResult<CompletionOutcome> {
        match self.dispatch(game_id, |reply| GameCommand::Complete { reason, reply }).await? {
            Dispatch::Reply(result) => result,
            Dispatch::Stopped(snapshot) if snapshot.status() == GameStatus::Completed => {
                let game = snapshot.game;
                Ok(CompletionOutcome {
                    game_id: game.id,
                    reason: game.completion.unwrap_or(reason),
                    ended_at: game.ended_at.unwrap_or_default(),
                    quine_winners: game.quine_winners,
                    bingo_winners: game.bingo_winners,
                    newly_completed: false,
                })
            }
            Dispatch::Stopped(snapshot) => Err(Self::stopped_error(&snapshot, "complete")),
        }
    }

    /// Administrative stop; interrupts the draw loop immediately
    pub async fn force_stop(&self, game_id: GameId) -> GameResult<CompletionOutcome> {
        self.complete_game(game_id, CompletionReason::ForceStopped).await
    }

    /// Validate a claim against the game's committed draws.
    ///
    /// The compliance gate is asked before the claim reaches the game, so a
    /// slow gate delays only this claimant.
    pub async fn submit_claim(&self, mut claim: Claim) -> GameResult<ClaimVerdict> {
        if claim.submitted_at == 0 {
            claim.submitted_at = now_millis();
        }
        let kind = claim.kind;
        let game_id = claim.game_id;

        let eligible = self
            .with_collaborator_timeout("compliance check", self.compliance.is_user_eligible_to_play(&claim.user_id))
            .await;
        let result = match eligible {
            Ok(true) => match self.dispatch(game_id, |reply| GameCommand::Claim { claim, reply }).await {
                Ok(Dispatch::Reply(result)) => result,
                Ok(Dispatch::Stopped(snapshot)) => Err(Self::stopped_error(&snapshot, "claim in")),
                Err(e) => Err(e),
            },
            Ok(false) => Err(InvalidClaim::UserNotEligible {
                user_id: claim.user_id.clone(),
            }
            .into()),
            Err(e) => Err(e.into()),
        };

        if let Some(m) = &self.metrics {
            let outcome = match &result {
                Ok(_) => "accepted",
                Err(e) => e.code(),
            };
            m.record_claim(&kind.to_string(), outcome);
        }
        result
    }

    async fn with_collaborator_timeout<T>(
        &self,
        what: &str,
        call: impl Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, LedgerError> {
        let timeout = self.config.collaborator_timeout();
        tokio::time::timeout(timeout, call).await.map_err(|_| {
            LedgerError::Unavailable(format!("{} timed out after {}ms", what, timeout.as_millis()))
        })?
    }

    /// Sell a card for a scheduled game. A random grid is issued when none is given.
    pub async fn purchase_card(
        &self,
        user_id: UserId,
        game_id: GameId,
        grid: Option<CardGrid>,
        price: u64,
    ) -> GameResult<Card> {
        let snapshot = self.get_game_state(game_id)?;
        if snapshot.status() != GameStatus::Scheduled {
            return Err(Self::stopped_error(&snapshot, "sell cards for"));
        }
        if price == 0 {
            return Err(GameError::InvalidCard("card price must be positive".to_string()));
        }

        let card_id = CardId(self.next_card_id.fetch_add(1, Ordering::SeqCst));
        let grid = grid.unwrap_or_else(|| CardGrid::generate(&mut rand::thread_rng()));
        let card = Card::new(card_id, user_id.clone(), game_id, grid, price)?;

        let eligible = self
            .with_collaborator_timeout("compliance check", self.compliance.is_user_eligible_to_play(&user_id))
            .await?;
        if !eligible {
            return Err(InvalidClaim::UserNotEligible { user_id }.into());
        }

        let receipt = self
            .with_collaborator_timeout("card debit", self.ledger.debit_card_purchase(&user_id, price, game_id))
            .await?;

        let accepted = match game_store::store_card(self.store.as_ref(), &card) {
            Ok(()) => {
                let card = card.clone();
                match self.dispatch(game_id, |reply| GameCommand::AddCard { card, reply }).await {
                    Ok(Dispatch::Reply(result)) => result,
                    Ok(Dispatch::Stopped(snapshot)) => Err(Self::stopped_error(&snapshot, "sell cards for")),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e.into()),
        };

        match accepted {
            Ok(pool) => {
                if let Some(m) = &self.metrics {
                    m.cards_sold.inc();
                }
                info!(game_id = %game_id, card_id = %card.id, user_id = %card.user_id, pool, "🎟️ Card sold");
                Ok(card)
            }
            Err(e) => {
                warn!(game_id = %game_id, user_id = %user_id, "Card sale refused, reversing debit: {}", e);
                if let Err(revoke) = game_store::revoke_card(self.store.as_ref(), &card) {
                    warn!(card_id = %card.id, "Failed to revoke card row: {}", revoke);
                }
                if let Err(reverse) = self
                    .with_collaborator_timeout("debit reversal", self.ledger.reverse(&receipt))
                    .await
                {
                    error!(user_id = %user_id, entry = receipt.entry_id, "Debit reversal failed: {}", reverse);
                }
                Err(e)
            }
        }
    }

    fn load_snapshot(&self, game_id: GameId) -> GameResult<Option<GameSnapshot>> {
        let Some(game) = game_store::load_game(self.store.as_ref(), game_id)? else {
            return Ok(None);
        };
        let revealed_seed = if game.status == GameStatus::Completed {
            game_store::load_seed(self.store.as_ref(), game_id)?.map(|r| r.seed_hex)
        } else {
            None
        };
        Ok(Some(GameSnapshot {
            game,
            closing: false,
            revealed_seed,
        }))
    }

    /// Immutable view of a game
    pub fn get_game_state(&self, game_id: GameId) -> GameResult<GameSnapshot> {
        if let Some(handle) = self.handle(game_id) {
            return Ok(handle.snapshot.borrow().clone());
        }
        self.load_snapshot(game_id)?.ok_or(GameError::NotFound { game_id })
    }

    /// Wait until a completed game has been settled or flagged
    pub async fn wait_for_settlement(&self, game_id: GameId) -> GameResult<GameSnapshot> {
        let Some(handle) = self.handle(game_id) else {
            return self.get_game_state(game_id);
        };
        let mut watcher = handle.snapshot.clone();
        let settled = watcher
            .wait_for(|s| s.status() == GameStatus::Completed && s.game.settlement != SettlementStatus::Unsettled)
            .await
            .map(|s| s.clone());
        match settled {
            Ok(snapshot) => Ok(snapshot),
            Err(_) => Ok(handle.snapshot.borrow().clone()),
        }
    }

    pub fn list_games(&self) -> Vec<GameSnapshot> {
        let mut games: Vec<GameSnapshot> = self.games.iter().map(|h| h.snapshot.borrow().clone()).collect();
        games.sort_by_key(|s| s.game.id);
        games
    }

    pub fn get_commitment(&self, game_id: GameId) -> GameResult<SeedCommitment> {
        game_store::load_seed(self.store.as_ref(), game_id)?
            .map(|r| r.commitment)
            .ok_or(GameError::NotFound { game_id })
    }

    pub fn get_fairness_report(&self, game_id: GameId) -> GameResult<FairnessReport> {
        self.auditor.report(game_id)
    }

    pub fn verify_draw(&self, game_id: GameId, sequence_index: u32) -> GameResult<DrawVerification> {
        self.auditor.verify_draw(game_id, sequence_index)
    }

    pub fn get_jackpot_balance(&self) -> u64 {
        self.treasury.jackpot_balance()
    }

    pub fn get_treasury(&self) -> TreasuryState {
        self.treasury.state()
    }

    pub fn get_card(&self, card_id: CardId) -> GameResult<Card> {
        game_store::load_card(self.store.as_ref(), card_id)?
            .ok_or_else(|| InvalidClaim::UnknownCard { card_id }.into())
    }

    pub fn reconciliation_queue(&self) -> GameResult<Vec<(GameId, String)>> {
        Ok(game_store::load_reconciliation_queue(self.store.as_ref())?)
    }
}
