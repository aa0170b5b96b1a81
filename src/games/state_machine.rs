//! Game lifecycle
//!
//! `scheduled → active → completed`. The state machine is the only code that
//! mutates a [`Game`]; it is driven from the game's actor task, so every
//! method takes `&mut self` and runs without locks.

use crate::errors::{GameError, GameResult, InvalidClaim};
use crate::games::types::{
    CategoryPrizes, ClaimKind, CompletionOutcome, CompletionReason, Draw, Game, GameId,
    GameSnapshot, GameStatus, Payout, SettlementStatus, TieBreakPolicy, WinnerRecord, MAX_NUMBER,
};
use std::collections::HashSet;

/// Outcome of recording a validated claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WinAdmission {
    /// Winners in the category after this claim
    pub co_winners: usize,
    /// True when this claim established the category's winning call
    pub first_in_category: bool,
}

pub struct GameStateMachine {
    game: Game,
    drawn: HashSet<u8>,
}

impl GameStateMachine {
    pub fn new(game: Game) -> Self {
        let drawn = game.draws.iter().map(|d| d.number).collect();
        Self { game, drawn }
    }

    pub fn id(&self) -> GameId {
        self.game.id
    }

    pub fn status(&self) -> GameStatus {
        self.game.status
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    fn require(&self, expected: GameStatus, operation: &'static str) -> GameResult<()> {
        if self.game.status != expected {
            return Err(GameError::InvalidState {
                game_id: self.game.id,
                status: self.game.status,
                operation,
            });
        }
        Ok(())
    }

    /// Add a sold card's price to the pool. Only before the game starts.
    pub fn add_to_pool(&mut self, amount: u64) -> GameResult<u64> {
        self.require(GameStatus::Scheduled, "sell cards for")?;
        self.game.total_pool = self.game.total_pool.saturating_add(amount);
        self.game.cards_sold += 1;
        Ok(self.game.total_pool)
    }

    pub fn start(&mut self, now: u64) -> GameResult<()> {
        self.require(GameStatus::Scheduled, "start")?;
        self.game.status = GameStatus::Active;
        self.game.started_at = Some(now);
        Ok(())
    }

    /// Append a published number. The draw list never shrinks or reorders.
    pub fn record_draw(&mut self, number: u8, proof: String, now: u64) -> GameResult<Draw> {
        self.require(GameStatus::Active, "draw for")?;

        if number == 0 || number > MAX_NUMBER {
            return Err(GameError::NumberOutOfRange { number });
        }
        if self.drawn.contains(&number) {
            return Err(GameError::DuplicateNumber {
                game_id: self.game.id,
                number,
            });
        }
        if self.game.draws.len() >= MAX_NUMBER as usize {
            return Err(GameError::ExhaustedPool {
                game_id: self.game.id,
            });
        }

        let draw = Draw {
            game_id: self.game.id,
            sequence_index: self.game.draws.len() as u32 + 1,
            number,
            timestamp: now,
            proof,
        };
        self.drawn.insert(number);
        self.game.draws.push(draw.clone());
        Ok(draw)
    }

    /// Undo the latest draw when it could not be persisted
    pub fn revert_draw(&mut self, draw: &Draw) {
        if self.game.draws.last().map(|d| d.sequence_index) == Some(draw.sequence_index) {
            self.game.draws.pop();
            self.drawn.remove(&draw.number);
        }
    }

    pub fn pool_exhausted(&self) -> bool {
        self.game.draws.len() >= MAX_NUMBER as usize
    }

    /// Record a claim that the validator accepted.
    ///
    /// The first winner of a category fixes its winning call count. Later
    /// claims share the prize only if their card completed by that call
    /// (and only under [`TieBreakPolicy::SplitEvenly`]).
    pub fn record_win(
        &mut self,
        kind: ClaimKind,
        winner: WinnerRecord,
        policy: TieBreakPolicy,
    ) -> GameResult<WinAdmission> {
        self.require(GameStatus::Active, "record a win for")?;

        let (winners, call_count) = match kind {
            ClaimKind::Quine => (&mut self.game.quine_winners, &mut self.game.quine_call_count),
            ClaimKind::Bingo => (&mut self.game.bingo_winners, &mut self.game.bingo_call_count),
        };

        if winners.iter().any(|w| w.card_id == winner.card_id) {
            return Err(InvalidClaim::AlreadyClaimed {
                card_id: winner.card_id,
                kind,
            }
            .into());
        }

        if let Some(winning_call) = *call_count {
            let admitted = policy == TieBreakPolicy::SplitEvenly && winner.call_count <= winning_call;
            if !admitted {
                return Err(InvalidClaim::CategoryClosed {
                    kind,
                    winning_call,
                    call_count: winner.call_count,
                }
                .into());
            }
            winners.push(winner);
            return Ok(WinAdmission {
                co_winners: winners.len(),
                first_in_category: false,
            });
        }

        *call_count = Some(winner.call_count);
        winners.push(winner);
        Ok(WinAdmission {
            co_winners: winners.len(),
            first_in_category: true,
        })
    }

    /// Move to `completed`. Idempotent: once completed, later calls return
    /// the recorded outcome with `newly_completed == false`.
    pub fn complete(&mut self, reason: CompletionReason, now: u64) -> GameResult<CompletionOutcome> {
        if self.game.status == GameStatus::Completed {
            return Ok(self.outcome(false));
        }
        self.require(GameStatus::Active, "complete")?;

        self.game.status = GameStatus::Completed;
        self.game.ended_at = Some(now);
        self.game.completion = Some(reason);
        self.game.jackpot_won = self.game.bingo_winners.iter().any(|w| w.jackpot_eligible);
        Ok(self.outcome(true))
    }

    fn outcome(&self, newly_completed: bool) -> CompletionOutcome {
        CompletionOutcome {
            game_id: self.game.id,
            reason: self.game.completion.unwrap_or(CompletionReason::ForceStopped),
            ended_at: self.game.ended_at.unwrap_or_default(),
            quine_winners: self.game.quine_winners.clone(),
            bingo_winners: self.game.bingo_winners.clone(),
            newly_completed,
        }
    }

    /// Attach the settlement result once the treasury has answered
    pub fn record_settlement(
        &mut self,
        prizes: CategoryPrizes,
        payouts: Vec<Payout>,
        status: SettlementStatus,
    ) {
        self.game.prizes = prizes;
        self.game.payouts = payouts;
        self.game.settlement = status;
    }

    pub fn snapshot(&self, closing: bool, revealed_seed: Option<String>) -> GameSnapshot {
        GameSnapshot {
            game: self.game.clone(),
            closing,
            revealed_seed,
        }
    }
}
