//! Treasury: the single owner of shared balances
//!
//! Jackpot, organizer wallet and carry account are touched only by the
//! treasury task. Completed games queue a [`SettlementJob`]; each job is
//! allocated against the current jackpot, every payout is credited, and the
//! new balances are committed in one storage batch. Any failure reverses
//! the credits already made and leaves the balances untouched.

use crate::errors::{AllocationError, LedgerError, StorageError};
use crate::game_store;
use crate::games::prizes::{Allocation, AllocationInput, PrizeAllocator};
use crate::games::types::{Game, GameId, SettlementStatus, UserId};
use crate::ledger::{Ledger, LedgerReceipt};
use crate::metrics::HallMetrics;
use crate::storage::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};

/// Persisted treasury balances
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreasuryState {
    pub jackpot: u64,
    pub organizer_wallet: u64,
    /// Rounding remainders and unclaimed prizes
    pub carry: u64,
    pub games_settled: u64,
}

pub struct SettlementJob {
    pub game: Game,
    pub reply: oneshot::Sender<Result<Allocation, AllocationError>>,
}

/// Cloneable handle to the treasury task
#[derive(Clone)]
pub struct TreasuryHandle {
    jobs: mpsc::Sender<SettlementJob>,
    state: watch::Receiver<TreasuryState>,
}

impl TreasuryHandle {
    /// Queue a completed game and wait for its allocation
    pub async fn settle(&self, game: Game) -> Result<Allocation, AllocationError> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send(SettlementJob { game, reply })
            .await
            .map_err(|_| AllocationError::TreasuryUnavailable)?;
        response.await.map_err(|_| AllocationError::TreasuryUnavailable)?
    }

    pub fn state(&self) -> TreasuryState {
        *self.state.borrow()
    }

    pub fn jackpot_balance(&self) -> u64 {
        self.state.borrow().jackpot
    }
}

pub struct Treasury {
    allocator: PrizeAllocator,
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn KvStore>,
    state: TreasuryState,
    published: watch::Sender<TreasuryState>,
    ledger_timeout: Duration,
    metrics: Option<Arc<HallMetrics>>,
}

impl Treasury {
    /// Load balances from storage and start the treasury task
    pub fn spawn(
        allocator: PrizeAllocator,
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn KvStore>,
        queue_capacity: usize,
        ledger_timeout: Duration,
        metrics: Option<Arc<HallMetrics>>,
    ) -> Result<TreasuryHandle, StorageError> {
        let state = game_store::load_treasury(store.as_ref())?;
        let (published, state_rx) = watch::channel(state);
        let (jobs, rx) = mpsc::channel(queue_capacity);

        if let Some(m) = &metrics {
            m.set_jackpot(state.jackpot);
        }
        info!(jackpot = state.jackpot, carry = state.carry, "🏦 Treasury loaded");

        let treasury = Treasury {
            allocator,
            ledger,
            store,
            state,
            published,
            ledger_timeout,
            metrics,
        };
        tokio::spawn(treasury.run(rx));

        Ok(TreasuryHandle { jobs, state: state_rx })
    }

    async fn run(mut self, mut rx: mpsc::Receiver<SettlementJob>) {
        while let Some(job) = rx.recv().await {
            let game_id = job.game.id;
            let result = self.settle(job.game).await;
            if let Err(e) = &result {
                error!(game_id = %game_id, "Settlement failed: {}", e);
            }
            // The game actor may have gone away; the result is already persisted
            let _ = job.reply.send(result);
        }
        info!("Treasury stopped");
    }

    async fn credit(&self, game_id: GameId, payout_index: usize, user: &UserId, amount: u64) -> Result<LedgerReceipt, LedgerError> {
        let reference = format!("game:{}:payout:{}", game_id, payout_index);
        match tokio::time::timeout(self.ledger_timeout, self.ledger.credit_prize(user, amount, &reference)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Unavailable(format!(
                "credit timed out after {}ms",
                self.ledger_timeout.as_millis()
            ))),
        }
    }

    async fn rollback(&self, game_id: GameId, receipts: &[LedgerReceipt]) {
        for receipt in receipts.iter().rev() {
            match tokio::time::timeout(self.ledger_timeout, self.ledger.reverse(receipt)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(game_id = %game_id, entry = receipt.entry_id, "Reversal failed: {}", e),
                Err(_) => error!(game_id = %game_id, entry = receipt.entry_id, "Reversal timed out"),
            }
        }
    }

    async fn settle(&mut self, mut game: Game) -> Result<Allocation, AllocationError> {
        let allocation = self.allocator.allocate(&AllocationInput {
            total_pool: game.total_pool,
            quine_winners: &game.quine_winners,
            bingo_winners: &game.bingo_winners,
            jackpot_balance: self.state.jackpot,
        })?;

        let mut receipts = Vec::with_capacity(allocation.payouts.len());
        for (index, payout) in allocation.payouts.iter().enumerate() {
            if payout.amount == 0 {
                continue;
            }
            match self.credit(game.id, index, &payout.user_id, payout.amount).await {
                Ok(receipt) => receipts.push(receipt),
                Err(e) => {
                    warn!(game_id = %game.id, user_id = %payout.user_id, "Prize credit failed, rolling back");
                    self.rollback(game.id, &receipts).await;
                    return Err(AllocationError::CreditFailed {
                        user_id: payout.user_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let next = TreasuryState {
            jackpot: allocation.jackpot_after,
            organizer_wallet: self.state.organizer_wallet + allocation.prizes.platform,
            carry: self.state.carry + allocation.carry,
            games_settled: self.state.games_settled + 1,
        };

        game.prizes = allocation.prizes;
        game.payouts = allocation.payouts.clone();
        game.jackpot_won = allocation.jackpot_won;
        game.settlement = SettlementStatus::Paid;

        if let Err(e) = game_store::commit_settlement(self.store.as_ref(), &next, Some(&game)) {
            self.rollback(game.id, &receipts).await;
            return Err(e.into());
        }

        self.state = next;
        self.published.send_replace(next);
        if let Some(m) = &self.metrics {
            m.set_jackpot(next.jackpot);
        }

        info!(
            game_id = %game.id,
            pool = game.total_pool,
            paid = allocation.total_paid(),
            jackpot = next.jackpot,
            carry = next.carry,
            "💰 Game settled"
        );
        Ok(allocation)
    }
}
