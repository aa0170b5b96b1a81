//! External collaborators: the player ledger and the compliance gate
//!
//! Balances and eligibility live outside the hall. The traits are the only
//! seam the game core sees; the in-memory implementations back tests and
//! single-process deployments.

use crate::errors::LedgerError;
use crate::games::types::{now_millis, GameId, UserId};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Direction of a ledger movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    CardPurchase,
    PrizeCredit,
    Reversal,
}

/// Proof that the ledger applied a movement; needed to reverse it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerReceipt {
    pub entry_id: u64,
    pub user_id: UserId,
    pub kind: LedgerEntryKind,
    /// Signed change applied to the balance
    pub delta: i128,
    pub reference: String,
    pub timestamp: u64,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Take the card price from the player's balance
    async fn debit_card_purchase(
        &self,
        user_id: &UserId,
        amount: u64,
        game_id: GameId,
    ) -> Result<LedgerReceipt, LedgerError>;

    /// Pay a prize into the player's balance
    async fn credit_prize(
        &self,
        user_id: &UserId,
        amount: u64,
        reference: &str,
    ) -> Result<LedgerReceipt, LedgerError>;

    /// Undo a previously applied movement
    async fn reverse(&self, receipt: &LedgerReceipt) -> Result<LedgerReceipt, LedgerError>;
}

#[async_trait]
pub trait ComplianceGate: Send + Sync {
    async fn is_user_eligible_to_play(&self, user_id: &UserId) -> Result<bool, LedgerError>;
}

/// Ledger holding balances in process memory
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: DashMap<UserId, i128>,
    entries: DashMap<u64, LedgerReceipt>,
    next_entry: AtomicU64,
    /// Users whose prize credits are refused (failure injection)
    failing_credits: DashSet<UserId>,
    offline: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&self, user_id: &UserId, amount: u64) {
        *self.balances.entry(user_id.clone()).or_insert(0) += amount as i128;
    }

    pub fn balance(&self, user_id: &UserId) -> i128 {
        self.balances.get(user_id).map(|b| *b).unwrap_or(0)
    }

    /// Refuse every prize credit to `user_id`
    pub fn fail_credits_for(&self, user_id: &UserId) {
        self.failing_credits.insert(user_id.clone());
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn check_online(&self) -> Result<(), LedgerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("ledger is offline".to_string()));
        }
        Ok(())
    }

    fn apply(&self, user_id: &UserId, kind: LedgerEntryKind, delta: i128, reference: String) -> LedgerReceipt {
        *self.balances.entry(user_id.clone()).or_insert(0) += delta;
        let receipt = LedgerReceipt {
            entry_id: self.next_entry.fetch_add(1, Ordering::SeqCst) + 1,
            user_id: user_id.clone(),
            kind,
            delta,
            reference,
            timestamp: now_millis(),
        };
        self.entries.insert(receipt.entry_id, receipt.clone());
        receipt
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn debit_card_purchase(
        &self,
        user_id: &UserId,
        amount: u64,
        game_id: GameId,
    ) -> Result<LedgerReceipt, LedgerError> {
        self.check_online()?;

        // Hold the entry so the balance check and the debit are one step
        let mut balance = self.balances.entry(user_id.clone()).or_insert(0);
        if *balance < amount as i128 {
            return Err(LedgerError::InsufficientFunds {
                user_id: user_id.clone(),
                balance: (*balance).max(0) as u64,
                needed: amount,
            });
        }
        *balance -= amount as i128;
        drop(balance);

        let receipt = LedgerReceipt {
            entry_id: self.next_entry.fetch_add(1, Ordering::SeqCst) + 1,
            user_id: user_id.clone(),
            kind: LedgerEntryKind::CardPurchase,
            delta: -(amount as i128),
            reference: format!("game:{}", game_id),
            timestamp: now_millis(),
        };
        self.entries.insert(receipt.entry_id, receipt.clone());
        Ok(receipt)
    }

    async fn credit_prize(
        &self,
        user_id: &UserId,
        amount: u64,
        reference: &str,
    ) -> Result<LedgerReceipt, LedgerError> {
        self.check_online()?;
        if self.failing_credits.contains(user_id) {
            return Err(LedgerError::Rejected(format!("credits to {} are blocked", user_id)));
        }
        Ok(self.apply(user_id, LedgerEntryKind::PrizeCredit, amount as i128, reference.to_string()))
    }

    async fn reverse(&self, receipt: &LedgerReceipt) -> Result<LedgerReceipt, LedgerError> {
        self.check_online()?;
        if self.entries.remove(&receipt.entry_id).is_none() {
            return Err(LedgerError::Rejected(format!("entry {} is not reversible", receipt.entry_id)));
        }
        Ok(self.apply(
            &receipt.user_id,
            LedgerEntryKind::Reversal,
            -receipt.delta,
            format!("reversal:{}", receipt.entry_id),
        ))
    }
}

/// Compliance gate backed by a deny list
#[derive(Debug, Default)]
pub struct DenyListCompliance {
    denied: DashSet<UserId>,
}

impl DenyListCompliance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(&self, user_id: &UserId) {
        self.denied.insert(user_id.clone());
    }

    pub fn allow(&self, user_id: &UserId) {
        self.denied.remove(user_id);
    }
}

#[async_trait]
impl ComplianceGate for DenyListCompliance {
    async fn is_user_eligible_to_play(&self, user_id: &UserId) -> Result<bool, LedgerError> {
        Ok(!self.denied.contains(user_id))
    }
}
