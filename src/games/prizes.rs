//! Prize pool split
//!
//! Pure arithmetic over integer currency units. Nothing here touches shared
//! balances: the treasury feeds in the current jackpot and commits the
//! returned [`Allocation`] as one step.

use crate::errors::AllocationError;
use crate::games::types::{CategoryPrizes, ClaimKind, Payout, WinnerRecord};
use serde::{Deserialize, Serialize};

pub const TOTAL_BPS: u32 = 10_000;

/// Category shares in basis points (must sum to 10 000)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrizeSchedule {
    pub quine_bps: u32,
    pub bingo_bps: u32,
    pub jackpot_bps: u32,
    pub platform_bps: u32,
}

impl Default for PrizeSchedule {
    fn default() -> Self {
        Self {
            quine_bps: 1_500,
            bingo_bps: 6_500,
            jackpot_bps: 1_000,
            platform_bps: 1_000,
        }
    }
}

impl PrizeSchedule {
    pub fn total_bps(&self) -> u32 {
        self.quine_bps + self.bingo_bps + self.jackpot_bps + self.platform_bps
    }

    pub fn validate(&self) -> Result<(), AllocationError> {
        let total_bps = self.total_bps();
        if total_bps != TOTAL_BPS {
            return Err(AllocationError::InvalidSchedule { total_bps });
        }
        Ok(())
    }
}

/// Everything a completed game contributes to allocation
#[derive(Debug, Clone)]
pub struct AllocationInput<'a> {
    pub total_pool: u64,
    pub quine_winners: &'a [WinnerRecord],
    pub bingo_winners: &'a [WinnerRecord],
    /// Jackpot balance before this game
    pub jackpot_balance: u64,
}

/// Result of splitting one game's pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub prizes: CategoryPrizes,
    pub payouts: Vec<Payout>,
    /// This game's contribution to the jackpot
    pub jackpot_contribution: u64,
    /// Jackpot paid to winners (0 unless won)
    pub jackpot_paid: u64,
    pub jackpot_after: u64,
    pub jackpot_won: bool,
    /// Rounding remainders and unclaimed prizes
    pub carry: u64,
}

impl Allocation {
    pub fn total_paid(&self) -> u64 {
        self.payouts.iter().map(|p| p.amount).sum()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PrizeAllocator {
    schedule: PrizeSchedule,
}

fn share_of(pool: u64, bps: u32) -> u64 {
    ((pool as u128 * bps as u128) / TOTAL_BPS as u128) as u64
}

/// Even split; the remainder is returned separately
fn split(amount: u64, ways: usize) -> (u64, u64) {
    if ways == 0 {
        return (0, amount);
    }
    let ways = ways as u64;
    (amount / ways, amount % ways)
}

impl PrizeAllocator {
    pub fn new(schedule: PrizeSchedule) -> Result<Self, AllocationError> {
        schedule.validate()?;
        Ok(Self { schedule })
    }

    pub fn schedule(&self) -> &PrizeSchedule {
        &self.schedule
    }

    pub fn allocate(&self, input: &AllocationInput<'_>) -> Result<Allocation, AllocationError> {
        let pool = input.total_pool;
        let quine = share_of(pool, self.schedule.quine_bps);
        let bingo = share_of(pool, self.schedule.bingo_bps);
        let jackpot_contribution = share_of(pool, self.schedule.jackpot_bps);
        let platform = share_of(pool, self.schedule.platform_bps);

        let categories = quine + bingo + jackpot_contribution + platform;
        let mut carry = pool.checked_sub(categories).ok_or(AllocationError::Overflow { pool })?;

        let mut payouts = Vec::with_capacity(input.quine_winners.len() + input.bingo_winners.len());

        let (quine_share, quine_rest) = split(quine, input.quine_winners.len());
        carry += quine_rest;
        for w in input.quine_winners {
            payouts.push(Payout {
                user_id: w.user_id.clone(),
                card_id: w.card_id,
                kind: ClaimKind::Quine,
                amount: quine_share,
                jackpot_share: 0,
            });
        }

        let (bingo_share, bingo_rest) = split(bingo, input.bingo_winners.len());
        carry += bingo_rest;

        let eligible = input.bingo_winners.iter().filter(|w| w.jackpot_eligible).count();
        let (jackpot_share, jackpot_paid, jackpot_after) = if eligible > 0 {
            let pot = input
                .jackpot_balance
                .checked_add(jackpot_contribution)
                .ok_or(AllocationError::Overflow { pool })?;
            let (share, rest) = split(pot, eligible);
            carry += rest;
            (share, pot - rest, 0)
        } else {
            let after = input
                .jackpot_balance
                .checked_add(jackpot_contribution)
                .ok_or(AllocationError::Overflow { pool })?;
            (0, 0, after)
        };

        for w in input.bingo_winners {
            let bonus = if w.jackpot_eligible { jackpot_share } else { 0 };
            payouts.push(Payout {
                user_id: w.user_id.clone(),
                card_id: w.card_id,
                kind: ClaimKind::Bingo,
                amount: bingo_share + bonus,
                jackpot_share: bonus,
            });
        }

        Ok(Allocation {
            prizes: CategoryPrizes {
                quine,
                bingo,
                jackpot: jackpot_paid,
                platform,
            },
            payouts,
            jackpot_contribution,
            jackpot_paid,
            jackpot_after,
            jackpot_won: eligible > 0,
            carry,
        })
    }
}
