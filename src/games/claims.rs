//! Claim validation
//!
//! Validity is judged only against the committed draw sequence. The call
//! count of a winning line or card is the sequence index of its last
//! required number, so submission latency never changes the result.

use crate::errors::{GameError, GameResult, InvalidClaim};
use crate::games::card::Card;
use crate::games::types::{Claim, ClaimKind, Game, GameStatus};
use std::collections::HashMap;

/// Accepted claim details
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimResult {
    pub valid: bool,
    pub call_count: u32,
    pub jackpot_eligible: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ClaimValidator {
    /// A bingo at or below this call count wins the jackpot
    jackpot_threshold: u32,
}

impl ClaimValidator {
    pub fn new(jackpot_threshold: u32) -> Self {
        Self { jackpot_threshold }
    }

    pub fn jackpot_threshold(&self) -> u32 {
        self.jackpot_threshold
    }

    /// Decide whether `claim` on `card` wins against `game` as it stands now.
    pub fn validate(&self, game: &Game, card: &Card, claim: &Claim) -> GameResult<ClaimResult> {
        if game.status != GameStatus::Active {
            return Err(GameError::InvalidState {
                game_id: game.id,
                status: game.status,
                operation: "claim in",
            });
        }

        if claim.card_id != card.id {
            return Err(InvalidClaim::UnknownCard { card_id: claim.card_id }.into());
        }
        if card.game_id != game.id || claim.game_id != game.id {
            return Err(InvalidClaim::WrongGame {
                card_id: card.id,
                card_game: card.game_id,
                game_id: game.id,
            }
            .into());
        }
        if card.user_id != claim.user_id {
            return Err(InvalidClaim::NotCardOwner {
                card_id: card.id,
                user_id: claim.user_id.clone(),
            }
            .into());
        }

        let called: HashMap<u8, u32> = game
            .draws
            .iter()
            .map(|d| (d.number, d.sequence_index))
            .collect();

        let call_count = match claim.kind {
            ClaimKind::Quine => quine_call_count(card, &called)?,
            ClaimKind::Bingo => completion_call(card.grid.numbers(), &called)?,
        };

        let jackpot_eligible = claim.kind == ClaimKind::Bingo && call_count <= self.jackpot_threshold;

        tracing::debug!(
            game_id = %game.id,
            card_id = %card.id,
            kind = %claim.kind,
            call_count,
            jackpot_eligible,
            "Claim validated"
        );

        Ok(ClaimResult {
            valid: true,
            call_count,
            jackpot_eligible,
        })
    }
}

/// Call at which every number in `numbers` had been drawn, or the first
/// missing number.
fn completion_call(
    numbers: impl Iterator<Item = u8>,
    called: &HashMap<u8, u32>,
) -> Result<u32, InvalidClaim> {
    let mut last = 0;
    for number in numbers {
        match called.get(&number) {
            Some(index) => last = last.max(*index),
            None => return Err(InvalidClaim::NumberNotDrawn { number }),
        }
    }
    Ok(last)
}

/// Earliest call at which some row was complete
fn quine_call_count(card: &Card, called: &HashMap<u8, u32>) -> Result<u32, InvalidClaim> {
    let mut best: Option<u32> = None;
    let mut first_missing = None;

    for row in card.grid.rows() {
        match completion_call(row.into_iter(), called) {
            Ok(call) => best = Some(best.map_or(call, |b| b.min(call))),
            Err(missing) => {
                first_missing.get_or_insert(missing);
            }
        }
    }

    match (best, first_missing) {
        (Some(call), _) => Ok(call),
        (None, Some(missing)) => Err(missing),
        // A card with no numbers cannot be issued
        (None, None) => Err(InvalidClaim::UnknownCard { card_id: card.id }),
    }
}
