//! Bingo cards
//!
//! A card is a 5×5 grid with exactly one free cell. Every other cell holds a
//! distinct number in 1..=90. Cards are written once at purchase time and are
//! read-only to the game core.

use crate::errors::GameError;
use crate::games::types::{CardId, GameId, UserId, MAX_NUMBER};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const GRID_SIZE: usize = 5;

/// Number grid. `None` marks the free cell.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CardGrid(pub [[Option<u8>; GRID_SIZE]; GRID_SIZE]);

impl CardGrid {
    /// Validate shape: one free cell, numbers unique and in range
    pub fn validate(&self) -> Result<(), GameError> {
        let mut free_cells = 0;
        let mut seen = HashSet::new();

        for cell in self.0.iter().flatten() {
            match cell {
                None => free_cells += 1,
                Some(n) if *n == 0 || *n > MAX_NUMBER => {
                    return Err(GameError::InvalidCard(format!("number {} is outside 1..=90", n)));
                }
                Some(n) => {
                    if !seen.insert(*n) {
                        return Err(GameError::InvalidCard(format!("number {} appears twice", n)));
                    }
                }
            }
        }

        if free_cells != 1 {
            return Err(GameError::InvalidCard(format!(
                "expected exactly one free cell, found {}",
                free_cells
            )));
        }

        Ok(())
    }

    /// Random grid with the free cell in the centre
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut pool: Vec<u8> = (1..=MAX_NUMBER).collect();
        pool.shuffle(rng);

        let mut numbers = pool.into_iter();
        let mut cells = [[None; GRID_SIZE]; GRID_SIZE];
        for (r, row) in cells.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                if r == GRID_SIZE / 2 && c == GRID_SIZE / 2 {
                    continue;
                }
                *cell = numbers.next();
            }
        }
        Self(cells)
    }

    /// Non-free numbers of each row
    pub fn rows(&self) -> impl Iterator<Item = Vec<u8>> + '_ {
        self.0.iter().map(|row| row.iter().flatten().copied().collect())
    }

    /// Every non-free number on the card
    pub fn numbers(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().flatten().flatten().copied()
    }
}

/// Issued card
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: CardId,
    pub user_id: UserId,
    pub game_id: GameId,
    pub grid: CardGrid,
    pub purchase_price: u64,
}

impl Card {
    pub fn new(
        id: CardId,
        user_id: UserId,
        game_id: GameId,
        grid: CardGrid,
        purchase_price: u64,
    ) -> Result<Self, GameError> {
        grid.validate()?;
        Ok(Self {
            id,
            user_id,
            game_id,
            grid,
            purchase_price,
        })
    }
}
