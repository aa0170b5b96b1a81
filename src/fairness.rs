//! Draw auditing
//!
//! Works from persisted records only: the game header, its draw rows and
//! the seed row. Nothing here mutates storage, so reports can be produced
//! while a game is still running.

use crate::errors::{GameError, GameResult};
use crate::game_store::{self, SeedRecord};
use crate::games::draw_engine::{DrawEngine, DrawSeed, DrawSequence};
use crate::games::types::{now_millis, Game, GameId, GameStatus, MAX_NUMBER};
use crate::storage::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DECADES: usize = 9;
/// Share of the score carried by cryptographic verification
const VERIFICATION_WEIGHT: f64 = 0.8;
const SIGNIFICANCE: f64 = 0.05;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DrawVerification {
    pub game_id: GameId,
    pub sequence_index: u32,
    pub verified: bool,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_number: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_number: Option<u8>,
}

/// Chi-squared goodness of fit of drawn numbers across the nine decades
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UniformityStat {
    pub decade_counts: [u32; DECADES],
    pub chi_squared: f64,
    pub degrees_of_freedom: u32,
    pub p_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FairnessReport {
    pub game_id: GameId,
    pub status: GameStatus,
    /// False while the game is still running
    pub complete: bool,
    pub seed_hash: String,
    pub commitment_valid: bool,
    pub draws_total: usize,
    pub draws_verified: usize,
    pub uniformity: UniformityStat,
    /// 0 to 100
    pub score: f64,
    pub draws: Vec<DrawVerification>,
    pub generated_at: u64,
}

#[derive(Clone)]
pub struct FairnessAuditor {
    store: Arc<dyn KvStore>,
}

impl FairnessAuditor {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn load(&self, game_id: GameId) -> GameResult<(Game, SeedRecord, DrawSeed)> {
        let game = game_store::load_game(self.store.as_ref(), game_id)?
            .ok_or(GameError::NotFound { game_id })?;
        let record = game_store::load_seed(self.store.as_ref(), game_id)?
            .ok_or(GameError::NotFound { game_id })?;
        let seed = DrawSeed::from_hex(&record.seed_hex).map_err(|e| {
            GameError::Storage(crate::errors::StorageError::CorruptedData(format!(
                "seed for game {}: {}",
                game_id, e
            )))
        })?;
        Ok((game, record, seed))
    }

    /// Recompute draw `sequence_index` from the committed seed
    pub fn verify_draw(&self, game_id: GameId, sequence_index: u32) -> GameResult<DrawVerification> {
        let (game, _, seed) = self.load(game_id)?;
        Ok(check_draw(&game, &seed, sequence_index))
    }

    pub fn report(&self, game_id: GameId) -> GameResult<FairnessReport> {
        let (game, record, seed) = self.load(game_id)?;

        let commitment_valid = seed.commitment_hash() == game.fairness_hash
            && record.commitment.seed_hash == game.fairness_hash
            && DrawEngine::verify_commitment(&record.commitment).unwrap_or(false);

        let draws: Vec<DrawVerification> = game
            .draws
            .iter()
            .map(|d| check_draw(&game, &seed, d.sequence_index))
            .collect();
        let draws_verified = draws.iter().filter(|d| d.verified).count();

        let numbers: Vec<u8> = game.draws.iter().map(|d| d.number).collect();
        let uniformity = uniformity(&numbers);
        let score = fairness_score(commitment_valid, draws_verified, draws.len(), uniformity.p_value);

        tracing::debug!(
            game_id = %game_id,
            draws = draws.len(),
            draws_verified,
            chi_squared = uniformity.chi_squared,
            score,
            "Fairness report generated"
        );

        Ok(FairnessReport {
            game_id,
            status: game.status,
            complete: game.status == GameStatus::Completed,
            seed_hash: game.fairness_hash.clone(),
            commitment_valid,
            draws_total: draws.len(),
            draws_verified,
            uniformity,
            score,
            draws,
            generated_at: now_millis(),
        })
    }
}

fn check_draw(game: &Game, seed: &DrawSeed, sequence_index: u32) -> DrawVerification {
    let mut verification = DrawVerification {
        game_id: game.id,
        sequence_index,
        verified: false,
        detail: String::new(),
        published_number: None,
        expected_number: None,
    };

    let position = sequence_index as usize;
    let Some(draw) = position.checked_sub(1).and_then(|i| game.draws.get(i)) else {
        verification.detail = format!("no draw {} published for game {}", sequence_index, game.id);
        return verification;
    };
    verification.published_number = Some(draw.number);

    let prior: Vec<u8> = game.draws[..position - 1].iter().map(|d| d.number).collect();
    let mut replay = DrawSequence::resume(game.id, seed.clone(), &prior);
    let (expected_number, expected_proof) = match replay.next() {
        Ok(next) => next,
        Err(e) => {
            verification.detail = e.to_string();
            return verification;
        }
    };
    verification.expected_number = Some(expected_number);

    let proof_matches = match (hex::decode(&draw.proof), hex::decode(&expected_proof)) {
        (Ok(published), Ok(expected)) => published == expected,
        _ => false,
    };

    verification.verified = proof_matches && draw.number == expected_number;
    verification.detail = match (proof_matches, draw.number == expected_number) {
        (true, true) => "proof and number match the committed seed".to_string(),
        (false, _) => "published proof does not match HMAC of committed seed".to_string(),
        (true, false) => format!("proof matches but seed selects {}", expected_number),
    };
    verification
}

fn uniformity(numbers: &[u8]) -> UniformityStat {
    let mut decade_counts = [0u32; DECADES];
    for &n in numbers.iter().filter(|n| (1..=MAX_NUMBER).contains(*n)) {
        decade_counts[((n - 1) / 10) as usize] += 1;
    }

    let degrees_of_freedom = (DECADES - 1) as u32;
    if numbers.is_empty() {
        return UniformityStat {
            decade_counts,
            chi_squared: 0.0,
            degrees_of_freedom,
            p_value: 1.0,
        };
    }

    let expected = numbers.len() as f64 / DECADES as f64;
    let chi_squared: f64 = decade_counts
        .iter()
        .map(|&observed| {
            let diff = observed as f64 - expected;
            diff * diff / expected
        })
        .sum();

    UniformityStat {
        decade_counts,
        chi_squared,
        degrees_of_freedom,
        p_value: chi_squared_upper_tail(chi_squared, degrees_of_freedom),
    }
}

/// Wilson-Hilferty approximation of P(X >= x) for X ~ chi-squared(k)
fn chi_squared_upper_tail(x: f64, k: u32) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    let k = k as f64;
    let variance = 2.0 / (9.0 * k);
    let z = ((x / k).powf(1.0 / 3.0) - (1.0 - variance)) / variance.sqrt();
    (1.0 - standard_normal_cdf(z)).clamp(0.0, 1.0)
}

fn standard_normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Abramowitz and Stegun 7.1.26
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t * (0.254_829_592
        + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

fn fairness_score(commitment_valid: bool, verified: usize, total: usize, p_value: f64) -> f64 {
    if !commitment_valid {
        return 0.0;
    }
    let verified_fraction = if total == 0 { 1.0 } else { verified as f64 / total as f64 };
    let uniformity = (p_value / SIGNIFICANCE).min(1.0);
    let score = 100.0 * (VERIFICATION_WEIGHT * verified_fraction + (1.0 - VERIFICATION_WEIGHT) * uniformity);
    (score * 100.0).round() / 100.0
}
