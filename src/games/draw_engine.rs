//! Provably fair number draws
//!
//! Before a game starts the house picks a 32-byte seed and publishes
//! `SHA-256(seed)`, signed with its schnorrkel key. Draw `i` is derived from
//! `HMAC-SHA256(seed, "<game_id>:<i>")`: the first 8 bytes, big-endian, pick an
//! index into the ascending pool of numbers not yet drawn. Once the seed is
//! revealed anyone can replay the whole sequence.

use crate::errors::GameError;
use crate::games::types::{GameId, MAX_NUMBER};
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use schnorrkel::{context::SigningContext, Keypair, PublicKey, Signature};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

const COMMIT_SIGNING_CONTEXT: &[u8] = b"bingohall-seed-commit";

/// Secret per-game seed
#[derive(Clone, PartialEq, Eq)]
pub struct DrawSeed([u8; 32]);

impl DrawSeed {
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex_seed: &str) -> Result<Self, String> {
        let bytes = hex::decode(hex_seed).map_err(|e| format!("Invalid seed hex: {}", e))?;
        let array: [u8; 32] = bytes.try_into().map_err(|_| "Seed must be 32 bytes".to_string())?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Hex SHA-256 of the seed
    pub fn commitment_hash(&self) -> String {
        hex::encode(Sha256::digest(self.0))
    }
}

impl std::fmt::Debug for DrawSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DrawSeed(..)")
    }
}

/// Published pre-game commitment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeedCommitment {
    pub game_id: GameId,
    /// Hex SHA-256 of the seed
    pub seed_hash: String,
    /// Hex schnorrkel public key of the house
    pub public_key: String,
    /// Hex signature over `"<game_id>:<seed_hash>"`
    pub signature: String,
}

/// Proof for one draw
pub fn draw_proof(seed: &DrawSeed, game_id: GameId, sequence_index: u32) -> [u8; 32] {
    // HMAC accepts keys of any length, so new_from_slice cannot fail here
    let mut mac = match HmacSha256::new_from_slice(seed.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts 32-byte keys"),
    };
    mac.update(format!("{}:{}", game_id, sequence_index).as_bytes());
    mac.finalize().into_bytes().into()
}

/// Position in the remaining pool selected by a proof
pub fn select_index(proof: &[u8; 32], remaining: usize) -> usize {
    let mut head = [0u8; 8];
    head.copy_from_slice(&proof[..8]);
    (u64::from_be_bytes(head) % remaining as u64) as usize
}

/// Deterministic draw sequence for one game
#[derive(Debug, Clone)]
pub struct DrawSequence {
    game_id: GameId,
    seed: DrawSeed,
    remaining: Vec<u8>,
    next_index: u32,
}

impl DrawSequence {
    pub fn new(game_id: GameId, seed: DrawSeed) -> Self {
        Self {
            game_id,
            seed,
            remaining: (1..=MAX_NUMBER).collect(),
            next_index: 1,
        }
    }

    /// Rebuild a sequence that already published `drawn` (in order)
    pub fn resume(game_id: GameId, seed: DrawSeed, drawn: &[u8]) -> Self {
        let mut sequence = Self::new(game_id, seed);
        sequence.remaining.retain(|n| !drawn.contains(n));
        sequence.next_index = drawn.len() as u32 + 1;
        sequence
    }

    /// Next number and its hex proof
    pub fn next(&mut self) -> Result<(u8, String), GameError> {
        if self.remaining.is_empty() {
            return Err(GameError::ExhaustedPool {
                game_id: self.game_id,
            });
        }

        let proof = draw_proof(&self.seed, self.game_id, self.next_index);
        let index = select_index(&proof, self.remaining.len());
        let number = self.remaining.remove(index);
        self.next_index += 1;

        Ok((number, hex::encode(proof)))
    }

    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }

    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    pub fn seed(&self) -> &DrawSeed {
        &self.seed
    }
}

/// House engine: issues seeds and signs their commitments
pub struct DrawEngine {
    keypair: Arc<Keypair>,
}

impl DrawEngine {
    /// Create a new draw engine with a keypair
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    /// Create a new draw engine with a random keypair
    pub fn new_random() -> Self {
        Self::new(Keypair::generate_with(OsRng))
    }

    /// Fresh seed plus its signed commitment
    pub fn commit(&self, game_id: GameId) -> (DrawSeed, SeedCommitment) {
        let seed = DrawSeed::random();
        let commitment = self.commitment_for(game_id, &seed);
        (seed, commitment)
    }

    /// Signed commitment for an existing seed
    pub fn commitment_for(&self, game_id: GameId, seed: &DrawSeed) -> SeedCommitment {
        let seed_hash = seed.commitment_hash();
        let ctx = SigningContext::new(COMMIT_SIGNING_CONTEXT);
        let message = format!("{}:{}", game_id, seed_hash);
        let signature = self.keypair.sign(ctx.bytes(message.as_bytes()));

        SeedCommitment {
            game_id,
            seed_hash,
            public_key: hex::encode(self.keypair.public.to_bytes()),
            signature: hex::encode(signature.to_bytes()),
        }
    }

    /// Check the house signature on a commitment (public verification)
    pub fn verify_commitment(commitment: &SeedCommitment) -> Result<bool, String> {
        let public_key_bytes = hex::decode(&commitment.public_key)
            .map_err(|e| format!("Invalid public key hex: {}", e))?;
        let signature_bytes = hex::decode(&commitment.signature)
            .map_err(|e| format!("Invalid signature hex: {}", e))?;

        let public_key = PublicKey::from_bytes(&public_key_bytes)
            .map_err(|e| format!("Invalid public key: {:?}", e))?;
        let signature = Signature::from_bytes(&signature_bytes)
            .map_err(|e| format!("Invalid signature: {:?}", e))?;

        let ctx = SigningContext::new(COMMIT_SIGNING_CONTEXT);
        let message = format!("{}:{}", commitment.game_id, commitment.seed_hash);
        Ok(public_key.verify(ctx.bytes(message.as_bytes()), &signature).is_ok())
    }

    /// Get the public key as hex string
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.keypair.public.to_bytes())
    }
}
