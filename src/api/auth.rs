//! Player session tokens for the WebSocket gateway
//!
//! A token is `hex(HMAC-SHA256(session_secret, user_id))`. The service that
//! logs players in mints it with [`session_token`]; `GET /ws` checks it
//! before the connection is attributed to that user.

use crate::games::types::UserId;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn session_mac(secret: &str, user_id: &UserId) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(user_id.as_str().as_bytes());
    Some(mac)
}

pub fn session_token(secret: &str, user_id: &UserId) -> Option<String> {
    session_mac(secret, user_id).map(|mac| hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a presented token
pub fn verify_session_token(secret: &str, user_id: &UserId, token: &str) -> bool {
    let Ok(presented) = hex::decode(token) else {
        return false;
    };
    match session_mac(secret, user_id) {
        Some(mac) => mac.verify_slice(&presented).is_ok(),
        None => false,
    }
}
