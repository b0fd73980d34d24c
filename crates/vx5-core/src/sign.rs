//! Request signing: pre-hash construction and HMAC-SHA256/base64.
//!
//! The exchange authenticates signed requests (REST calls and the WebSocket
//! login) with the same scheme: build the canonical pre-hash string
//! `timestamp + UPPER(method) + path + body`, sign it with HMAC-SHA256 keyed
//! by the secret key, and base64-encode the digest.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Build the canonical pre-hash string.
///
/// # Example
///
/// ```
/// let s = vx5_core::sign::pre_hash("1521221737", "get", "/users/self/verify", "");
/// assert_eq!(s, "1521221737GET/users/self/verify");
/// ```
pub fn pre_hash(timestamp: &str, method: &str, request_path: &str, body: &str) -> String {
    format!("{}{}{}{}", timestamp, method.to_uppercase(), request_path, body)
}

/// Sign a message with HMAC-SHA256 and return the base64-encoded digest.
pub fn hmac_sha256_base64(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}
