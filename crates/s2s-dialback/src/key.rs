//! Dialback key derivation and the random tokens the protocol needs.

use hmac::{Hmac, Mac};
use rand::RngCore;
use s2s_types::ChallengeId;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Fixed message whose keyed digest is the loop-detection token.
const LOOPCHECK_MESSAGE: &str = "loopcheck";

/// Computes the dialback key for a `(destination, source, challenge)` triple.
///
/// `hex(HMAC-SHA256(hex(SHA256(secret)), "{destination} {source} {challenge}"))`.
/// Both the originating server and the authoritative verifier must produce
/// the same string, so neither the separator nor the hex casing may change.
pub fn derive_key(secret: &str, destination: &str, source: &str, challenge: &str) -> String {
    keyed_digest(secret, &format!("{destination} {source} {challenge}"))
}

/// Token written on every outbound stream header. An inbound header carrying
/// the same token was opened by this instance.
pub fn loopcheck_token(secret: &str) -> String {
    keyed_digest(secret, LOOPCHECK_MESSAGE)
}

/// Generates a random secret for deployments that configure none.
pub fn generate_secret() -> String {
    random_hex(20)
}

/// Generates a fresh inbound stream challenge.
pub fn generate_challenge() -> ChallengeId {
    ChallengeId::new(random_hex(20))
}

fn keyed_digest(secret: &str, message: &str) -> String {
    let key = hex::encode(Sha256::digest(secret.as_bytes()));
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC key length is valid");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
