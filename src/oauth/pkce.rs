//! PKCE (RFC 7636) and CSRF state generation

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};

/// Only challenge method this service issues
pub const CHALLENGE_METHOD: &str = "S256";

/// Verifier length; RFC 7636 allows 43 to 128
const VERIFIER_LEN: usize = 64;

/// Raw entropy behind a state value (256 bits)
const STATE_BYTES: usize = 32;

/// Verifier kept server-side and the challenge sent to the provider
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub code_verifier: String,
    pub code_challenge: String,
}

/// Generate a fresh verifier and its S256 challenge
pub fn generate_pkce_pair() -> PkcePair {
    let code_verifier: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(VERIFIER_LEN)
        .map(char::from)
        .collect();
    let code_challenge = code_challenge_for(&code_verifier);

    PkcePair {
        code_verifier,
        code_challenge,
    }
}

/// SHA-256 of the verifier, base64url without padding
pub fn code_challenge_for(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Opaque, unguessable state value for CSRF protection
pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
