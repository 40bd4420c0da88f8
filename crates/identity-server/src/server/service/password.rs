//! PBKDF2-HMAC-SHA256 password hashes.
//!
//! Encoded as `pbkdf2-sha256$<rounds>$<salt>$<hash>` with unpadded standard
//! base64 for salt and hash.

use base64::{Engine, engine::general_purpose::STANDARD_NO_PAD};
use sha2::Sha256;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// Work factor for newly stored passwords.
pub const DEFAULT_ROUNDS: u32 = 600_000;

/// Hashes `password` with a fresh random salt. `rounds` below 1 is raised to 1.
#[must_use]
pub fn hash_password(password: &str, rounds: u32) -> String {
    let rounds = rounds.max(1);
    let salt: [u8; SALT_LEN] = rand::random();
    let hash = derive(password, &salt, rounds);
    format!(
        "{SCHEME}${}${}${}",
        rounds,
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(hash)
    )
}

/// Returns `false` for a wrong password and for anything that is not a hash
/// produced by [`hash_password`].
#[must_use]
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let mut parts = encoded.split('$');
    let (Some(SCHEME), Some(rounds), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    let Some(rounds) = rounds.parse::<u32>().ok().filter(|&rounds| rounds > 0) else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (STANDARD_NO_PAD.decode(salt), STANDARD_NO_PAD.decode(hash))
    else {
        return false;
    };
    let actual = derive(password, &salt, rounds);
    expected.len() == actual.len()
        && expected
            .iter()
            .zip(actual.iter())
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}

fn derive(password: &str, salt: &[u8], rounds: u32) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, &mut out);
    out
}
