//! Random material, salted secret hashing and checksums.
//!
//! API keys are the only credential whose plaintext must be verifiable later,
//! so they get a slow salted hash. Session and CLI-code tokens are only ever
//! looked up, so a plain SHA-256 of the token is enough for storage.

use anyhow::{Context, Result};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng, RngCore};
use scrypt::Params;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SALT_LEN: usize = 16;
const DERIVED_LEN: usize = 64;

// N=2^14, r=8, p=1: interactive-grade work factor for per-request key checks.
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Generate a random alphanumeric string from the OS CSPRNG.
///
/// Used for CSRF state, session tokens, CLI login codes and raw API keys.
pub(crate) fn random_string(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Hash a secret with a fresh random salt.
///
/// Returns `salt:hash` in hex. Two calls on the same input produce different
/// stored forms; only [`verify_secret`] can relate them back to the plaintext.
///
/// # Errors
/// Returns an error if the key derivation fails.
pub(crate) fn hash_secret(plaintext: &str) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let derived = derive(plaintext.as_bytes(), &salt)?;
    Ok(format!("{}:{}", hex::encode(salt), hex::encode(derived)))
}

/// Verify a secret against a stored `salt:hash` form.
///
/// Fails closed: malformed stored forms and derivation failures return
/// `false`, never an error, and the hash comparison is constant-time.
pub(crate) fn verify_secret(plaintext: &str, stored: &str) -> bool {
    let Some((salt_hex, hash_hex)) = stored.split_once(':') else {
        return false;
    };
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    let Ok(stored_hash) = hex::decode(hash_hex) else {
        return false;
    };
    if stored_hash.len() != DERIVED_LEN {
        return false;
    }

    let Ok(derived) = derive(plaintext.as_bytes(), &salt) else {
        return false;
    };
    bool::from(derived.ct_eq(stored_hash.as_slice()))
}

fn derive(plaintext: &[u8], salt: &[u8]) -> Result<[u8; DERIVED_LEN]> {
    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, DERIVED_LEN)
        .context("invalid key derivation parameters")?;
    let mut output = [0u8; DERIVED_LEN];
    scrypt::scrypt(plaintext, salt, &params, &mut output).context("key derivation failed")?;
    Ok(output)
}

/// Deterministic SHA-256 content checksum, hex encoded.
///
/// Integrity only; not an authentication primitive.
pub(crate) fn checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Hash a bearer token for storage and lookup.
///
/// Raw session tokens and CLI codes never touch the database; the hash is the
/// lookup key when the credential is presented again.
pub(crate) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_string_length_and_alphabet() {
        let value = random_string(32);
        assert_eq!(value.len(), 32);
        assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn random_string_unique() {
        assert_ne!(random_string(32), random_string(32));
    }

    #[test]
    fn hash_secret_salts_differ() {
        let first = hash_secret("correct horse").expect("hash");
        let second = hash_secret("correct horse").expect("hash");
        assert_ne!(first, second);
        assert!(verify_secret("correct horse", &first));
        assert!(verify_secret("correct horse", &second));
    }

    #[test]
    fn verify_secret_rejects_wrong_plaintext() {
        let stored = hash_secret("right").expect("hash");
        assert!(!verify_secret("wrong", &stored));
    }

    #[test]
    fn verify_secret_fails_closed_on_malformed_input() {
        assert!(!verify_secret("anything", ""));
        assert!(!verify_secret("anything", "no-separator"));
        assert!(!verify_secret("anything", "nothex:nothex"));
        assert!(!verify_secret("anything", "abcd:1234"));
        // Valid hex but truncated hash
        assert!(!verify_secret("anything", "00112233445566778899aabbccddeeff:00ff"));
    }

    #[test]
    fn checksum_is_deterministic() {
        let first = checksum(b"package contents");
        let second = checksum(b"package contents");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert_ne!(first, checksum(b"other contents"));
    }

    #[test]
    fn checksum_known_vector() {
        // SHA-256 of the empty string
        assert_eq!(
            checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hash_token_stable() {
        let first = hash_token("token");
        let second = hash_token("token");
        let different = hash_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
        assert_eq!(first.len(), 32);
    }
}
