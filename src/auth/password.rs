use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::Rng;

use crate::error::{Error, Result};

const ARGON2_MEMORY: u32 = 64 * 1024; // KiB, so 64 MiB
const ARGON2_ITERATIONS: u32 = 1;
const ARGON2_PARALLELISM: u32 = 4;
const ARGON2_OUTPUT_LEN: usize = 32;

const NONCE_BYTES: usize = 24;

pub struct PasswordHasherConfig {
    argon2: Argon2<'static>,
}

impl Default for PasswordHasherConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasherConfig {
    #[must_use]
    pub fn new() -> Self {
        let params = Params::new(
            ARGON2_MEMORY,
            ARGON2_ITERATIONS,
            ARGON2_PARALLELISM,
            Some(ARGON2_OUTPUT_LEN),
        )
        .expect("invalid argon2 params");

        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    /// Hashes a password using Argon2id, PHC string output.
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| Error::Config(format!("failed to hash password: {e}")))?;
        Ok(hash.to_string())
    }

    /// Verifies a password against a stored PHC hash.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| Error::Config(format!("invalid hash format: {e}")))?;

        match self.argon2.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::Config(format!("failed to verify password: {e}"))),
        }
    }
}

/// Opaque server blob for the two-step login exchange. The contents are not
/// part of the wire contract; clients hand the blob back unmodified.
#[must_use]
pub fn generate_exchange_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::thread_rng().fill(&mut bytes);
    BASE64.encode(bytes)
}

/// Decodes the opaque finish blob of login step 2 back into the credential.
pub fn decode_finish_blob(blob: &str) -> Result<String> {
    let bytes = BASE64
        .decode(blob)
        .map_err(|_| Error::BadRequest("malformed login blob".to_string()))?;
    String::from_utf8(bytes).map_err(|_| Error::BadRequest("malformed login blob".to_string()))
}

/// Encodes a credential into the opaque finish blob (client side of the
/// contract, used by tests and the archive tooling).
#[must_use]
pub fn encode_finish_blob(credential: &str) -> String {
    BASE64.encode(credential.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_phc_format() {
        let hasher = PasswordHasherConfig::new();
        let hash = hasher.hash("hunter2").unwrap();
        assert!(hash.starts_with("$argon2id$"));
    }

    #[test]
    fn test_verify_correct_password() {
        let hasher = PasswordHasherConfig::new();
        let hash = hasher.hash("correct horse").unwrap();
        assert!(hasher.verify("correct horse", &hash).unwrap());
    }

    #[test]
    fn test_verify_wrong_password() {
        let hasher = PasswordHasherConfig::new();
        let hash = hasher.hash("correct horse").unwrap();
        assert!(!hasher.verify("battery staple", &hash).unwrap());
    }

    #[test]
    fn test_finish_blob_roundtrip() {
        let blob = encode_finish_blob("battery staple");
        assert_eq!(decode_finish_blob(&blob).unwrap(), "battery staple");
    }

    #[test]
    fn test_finish_blob_rejects_garbage() {
        assert!(decode_finish_blob("not base64 !!!").is_err());
    }
}
