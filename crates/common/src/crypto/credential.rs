use serde::{Deserialize, Serialize};

const SALT_SIZE: usize = 16;
const STRETCH_ROUNDS: u32 = 10_000;
const DERIVE_CONTEXT: &str = "keyward 2025-01 unlock credential v1";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("password must not be empty")]
    EmptyPassword,
}

/// Password-derived unlock credential.
///
/// Only the salt and the stretched BLAKE3 digest are kept, so the
/// credential can be persisted next to the rest of the agent state.
///
/// This is a salted, iterated verifier that gates `unlock`. It is not a
/// memory-hard KDF and nothing is encrypted under it: anyone holding the
/// state file can brute-force weak passwords offline at BLAKE3 speed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    salt: [u8; SALT_SIZE],
    digest: [u8; blake3::OUT_LEN],
}

impl Credential {
    /// Derive a fresh credential (new random salt) from a password.
    pub fn derive(password: &str) -> Result<Self, CredentialError> {
        if password.is_empty() {
            return Err(CredentialError::EmptyPassword);
        }
        let mut salt = [0u8; SALT_SIZE];
        getrandom::getrandom(&mut salt)
            .map_err(|e| anyhow::anyhow!("failed to generate salt: {}", e))?;
        let digest = stretch(&salt, password);
        Ok(Self {
            salt,
            digest: *digest.as_bytes(),
        })
    }

    /// Check a password against this credential.
    pub fn verify(&self, password: &str) -> bool {
        // blake3::Hash equality is constant time
        stretch(&self.salt, password) == blake3::Hash::from(self.digest)
    }
}

fn stretch(salt: &[u8; SALT_SIZE], password: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new_derive_key(DERIVE_CONTEXT);
    hasher.update(salt);
    hasher.update(password.as_bytes());
    let mut digest = hasher.finalize();
    for _ in 0..STRETCH_ROUNDS {
        let mut hasher = blake3::Hasher::new_derive_key(DERIVE_CONTEXT);
        hasher.update(digest.as_bytes());
        hasher.update(salt);
        digest = hasher.finalize();
    }
    digest
}
