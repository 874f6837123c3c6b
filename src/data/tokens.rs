//! Bearer token lifecycle: generation, hashing, lookup, expiry and scoped deletion.
//!
//! Flow Overview:
//! 1) `generate` draws 16 bytes from the OS CSPRNG and encodes them as base32
//!    (26 characters, no padding). Only the SHA-256 digest is persisted.
//! 2) `resolve_principal` re-hashes the presented plaintext and asks the
//!    repository for a token with the same digest and scope that is still
//!    valid at the clock's current instant.
//! 3) `delete_all_for_user` purges every token for a `(user, scope)` pair once
//!    one of them has been consumed.
//!
//! Unknown and expired tokens both surface as `StoreError::NotFound`.

use anyhow::Context;
use base32::Alphabet;
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{fmt, sync::Arc, time::Duration};
use tracing::instrument;
use utoipa::ToSchema;

use super::{StoreError, TokenRepository, User};
use crate::clock::Clock;

/// Length of every plaintext token handed to clients.
pub const TOKEN_LENGTH: usize = 26;

const TOKEN_ENTROPY_BYTES: usize = 16;
const TOKEN_ALPHABET: Alphabet = Alphabet::Rfc4648 { padding: false };

/// Purpose a token was issued for; tokens never validate outside their scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Activation,
    Authentication,
}

impl Scope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Activation => "activation",
            Self::Authentication => "authentication",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Serialize, ToSchema)]
pub struct Token {
    #[serde(rename = "token")]
    pub plain_text: String,
    #[serde(skip)]
    pub hash: Vec<u8>,
    #[serde(skip)]
    pub user_id: i64,
    pub expiry: DateTime<Utc>,
    #[serde(skip)]
    pub scope: Scope,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("plain_text", &"***")
            .field("user_id", &self.user_id)
            .field("expiry", &self.expiry)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Build a fresh token for `user_id` that expires `ttl` after `now`.
///
/// # Errors
/// Returns an error if the OS random source fails or the expiry is not representable.
pub fn generate_token(
    user_id: i64,
    ttl: Duration,
    scope: Scope,
    now: DateTime<Utc>,
) -> anyhow::Result<Token> {
    let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    let plain_text = base32::encode(TOKEN_ALPHABET, &bytes);
    let ttl = chrono::Duration::from_std(ttl).context("token ttl out of range")?;
    let expiry = now
        .checked_add_signed(ttl)
        .context("token expiry out of range")?;

    Ok(Token {
        hash: hash_token(&plain_text),
        plain_text,
        user_id,
        expiry,
        scope,
    })
}

/// SHA-256 digest of a plaintext token; the only form that reaches storage.
#[must_use]
pub fn hash_token(plain_text: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(plain_text.as_bytes());
    hasher.finalize().to_vec()
}

/// Structural check done before any lookup: exact length, base32 alphabet.
#[must_use]
pub fn valid_plain_text(plain_text: &str) -> bool {
    plain_text.len() == TOKEN_LENGTH
        && plain_text
            .bytes()
            .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b))
}

#[derive(Clone)]
pub struct TokenStore {
    repo: Arc<dyn TokenRepository>,
    clock: Arc<dyn Clock>,
}

impl TokenStore {
    #[must_use]
    pub fn new(repo: Arc<dyn TokenRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Generate and persist a token; the caller only sees tokens that were stored.
    ///
    /// # Errors
    /// Returns `StoreError::Fault` if randomness fails, or the repository error if persisting fails.
    #[instrument(skip(self))]
    pub async fn generate(
        &self,
        user_id: i64,
        ttl: Duration,
        scope: Scope,
    ) -> Result<Token, StoreError> {
        let token = generate_token(user_id, ttl, scope, self.clock.now())?;
        self.repo.insert_token(&token).await?;
        Ok(token)
    }

    /// Remove every token of `scope` owned by `user_id`.
    ///
    /// # Errors
    /// Returns the repository error if the delete fails.
    #[instrument(skip(self))]
    pub async fn delete_all_for_user(&self, user_id: i64, scope: Scope) -> Result<(), StoreError> {
        self.repo.delete_tokens_for_user(user_id, scope).await
    }

    /// Resolve a presented plaintext token to its owner.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` for malformed, unknown, or expired tokens,
    /// and the repository error for store failures.
    #[instrument(skip(self, plain_text))]
    pub async fn resolve_principal(&self, plain_text: &str, scope: Scope) -> Result<User, StoreError> {
        if !valid_plain_text(plain_text) {
            return Err(StoreError::NotFound);
        }
        let hash = hash_token(plain_text);
        self.repo
            .find_user_by_token_hash(&hash, scope, self.clock.now())
            .await
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
