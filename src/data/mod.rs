//! Domain records and the persistence contracts behind them.
//!
//! Handlers and middleware only talk to the repository traits defined here.
//! [`PgStore`] backs them with Postgres; [`MemoryStore`] backs them with
//! process memory for tests and the `--in-memory` development mode.

pub mod memory;
pub mod movies;
pub mod permissions;
pub mod postgres;
pub mod tokens;
pub mod users;
pub mod validator;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};

pub use memory::MemoryStore;
pub use movies::{Movie, MovieInput};
pub use permissions::Permissions;
pub use postgres::PgStore;
pub use tokens::{Scope, Token, TokenStore};
pub use users::{NewUser, Principal, User};
pub use validator::Validator;

/// Deadline applied to every persistence call.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("edit conflict")]
    EditConflict,
    #[error("duplicate email")]
    DuplicateEmail,
    #[error("store call exceeded its {0:?} deadline")]
    Timeout(Duration),
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

/// Run a store call under [`QUERY_TIMEOUT`].
///
/// # Errors
/// Returns `StoreError::Timeout` when the deadline expires, otherwise the call's own result.
pub async fn with_deadline<T, F>(call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(QUERY_TIMEOUT, call).await {
        Ok(result) => result,
        Err(_elapsed) => Err(StoreError::Timeout(QUERY_TIMEOUT)),
    }
}

#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn insert_token(&self, token: &Token) -> Result<(), StoreError>;

    /// Idempotent: deleting when nothing matches is not an error.
    async fn delete_tokens_for_user(&self, user_id: i64, scope: Scope) -> Result<(), StoreError>;

    /// Owner of a token whose hash and scope match and whose expiry is after `now`.
    async fn find_user_by_token_hash(
        &self,
        hash: &[u8],
        scope: Scope,
        now: DateTime<Utc>,
    ) -> Result<User, StoreError>;
}

#[async_trait]
pub trait PermissionRepository: Send + Sync {
    async fn permissions_for_user(&self, user_id: i64) -> Result<Permissions, StoreError>;

    async fn add_permission_for_user(&self, user_id: i64, code: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn insert(&self, user: &NewUser) -> Result<User, StoreError>;

    async fn get_by_email(&self, email: &str) -> Result<User, StoreError>;

    /// Persist `user`; fails with `EditConflict` when its `version` is stale.
    async fn update(&self, user: &User) -> Result<User, StoreError>;
}

#[async_trait]
pub trait MovieRepository: Send + Sync {
    async fn insert(&self, movie: &MovieInput) -> Result<Movie, StoreError>;

    async fn get(&self, id: i64) -> Result<Movie, StoreError>;

    async fn list(&self) -> Result<Vec<Movie>, StoreError>;

    async fn update(&self, movie: &Movie) -> Result<Movie, StoreError>;

    async fn delete(&self, id: i64) -> Result<(), StoreError>;
}

/// Repository handles shared by every request.
#[derive(Clone)]
pub struct Models {
    pub users: Arc<dyn UserRepository>,
    pub tokens: TokenStore,
    pub permissions: Arc<dyn PermissionRepository>,
    pub movies: Arc<dyn MovieRepository>,
}

impl Models {
    #[must_use]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            users: store.clone(),
            tokens: TokenStore::new(store.clone(), Arc::new(SystemClock)),
            permissions: store.clone(),
            movies: store,
        }
    }

    #[must_use]
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        Self {
            users: store.clone(),
            tokens: TokenStore::new(store.clone(), clock),
            permissions: store.clone(),
            movies: store,
        }
    }
}

impl std::fmt::Debug for Models {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Models")
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn with_deadline_times_out_slow_calls() {
        let result: Result<(), StoreError> =
            with_deadline(std::future::pending::<Result<(), StoreError>>()).await;
        assert!(matches!(result, Err(StoreError::Timeout(d)) if d == QUERY_TIMEOUT));
    }

    #[tokio::test]
    async fn with_deadline_passes_results_through() {
        let result = with_deadline(async { Err::<(), _>(StoreError::NotFound) }).await;
        assert!(matches!(result, Err(StoreError::NotFound)));

        let result = with_deadline(async { Ok::<_, StoreError>(7) }).await;
        assert!(matches!(result, Ok(7)));
    }
}
