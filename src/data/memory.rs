//! Process-local store used by tests and `--in-memory` runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    Movie, MovieInput, MovieRepository, NewUser, PermissionRepository, Permissions, Scope,
    StoreError, Token, TokenRepository, User, UserRepository,
};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Default)]
struct State {
    next_user_id: i64,
    next_movie_id: i64,
    users: BTreeMap<i64, User>,
    /// Keyed by token hash.
    tokens: HashMap<Vec<u8>, Token>,
    grants: HashMap<i64, HashSet<String>>,
    movies: BTreeMap<i64, Movie>,
}

#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store whose token pruning follows `clock`; share it with the `TokenStore`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn insert_token(&self, token: &Token) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.state();
        if !state.users.contains_key(&token.user_id) {
            return Err(StoreError::Fault(anyhow::anyhow!(
                "token references unknown user {}",
                token.user_id
            )));
        }
        // Expired tokens can never resolve again.
        state.tokens.retain(|_, stored| stored.expiry > now);
        state.tokens.insert(token.hash.clone(), token.clone());
        Ok(())
    }

    async fn delete_tokens_for_user(&self, user_id: i64, scope: Scope) -> Result<(), StoreError> {
        self.state()
            .tokens
            .retain(|_, token| !(token.user_id == user_id && token.scope == scope));
        Ok(())
    }

    async fn find_user_by_token_hash(
        &self,
        hash: &[u8],
        scope: Scope,
        now: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        let mut state = self.state();
        let token = state.tokens.get(hash).ok_or(StoreError::NotFound)?;
        if token.expiry <= now {
            state.tokens.remove(hash);
            return Err(StoreError::NotFound);
        }
        if token.scope != scope {
            return Err(StoreError::NotFound);
        }
        let user_id = token.user_id;
        state
            .users
            .get(&user_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl PermissionRepository for MemoryStore {
    async fn permissions_for_user(&self, user_id: i64) -> Result<Permissions, StoreError> {
        Ok(self
            .state()
            .grants
            .get(&user_id)
            .map(|codes| codes.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_permission_for_user(&self, user_id: i64, code: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        if !state.users.contains_key(&user_id) {
            return Err(StoreError::NotFound);
        }
        state
            .grants
            .entry(user_id)
            .or_default()
            .insert(code.to_string());
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn insert(&self, user: &NewUser) -> Result<User, StoreError> {
        let mut state = self.state();
        if state.users.values().any(|existing| existing.email == user.email) {
            return Err(StoreError::DuplicateEmail);
        }
        state.next_user_id += 1;
        let stored = User {
            id: state.next_user_id,
            created_at: Utc::now(),
            name: user.name.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            activated: false,
            version: 1,
        };
        state.users.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_by_email(&self, email: &str) -> Result<User, StoreError> {
        self.state()
            .users
            .values()
            .find(|user| user.email == email)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update(&self, user: &User) -> Result<User, StoreError> {
        let mut state = self.state();
        if state
            .users
            .values()
            .any(|existing| existing.id != user.id && existing.email == user.email)
        {
            return Err(StoreError::DuplicateEmail);
        }
        let stored = state
            .users
            .get_mut(&user.id)
            .filter(|stored| stored.version == user.version)
            .ok_or(StoreError::EditConflict)?;
        *stored = User {
            version: user.version + 1,
            ..user.clone()
        };
        Ok(stored.clone())
    }
}

#[async_trait]
impl MovieRepository for MemoryStore {
    async fn insert(&self, movie: &MovieInput) -> Result<Movie, StoreError> {
        let mut state = self.state();
        state.next_movie_id += 1;
        let stored = Movie {
            id: state.next_movie_id,
            created_at: Utc::now(),
            title: movie.title.clone(),
            year: movie.year,
            runtime: movie.runtime,
            genres: movie.genres.clone(),
            version: 1,
        };
        state.movies.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: i64) -> Result<Movie, StoreError> {
        self.state()
            .movies
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self) -> Result<Vec<Movie>, StoreError> {
        Ok(self.state().movies.values().cloned().collect())
    }

    async fn update(&self, movie: &Movie) -> Result<Movie, StoreError> {
        let mut state = self.state();
        let stored = state
            .movies
            .get_mut(&movie.id)
            .filter(|stored| stored.version == movie.version)
            .ok_or(StoreError::EditConflict)?;
        *stored = Movie {
            version: movie.version + 1,
            ..movie.clone()
        };
        Ok(stored.clone())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.state()
            .movies
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Alice".to_string(),
            email: email.to_string(),
            password_hash: String::new(),
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemoryStore::new();
        UserRepository::insert(&store, &new_user("a@example.com"))
            .await
            .unwrap();
        let result = UserRepository::insert(&store, &new_user("a@example.com")).await;
        assert!(matches!(result, Err(StoreError::DuplicateEmail)));
    }

    #[tokio::test]
    async fn stale_user_version_conflicts() {
        let store = MemoryStore::new();
        let user = UserRepository::insert(&store, &new_user("a@example.com"))
            .await
            .unwrap();
        let mut first = user.clone();
        first.activated = true;
        let updated = UserRepository::update(&store, &first).await.unwrap();
        assert_eq!(updated.version, user.version + 1);

        let result = UserRepository::update(&store, &user).await;
        assert!(matches!(result, Err(StoreError::EditConflict)));
    }

    #[tokio::test]
    async fn grants_accumulate_per_user() {
        let store = MemoryStore::new();
        let user = UserRepository::insert(&store, &new_user("a@example.com"))
            .await
            .unwrap();
        store.add_permission_for_user(user.id, "movies:read").await.unwrap();
        store.add_permission_for_user(user.id, "movies:read").await.unwrap();
        store.add_permission_for_user(user.id, "movies:write").await.unwrap();

        let permissions = store.permissions_for_user(user.id).await.unwrap();
        assert_eq!(permissions.len(), 2);
        assert!(permissions.includes("movies:write"));

        let missing = store.add_permission_for_user(99, "movies:read").await;
        assert!(matches!(missing, Err(StoreError::NotFound)));
    }

    fn token(user_id: i64, hash: u8, expiry: DateTime<Utc>) -> Token {
        Token {
            plain_text: String::new(),
            hash: vec![hash; 32],
            user_id,
            expiry,
            scope: Scope::Authentication,
        }
    }

    #[tokio::test]
    async fn expired_tokens_are_dropped() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = MemoryStore::with_clock(clock.clone());
        let user = UserRepository::insert(&store, &new_user("a@example.com"))
            .await
            .unwrap();

        let hour = chrono::Duration::hours(1);
        store.insert_token(&token(user.id, 1, start + hour)).await.unwrap();
        store.insert_token(&token(user.id, 2, start + hour * 3)).await.unwrap();
        assert_eq!(store.state().tokens.len(), 2);

        // A lookup past expiry evicts the token it hit.
        let later = start + hour * 2;
        let result = store
            .find_user_by_token_hash(&[1; 32], Scope::Authentication, later)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound)));
        assert_eq!(store.state().tokens.len(), 1);

        // Inserting prunes everything already expired by the store clock.
        store.insert_token(&token(user.id, 3, start + hour * 5)).await.unwrap();
        clock.set(start + hour * 4);
        store.insert_token(&token(user.id, 4, start + hour * 5)).await.unwrap();
        let mut left: Vec<u8> = store.state().tokens.keys().map(|hash| hash[0]).collect();
        left.sort_unstable();
        assert_eq!(left, vec![3, 4]);

        let found = store
            .find_user_by_token_hash(&[4; 32], Scope::Authentication, start + hour * 4)
            .await
            .unwrap();
        assert_eq!(found.id, user.id);
        let wrong_scope = store
            .find_user_by_token_hash(&[4; 32], Scope::Activation, start + hour * 4)
            .await;
        assert!(matches!(wrong_scope, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn movie_delete_then_get_is_not_found() {
        let store = MemoryStore::new();
        let movie = MovieRepository::insert(
            &store,
            &MovieInput {
                title: "Heat".to_string(),
                year: 1995,
                runtime: 170,
                genres: vec!["crime".to_string()],
            },
        )
        .await
        .unwrap();
        MovieRepository::delete(&store, movie.id).await.unwrap();
        assert!(matches!(
            MovieRepository::get(&store, movie.id).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            MovieRepository::delete(&store, movie.id).await,
            Err(StoreError::NotFound)
        ));
    }
}
