//! Postgres-backed repositories.
//!
//! Every statement runs inside a `db.query` span and under [`with_deadline`], so a
//! stalled connection surfaces as `StoreError::Timeout` instead of hanging the request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{Instrument, Span};

use super::{
    with_deadline, Movie, MovieInput, MovieRepository, NewUser, PermissionRepository,
    Permissions, Scope, StoreError, Token, TokenRepository, User, UserRepository,
};

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn query_span(operation: &'static str, statement: &'static str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn has_code(err: &sqlx::Error, code: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|c| c.as_ref() == code),
        _ => false,
    }
}

fn fault(err: sqlx::Error, what: &'static str) -> StoreError {
    StoreError::Fault(anyhow::Error::new(err).context(what))
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        created_at: row.get("created_at"),
        name: row.get("name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        activated: row.get("activated"),
        version: row.get("version"),
    }
}

fn movie_from_row(row: &PgRow) -> Movie {
    Movie {
        id: row.get("id"),
        created_at: row.get("created_at"),
        title: row.get("title"),
        year: row.get("year"),
        runtime: row.get("runtime"),
        genres: row.get("genres"),
        version: row.get("version"),
    }
}

#[async_trait]
impl TokenRepository for PgStore {
    async fn insert_token(&self, token: &Token) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO tokens (hash, user_id, expiry, scope)
            VALUES ($1, $2, $3, $4)
        ";
        with_deadline(async {
            sqlx::query(query)
                .bind(&token.hash)
                .bind(token.user_id)
                .bind(token.expiry)
                .bind(token.scope.as_str())
                .execute(&self.pool)
                .instrument(query_span("INSERT", query))
                .await
                .map_err(|err| fault(err, "failed to insert token"))?;
            Ok(())
        })
        .await
    }

    async fn delete_tokens_for_user(&self, user_id: i64, scope: Scope) -> Result<(), StoreError> {
        // Deleting nothing is fine.
        let query = "DELETE FROM tokens WHERE user_id = $1 AND scope = $2";
        with_deadline(async {
            sqlx::query(query)
                .bind(user_id)
                .bind(scope.as_str())
                .execute(&self.pool)
                .instrument(query_span("DELETE", query))
                .await
                .map_err(|err| fault(err, "failed to delete tokens"))?;
            Ok(())
        })
        .await
    }

    async fn find_user_by_token_hash(
        &self,
        hash: &[u8],
        scope: Scope,
        now: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        let query = r"
            SELECT users.id, users.created_at, users.name, users.email,
                   users.password_hash, users.activated, users.version
            FROM users
            INNER JOIN tokens ON users.id = tokens.user_id
            WHERE tokens.hash = $1
              AND tokens.scope = $2
              AND tokens.expiry > $3
            LIMIT 1
        ";
        with_deadline(async {
            let row = sqlx::query(query)
                .bind(hash)
                .bind(scope.as_str())
                .bind(now)
                .fetch_optional(&self.pool)
                .instrument(query_span("SELECT", query))
                .await
                .map_err(|err| fault(err, "failed to lookup token owner"))?;
            row.as_ref().map(user_from_row).ok_or(StoreError::NotFound)
        })
        .await
    }
}

#[async_trait]
impl PermissionRepository for PgStore {
    async fn permissions_for_user(&self, user_id: i64) -> Result<Permissions, StoreError> {
        let query = r"
            SELECT permissions.code
            FROM permissions
            INNER JOIN users_permissions ON users_permissions.permission_id = permissions.id
            WHERE users_permissions.user_id = $1
        ";
        with_deadline(async {
            let rows = sqlx::query(query)
                .bind(user_id)
                .fetch_all(&self.pool)
                .instrument(query_span("SELECT", query))
                .await
                .map_err(|err| fault(err, "failed to load permissions"))?;
            Ok(rows
                .iter()
                .map(|row| row.get::<String, _>("code"))
                .collect())
        })
        .await
    }

    async fn add_permission_for_user(&self, user_id: i64, code: &str) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO users_permissions (user_id, permission_id)
            SELECT $1, permissions.id FROM permissions WHERE permissions.code = $2
            ON CONFLICT DO NOTHING
        ";
        with_deadline(async {
            match sqlx::query(query)
                .bind(user_id)
                .bind(code)
                .execute(&self.pool)
                .instrument(query_span("INSERT", query))
                .await
            {
                Ok(_) => Ok(()),
                Err(err) if has_code(&err, FOREIGN_KEY_VIOLATION) => Err(StoreError::NotFound),
                Err(err) => Err(fault(err, "failed to grant permission")),
            }
        })
        .await
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn insert(&self, user: &NewUser) -> Result<User, StoreError> {
        let query = r"
            INSERT INTO users (name, email, password_hash, activated)
            VALUES ($1, $2, $3, FALSE)
            RETURNING id, created_at, name, email, password_hash, activated, version
        ";
        with_deadline(async {
            match sqlx::query(query)
                .bind(&user.name)
                .bind(&user.email)
                .bind(&user.password_hash)
                .fetch_one(&self.pool)
                .instrument(query_span("INSERT", query))
                .await
            {
                Ok(row) => Ok(user_from_row(&row)),
                Err(err) if has_code(&err, UNIQUE_VIOLATION) => Err(StoreError::DuplicateEmail),
                Err(err) => Err(fault(err, "failed to insert user")),
            }
        })
        .await
    }

    async fn get_by_email(&self, email: &str) -> Result<User, StoreError> {
        let query = r"
            SELECT id, created_at, name, email, password_hash, activated, version
            FROM users
            WHERE email = $1
        ";
        with_deadline(async {
            let row = sqlx::query(query)
                .bind(email)
                .fetch_optional(&self.pool)
                .instrument(query_span("SELECT", query))
                .await
                .map_err(|err| fault(err, "failed to lookup user"))?;
            row.as_ref().map(user_from_row).ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn update(&self, user: &User) -> Result<User, StoreError> {
        let query = r"
            UPDATE users
            SET name = $1, email = $2, password_hash = $3, activated = $4, version = version + 1
            WHERE id = $5 AND version = $6
            RETURNING id, created_at, name, email, password_hash, activated, version
        ";
        with_deadline(async {
            match sqlx::query(query)
                .bind(&user.name)
                .bind(&user.email)
                .bind(&user.password_hash)
                .bind(user.activated)
                .bind(user.id)
                .bind(user.version)
                .fetch_optional(&self.pool)
                .instrument(query_span("UPDATE", query))
                .await
            {
                Ok(Some(row)) => Ok(user_from_row(&row)),
                Ok(None) => Err(StoreError::EditConflict),
                Err(err) if has_code(&err, UNIQUE_VIOLATION) => Err(StoreError::DuplicateEmail),
                Err(err) => Err(fault(err, "failed to update user")),
            }
        })
        .await
    }
}

#[async_trait]
impl MovieRepository for PgStore {
    async fn insert(&self, movie: &MovieInput) -> Result<Movie, StoreError> {
        let query = r"
            INSERT INTO movies (title, year, runtime, genres)
            VALUES ($1, $2, $3, $4)
            RETURNING id, created_at, title, year, runtime, genres, version
        ";
        with_deadline(async {
            let row = sqlx::query(query)
                .bind(&movie.title)
                .bind(movie.year)
                .bind(movie.runtime)
                .bind(&movie.genres)
                .fetch_one(&self.pool)
                .instrument(query_span("INSERT", query))
                .await
                .map_err(|err| fault(err, "failed to insert movie"))?;
            Ok(movie_from_row(&row))
        })
        .await
    }

    async fn get(&self, id: i64) -> Result<Movie, StoreError> {
        let query = r"
            SELECT id, created_at, title, year, runtime, genres, version
            FROM movies
            WHERE id = $1
        ";
        with_deadline(async {
            let row = sqlx::query(query)
                .bind(id)
                .fetch_optional(&self.pool)
                .instrument(query_span("SELECT", query))
                .await
                .map_err(|err| fault(err, "failed to lookup movie"))?;
            row.as_ref().map(movie_from_row).ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<Movie>, StoreError> {
        let query = r"
            SELECT id, created_at, title, year, runtime, genres, version
            FROM movies
            ORDER BY id
        ";
        with_deadline(async {
            let rows = sqlx::query(query)
                .fetch_all(&self.pool)
                .instrument(query_span("SELECT", query))
                .await
                .map_err(|err| fault(err, "failed to list movies"))?;
            Ok(rows.iter().map(movie_from_row).collect())
        })
        .await
    }

    async fn update(&self, movie: &Movie) -> Result<Movie, StoreError> {
        let query = r"
            UPDATE movies
            SET title = $1, year = $2, runtime = $3, genres = $4, version = version + 1
            WHERE id = $5 AND version = $6
            RETURNING id, created_at, title, year, runtime, genres, version
        ";
        with_deadline(async {
            let row = sqlx::query(query)
                .bind(&movie.title)
                .bind(movie.year)
                .bind(movie.runtime)
                .bind(&movie.genres)
                .bind(movie.id)
                .bind(movie.version)
                .fetch_optional(&self.pool)
                .instrument(query_span("UPDATE", query))
                .await
                .map_err(|err| fault(err, "failed to update movie"))?;
            row.as_ref()
                .map(movie_from_row)
                .ok_or(StoreError::EditConflict)
        })
        .await
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let query = "DELETE FROM movies WHERE id = $1";
        with_deadline(async {
            let result = sqlx::query(query)
                .bind(id)
                .execute(&self.pool)
                .instrument(query_span("DELETE", query))
                .await
                .map_err(|err| fault(err, "failed to delete movie"))?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }
}
