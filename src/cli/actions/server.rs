use crate::{
    api::{
        self,
        email::{
            BackgroundTasks, EmailSender, LogEmailSender, Mailer, MailerConfig,
            WebhookEmailSender,
        },
        middleware::{LimiterConfig, RateLimiter},
        AppState,
    },
    cli::{commands::database::Backend, telemetry},
    clock::{Clock, SystemClock},
    data::Models,
};
use anyhow::{Context, Result};
use axum::http::HeaderValue;
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};
use url::Url;

const DB_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub environment: String,
    pub backend: Backend,
    pub limiter: LimiterConfig,
    pub mail_webhook_url: Option<Url>,
    pub mailer: MailerConfig,
    pub trusted_origins: Vec<HeaderValue>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store cannot be reached or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("args: {args:?}");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let models = connect(&args.backend, clock.clone()).await?;
    let mailer = Mailer::new(email_sender(args.mail_webhook_url)?, args.mailer);

    let state = AppState {
        models,
        mailer,
        tasks: BackgroundTasks::new(),
        limiter: Arc::new(RateLimiter::new(args.limiter, clock.clone())),
        clock,
        environment: args.environment,
    };

    let result = api::new(args.port, state, args.trusted_origins).await;
    telemetry::shutdown_tracer();
    result
}

async fn connect(backend: &Backend, clock: Arc<dyn Clock>) -> Result<Models> {
    match backend {
        Backend::Postgres {
            dsn,
            max_connections,
        } => {
            let pool = PgPoolOptions::new()
                .max_connections(*max_connections)
                .acquire_timeout(DB_ACQUIRE_TIMEOUT)
                .connect(dsn.expose_secret())
                .await
                .context("Failed to connect to database")?;

            sqlx::query("SELECT 1")
                .execute(&pool)
                .await
                .context("Failed to ping database")?;

            info!(max_connections, "database connection pool established");
            Ok(Models::postgres(pool))
        }
        Backend::Memory => {
            info!("using in-memory store; records are lost on exit");
            Ok(Models::in_memory(clock))
        }
    }
}

fn email_sender(webhook_url: Option<Url>) -> Result<Arc<dyn EmailSender>> {
    Ok(match webhook_url {
        Some(url) => {
            info!(relay = %url, "delivering email through webhook relay");
            Arc::new(WebhookEmailSender::new(url)?)
        }
        None => Arc::new(LogEmailSender),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::NewUser;

    #[tokio::test]
    async fn memory_backend_needs_no_database() {
        let models = connect(&Backend::Memory, Arc::new(SystemClock))
            .await
            .unwrap();
        let user = models
            .users
            .insert(&NewUser {
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap();
        assert!(models.users.get_by_email("ada@example.com").await.is_ok());
        assert!(!user.activated);
    }

    #[test]
    fn webhook_url_selects_relay_sender() {
        let url = Url::parse("https://relay.example.com/send").unwrap();
        assert!(email_sender(Some(url)).is_ok());
        assert!(email_sender(None).is_ok());
    }
}
