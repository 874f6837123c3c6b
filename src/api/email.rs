//! Outbound mail and the background executor that carries it.
//!
//! Handlers never wait on delivery. They hand an [`EmailMessage`] to
//! [`Mailer::send_in_background`], which runs the retrying delivery on
//! [`BackgroundTasks`]. A failed or panicking task is logged and dropped; the
//! request that queued it has already been answered.
//!
//! The default sender for local dev is `LogEmailSender`, which logs and returns `Ok(())`.
//! `WebhookEmailSender` posts the message as JSON to a mail relay.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{task::JoinSet, time::sleep};
use tracing::{error, info, warn, Instrument};
use url::Url;

use crate::APP_USER_AGENT;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload: serde_json::Value,
}

/// Email delivery abstraction used by the mailer.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error so the mailer can retry.
    async fn send(&self, from: &str, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, from: &str, message: &EmailMessage) -> Result<()> {
        info!(
            from = %from,
            to_email = %message.to_email,
            template = %message.template,
            payload = %message.payload,
            "email send stub"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    to: &'a str,
    template: &'a str,
    payload: &'a serde_json::Value,
}

/// Sender that hands messages to an HTTP mail relay.
#[derive(Clone, Debug)]
pub struct WebhookEmailSender {
    client: reqwest::Client,
    url: Url,
}

impl WebhookEmailSender {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build mail relay client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl EmailSender for WebhookEmailSender {
    async fn send(&self, from: &str, message: &EmailMessage) -> Result<()> {
        let body = RelayRequest {
            from,
            to: &message.to_email,
            template: &message.template,
            payload: &message.payload,
        };
        self.client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .context("mail relay request failed")?
            .error_for_status()
            .context("mail relay rejected message")?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct MailerConfig {
    sender: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl MailerConfig {
    /// Default: 4 attempts, 500ms apart.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sender: "Sunrise <no-reply@sunrise.dev>".to_string(),
            max_attempts: 4,
            retry_delay: Duration::from_millis(500),
        }
    }

    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        Self {
            max_attempts: self.max_attempts.max(1),
            ..self
        }
    }

    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct Mailer {
    sender: Arc<dyn EmailSender>,
    config: MailerConfig,
}

impl Mailer {
    #[must_use]
    pub fn new(sender: Arc<dyn EmailSender>, config: MailerConfig) -> Self {
        Self {
            sender,
            config: config.normalize(),
        }
    }

    /// Try delivery up to `max_attempts` times with a fixed pause between tries.
    ///
    /// # Errors
    /// Returns the last delivery error once every attempt has failed.
    pub async fn deliver(&self, message: &EmailMessage) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.sender.send(self.config.sender(), message).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt >= self.config.max_attempts() => {
                    return Err(err).with_context(|| {
                        format!("email delivery failed after {attempt} attempts")
                    });
                }
                Err(err) => {
                    warn!(attempt, template = %message.template, "email delivery failed: {err:#}");
                    attempt += 1;
                    sleep(self.config.retry_delay()).await;
                }
            }
        }
    }

    pub fn send_in_background(&self, tasks: &BackgroundTasks, message: EmailMessage) {
        let mailer = self.clone();
        tasks.spawn("email", async move { mailer.deliver(&message).await });
    }
}

impl std::fmt::Debug for Mailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Tracks fire-and-forget work so shutdown can wait for it.
#[derive(Clone, Debug, Default)]
pub struct BackgroundTasks {
    set: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `task` in the background; its error or panic is logged, never returned.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let span = tracing::info_span!("background", task = name);
        let mut set = self.set();
        reap(&mut set);
        set.spawn(
            async move {
                if let Err(err) = task.await {
                    error!("background task failed: {err:#}");
                }
            }
            .instrument(span),
        );
    }

    /// Number of tasks that have not finished yet.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut set = self.set();
        reap(&mut set);
        set.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait up to `timeout` for outstanding tasks. Returns `false` if some were still running.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut set = std::mem::take(&mut *self.set());
        let drained = tokio::time::timeout(timeout, async {
            while let Some(result) = set.join_next().await {
                log_join(result);
            }
        })
        .await
        .is_ok();
        if !drained {
            warn!(remaining = set.len(), "background tasks still running at shutdown");
        }
        drained
    }
}

fn reap(set: &mut JoinSet<()>) {
    while let Some(result) = set.try_join_next() {
        log_join(result);
    }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        if err.is_panic() {
            error!("background task panicked: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySender {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl EmailSender for FlakySender {
        async fn send(&self, _from: &str, _message: &EmailMessage) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                anyhow::bail!("relay unavailable");
            }
            Ok(())
        }
    }

    fn message() -> EmailMessage {
        EmailMessage {
            to_email: "alice@example.com".to_string(),
            template: "user_welcome".to_string(),
            payload: serde_json::json!({ "userID": 1 }),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_retries_until_success() {
        let sender = Arc::new(FlakySender {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let mailer = Mailer::new(sender.clone(), MailerConfig::new());
        mailer.deliver(&message()).await.unwrap();
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_gives_up_after_max_attempts() {
        let sender = Arc::new(FlakySender {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let mailer = Mailer::new(sender.clone(), MailerConfig::new().with_max_attempts(4));
        assert!(mailer.deliver(&message()).await.is_err());
        assert_eq!(sender.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn normalize_keeps_at_least_one_attempt() {
        let config = MailerConfig::new().with_max_attempts(0).normalize();
        assert_eq!(config.max_attempts(), 1);
    }

    fn tasks_should_panic() -> bool {
        true
    }

    #[tokio::test]
    async fn background_failures_and_panics_are_contained() {
        let tasks = BackgroundTasks::new();
        tasks.spawn("fails", async { Err::<(), _>(anyhow::anyhow!("nope")) });
        tasks.spawn("panics", async {
            if tasks_should_panic() {
                panic!("task exploded");
            }
            Ok::<(), anyhow::Error>(())
        });
        tasks.spawn("succeeds", async { Ok::<(), anyhow::Error>(()) });
        assert!(tasks.wait(Duration::from_secs(5)).await);
        assert!(tasks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_on_stuck_tasks() {
        let tasks = BackgroundTasks::new();
        tasks.spawn("stuck", async {
            std::future::pending::<()>().await;
            Ok::<(), anyhow::Error>(())
        });
        assert_eq!(tasks.len(), 1);
        assert!(!tasks.wait(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn send_in_background_delivers() {
        let sender = Arc::new(FlakySender {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        let mailer = Mailer::new(sender.clone(), MailerConfig::new());
        let tasks = BackgroundTasks::new();
        mailer.send_in_background(&tasks, message());
        assert!(tasks.wait(Duration::from_secs(5)).await);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
    }
}
