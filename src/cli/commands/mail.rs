use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;
use url::Url;

use crate::api::email::MailerConfig;

pub const ARG_MAIL_WEBHOOK_URL: &str = "mail-webhook-url";
pub const ARG_MAIL_SENDER: &str = "mail-sender";
pub const ARG_MAIL_MAX_ATTEMPTS: &str = "mail-max-attempts";
pub const ARG_MAIL_RETRY_DELAY_MS: &str = "mail-retry-delay-ms";

#[derive(Debug, Clone)]
pub struct Options {
    /// Relay endpoint; `None` logs messages instead of sending them.
    pub webhook_url: Option<Url>,
    pub config: MailerConfig,
}

impl Options {
    /// Parse mail arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the webhook URL is not a valid http(s) URL.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let webhook_url = matches
            .get_one::<String>(ARG_MAIL_WEBHOOK_URL)
            .map(|raw| raw.trim())
            .filter(|raw| !raw.is_empty())
            .map(|raw| -> anyhow::Result<Url> {
                let url = Url::parse(raw)
                    .with_context(|| format!("invalid --{ARG_MAIL_WEBHOOK_URL}: {raw}"))?;
                anyhow::ensure!(
                    matches!(url.scheme(), "http" | "https"),
                    "--{ARG_MAIL_WEBHOOK_URL} must use http or https"
                );
                Ok(url)
            })
            .transpose()?;

        let mut config = MailerConfig::new();
        if let Some(sender) = matches.get_one::<String>(ARG_MAIL_SENDER) {
            config = config.with_sender(sender.clone());
        }
        if let Some(attempts) = matches.get_one::<u32>(ARG_MAIL_MAX_ATTEMPTS) {
            config = config.with_max_attempts(*attempts);
        }
        if let Some(delay) = matches.get_one::<u64>(ARG_MAIL_RETRY_DELAY_MS) {
            config = config.with_retry_delay(Duration::from_millis(*delay));
        }

        Ok(Self {
            webhook_url,
            config: config.normalize(),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MAIL_WEBHOOK_URL)
                .long(ARG_MAIL_WEBHOOK_URL)
                .help("HTTP relay that delivers outgoing email (default: log only)")
                .env("SUNRISE_MAIL_WEBHOOK_URL"),
        )
        .arg(
            Arg::new(ARG_MAIL_SENDER)
                .long(ARG_MAIL_SENDER)
                .help("From address for outgoing email")
                .default_value("Sunrise <no-reply@sunrise.dev>")
                .env("SUNRISE_MAIL_SENDER"),
        )
        .arg(
            Arg::new(ARG_MAIL_MAX_ATTEMPTS)
                .long(ARG_MAIL_MAX_ATTEMPTS)
                .help("Delivery attempts per message")
                .default_value("4")
                .env("SUNRISE_MAIL_MAX_ATTEMPTS")
                .value_parser(clap::value_parser!(u32).range(1..=20)),
        )
        .arg(
            Arg::new(ARG_MAIL_RETRY_DELAY_MS)
                .long(ARG_MAIL_RETRY_DELAY_MS)
                .help("Pause between delivery attempts, in milliseconds")
                .default_value("500")
                .env("SUNRISE_MAIL_RETRY_DELAY_MS")
                .value_parser(clap::value_parser!(u64)),
        )
}
