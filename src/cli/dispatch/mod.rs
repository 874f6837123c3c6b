//! Map validated CLI arguments to the action the binary runs.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{cors, database, limiter, mail, ARG_ENV, ARG_PORT};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(4000);
    let environment = matches
        .get_one::<String>(ARG_ENV)
        .cloned()
        .unwrap_or_else(|| "development".to_string());

    let database = database::Options::parse(matches)?;
    let limiter = limiter::Options::parse(matches);
    let mail = mail::Options::parse(matches)?;
    let cors = cors::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        environment,
        backend: database.backend,
        limiter: limiter.config,
        mail_webhook_url: mail.webhook_url,
        mailer: mail.config,
        trusted_origins: cors.trusted_origins,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::database::Backend;

    const VARS: [&str; 14] = [
        "SUNRISE_PORT",
        "SUNRISE_ENV",
        "SUNRISE_DSN",
        "SUNRISE_IN_MEMORY",
        "SUNRISE_DB_MAX_CONNECTIONS",
        "SUNRISE_LIMITER_RPS",
        "SUNRISE_LIMITER_BURST",
        "SUNRISE_LIMITER_DISABLED",
        "SUNRISE_LIMITER_TRUST_PROXY",
        "SUNRISE_MAIL_WEBHOOK_URL",
        "SUNRISE_MAIL_SENDER",
        "SUNRISE_MAIL_MAX_ATTEMPTS",
        "SUNRISE_MAIL_RETRY_DELAY_MS",
        "SUNRISE_CORS_TRUSTED_ORIGINS",
    ];

    #[test]
    fn dsn_required_without_in_memory() {
        temp_env::with_vars_unset(VARS, || {
            let matches = crate::cli::commands::new().get_matches_from(vec!["sunrise"]);
            let result = handler(&matches);
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(err
                    .to_string()
                    .contains("missing required argument: --dsn"));
            }
        });
    }

    #[test]
    fn server_args_from_env() {
        let set = [
            ("SUNRISE_PORT", "9000"),
            ("SUNRISE_ENV", "production"),
            ("SUNRISE_DSN", "postgres://sunrise@localhost/sunrise"),
            ("SUNRISE_LIMITER_BURST", "8"),
            ("SUNRISE_CORS_TRUSTED_ORIGINS", "https://sunrise.example.com"),
        ];
        let vars: Vec<(&str, Option<&str>)> = VARS
            .iter()
            .map(|key| {
                let value = set.iter().find(|(k, _)| k == key).map(|(_, v)| *v);
                (*key, value)
            })
            .collect();

        temp_env::with_vars(vars, || {
            let matches = crate::cli::commands::new().get_matches_from(vec!["sunrise"]);
            let Ok(Action::Server(args)) = handler(&matches) else {
                panic!("expected server action");
            };
            assert_eq!(args.port, 9000);
            assert_eq!(args.environment, "production");
            assert!(matches!(
                args.backend,
                Backend::Postgres {
                    max_connections: 25,
                    ..
                }
            ));
            assert_eq!(args.limiter.burst(), 8);
            assert!(args.limiter.enabled());
            assert!(args.mail_webhook_url.is_none());
            assert_eq!(args.trusted_origins, vec!["https://sunrise.example.com"]);
        });
    }

    #[test]
    fn in_memory_development_mode() {
        temp_env::with_vars_unset(VARS, || {
            let matches = crate::cli::commands::new().get_matches_from(vec![
                "sunrise",
                "--in-memory",
                "--limiter-disabled",
            ]);
            let Ok(Action::Server(args)) = handler(&matches) else {
                panic!("expected server action");
            };
            assert_eq!(args.port, 4000);
            assert_eq!(args.environment, "development");
            assert!(matches!(args.backend, Backend::Memory));
            assert!(!args.limiter.enabled());
        });
    }
}
