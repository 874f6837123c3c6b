use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::api::middleware::LimiterConfig;

pub const ARG_LIMITER_RPS: &str = "limiter-rps";
pub const ARG_LIMITER_BURST: &str = "limiter-burst";
pub const ARG_LIMITER_DISABLED: &str = "limiter-disabled";
pub const ARG_LIMITER_TRUST_PROXY: &str = "limiter-trust-proxy";

fn positive_rps(value: &str) -> Result<f64, String> {
    match value.parse::<f64>() {
        Ok(rps) if rps.is_finite() && rps > 0.0 => Ok(rps),
        _ => Err(format!("{value} is not a positive number")),
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    pub config: LimiterConfig,
}

impl Options {
    /// Parse limiter arguments from matches; clap has already range-checked them.
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let defaults = LimiterConfig::default();
        let rps = matches
            .get_one::<f64>(ARG_LIMITER_RPS)
            .copied()
            .unwrap_or(defaults.rps());
        let burst = matches
            .get_one::<u32>(ARG_LIMITER_BURST)
            .copied()
            .unwrap_or(defaults.burst());

        Self {
            config: LimiterConfig::new()
                .with_enabled(!matches.get_flag(ARG_LIMITER_DISABLED))
                .with_rps(rps)
                .with_burst(burst)
                .with_trust_proxy(matches.get_flag(ARG_LIMITER_TRUST_PROXY)),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LIMITER_RPS)
                .long(ARG_LIMITER_RPS)
                .help("Tokens added to each client bucket per second")
                .default_value("2")
                .env("SUNRISE_LIMITER_RPS")
                .value_parser(positive_rps),
        )
        .arg(
            Arg::new(ARG_LIMITER_BURST)
                .long(ARG_LIMITER_BURST)
                .help("Maximum tokens a client bucket holds")
                .default_value("4")
                .env("SUNRISE_LIMITER_BURST")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_LIMITER_DISABLED)
                .long(ARG_LIMITER_DISABLED)
                .help("Admit every request without rate limiting")
                .env("SUNRISE_LIMITER_DISABLED")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_LIMITER_TRUST_PROXY)
                .long(ARG_LIMITER_TRUST_PROXY)
                .help("Key clients by X-Forwarded-For / X-Real-IP when present")
                .env("SUNRISE_LIMITER_TRUST_PROXY")
                .action(ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 4] = [
        "SUNRISE_LIMITER_RPS",
        "SUNRISE_LIMITER_BURST",
        "SUNRISE_LIMITER_DISABLED",
        "SUNRISE_LIMITER_TRUST_PROXY",
    ];

    #[test]
    fn defaults() {
        temp_env::with_vars_unset(VARS, || {
            let matches = with_args(Command::new("sunrise")).get_matches_from(vec!["sunrise"]);
            let config = Options::parse(&matches).config;
            assert!(config.enabled());
            assert!(!config.trust_proxy());
            assert!((config.rps() - 2.0).abs() < f64::EPSILON);
            assert_eq!(config.burst(), 4);
        });
    }

    #[test]
    fn flags_and_env() {
        temp_env::with_vars(
            [
                ("SUNRISE_LIMITER_RPS", Some("0.5")),
                ("SUNRISE_LIMITER_BURST", None),
                ("SUNRISE_LIMITER_DISABLED", None),
                ("SUNRISE_LIMITER_TRUST_PROXY", None),
            ],
            || {
                let matches = with_args(Command::new("sunrise")).get_matches_from(vec![
                    "sunrise",
                    "--limiter-burst",
                    "10",
                    "--limiter-disabled",
                    "--limiter-trust-proxy",
                ]);
                let config = Options::parse(&matches).config;
                assert!(!config.enabled());
                assert!(config.trust_proxy());
                assert!((config.rps() - 0.5).abs() < f64::EPSILON);
                assert_eq!(config.burst(), 10);
            },
        );
    }

    #[test]
    fn rejects_non_positive_rates() {
        temp_env::with_vars_unset(VARS, || {
            for bad in ["0", "-1", "fast", "NaN"] {
                let result = with_args(Command::new("sunrise"))
                    .try_get_matches_from(vec!["sunrise", "--limiter-rps", bad]);
                assert!(result.is_err(), "{bad} accepted");
            }
        });
    }
}
