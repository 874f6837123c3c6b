use anyhow::Result;
use axum::http::HeaderValue;
use clap::{Arg, ArgMatches, Command};

use crate::api::origin_header;

pub const ARG_CORS_TRUSTED_ORIGINS: &str = "cors-trusted-origins";

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub trusted_origins: Vec<HeaderValue>,
}

impl Options {
    /// Parse trusted origins; each is reduced to `scheme://host[:port]`.
    ///
    /// # Errors
    /// Returns an error if any origin is not an absolute URL with a host.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let trusted_origins = matches
            .get_many::<String>(ARG_CORS_TRUSTED_ORIGINS)
            .into_iter()
            .flatten()
            .map(|origin| origin.trim())
            .filter(|origin| !origin.is_empty())
            .map(origin_header)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { trusted_origins })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_CORS_TRUSTED_ORIGINS)
            .long(ARG_CORS_TRUSTED_ORIGINS)
            .help("Origins allowed to make cross-origin requests (comma separated)")
            .env("SUNRISE_CORS_TRUSTED_ORIGINS")
            .value_delimiter(','),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_origins_by_default() {
        temp_env::with_var_unset("SUNRISE_CORS_TRUSTED_ORIGINS", || {
            let matches = with_args(Command::new("sunrise")).get_matches_from(vec!["sunrise"]);
            assert!(Options::parse(&matches).unwrap().trusted_origins.is_empty());
        });
    }

    #[test]
    fn comma_separated_origins_from_env() {
        temp_env::with_var(
            "SUNRISE_CORS_TRUSTED_ORIGINS",
            Some("https://app.example.com/,http://localhost:3000"),
            || {
                let matches =
                    with_args(Command::new("sunrise")).get_matches_from(vec!["sunrise"]);
                let origins = Options::parse(&matches).unwrap().trusted_origins;
                assert_eq!(origins, vec!["https://app.example.com", "http://localhost:3000"]);
            },
        );
    }

    #[test]
    fn bad_origin_is_an_error() {
        temp_env::with_var_unset("SUNRISE_CORS_TRUSTED_ORIGINS", || {
            let matches = with_args(Command::new("sunrise")).get_matches_from(vec![
                "sunrise",
                "--cors-trusted-origins",
                "nope",
            ]);
            assert!(Options::parse(&matches).is_err());
        });
    }
}
