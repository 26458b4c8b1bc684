use crate::cli::actions::{server::Args, Action};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(4100);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .filter(|dsn| !dsn.trim().is_empty());

    let jwt_secret = matches
        .get_one::<String>("jwt-secret")
        .cloned()
        .filter(|secret| !secret.is_empty())
        .map(SecretString::from)
        .context("missing required argument: --jwt-secret")?;

    let token_ttl_seconds = matches
        .get_one::<i64>("token-ttl")
        .copied()
        .unwrap_or(crate::token::DEFAULT_TOKEN_TTL_SECONDS);

    let allowed_origins = matches
        .get_many::<String>("allowed-origin")
        .map(|values| {
            values
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(Action::Server(Args {
        port,
        dsn,
        jwt_secret,
        token_ttl_seconds,
        cookie_secure: matches.get_flag("cookie-secure"),
        cookie_domain: matches.get_one::<String>("cookie-domain").cloned(),
        bearer_only: matches.get_flag("bearer-only"),
        allowed_origins,
    }))
}
