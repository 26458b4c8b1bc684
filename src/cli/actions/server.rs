use crate::{
    api::{self, AuthConfig, AuthState},
    directory::{MemoryDirectory, PgDirectory, UserDirectory},
};
use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub jwt_secret: SecretString,
    pub token_ttl_seconds: i64,
    pub cookie_secure: bool,
    pub cookie_domain: Option<String>,
    pub bearer_only: bool,
    pub allowed_origins: Vec<String>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let directory: Arc<dyn UserDirectory> = match &args.dsn {
        Some(dsn) => Arc::new(PgDirectory::connect(dsn).await?),
        None => {
            warn!("No --dsn given, serving the built-in seeded users");
            Arc::new(MemoryDirectory::seeded())
        }
    };

    let auth_config = AuthConfig::new()
        .with_token_ttl_seconds(args.token_ttl_seconds)
        .with_cookie_enabled(!args.bearer_only)
        .with_cookie_secure(args.cookie_secure)
        .with_cookie_domain(args.cookie_domain)
        .with_allowed_origins(args.allowed_origins);

    let auth_state = Arc::new(AuthState::new(auth_config, &args.jwt_secret));

    api::new(args.port, auth_state, directory).await
}

fn log_startup_args(args: &Args) {
    info!(
        port = args.port,
        directory = if args.dsn.is_some() { "postgresql" } else { "memory" },
        token_ttl_seconds = args.token_ttl_seconds,
        cookie_enabled = !args.bearer_only,
        cookie_secure = args.cookie_secure,
        cookie_domain = args.cookie_domain.as_deref().unwrap_or("-"),
        allowed_origins = %args.allowed_origins.join(","),
        "Starting large-event-auth"
    );
}
