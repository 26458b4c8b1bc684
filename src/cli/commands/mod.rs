pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ArgAction, ColorChoice, Command,
};

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("large-event-auth")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("4100")
                .env("LARGE_EVENT_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .long_help(
                    "Postgres connection string for the user directory. Without it the server uses the built-in seeded users.",
                )
                .env("LARGE_EVENT_DSN"),
        )
        .arg(
            Arg::new("jwt-secret")
                .long("jwt-secret")
                .help("Shared secret used to sign and verify auth tokens")
                .env("JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("token-ttl")
                .long("token-ttl")
                .help("Token and cookie lifetime in seconds")
                .default_value("86400")
                .env("LARGE_EVENT_TOKEN_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("cookie-secure")
                .long("cookie-secure")
                .help("Mark the auth cookie Secure (production)")
                .env("LARGE_EVENT_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("cookie-domain")
                .long("cookie-domain")
                .help("Domain attribute of the auth cookie, to share it across subdomains")
                .env("LARGE_EVENT_COOKIE_DOMAIN"),
        )
        .arg(
            Arg::new("bearer-only")
                .long("bearer-only")
                .help("Do not set the auth cookie on login")
                .env("LARGE_EVENT_BEARER_ONLY")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("allowed-origin")
                .long("allowed-origin")
                .help("Origin allowed to call with credentials, e.g. a team portal (repeatable or comma separated)")
                .env("LARGE_EVENT_ALLOWED_ORIGINS")
                .value_delimiter(',')
                .action(ArgAction::Append),
        );

    logging::with_args(command)
}
