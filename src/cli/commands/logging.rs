use clap::{builder::ValueParser, Arg, ArgAction, Command};

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_FORMAT: &str = "log-format";

const LEVEL_NAMES: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Accepts a level name or its index (`0` = error .. `4` = trace, `5` still traces).
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(|level: &str| -> std::result::Result<u8, String> {
        match level.parse::<u8>() {
            Ok(count) if count <= 5 => return Ok(count),
            Ok(_) => return Err(format!("log level out of range: {level}")),
            Err(_) => {}
        }
        LEVEL_NAMES
            .iter()
            .position(|name| name.eq_ignore_ascii_case(level))
            .and_then(|index| u8::try_from(index).ok())
            .ok_or_else(|| format!("unknown log level: {level}"))
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let verbosity = Arg::new(ARG_VERBOSITY)
        .short('v')
        .long("verbose")
        .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
        .env("LARGE_EVENT_LOG_LEVEL")
        .global(true)
        .action(ArgAction::Count)
        .value_parser(validator_log_level());

    let format = Arg::new(ARG_LOG_FORMAT)
        .long("log-format")
        .help("Log output format")
        .env("LARGE_EVENT_LOG_FORMAT")
        .global(true)
        .default_value("pretty")
        .value_parser(["pretty", "json"]);

    command.arg(verbosity).arg(format)
}
