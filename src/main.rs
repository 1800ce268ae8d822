//! Purpose: `rawexd` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Commands emit JSON on stdout; `find` emits one record per line.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Commands that load data wait for background persistence before exiting.
#![allow(clippy::result_large_err)]
use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use rawexd::api::{
    CacheOptions, ClientOptions, DEFAULT_BASE_URL, Error, ErrorKind, Filter, GameDataClient,
    VersionedKey, to_exit_code,
};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse_from(normalize_args(std::env::args_os())) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `rawexd --help`."));
            }
        },
    };

    let mut options = ClientOptions::new().with_base_url(cli.base_url);
    if let Some(dir) = cli.dir {
        options = options.with_cache_dir(dir);
    }
    options = options.with_cache_options(CacheOptions {
        started_timeout: cli.started_timeout.map(Duration::from_secs),
        ..CacheOptions::default()
    });

    command_dispatch::dispatch_command(cli.command, options)
        .map_err(add_corrupt_hint)
        .map_err(add_io_hint)
        .map_err(add_network_hint)
        .map_err(add_internal_hint)
}

fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let replacement = arg.to_str().and_then(|value| match value {
                "---help" => Some("--help"),
                "---version" => Some("--version"),
                _ => None,
            });
            replacement.map(OsString::from).unwrap_or_else(|| arg)
        })
        .collect()
}

#[derive(Parser)]
#[command(
    name = "rawexd",
    version,
    about = "Versioned game-data tables with a persistent local cache",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Tables are fetched once per game version and served from the cache afterwards.

Mental model:
  - `load` fetches (or reuses) a whole table
  - `get` / `find` / `count` query one table
  - `cache status` shows what is stored locally
"#,
    after_help = r#"EXAMPLES
  $ rawexd load Item --game-version 7.0
  $ rawexd get Item 4 --game-version 7.0
  $ rawexd find Item --where Name='"Potion"' --game-version 7.0
  $ rawexd count Item --where IsUnique=true --game-version 7.0
  $ rawexd cache status Item --game-version 7.0

  $ rawexd <command> --help"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "Cache directory (default: ~/.rawexd/cache)",
        value_hint = ValueHint::DirPath
    )]
    dir: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        default_value = DEFAULT_BASE_URL,
        value_hint = ValueHint::Url,
        help = "Base URL of the raw data mirror"
    )]
    base_url: String,
    #[arg(
        long,
        global = true,
        value_name = "SECS",
        help = "Take over a cache population stuck in `started` for longer than SECS"
    )]
    started_timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone, Debug)]
struct TableArgs {
    #[arg(help = "Table name, e.g. Item")]
    table: String,
    #[arg(long = "game-version", value_name = "V", help = "Game data version, e.g. 7.0")]
    game_version: String,
}

impl TableArgs {
    fn key(&self) -> Result<VersionedKey, Error> {
        VersionedKey::new(self.game_version.clone(), self.table.clone())
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Load a table, populating the cache on a miss")]
    Load {
        #[command(flatten)]
        target: TableArgs,
    },
    #[command(about = "Print one record by id")]
    Get {
        #[command(flatten)]
        target: TableArgs,
        #[arg(help = "Record id")]
        id: i64,
    },
    #[command(about = "Print matching records, one JSON object per line")]
    Find {
        #[command(flatten)]
        target: TableArgs,
        #[arg(
            long = "where",
            value_name = "KEY=VALUE",
            help = "Exact-match term; VALUE is JSON when it parses, else a string (repeatable)"
        )]
        terms: Vec<String>,
        #[arg(long, help = "Print only the first match")]
        first: bool,
    },
    #[command(about = "Count matching records")]
    Count {
        #[command(flatten)]
        target: TableArgs,
        #[arg(long = "where", value_name = "KEY=VALUE", help = "Exact-match term (repeatable)")]
        terms: Vec<String>,
    },
    #[command(about = "Inspect the local cache")]
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
    #[command(about = "Print shell completions")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "Show the caching state of a table")]
    Status {
        #[command(flatten)]
        target: TableArgs,
    },
}

fn parse_filter(terms: &[String]) -> Result<Filter, Error> {
    let mut filter = Filter::new();
    for term in terms {
        let Some((key, raw)) = term.split_once('=') else {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid --where term: {term}"))
                .with_hint("Use KEY=VALUE, e.g. --where Name=Potion."));
        };
        if key.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("--where key must not be empty")
                .with_hint("Use KEY=VALUE, e.g. --where Name=Potion."));
        }
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| json!(raw));
        filter = filter.eq(key, value);
    }
    Ok(filter)
}

fn emit_json(value: Value) {
    let pretty = io::stdout().is_terminal();
    let json = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    };
    println!(
        "{}",
        json.unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string())
    );
}

fn emit_json_line(value: Value) {
    let json = serde_json::to_string(&value)
        .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::Corrupt => "corrupt data".to_string(),
        ErrorKind::NetworkFailure => "network failure".to_string(),
        ErrorKind::MalformedSource => "malformed source data".to_string(),
        ErrorKind::CacheStateViolation => "cache state violation".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(err.kind().as_str()));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(key) = err.key() {
        inner.insert("key".to_string(), json!(key));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(key) = err.key() {
        lines.push(format!("table: {key}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn add_io_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Io || err.hint().is_some() {
        return err;
    }
    err.with_hint("I/O error. Check the cache directory, filesystem, and disk space.")
}

fn add_corrupt_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Corrupt || err.hint().is_some() {
        return err;
    }
    err.with_hint("Cached table appears corrupt. Delete its directory under --dir to refetch it.")
}

fn add_network_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::NetworkFailure || err.hint().is_some() {
        return err;
    }
    err.with_hint("Check network connectivity and --base-url.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_LOG=debug and share command/context if it persists.",
    )
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn open_client(options: ClientOptions) -> Result<GameDataClient, Error> {
    GameDataClient::new(options)
}

#[cfg(test)]
mod tests {
    use super::{Cli, error_json, parse_filter};
    use clap::CommandFactory;
    use rawexd::api::{Error, ErrorKind, Record};
    use serde_json::json;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn where_values_parse_as_json_or_string() {
        let filter = parse_filter(&[
            "Name=Potion".to_string(),
            "Level=5".to_string(),
            "IsUnique=true".to_string(),
        ])
        .expect("filter");
        let record = Record::new(1)
            .with("Name", "Potion")
            .with("Level", 5)
            .with("IsUnique", true);
        assert!(filter.matches(&record));

        let quoted = parse_filter(&["Level=\"5\"".to_string()]).expect("filter");
        assert!(!quoted.matches(&record));
    }

    #[test]
    fn where_requires_key_and_separator() {
        for term in ["Name", "=Potion"] {
            let err = parse_filter(&[term.to_string()]).expect_err("err");
            assert_eq!(err.kind(), ErrorKind::Usage);
        }
    }

    #[test]
    fn error_json_carries_kind_and_key() {
        let err = Error::new(ErrorKind::NetworkFailure)
            .with_message("HTTP 404 Not Found")
            .with_key("7.0/Item");
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], json!("NetworkFailure"));
        assert_eq!(value["error"]["key"], json!("7.0/Item"));
    }
}
