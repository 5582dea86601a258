use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use futures::executor::block_on;
use serde_json::Value;
use statehouse::{DEFAULT_HISTORY_LIMIT, FileStorage, SetOptions, Store, StoreConfig, review};

use crate::error::{CliError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "statehouse",
    about = "Inspect and edit a persisted review draft",
    version
)]
pub struct Cli {
    /// Directory holding the persisted draft.
    #[arg(long, global = true, default_value = ".statehouse")]
    pub dir: PathBuf,

    /// Undo history kept while a command runs.
    #[arg(long, global = true, default_value_t = DEFAULT_HISTORY_LIMIT)]
    pub history_limit: usize,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the draft, or one key, as JSON.
    Show(ShowArgs),

    /// Apply one validated batch of `KEY=JSON` assignments.
    Set(SetArgs),

    /// Remove the persisted draft.
    Clear,

    /// List state keys and whether each is persisted.
    Keys,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Print only this key.
    #[arg(long)]
    pub key: Option<String>,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Values parse as JSON; anything else is taken as a plain string.
    #[arg(required = true, value_name = "KEY=JSON")]
    pub assignments: Vec<String>,
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run(cli, &mut out)
}

pub fn run(cli: Cli, out: &mut dyn Write) -> Result<()> {
    let store = open_store(&cli);
    match cli.command {
        Commands::Show(args) => run_show(&store, args, out),
        Commands::Set(args) => run_set(&store, args, out),
        Commands::Clear => {
            store.clear_persisted_state();
            writeln!(out, "cleared {}", cli.dir.display())?;
            Ok(())
        }
        Commands::Keys => run_keys(&store, out),
    }
}

fn open_store(cli: &Cli) -> Store {
    let config = StoreConfig::default()
        .with_history_limit(cli.history_limit)
        .with_persistence(review::persistence(FileStorage::new(&cli.dir)));
    let store = Store::review(config);
    if !store.load_persisted_state() {
        tracing::debug!(message = "cli.fresh_draft", dir = %cli.dir.display());
    }
    store
}

fn run_show(store: &Store, args: ShowArgs, out: &mut dyn Write) -> Result<()> {
    let value = match args.key {
        Some(key) => store.get(&key).ok_or(CliError::UnknownKey { key })?,
        None => Value::Object(store.snapshot().into_iter().collect()),
    };
    writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
    Ok(())
}

fn run_set(store: &Store, args: SetArgs, out: &mut dyn Write) -> Result<()> {
    let updates = args
        .assignments
        .iter()
        .map(|raw| parse_assignment(raw))
        .collect::<Result<Vec<_>>>()?;
    let changes = block_on(store.set(updates, SetOptions::default()))?;
    if changes.is_empty() {
        writeln!(out, "no changes")?;
    } else {
        writeln!(out, "{}", serde_json::to_string_pretty(&changes)?)?;
    }
    Ok(())
}

fn run_keys(store: &Store, out: &mut dyn Write) -> Result<()> {
    for key in store.keys() {
        let kind = if store.is_persisted(&key) {
            "persisted"
        } else {
            "transient"
        };
        writeln!(out, "{key}\t{kind}")?;
    }
    for name in store.computed_names() {
        writeln!(out, "{name}\tcomputed")?;
    }
    Ok(())
}

/// Split `KEY=VALUE`, parsing the value as JSON when possible.
pub fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        return Err(CliError::invalid(format!("expected KEY=JSON, got `{raw}`")));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(CliError::invalid(format!("missing key in `{raw}`")));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assignment_parses_json_or_falls_back_to_text() {
        assert_eq!(parse_assignment("rating=4").unwrap(), ("rating".into(), json!(4)));
        assert_eq!(
            parse_assignment(r#"selectedFeatures=["wifi","pool"]"#).unwrap(),
            ("selectedFeatures".into(), json!(["wifi", "pool"]))
        );
        assert_eq!(
            parse_assignment("selectedStaff=Jane Doe").unwrap(),
            ("selectedStaff".into(), json!("Jane Doe"))
        );
        assert_eq!(
            parse_assignment("personalComments=a=b").unwrap(),
            ("personalComments".into(), json!("a=b"))
        );
    }

    #[test]
    fn assignment_errors() {
        assert!(matches!(
            parse_assignment("rating"),
            Err(CliError::InvalidArgument { .. })
        ));
        assert!(matches!(
            parse_assignment("=4"),
            Err(CliError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn cli_parses_global_options() {
        let cli = Cli::try_parse_from([
            "statehouse",
            "set",
            "rating=3",
            "--dir",
            "/tmp/draft",
            "--history-limit",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.dir, PathBuf::from("/tmp/draft"));
        assert_eq!(cli.history_limit, 5);
        assert!(matches!(cli.command, Commands::Set(ref args) if args.assignments == ["rating=3"]));
    }

    #[test]
    fn set_requires_an_assignment() {
        assert!(Cli::try_parse_from(["statehouse", "set"]).is_err());
    }

    #[test]
    fn validation_exit_code_is_two() {
        let store = Store::review(StoreConfig::default());
        let err = block_on(store.set([("rating", json!(0))], SetOptions::default())).unwrap_err();
        assert_eq!(CliError::from(err).exit_code(), 2);
        assert_eq!(CliError::invalid("x").exit_code(), 1);
    }
}
