//! Purpose: Hold top-level CLI command dispatch for `rawexd`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Query commands read through a `Table`; `load` reads the raw stream.
//! Invariants: Background persistence finishes before a command returns.

use super::*;
use rawexd::api::{LoadOrigin, Loaded, Record, Table};
use rawexd::core::source::Source;

pub(super) fn dispatch_command(
    command: Command,
    options: ClientOptions,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "rawexd", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Load { target } => {
            let key = target.key()?;
            let client = open_client(options)?;
            let Loaded {
                metadata,
                mut records,
                origin,
                persist,
            } = client.load(&key)?;
            let mut count = 0usize;
            while records.next_item()?.is_some() {
                count += 1;
            }
            let persisted = match persist {
                Some(handle) => handle.wait().is_ok(),
                None => origin == LoadOrigin::Cache,
            };
            emit_json(json!({
                "version": key.version(),
                "table": key.table(),
                "origin": origin.as_str(),
                "records": count,
                "persisted": persisted,
                "fields": metadata.fields,
            }));
            Ok(RunOutcome::ok())
        }
        Command::Get { target, id } => {
            let key = target.key()?;
            let table = open_table(options, key.clone())?;
            let record = table.find_by_id(id);
            settle(&table);
            let Some(record) = record else {
                return Err(Error::new(ErrorKind::NotFound)
                    .with_message(format!("no record with id {id}"))
                    .with_key(&key));
            };
            emit_json(record_json(&record)?);
            Ok(RunOutcome::ok())
        }
        Command::Find {
            target,
            terms,
            first,
        } => {
            let filter = parse_filter(&terms)?;
            let table = open_table(options, target.key()?)?;
            let records = if first {
                table.find(&filter).into_iter().collect()
            } else {
                table.find_all(&filter)
            };
            settle(&table);
            for record in &records {
                emit_json_line(record_json(record)?);
            }
            Ok(RunOutcome::ok())
        }
        Command::Count { target, terms } => {
            let filter = parse_filter(&terms)?;
            let table = open_table(options, target.key()?)?;
            let count = table.count(&filter);
            settle(&table);
            emit_json(json!({ "count": count }));
            Ok(RunOutcome::ok())
        }
        Command::Cache {
            command: CacheCommand::Status { target },
        } => {
            let key = target.key()?;
            let client = open_client(options)?;
            let entry = client.cache_entry(&key)?;
            let state = entry
                .as_ref()
                .map(|entry| entry.caching_state)
                .unwrap_or_default();
            emit_json(json!({
                "version": key.version(),
                "table": key.table(),
                "state": state.as_str(),
                "started_at": entry.as_ref().and_then(|entry| entry.started_at.clone()),
                "fields": entry.map(|entry| entry.metadata.fields).unwrap_or_default(),
                "dir": client.cache_dir().map(|dir| dir.display().to_string()),
            }));
            Ok(RunOutcome::ok())
        }
    }
}

// Opens the table and surfaces a failed load instead of an empty result.
fn open_table(options: ClientOptions, key: VersionedKey) -> Result<Table, Error> {
    let client = open_client(options)?;
    let table = client.open_table(key)?;
    table.ready()?;
    Ok(table)
}

fn settle(table: &Table) {
    if let Err(err) = table.persisted() {
        tracing::warn!(key = %table.key(), error = %err, "table was not persisted");
    }
}

fn record_json(record: &Record) -> Result<Value, Error> {
    serde_json::to_value(record).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode record json")
            .with_source(err)
    })
}
