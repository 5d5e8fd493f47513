use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A command response.
pub fn print_response(command: &str, data: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(data),
        OutputFormat::Table => {
            let mut table = new_table(vec!["FIELD", "VALUE"]);
            match data {
                Value::Object(fields) => {
                    for (key, value) in fields {
                        table.add_row(vec![key.clone(), compact(value)]);
                    }
                }
                other => {
                    table.add_row(vec![command.to_string(), compact(other)]);
                }
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let body = serde_json::to_string_pretty(data).unwrap_or_else(|_| compact(data));
            println!("{command}:\n{body}");
        }
        OutputFormat::Raw => print_raw_value(data),
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    evt: &'a str,
    data: &'a Value,
    timestamp: String,
}

/// One dispatched event.
pub fn print_event(evt: &str, data: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&EventOutput {
            evt,
            data,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["EVENT", "DATA"]);
            table.add_row(vec![evt.to_string(), compact(data)]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("evt={evt} data={}", compact(data)),
        OutputFormat::Raw => print_raw_value(data),
    }
}

#[derive(Serialize)]
struct PathOutput {
    index: usize,
    path: PathBuf,
    exists: bool,
}

/// Candidate endpoint addresses, in connect order.
pub fn print_paths(paths: &[PathBuf], format: OutputFormat) {
    let rows: Vec<PathOutput> = paths
        .iter()
        .enumerate()
        .map(|(index, path)| PathOutput {
            index,
            path: path.clone(),
            exists: path.exists(),
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&rows),
        OutputFormat::Table => {
            let mut table = new_table(vec!["#", "PATH", "EXISTS"]);
            for row in &rows {
                table.add_row(vec![
                    row.index.to_string(),
                    row.path.display().to_string(),
                    row.exists.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in &rows {
                let mark = if row.exists { "*" } else { " " };
                println!("{mark} {:>2}  {}", row.index, row.path.display());
            }
        }
        OutputFormat::Raw => {
            for row in &rows {
                println!("{}", row.path.display());
            }
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Strings unquoted, everything else as compact JSON.
fn print_raw_value(value: &Value) {
    let mut out = std::io::stdout();
    let text = match value {
        Value::String(s) => s.clone(),
        other => compact(other),
    };
    let _ = writeln!(out, "{text}");
    let _ = out.flush();
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
