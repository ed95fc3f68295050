use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;

use crate::app::{ProgressEvent, ProgressSink};
use crate::normalize::ResultTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Json,
    Tsv,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        Self::write(&mut stdout, value)
    }

    pub fn write<W: Write, T: Serialize>(writer: &mut W, value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct TableOutput;

impl TableOutput {
    pub fn print(table: &ResultTable, format: TableFormat) -> io::Result<()> {
        match format {
            TableFormat::Json => JsonOutput::print(table),
            TableFormat::Tsv => {
                let mut stdout = io::stdout().lock();
                Self::write_tsv(&mut stdout, table)
            }
        }
    }

    /// Header row plus one line per record; nulls render empty, lists comma-joined.
    pub fn write_tsv<W: Write>(writer: &mut W, table: &ResultTable) -> io::Result<()> {
        let columns = table.columns();
        writeln!(writer, "{}", columns.join("\t"))?;
        for row in table.rows() {
            let cells: Vec<String> = columns
                .iter()
                .map(|column| render_cell(row.get(*column).unwrap_or(&Value::Null)))
                .collect();
            writeln!(writer, "{}", cells.join("\t"))?;
        }
        Ok(())
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.replace(['\t', '\n'], " "),
        Value::Array(items) => items
            .iter()
            .map(render_cell)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

/// Line-oriented progress on stderr, throttled to phase changes and ~10% steps.
pub struct StderrProgress {
    last_percent: std::cell::Cell<Option<u64>>,
}

impl StderrProgress {
    pub fn new() -> Self {
        Self {
            last_percent: std::cell::Cell::new(None),
        }
    }
}

impl Default for StderrProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        match (event.bytes, event.total) {
            (Some(bytes), Some(total)) if total > 0 => {
                let percent = bytes.saturating_mul(100) / total;
                let step = percent / 10;
                if self.last_percent.get() != Some(step) {
                    self.last_percent.set(Some(step));
                    eprintln!("  {percent:>3}% {bytes}/{total} bytes");
                }
            }
            (Some(_), _) => {}
            _ => {
                self.last_percent.set(None);
                eprintln!("{}", event.message);
            }
        }
    }
}
