//! CSV output formatting
//!
//! One row per history entry, in iteration order:
//!
//! ```text
//! iteration,worker,timestamp,elapsed_sec,query
//! 1,2,2026-01-01T00:00:00.000123Z,0.000412,"[0.5,1.0]"
//! ```
//!
//! The query column holds the query JSON-encoded, quoted when needed.

use crate::history::{History, HistoryEntry};
use crate::Result;
use anyhow::Context;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const HEADER: &str = "iteration,worker,timestamp,elapsed_sec,query";

/// CSV writer for history entries
pub struct CsvWriter<W: Write> {
    out: W,
    rows: u64,
}

impl CsvWriter<BufWriter<File>> {
    /// Create the file and write the header row
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("Failed to create CSV output: {}", path.display()))?;
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> CsvWriter<W> {
    pub fn new(mut out: W) -> Result<Self> {
        writeln!(out, "{}", HEADER)?;
        Ok(Self { out, rows: 0 })
    }

    pub fn write_entry<Q: Serialize>(&mut self, entry: &HistoryEntry<Q>) -> Result<()> {
        let query = serde_json::to_string(&entry.query).context("Failed to encode query")?;
        writeln!(
            self.out,
            "{},{},{},{:.6},{}",
            entry.iteration,
            entry.worker,
            entry.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            entry.elapsed.as_secs_f64(),
            escape_field(&query)
        )?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush and return the underlying writer
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Write every entry of `history` to `output_path`
pub fn write_csv_output<Q: Serialize, A>(output_path: &Path, history: &History<Q, A>) -> Result<()> {
    let mut writer = CsvWriter::create(output_path)?;
    for entry in history.entries() {
        writer.write_entry(entry)?;
    }
    writer.finish()?;
    Ok(())
}

/// Quote a field if it contains a delimiter, quote, or newline
fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
