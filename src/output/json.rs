//! JSON output formatting
//!
//! Writes the full [`History`] together with run metadata. Per-entry
//! elapsed times are serialized as serde's `{secs, nanos}` pairs so the file
//! deserializes back into a `History` without loss.

use crate::history::History;
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Metadata header of a JSON report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonMetadata {
    pub tool: String,
    pub version: String,
    /// Host that ran the coordinator
    pub node_id: String,
    pub generated_at: DateTime<Utc>,
}

impl JsonMetadata {
    pub fn collect() -> Self {
        Self {
            tool: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            node_id: hostname::get()
                .ok()
                .and_then(|name| name.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            generated_at: Utc::now(),
        }
    }
}

/// Complete JSON report
#[derive(Debug, Serialize)]
pub struct JsonReport<'a, Q, A> {
    pub metadata: JsonMetadata,
    pub history: &'a History<Q, A>,
}

/// Write JSON output to file
pub fn write_json_output<Q, A>(output_path: &Path, history: &History<Q, A>, pretty: bool) -> Result<()>
where
    Q: Serialize,
    A: Serialize,
{
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create JSON output: {}", output_path.display()))?;
    let writer = BufWriter::new(file);
    let report = JsonReport {
        metadata: JsonMetadata::collect(),
        history,
    };

    if pretty {
        serde_json::to_writer_pretty(writer, &report)?;
    } else {
        serde_json::to_writer(writer, &report)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::sample_history;

    #[test]
    fn test_write_json_output() {
        let history = sample_history();
        let file = tempfile::NamedTempFile::new().unwrap();
        write_json_output(file.path(), &history, true).unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["metadata"]["tool"], "asyncalgo");
        assert_eq!(value["history"]["stop_reason"], "iteration_limit");
        assert_eq!(value["history"]["entries"].as_array().unwrap().len(), 2);
        assert_eq!(value["history"]["entries"][1]["worker"], 2);

        let history_back: History<Vec<f64>, f64> = serde_json::from_value(value["history"].clone()).unwrap();
        assert_eq!(history_back.entries(), history.entries());
        assert_eq!(history_back.answers(), Some(&[0.25, 0.125][..]));
    }

    #[test]
    fn test_write_json_output_bad_path() {
        let history = sample_history();
        assert!(write_json_output(Path::new("/nonexistent/dir/out.json"), &history, false).is_err());
    }
}
