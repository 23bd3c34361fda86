//! Human-readable text output

use crate::history::{workers_with_status, History};
use crate::stats::{WorkerStatus, WorkerSummary};
use crate::util::time::{calculate_rate, format_duration, format_rate};
use std::fmt::Write;

/// Print run results to console
pub fn print_results<Q, A>(history: &History<Q, A>) {
    print!("{}", format_results(history));
}

/// Render run results: totals, then one line per worker
pub fn format_results<Q, A>(history: &History<Q, A>) -> String {
    let mut out = String::new();
    let rule = "═══════════════════════════════════════════════════════════";

    // Writing to a String cannot fail.
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "                      RUN RESULTS");
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out);

    let stop = history
        .stop_reason()
        .map(|reason| reason.to_string())
        .unwrap_or_else(|| "not started".to_string());
    let rate = calculate_rate(history.len() as u64, history.elapsed());
    let _ = writeln!(out, "Stop reason:  {}", stop);
    let _ = writeln!(out, "Elapsed Time: {}", format_duration(history.elapsed()));
    let _ = writeln!(
        out,
        "Iterations:   {} ({} steps/s)",
        format_number(history.len() as u64),
        format_rate(rate)
    );
    let _ = writeln!(out, "Epochs:       {}", format_number(history.epochs()));
    let _ = writeln!(
        out,
        "Workers:      {} stopped, {} failed, {} abandoned",
        workers_with_status(history, WorkerStatus::Stopped),
        workers_with_status(history, WorkerStatus::Failed),
        workers_with_status(history, WorkerStatus::Abandoned)
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "Per worker:");
    let _ = writeln!(
        out,
        "  {:>6}  {:<16} {:>10} {:>10} {:>10} {:>10}",
        "id", "status", "queries", "answers", "rtt p50", "rtt p99"
    );
    for summary in history.workers() {
        let _ = writeln!(out, "{}", format_worker(summary));
        if let Some(failure) = &summary.failure {
            let _ = writeln!(out, "          error: {}", failure);
        }
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", rule);

    out
}

fn format_worker(summary: &WorkerSummary) -> String {
    let (p50, p99) = match &summary.round_trip {
        Some(latency) => (format_duration(latency.p50), format_duration(latency.p99)),
        None => ("-".to_string(), "-".to_string()),
    };
    format!(
        "  {:>6}  {:<16} {:>10} {:>10} {:>10} {:>10}",
        summary.worker.to_string(),
        summary.status.to_string(),
        format_number(summary.dispatched),
        format_number(summary.answers),
        p50,
        p99
    )
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}
