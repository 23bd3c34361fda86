//! Run reports
//!
//! - `text`: console summary
//! - `json`: full history with metadata
//! - `csv`: one row per accepted step

pub mod csv;
pub mod json;
pub mod text;

pub use csv::write_csv_output;
pub use json::write_json_output;
pub use text::print_results;

#[cfg(test)]
pub(crate) fn sample_history() -> crate::history::History<Vec<f64>, f64> {
    use crate::algorithm::WorkerId;
    use crate::history::HistoryRecorder;
    use crate::stats::{WorkerStatus, WorkerSummary};
    use crate::stopping::StopReason;
    use std::time::Duration;

    let mut recorder = HistoryRecorder::new(true);
    recorder.push(WorkerId(1), vec![0.5, 1.0], Some(0.25), Duration::from_millis(3));
    recorder.push(WorkerId(2), vec![0.75, 1.5], Some(0.125), Duration::from_millis(5));
    let workers = WorkerId::range(2)
        .into_iter()
        .map(|worker| WorkerSummary {
            worker,
            status: WorkerStatus::Stopped,
            dispatched: 2,
            answers: 1,
            round_trip: None,
            failure: None,
        })
        .collect();
    recorder.finish(workers, Some(StopReason::IterationLimit), 1, Duration::from_millis(6))
}
