//! Diphoton invariant-mass analysis plugged into the fan-out pipeline: the
//! worker side turns an event file into a [`MassHistogram`], the aggregator
//! side merges histograms, fits the sideband background and writes a
//! [`HistogramReport`].

mod event;
mod fit;
mod histogram;
mod processor;
mod report;

pub use event::{parse_events, PhotonEvent, PhotonPair};
pub use fit::{BackgroundFit, SIGNAL_WINDOW};
pub use histogram::MassHistogram;
pub use processor::DiphotonProcessor;
pub use report::{HistogramReport, ReportDocument};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("line {line}: {reason}")]
    MalformedEvent { line: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
