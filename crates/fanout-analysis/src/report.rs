use crate::fit::BackgroundFit;
use crate::histogram::MassHistogram;
use crate::AnalysisError;
use chrono::{DateTime, Utc};
use fanout_core::{FinalizeReport, Finalizer};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinRecord {
    pub low: f64,
    pub high: f64,
    pub centre: f64,
    pub count: u64,
    pub error: f64,
    /// Fitted background at the bin centre, when a fit was possible
    pub background: Option<f64>,
    /// `count - background`
    pub signal: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub locator: String,
    pub reason: String,
}

/// The JSON document written at the end of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub generated_at: DateTime<Utc>,
    pub bins: Vec<BinRecord>,
    pub underflow: u64,
    pub overflow: u64,
    pub entries: u64,
    pub background_fit: Option<BackgroundFit>,
    pub successes: usize,
    pub failures: Vec<FailureRecord>,
    pub undecodable: Vec<String>,
}

impl ReportDocument {
    pub fn build(histogram: &MassHistogram, report: &FinalizeReport) -> Self {
        let edges = histogram.edges();
        let fit = BackgroundFit::sidebands(&histogram.centres(), histogram.counts());
        if fit.is_none() {
            warn!("Not enough sideband bins to fit the background");
        }

        let bins = histogram
            .counts()
            .iter()
            .zip(histogram.centres())
            .zip(histogram.errors())
            .enumerate()
            .map(|(i, ((&count, centre), error))| {
                let background = fit.as_ref().map(|fit| fit.evaluate(centre));
                BinRecord {
                    low: edges[i],
                    high: edges[i + 1],
                    centre,
                    count,
                    error,
                    background,
                    signal: background.map(|b| count as f64 - b),
                }
            })
            .collect();

        ReportDocument {
            generated_at: Utc::now(),
            bins,
            underflow: histogram.underflow(),
            overflow: histogram.overflow(),
            entries: histogram.entries(),
            background_fit: fit,
            successes: report.successes,
            failures: report
                .failures
                .iter()
                .map(|(locator, reason)| FailureRecord {
                    locator: locator.clone(),
                    reason: reason.clone(),
                })
                .collect(),
            undecodable: report.undecodable.clone(),
        }
    }
}

/// Writes the merged mass histogram as a JSON report
pub struct HistogramReport {
    output: PathBuf,
}

impl HistogramReport {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        HistogramReport {
            output: output.into(),
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

impl Finalizer for HistogramReport {
    type Payload = MassHistogram;
    type Error = AnalysisError;

    fn finalize(
        &mut self,
        merged: MassHistogram,
        report: &FinalizeReport,
    ) -> Result<(), AnalysisError> {
        let document = ReportDocument::build(&merged, report);

        if let Some(parent) = self.output.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut writer = BufWriter::new(std::fs::File::create(&self.output)?);
        serde_json::to_writer_pretty(&mut writer, &document)?;
        writer.flush()?;

        info!(
            "Wrote {} ({} entries from {} results, {} failed)",
            self.output.display(),
            document.entries,
            report.total(),
            document.failures.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_core::Combine;
    use tempfile::TempDir;

    fn read(path: &Path) -> ReportDocument {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_empty_result_set_still_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("report.json");
        let mut finalizer = HistogramReport::new(&path);

        finalizer
            .finalize(MassHistogram::empty(), &FinalizeReport::default())
            .unwrap();

        let document = read(&path);
        assert_eq!(document.bins.len(), 20);
        assert_eq!(document.entries, 0);
        assert!(document.failures.is_empty());
        assert!(document.background_fit.is_none());
        assert!(document.bins.iter().all(|bin| bin.signal.is_none()));
    }

    #[test]
    fn test_report_subtracts_fitted_background() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        let mut finalizer = HistogramReport::new(&path);

        let mut histogram = MassHistogram::new();
        for (i, centre) in histogram.centres().into_iter().enumerate() {
            for _ in 0..(200 - 5 * i) {
                histogram.fill(centre);
            }
        }
        for _ in 0..40 {
            histogram.fill(125.0);
        }
        finalizer
            .finalize(histogram, &FinalizeReport::default())
            .unwrap();

        let document = read(&path);
        assert!(document.background_fit.is_some());
        let peak = &document.bins[8];
        assert_eq!(peak.count, 200 - 5 * 8 + 40);
        assert!((peak.signal.unwrap() - 40.0).abs() < 1e-6);
        assert!(document.bins[0].signal.unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_unwritable_output_is_an_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("taken");
        std::fs::write(&blocker, b"file, not a directory").unwrap();
        let mut finalizer = HistogramReport::new(blocker.join("report.json"));

        let result = finalizer.finalize(MassHistogram::new(), &FinalizeReport::default());
        assert!(matches!(result, Err(AnalysisError::Io(_))));
    }

    #[test]
    fn test_report_carries_counts_and_failures() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        let mut finalizer = HistogramReport::new(&path);

        let mut histogram = MassHistogram::new();
        for _ in 0..4 {
            histogram.fill(125.0);
        }
        let report = FinalizeReport {
            successes: 1,
            failures: vec![("b.dat".to_string(), "File not found".to_string())],
            undecodable: vec![],
        };
        finalizer.finalize(histogram, &report).unwrap();

        let document = read(&path);
        let bin = &document.bins[8];
        assert_eq!((bin.low, bin.high, bin.count), (124.0, 127.0, 4));
        assert_eq!(bin.error, 2.0);
        assert_eq!(document.failures[0].locator, "b.dat");
    }

    #[test]
    fn test_merge_order_does_not_change_report() {
        let mut a = MassHistogram::new();
        a.fill(110.0);
        let mut b = MassHistogram::new();
        b.fill(150.0);
        b.fill(90.0);

        let report = FinalizeReport::default();
        let ab = ReportDocument::build(&a.clone().combine(b.clone()), &report);
        let ba = ReportDocument::build(&b.combine(a), &report);
        assert_eq!(ab.bins, ba.bins);
        assert_eq!((ab.underflow, ab.overflow), (ba.underflow, ba.overflow));
    }
}
