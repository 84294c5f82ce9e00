use fanout_core::Combine;
use serde::{Deserialize, Serialize};

const BINS: usize = 20;

/// Diphoton mass histogram, 100–160 GeV in 3 GeV bins plus under/overflow.
///
/// Bins are half-open except the last, which also takes exactly 160 GeV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassHistogram {
    counts: [u64; BINS],
    underflow: u64,
    overflow: u64,
}

impl MassHistogram {
    pub const LOW: f64 = 100.0;
    pub const HIGH: f64 = 160.0;
    pub const BIN_WIDTH: f64 = 3.0;

    pub fn new() -> Self {
        MassHistogram {
            counts: [0; BINS],
            underflow: 0,
            overflow: 0,
        }
    }

    pub fn fill(&mut self, mass: f64) {
        if mass.is_nan() || mass < Self::LOW {
            self.underflow += 1;
        } else if mass > Self::HIGH {
            self.overflow += 1;
        } else {
            let bin = ((mass - Self::LOW) / Self::BIN_WIDTH) as usize;
            self.counts[bin.min(BINS - 1)] += 1;
        }
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn underflow(&self) -> u64 {
        self.underflow
    }

    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    /// `BINS + 1` bin edges
    pub fn edges(&self) -> Vec<f64> {
        (0..=BINS)
            .map(|i| Self::LOW + i as f64 * Self::BIN_WIDTH)
            .collect()
    }

    pub fn centres(&self) -> Vec<f64> {
        (0..BINS)
            .map(|i| Self::LOW + (i as f64 + 0.5) * Self::BIN_WIDTH)
            .collect()
    }

    /// Poisson error per bin
    pub fn errors(&self) -> Vec<f64> {
        self.counts.iter().map(|&n| (n as f64).sqrt()).collect()
    }

    pub fn in_range(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Every filled entry, under/overflow included
    pub fn entries(&self) -> u64 {
        self.in_range() + self.underflow + self.overflow
    }

    pub fn to_bytes(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(self)
    }
}

impl Default for MassHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Combine for MassHistogram {
    fn empty() -> Self {
        Self::new()
    }

    fn combine(mut self, other: Self) -> Self {
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts.iter()) {
            *mine += theirs;
        }
        self.underflow += other.underflow;
        self.overflow += other.overflow;
        self
    }
}
