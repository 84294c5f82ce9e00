use serde::{Deserialize, Serialize};

/// Polynomial degree of the background model
pub const BACKGROUND_DEGREE: usize = 4;

/// Mass window around the Higgs peak left out of the background fit, in GeV
pub const SIGNAL_WINDOW: (f64, f64) = (118.0, 133.0);

const TERMS: usize = BACKGROUND_DEGREE + 1;

/// Smooth background fitted to the sidebands of the mass spectrum.
///
/// The polynomial is expressed in `u = (m - offset) / scale` to keep the
/// normal equations well conditioned; `evaluate` takes the mass in GeV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundFit {
    pub offset: f64,
    pub scale: f64,
    pub coefficients: Vec<f64>,
    pub points: usize,
}

impl BackgroundFit {
    /// Weighted least-squares fit of a 4th order polynomial to every non-empty
    /// bin outside [`SIGNAL_WINDOW`], weighting each bin by `1/N`.
    ///
    /// Returns `None` when there are too few usable bins to constrain it.
    pub fn sidebands(centres: &[f64], counts: &[u64]) -> Option<Self> {
        let points: Vec<(f64, f64)> = centres
            .iter()
            .zip(counts)
            .filter(|(&x, &n)| n > 0 && !(SIGNAL_WINDOW.0..=SIGNAL_WINDOW.1).contains(&x))
            .map(|(&x, &n)| (x, n as f64))
            .collect();
        if points.len() < TERMS {
            return None;
        }

        let (lo, hi) = points
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(x, _)| {
                (lo.min(x), hi.max(x))
            });
        let offset = (lo + hi) / 2.0;
        let scale = ((hi - lo) / 2.0).max(1.0);

        let mut normal = [[0.0; TERMS]; TERMS];
        let mut rhs = [0.0; TERMS];
        for &(x, y) in &points {
            // Poisson variance: sigma^2 = N
            let weight = 1.0 / y;
            let basis = powers((x - offset) / scale);
            for row in 0..TERMS {
                rhs[row] += weight * basis[row] * y;
                for col in 0..TERMS {
                    normal[row][col] += weight * basis[row] * basis[col];
                }
            }
        }

        let coefficients = solve(normal, rhs)?;
        Some(BackgroundFit {
            offset,
            scale,
            coefficients: coefficients.to_vec(),
            points: points.len(),
        })
    }

    pub fn evaluate(&self, mass: f64) -> f64 {
        let u = (mass - self.offset) / self.scale;
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, c| acc * u + c)
    }
}

fn powers(u: f64) -> [f64; TERMS] {
    let mut out = [1.0; TERMS];
    for i in 1..TERMS {
        out[i] = out[i - 1] * u;
    }
    out
}

/// Gaussian elimination with partial pivoting; `None` if singular
fn solve(mut a: [[f64; TERMS]; TERMS], mut b: [f64; TERMS]) -> Option<[f64; TERMS]> {
    for col in 0..TERMS {
        let pivot = (col..TERMS).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..TERMS {
            let factor = a[row][col] / a[col][col];
            for k in col..TERMS {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0; TERMS];
    for row in (0..TERMS).rev() {
        let tail: f64 = (row + 1..TERMS).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}
