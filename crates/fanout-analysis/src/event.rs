use crate::{AnalysisError, Result};

/// Kinematics of one reconstructed photon (GeV, radians)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotonEvent {
    pub tight_id: bool,
    pub pt: f64,
    pub ptcone20: f64,
    pub eta: f64,
    pub phi: f64,
    pub e: f64,
}

/// Leading and subleading photon of one collision event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotonPair {
    pub leading: PhotonEvent,
    pub subleading: PhotonEvent,
}

const COLUMNS: usize = 12;

const LEADING_PT_MIN: f64 = 40.0;
const SUBLEADING_PT_MIN: f64 = 30.0;
const ISOLATION_MAX: f64 = 4.0;
const TRANSITION_ETA: (f64, f64) = (1.37, 1.52);

impl PhotonEvent {
    fn in_transition_region(&self) -> bool {
        let eta = self.eta.abs();
        eta > TRANSITION_ETA.0 && eta < TRANSITION_ETA.1
    }

    fn isolated(&self) -> bool {
        self.ptcone20 <= ISOLATION_MAX
    }

    /// Cartesian momentum
    fn momentum(&self) -> (f64, f64, f64) {
        (
            self.pt * self.phi.cos(),
            self.pt * self.phi.sin(),
            self.pt * self.eta.sinh(),
        )
    }
}

impl PhotonPair {
    /// Tight ID, pT thresholds, isolation and calorimeter transition cuts
    pub fn passes_selection(&self) -> bool {
        let (a, b) = (&self.leading, &self.subleading);
        a.tight_id
            && b.tight_id
            && a.pt >= LEADING_PT_MIN
            && b.pt >= SUBLEADING_PT_MIN
            && a.isolated()
            && b.isolated()
            && !a.in_transition_region()
            && !b.in_transition_region()
    }

    /// Invariant mass of the two-photon system
    pub fn invariant_mass(&self) -> f64 {
        let (ax, ay, az) = self.leading.momentum();
        let (bx, by, bz) = self.subleading.momentum();

        let e = self.leading.e + self.subleading.e;
        let (px, py, pz) = (ax + bx, ay + by, az + bz);
        let m2 = e * e - (px * px + py * py + pz * pz);

        // Rounding can push massless systems slightly negative
        m2.max(0.0).sqrt()
    }
}

/// Parse event CSV: `tight0,tight1,pt0,pt1,ptcone0,ptcone1,eta0,eta1,phi0,phi1,e0,e1`.
///
/// Blank lines and `#` comments are skipped; a first line that does not parse
/// as numbers is taken as a header.
pub fn parse_events(text: &str) -> Result<Vec<PhotonPair>> {
    let mut events = Vec::new();
    let mut seen_content = false;

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let first = !seen_content;
        seen_content = true;

        match parse_line(line) {
            Ok(pair) => events.push(pair),
            Err(_) if first && looks_like_header(line) => continue,
            Err(reason) => {
                return Err(AnalysisError::MalformedEvent {
                    line: index + 1,
                    reason,
                })
            }
        }
    }

    Ok(events)
}

fn looks_like_header(line: &str) -> bool {
    line.split(',')
        .all(|field| field.trim().parse::<f64>().is_err())
}

fn parse_line(line: &str) -> std::result::Result<PhotonPair, String> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != COLUMNS {
        return Err(format!("expected {} columns, found {}", COLUMNS, fields.len()));
    }

    let number = |i: usize| -> std::result::Result<f64, String> {
        fields[i]
            .parse::<f64>()
            .map_err(|_| format!("column {} is not a number: {:?}", i + 1, fields[i]))
    };

    let photon = |i: usize| -> std::result::Result<PhotonEvent, String> {
        Ok(PhotonEvent {
            tight_id: parse_flag(fields[i])
                .ok_or_else(|| format!("column {} is not a flag: {:?}", i + 1, fields[i]))?,
            pt: number(2 + i)?,
            ptcone20: number(4 + i)?,
            eta: number(6 + i)?,
            phi: number(8 + i)?,
            e: number(10 + i)?,
        })
    };

    Ok(PhotonPair {
        leading: photon(0)?,
        subleading: photon(1)?,
    })
}

fn parse_flag(field: &str) -> Option<bool> {
    match field.to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}
