use crate::event::parse_events;
use crate::histogram::MassHistogram;
use fanout_core::{Processor, Task};
use std::path::Path;
use tracing::debug;

/// Selects diphoton candidates from one event file and histograms their mass
#[derive(Debug, Clone, Copy, Default)]
pub struct DiphotonProcessor;

impl DiphotonProcessor {
    pub fn histogram(&self, task: &Task) -> Result<MassHistogram, String> {
        let path = Path::new(&task.locator);
        if !path.exists() {
            return Err("File not found".to_string());
        }

        let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let events = parse_events(&text).map_err(|e| e.to_string())?;

        let limit = (events.len() as f64 * task.fraction).floor() as usize;
        let mut histogram = MassHistogram::new();
        let mut selected = 0usize;

        for pair in events.iter().take(limit) {
            if pair.passes_selection() {
                histogram.fill(pair.invariant_mass());
                selected += 1;
            }
        }

        debug!(
            "{}: {} of {} events read, {} selected",
            task.locator,
            limit,
            events.len(),
            selected
        );
        Ok(histogram)
    }
}

impl Processor for DiphotonProcessor {
    fn process(&self, task: &Task) -> Result<Vec<u8>, String> {
        let histogram = self.histogram(task)?;
        histogram.to_bytes().map_err(|e| e.to_string())
    }
}
