// Simulation window tracking
//
// The window is the span between the earliest and latest relay timestamp
// seen in any container. Bounds only ever widen.

use serde::Serialize;

use crate::ra_interface::{Timestamp, NANOS_PER_MILLI};

/// Running (min, max) over every ingested timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimulationWindow {
    bounds: Option<(Timestamp, Timestamp)>,
}

impl SimulationWindow {
    pub fn new() -> Self {
        Self { bounds: None }
    }

    /// Start from known bounds, e.g. a previous partial window
    pub fn seeded(min: Timestamp, max: Timestamp) -> Self {
        Self {
            bounds: Some((min.min(max), min.max(max))),
        }
    }

    /// Fold one timestamp into the window
    ///
    /// Both bounds are checked, so the very first timestamp sets both.
    pub fn observe(&mut self, ts: Timestamp) {
        self.bounds = Some(match self.bounds {
            None => (ts, ts),
            Some((min, max)) => (min.min(ts), max.max(ts)),
        });
    }

    /// Reduce two partial windows into one
    pub fn merge(&mut self, other: &SimulationWindow) {
        if let Some((min, max)) = other.bounds {
            self.observe(min);
            self.observe(max);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    pub fn min(&self) -> Option<Timestamp> {
        self.bounds.map(|(min, _)| min)
    }

    pub fn max(&self) -> Option<Timestamp> {
        self.bounds.map(|(_, max)| max)
    }

    /// Span of the window in milliseconds, 0.0 when nothing was observed
    pub fn duration_ms(&self) -> f64 {
        match self.bounds {
            Some((min, max)) => max.abs_diff(min) as f64 / NANOS_PER_MILLI,
            None => 0.0,
        }
    }
}
