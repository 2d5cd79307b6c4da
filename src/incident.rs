use crate::types::Vector3;

/// Default summed axis delta (m/s²) above which a transition counts as abrupt
pub const ABRUPT_DELTA_THRESHOLD: f64 = 1.5;

/// Counts abrupt accelerometer transitions.
///
/// Each reading is compared against the one before it; the first reading
/// only primes the detector.
#[derive(Clone, Debug)]
pub struct AbruptMovementDetector {
    previous: Option<Vector3>,
    threshold: f64,
    count: u32,
}

impl AbruptMovementDetector {
    pub fn new() -> Self {
        Self::with_threshold(ABRUPT_DELTA_THRESHOLD)
    }

    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            previous: None,
            threshold,
            count: 0,
        }
    }

    /// Feed the next reading. Returns true when the transition from the
    /// previous reading exceeds the threshold.
    pub fn observe(&mut self, reading: Vector3) -> bool {
        let abrupt = self
            .previous
            .map(|prev| reading.abs_delta_sum(&prev) > self.threshold)
            .unwrap_or(false);

        if abrupt {
            self.count += 1;
        }
        self.previous = Some(reading);
        abrupt
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Default for AbruptMovementDetector {
    fn default() -> Self {
        Self::new()
    }
}
