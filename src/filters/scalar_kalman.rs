/// One-dimensional recursive estimator for smoothing a noisy scalar signal
/// (GPS latitude, longitude, or a single accelerometer axis).
///
/// Call `update` once per time step with the newest measurement.
#[derive(Clone, Debug)]
pub struct ScalarKalman {
    process_noise: f64,
    measurement_noise: f64,
    estimated_error: f64,
    current_estimate: f64,
}

impl ScalarKalman {
    pub fn new(
        process_noise: f64,
        measurement_noise: f64,
        estimated_error: f64,
        initial_value: f64,
    ) -> Self {
        Self {
            process_noise,
            measurement_noise,
            estimated_error,
            current_estimate: initial_value,
        }
    }

    /// Fold one measurement into the estimate and return the smoothed value.
    ///
    /// Measurements must be finite; callers validate before feeding the filter.
    pub fn update(&mut self, measurement: f64) -> f64 {
        debug_assert!(measurement.is_finite(), "non-finite measurement");

        let gain = self.estimated_error / (self.estimated_error + self.measurement_noise);
        self.current_estimate += gain * (measurement - self.current_estimate);
        self.estimated_error =
            (1.0 - gain) * self.estimated_error + self.current_estimate.abs() * self.process_noise;

        self.current_estimate
    }

    pub fn estimate(&self) -> f64 {
        self.current_estimate
    }

    pub fn estimated_error(&self) -> f64 {
        self.estimated_error
    }
}
