pub mod scalar_kalman;

pub use scalar_kalman::ScalarKalman;
