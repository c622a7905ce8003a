//! Per-axis PID state.

use crate::config::Gains;

/// Integral and previous error for one axis.
///
/// The integral is never cleared after construction; long runs with a
/// non-zero `ki` accumulate windup.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pid {
    integral: f64,
    prev_error: f64,
}

impl Pid {
    pub const fn new() -> Self {
        Self {
            integral: 0.0,
            prev_error: 0.0,
        }
    }

    /// Feed one error sample and return the raw (unsaturated) step.
    #[inline]
    pub fn update(&mut self, error: f64, gains: &Gains) -> f64 {
        self.integral += error;
        let derivative = error - self.prev_error;
        self.prev_error = error;
        error * gains.kp + self.integral * gains.ki + derivative * gains.kd
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn prev_error(&self) -> f64 {
        self.prev_error
    }
}

/// Truncate toward zero and saturate to `±limit`, keeping the sign.
#[inline]
pub fn saturate(step: f64, limit: i32) -> i32 {
    let limit = limit.abs();
    if step.is_nan() {
        return 0;
    }
    (step.trunc().clamp(-f64::from(limit), f64::from(limit))) as i32
}
