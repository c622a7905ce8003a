//! Common time/period helpers for stm_core.

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Sampling rate in Hz for a period in microseconds (period clamped to >= 1 µs).
#[inline]
pub fn rate_hz(period_us: u64) -> f64 {
    MICROS_PER_SEC as f64 / period_us.max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifty_microseconds_is_twenty_kilohertz() {
        assert!((rate_hz(50) - 20_000.0).abs() < 1e-9);
        assert!((rate_hz(0) - 1_000_000.0).abs() < 1e-9);
    }
}
