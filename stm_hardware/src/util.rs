use std::time::Duration;

/// Half-step coil pattern for a 4-wire stepper (A, B, C, D).
pub const PHASES: [[bool; 4]; 4] = [
    [true, false, true, false],
    [false, true, true, false],
    [false, true, false, true],
    [true, false, false, true],
];

/// Delay between phase changes for a given step rate.
/// - Clamps `rate` to at least 1 step/s.
/// - Never returns less than 1 microsecond.
#[inline]
pub fn step_interval(rate: u32) -> Duration {
    Duration::from_micros((1_000_000 / u64::from(rate.max(1))).max(1))
}

/// Phase index after moving `steps` from `phase` (wraps both directions).
#[inline]
pub fn next_phase(phase: usize, steps: i32) -> usize {
    let n = PHASES.len() as i64;
    ((phase as i64 + i64::from(steps)).rem_euclid(n)) as usize
}
