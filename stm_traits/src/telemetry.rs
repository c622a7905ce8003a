//! Telemetry frame handed to the display after every controller step.

use std::fmt;

/// One value per logical axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Axes<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T> Axes<T> {
    pub const fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }
}

/// What the scan head is currently doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusCode {
    /// Coarse steppers are moving.
    ApproachStepper,
    /// Piezo loop running outside of a scan.
    #[default]
    ApproachPiezo,
    /// A raster scan engine owns the loop.
    Scanning,
    /// Overcurrent interlock tripped.
    Overcurrent,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::ApproachStepper => "approach-stepper",
            StatusCode::ApproachPiezo => "approach-piezo",
            StatusCode::Scanning => "scanning",
            StatusCode::Overcurrent => "overcurrent",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Telemetry {
    pub status: StatusCode,
    /// Piezo deflection units.
    pub position: Axes<i32>,
    pub z_stepper_offset: i32,
    /// Filtered tunneling current, pA.
    pub current_pa: f64,
    /// Last per-axis controller error (x/y in piezo units, z in pA).
    pub last_error: Axes<f64>,
}
