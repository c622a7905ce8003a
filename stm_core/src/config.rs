//! Runtime configuration for the scan head.
//!
//! These are the structs the controller and engines consume. They are
//! separate from the TOML-deserialized config in `stm_config`; the defaults
//! here are the control-law constants of the stock instrument.

use std::time::Duration;

use crate::filter::{Cascade, Coefficients};

/// DAC mid-scale; a channel at this code applies 0 V.
pub const HALF_SCALE: i32 = 32_767;
pub const MIN_CHANNEL: i32 = 0;
pub const MAX_CHANNEL: i32 = 65_535;

/// PID gains for one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Gains {
    pub const fn p(kp: f64) -> Self {
        Self {
            kp,
            ki: 0.0,
            kd: 0.0,
        }
    }
}

/// Position-controller limits, gains and timing.
#[derive(Debug, Clone)]
pub struct ControllerCfg {
    pub half_scale: i32,
    pub min_channel: i32,
    pub max_channel: i32,
    /// Largest X/Y move per controller step (piezo units).
    pub max_transverse_step: i32,
    /// Largest Z move per controller step (piezo units).
    pub max_z_step: i32,
    pub transverse: Gains,
    pub z: Gains,
    /// Wait after the four channel writes before returning.
    pub settle: Duration,
}

impl Default for ControllerCfg {
    fn default() -> Self {
        Self {
            half_scale: HALF_SCALE,
            min_channel: MIN_CHANNEL,
            max_channel: MAX_CHANNEL,
            max_transverse_step: 50,
            max_z_step: 100,
            transverse: Gains::p(1.0),
            // Ki stays 0: the integral is never cleared between scans.
            z: Gains::p(0.5),
            settle: Duration::from_micros(500),
        }
    }
}

/// DAC channel assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMap {
    pub x_plus: u8,
    pub x_minus: u8,
    pub y_plus: u8,
    pub y_minus: u8,
    pub sample_pad: u8,
    /// Code parked on the sample pad at start-up.
    pub sample_bias: u16,
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            x_plus: 0,
            x_minus: 1,
            y_plus: 2,
            y_minus: 3,
            sample_pad: 4,
            sample_bias: 37_500,
        }
    }
}

/// Overcurrent interlock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyCfg {
    /// Strictly-greater threshold in pA.
    pub overcurrent_pa: f64,
    /// Emergency stepper move (negative retracts).
    pub retract_steps: i32,
    pub retract_rate: u32,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            overcurrent_pa: 10_000.0,
            retract_steps: -50,
            retract_rate: 4_096,
        }
    }
}

/// Where samples come from between fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedKind {
    #[default]
    Inline,
    Background,
}

#[derive(Debug, Clone)]
pub struct AcquisitionCfg {
    pub feed: FeedKind,
    pub sample_period_us: u64,
    /// Inline feed only: samples taken right before each drain.
    pub ticks_per_fetch: u32,
    /// Wait between the discarded and the kept reading during calibration.
    pub calibrate_settle: Duration,
    /// Background feed only: fetches fail once no good sample arrived for this long.
    pub stall_timeout: Duration,
}

impl Default for AcquisitionCfg {
    fn default() -> Self {
        Self {
            feed: FeedKind::Inline,
            sample_period_us: 50,
            ticks_per_fetch: 10,
            calibrate_settle: Duration::from_millis(100),
            stall_timeout: Duration::from_millis(20),
        }
    }
}

impl AcquisitionCfg {
    pub fn sample_rate_hz(&self) -> f64 {
        crate::util::rate_hz(self.sample_period_us)
    }
}

/// Filter selection for the acquisition front end.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterCfg {
    /// Raw samples are integrated unfiltered.
    Disabled,
    /// `stages` identical band-stop sections designed for the sample rate.
    Notch {
        center_hz: f64,
        bandwidth_hz: f64,
        stages: usize,
    },
    /// Explicit normalized sections.
    Sections(Vec<Coefficients>),
}

impl Default for FilterCfg {
    fn default() -> Self {
        Self::Notch {
            center_hz: 60.0,
            bandwidth_hz: 4.0,
            stages: 2,
        }
    }
}

impl FilterCfg {
    /// Build the cascade; `None` if the notch cannot be realized at this rate.
    pub fn cascade(&self, sample_rate_hz: f64) -> Option<Cascade> {
        match self {
            Self::Disabled => Some(Cascade::default()),
            Self::Notch {
                center_hz,
                bandwidth_hz,
                stages,
            } => Cascade::notch(*center_hz, *bandwidth_hz, sample_rate_hz, *stages),
            Self::Sections(s) => Some(Cascade::from_coefficients(s)),
        }
    }
}

/// Auto-approach tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ApproachCfg {
    /// Coarse steps per advance; must move less than the piezo Z travel.
    pub advance_steps: i32,
    pub advance_rate: u32,
    /// Ring-buffer length of the current/Z trace.
    pub trace_capacity: usize,
    /// Give up after this many retract/advance cycles.
    pub max_cycles: Option<u32>,
}

impl Default for ApproachCfg {
    fn default() -> Self {
        Self {
            advance_steps: 3,
            advance_rate: 100,
            trace_capacity: 1_000,
            max_cycles: None,
        }
    }
}

/// Raster-scan defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCfg {
    pub step: u32,
    pub max_polls_per_point: Option<u64>,
}

impl Default for ScanCfg {
    fn default() -> Self {
        Self {
            step: 1,
            max_polls_per_point: None,
        }
    }
}
