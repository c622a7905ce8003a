#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Scan-head control core (hardware-agnostic).
//!
//! All hardware goes through the `stm_traits` seams: `CurrentSense` for the
//! TIA, `PiezoDrive` for the quadrant piezo DAC, `Stepper` for the coarse
//! motors and `TelemetrySink` for the display.
//!
//! ## Architecture
//!
//! - **Acquisition**: 20 kHz sampling, notch filtering and windowed integration
//!   (`acquisition`, `sampler`, `filter`)
//! - **Control**: bounded PID steps with channel clamping and an overcurrent
//!   interlock (`head`, `pid`)
//! - **Approach**: retract / advance / extend state machine (`approach`)
//! - **Scanning**: line and boustrophedon area rasters (`scan`), host dumps (`export`)
//!
//! Positions are signed piezo units around the DAC mid-scale; currents are pA.

pub mod acquisition;
pub mod approach;
pub mod builder;
pub mod config;
pub mod conversions;
pub mod error;
pub mod export;
pub mod filter;
pub mod head;
pub mod hw_error;
pub mod mocks;
pub mod pid;
pub mod runner;
pub mod sampler;
pub mod scan;
pub mod util;

pub use acquisition::{CurrentAcquisition, Feed, SampleFrontEnd, SharedWindows, TiaConversion};
pub use approach::{
    ApproachFailure, ApproachProgress, ApproachState, ApproachTrace, AutoApproach, RingBuffer,
};
pub use builder::{Missing, ScanHeadBuilder, Set};
pub use config::{
    AcquisitionCfg, ApproachCfg, ChannelMap, ControllerCfg, FeedKind, FilterCfg, Gains, SafetyCfg,
    ScanCfg,
};
pub use conversions::CoreSettings;
pub use error::{BuildError, Report, Result, StmError};
pub use filter::{Biquad, Cascade, Coefficients, MAINS_NOTCH_60HZ};
pub use head::{ScanHead, StepStatus, ZTarget};
pub use runner::{ApproachOutcome, run_approach, run_area_scan, run_line_scan};
pub use sampler::Sampler;
pub use scan::{
    AreaPoint, AreaScan, AreaTrace, Direction, LineScan, LineTrace, ScanStatus, scan_one_axis,
    scan_two_axes,
};
