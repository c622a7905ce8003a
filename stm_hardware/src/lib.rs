//! Peripheral back-ends for the scan head.
//!
//! - `frames`: DAC / ADC wire framing (always built, pure)
//! - `sim`: simulated microscope implementing every `stm_traits` seam
//! - `spi` (feature `hardware`, Linux): rppal SPI/GPIO drivers
pub mod error;
pub mod frames;
pub mod sim;
pub mod util;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod spi;

pub use error::HwError;
pub use sim::{SimParams, SimPiezo, SimStepper, SimTia, SimulatedMicroscope};
