//! Hardware seams for the scan head.
//!
//! The core only talks to the microscope through these traits, so the real
//! SPI/GPIO back-ends, the simulator and test doubles are interchangeable.
pub mod clock;
pub mod telemetry;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use telemetry::{Axes, StatusCode, Telemetry};

/// Error type crossing the trait boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Current-sense ADC behind the transimpedance amplifier.
pub trait CurrentSense {
    /// One raw conversion, full scale 0..=u16::MAX.
    fn read_current_raw(&mut self) -> Result<u16, BoxError>;
}

/// Multi-channel piezo DAC.
pub trait PiezoDrive {
    /// Write and latch one DAC channel (0..=7).
    fn write_piezo_channel(&mut self, channel: u8, value: u16) -> Result<(), BoxError>;
}

/// The three ganged coarse-approach steppers.
pub trait Stepper {
    /// Move all motors `steps` in lockstep at `rate` steps per second. Blocking.
    fn advance_stepper_motors(&mut self, steps: i32, rate: u32) -> Result<(), BoxError>;
}

/// Display / telemetry consumer. Must return promptly.
pub trait TelemetrySink {
    fn publish(&mut self, frame: &Telemetry);
}

impl<T: CurrentSense + ?Sized> CurrentSense for Box<T> {
    fn read_current_raw(&mut self) -> Result<u16, BoxError> {
        (**self).read_current_raw()
    }
}

impl<T: PiezoDrive + ?Sized> PiezoDrive for Box<T> {
    fn write_piezo_channel(&mut self, channel: u8, value: u16) -> Result<(), BoxError> {
        (**self).write_piezo_channel(channel, value)
    }
}

impl<T: Stepper + ?Sized> Stepper for Box<T> {
    fn advance_stepper_motors(&mut self, steps: i32, rate: u32) -> Result<(), BoxError> {
        (**self).advance_stepper_motors(steps, rate)
    }
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Box<T> {
    fn publish(&mut self, frame: &Telemetry) {
        (**self).publish(frame)
    }
}
