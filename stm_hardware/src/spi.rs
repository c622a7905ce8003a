//! rppal-backed piezo DAC, TIA ADC and stepper gang.

use std::time::Duration;

use rppal::gpio::{Gpio, OutputPin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use stm_traits::{BoxError, CurrentSense, PiezoDrive, Stepper};
use tracing::{debug, trace};

use crate::error::{HwError, Result};
use crate::frames::{ENABLE_ALL_OUTPUTS, INTERNAL_REFERENCE, decode_sample, encode_channel_write};
use crate::util::{PHASES, next_phase, step_interval};

fn spi_err(e: rppal::spi::Error) -> HwError {
    HwError::Spi(e.to_string())
}

fn gpio_err(e: rppal::gpio::Error) -> HwError {
    HwError::Gpio(e.to_string())
}

pub struct SpiPiezoDac {
    spi: Spi,
}

impl SpiPiezoDac {
    /// Open the DAC on SPI0/CE0 (mode 1, 1 MHz), power all outputs and select the internal reference.
    pub fn open() -> Result<Self> {
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, 1_000_000, Mode::Mode1).map_err(spi_err)?;
        let mut dac = Self { spi };
        dac.send(&ENABLE_ALL_OUTPUTS)?;
        dac.send(&INTERNAL_REFERENCE)?;
        std::thread::sleep(Duration::from_millis(1));
        debug!("piezo dac ready");
        Ok(dac)
    }

    fn send(&mut self, frame: &[u8; 4]) -> Result<()> {
        let n = self.spi.write(frame).map_err(spi_err)?;
        if n != frame.len() {
            return Err(HwError::ShortTransfer {
                expected: frame.len(),
                got: n,
            });
        }
        Ok(())
    }
}

impl PiezoDrive for SpiPiezoDac {
    fn write_piezo_channel(&mut self, channel: u8, value: u16) -> std::result::Result<(), BoxError> {
        let frame = encode_channel_write(channel, value)?;
        self.send(&frame)?;
        Ok(())
    }
}

pub struct SpiTia {
    spi: Spi,
}

impl SpiTia {
    /// Open the TIA ADC on SPI1/CE0 (mode 3, 100 kHz).
    pub fn open() -> Result<Self> {
        let spi = Spi::new(Bus::Spi1, SlaveSelect::Ss0, 100_000, Mode::Mode3).map_err(spi_err)?;
        Ok(Self { spi })
    }
}

impl CurrentSense for SpiTia {
    fn read_current_raw(&mut self) -> std::result::Result<u16, BoxError> {
        let mut buf = [0u8; 2];
        let n = self.spi.transfer(&mut buf, &[0xFF, 0xFF]).map_err(spi_err)?;
        if n != buf.len() {
            return Err(Box::new(HwError::ShortTransfer {
                expected: buf.len(),
                got: n,
            }));
        }
        Ok(decode_sample(buf))
    }
}

/// Three 4-wire steppers driven through the same phase sequence.
pub struct GpioStepperGang {
    motors: Vec<[OutputPin; 4]>,
    phase: usize,
}

impl GpioStepperGang {
    /// `pins` lists A, B, C, D for each motor.
    pub fn open(pins: &[[u8; 4]]) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let mut motors = Vec::with_capacity(pins.len());
        for set in pins {
            let a = gpio.get(set[0]).map_err(gpio_err)?.into_output();
            let b = gpio.get(set[1]).map_err(gpio_err)?.into_output();
            let c = gpio.get(set[2]).map_err(gpio_err)?.into_output();
            let d = gpio.get(set[3]).map_err(gpio_err)?.into_output();
            motors.push([a, b, c, d]);
        }
        Ok(Self { motors, phase: 0 })
    }

    fn energize(&mut self) {
        let pattern = PHASES[self.phase];
        for coils in &mut self.motors {
            for (pin, on) in coils.iter_mut().zip(pattern) {
                if on {
                    pin.set_high();
                } else {
                    pin.set_low();
                }
            }
        }
    }
}

impl Stepper for GpioStepperGang {
    fn advance_stepper_motors(&mut self, steps: i32, rate: u32) -> std::result::Result<(), BoxError> {
        let dir = steps.signum();
        let interval = step_interval(rate);
        for _ in 0..steps.unsigned_abs() {
            self.phase = next_phase(self.phase, dir);
            self.energize();
            std::thread::sleep(interval);
        }
        trace!(steps, rate, "stepper gang moved");
        Ok(())
    }
}
