//! Simulated microscope.
//!
//! A single shared model backs three handles (`SimTia`, `SimPiezo`,
//! `SimStepper`) so the sampler thread and the control thread can own their
//! peripherals separately, as on the real board.
//!
//! Model: the tip extension is the common-mode of the four drive channels
//! (`z = half_scale - mean(ch)`), the coarse steppers close the gap by
//! `units_per_step` per step, and the tunneling current decays exponentially
//! with the remaining gap. Past contact the current grows linearly so a crash
//! is still visible to the overcurrent interlock.

use std::f64::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard};

use stm_traits::{BoxError, CurrentSense, PiezoDrive, Stepper};
use tracing::trace;

use crate::frames::MAX_CHANNEL;

#[derive(Debug, Clone)]
pub struct SimParams {
    /// DAC mid-scale; all channels idle here.
    pub half_scale: i32,
    /// Channels that carry X+, X-, Y+, Y-.
    pub drive_channels: [u8; 4],
    /// Gap (piezo units) between the resting tip and the sample at stepper offset 0.
    pub initial_gap: f64,
    /// Gap closed by one coarse step, in piezo units.
    pub units_per_step: f64,
    /// Gap over which the current falls by a factor e.
    pub decay_units: f64,
    /// Current at zero gap, pA.
    pub contact_pa: f64,
    /// ADC code at zero current.
    pub zero_raw: f64,
    /// ADC counts per pA (100 MOhm TIA into a 3.3 V / 16-bit ADC).
    pub counts_per_pa: f64,
    /// Mains pickup amplitude in ADC counts.
    pub hum_counts: f64,
    pub hum_hz: f64,
    pub sample_rate_hz: f64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            half_scale: 32_767,
            drive_channels: [0, 1, 2, 3],
            initial_gap: 32_767.0 + 15_000.0,
            units_per_step: 2_000.0,
            decay_units: 400.0,
            contact_pa: 20_000.0,
            zero_raw: 2_048.0,
            counts_per_pa: 65_536.0 / (3.3 * 10_000.0),
            hum_counts: 0.0,
            hum_hz: 60.0,
            sample_rate_hz: 20_000.0,
        }
    }
}

#[derive(Debug)]
struct SimState {
    params: SimParams,
    channels: [u16; 8],
    stepper_steps: i64,
    ticks: u64,
    reads: u64,
    channel_writes: u64,
}

impl SimState {
    fn extension(&self) -> f64 {
        let sum: f64 = self
            .params
            .drive_channels
            .iter()
            .map(|&c| f64::from(self.channels[usize::from(c)]))
            .sum();
        f64::from(self.params.half_scale) - sum / 4.0
    }

    fn gap(&self) -> f64 {
        self.params.initial_gap
            - self.stepper_steps as f64 * self.params.units_per_step
            - self.extension()
    }

    fn current_pa(&self) -> f64 {
        let p = &self.params;
        let gap = self.gap();
        if gap >= 0.0 {
            p.contact_pa * (-gap / p.decay_units).exp()
        } else {
            p.contact_pa * (1.0 - gap / p.decay_units)
        }
    }

    fn sample(&mut self) -> u16 {
        let p = &self.params;
        let t = self.ticks as f64 / p.sample_rate_hz;
        let hum = p.hum_counts * (2.0 * PI * p.hum_hz * t).sin();
        let raw = p.zero_raw + self.current_pa() * p.counts_per_pa + hum;
        self.ticks = self.ticks.wrapping_add(1);
        self.reads = self.reads.saturating_add(1);
        raw.round().clamp(0.0, f64::from(u16::MAX)) as u16
    }
}

/// Shared simulated microscope; hand out peripherals with the `*_handle` methods.
#[derive(Debug, Clone)]
pub struct SimulatedMicroscope {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedMicroscope {
    pub fn new(params: SimParams) -> Self {
        let half = params.half_scale.clamp(0, i32::from(u16::MAX)) as u16;
        Self {
            state: Arc::new(Mutex::new(SimState {
                params,
                channels: [half; 8],
                stepper_steps: 0,
                ticks: 0,
                reads: 0,
                channel_writes: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // The model has no invariants a panicking holder could break.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn tia(&self) -> SimTia {
        SimTia { sim: self.clone() }
    }

    pub fn piezo(&self) -> SimPiezo {
        SimPiezo { sim: self.clone() }
    }

    pub fn stepper(&self) -> SimStepper {
        SimStepper { sim: self.clone() }
    }

    /// Noise-free tunneling current at the present geometry, pA.
    pub fn true_current_pa(&self) -> f64 {
        self.lock().current_pa()
    }

    /// Remaining tip-sample gap in piezo units (negative means crashed).
    pub fn gap(&self) -> f64 {
        self.lock().gap()
    }

    pub fn channel(&self, channel: u8) -> u16 {
        self.lock().channels[usize::from(channel.min(MAX_CHANNEL))]
    }

    pub fn stepper_steps(&self) -> i64 {
        self.lock().stepper_steps
    }

    pub fn reads(&self) -> u64 {
        self.lock().reads
    }

    pub fn channel_writes(&self) -> u64 {
        self.lock().channel_writes
    }

    /// Move the sample surface (positive brings it closer).
    pub fn shift_surface(&self, units: f64) {
        self.lock().params.initial_gap -= units;
    }
}

/// Current-sense handle.
#[derive(Debug, Clone)]
pub struct SimTia {
    sim: SimulatedMicroscope,
}

impl CurrentSense for SimTia {
    fn read_current_raw(&mut self) -> Result<u16, BoxError> {
        Ok(self.sim.lock().sample())
    }
}

/// Piezo DAC handle.
#[derive(Debug, Clone)]
pub struct SimPiezo {
    sim: SimulatedMicroscope,
}

impl PiezoDrive for SimPiezo {
    fn write_piezo_channel(&mut self, channel: u8, value: u16) -> Result<(), BoxError> {
        if channel > MAX_CHANNEL {
            return Err(Box::new(crate::error::HwError::ChannelOutOfRange(channel)));
        }
        let mut st = self.sim.lock();
        st.channels[usize::from(channel)] = value;
        st.channel_writes = st.channel_writes.saturating_add(1);
        Ok(())
    }
}

/// Coarse stepper handle; moves are instantaneous.
#[derive(Debug, Clone)]
pub struct SimStepper {
    sim: SimulatedMicroscope,
}

impl Stepper for SimStepper {
    fn advance_stepper_motors(&mut self, steps: i32, rate: u32) -> Result<(), BoxError> {
        let mut st = self.sim.lock();
        st.stepper_steps += i64::from(steps);
        trace!(steps, rate, total = st.stepper_steps, "sim stepper move");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retracted_tip_reads_baseline() {
        let sim = SimulatedMicroscope::new(SimParams::default());
        let mut tia = sim.tia();
        let raw = tia.read_current_raw().unwrap();
        assert_eq!(raw, 2_048);
        assert!(sim.true_current_pa() < 1e-6);
    }

    #[test]
    fn common_mode_drive_extends_tip() {
        let sim = SimulatedMicroscope::new(SimParams::default());
        let before = sim.gap();
        let mut piezo = sim.piezo();
        for ch in 0..4 {
            piezo.write_piezo_channel(ch, 32_767 - 1_000).unwrap();
        }
        assert!((before - sim.gap() - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn differential_drive_does_not_change_gap() {
        let sim = SimulatedMicroscope::new(SimParams::default());
        let before = sim.gap();
        let mut piezo = sim.piezo();
        piezo.write_piezo_channel(0, 32_767 + 500).unwrap();
        piezo.write_piezo_channel(1, 32_767 - 500).unwrap();
        assert!((before - sim.gap()).abs() < 1e-9);
    }

    #[test]
    fn stepper_closes_gap() {
        let sim = SimulatedMicroscope::new(SimParams::default());
        let before = sim.gap();
        sim.stepper().advance_stepper_motors(3, 100).unwrap();
        assert!((before - sim.gap() - 6_000.0).abs() < 1e-9);
        assert_eq!(sim.stepper_steps(), 3);
    }

    #[test]
    fn crash_keeps_current_rising() {
        let sim = SimulatedMicroscope::new(SimParams::default());
        sim.shift_surface(60_000.0);
        assert!(sim.gap() < 0.0);
        assert!(sim.true_current_pa() > 20_000.0);
    }
}
