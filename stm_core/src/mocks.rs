//! Test and helper doubles for stm_core.

use std::sync::{Arc, Mutex};

use stm_traits::{BoxError, CurrentSense, PiezoDrive, Stepper, Telemetry, TelemetrySink};

fn shared<T>() -> Arc<Mutex<Vec<T>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn snapshot<T: Clone>(v: &Arc<Mutex<Vec<T>>>) -> Vec<T> {
    v.lock().map(|g| g.clone()).unwrap_or_default()
}

/// Current sense that replays a raw-code function of the sample index.
pub struct ScriptedCurrent<F: FnMut(u64) -> u16> {
    f: F,
    n: u64,
}

impl<F: FnMut(u64) -> u16> ScriptedCurrent<F> {
    pub fn new(f: F) -> Self {
        Self { f, n: 0 }
    }
}

impl<F: FnMut(u64) -> u16> CurrentSense for ScriptedCurrent<F> {
    fn read_current_raw(&mut self) -> Result<u16, BoxError> {
        let v = (self.f)(self.n);
        self.n += 1;
        Ok(v)
    }
}

/// Current sense returning one code forever; the level can be changed through a clone.
#[derive(Debug, Clone)]
pub struct ConstantCurrent {
    raw: Arc<Mutex<u16>>,
}

impl ConstantCurrent {
    pub fn new(raw: u16) -> Self {
        Self {
            raw: Arc::new(Mutex::new(raw)),
        }
    }

    pub fn set(&self, raw: u16) {
        if let Ok(mut g) = self.raw.lock() {
            *g = raw;
        }
    }
}

impl CurrentSense for ConstantCurrent {
    fn read_current_raw(&mut self) -> Result<u16, BoxError> {
        Ok(self.raw.lock().map(|g| *g).unwrap_or(0))
    }
}

/// Current sense that always errors.
pub struct DeadSense;

impl CurrentSense for DeadSense {
    fn read_current_raw(&mut self) -> Result<u16, BoxError> {
        Err(Box::new(std::io::Error::other("tia not responding")))
    }
}

/// Piezo drive that records every `(channel, value)` write.
#[derive(Debug, Clone, Default)]
pub struct RecordingPiezo {
    writes: Arc<Mutex<Vec<(u8, u16)>>>,
}

impl RecordingPiezo {
    pub fn new() -> Self {
        Self { writes: shared() }
    }

    pub fn writes(&self) -> Vec<(u8, u16)> {
        snapshot(&self.writes)
    }

    pub fn clear(&self) {
        if let Ok(mut g) = self.writes.lock() {
            g.clear();
        }
    }
}

impl PiezoDrive for RecordingPiezo {
    fn write_piezo_channel(&mut self, channel: u8, value: u16) -> Result<(), BoxError> {
        if let Ok(mut g) = self.writes.lock() {
            g.push((channel, value));
        }
        Ok(())
    }
}

/// Stepper that records every `(steps, rate)` move.
#[derive(Debug, Clone, Default)]
pub struct RecordingStepper {
    moves: Arc<Mutex<Vec<(i32, u32)>>>,
}

impl RecordingStepper {
    pub fn new() -> Self {
        Self { moves: shared() }
    }

    pub fn moves(&self) -> Vec<(i32, u32)> {
        snapshot(&self.moves)
    }
}

impl Stepper for RecordingStepper {
    fn advance_stepper_motors(&mut self, steps: i32, rate: u32) -> Result<(), BoxError> {
        if let Ok(mut g) = self.moves.lock() {
            g.push((steps, rate));
        }
        Ok(())
    }
}

/// Telemetry sink that keeps every frame.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    frames: Arc<Mutex<Vec<Telemetry>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self { frames: shared() }
    }

    pub fn frames(&self) -> Vec<Telemetry> {
        snapshot(&self.frames)
    }
}

impl TelemetrySink for RecordingSink {
    fn publish(&mut self, frame: &Telemetry) {
        if let Ok(mut g) = self.frames.lock() {
            g.push(*frame);
        }
    }
}
