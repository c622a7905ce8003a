//! Automatic coarse/fine approach.
//!
//! Each cycle fully retracts the piezo, advances the steppers by less than
//! the piezo travel, then extends the piezo under current control until the
//! tunneling current crosses the setpoint. [`AutoApproach::step`] does one
//! controller poll or one stepper move per call so a caller can refresh a
//! display or watch for an interrupt between calls.

use std::collections::VecDeque;
use std::io::Write;

use crate::config::ApproachCfg;
use crate::error::{Result, StmError};
use crate::head::{ScanHead, StepStatus, ZTarget};

/// Fixed-capacity FIFO that drops the oldest entry when full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf: VecDeque<T>,
    cap: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            buf: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push(&mut self, v: T) {
        if self.buf.len() == self.cap {
            self.buf.pop_front();
        }
        self.buf.push_back(v);
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.buf.back()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Current and Z history of the piezo phases.
#[derive(Debug, Clone)]
pub struct ApproachTrace {
    pub current: RingBuffer<f64>,
    pub z: RingBuffer<i32>,
}

impl ApproachTrace {
    pub fn new(cap: usize) -> Self {
        Self {
            current: RingBuffer::new(cap),
            z: RingBuffer::new(cap),
        }
    }

    pub fn push(&mut self, current_pa: f64, z: i32) {
        self.current.push(current_pa);
        self.z.push(z);
    }

    /// `(current, z)` pairs, oldest first.
    pub fn rows(&self) -> impl Iterator<Item = (f64, i32)> + '_ {
        self.current.iter().copied().zip(self.z.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Write `current,z` rows, oldest first.
    pub fn dump<W: Write>(&self, w: W) -> Result<()> {
        crate::export::write_approach_trace(w, self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApproachFailure {
    Overcurrent,
    /// `max_cycles` retract/advance cycles without finding the surface.
    CycleLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApproachState {
    Retracting,
    AdvancingStepper,
    ApproachingPiezo,
    Surface,
    Failed(ApproachFailure),
}

impl ApproachState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Surface | Self::Failed(_))
    }
}

/// Snapshot returned after every call to [`AutoApproach::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApproachProgress {
    pub state: ApproachState,
    /// Controller status of this call; `None` for a stepper move or a no-op.
    pub last_status: Option<StepStatus>,
    /// 1-based retract/advance cycle.
    pub cycle: u32,
    /// Controller polls across all phases.
    pub polls: u64,
    /// Controller polls in the current piezo phase.
    pub piezo_polls: u64,
}

impl ApproachProgress {
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

pub struct AutoApproach {
    setpoint_pa: f64,
    cfg: ApproachCfg,
    state: ApproachState,
    cycle: u32,
    polls: u64,
    piezo_polls: u64,
    trace: ApproachTrace,
}

impl AutoApproach {
    pub fn new(setpoint_pa: f64, cfg: ApproachCfg) -> Self {
        let trace = ApproachTrace::new(cfg.trace_capacity);
        Self {
            setpoint_pa,
            cfg,
            state: ApproachState::Retracting,
            cycle: 1,
            polls: 0,
            piezo_polls: 0,
            trace,
        }
    }

    pub fn state(&self) -> ApproachState {
        self.state
    }

    pub fn trace(&self) -> &ApproachTrace {
        &self.trace
    }

    pub fn into_trace(self) -> ApproachTrace {
        self.trace
    }

    fn progress(&self, last_status: Option<StepStatus>) -> ApproachProgress {
        ApproachProgress {
            state: self.state,
            last_status,
            cycle: self.cycle,
            polls: self.polls,
            piezo_polls: self.piezo_polls,
        }
    }

    fn enter(&mut self, next: ApproachState) {
        if next != self.state {
            tracing::debug!(from = ?self.state, to = ?next, cycle = self.cycle, "approach phase");
            self.state = next;
        }
    }

    /// One poll or one stepper move. Terminal states are sticky.
    pub fn step(&mut self, head: &mut ScanHead) -> Result<ApproachProgress> {
        match self.state {
            ApproachState::Retracting => {
                head.set_setpoint_pa(self.setpoint_pa);
                let status = head.set_position_step(0, 0, ZTarget::Retract)?;
                self.polls += 1;
                match status {
                    StepStatus::Overcurrent => {
                        self.enter(ApproachState::Failed(ApproachFailure::Overcurrent));
                    }
                    StepStatus::Unattainable => self.enter(ApproachState::AdvancingStepper),
                    // Keep retracting until the travel limit.
                    StepStatus::Attained | StepStatus::NotYetAttained => {}
                }
                Ok(self.progress(Some(status)))
            }
            ApproachState::AdvancingStepper => {
                let rate = i32::try_from(self.cfg.advance_rate).unwrap_or(i32::MAX);
                head.move_stepper(self.cfg.advance_steps, rate)?;
                self.piezo_polls = 0;
                self.enter(ApproachState::ApproachingPiezo);
                Ok(self.progress(None))
            }
            ApproachState::ApproachingPiezo => {
                let status = head.set_position_step(0, 0, ZTarget::Current(self.setpoint_pa))?;
                self.polls += 1;
                self.piezo_polls += 1;
                if status == StepStatus::Overcurrent {
                    self.enter(ApproachState::Failed(ApproachFailure::Overcurrent));
                    return Ok(self.progress(Some(status)));
                }

                // The step drained its window before moving; measure at the new Z.
                head.fetch_current()?;
                let current = head.raw_current_pa();
                self.trace.push(current, head.position().z);
                tracing::trace!(current_pa = current, z = head.position().z, "approach poll");

                if current > self.setpoint_pa {
                    tracing::info!(
                        current_pa = current,
                        z = head.position().z,
                        stepper = head.z_stepper_offset(),
                        cycles = self.cycle,
                        "surface found"
                    );
                    self.enter(ApproachState::Surface);
                } else if status == StepStatus::Unattainable {
                    // Top of the piezo travel without contact.
                    if self.cfg.max_cycles.is_some_and(|max| self.cycle >= max) {
                        self.enter(ApproachState::Failed(ApproachFailure::CycleLimit));
                    } else {
                        self.cycle += 1;
                        self.enter(ApproachState::Retracting);
                    }
                }
                Ok(self.progress(Some(status)))
            }
            ApproachState::Surface | ApproachState::Failed(_) => Ok(self.progress(None)),
        }
    }

    /// Step until a terminal state.
    ///
    /// `max_polls` bounds the controller polls; `None` polls without limit.
    pub fn run(&mut self, head: &mut ScanHead, max_polls: Option<u64>) -> Result<ApproachProgress> {
        loop {
            let p = self.step(head)?;
            if p.is_terminal() {
                return Ok(p);
            }
            if let Some(limit) = max_polls.filter(|&l| self.polls >= l) {
                return Err(eyre::Report::new(StmError::PollLimit {
                    limit,
                    during: "approaching the surface",
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_overwrites_oldest() {
        let mut r = RingBuffer::new(3);
        for v in 1..=5 {
            r.push(v);
        }
        assert_eq!(r.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(r.latest(), Some(&5));
        assert_eq!(r.capacity(), 3);
    }

    #[test]
    fn zero_capacity_keeps_one() {
        let mut r = RingBuffer::new(0);
        r.push(1);
        r.push(2);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn trace_rows_pair_up() {
        let mut t = ApproachTrace::new(2);
        t.push(1.0, 10);
        t.push(2.0, 20);
        t.push(3.0, 30);
        assert_eq!(t.rows().collect::<Vec<_>>(), vec![(2.0, 20), (3.0, 30)]);
    }
}
