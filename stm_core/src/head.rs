//! Closed-loop position controller for the scan head.
//!
//! X and Y are differential drives on the quadrant piezo; Z is the common
//! mode of all four channels. One call to [`ScanHead::set_position_step`]
//! moves the tip by at most one bounded increment toward a target, so the
//! engines on top poll it until the target is reached.

use std::sync::Arc;

use eyre::WrapErr;
use stm_traits::{Axes, Clock, PiezoDrive, StatusCode, Stepper, Telemetry, TelemetrySink};

use crate::acquisition::CurrentAcquisition;
use crate::config::{ChannelMap, ControllerCfg, SafetyCfg};
use crate::error::Result;
use crate::hw_error::map_hw_error;
use crate::pid::{Pid, saturate};

/// Outcome of one controller step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// X/Y still moving toward the target.
    NotYetAttained,
    /// A channel hit its DAC bound; the clamped values were still written.
    Unattainable,
    /// Current exceeded the interlock; steppers retracted, piezo untouched.
    Overcurrent,
    /// X and Y equal the target exactly.
    Attained,
}

impl StepStatus {
    /// Legacy integer code: 0, -1, -2, 1.
    pub const fn code(self) -> i32 {
        match self {
            Self::NotYetAttained => 0,
            Self::Unattainable => -1,
            Self::Overcurrent => -2,
            Self::Attained => 1,
        }
    }

    /// True for the statuses a polling loop keeps going on.
    pub const fn is_progress(self) -> bool {
        matches!(self, Self::NotYetAttained | Self::Attained)
    }
}

/// What the Z axis should do during a step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZTarget {
    /// No height control; Z keeps its position.
    Hold,
    /// Pull the tip back by `max_z_step`.
    Retract,
    /// Servo Z on the tunneling current, pA.
    Current(f64),
}

impl ZTarget {
    /// `-1` holds, `-2` retracts, anything else is a current setpoint in pA.
    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => Self::Hold,
            -2 => Self::Retract,
            pa => Self::Current(f64::from(pa)),
        }
    }
}

pub struct ScanHead {
    pub(crate) piezo: Box<dyn PiezoDrive>,
    pub(crate) stepper: Box<dyn Stepper>,
    pub(crate) acq: CurrentAcquisition,
    pub(crate) sink: Option<Box<dyn TelemetrySink>>,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) cfg: ControllerCfg,
    pub(crate) channels: ChannelMap,
    pub(crate) safety: SafetyCfg,
    pub(crate) position: Axes<i32>,
    pub(crate) z_stepper_offset: i32,
    pub(crate) pid: Axes<Pid>,
    pub(crate) status: StatusCode,
    pub(crate) setpoint_pa: f64,
    pub(crate) last_error: Axes<f64>,
    pub(crate) polls: u64,
}

impl core::fmt::Debug for ScanHead {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScanHead")
            .field("position", &self.position)
            .field("z_stepper_offset", &self.z_stepper_offset)
            .field("status", &self.status)
            .field("current_pa", &self.acq.current_pa())
            .field("setpoint_pa", &self.setpoint_pa)
            .finish()
    }
}

impl ScanHead {
    /// Start building a ScanHead.
    pub fn builder() -> crate::builder::ScanHeadBuilder<
        crate::builder::Missing,
        crate::builder::Missing,
        crate::builder::Missing,
    > {
        crate::builder::ScanHeadBuilder::default()
    }

    /// One bounded PID step toward `(x, y)` with Z per `z`.
    ///
    /// Call repeatedly until the status is anything but `NotYetAttained`.
    pub fn set_position_step(&mut self, x: i32, y: i32, z: ZTarget) -> Result<StepStatus> {
        if self.status != StatusCode::Scanning {
            self.status = StatusCode::ApproachPiezo;
        }
        self.polls = self.polls.saturating_add(1);

        let current = self.acq.fetch_current()?;

        let ex = f64::from(x) - f64::from(self.position.x);
        let ey = f64::from(y) - f64::from(self.position.y);
        let sx = saturate(
            self.pid.x.update(ex, &self.cfg.transverse),
            self.cfg.max_transverse_step,
        );
        let sy = saturate(
            self.pid.y.update(ey, &self.cfg.transverse),
            self.cfg.max_transverse_step,
        );
        let (ez, sz) = match z {
            ZTarget::Hold => (0.0, 0),
            ZTarget::Retract => (0.0, -self.cfg.max_z_step),
            ZTarget::Current(setpoint) => {
                self.setpoint_pa = setpoint;
                let e = setpoint - current;
                (e, saturate(self.pid.z.update(e, &self.cfg.z), self.cfg.max_z_step))
            }
        };
        self.last_error = Axes::new(ex, ey, ez);

        if current > self.safety.overcurrent_pa {
            self.status = StatusCode::Overcurrent;
            tracing::warn!(
                current_pa = current,
                limit_pa = self.safety.overcurrent_pa,
                "overcurrent, retracting steppers"
            );
            if self.safety.retract_rate > 0 {
                self.drive_stepper(self.safety.retract_steps, self.safety.retract_rate)
                    .wrap_err("overcurrent retract")?;
            }
            self.publish();
            return Ok(StepStatus::Overcurrent);
        }

        let next = Axes::new(
            self.position.x.saturating_add(sx),
            self.position.y.saturating_add(sy),
            self.position.z.saturating_add(sz),
        );
        let (codes, clamped) = self.channel_codes(next);
        if !clamped {
            self.position = next;
        }

        let ch = self.channels;
        for (channel, code) in [ch.x_plus, ch.x_minus, ch.y_plus, ch.y_minus]
            .into_iter()
            .zip(codes)
        {
            self.write_channel(channel, code)?;
        }
        self.clock.sleep(self.cfg.settle);

        tracing::trace!(
            x = self.position.x,
            y = self.position.y,
            z = self.position.z,
            current_pa = current,
            clamped,
            "controller step"
        );
        self.publish();

        Ok(if clamped {
            StepStatus::Unattainable
        } else if self.position.x == x && self.position.y == y {
            StepStatus::Attained
        } else {
            StepStatus::NotYetAttained
        })
    }

    /// Channel codes for a logical position, clamped to the DAC bounds.
    fn channel_codes(&self, p: Axes<i32>) -> ([u16; 4], bool) {
        let half = i64::from(self.cfg.half_scale);
        let (x, y, z) = (i64::from(p.x), i64::from(p.y), i64::from(p.z));
        let lo = i64::from(self.cfg.min_channel);
        let hi = i64::from(self.cfg.max_channel);
        let mut clamped = false;
        let codes = [half - z + x, half - z - x, half - z + y, half - z - y].map(|v| {
            if v < lo || v > hi {
                clamped = true;
            }
            to_code(v.clamp(lo, hi))
        });
        (codes, clamped)
    }

    fn write_channel(&mut self, channel: u8, code: u16) -> Result<()> {
        self.piezo
            .write_piezo_channel(channel, code)
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err_with(|| format!("writing piezo channel {channel}"))
    }

    /// Ganged coarse move. Blocking.
    ///
    /// A zero rate does nothing; a negative rate reverses the direction.
    pub fn move_stepper(&mut self, steps: i32, rate: i32) -> Result<()> {
        if rate == 0 {
            return Ok(());
        }
        let steps = if rate < 0 { -steps } else { steps };
        self.status = StatusCode::ApproachStepper;
        self.drive_stepper(steps, rate.unsigned_abs())
    }

    fn drive_stepper(&mut self, steps: i32, rate: u32) -> Result<()> {
        self.stepper
            .advance_stepper_motors(steps, rate)
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err("moving steppers")?;
        self.z_stepper_offset = self.z_stepper_offset.saturating_add(steps);
        tracing::debug!(steps, rate, offset = self.z_stepper_offset, "stepper move");
        Ok(())
    }

    /// Center the four drive channels and bias the sample pad.
    pub fn park(&mut self) -> Result<()> {
        let ch = self.channels;
        let half = to_code(i64::from(self.cfg.half_scale));
        for channel in [ch.x_plus, ch.x_minus, ch.y_plus, ch.y_minus] {
            self.write_channel(channel, half)?;
        }
        self.write_channel(ch.sample_pad, ch.sample_bias)?;
        self.position = Axes::default();
        tracing::debug!(bias = ch.sample_bias, "piezo parked");
        Ok(())
    }

    /// Drain the control window; filtered current in pA.
    pub fn fetch_current(&mut self) -> Result<f64> {
        self.acq.fetch_current()
    }

    /// Drain the log window; filtered current in pA.
    pub fn fetch_current_log(&mut self) -> f64 {
        self.acq.fetch_current_log()
    }

    /// Zero-current baseline. Only valid with the tip retracted.
    pub fn calibrate_zero_current(&mut self) -> Result<f64> {
        let clock = self.clock.clone();
        self.acq.calibrate_zero_current(&*clock)
    }

    pub fn is_calibrated(&self) -> bool {
        self.acq.is_calibrated()
    }

    pub fn current_pa(&self) -> f64 {
        self.acq.current_pa()
    }

    /// Unfiltered estimate from the last control drain.
    pub fn raw_current_pa(&self) -> f64 {
        self.acq.raw_current_pa()
    }

    pub fn position(&self) -> Axes<i32> {
        self.position
    }

    pub fn z_stepper_offset(&self) -> i32 {
        self.z_stepper_offset
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn setpoint_pa(&self) -> f64 {
        self.setpoint_pa
    }

    pub fn set_setpoint_pa(&mut self, pa: f64) {
        self.setpoint_pa = pa;
    }

    /// Controller steps taken since construction.
    pub fn polls(&self) -> u64 {
        self.polls
    }

    pub fn controller_cfg(&self) -> &ControllerCfg {
        &self.cfg
    }

    pub fn acquisition(&self) -> &CurrentAcquisition {
        &self.acq
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            status: self.status,
            position: self.position,
            z_stepper_offset: self.z_stepper_offset,
            current_pa: self.acq.current_pa(),
            last_error: self.last_error,
        }
    }

    /// Push the current telemetry frame to the sink, if any.
    pub fn publish(&mut self) {
        let frame = self.telemetry();
        if let Some(sink) = self.sink.as_mut() {
            sink.publish(&frame);
        }
    }
}

#[inline]
fn to_code(v: i64) -> u16 {
    u16::try_from(v.clamp(0, i64::from(u16::MAX))).unwrap_or(u16::MAX)
}
