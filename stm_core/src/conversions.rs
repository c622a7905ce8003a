//! `From` implementations bridging `stm_config` types to `stm_core` types.

use std::time::Duration;

use crate::acquisition::TiaConversion;
use crate::config::{
    AcquisitionCfg, ApproachCfg, ChannelMap, ControllerCfg, FeedKind, FilterCfg, Gains, SafetyCfg,
    ScanCfg,
};
use crate::filter::Coefficients;

// ── ControllerCfg ────────────────────────────────────────────────────────────

impl From<&stm_config::Gains> for Gains {
    fn from(g: &stm_config::Gains) -> Self {
        Self {
            kp: g.kp,
            ki: g.ki,
            kd: g.kd,
        }
    }
}

impl From<&stm_config::ControllerCfg> for ControllerCfg {
    fn from(c: &stm_config::ControllerCfg) -> Self {
        Self {
            half_scale: c.half_scale,
            min_channel: c.min_channel,
            max_channel: c.max_channel,
            max_transverse_step: c.max_transverse_step,
            max_z_step: c.max_z_step,
            transverse: (&c.transverse).into(),
            z: (&c.z).into(),
            settle: Duration::from_micros(c.settle_us),
        }
    }
}

impl From<&stm_config::Channels> for ChannelMap {
    fn from(c: &stm_config::Channels) -> Self {
        Self {
            x_plus: c.x_plus,
            x_minus: c.x_minus,
            y_plus: c.y_plus,
            y_minus: c.y_minus,
            sample_pad: c.sample_pad,
            sample_bias: c.sample_bias,
        }
    }
}

// ── Acquisition ──────────────────────────────────────────────────────────────

impl From<&stm_config::AcquisitionCfg> for AcquisitionCfg {
    fn from(c: &stm_config::AcquisitionCfg) -> Self {
        Self {
            feed: match c.mode {
                stm_config::FeedMode::Inline => FeedKind::Inline,
                stm_config::FeedMode::Background => FeedKind::Background,
            },
            sample_period_us: c.sample_period_us,
            ticks_per_fetch: c.ticks_per_fetch,
            calibrate_settle: Duration::from_millis(c.calibrate_settle_ms),
            stall_timeout: Duration::from_millis(c.stall_timeout_ms),
        }
    }
}

impl From<&stm_config::AcquisitionCfg> for TiaConversion {
    fn from(c: &stm_config::AcquisitionCfg) -> Self {
        Self {
            full_scale_volts: c.full_scale_volts,
            raw_full_scale: c.raw_full_scale,
            pa_per_volt: c.pa_per_volt,
            zero_raw: 0.0,
        }
    }
}

impl From<&stm_config::FilterCfg> for FilterCfg {
    fn from(c: &stm_config::FilterCfg) -> Self {
        if let Some(sections) = &c.sections {
            return Self::Sections(sections.iter().copied().map(Coefficients::from_array).collect());
        }
        if !c.enabled {
            return Self::Disabled;
        }
        Self::Notch {
            center_hz: c.notch_hz,
            bandwidth_hz: c.bandwidth_hz,
            stages: c.stages,
        }
    }
}

// ── Safety / engines ─────────────────────────────────────────────────────────

impl From<&stm_config::Safety> for SafetyCfg {
    fn from(c: &stm_config::Safety) -> Self {
        Self {
            overcurrent_pa: c.overcurrent_pa,
            retract_steps: c.retract_steps,
            retract_rate: c.retract_rate,
        }
    }
}

impl From<&stm_config::ApproachCfg> for ApproachCfg {
    fn from(c: &stm_config::ApproachCfg) -> Self {
        Self {
            advance_steps: c.advance_steps,
            advance_rate: c.advance_rate,
            trace_capacity: c.trace_capacity,
            max_cycles: c.max_cycles,
        }
    }
}

impl From<&stm_config::ScanCfg> for ScanCfg {
    fn from(c: &stm_config::ScanCfg) -> Self {
        Self {
            step: c.step,
            max_polls_per_point: c.max_polls_per_point,
        }
    }
}

/// Every runtime section, converted in one go from a validated config file.
#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub controller: ControllerCfg,
    pub channels: ChannelMap,
    pub safety: SafetyCfg,
    pub acquisition: AcquisitionCfg,
    pub filter: FilterCfg,
    pub tia: TiaConversion,
    pub approach: ApproachCfg,
    pub scan: ScanCfg,
    pub setpoint_pa: f64,
    /// Poll ceiling for a whole auto-approach.
    pub approach_max_polls: Option<u64>,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            controller: ControllerCfg::default(),
            channels: ChannelMap::default(),
            safety: SafetyCfg::default(),
            acquisition: AcquisitionCfg::default(),
            filter: FilterCfg::default(),
            tia: TiaConversion::default(),
            approach: ApproachCfg::default(),
            scan: ScanCfg::default(),
            setpoint_pa: 500.0,
            approach_max_polls: None,
        }
    }
}

impl From<&stm_config::Config> for CoreSettings {
    fn from(c: &stm_config::Config) -> Self {
        Self {
            controller: (&c.controller).into(),
            channels: (&c.channels).into(),
            safety: (&c.safety).into(),
            acquisition: (&c.acquisition).into(),
            filter: (&c.filter).into(),
            tia: (&c.acquisition).into(),
            approach: (&c.approach).into(),
            scan: (&c.scan).into(),
            setpoint_pa: c.approach.setpoint_pa,
            approach_max_polls: c.approach.max_polls,
        }
    }
}
