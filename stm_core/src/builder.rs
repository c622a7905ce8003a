//! Type-state builder for `ScanHead`.
//!
//! The builder enforces at compile time that the piezo drive, the stepper
//! and the current sense are provided before `build()` is available.
//! `try_build()` is always available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use stm_traits::{
    Axes, Clock, CurrentSense, MonotonicClock, PiezoDrive, StatusCode, Stepper, TelemetrySink,
};

use crate::acquisition::{CurrentAcquisition, Feed, SampleFrontEnd, SharedWindows, TiaConversion};
use crate::config::{AcquisitionCfg, ChannelMap, ControllerCfg, FeedKind, FilterCfg, SafetyCfg};
use crate::conversions::CoreSettings;
use crate::error::{BuildError, Result};
use crate::head::ScanHead;
use crate::pid::Pid;
use crate::sampler::Sampler;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

#[derive(Default)]
struct Parts {
    piezo: Option<Box<dyn PiezoDrive>>,
    stepper: Option<Box<dyn Stepper>>,
    sense: Option<Box<dyn CurrentSense + Send>>,
    controller: Option<ControllerCfg>,
    channels: Option<ChannelMap>,
    safety: Option<SafetyCfg>,
    acquisition: Option<AcquisitionCfg>,
    filter: Option<FilterCfg>,
    tia: Option<TiaConversion>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    sink: Option<Box<dyn TelemetrySink>>,
    skip_park: bool,
}

/// Builder for `ScanHead`. All settings are validated on `build()`.
pub struct ScanHeadBuilder<P, S, C> {
    parts: Parts,
    _p: PhantomData<P>,
    _s: PhantomData<S>,
    _c: PhantomData<C>,
}

impl Default for ScanHeadBuilder<Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            parts: Parts::default(),
            _p: PhantomData,
            _s: PhantomData,
            _c: PhantomData,
        }
    }
}

impl<P, S, C> ScanHeadBuilder<P, S, C> {
    fn advance<P2, S2, C2>(self) -> ScanHeadBuilder<P2, S2, C2> {
        ScanHeadBuilder {
            parts: self.parts,
            _p: PhantomData,
            _s: PhantomData,
            _c: PhantomData,
        }
    }

    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<ScanHead> {
        let p = self.parts;
        let piezo = p
            .piezo
            .ok_or_else(|| eyre::Report::new(BuildError::MissingPiezo))?;
        let stepper = p
            .stepper
            .ok_or_else(|| eyre::Report::new(BuildError::MissingStepper))?;
        let sense = p
            .sense
            .ok_or_else(|| eyre::Report::new(BuildError::MissingCurrentSense))?;
        let clock: Arc<dyn Clock + Send + Sync> = match p.clock {
            Some(c) => c,
            None => Arc::new(MonotonicClock::new()),
        };

        let mut head = validate_and_build(
            piezo,
            stepper,
            sense,
            p.controller.unwrap_or_default(),
            p.channels.unwrap_or_default(),
            p.safety.unwrap_or_default(),
            p.acquisition.unwrap_or_default(),
            p.filter.unwrap_or_default(),
            p.tia.unwrap_or_default(),
            clock,
            p.sink,
        )?;
        if !p.skip_park {
            head.park()?;
        }
        Ok(head)
    }
}

/// Chainable setters that do not affect type-state.
impl<P, S, C> ScanHeadBuilder<P, S, C> {
    pub fn with_controller(mut self, cfg: ControllerCfg) -> Self {
        self.parts.controller = Some(cfg);
        self
    }
    pub fn with_channels(mut self, channels: ChannelMap) -> Self {
        self.parts.channels = Some(channels);
        self
    }
    pub fn with_safety(mut self, safety: SafetyCfg) -> Self {
        self.parts.safety = Some(safety);
        self
    }
    pub fn with_acquisition(mut self, acquisition: AcquisitionCfg) -> Self {
        self.parts.acquisition = Some(acquisition);
        self
    }
    pub fn with_filter(mut self, filter: FilterCfg) -> Self {
        self.parts.filter = Some(filter);
        self
    }
    pub fn with_tia(mut self, tia: TiaConversion) -> Self {
        self.parts.tia = Some(tia);
        self
    }
    /// Apply every section converted from a config file.
    pub fn with_settings(self, s: &CoreSettings) -> Self {
        self.with_controller(s.controller.clone())
            .with_channels(s.channels)
            .with_safety(s.safety)
            .with_acquisition(s.acquisition.clone())
            .with_filter(s.filter.clone())
            .with_tia(s.tia)
    }
    /// Provide a custom clock implementation; defaults to `MonotonicClock` when not provided.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.parts.clock = Some(clock);
        self
    }
    pub fn with_sink(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.parts.sink = Some(Box::new(sink));
        self
    }
    /// Leave the DAC untouched at build time.
    pub fn without_park(mut self) -> Self {
        self.parts.skip_park = true;
        self
    }
}

// Setters that advance type-state
impl<S, C> ScanHeadBuilder<Missing, S, C> {
    pub fn with_piezo(mut self, piezo: impl PiezoDrive + 'static) -> ScanHeadBuilder<Set, S, C> {
        self.parts.piezo = Some(Box::new(piezo));
        self.advance()
    }
}

impl<P, C> ScanHeadBuilder<P, Missing, C> {
    pub fn with_stepper(
        mut self,
        stepper: impl Stepper + 'static,
    ) -> ScanHeadBuilder<P, Set, C> {
        self.parts.stepper = Some(Box::new(stepper));
        self.advance()
    }
}

impl<P, S> ScanHeadBuilder<P, S, Missing> {
    pub fn with_current_sense(
        mut self,
        sense: impl CurrentSense + Send + 'static,
    ) -> ScanHeadBuilder<P, S, Set> {
        self.parts.sense = Some(Box::new(sense));
        self.advance()
    }
}

impl ScanHeadBuilder<Set, Set, Set> {
    /// Validate and build. Only available when piezo, stepper and current sense are set.
    pub fn build(self) -> Result<ScanHead> {
        self.try_build()
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

/// Validate settings and assemble the head with its acquisition pipeline.
#[allow(clippy::too_many_arguments)]
fn validate_and_build(
    piezo: Box<dyn PiezoDrive>,
    stepper: Box<dyn Stepper>,
    sense: Box<dyn CurrentSense + Send>,
    cfg: ControllerCfg,
    channels: ChannelMap,
    safety: SafetyCfg,
    acquisition: AcquisitionCfg,
    filter: FilterCfg,
    tia: TiaConversion,
    clock: Arc<dyn Clock + Send + Sync>,
    sink: Option<Box<dyn TelemetrySink>>,
) -> Result<ScanHead> {
    // ── Validation ───────────────────────────────────────────────────────────
    if cfg.min_channel < 0 || cfg.max_channel > i32::from(u16::MAX) {
        return Err(invalid("channel bounds must lie within 0..=65535"));
    }
    if cfg.min_channel >= cfg.max_channel {
        return Err(invalid("min_channel must be < max_channel"));
    }
    if cfg.max_transverse_step <= 0 || cfg.max_z_step <= 0 {
        return Err(invalid("max step sizes must be > 0"));
    }
    for g in [cfg.transverse, cfg.z] {
        if [g.kp, g.ki, g.kd].iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(invalid("gains must be finite and >= 0"));
        }
    }
    if !(safety.overcurrent_pa.is_finite() && safety.overcurrent_pa > 0.0) {
        return Err(invalid("overcurrent threshold must be > 0"));
    }
    if acquisition.sample_period_us == 0 {
        return Err(invalid("sample_period_us must be >= 1"));
    }
    if acquisition.feed == FeedKind::Inline && acquisition.ticks_per_fetch == 0 {
        return Err(invalid("ticks_per_fetch must be >= 1"));
    }
    if acquisition.feed == FeedKind::Background && acquisition.stall_timeout.is_zero() {
        return Err(invalid("stall_timeout must be > 0"));
    }
    if !(tia.full_scale_volts > 0.0 && tia.raw_full_scale > 0.0 && tia.pa_per_volt > 0.0) {
        return Err(invalid("TIA conversion constants must be > 0"));
    }
    let cascade = filter
        .cascade(acquisition.sample_rate_hz())
        .ok_or_else(|| invalid("notch must lie between 0 Hz and Nyquist"))?;

    let sections = cascade.len();

    // ── Acquisition pipeline ─────────────────────────────────────────────────
    let windows = SharedWindows::new();
    let front_end = SampleFrontEnd::new(sense, cascade, windows.clone());
    let feed = match acquisition.feed {
        FeedKind::Inline => Feed::Inline {
            front_end,
            ticks_per_fetch: acquisition.ticks_per_fetch,
            sample_period: std::time::Duration::from_micros(acquisition.sample_period_us),
        },
        FeedKind::Background => Feed::Background {
            sampler: Sampler::spawn(front_end, acquisition.sample_period_us, clock.clone()),
            stall_timeout: acquisition.stall_timeout,
        },
    };
    let acq = CurrentAcquisition::new(windows, feed, tia, acquisition.calibrate_settle);

    tracing::debug!(
        feed = ?acquisition.feed,
        sections,
        "scan head built"
    );

    Ok(ScanHead {
        piezo,
        stepper,
        acq,
        sink,
        clock,
        cfg,
        channels,
        safety,
        position: Axes::default(),
        z_stepper_offset: 0,
        pid: Axes::new(Pid::new(), Pid::new(), Pid::new()),
        status: StatusCode::ApproachPiezo,
        setpoint_pa: 0.0,
        last_error: Axes::default(),
        polls: 0,
    })
}
