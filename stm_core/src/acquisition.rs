//! Tunneling-current acquisition.
//!
//! The periodic side (`SampleFrontEnd`, run inline or by a `Sampler` thread)
//! captures one raw TIA code, filters it and adds it to two integration
//! windows. The foreground (`CurrentAcquisition`) drains a window, averages
//! it and converts the mean to picoamps.
//!
//! The control window feeds the position controller on every step; the log
//! window integrates over a whole scan point and is only drained when a point
//! is recorded. Draining one never touches the other.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use eyre::WrapErr;
use stm_traits::{Clock, CurrentSense};

use crate::error::{Result, StmError};
use crate::filter::Cascade;
use crate::hw_error::map_hw_error;
use crate::sampler::Sampler;

#[derive(Debug, Default, Clone, Copy)]
struct Windows {
    raw_sum: f64,
    filtered_sum: f64,
    count: u64,
    log_filtered_sum: f64,
    log_count: u64,
}

/// Averages of one drained control window, in raw ADC codes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlWindow {
    pub raw_mean: f64,
    pub filtered_mean: f64,
    pub count: u64,
}

/// Integration windows shared between the sampling and control contexts.
///
/// Every operation is one critical section, so a drain never observes a
/// half-applied accumulate.
#[derive(Debug, Clone, Default)]
pub struct SharedWindows {
    inner: Arc<Mutex<Windows>>,
}

impl SharedWindows {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Windows> {
        // Sums are plain numbers; a holder that panicked left them usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add one sample to both windows.
    pub fn accumulate(&self, raw: f64, filtered: f64) {
        let mut w = self.lock();
        w.raw_sum += raw;
        w.filtered_sum += filtered;
        w.count += 1;
        w.log_filtered_sum += filtered;
        w.log_count += 1;
    }

    /// Take and reset the control window; `None` if it is empty.
    pub fn drain_control(&self) -> Option<ControlWindow> {
        let mut w = self.lock();
        if w.count == 0 {
            return None;
        }
        let n = w.count as f64;
        let out = ControlWindow {
            raw_mean: w.raw_sum / n,
            filtered_mean: w.filtered_sum / n,
            count: w.count,
        };
        w.raw_sum = 0.0;
        w.filtered_sum = 0.0;
        w.count = 0;
        Some(out)
    }

    /// Take and reset the log window, returning its filtered mean.
    pub fn drain_log(&self) -> Option<f64> {
        let mut w = self.lock();
        if w.log_count == 0 {
            return None;
        }
        let mean = w.log_filtered_sum / w.log_count as f64;
        w.log_filtered_sum = 0.0;
        w.log_count = 0;
        Some(mean)
    }

    /// Samples waiting in (control, log).
    pub fn pending(&self) -> (u64, u64) {
        let w = self.lock();
        (w.count, w.log_count)
    }
}

/// Raw TIA code <-> picoamp conversion.
///
/// `pA = (raw - zero_raw) · full_scale_volts / raw_full_scale · pa_per_volt`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiaConversion {
    pub full_scale_volts: f64,
    pub raw_full_scale: f64,
    /// Transimpedance as pA per volt (100 MOhm -> 10 000).
    pub pa_per_volt: f64,
    pub zero_raw: f64,
}

impl Default for TiaConversion {
    fn default() -> Self {
        Self {
            full_scale_volts: 3.3,
            raw_full_scale: 65_536.0,
            pa_per_volt: 10_000.0,
            zero_raw: 0.0,
        }
    }
}

impl TiaConversion {
    #[inline]
    pub fn raw_to_pa(&self, raw: f64) -> f64 {
        (raw - self.zero_raw) * self.full_scale_volts / self.raw_full_scale * self.pa_per_volt
    }

    #[inline]
    pub fn pa_to_raw(&self, pa: f64) -> f64 {
        pa * self.raw_full_scale / (self.full_scale_volts * self.pa_per_volt) + self.zero_raw
    }
}

/// Periodic half of the pipeline: capture, filter, integrate.
pub struct SampleFrontEnd {
    sense: Box<dyn CurrentSense + Send>,
    cascade: Cascade,
    windows: SharedWindows,
    primed: bool,
}

impl SampleFrontEnd {
    pub fn new(sense: Box<dyn CurrentSense + Send>, cascade: Cascade, windows: SharedWindows) -> Self {
        Self {
            sense,
            cascade,
            windows,
            primed: false,
        }
    }

    /// One capture. The first sample primes the cascade so the baseline does
    /// not ring through the notch.
    pub fn sample_current(&mut self) -> Result<u16> {
        let raw = self
            .sense
            .read_current_raw()
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err("reading TIA")?;
        let x = f64::from(raw);
        if !self.primed {
            self.cascade.prime(x);
            self.primed = true;
        }
        let y = self.cascade.filter(x);
        self.windows.accumulate(x, y);
        Ok(raw)
    }

    pub fn windows(&self) -> &SharedWindows {
        &self.windows
    }
}

/// How the windows get filled between fetches.
pub enum Feed {
    /// The control thread runs the front end `ticks_per_fetch` times before each drain.
    Inline {
        front_end: SampleFrontEnd,
        ticks_per_fetch: u32,
        /// Nominal sample period, used to emulate sampling across settle delays.
        sample_period: Duration,
    },
    /// A sampler thread owns the front end.
    Background {
        sampler: Sampler,
        /// Longest gap since the last good sample before fetches fail.
        stall_timeout: Duration,
    },
}

/// Foreground half of the pipeline.
pub struct CurrentAcquisition {
    windows: SharedWindows,
    feed: Feed,
    tia: TiaConversion,
    settle: Duration,
    current_pa: f64,
    raw_current_pa: f64,
    log_pa: f64,
    calibrated: bool,
}

impl CurrentAcquisition {
    pub fn new(windows: SharedWindows, feed: Feed, tia: TiaConversion, settle: Duration) -> Self {
        Self {
            windows,
            feed,
            tia,
            settle,
            current_pa: 0.0,
            raw_current_pa: 0.0,
            log_pa: 0.0,
            calibrated: false,
        }
    }

    /// Inline pipeline around one current sense.
    pub fn inline(
        sense: Box<dyn CurrentSense + Send>,
        cascade: Cascade,
        ticks_per_fetch: u32,
        sample_period: Duration,
        tia: TiaConversion,
        settle: Duration,
    ) -> Self {
        let windows = SharedWindows::new();
        let front_end = SampleFrontEnd::new(sense, cascade, windows.clone());
        Self::new(
            windows,
            Feed::Inline {
                front_end,
                ticks_per_fetch,
                sample_period,
            },
            tia,
            settle,
        )
    }

    fn pump(&mut self) -> Result<()> {
        self.pump_for(Duration::ZERO)
    }

    /// Inline feed: take the samples a background sampler would have taken
    /// over `elapsed`, and never fewer than `ticks_per_fetch`.
    fn pump_for(&mut self, elapsed: Duration) -> Result<()> {
        if let Feed::Inline {
            front_end,
            ticks_per_fetch,
            sample_period,
        } = &mut self.feed
        {
            let period_us = sample_period.as_micros().max(1);
            let over = u32::try_from(elapsed.as_micros() / period_us).unwrap_or(u32::MAX);
            for _ in 0..over.max(*ticks_per_fetch) {
                front_end.sample_current()?;
            }
        }
        Ok(())
    }

    /// Background feed: fail on a pending read error or a stalled sampler.
    fn check_sampler(&self) -> Result<()> {
        let Feed::Background {
            sampler,
            stall_timeout,
        } = &self.feed
        else {
            return Ok(());
        };
        if let Some(msg) = sampler.take_error() {
            return Err(eyre::Report::new(StmError::Hardware(msg)))
                .wrap_err("background current sampler");
        }
        let stalled_us = sampler.stalled_for_now();
        let limit_us = u64::try_from(stall_timeout.as_micros()).unwrap_or(u64::MAX);
        if stalled_us > limit_us {
            return Err(eyre::Report::new(StmError::SamplerStalled {
                stalled_ms: stalled_us / 1_000,
            }));
        }
        Ok(())
    }

    /// Drain the control window and return the filtered current in pA.
    ///
    /// With no samples since the last drain the previous value is returned.
    /// A background feed that reported a read error or stopped producing
    /// samples fails the fetch instead.
    pub fn fetch_current(&mut self) -> Result<f64> {
        self.pump()?;
        self.check_sampler()?;
        match self.windows.drain_control() {
            Some(w) => {
                self.current_pa = self.tia.raw_to_pa(w.filtered_mean);
                self.raw_current_pa = self.tia.raw_to_pa(w.raw_mean);
            }
            None => tracing::trace!("control window empty, reusing last current"),
        }
        Ok(self.current_pa)
    }

    /// Drain the log window and return its filtered mean in pA.
    ///
    /// Does not take samples itself; it integrates whatever arrived since the
    /// last log fetch, and repeats the previous value when nothing did.
    pub fn fetch_current_log(&mut self) -> f64 {
        if let Some(mean) = self.windows.drain_log() {
            self.log_pa = self.tia.raw_to_pa(mean);
        }
        self.log_pa
    }

    /// Measure the no-current baseline. The tip must be retracted.
    ///
    /// One reading is discarded, then after `settle` a fresh window's raw
    /// mean becomes the zero offset.
    pub fn calibrate_zero_current(&mut self, clock: &dyn Clock) -> Result<f64> {
        self.fetch_current()?;
        clock.sleep(self.settle);
        self.pump_for(self.settle)?;
        let w = self.windows.drain_control().ok_or_else(|| {
            eyre::Report::new(StmError::State(
                "no current samples arrived during calibration".into(),
            ))
        })?;
        self.tia.zero_raw = w.raw_mean;
        self.current_pa = self.tia.raw_to_pa(w.filtered_mean);
        self.raw_current_pa = self.tia.raw_to_pa(w.raw_mean);
        self.calibrated = true;
        tracing::info!(zero_raw = w.raw_mean, samples = w.count, "zero current calibrated");
        Ok(w.raw_mean)
    }

    /// Last filtered control current, pA.
    pub fn current_pa(&self) -> f64 {
        self.current_pa
    }

    /// Last unfiltered control current, pA.
    pub fn raw_current_pa(&self) -> f64 {
        self.raw_current_pa
    }

    pub fn log_pa(&self) -> f64 {
        self.log_pa
    }

    pub fn zero_offset_raw(&self) -> f64 {
        self.tia.zero_raw
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn tia(&self) -> &TiaConversion {
        &self.tia
    }

    pub fn windows(&self) -> &SharedWindows {
        &self.windows
    }

    pub fn sampler(&self) -> Option<&Sampler> {
        match &self.feed {
            Feed::Background { sampler, .. } => Some(sampler),
            Feed::Inline { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u16);

    impl CurrentSense for Fixed {
        fn read_current_raw(&mut self) -> std::result::Result<u16, stm_traits::BoxError> {
            Ok(self.0)
        }
    }

    #[test]
    fn conversion_round_trips_setpoint() {
        let tia = TiaConversion {
            zero_raw: 2_048.0,
            ..TiaConversion::default()
        };
        let raw = tia.pa_to_raw(500.0);
        assert!((tia.raw_to_pa(raw) - 500.0).abs() < 1e-9);
        // one code is about 5 pA with a 100 MOhm TIA
        assert!((tia.raw_to_pa(2_049.0) - 0.503_540_039_062_5).abs() < 1e-12);
    }

    #[test]
    fn windows_drain_independently() {
        let w = SharedWindows::new();
        w.accumulate(10.0, 8.0);
        w.accumulate(20.0, 12.0);
        let c = w.drain_control().unwrap();
        assert_eq!(c.raw_mean, 15.0);
        assert_eq!(c.filtered_mean, 10.0);
        assert_eq!(w.pending(), (0, 2));
        assert_eq!(w.drain_log(), Some(10.0));
        assert_eq!(w.drain_log(), None);
    }

    #[test]
    fn calibration_zeroes_baseline() {
        let mut acq = CurrentAcquisition::inline(
            Box::new(Fixed(2_100)),
            Cascade::mains_notch(),
            5,
            Duration::from_micros(50),
            TiaConversion::default(),
            Duration::from_millis(100),
        );
        assert!(!acq.is_calibrated());
        let clock = stm_traits::ManualClock::new();
        let zero = acq.calibrate_zero_current(&clock).unwrap();
        assert_eq!(zero, 2_100.0);
        assert_eq!(clock.elapsed(), Duration::from_millis(100));
        assert!(acq.fetch_current().unwrap().abs() < 1e-6);
    }
}
