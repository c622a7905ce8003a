//! Hardware assembly and command execution.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use eyre::WrapErr;
use serde_json::json;
use stm_core::export::{write_area_trace, write_line_trace};
use stm_core::{
    ApproachFailure, ApproachState, AreaScan, CoreSettings, Direction, LineScan, ScanHead,
    ScanStatus, StepStatus, run_approach, run_area_scan, run_line_scan,
};
use stm_ui::{ConsoleUi, RailMonitor, RailReadings, UiStyle};

use crate::cli::{Cli, Commands};

/// Runs that ended on a safety or travel limit rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Abort {
    #[error("overcurrent interlock tripped")]
    Overcurrent,
    #[error("target lies outside the piezo travel")]
    Unattainable,
    #[error("auto-approach gave up after its cycle limit")]
    ApproachFailed,
}

impl Abort {
    pub fn name(self) -> &'static str {
        match self {
            Self::Overcurrent => "Overcurrent",
            Self::Unattainable => "Unattainable",
            Self::ApproachFailed => "ApproachFailed",
        }
    }
}

fn abort_for(status: StepStatus) -> Abort {
    match status {
        StepStatus::Overcurrent => Abort::Overcurrent,
        _ => Abort::Unattainable,
    }
}

/// Everything a command needs.
pub struct Session<'a> {
    pub cfg: &'a stm_config::Config,
    pub settings: CoreSettings,
    pub json: bool,
    pub ui: UiStyle,
    pub ui_every: u32,
    pub shutdown: Arc<AtomicBool>,
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn sim_params(cfg: &stm_config::Config) -> stm_hardware::SimParams {
    let ch = &cfg.channels;
    let a = &cfg.acquisition;
    stm_hardware::SimParams {
        half_scale: cfg.controller.half_scale,
        drive_channels: [ch.x_plus, ch.x_minus, ch.y_plus, ch.y_minus],
        initial_gap: cfg.sim.initial_gap,
        counts_per_pa: a.raw_full_scale / (a.full_scale_volts * a.pa_per_volt),
        hum_counts: cfg.sim.hum_counts,
        sample_rate_hz: stm_core::util::rate_hz(a.sample_period_us),
        ..stm_hardware::SimParams::default()
    }
}

impl Session<'_> {
    fn builder(
        &self,
    ) -> stm_core::ScanHeadBuilder<stm_core::Missing, stm_core::Missing, stm_core::Missing> {
        let b = ScanHead::builder().with_settings(&self.settings);
        if self.ui == UiStyle::Off {
            b
        } else {
            b.with_sink(ConsoleUi::new(std::io::stderr(), self.ui).every(self.ui_every))
        }
    }

    #[cfg(not(all(feature = "hardware", target_os = "linux")))]
    pub fn open_head(&self) -> eyre::Result<ScanHead> {
        let sim = stm_hardware::SimulatedMicroscope::new(sim_params(self.cfg));
        tracing::info!(gap = sim.gap(), "using simulated microscope");
        self.builder()
            .with_piezo(sim.piezo())
            .with_stepper(sim.stepper())
            .with_current_sense(sim.tia())
            .build()
    }

    #[cfg(all(feature = "hardware", target_os = "linux"))]
    pub fn open_head(&self) -> eyre::Result<ScanHead> {
        use stm_hardware::spi::{GpioStepperGang, SpiPiezoDac, SpiTia};
        let piezo = SpiPiezoDac::open().wrap_err("open piezo DAC")?;
        let tia = SpiTia::open().wrap_err("open TIA ADC")?;
        let stepper =
            GpioStepperGang::open(&self.cfg.hardware.stepper_pins).wrap_err("open stepper pins")?;
        self.builder()
            .with_piezo(piezo)
            .with_stepper(stepper)
            .with_current_sense(tia)
            .build()
    }

    #[cfg(not(all(feature = "hardware", target_os = "linux")))]
    fn read_rails(&self) -> Option<RailReadings> {
        let nominal = RailMonitor::from(&self.cfg.rails).nominal();
        Some(
            self.cfg
                .sim
                .rails
                .map_or(nominal, |[v5, v10, v3v3]| RailReadings { v5, v10, v3v3 }),
        )
    }

    #[cfg(all(feature = "hardware", target_os = "linux"))]
    fn read_rails(&self) -> Option<RailReadings> {
        // The housekeeping ADC is not wired to the SPI back-end.
        None
    }

    fn emit(&self, text: String, value: serde_json::Value) {
        if self.json {
            println!("{value}");
        } else {
            println!("{text}");
        }
    }

    pub fn run(&self, cli: &Cli) -> eyre::Result<()> {
        match &cli.cmd {
            Commands::Calibrate => self.calibrate(),
            Commands::Approach {
                setpoint_pa,
                max_polls,
                dump,
            } => self.approach(*setpoint_pa, *max_polls, dump.as_deref()),
            Commands::Jog { steps, rate } => self.jog(*steps, *rate),
            Commands::ScanLine {
                size,
                step,
                reverse,
                height_control,
                out,
            } => {
                let scan = LineScan {
                    size: *size,
                    step: step.unwrap_or(self.settings.scan.step),
                    direction: if *reverse {
                        Direction::Reverse
                    } else {
                        Direction::Forward
                    },
                    height_control: *height_control,
                    max_polls_per_point: self.settings.scan.max_polls_per_point,
                };
                self.scan_line(&scan, out.as_deref())
            }
            Commands::ScanArea {
                size_x,
                size_y,
                step,
                height_control,
                out,
            } => {
                let scan = AreaScan {
                    size_x: *size_x,
                    size_y: *size_y,
                    step: step.unwrap_or(self.settings.scan.step),
                    height_control: *height_control,
                    max_polls_per_point: self.settings.scan.max_polls_per_point,
                };
                self.scan_area(&scan, out.as_deref())
            }
            Commands::SelfCheck => self.self_check(),
        }
    }

    fn calibrate(&self) -> eyre::Result<()> {
        let mut head = self.open_head()?;
        let zero = head.calibrate_zero_current()?;
        self.emit(
            format!("zero-current baseline: {zero:.1} codes"),
            json!({ "zero_raw": zero }),
        );
        Ok(())
    }

    /// Calibrate and approach; the head is left at the surface.
    fn approach_surface(
        &self,
        head: &mut ScanHead,
        setpoint_pa: f64,
        max_polls: Option<u64>,
    ) -> eyre::Result<stm_core::ApproachOutcome> {
        head.calibrate_zero_current()?;
        let out = run_approach(
            head,
            setpoint_pa,
            self.settings.approach.clone(),
            max_polls,
            &self.shutdown,
        )?;
        match out.progress.state {
            ApproachState::Surface => {
                head.set_setpoint_pa(setpoint_pa);
                Ok(out)
            }
            ApproachState::Failed(ApproachFailure::Overcurrent) => Err(Abort::Overcurrent.into()),
            _ => Err(Abort::ApproachFailed.into()),
        }
    }

    fn approach(
        &self,
        setpoint_pa: Option<f64>,
        max_polls: Option<u64>,
        dump: Option<&Path>,
    ) -> eyre::Result<()> {
        let setpoint = setpoint_pa.unwrap_or(self.settings.setpoint_pa);
        if !(setpoint.is_finite() && setpoint > 0.0) {
            eyre::bail!("setpoint must be a positive current in pA");
        }
        let mut head = self.open_head()?;
        let out = self.approach_surface(
            &mut head,
            setpoint,
            max_polls.or(self.settings.approach_max_polls),
        )?;
        if let Some(path) = dump {
            let f = create(path)?;
            out.trace.dump(f)?;
        }
        let p = head.position();
        self.emit(
            format!(
                "surface found: {:.1} pA at z={} stepper={} after {} cycles, {} polls",
                head.raw_current_pa(),
                p.z,
                head.z_stepper_offset(),
                out.progress.cycle,
                out.progress.polls
            ),
            json!({
                "state": "Surface",
                "current_pa": head.raw_current_pa(),
                "z": p.z,
                "stepper": head.z_stepper_offset(),
                "cycles": out.progress.cycle,
                "polls": out.progress.polls,
            }),
        );
        Ok(())
    }

    fn jog(&self, steps: i32, rate: i32) -> eyre::Result<()> {
        let mut head = self.open_head()?;
        head.move_stepper(steps, rate)?;
        self.emit(
            format!("stepper offset: {}", head.z_stepper_offset()),
            json!({ "stepper": head.z_stepper_offset() }),
        );
        Ok(())
    }

    fn scan_line(&self, scan: &LineScan, out: Option<&Path>) -> eyre::Result<()> {
        let mut head = self.open_head()?;
        self.approach_surface(
            &mut head,
            self.settings.setpoint_pa,
            self.settings.approach_max_polls,
        )?;
        let (status, trace) = run_line_scan(&mut head, scan)?;
        match out {
            Some(path) => {
                write_line_trace(create(path)?, &trace)?;
                self.emit(
                    format!("line scan: {} points written to {}", trace.len(), path.display()),
                    json!({ "points": trace.len(), "out": path.display().to_string() }),
                );
            }
            None => write_line_trace(std::io::stdout().lock(), &trace)?,
        }
        finish(status)
    }

    fn scan_area(&self, scan: &AreaScan, out: Option<&Path>) -> eyre::Result<()> {
        let mut head = self.open_head()?;
        self.approach_surface(
            &mut head,
            self.settings.setpoint_pa,
            self.settings.approach_max_polls,
        )?;
        let (status, trace) = run_area_scan(&mut head, scan)?;
        match out {
            Some(path) => {
                write_area_trace(create(path)?, &trace)?;
                self.emit(
                    format!("area scan: {} points written to {}", trace.len(), path.display()),
                    json!({ "points": trace.len(), "out": path.display().to_string() }),
                );
            }
            None => write_area_trace(std::io::stdout().lock(), &trace)?,
        }
        finish(status)
    }

    fn self_check(&self) -> eyre::Result<()> {
        let monitor = RailMonitor::from(&self.cfg.rails);
        let rails = self.read_rails().map(|r| monitor.check(r));
        if let Some(report) = rails.filter(|r| !r.all_ok()) {
            eyre::bail!("supply rail check failed: {report}");
        }

        let mut head = self.open_head()?;
        let pa = head.fetch_current()?;
        let samples = head.acquisition().windows().pending().1;
        let rails_text = rails.map_or_else(|| "not measured".to_string(), |r| r.to_string());
        self.emit(
            format!("config ok\nrails: {rails_text}\ntia: {samples} samples, {pa:.1} pA\nself-check ok"),
            json!({ "ok": true, "rails": rails_text, "current_pa": pa, "samples": samples }),
        );
        Ok(())
    }
}

fn create(path: &Path) -> eyre::Result<BufWriter<File>> {
    let f = File::create(path).wrap_err_with(|| format!("creating {}", path.display()))?;
    Ok(BufWriter::new(f))
}

/// Partial traces are written before an abort is reported.
fn finish(status: ScanStatus) -> eyre::Result<()> {
    match status {
        ScanStatus::Complete => Ok(()),
        ScanStatus::Aborted(s) => Err(abort_for(s).into()),
    }
}
