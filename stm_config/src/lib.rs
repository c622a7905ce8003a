#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the scan head.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//! - Every section has defaults, so an empty file describes the stock
//!   instrument (100 MOhm TIA, 16-bit DAC, 20 kHz sampling, 60 Hz notch).
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for Gains {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControllerCfg {
    /// DAC code that centers a channel.
    pub half_scale: i32,
    pub min_channel: i32,
    pub max_channel: i32,
    pub max_transverse_step: i32,
    pub max_z_step: i32,
    pub transverse: Gains,
    pub z: Gains,
    /// Settle delay after each piezo write (µs).
    pub settle_us: u64,
}

impl Default for ControllerCfg {
    fn default() -> Self {
        Self {
            half_scale: 32_767,
            min_channel: 0,
            max_channel: 65_535,
            max_transverse_step: 50,
            max_z_step: 100,
            transverse: Gains::default(),
            z: Gains {
                kp: 0.5,
                ki: 0.0,
                kd: 0.0,
            },
            settle_us: 500,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Channels {
    pub x_plus: u8,
    pub x_minus: u8,
    pub y_plus: u8,
    pub y_minus: u8,
    pub sample_pad: u8,
    /// DAC code applied to the sample pad at start-up (about -0.5 V).
    pub sample_bias: u16,
}

impl Default for Channels {
    fn default() -> Self {
        Self {
            x_plus: 0,
            x_minus: 1,
            y_plus: 2,
            y_minus: 3,
            sample_pad: 4,
            sample_bias: 37_500,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    /// Samples are taken on the control thread right before each fetch.
    #[default]
    Inline,
    /// A dedicated sampler thread ticks at `sample_period_us`.
    Background,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AcquisitionCfg {
    pub mode: FeedMode,
    pub sample_period_us: u64,
    /// Inline mode only: samples taken per fetch.
    pub ticks_per_fetch: u32,
    pub full_scale_volts: f64,
    pub raw_full_scale: f64,
    /// TIA transimpedance expressed as pA per volt.
    pub pa_per_volt: f64,
    pub calibrate_settle_ms: u64,
    /// Background mode only: fetches fail after this long without a good sample.
    pub stall_timeout_ms: u64,
}

impl Default for AcquisitionCfg {
    fn default() -> Self {
        Self {
            mode: FeedMode::Inline,
            sample_period_us: 50,
            ticks_per_fetch: 10,
            full_scale_volts: 3.3,
            raw_full_scale: 65_536.0,
            pa_per_volt: 10_000.0,
            calibrate_settle_ms: 100,
            stall_timeout_ms: 20,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FilterCfg {
    pub enabled: bool,
    pub notch_hz: f64,
    pub bandwidth_hz: f64,
    pub stages: usize,
    /// Explicit sections `[a0, a1, a2, b0, b1, b2]`; overrides the notch design when present.
    pub sections: Option<Vec<[f64; 6]>>,
    /// CSV file of sections (headers `a0,a1,a2,b0,b1,b2`), read by `resolve_sections_file`.
    pub sections_file: Option<String>,
}

impl Default for FilterCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            notch_hz: 60.0,
            bandwidth_hz: 4.0,
            stages: 2,
            sections: None,
            sections_file: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApproachCfg {
    pub setpoint_pa: f64,
    pub advance_steps: i32,
    pub advance_rate: u32,
    /// Approximate piezo travel covered by one coarse step.
    pub piezo_units_per_step: f64,
    pub trace_capacity: usize,
    pub max_cycles: Option<u32>,
    pub max_polls: Option<u64>,
}

impl Default for ApproachCfg {
    fn default() -> Self {
        Self {
            setpoint_pa: 500.0,
            advance_steps: 3,
            advance_rate: 100,
            piezo_units_per_step: 2_000.0,
            trace_capacity: 1_000,
            max_cycles: None,
            max_polls: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScanCfg {
    pub step: u32,
    pub max_polls_per_point: Option<u64>,
}

impl Default for ScanCfg {
    fn default() -> Self {
        Self {
            step: 1,
            max_polls_per_point: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Safety {
    pub overcurrent_pa: f64,
    /// Emergency stepper move on overcurrent (negative retracts).
    pub retract_steps: i32,
    pub retract_rate: u32,
}

impl Default for Safety {
    fn default() -> Self {
        Self {
            overcurrent_pa: 10_000.0,
            retract_steps: -50,
            retract_rate: 4_096,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Hardware {
    /// A, B, C, D coil pins per coarse stepper.
    pub stepper_pins: Vec<[u8; 4]>,
}

impl Default for Hardware {
    fn default() -> Self {
        Self {
            stepper_pins: vec![[5, 4, 3, 2], [9, 8, 7, 6], [32, 33, 25, 24]],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Rails {
    pub expected_5v: u16,
    pub expected_10v: u16,
    pub expected_3v3: u16,
    pub allowed_variance: u16,
}

impl Default for Rails {
    fn default() -> Self {
        Self {
            expected_5v: 488,
            expected_10v: 573,
            expected_3v3: 492,
            allowed_variance: 20,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Sim {
    pub hum_counts: f64,
    /// Gap between the resting tip and the sample at start, piezo units.
    pub initial_gap: f64,
    /// Housekeeping ADC codes for the 5 V, 10 V and 3.3 V rails; the expected codes when unset.
    pub rails: Option<[u16; 3]>,
}

impl Default for Sim {
    fn default() -> Self {
        Self {
            hum_counts: 150.0,
            initial_gap: 47_767.0,
            rails: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub controller: ControllerCfg,
    pub channels: Channels,
    pub acquisition: AcquisitionCfg,
    pub filter: FilterCfg,
    pub approach: ApproachCfg,
    pub scan: ScanCfg,
    pub safety: Safety,
    pub hardware: Hardware,
    pub rails: Rails,
    pub sim: Sim,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read, parse and validate a config file, resolving a filter CSV next to it.
pub fn load_file(path: &std::path::Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {:?}: {}", path, e))?;
    let mut cfg = load_toml(&text).map_err(|e| eyre::eyre!("parse config {:?}: {}", path, e))?;
    let base = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    cfg.resolve_sections_file(base)?;
    cfg.validate()?;
    Ok(cfg)
}

/// One filter section as stored in a coefficients CSV.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct SectionRow {
    pub a0: f64,
    pub a1: f64,
    pub a2: f64,
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
}

impl From<SectionRow> for [f64; 6] {
    fn from(r: SectionRow) -> Self {
        [r.a0, r.a1, r.a2, r.b0, r.b1, r.b2]
    }
}

pub fn load_sections_csv(path: &std::path::Path) -> eyre::Result<Vec<[f64; 6]>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open filter CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["a0", "a1", "a2", "b0", "b1", "b2"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "filter CSV must have headers 'a0,a1,a2,b0,b1,b2', got: {}",
            actual.join(",")
        );
    }

    let mut rows: Vec<[f64; 6]> = Vec::new();
    for (idx, rec) in rdr.deserialize::<SectionRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row.into()),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    if rows.is_empty() {
        eyre::bail!("filter CSV {:?} has no sections", path);
    }
    Ok(rows)
}

impl Config {
    /// Load `filter.sections_file` (relative to `base`) into `filter.sections`.
    pub fn resolve_sections_file(&mut self, base: &std::path::Path) -> eyre::Result<()> {
        if let Some(file) = self.filter.sections_file.take() {
            let path = base.join(file);
            self.filter.sections = Some(load_sections_csv(&path)?);
        }
        Ok(())
    }
}

fn check_gains(name: &str, g: &Gains) -> eyre::Result<()> {
    for (term, v) in [("kp", g.kp), ("ki", g.ki), ("kd", g.kd)] {
        if !v.is_finite() || v < 0.0 {
            eyre::bail!("controller.{name}.{term} must be finite and >= 0");
        }
    }
    Ok(())
}

/// A section is usable when it is normalized (`b0 == 1`) and its poles sit
/// strictly inside the unit circle.
fn check_section(idx: usize, s: &[f64; 6]) -> eyre::Result<()> {
    if s.iter().any(|v| !v.is_finite()) {
        eyre::bail!("filter.sections[{idx}] contains a non-finite coefficient");
    }
    if (s[3] - 1.0).abs() > 1e-9 {
        eyre::bail!("filter.sections[{idx}] must be normalized (b0 = 1)");
    }
    let (b1, b2) = (s[4], s[5]);
    if !(b2.abs() < 1.0 && b1.abs() < 1.0 + b2) {
        eyre::bail!("filter.sections[{idx}] is unstable (poles outside the unit circle)");
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Controller
        let c = &self.controller;
        if c.min_channel < 0 || c.max_channel > i32::from(u16::MAX) {
            eyre::bail!("controller channel bounds must lie within 0..=65535");
        }
        if c.min_channel >= c.max_channel {
            eyre::bail!("controller.min_channel must be < controller.max_channel");
        }
        if !(c.min_channel..=c.max_channel).contains(&c.half_scale) {
            eyre::bail!("controller.half_scale must lie within the channel bounds");
        }
        if c.max_transverse_step <= 0 {
            eyre::bail!("controller.max_transverse_step must be > 0");
        }
        if c.max_z_step <= 0 {
            eyre::bail!("controller.max_z_step must be > 0");
        }
        check_gains("transverse", &c.transverse)?;
        check_gains("z", &c.z)?;

        // Channels
        let ch = &self.channels;
        let mut used = [ch.x_plus, ch.x_minus, ch.y_plus, ch.y_minus, ch.sample_pad];
        if used.iter().any(|&n| n > 7) {
            eyre::bail!("channels must be in 0..=7");
        }
        used.sort_unstable();
        if used.windows(2).any(|w| w[0] == w[1]) {
            eyre::bail!("channels must be distinct");
        }

        // Acquisition
        let a = &self.acquisition;
        if a.sample_period_us == 0 {
            eyre::bail!("acquisition.sample_period_us must be >= 1");
        }
        if a.ticks_per_fetch == 0 {
            eyre::bail!("acquisition.ticks_per_fetch must be >= 1");
        }
        if a.stall_timeout_ms == 0 {
            eyre::bail!("acquisition.stall_timeout_ms must be >= 1");
        }
        if !(a.full_scale_volts > 0.0 && a.raw_full_scale > 0.0 && a.pa_per_volt > 0.0) {
            eyre::bail!("acquisition conversion constants must be > 0");
        }

        // Filter
        let f = &self.filter;
        if let Some(sections) = &f.sections {
            if sections.is_empty() {
                eyre::bail!("filter.sections must not be empty when given");
            }
            for (i, s) in sections.iter().enumerate() {
                check_section(i, s)?;
            }
        } else if f.enabled {
            let nyquist = 1_000_000.0 / (2.0 * a.sample_period_us as f64);
            if !(f.notch_hz > 0.0 && f.notch_hz < nyquist) {
                eyre::bail!("filter.notch_hz must be in (0, nyquist)");
            }
            if f.bandwidth_hz <= 0.0 {
                eyre::bail!("filter.bandwidth_hz must be > 0");
            }
            if f.stages == 0 {
                eyre::bail!("filter.stages must be >= 1");
            }
        }

        // Approach
        let ap = &self.approach;
        if !(ap.setpoint_pa.is_finite() && ap.setpoint_pa > 0.0) {
            eyre::bail!("approach.setpoint_pa must be > 0");
        }
        if ap.advance_steps <= 0 || ap.advance_rate == 0 {
            eyre::bail!("approach.advance_steps and approach.advance_rate must be > 0");
        }
        let travel = f64::from(c.max_channel - c.min_channel);
        if f64::from(ap.advance_steps) * ap.piezo_units_per_step >= travel {
            eyre::bail!("approach.advance_steps must cover less than the piezo travel");
        }
        if ap.trace_capacity == 0 {
            eyre::bail!("approach.trace_capacity must be >= 1");
        }

        // Scan
        if self.scan.step == 0 {
            eyre::bail!("scan.step must be >= 1");
        }

        // Safety
        let s = &self.safety;
        if !(s.overcurrent_pa.is_finite() && s.overcurrent_pa > 0.0) {
            eyre::bail!("safety.overcurrent_pa must be > 0");
        }
        if s.overcurrent_pa <= ap.setpoint_pa {
            eyre::bail!("safety.overcurrent_pa must exceed approach.setpoint_pa");
        }
        if s.retract_steps >= 0 {
            eyre::bail!("safety.retract_steps must be negative (a retraction)");
        }
        if s.retract_rate == 0 {
            eyre::bail!("safety.retract_rate must be > 0");
        }

        // Hardware
        if self.hardware.stepper_pins.is_empty() {
            eyre::bail!("hardware.stepper_pins must list at least one motor");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_the_stock_instrument() {
        let cfg = load_toml("").expect("parse");
        cfg.validate().expect("defaults validate");
        assert_eq!(cfg.controller.half_scale, 32_767);
        assert_eq!(cfg.acquisition.sample_period_us, 50);
        assert_eq!(cfg.approach.trace_capacity, 1_000);
    }

    #[test]
    fn stable_section_passes_check() {
        let s = [
            0.999_372_113_165_724_5,
            -1.998_389_154_178_269_5,
            0.999_372_113_165_724_5,
            1.0,
            -1.998_389_154_178_269_5,
            0.998_744_226_331_449,
        ];
        check_section(0, &s).expect("stable");
    }

    #[test]
    fn pole_on_unit_circle_is_rejected() {
        let s = [1.0, 0.0, 0.0, 1.0, -2.0, 1.0];
        assert!(check_section(0, &s).is_err());
    }
}
