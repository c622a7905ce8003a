//! Session-level drivers used by front ends.
//!
//! These wrap the engines with logging, an interrupt flag checked between
//! polls, and pre-sized traces.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::approach::{ApproachProgress, ApproachTrace, AutoApproach};
use crate::config::ApproachCfg;
use crate::error::{Result, StmError};
use crate::head::ScanHead;
use crate::scan::{AreaScan, AreaTrace, LineScan, LineTrace, ScanStatus, scan_one_axis, scan_two_axes};

#[derive(Debug, Clone)]
pub struct ApproachOutcome {
    pub progress: ApproachProgress,
    pub trace: ApproachTrace,
}

fn interrupted() -> eyre::Report {
    eyre::Report::new(StmError::State("interrupted".into()))
}

fn warn_if_uncalibrated(head: &ScanHead) {
    if !head.is_calibrated() {
        tracing::warn!("zero current not calibrated; currents are relative to raw code 0");
    }
}

/// Auto-approach to `setpoint_pa`, checking `stop` between polls.
pub fn run_approach(
    head: &mut ScanHead,
    setpoint_pa: f64,
    cfg: ApproachCfg,
    max_polls: Option<u64>,
    stop: &AtomicBool,
) -> Result<ApproachOutcome> {
    warn_if_uncalibrated(head);
    tracing::info!(setpoint_pa, ?max_polls, "auto-approach start");
    let mut approach = AutoApproach::new(setpoint_pa, cfg);
    loop {
        if stop.load(Ordering::Relaxed) {
            return Err(interrupted());
        }
        let p = approach.step(head)?;
        if p.is_terminal() {
            tracing::info!(state = ?p.state, polls = p.polls, cycles = p.cycle, "auto-approach done");
            return Ok(ApproachOutcome {
                progress: p,
                trace: approach.into_trace(),
            });
        }
        if let Some(limit) = max_polls.filter(|&l| p.polls >= l) {
            return Err(eyre::Report::new(StmError::PollLimit {
                limit,
                during: "approaching the surface",
            }));
        }
    }
}

pub fn run_line_scan(head: &mut ScanHead, scan: &LineScan) -> Result<(ScanStatus, LineTrace)> {
    warn_if_uncalibrated(head);
    let points = scan.size.div_ceil(scan.step.max(1));
    let mut trace = LineTrace::with_capacity(usize::try_from(points).unwrap_or(0));
    let status = scan_one_axis(head, scan, &mut trace)?;
    tracing::info!(?status, points = trace.len(), "line scan done");
    Ok((status, trace))
}

pub fn run_area_scan(head: &mut ScanHead, scan: &AreaScan) -> Result<(ScanStatus, AreaTrace)> {
    warn_if_uncalibrated(head);
    let mut trace = AreaTrace::default();
    let status = scan_two_axes(head, scan, &mut trace)?;
    tracing::info!(?status, points = trace.len(), "area scan done");
    Ok((status, trace))
}
