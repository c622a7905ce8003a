//! Raster scan engines.
//!
//! Both engines start from the head's present position, drive it one target
//! at a time with [`ScanHead::set_position_step`] and record the log-window
//! current and the Z position at each sampled point. Any status other than
//! progress aborts the scan immediately.

use stm_traits::StatusCode;

use crate::error::{Result, StmError};
use crate::head::{ScanHead, StepStatus, ZTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Toward +X.
    #[default]
    Forward,
    /// Toward -X.
    Reverse,
}

/// One-axis scan along X.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineScan {
    /// Unit steps to travel.
    pub size: u32,
    /// Record every `step`-th unit step.
    pub step: u32,
    pub direction: Direction,
    /// Servo Z on the head's setpoint instead of holding it.
    pub height_control: bool,
    pub max_polls_per_point: Option<u64>,
}

/// Boustrophedon area scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaScan {
    pub size_x: u32,
    pub size_y: u32,
    /// Spacing between rows and between columns.
    pub step: u32,
    pub height_control: bool,
    pub max_polls_per_point: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Complete,
    /// Stopped at the first point that could not be reached.
    Aborted(StepStatus),
}

/// Samples of a line scan; entry `i` belongs to unit step `i * step`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineTrace {
    pub current: Vec<f64>,
    pub z: Vec<i32>,
}

impl LineTrace {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            current: Vec::with_capacity(n),
            z: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// `(index, current, z)` rows.
    pub fn rows(&self) -> impl Iterator<Item = (usize, f64, i32)> + '_ {
        self.current
            .iter()
            .zip(&self.z)
            .enumerate()
            .map(|(i, (c, z))| (i, *c, *z))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaPoint {
    pub current: f64,
    pub z: i32,
    pub x: i32,
    pub y: i32,
}

/// Samples of an area scan in visitation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AreaTrace {
    pub points: Vec<AreaPoint>,
}

impl AreaTrace {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn z_target(head: &ScanHead, height_control: bool) -> ZTarget {
    if height_control {
        ZTarget::Current(head.setpoint_pa())
    } else {
        ZTarget::Hold
    }
}

/// Poll until `(x, y)` is attained. `Ok(Err(status))` carries an abort.
fn reach(
    head: &mut ScanHead,
    x: i32,
    y: i32,
    z: ZTarget,
    max_polls: Option<u64>,
) -> Result<std::result::Result<(), StepStatus>> {
    let mut polls = 0_u64;
    loop {
        let status = head.set_position_step(x, y, z)?;
        polls += 1;
        match status {
            StepStatus::Attained => return Ok(Ok(())),
            StepStatus::NotYetAttained => {}
            other => return Ok(Err(other)),
        }
        if let Some(limit) = max_polls.filter(|&l| polls >= l) {
            return Err(eyre::Report::new(StmError::PollLimit {
                limit,
                during: "scanning",
            }));
        }
    }
}

fn finish(head: &mut ScanHead, status: ScanStatus) -> ScanStatus {
    match status {
        ScanStatus::Aborted(StepStatus::Overcurrent) => {}
        ScanStatus::Aborted(s) => {
            tracing::warn!(status = ?s, "scan aborted");
            head.set_status(StatusCode::ApproachPiezo);
        }
        ScanStatus::Complete => head.set_status(StatusCode::ApproachPiezo),
    }
    status
}

/// Scan `size` unit steps along X from the present position.
pub fn scan_one_axis(head: &mut ScanHead, scan: &LineScan, trace: &mut LineTrace) -> Result<ScanStatus> {
    let step = scan.step.max(1);
    let origin = head.position();
    let sign = match scan.direction {
        Direction::Forward => 1,
        Direction::Reverse => -1,
    };
    head.set_status(StatusCode::Scanning);
    // Start the first point's integration here.
    let _ = head.fetch_current_log();
    tracing::info!(size = scan.size, step, direction = ?scan.direction, "line scan");

    for k in 0..scan.size {
        let offset = i32::try_from(k + 1).unwrap_or(i32::MAX).saturating_mul(sign);
        let x = origin.x.saturating_add(offset);
        let z = z_target(head, scan.height_control);
        if let Err(s) = reach(head, x, origin.y, z, scan.max_polls_per_point)? {
            return Ok(finish(head, ScanStatus::Aborted(s)));
        }
        if k % step == 0 {
            trace.current.push(head.fetch_current_log());
            trace.z.push(head.position().z);
        }
        head.publish();
    }
    Ok(finish(head, ScanStatus::Complete))
}

/// Raster `size_x` by `size_y` from the present position, alternating row direction.
pub fn scan_two_axes(head: &mut ScanHead, scan: &AreaScan, trace: &mut AreaTrace) -> Result<ScanStatus> {
    let step = usize::try_from(scan.step.max(1)).unwrap_or(usize::MAX);
    let origin = head.position();
    let to_i32 = |v: u32| i32::try_from(v).unwrap_or(i32::MAX);
    let columns: Vec<i32> = (0..scan.size_x).step_by(step).map(to_i32).collect();
    head.set_status(StatusCode::Scanning);
    let _ = head.fetch_current_log();
    tracing::info!(
        size_x = scan.size_x,
        size_y = scan.size_y,
        step,
        "area scan"
    );

    for (row, dy) in (0..scan.size_y).step_by(step).map(to_i32).enumerate() {
        let y = origin.y.saturating_add(dy);
        let ordered: Box<dyn Iterator<Item = &i32>> = if row % 2 == 0 {
            Box::new(columns.iter())
        } else {
            Box::new(columns.iter().rev())
        };
        for &dx in ordered {
            let x = origin.x.saturating_add(dx);
            let z = z_target(head, scan.height_control);
            if let Err(s) = reach(head, x, y, z, scan.max_polls_per_point)? {
                return Ok(finish(head, ScanStatus::Aborted(s)));
            }
            trace.points.push(AreaPoint {
                current: head.fetch_current_log(),
                z: head.position().z,
                x,
                y,
            });
            head.publish();
        }
    }
    Ok(finish(head, ScanStatus::Complete))
}
