use std::sync::Arc;

use rstest::rstest;
use stm_core::mocks::{ConstantCurrent, RecordingPiezo, RecordingStepper};
use stm_core::{
    AreaScan, AreaTrace, Direction, FilterCfg, LineScan, LineTrace, ScanHead, ScanStatus,
    StepStatus, StmError, ZTarget, run_line_scan, scan_one_axis, scan_two_axes,
};
use stm_traits::{ManualClock, StatusCode};

fn head_with(current: ConstantCurrent) -> ScanHead {
    ScanHead::builder()
        .with_piezo(RecordingPiezo::new())
        .with_stepper(RecordingStepper::new())
        .with_current_sense(current)
        .with_filter(FilterCfg::Disabled)
        .with_clock(Arc::new(ManualClock::new()))
        .build()
        .unwrap()
}

fn line(size: u32, step: u32, direction: Direction, height_control: bool) -> LineScan {
    LineScan {
        size,
        step,
        direction,
        height_control,
        max_polls_per_point: None,
    }
}

#[rstest]
#[case(Direction::Forward, 10)]
#[case(Direction::Reverse, -10)]
fn line_scan_visits_every_unit_step(#[case] direction: Direction, #[case] end: i32) {
    let mut head = head_with(ConstantCurrent::new(1_000));
    let mut trace = LineTrace::default();
    let status = scan_one_axis(&mut head, &line(10, 1, direction, false), &mut trace).unwrap();

    assert_eq!(status, ScanStatus::Complete);
    assert_eq!(trace.len(), 10);
    assert_eq!(head.position().x, end);
    // One poll per unit step.
    assert_eq!(head.polls(), 10);
    // Z held throughout.
    assert!(trace.z.iter().all(|&z| z == 0));
    assert_eq!(head.position().z, 0);
    assert_eq!(head.status(), StatusCode::ApproachPiezo);
}

#[test]
fn line_scan_records_every_step_th_point() {
    let mut head = head_with(ConstantCurrent::new(0));
    let mut trace = LineTrace::default();
    scan_one_axis(&mut head, &line(10, 3, Direction::Forward, false), &mut trace).unwrap();
    // k = 0, 3, 6, 9
    assert_eq!(trace.len(), 4);
    assert_eq!(trace.rows().map(|r| r.0).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
}

#[test]
fn line_scan_records_the_head_z_under_height_control() {
    let mut head = head_with(ConstantCurrent::new(0));
    head.set_setpoint_pa(500.0);
    let mut trace = LineTrace::default();
    scan_one_axis(&mut head, &line(5, 1, Direction::Forward, true), &mut trace).unwrap();
    // 0 pA under a 500 pA setpoint saturates Z at +100 per poll.
    assert_eq!(trace.z, vec![100, 200, 300, 400, 500]);
}

#[test]
fn line_scan_logs_the_integrated_current() {
    let mut head = head_with(ConstantCurrent::new(1_000));
    let mut trace = LineTrace::default();
    scan_one_axis(&mut head, &line(3, 1, Direction::Forward, false), &mut trace).unwrap();
    let expected = 1_000.0 * 3.3 / 65_536.0 * 10_000.0;
    assert!(trace.current.iter().all(|c| (c - expected).abs() < 1e-9));
}

#[test]
fn overcurrent_aborts_the_scan() {
    let current = ConstantCurrent::new(0);
    let mut head = head_with(current.clone());
    current.set(30_000);
    let mut trace = LineTrace::default();
    let status = scan_one_axis(&mut head, &line(10, 1, Direction::Forward, false), &mut trace).unwrap();
    assert_eq!(status, ScanStatus::Aborted(StepStatus::Overcurrent));
    assert!(trace.is_empty());
    assert_eq!(head.status(), StatusCode::Overcurrent);
}

#[test]
fn running_off_the_dac_aborts_as_unattainable() {
    let mut head = head_with(ConstantCurrent::new(0));
    // Four units short of the X travel limit (X- reaches code 0 at 32767).
    while head.set_position_step(32_763, 0, ZTarget::Hold).unwrap() != StepStatus::Attained {}
    let mut trace = LineTrace::default();
    let status = scan_one_axis(&mut head, &line(10, 1, Direction::Forward, false), &mut trace).unwrap();
    assert_eq!(status, ScanStatus::Aborted(StepStatus::Unattainable));
    assert_eq!(trace.len(), 4);
    assert_eq!(head.status(), StatusCode::ApproachPiezo);
}

#[test]
fn one_poll_per_point_is_enough_for_unit_steps() {
    let mut head = head_with(ConstantCurrent::new(0));
    let scan = LineScan {
        max_polls_per_point: Some(1),
        ..line(200, 1, Direction::Forward, false)
    };
    let (status, trace) = run_line_scan(&mut head, &scan).unwrap();
    assert_eq!(status, ScanStatus::Complete);
    assert_eq!(trace.len(), 200);
}

#[test]
fn poll_limit_per_point_is_an_error() {
    let mut head = head_with(ConstantCurrent::new(0));
    // The second row is 500 units away: ten polls at the default step limit.
    let scan = AreaScan {
        size_x: 1,
        size_y: 1_000,
        step: 500,
        height_control: false,
        max_polls_per_point: Some(2),
    };
    let mut trace = AreaTrace::default();
    let err = scan_two_axes(&mut head, &scan, &mut trace).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StmError>(),
        Some(StmError::PollLimit { limit: 2, .. })
    ));
    assert_eq!(trace.len(), 1);
}

#[test]
fn area_scan_is_boustrophedon() {
    let mut head = head_with(ConstantCurrent::new(0));
    let scan = AreaScan {
        size_x: 3,
        size_y: 2,
        step: 1,
        height_control: false,
        max_polls_per_point: None,
    };
    let mut trace = AreaTrace::default();
    let status = scan_two_axes(&mut head, &scan, &mut trace).unwrap();
    assert_eq!(status, ScanStatus::Complete);
    let visited: Vec<(i32, i32)> = trace.points.iter().map(|p| (p.x, p.y)).collect();
    assert_eq!(visited, vec![(0, 0), (1, 0), (2, 0), (2, 1), (1, 1), (0, 1)]);
}

#[test]
fn area_scan_spacing_applies_to_rows_and_columns() {
    let mut head = head_with(ConstantCurrent::new(0));
    let scan = AreaScan {
        size_x: 5,
        size_y: 5,
        step: 2,
        height_control: false,
        max_polls_per_point: None,
    };
    let mut trace = AreaTrace::default();
    scan_two_axes(&mut head, &scan, &mut trace).unwrap();
    assert_eq!(trace.len(), 9);
    let first_row_back: Vec<i32> = trace.points[3..6].iter().map(|p| p.x).collect();
    assert_eq!(first_row_back, vec![4, 2, 0]);
    assert!(trace.points[3..6].iter().all(|p| p.y == 2));
}
