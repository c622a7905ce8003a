use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use rstest::rstest;
use stm_core::mocks::{ConstantCurrent, RecordingPiezo, RecordingSink, RecordingStepper};
use stm_core::{ControllerCfg, FilterCfg, ScanHead, StepStatus, ZTarget};
use stm_traits::{ManualClock, StatusCode};

struct Rig {
    head: ScanHead,
    current: ConstantCurrent,
    piezo: RecordingPiezo,
    stepper: RecordingStepper,
    clock: ManualClock,
}

fn rig_with(cfg: ControllerCfg) -> Rig {
    let current = ConstantCurrent::new(0);
    let piezo = RecordingPiezo::new();
    let stepper = RecordingStepper::new();
    let clock = ManualClock::new();
    let head = ScanHead::builder()
        .with_piezo(piezo.clone())
        .with_stepper(stepper.clone())
        .with_current_sense(current.clone())
        .with_controller(cfg)
        .with_filter(FilterCfg::Disabled)
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    piezo.clear();
    Rig {
        head,
        current,
        piezo,
        stepper,
        clock,
    }
}

fn rig() -> Rig {
    rig_with(ControllerCfg::default())
}

#[test]
fn build_parks_the_piezo() {
    let piezo = RecordingPiezo::new();
    let _head = ScanHead::builder()
        .with_piezo(piezo.clone())
        .with_stepper(RecordingStepper::new())
        .with_current_sense(ConstantCurrent::new(0))
        .with_clock(Arc::new(ManualClock::new()))
        .build()
        .unwrap();
    assert_eq!(
        piezo.writes(),
        vec![(0, 32_767), (1, 32_767), (2, 32_767), (3, 32_767), (4, 37_500)]
    );
}

#[test]
fn without_park_leaves_the_dac_alone() {
    let piezo = RecordingPiezo::new();
    let _head = ScanHead::builder()
        .with_piezo(piezo.clone())
        .with_stepper(RecordingStepper::new())
        .with_current_sense(ConstantCurrent::new(0))
        .with_clock(Arc::new(ManualClock::new()))
        .without_park()
        .build()
        .unwrap();
    assert!(piezo.writes().is_empty());
}

#[test]
fn one_step_moves_by_at_most_the_transverse_limit() {
    let mut r = rig();
    let status = r.head.set_position_step(120, -7, ZTarget::Hold).unwrap();
    assert_eq!(status, StepStatus::NotYetAttained);
    assert_eq!(r.head.position().x, 50);
    assert_eq!(r.head.position().y, -7);
    assert_eq!(
        r.piezo.writes(),
        vec![
            (0, 32_767 + 50),
            (1, 32_767 - 50),
            (2, 32_767 - 7),
            (3, 32_767 + 7)
        ]
    );
}

#[test]
fn reaching_the_target_reports_attained() {
    let mut r = rig();
    let mut statuses = Vec::new();
    for _ in 0..4 {
        statuses.push(r.head.set_position_step(120, 0, ZTarget::Hold).unwrap());
    }
    assert_eq!(
        statuses,
        vec![
            StepStatus::NotYetAttained,
            StepStatus::NotYetAttained,
            StepStatus::Attained,
            StepStatus::Attained
        ]
    );
    assert_eq!(r.head.position().x, 120);
}

#[test]
fn settle_delay_is_slept_on_every_step() {
    let mut r = rig();
    for _ in 0..3 {
        r.head.set_position_step(10, 10, ZTarget::Hold).unwrap();
    }
    assert_eq!(r.clock.elapsed(), Duration::from_micros(1_500));
    assert_eq!(r.head.polls(), 3);
}

#[test]
fn z_follows_the_current_error() {
    let mut r = rig();
    // 0 pA against a 500 pA setpoint: the Z step saturates at +100.
    r.head
        .set_position_step(0, 0, ZTarget::Current(500.0))
        .unwrap();
    assert_eq!(r.head.position().z, 100);
    assert_eq!(r.head.setpoint_pa(), 500.0);
    // Common mode: all four channels drop by Z.
    assert!(r.piezo.writes().iter().all(|&(_, v)| v == 32_767 - 100));
}

#[rstest]
#[case(ZTarget::Hold, 0)]
#[case(ZTarget::Retract, -300)]
#[case(ZTarget::Current(500.0), 300)]
fn z_target_modes(#[case] z: ZTarget, #[case] expected: i32) {
    let mut r = rig();
    for _ in 0..3 {
        r.head.set_position_step(0, 0, z).unwrap();
    }
    assert_eq!(r.head.position().z, expected);
}

#[test]
fn overcurrent_retracts_steppers_and_skips_the_piezo() {
    let mut r = rig();
    // 30000 codes is about 15 nA, above the 10 nA interlock.
    r.current.set(30_000);
    let status = r.head.set_position_step(10, 10, ZTarget::Hold).unwrap();
    assert_eq!(status, StepStatus::Overcurrent);
    assert!(r.piezo.writes().is_empty());
    assert_eq!(r.stepper.moves(), vec![(-50, 4_096)]);
    assert_eq!(r.head.z_stepper_offset(), -50);
    assert_eq!(r.head.status(), StatusCode::Overcurrent);
    assert_eq!(r.head.position().x, 0);
}

#[test]
fn hitting_a_channel_bound_rolls_back_but_writes_clamped_codes() {
    let mut r = rig();
    let mut polls = 0;
    let status = loop {
        polls += 1;
        let s = r.head.set_position_step(40_000, 0, ZTarget::Hold).unwrap();
        if s != StepStatus::NotYetAttained {
            break s;
        }
    };
    assert_eq!(status, StepStatus::Unattainable);
    assert_eq!(polls, 656);
    assert_eq!(r.head.position().x, 32_750);
    let writes = r.piezo.writes();
    assert_eq!(
        &writes[writes.len() - 4..],
        &[(0, 65_535), (1, 0), (2, 32_767), (3, 32_767)]
    );
}

#[rstest]
#[case(5, 100, Some((5, 100)), StatusCode::ApproachStepper)]
#[case(5, -100, Some((-5, 100)), StatusCode::ApproachStepper)]
#[case(5, 0, None, StatusCode::ApproachPiezo)]
fn stepper_moves(
    #[case] steps: i32,
    #[case] rate: i32,
    #[case] expected: Option<(i32, u32)>,
    #[case] status: StatusCode,
) {
    let mut r = rig();
    r.head.move_stepper(steps, rate).unwrap();
    assert_eq!(r.stepper.moves(), expected.into_iter().collect::<Vec<_>>());
    assert_eq!(r.head.z_stepper_offset(), expected.map_or(0, |m| m.0));
    assert_eq!(r.head.status(), status);
}

#[test]
fn every_step_publishes_telemetry() {
    let sink = RecordingSink::new();
    let mut head = ScanHead::builder()
        .with_piezo(RecordingPiezo::new())
        .with_stepper(RecordingStepper::new())
        .with_current_sense(ConstantCurrent::new(0))
        .with_filter(FilterCfg::Disabled)
        .with_clock(Arc::new(ManualClock::new()))
        .with_sink(sink.clone())
        .build()
        .unwrap();
    head.set_position_step(3, 4, ZTarget::Hold).unwrap();
    head.set_position_step(3, 4, ZTarget::Hold).unwrap();
    let frames = sink.frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].position.x, 3);
    assert_eq!(frames[0].last_error.x, 3.0);
    assert_eq!(frames[1].last_error.y, 0.0);
    assert_eq!(frames[1].status, StatusCode::ApproachPiezo);
}

fn z_target() -> impl Strategy<Value = ZTarget> {
    prop_oneof![
        Just(ZTarget::Hold),
        Just(ZTarget::Retract),
        (0.0f64..2_000.0).prop_map(ZTarget::Current),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn channels_stay_in_bounds_and_attained_means_on_target(
        targets in prop::collection::vec((-40_000i32..40_000, -40_000i32..40_000, z_target()), 1..6),
        lo in 0i32..4_000,
        hi in 60_000i32..=65_535,
    ) {
        let cfg = ControllerCfg { min_channel: lo, max_channel: hi, ..ControllerCfg::default() };
        let mut r = rig_with(cfg);
        for (x, y, z) in targets {
            for _ in 0..40 {
                let before = r.head.position();
                let status = r.head.set_position_step(x, y, z).unwrap();
                let p = r.head.position();
                match status {
                    StepStatus::Attained => prop_assert!(p.x == x && p.y == y),
                    StepStatus::NotYetAttained => prop_assert!(p.x != x || p.y != y),
                    StepStatus::Unattainable => prop_assert_eq!(p, before),
                    StepStatus::Overcurrent => prop_assert!(false, "no current was applied"),
                }
                if status != StepStatus::NotYetAttained {
                    break;
                }
            }
        }
        for (channel, code) in r.piezo.writes() {
            prop_assert!(channel < 4);
            prop_assert!(i32::from(code) >= lo && i32::from(code) <= hi, "code {} outside {}..={}", code, lo, hi);
        }
    }
}
