use rstest::rstest;
use stm_hardware::frames::{decode_channel_write, encode_channel_write};
use stm_hardware::{HwError, SimParams, SimulatedMicroscope};
use stm_traits::{CurrentSense, PiezoDrive};

#[rstest]
#[case(0, 0)]
#[case(3, 32_767)]
#[case(4, 37_500)]
#[case(7, u16::MAX)]
fn framed_writes_land_on_the_addressed_channel(#[case] channel: u8, #[case] value: u16) {
    let sim = SimulatedMicroscope::new(SimParams::default());
    let mut piezo = sim.piezo();

    // Route the write through the wire format the real DAC sees.
    let frame = encode_channel_write(channel, value).expect("encode");
    let (ch, v) = decode_channel_write(frame).expect("decode");
    piezo.write_piezo_channel(ch, v).expect("write");

    assert_eq!(sim.channel(channel), value);
    assert_eq!(sim.channel_writes(), 1);
}

#[test]
fn sim_rejects_out_of_range_channel() {
    let sim = SimulatedMicroscope::new(SimParams::default());
    let mut piezo = sim.piezo();
    let err = piezo
        .write_piezo_channel(9, 0)
        .expect_err("channel 9 must be rejected");
    let hw = err.downcast_ref::<HwError>().expect("typed hardware error");
    assert!(matches!(hw, HwError::ChannelOutOfRange(9)));
}

#[test]
fn hum_averages_out_over_whole_cycles() {
    let params = SimParams {
        hum_counts: 300.0,
        ..SimParams::default()
    };
    let sim = SimulatedMicroscope::new(params);
    let mut tia = sim.tia();
    // 1000 samples at 20 kHz = 3 full 60 Hz cycles
    let n = 1_000;
    let sum: f64 = (0..n)
        .map(|_| f64::from(tia.read_current_raw().unwrap()))
        .sum();
    let mean = sum / f64::from(n);
    assert!((mean - 2_048.0).abs() < 1.0, "mean was {mean}");
    assert_eq!(sim.reads(), 1_000);
}
