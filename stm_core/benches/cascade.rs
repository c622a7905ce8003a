use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use stm_core::Cascade;

// Baseline plus 60 Hz hum plus white noise, in ADC codes
fn synth_samples(n: usize, hum: f64, noise_amp: f64, seed: u32) -> Vec<f64> {
    let mut state = seed.max(1);
    let mut next_f64 = || {
        let mut x = state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        state = x;
        f64::from(x) / (f64::from(u32::MAX) + 1.0)
    };
    (0..n)
        .map(|i| {
            let t = i as f64 / 20_000.0;
            let noise = (next_f64() * 2.0 - 1.0) * noise_amp;
            2_048.0 + hum * (2.0 * std::f64::consts::PI * 60.0 * t).sin() + noise
        })
        .collect()
}

pub fn bench_notch(c: &mut Criterion) {
    let mut g = c.benchmark_group("mains_notch");
    //   BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p stm_core --bench cascade
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(1));
        }
    } else {
        g.sample_size(50);
    }
    if let Some(ms) = std::env::var("BENCH_MEAS_MS")
        .ok()
        .and_then(|ms| ms.parse::<u64>().ok())
    {
        g.measurement_time(std::time::Duration::from_millis(ms));
    }

    // One second of samples at 20 kHz.
    let samples = synth_samples(20_000, 150.0, 4.0, 0x5EED);

    for &stages in &[1usize, 2, 4] {
        g.bench_function(format!("stages_{stages}"), |b| {
            b.iter_batched(
                || Cascade::notch(60.0, 4.0, 20_000.0, stages).unwrap_or_default(),
                |mut cascade| {
                    let mut acc = 0.0;
                    for &x in black_box(&samples) {
                        acc += cascade.filter(x);
                    }
                    black_box(acc);
                },
                BatchSize::SmallInput,
            )
        });
    }
    g.finish();
}

criterion_group!(cascade, bench_notch);
criterion_main!(cascade);
