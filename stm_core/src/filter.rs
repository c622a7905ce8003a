//! Second-order-section IIR filtering of the raw TIA stream.
//!
//! Coefficients are normalized so the leading feedback term is 1:
//! `y = a0·x + a1·x[-1] + a2·x[-2] - b1·y[-1] - b2·y[-2]`.

use std::f64::consts::PI;

/// Sample rate the built-in tables were designed for.
pub const DESIGN_SAMPLE_RATE_HZ: f64 = 20_000.0;

/// Two identical 60 Hz band-stop sections, 4 Hz wide, at 20 kHz.
pub const MAINS_NOTCH_60HZ: [Coefficients; 2] = [NOTCH_60HZ_SECTION, NOTCH_60HZ_SECTION];

const NOTCH_60HZ_SECTION: Coefficients = Coefficients {
    a0: 0.999_372_113_165_724_5,
    a1: -1.998_389_154_178_269_5,
    a2: 0.999_372_113_165_724_5,
    b0: 1.0,
    b1: -1.998_389_154_178_269_5,
    b2: 0.998_744_226_331_449,
};

/// Feed-forward (`a*`) and feedback (`b*`) terms of one section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    pub a0: f64,
    pub a1: f64,
    pub a2: f64,
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
}

impl Coefficients {
    /// `[a0, a1, a2, b0, b1, b2]`, the layout used in config files.
    pub const fn from_array(c: [f64; 6]) -> Self {
        Self {
            a0: c[0],
            a1: c[1],
            a2: c[2],
            b0: c[3],
            b1: c[4],
            b2: c[5],
        }
    }
}

#[derive(Debug, Clone, Default)]
struct History {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

/// One biquad section with its own delay line.
#[derive(Debug, Clone)]
pub struct Biquad {
    c: Coefficients,
    h: History,
}

impl Biquad {
    pub fn new(c: Coefficients) -> Self {
        Self {
            c,
            h: History::default(),
        }
    }

    /// Band-stop section centered on `center_hz` with -3 dB width `bandwidth_hz`.
    ///
    /// Returns `None` when the center is not strictly between 0 and Nyquist or
    /// the bandwidth is not positive.
    pub fn notch(center_hz: f64, bandwidth_hz: f64, sample_rate_hz: f64) -> Option<Self> {
        let nyquist = sample_rate_hz / 2.0;
        if !(center_hz > 0.0 && center_hz < nyquist && bandwidth_hz > 0.0) {
            return None;
        }
        let w0 = 2.0 * PI * center_hz / sample_rate_hz;
        let q = center_hz / bandwidth_hz;
        let alpha = w0.sin() / (2.0 * q);
        let norm = 1.0 + alpha;
        let k = -2.0 * w0.cos() / norm;
        Some(Self::new(Coefficients {
            a0: 1.0 / norm,
            a1: k,
            a2: 1.0 / norm,
            b0: 1.0,
            b1: k,
            b2: (1.0 - alpha) / norm,
        }))
    }

    pub fn coefficients(&self) -> Coefficients {
        self.c
    }

    #[inline]
    pub fn filter(&mut self, x: f64) -> f64 {
        let c = &self.c;
        let h = &mut self.h;
        let y = c.a0 * x + c.a1 * h.x1 + c.a2 * h.x2 - c.b1 * h.y1 - c.b2 * h.y2;
        h.x2 = h.x1;
        h.x1 = x;
        h.y2 = h.y1;
        h.y1 = y;
        y
    }

    pub fn reset(&mut self) {
        self.h = History::default();
    }

    /// Load the delay line with the steady state for a constant input `x`.
    pub fn prime(&mut self, x: f64) {
        let y = x * self.dc_gain();
        self.h = History {
            x1: x,
            x2: x,
            y1: y,
            y2: y,
        };
    }

    /// Gain at 0 Hz.
    pub fn dc_gain(&self) -> f64 {
        let c = &self.c;
        (c.a0 + c.a1 + c.a2) / (c.b0 + c.b1 + c.b2)
    }
}

/// Sections applied in order; an empty cascade passes samples through.
#[derive(Debug, Clone, Default)]
pub struct Cascade {
    sections: Vec<Biquad>,
}

impl Cascade {
    pub fn new(sections: Vec<Biquad>) -> Self {
        Self { sections }
    }

    pub fn from_coefficients(coeffs: &[Coefficients]) -> Self {
        Self::new(coeffs.iter().copied().map(Biquad::new).collect())
    }

    /// Default 60 Hz mains rejection at the 20 kHz design rate.
    pub fn mains_notch() -> Self {
        Self::from_coefficients(&MAINS_NOTCH_60HZ)
    }

    /// `stages` identical notch sections designed at runtime.
    pub fn notch(
        center_hz: f64,
        bandwidth_hz: f64,
        sample_rate_hz: f64,
        stages: usize,
    ) -> Option<Self> {
        let section = Biquad::notch(center_hz, bandwidth_hz, sample_rate_hz)?;
        Some(Self::new(vec![section; stages]))
    }

    #[inline]
    pub fn filter(&mut self, x: f64) -> f64 {
        self.sections.iter_mut().fold(x, |acc, s| s.filter(acc))
    }

    pub fn reset(&mut self) {
        self.sections.iter_mut().for_each(Biquad::reset);
    }

    pub fn prime(&mut self, x: f64) {
        let mut v = x;
        for s in &mut self.sections {
            s.prime(v);
            v *= s.dc_gain();
        }
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_design_matches_table() {
        let q = Biquad::notch(60.0, 4.0, DESIGN_SAMPLE_RATE_HZ).unwrap();
        let c = q.coefficients();
        let t = NOTCH_60HZ_SECTION;
        for (a, b) in [
            (c.a0, t.a0),
            (c.a1, t.a1),
            (c.a2, t.a2),
            (c.b1, t.b1),
            (c.b2, t.b2),
        ] {
            assert!((a - b).abs() < 1e-12, "{a} vs {b}");
        }
    }

    #[test]
    fn notch_rejects_bad_design_inputs() {
        assert!(Biquad::notch(0.0, 4.0, 20_000.0).is_none());
        assert!(Biquad::notch(10_000.0, 4.0, 20_000.0).is_none());
        assert!(Biquad::notch(60.0, 0.0, 20_000.0).is_none());
    }

    #[test]
    fn notch_has_unity_dc_gain() {
        let q = Biquad::new(NOTCH_60HZ_SECTION);
        assert!((q.dc_gain() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn primed_cascade_holds_dc_without_ringing() {
        let mut c = Cascade::mains_notch();
        c.prime(2_048.0);
        for _ in 0..100 {
            let y = c.filter(2_048.0);
            assert!((y - 2_048.0).abs() < 1e-6, "rang to {y}");
        }
    }

    #[test]
    fn unprimed_cascade_rings_on_step() {
        let mut c = Cascade::mains_notch();
        let y = c.filter(2_048.0);
        assert!((y - 2_048.0).abs() > 1.0);
        c.reset();
        assert_eq!(c.filter(0.0), 0.0);
    }

    #[test]
    fn empty_cascade_is_identity() {
        let mut c = Cascade::default();
        assert!(c.is_empty());
        assert_eq!(c.filter(123.5), 123.5);
    }
}
