//! Log-scale current bar graph.

/// Segments on a full bar.
pub const BAR_SEGMENTS: u8 = 24;

/// Decades between an empty bar (1 pA) and a full one (100 nA).
const DECADES: f64 = 5.0;

/// Lit segments for `current_pa` on a log10 scale.
///
/// 1 pA and below (and NaN) light nothing; 100 nA and above light all 24.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn bar_segments(current_pa: f64) -> u8 {
    if !(current_pa > 1.0) {
        return 0;
    }
    let lit = (current_pa.log10() * f64::from(BAR_SEGMENTS) / DECADES).floor();
    if lit >= f64::from(BAR_SEGMENTS) {
        BAR_SEGMENTS
    } else {
        lit as u8
    }
}

/// `[####....]` with `BAR_SEGMENTS` cells.
pub fn render_bar(current_pa: f64) -> String {
    let lit = usize::from(bar_segments(current_pa));
    let mut s = String::with_capacity(usize::from(BAR_SEGMENTS) + 2);
    s.push('[');
    s.extend(std::iter::repeat_n('#', lit));
    s.extend(std::iter::repeat_n('.', usize::from(BAR_SEGMENTS) - lit));
    s.push(']');
    s
}
