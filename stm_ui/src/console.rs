//! Telemetry sink that prints one status line per frame.

use std::io::Write;

use stm_traits::{Telemetry, TelemetrySink};

use crate::bar::render_bar;

/// How much `ConsoleUi` prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum UiStyle {
    /// Status line with the current bar graph.
    #[default]
    Bar,
    /// Status line only.
    Plain,
    /// Nothing.
    Off,
}

pub struct ConsoleUi<W: Write> {
    out: W,
    style: UiStyle,
    every: u32,
    seen: u64,
    failed: bool,
}

impl<W: Write> ConsoleUi<W> {
    pub fn new(out: W, style: UiStyle) -> Self {
        Self {
            out,
            style,
            every: 1,
            seen: 0,
            failed: false,
        }
    }

    /// Print only every `n`-th frame. The loop publishes on every poll.
    pub fn every(mut self, n: u32) -> Self {
        self.every = n.max(1);
        self
    }

    pub fn frames_seen(&self) -> u64 {
        self.seen
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn format_line(&self, frame: &Telemetry) -> String {
        let p = frame.position;
        let mut line = format!(
            "{:<16} x={:>6} y={:>6} z={:>6} step={:>6} I={:>10.1} pA",
            frame.status.as_str(),
            p.x,
            p.y,
            p.z,
            frame.z_stepper_offset,
            frame.current_pa
        );
        if self.style == UiStyle::Bar {
            line.push(' ');
            line.push_str(&render_bar(frame.current_pa));
        }
        line
    }
}

impl<W: Write> TelemetrySink for ConsoleUi<W> {
    fn publish(&mut self, frame: &Telemetry) {
        self.seen += 1;
        if self.style == UiStyle::Off || (self.seen - 1) % u64::from(self.every) != 0 {
            return;
        }
        let line = self.format_line(frame);
        if let Err(e) = writeln!(self.out, "{line}") {
            // Logged once per sink.
            if !self.failed {
                tracing::debug!(error = %e, "telemetry output failed");
                self.failed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stm_traits::{Axes, StatusCode};

    fn frame(x: i32, current_pa: f64) -> Telemetry {
        Telemetry {
            status: StatusCode::Scanning,
            position: Axes::new(x, -2, 300),
            z_stepper_offset: 9,
            current_pa,
            last_error: Axes::default(),
        }
    }

    #[test]
    fn prints_status_position_and_bar() {
        let mut ui = ConsoleUi::new(Vec::new(), UiStyle::Bar);
        ui.publish(&frame(5, 1_000.0));
        let text = String::from_utf8(ui.into_inner()).unwrap();
        assert!(text.starts_with("scanning"));
        assert!(text.contains("x=     5"));
        assert!(text.contains("z=   300"));
        assert!(text.contains("I=    1000.0 pA"));
        assert!(text.trim_end().ends_with(']'));
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn plain_style_has_no_bar() {
        let ui = ConsoleUi::new(Vec::new(), UiStyle::Plain);
        assert!(!ui.format_line(&frame(0, 50.0)).contains('['));
    }

    #[test]
    fn decimates_frames() {
        let mut ui = ConsoleUi::new(Vec::new(), UiStyle::Plain).every(3);
        for x in 0..7 {
            ui.publish(&frame(x, 1.0));
        }
        assert_eq!(ui.frames_seen(), 7);
        let text = String::from_utf8(ui.into_inner()).unwrap();
        // frames 0, 3, 6
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn off_prints_nothing() {
        let mut ui = ConsoleUi::new(Vec::new(), UiStyle::Off);
        ui.publish(&frame(1, 1.0));
        assert!(ui.into_inner().is_empty());
    }
}
