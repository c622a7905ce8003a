#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Text front panel for the scan head: telemetry line, current bar graph and
//! supply-rail check.

pub mod bar;
pub mod console;
pub mod rails;

pub use bar::{BAR_SEGMENTS, bar_segments, render_bar};
pub use console::{ConsoleUi, UiStyle};
pub use rails::{RailCheck, RailMonitor, RailReadings, RailReport};
