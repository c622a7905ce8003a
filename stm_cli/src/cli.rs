//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;
use stm_ui::UiStyle;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "stm", version, about = "Scanning tunneling microscope scan-head CLI")]
pub struct Cli {
    /// Path to config TOML; built-in defaults when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Emit results and errors as JSON, and log as JSON lines
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Live telemetry on stderr
    #[arg(long, value_enum, value_name = "STYLE", default_value = "off")]
    pub ui: UiStyle,

    /// Print every N-th telemetry frame
    #[arg(long = "ui-every", value_name = "N", default_value_t = 200)]
    pub ui_every: u32,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Measure the zero-current baseline with the tip retracted
    Calibrate,
    /// Calibrate, then run the auto-approach until the setpoint current is found
    Approach {
        /// Tunneling current that marks the surface (pA); config value when omitted
        #[arg(long = "setpoint-pa", value_name = "PA")]
        setpoint_pa: Option<f64>,
        /// Give up after this many controller polls
        #[arg(long = "max-polls", value_name = "N")]
        max_polls: Option<u64>,
        /// Write the approach trace (current,z) to this file
        #[arg(long, value_name = "FILE")]
        dump: Option<PathBuf>,
    },
    /// Move the coarse steppers by hand (negative steps retract)
    Jog {
        #[arg(long, allow_hyphen_values = true)]
        steps: i32,
        /// Steps per second; negative reverses, zero does nothing
        #[arg(long, allow_hyphen_values = true, default_value_t = 100)]
        rate: i32,
    },
    /// Approach, then scan one line along X
    ScanLine {
        /// Unit steps to travel
        #[arg(long)]
        size: u32,
        /// Record every N-th unit step; config value when omitted
        #[arg(long)]
        step: Option<u32>,
        /// Scan toward -X
        #[arg(long, action = ArgAction::SetTrue)]
        reverse: bool,
        /// Servo Z on the setpoint current during the scan
        #[arg(long = "height-control", action = ArgAction::SetTrue)]
        height_control: bool,
        /// Write rows (index,current,z) here instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Approach, then raster an area with alternating row direction
    ScanArea {
        #[arg(long = "size-x")]
        size_x: u32,
        #[arg(long = "size-y")]
        size_y: u32,
        /// Row and column spacing; config value when omitted
        #[arg(long)]
        step: Option<u32>,
        #[arg(long = "height-control", action = ArgAction::SetTrue)]
        height_control: bool,
        /// Write rows (index,current,z,x,y) here instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Config, supply rails and one current sample
    SelfCheck,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn negative_jog_parses() {
        let cli = Cli::try_parse_from(["stm", "jog", "--steps", "-5", "--rate", "-200"]).unwrap();
        match cli.cmd {
            Commands::Jog { steps, rate } => assert_eq!((steps, rate), (-5, -200)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
