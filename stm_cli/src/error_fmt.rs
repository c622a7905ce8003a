//! Human-readable error descriptions and structured JSON error formatting.

use crate::session::Abort;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    use stm_core::{BuildError, StmError};

    // Typed matches first
    if let Some(abort) = err.downcast_ref::<Abort>() {
        return match abort {
            Abort::Overcurrent => "What happened: Tunneling current exceeded the overcurrent limit; the steppers were retracted.\nLikely causes: Tip crashed into the sample, approach setpoint too high, or Z gain too aggressive.\nHow to fix: Inspect the tip, lower approach.setpoint_pa or controller.z.kp, then approach again.".to_string(),
            Abort::Unattainable => "What happened: A scan point lies outside the piezo travel.\nLikely causes: Scan size too large for the current position, or channel bounds set too tight.\nHow to fix: Reduce the scan size or step, or re-center the tip before scanning.".to_string(),
            Abort::ApproachFailed => "What happened: Auto-approach did not find the surface within approach.max_cycles.\nLikely causes: Sample too far away, TIA not connected, or setpoint above the reachable current.\nHow to fix: Jog the steppers closer, check the TIA wiring, or raise approach.max_cycles.".to_string(),
        };
    }

    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingPiezo => "What happened: No piezo drive was provided to the scan head.\nLikely causes: The DAC failed to open or was not wired into the builder.\nHow to fix: Ensure the piezo DAC is created successfully and passed via with_piezo(...).".to_string(),
            BuildError::MissingStepper => "What happened: No stepper was provided to the scan head.\nLikely causes: Stepper pins failed to open or were not wired into the builder.\nHow to fix: Check [hardware] stepper_pins and pass the stepper via with_stepper(...).".to_string(),
            BuildError::MissingCurrentSense => "What happened: No current sense was provided to the scan head.\nLikely causes: The TIA ADC failed to open or was not wired into the builder.\nHow to fix: Ensure the ADC is created successfully and passed via with_current_sense(...).".to_string(),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(se) = err.downcast_ref::<StmError>() {
        return match se {
            StmError::PollLimit { limit, during } => format!(
                "What happened: Gave up after {limit} controller polls while {during}.\nLikely causes: Poll ceiling too low for the distance to travel, or the loop is not converging.\nHow to fix: Raise approach.max_polls / scan.max_polls_per_point or pass a larger --max-polls."
            ),
            StmError::State(msg) if msg == "interrupted" => {
                "What happened: Interrupted by the user.\nLikely causes: Ctrl-C.\nHow to fix: Run the command again.".to_string()
            }
            StmError::Hardware(_) | StmError::HardwareFault(_) | StmError::SamplerStalled { .. } => format!(
                "What happened: {se}.\nLikely causes: SPI/GPIO wiring, power, or permissions.\nHow to fix: Check the DAC, ADC and stepper connections and that the process may access /dev/spidev*."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = format!("{err:#}").to_ascii_lowercase();

    if lower.contains("supply rail check failed") {
        return format!(
            "What happened: {msg}.\nLikely causes: Missing or sagging supply, or a wrong divider.\nHow to fix: Measure the rails; adjust [rails] only if the expected codes are wrong."
        );
    }

    if lower.contains("filter csv must have headers") {
        return "Invalid headers in filter CSV. Expected 'a0,a1,a2,b0,b1,b2'.".to_string();
    }

    if lower.contains("loading config") {
        return format!(
            "What happened: The config file could not be loaded.\nLikely causes: Wrong path, invalid TOML, or out-of-range values.\nHow to fix: Check the --config path and the value named below, then rerun. Original: {err:#}"
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes for aborts; other errors return 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(abort) = err.downcast_ref::<Abort>() {
        return match abort {
            Abort::Overcurrent => 3,
            Abort::Unattainable => 4,
            Abort::ApproachFailed => 6,
        };
    }
    if let Some(stm_core::StmError::PollLimit { .. }) = err.downcast_ref::<stm_core::StmError>() {
        return 5;
    }
    1
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    if let Some(abort) = err.downcast_ref::<Abort>() {
        return json!({ "reason": abort.name(), "message": humanize(err) }).to_string();
    }
    if let Some(stm_core::StmError::PollLimit { limit, during }) =
        err.downcast_ref::<stm_core::StmError>()
    {
        return json!({
            "reason": "PollLimit",
            "details": { "limit": limit, "during": during },
            "message": humanize(err),
        })
        .to_string();
    }

    // Generic error JSON
    json!({ "reason": "Error", "message": humanize(err) }).to_string()
}
