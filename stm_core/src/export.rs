//! Host dump formats: comma-delimited rows, no header.
//!
//! - line scan: `index,current,z`
//! - area scan: `index,current,z,x,y`
//! - approach trace: `current,z`

use std::io::Write;

use eyre::WrapErr;

use crate::approach::ApproachTrace;
use crate::error::{Result, StmError};
use crate::scan::{AreaTrace, LineTrace};

fn writer<W: Write>(w: W) -> csv::Writer<W> {
    csv::WriterBuilder::new().has_headers(false).from_writer(w)
}

fn io_error(e: impl std::fmt::Display) -> eyre::Report {
    eyre::Report::new(StmError::Io(e.to_string()))
}

pub fn write_line_trace<W: Write>(w: W, trace: &LineTrace) -> Result<()> {
    let mut wtr = writer(w);
    for row in trace.rows() {
        wtr.serialize(row).map_err(io_error).wrap_err("writing line scan row")?;
    }
    wtr.flush().map_err(io_error).wrap_err("flushing line scan")?;
    Ok(())
}

pub fn write_area_trace<W: Write>(w: W, trace: &AreaTrace) -> Result<()> {
    let mut wtr = writer(w);
    for (i, p) in trace.points.iter().enumerate() {
        wtr.serialize((i, p.current, p.z, p.x, p.y))
            .map_err(io_error)
            .wrap_err("writing area scan row")?;
    }
    wtr.flush().map_err(io_error).wrap_err("flushing area scan")?;
    Ok(())
}

pub fn write_approach_trace<W: Write>(w: W, trace: &ApproachTrace) -> Result<()> {
    let mut wtr = writer(w);
    for row in trace.rows() {
        wtr.serialize(row).map_err(io_error).wrap_err("writing approach row")?;
    }
    wtr.flush().map_err(io_error).wrap_err("flushing approach trace")?;
    Ok(())
}
