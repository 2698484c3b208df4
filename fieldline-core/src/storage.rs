//! Persistence of curves.
//!
//! Curves are stored in the same binary format which is used to transmit them between
//! domains. A batch file starts with a short header followed by one blob per curve.
//! For downstream tooling [export_json] writes human-readable summaries instead.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::curve::{Curve, CurveId, CurveStatus, HistoryPolicy};
use crate::errors::AdvectionError;
use crate::solvers::StepperRegistry;
use crate::step_record::StepRecord;
use crate::wire::{WireBuffer, WireError};

/// First bytes of a batch file.
pub const BATCH_MAGIC: [u8; 4] = *b"FLCB";

/// Version of the batch file layout.
pub const BATCH_VERSION: u16 = 1;

/// Writes all curves into a single buffer.
pub fn encode_batch<const D: usize>(
    curves: &[Curve<D>],
    history: HistoryPolicy,
) -> Result<WireBuffer, WireError> {
    let mut buffer = WireBuffer::new();
    buffer.write_raw(&BATCH_MAGIC);
    buffer.write(&BATCH_VERSION);
    buffer.write(&curves.len());
    let mut single = WireBuffer::new();
    for curve in curves {
        single.clear();
        curve.write_wire(&mut single, history)?;
        buffer.write_blob(single.as_bytes());
    }
    Ok(buffer)
}

/// Inverse of [encode_batch].
pub fn decode_batch<const D: usize>(
    buffer: &mut WireBuffer,
    registry: &StepperRegistry<D>,
) -> Result<Vec<Curve<D>>, AdvectionError> {
    if buffer.read_array::<4>()? != BATCH_MAGIC {
        return Err(WireError::InvalidValue("not a batch of curves".into()).into());
    }
    let version = buffer.read::<u16>()?;
    if version != BATCH_VERSION {
        return Err(WireError::InvalidValue(format!(
            "unsupported batch version {} (expected {})",
            version, BATCH_VERSION
        ))
        .into());
    }
    let n_curves = buffer.read::<usize>()?;
    let mut curves = Vec::with_capacity(n_curves.min(buffer.remaining()));
    for _ in 0..n_curves {
        let mut single = WireBuffer::from_bytes(buffer.read_blob()?);
        curves.push(Curve::read_wire(&mut single, registry)?);
    }
    Ok(curves)
}

/// Stores curves in a binary batch file.
pub fn save_curves<const D: usize>(
    path: impl AsRef<Path>,
    curves: &[Curve<D>],
    history: HistoryPolicy,
) -> Result<(), AdvectionError> {
    encode_batch(curves, history)?.save_to_file(path)?;
    Ok(())
}

/// Loads curves from a batch file written by [save_curves].
pub fn load_curves<const D: usize>(
    path: impl AsRef<Path>,
    registry: &StepperRegistry<D>,
) -> Result<Vec<Curve<D>>, AdvectionError> {
    let mut buffer = WireBuffer::load_from_file(path)?;
    let curves = decode_batch(&mut buffer, registry)?;
    if buffer.remaining() != 0 {
        return Err(WireError::InvalidValue(format!(
            "{} trailing bytes after batch of {} curves",
            buffer.remaining(),
            curves.len()
        ))
        .into());
    }
    Ok(curves)
}

/// Human-readable summary of a single curve.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CurveSummary<const D: usize> {
    /// Identifier of the curve.
    pub id: CurveId,
    /// Final status.
    pub status: CurveStatus,
    /// Total number of steps.
    pub n_steps: u64,
    /// Number of domains the curve visited minus one.
    pub n_handoffs: u64,
    /// Length of the stored part of the curve.
    pub arc_length: f64,
    /// Stored records.
    pub records: Vec<StepRecord<D>>,
}

impl<const D: usize> From<&Curve<D>> for CurveSummary<D> {
    fn from(curve: &Curve<D>) -> Self {
        Self {
            id: curve.id(),
            status: curve.status(),
            n_steps: curve.n_steps(),
            n_handoffs: curve.n_handoffs(),
            arc_length: curve.arc_length(),
            records: curve.records().to_vec(),
        }
    }
}

/// Writes summaries of all curves as pretty-printed json.
pub fn export_json<const D: usize>(
    path: impl AsRef<Path>,
    curves: &[Curve<D>],
) -> Result<(), AdvectionError> {
    let summaries: Vec<CurveSummary<D>> = curves.iter().map(CurveSummary::from).collect();
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), &summaries)?;
    Ok(())
}
