//! Payload decimation for externalized curves.
//!
//! The full table stays in memory for analysis; only the curve leaving the
//! engine is thinned. Density is banded around the breakthrough point:
//! everything within 10 BV survives, every fifth sample to 30 BV, every
//! twentieth beyond. Phase boundaries always survive, so a decimated curve
//! still shows every phase it came from.

use crate::curve::{BreakthroughCurve, CurveSample};

const FULL_BAND_BV: f64 = 10.0;
const MID_BAND_BV: f64 = 30.0;
const MID_STRIDE: usize = 5;
const FAR_STRIDE: usize = 20;

/// Thin a curve around the detected breakthrough BV.
pub fn decimate(curve: &BreakthroughCurve, breakthrough_bv: f64) -> BreakthroughCurve {
    let samples = &curve.samples;
    let mut kept: Vec<CurveSample> = Vec::new();

    for (i, sample) in samples.iter().enumerate() {
        let phase_boundary = i == 0
            || i == samples.len() - 1
            || samples[i - 1].phase != sample.phase
            || samples.get(i + 1).map(|n| n.phase) != Some(sample.phase);

        let distance = (sample.bv - breakthrough_bv).abs();
        let keep = if phase_boundary {
            true
        } else if distance <= FULL_BAND_BV {
            true
        } else if distance <= MID_BAND_BV {
            i % MID_STRIDE == 0
        } else {
            i % FAR_STRIDE == 0
        };

        if keep {
            kept.push(sample.clone());
        }
    }

    BreakthroughCurve {
        samples: kept,
        skipped_rows: curve.skipped_rows,
        truncated: curve.truncated,
    }
}
