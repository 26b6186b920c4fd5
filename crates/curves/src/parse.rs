//! Punch-table to typed-curve conversion.

use deck::{Phase, PhaseSpan};
use solver::RunArtifacts;

use crate::curve::{BreakthroughCurve, CurveSample};
use crate::{CurveError, Result};

const REQUIRED_COLUMNS: [&str; 10] = [
    "shift",
    "bv",
    "phase",
    "Ca_mg_L",
    "Mg_mg_L",
    "Na_mg_L",
    "K_mg_L",
    "pH",
    "alk_mg_L_CaCO3",
    "hardness_mg_L_CaCO3",
];

/// Type the punch rows and segment them into phases.
///
/// Rows carry their phase tag in the punched `phase` column; the span
/// table is the builder's declaration of what should be there and is used
/// to cross-check coverage, not to assign tags.
pub fn parse(artifacts: &RunArtifacts, spans: &[PhaseSpan]) -> Result<BreakthroughCurve> {
    let table = &artifacts.table;

    for name in REQUIRED_COLUMNS {
        if table.column_index(name).is_none() {
            return Err(CurveError::MissingColumn(name.to_string()));
        }
    }
    let col = |name: &str| {
        table
            .column(name)
            .ok_or_else(|| CurveError::MissingColumn(name.to_string()))
    };

    let bv = col("bv")?;
    let phase = col("phase")?;
    let ca = col("Ca_mg_L")?;
    let mg = col("Mg_mg_L")?;
    let na = col("Na_mg_L")?;
    let k = col("K_mg_L")?;
    let ph = col("pH")?;
    let alk = col("alk_mg_L_CaCO3")?;
    let hardness = col("hardness_mg_L_CaCO3")?;

    let mut samples = Vec::with_capacity(table.rows());
    let mut skipped = 0usize;
    for row in 0..table.rows() {
        let tag = phase[row];
        let parsed = if tag.fract() == 0.0 && tag >= 0.0 {
            Phase::from_punch_id(tag as usize)
        } else {
            None
        };
        let Some(phase) = parsed else {
            skipped += 1;
            continue;
        };
        samples.push(CurveSample {
            bv: bv[row],
            phase,
            ca_mg_l: ca[row].max(0.0),
            mg_mg_l: mg[row].max(0.0),
            na_mg_l: na[row].max(0.0),
            k_mg_l: k[row].max(0.0),
            ph: ph[row],
            alk_mg_l_caco3: alk[row].max(0.0),
            hardness_mg_l_caco3: hardness[row].max(0.0),
            co2_mg_l: None,
            na_slip_mg_l: None,
            k_slip_mg_l: None,
        });
    }

    if !samples.iter().any(|s| s.phase == Phase::Service) {
        return Err(CurveError::NoServiceRows);
    }

    // The builder declared how many rows each phase should punch; a
    // shortfall means the run died mid-phase and the tail is partial.
    let declared: usize = spans.iter().map(|s| s.shifts()).sum();
    let truncated = declared > 0 && samples.len() < declared;

    Ok(BreakthroughCurve {
        samples,
        skipped_rows: skipped + table.dropped_rows,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use solver::PunchTable;

    fn artifacts(columns: &[&str], rows: Vec<Vec<f64>>) -> RunArtifacts {
        let ncols = columns.len();
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        RunArtifacts {
            table: PunchTable {
                columns: columns.iter().map(|s| s.to_string()).collect(),
                data: Array2::from_shape_vec((rows.len(), ncols), flat).unwrap(),
                dropped_rows: 0,
            },
            stdout_tail: String::new(),
            stderr_tail: String::new(),
            convergence: None,
            solve_time_s: 0.1,
        }
    }

    fn service_row(shift: f64, bv: f64, hardness: f64) -> Vec<f64> {
        vec![shift, bv, 2.0, 1.0, 0.5, 900.0, 0.0, 7.8, 100.0, hardness]
    }

    #[test]
    fn rows_become_typed_samples() {
        let a = artifacts(
            &REQUIRED_COLUMNS,
            vec![service_row(1.0, 0.0625, 0.5), service_row(2.0, 0.125, 0.7)],
        );
        let curve = parse(&a, &[]).unwrap();
        assert_eq!(curve.samples.len(), 2);
        assert_eq!(curve.samples[0].phase, Phase::Service);
        assert!((curve.samples[1].hardness_mg_l_caco3 - 0.7).abs() < 1e-12);
    }

    #[test]
    fn unknown_phase_tags_are_skipped_not_fatal() {
        let mut bad = service_row(3.0, 0.2, 0.9);
        bad[2] = 99.0;
        let a = artifacts(
            &REQUIRED_COLUMNS,
            vec![service_row(1.0, 0.0625, 0.5), bad],
        );
        let curve = parse(&a, &[]).unwrap();
        assert_eq!(curve.samples.len(), 1);
        assert_eq!(curve.skipped_rows, 1);
    }

    #[test]
    fn missing_column_is_reported_by_name() {
        let cols = &REQUIRED_COLUMNS[..9]; // drop hardness
        let a = artifacts(cols, vec![vec![1.0, 0.0625, 2.0, 1.0, 0.5, 900.0, 0.0, 7.8, 100.0]]);
        match parse(&a, &[]) {
            Err(CurveError::MissingColumn(name)) => assert_eq!(name, "hardness_mg_L_CaCO3"),
            other => panic!("expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn all_regen_rows_without_service_is_an_error() {
        let mut row = service_row(1.0, 0.1, 500.0);
        row[2] = 11.0; // regen stage 1
        let a = artifacts(&REQUIRED_COLUMNS, vec![row]);
        assert!(matches!(parse(&a, &[]), Err(CurveError::NoServiceRows)));
    }

    #[test]
    fn negative_concentrations_clip_to_zero() {
        let mut row = service_row(1.0, 0.0625, -0.3);
        row[3] = -1.0;
        let a = artifacts(&REQUIRED_COLUMNS, vec![row]);
        let curve = parse(&a, &[]).unwrap();
        assert_eq!(curve.samples[0].hardness_mg_l_caco3, 0.0);
        assert_eq!(curve.samples[0].ca_mg_l, 0.0);
    }
}
