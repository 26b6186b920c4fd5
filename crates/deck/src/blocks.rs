//! Low-level PHREEQC block emitters shared by all resin classes.

use std::fmt::Write;

use cells::CellPlan;
use water::NormalizedWater;

use crate::knobs;
use crate::phases::Phase;
use crate::Result;

/// Shortest round-trip float formatting; one path for every number keeps
/// decks byte-identical across runs.
pub fn num(x: f64) -> String {
    format!("{}", x)
}

pub fn title(buf: &mut String, text: &str) -> Result<()> {
    writeln!(buf, "TITLE {}", text)?;
    Ok(())
}

pub fn database_line(buf: &mut String, path: &str) -> Result<()> {
    writeln!(buf, "DATABASE {}", path)?;
    Ok(())
}

/// Solver tuning. These options belong to KNOBS; TRANSPORT has no
/// `-tolerance` or `-gamma` and emitting them there is a syntax error.
pub fn knobs_block(buf: &mut String) -> Result<()> {
    writeln!(buf, "KNOBS")?;
    writeln!(buf, "    -iterations {}", knobs::ITERATIONS)?;
    writeln!(
        buf,
        "    -convergence_tolerance {}",
        num(knobs::CONVERGENCE_TOLERANCE)
    )?;
    writeln!(buf, "    -step_size {}", knobs::STEP_SIZE)?;
    writeln!(buf, "    -diagonal_scale true")?;
    Ok(())
}

pub fn selected_output(buf: &mut String, file: &str) -> Result<()> {
    writeln!(buf, "SELECTED_OUTPUT 1")?;
    writeln!(buf, "    -file {}", file)?;
    writeln!(buf, "    -reset false")?;
    writeln!(buf, "    -user_punch true")?;
    Ok(())
}

/// Punch definition for one phase.
///
/// BV is computed from the builder's pore-volume constants, not from
/// geometry literals: `STEP_NO * pore_per_cell / total_pore` is the water
/// mass processed per unit pore mass and stays correct for any cell count.
pub fn user_punch(buf: &mut String, phase: Phase, plan: &CellPlan) -> Result<()> {
    writeln!(buf, "USER_PUNCH 1")?;
    writeln!(
        buf,
        "    -headings shift bv phase Ca_mg_L Mg_mg_L Na_mg_L K_mg_L pH alk_mg_L_CaCO3 hardness_mg_L_CaCO3"
    )?;
    writeln!(buf, "    -start")?;
    writeln!(buf, "    10 PUNCH STEP_NO")?;
    writeln!(
        buf,
        "    20 PUNCH STEP_NO * {} / {}",
        num(plan.pore_kg_per_cell),
        num(plan.total_pore_kg)
    )?;
    writeln!(buf, "    30 PUNCH {}", phase.punch_id())?;
    writeln!(buf, "    40 PUNCH TOT(\"Ca\") * 40078")?;
    writeln!(buf, "    50 PUNCH TOT(\"Mg\") * 24305")?;
    writeln!(buf, "    60 PUNCH TOT(\"Na\") * 22990")?;
    writeln!(buf, "    70 PUNCH TOT(\"K\") * 39098")?;
    writeln!(buf, "    80 PUNCH -LA(\"H+\")")?;
    writeln!(buf, "    90 PUNCH ALK * 50040")?;
    writeln!(
        buf,
        "    100 PUNCH (TOT(\"Ca\") + TOT(\"Mg\")) * 2 * 50040"
    )?;
    writeln!(buf, "    -end")?;
    Ok(())
}

/// Emit the feed analysis as a SOLUTION block. `range` is "0" for the
/// infilling solution or "1-16" style for initial cell contents.
pub fn solution_feed(
    buf: &mut String,
    range: &str,
    description: &str,
    water: &NormalizedWater,
) -> Result<()> {
    writeln!(buf, "SOLUTION {} {}", range, description)?;
    writeln!(buf, "    units mg/l")?;
    writeln!(buf, "    temp {}", num(water.temperature_c))?;
    writeln!(buf, "    pH {}", num(water.ph))?;
    for (ion, mg_l) in &water.ions {
        if *mg_l <= 0.0 {
            continue;
        }
        let (species, as_formula) = ion.phreeqc_input();
        match as_formula {
            Some(formula) => writeln!(buf, "    {} {} {}", species, num(*mg_l), formula)?,
            None => writeln!(buf, "    {} {}", species, num(*mg_l))?,
        }
    }
    Ok(())
}

/// A solution line: PHREEQC species, mg/L, optional `as` formula or
/// `charge` marker.
pub struct SolutionLine {
    pub species: &'static str,
    pub mg_l: f64,
    pub suffix: Option<&'static str>,
}

/// Emit a synthetic solution (brine, regenerant, rinse water, acid
/// placeholder).
pub fn solution_custom(
    buf: &mut String,
    range: &str,
    description: &str,
    temp_c: f64,
    ph: f64,
    lines: &[SolutionLine],
) -> Result<()> {
    writeln!(buf, "SOLUTION {} {}", range, description)?;
    writeln!(buf, "    units mg/l")?;
    writeln!(buf, "    temp {}", num(temp_c))?;
    writeln!(buf, "    pH {}", num(ph))?;
    for line in lines {
        if line.mg_l <= 0.0 {
            continue;
        }
        match line.suffix {
            Some(suffix) => writeln!(buf, "    {} {} {}", line.species, num(line.mg_l), suffix)?,
            None => writeln!(buf, "    {} {}", line.species, num(line.mg_l))?,
        }
    }
    Ok(())
}

/// Emit a TRANSPORT block. Counter-current phases flip the flow direction
/// and punch the opposite end of the column; nothing else changes.
pub fn transport(buf: &mut String, plan: &CellPlan, shifts: usize, forward: bool) -> Result<()> {
    let punch_cell = if forward { plan.cells } else { 1 };
    writeln!(buf, "TRANSPORT")?;
    writeln!(buf, "    -cells {}", plan.cells)?;
    writeln!(buf, "    -shifts {}", shifts)?;
    writeln!(buf, "    -time_step {}", num(plan.time_step_s))?;
    writeln!(
        buf,
        "    -flow_direction {}",
        if forward { "forward" } else { "back" }
    )?;
    writeln!(buf, "    -boundary_conditions flux flux")?;
    writeln!(buf, "    -lengths {}*{}", plan.cells, num(plan.cell_length_m))?;
    writeln!(
        buf,
        "    -dispersivities {}*{}",
        plan.cells,
        num(plan.dispersivity_m)
    )?;
    writeln!(
        buf,
        "    -diffusion_coefficient {}",
        num(plan.diffusion_m2_s)
    )?;
    writeln!(buf, "    -punch_cells {}", punch_cell)?;
    writeln!(buf, "    -punch_frequency 1")?;
    writeln!(buf, "    -print_frequency {}", shifts.max(1))?;
    Ok(())
}

/// SAVE column state. `kinds` is a subset of {"solution", "exchange",
/// "surface"}; callers must always pass "solution" together with the
/// reactive phase they carry.
pub fn save_state(buf: &mut String, cells: usize, kinds: &[&str]) -> Result<()> {
    for kind in kinds {
        writeln!(buf, "SAVE {} 1-{}", kind, cells)?;
    }
    Ok(())
}

/// USE previously saved column state; same pairing rule as [`save_state`].
pub fn use_state(buf: &mut String, cells: usize, kinds: &[&str]) -> Result<()> {
    for kind in kinds {
        writeln!(buf, "USE {} 1-{}", kind, cells)?;
    }
    Ok(())
}

pub fn end(buf: &mut String) -> Result<()> {
    writeln!(buf, "END")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_formats_shortest_round_trip() {
        assert_eq!(num(80.0), "80");
        assert_eq!(num(0.4375), "0.4375");
        assert_eq!(num(1e-9), "0.000000001");
    }

    #[test]
    fn transport_has_no_knobs_options() {
        let plan = test_plan();
        let mut buf = String::new();
        transport(&mut buf, &plan, 100, true).unwrap();
        assert!(!buf.contains("-tolerance"));
        assert!(!buf.contains("-gamma"));
        assert!(buf.contains("-boundary_conditions flux flux"));
        assert!(buf.contains("-punch_cells 16"));
    }

    #[test]
    fn backflow_punches_cell_one() {
        let plan = test_plan();
        let mut buf = String::new();
        transport(&mut buf, &plan, 10, false).unwrap();
        assert!(buf.contains("-flow_direction back"));
        assert!(buf.contains("-punch_cells 1"));
    }

    fn test_plan() -> CellPlan {
        CellPlan {
            cells: 16,
            auto_refined: false,
            refined_from: 16,
            mobile_eq_per_cell: 2.5,
            immobile_eq_per_cell: 0.0,
            pore_kg_per_cell: 0.4375,
            total_pore_kg: 7.0,
            column_resin_l: 20.0,
            scale_factor: 254.5,
            column_flow_kg_s: 0.109,
            cell_length_m: 0.125,
            dispersivity_m: 0.01,
            diffusion_m2_s: 1e-9,
            time_step_s: 4.0,
            target_service_bv: 150.0,
            service_shifts: 2400,
            condition_shifts: 0,
            warnings: vec![],
        }
    }
}
