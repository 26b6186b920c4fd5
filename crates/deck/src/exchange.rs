//! Exchanger definitions for SAC and Na-form WAC decks.

use std::fmt::Write;

use cells::CellPlan;
use resin::{ResinKind, ResinSpec};

use crate::blocks::num;
use crate::Result;

/// Debye-Hueckel gamma parameters per cation, matching the values the
/// stock database carries for aqueous activity.
const GAMMA: [(&str, &str); 5] = [
    ("Na", "4.08 0.082"),
    ("K", "3.5 0.015"),
    ("H", "9.0 0.0"),
    ("Ca", "5.0 0.165"),
    ("Mg", "5.5 0.2"),
];

fn gamma_for(symbol: &str) -> &'static str {
    GAMMA
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, g)| *g)
        .unwrap_or("4.0 0.075")
}

/// Master species: X is the fast (advectively contacted) site pool; Na-form
/// WAC additionally carries Y, the slow interior pool with its own, stronger
/// selectivity.
pub fn master_species(buf: &mut String, kind: ResinKind) -> Result<()> {
    writeln!(buf, "EXCHANGE_MASTER_SPECIES")?;
    writeln!(buf, "    X X-")?;
    if kind == ResinKind::WacNa {
        writeln!(buf, "    Y Y-")?;
    }
    Ok(())
}

fn half_reactions(buf: &mut String, site: &str, spec: &ResinSpec, bonus: f64) -> Result<()> {
    writeln!(buf, "    {s}- = {s}-", s = site)?;
    writeln!(buf, "        log_k 0")?;
    let sel = &spec.selectivity;
    let mono = [
        ("Na", 0.0),
        ("K", sel.log_k_k_na),
        ("H", sel.log_k_h_na),
    ];
    for (symbol, log_k) in mono {
        writeln!(buf, "    {}+ + {s}- = {}{s}", symbol, symbol, s = site)?;
        writeln!(buf, "        log_k {}", num(log_k + if symbol == "Na" { 0.0 } else { bonus }))?;
        writeln!(buf, "        -gamma {}", gamma_for(symbol))?;
    }
    let di = [("Ca", sel.log_k_ca_na), ("Mg", sel.log_k_mg_na)];
    for (symbol, log_k) in di {
        writeln!(buf, "    {}+2 + 2{s}- = {}{s}2", symbol, symbol, s = site)?;
        writeln!(buf, "        log_k {}", num(log_k + bonus))?;
        writeln!(buf, "        -gamma {}", gamma_for(symbol))?;
    }
    Ok(())
}

/// Exchange half-reactions with log-K from the resin selectivity table.
pub fn species(buf: &mut String, spec: &ResinSpec) -> Result<()> {
    writeln!(buf, "EXCHANGE_SPECIES")?;
    half_reactions(buf, "X", spec, 0.0)?;
    if spec.kind == ResinKind::WacNa {
        // Interior sites bind harder; 0.3 log units is the shift that
        // reproduces the two-plateau WAC isotherm.
        half_reactions(buf, "Y", spec, 0.3)?;
    }
    Ok(())
}

/// Per-cell exchanger inventory, equilibrated against the initial cell
/// solution (all initial solutions are identical, so equilibrating with
/// solution 1 is exact for every cell).
pub fn exchangers(buf: &mut String, spec: &ResinSpec, plan: &CellPlan) -> Result<()> {
    writeln!(buf, "EXCHANGE 1-{}", plan.cells)?;
    writeln!(buf, "    X {}", num(plan.mobile_eq_per_cell))?;
    if spec.kind == ResinKind::WacNa && plan.immobile_eq_per_cell > 0.0 {
        writeln!(buf, "    Y {}", num(plan.immobile_eq_per_cell))?;
    }
    writeln!(buf, "    -equilibrate with solution 1")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(cells: usize) -> CellPlan {
        CellPlan {
            cells,
            auto_refined: false,
            refined_from: 16,
            mobile_eq_per_cell: 1.0,
            immobile_eq_per_cell: 3.0,
            pore_kg_per_cell: 0.4,
            total_pore_kg: 7.0,
            column_resin_l: 20.0,
            scale_factor: 250.0,
            column_flow_kg_s: 0.1,
            cell_length_m: 0.1,
            dispersivity_m: 0.01,
            diffusion_m2_s: 1e-9,
            time_step_s: 4.0,
            target_service_bv: 100.0,
            service_shifts: 1600,
            condition_shifts: 160,
            warnings: vec![],
        }
    }

    #[test]
    fn sac_has_single_site_pool() {
        let spec = ResinSpec::library(ResinKind::Sac);
        let mut buf = String::new();
        master_species(&mut buf, ResinKind::Sac).unwrap();
        species(&mut buf, &spec).unwrap();
        exchangers(&mut buf, &spec, &plan(16)).unwrap();
        assert!(buf.contains("X X-"));
        assert!(!buf.contains("Y Y-"));
        assert!(buf.contains("Ca+2 + 2X- = CaX2"));
        assert!(buf.contains("-equilibrate with solution 1"));
    }

    #[test]
    fn wac_na_carries_both_pools() {
        let spec = ResinSpec::library(ResinKind::WacNa);
        let mut buf = String::new();
        master_species(&mut buf, ResinKind::WacNa).unwrap();
        species(&mut buf, &spec).unwrap();
        exchangers(&mut buf, &spec, &plan(19)).unwrap();
        assert!(buf.contains("Y Y-"));
        assert!(buf.contains("Ca+2 + 2Y- = CaY2"));
        assert!(buf.contains("EXCHANGE 1-19"));
        assert!(buf.contains("Y 3"));
    }

    #[test]
    fn selectivity_feeds_log_k() {
        let mut spec = ResinSpec::library(ResinKind::Sac);
        spec.selectivity.log_k_ca_na = 1.234;
        let mut buf = String::new();
        species(&mut buf, &spec).unwrap();
        assert!(buf.contains("log_k 1.234"));
    }
}
