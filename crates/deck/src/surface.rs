//! Surface-complexation definitions for H-form WAC decks.
//!
//! H-form beds are modeled with SURFACE rather than EXCHANGE: the working
//! capacity of a carboxylic bed is set by site protonation, which the
//! exchanger formalism cannot express.

use std::fmt::Write;

use cells::CellPlan;
use resin::ResinSpec;

use crate::blocks::num;
use crate::{Result, PKA_EFFECTIVE};

/// Nominal specific area (m2/g) and mass (g) carried on the SURFACE line.
/// With `-no_edl` these only satisfy the block syntax; no electrostatic
/// term reads them.
const SURFACE_AREA_M2_G: f64 = 600.0;
const SURFACE_MASS_G: f64 = 1.0;

pub fn master_species(buf: &mut String) -> Result<()> {
    writeln!(buf, "SURFACE_MASTER_SPECIES")?;
    writeln!(buf, "    Wac_s Wac_sOH")?;
    Ok(())
}

/// Protonation and cation-binding reactions.
pub fn species(buf: &mut String, spec: &ResinSpec) -> Result<()> {
    writeln!(buf, "SURFACE_SPECIES")?;
    writeln!(buf, "    Wac_sOH = Wac_sOH")?;
    writeln!(buf, "        log_k 0")?;
    // Deprotonation at the EFFECTIVE pKa (2.5), not the chemical 4.8.
    // The reduced value keeps the Newton iteration away from the
    // near-singular region of a freshly protonated bed; the overlay owns
    // the real capacity figure.
    writeln!(buf, "    Wac_sOH = Wac_sO- + H+")?;
    writeln!(buf, "        log_k {}", num(-PKA_EFFECTIVE))?;
    let sel = &spec.selectivity;
    writeln!(buf, "    2Wac_sO- + Ca+2 = (Wac_sO)2Ca")?;
    writeln!(buf, "        log_k {}", num(sel.log_k_ca_na))?;
    writeln!(buf, "    2Wac_sO- + Mg+2 = (Wac_sO)2Mg")?;
    writeln!(buf, "        log_k {}", num(sel.log_k_mg_na))?;
    writeln!(buf, "    Wac_sO- + Na+ = Wac_sONa")?;
    writeln!(buf, "        log_k {}", num(sel.log_k_h_na - 2.0))?;
    Ok(())
}

/// Per-cell surface site inventory. `-no_edl` switches the diffuse-layer
/// model off; with it on, the Donnan iteration fails to converge above
/// roughly 0.1 mol/L ionic strength, which brackish feeds exceed.
pub fn surfaces(buf: &mut String, spec: &ResinSpec, plan: &CellPlan) -> Result<()> {
    let sites_mol_per_cell =
        spec.total_capacity_eq_l * plan.column_resin_l / plan.cells as f64;
    writeln!(buf, "SURFACE 1-{}", plan.cells)?;
    writeln!(
        buf,
        "    Wac_sOH {} {} {}",
        num(sites_mol_per_cell),
        num(SURFACE_AREA_M2_G),
        num(SURFACE_MASS_G)
    )?;
    writeln!(buf, "    -no_edl")?;
    writeln!(buf, "    -equilibrate with solution 1")?;
    Ok(())
}
