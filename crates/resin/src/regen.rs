//! Regeneration chemistry and cycle planning.

use serde::{Deserialize, Serialize};

use crate::spec::ResinKind;
use crate::{ResinError, Result};

/// Regenerant chemical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regenerant {
    NaCl,
    HCl,
    H2SO4,
    NaOH,
}

impl Regenerant {
    pub fn formula(&self) -> &'static str {
        match self {
            Regenerant::NaCl => "NaCl",
            Regenerant::HCl => "HCl",
            Regenerant::H2SO4 => "H2SO4",
            Regenerant::NaOH => "NaOH",
        }
    }

    /// Molar mass (g/mol)
    pub fn molar_mass_g_mol(&self) -> f64 {
        match self {
            Regenerant::NaCl => 58.44,
            Regenerant::HCl => 36.46,
            Regenerant::H2SO4 => 98.08,
            Regenerant::NaOH => 40.00,
        }
    }

    /// Equivalents delivered per mole
    pub fn eq_per_mol(&self) -> f64 {
        match self {
            Regenerant::H2SO4 => 2.0,
            _ => 1.0,
        }
    }

    /// Solution density at the given strength (kg/m3), linearized around
    /// ambient temperature
    pub fn solution_density_kg_m3(&self, strength_wt_pct: f64) -> f64 {
        let slope = match self {
            Regenerant::NaCl => 7.1,
            Regenerant::HCl => 4.8,
            Regenerant::H2SO4 => 6.6,
            Regenerant::NaOH => 10.9,
        };
        1000.0 + slope * strength_wt_pct
    }

    /// Regenerant normality at the given strength (eq/L)
    pub fn normality_eq_l(&self, strength_wt_pct: f64) -> f64 {
        let density = self.solution_density_kg_m3(strength_wt_pct);
        let g_per_l = density * strength_wt_pct / 100.0;
        g_per_l / self.molar_mass_g_mol() * self.eq_per_mol()
    }

    /// Chemicals acceptable for a resin class.
    pub fn valid_for(&self, kind: ResinKind) -> bool {
        match kind {
            ResinKind::Sac => matches!(self, Regenerant::NaCl),
            // Na-form WAC regenerates with acid, then converts with caustic
            ResinKind::WacNa => matches!(self, Regenerant::HCl | Regenerant::H2SO4 | Regenerant::NaOH),
            ResinKind::WacH => matches!(self, Regenerant::HCl | Regenerant::H2SO4),
        }
    }
}

/// Direction of regenerant flow relative to service flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDirection {
    Counter,
    Co,
}

/// How the regenerant dose is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegenMode {
    /// Run the dose exactly as planned
    #[default]
    Fixed,
    /// Bracket total regenerant volume against a recovery target
    StagedOptimize,
}

/// Full regeneration cycle description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerationPlan {
    pub regenerant: Regenerant,

    /// Dose (g of chemical per L of resin)
    pub dose_g_per_l: f64,

    /// Applied strength (percent by weight)
    pub strength_wt_pct: f64,

    /// Regenerant flow (bed volumes per hour)
    pub flow_bv_h: f64,

    pub direction: FlowDirection,

    /// Backwash before regeneration
    pub backwash: bool,

    /// Slow (displacement) rinse volume (BV)
    pub slow_rinse_bv: f64,

    /// Fast (quality) rinse volume (BV)
    pub fast_rinse_bv: f64,

    /// Number of regenerant injection stages
    pub stages: usize,

    #[serde(default)]
    pub mode: RegenMode,

    /// Resin recovery the optimizer aims for; only read in
    /// `StagedOptimize` mode
    #[serde(default = "default_target_recovery")]
    pub target_recovery: f64,
}

fn default_target_recovery() -> f64 {
    0.90
}

impl RegenerationPlan {
    pub fn validate(&self, kind: ResinKind, feed_alkalinity_mg_l_caco3: f64) -> Result<()> {
        if !self.regenerant.valid_for(kind) {
            return Err(ResinError::InconsistentResinVessel(format!(
                "{} cannot regenerate a {} bed",
                self.regenerant.formula(),
                kind.label()
            )));
        }
        if self.dose_g_per_l < 0.0 {
            return Err(ResinError::InconsistentResinVessel(format!(
                "negative regenerant dose {} g/L",
                self.dose_g_per_l
            )));
        }
        if !(0.0..=50.0).contains(&self.strength_wt_pct) {
            return Err(ResinError::InconsistentResinVessel(format!(
                "regenerant strength {}%wt outside [0, 50]",
                self.strength_wt_pct
            )));
        }
        if self.stages == 0 {
            return Err(ResinError::InconsistentResinVessel(
                "at least one regeneration stage is required".into(),
            ));
        }
        if self.stages > 8 {
            return Err(ResinError::InconsistentResinVessel(format!(
                "{} regeneration stages; staged injection tops out at 8",
                self.stages
            )));
        }
        if kind == ResinKind::WacH && feed_alkalinity_mg_l_caco3 <= 0.0 {
            // An H-form bed only removes temporary hardness; without
            // alkalinity there is nothing for it to do.
            return Err(ResinError::InconsistentResinVessel(
                "H-form WAC selected against a feed with zero alkalinity".into(),
            ));
        }
        Ok(())
    }

    /// Stoichiometric dose (g/L resin) to regenerate the given capacity.
    pub fn stoichiometric_dose_g_l(&self, capacity_eq_l: f64) -> f64 {
        capacity_eq_l * self.regenerant.molar_mass_g_mol() / self.regenerant.eq_per_mol()
    }

    /// Dose ratio actually applied vs stoichiometric.
    pub fn dose_ratio(&self, capacity_eq_l: f64) -> f64 {
        let stoich = self.stoichiometric_dose_g_l(capacity_eq_l);
        if stoich <= 0.0 {
            0.0
        } else {
            self.dose_g_per_l / stoich
        }
    }
}

/// Effluent quality targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Targets {
    /// Effluent hardness target (mg/L as CaCO3)
    pub hardness_mg_l_caco3: f64,

    /// Effluent alkalinity target (mg/L as CaCO3); H-form dealkalization only
    pub alkalinity_mg_l_caco3: Option<f64>,
}
