//! Resin specifications and the built-in selectivity library.

use serde::{Deserialize, Serialize};

use crate::{ResinError, Result};

/// Resin class and ionic form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResinKind {
    /// Strong-acid cation resin, Na-form (softening)
    #[serde(rename = "SAC")]
    Sac,
    /// Weak-acid cation resin operated in Na-form
    #[serde(rename = "WAC_Na")]
    WacNa,
    /// Weak-acid cation resin operated in H-form (dealkalization)
    #[serde(rename = "WAC_H")]
    WacH,
}

impl ResinKind {
    pub fn label(&self) -> &'static str {
        match self {
            ResinKind::Sac => "SAC",
            ResinKind::WacNa => "WAC_Na",
            ResinKind::WacH => "WAC_H",
        }
    }

    /// H-form beds exchange through surface complexation rather than the
    /// exchanger phase.
    pub fn uses_surface(&self) -> bool {
        matches!(self, ResinKind::WacH)
    }
}

/// Selectivity constants relative to Na, as log-K of the exchange
/// half-reactions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Selectivity {
    pub log_k_ca_na: f64,
    pub log_k_mg_na: f64,
    pub log_k_k_na: f64,
    pub log_k_h_na: f64,
}

/// Physical description of a resin charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResinSpec {
    pub kind: ResinKind,

    /// Total exchange capacity (eq per L of settled resin)
    pub total_capacity_eq_l: f64,

    /// Fraction of capacity in fast, advectively contacted sites; the
    /// remainder is treated as immobile in the transport discretization
    pub mobile_fraction: f64,

    /// Interstitial void fraction of the packed bed
    pub bed_porosity: f64,

    /// Carboxylic pKa; WAC classes only
    pub pka: Option<f64>,

    pub selectivity: Selectivity,
}

impl ResinSpec {
    /// Built-in specification for each resin class.
    ///
    /// Values are representative of gel polystyrene SAC and acrylic WAC
    /// products; site-specific deviations belong in the calibration store,
    /// not here.
    pub fn library(kind: ResinKind) -> ResinSpec {
        match kind {
            ResinKind::Sac => ResinSpec {
                kind,
                total_capacity_eq_l: 2.0,
                mobile_fraction: 1.0,
                bed_porosity: 0.35,
                pka: None,
                selectivity: Selectivity {
                    log_k_ca_na: 0.8,
                    log_k_mg_na: 0.6,
                    log_k_k_na: 0.7,
                    log_k_h_na: 0.3,
                },
            },
            ResinKind::WacNa => ResinSpec {
                kind,
                total_capacity_eq_l: 3.8,
                mobile_fraction: 0.25,
                bed_porosity: 0.35,
                pka: Some(4.8),
                selectivity: Selectivity {
                    log_k_ca_na: 1.6,
                    log_k_mg_na: 1.3,
                    log_k_k_na: 0.8,
                    log_k_h_na: 2.0,
                },
            },
            ResinKind::WacH => ResinSpec {
                kind,
                total_capacity_eq_l: 3.9,
                mobile_fraction: 1.0,
                bed_porosity: 0.35,
                pka: Some(4.8),
                selectivity: Selectivity {
                    log_k_ca_na: 1.6,
                    log_k_mg_na: 1.3,
                    log_k_k_na: 0.8,
                    log_k_h_na: 2.0,
                },
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.total_capacity_eq_l <= 0.0 {
            return Err(ResinError::InvalidSpec(format!(
                "total capacity must be positive, got {}",
                self.total_capacity_eq_l
            )));
        }
        if !(0.0..=1.0).contains(&self.mobile_fraction) {
            return Err(ResinError::InvalidSpec(format!(
                "mobile fraction must lie in [0, 1], got {}",
                self.mobile_fraction
            )));
        }
        if !(0.2..=0.6).contains(&self.bed_porosity) {
            return Err(ResinError::InvalidSpec(format!(
                "bed porosity {} outside packed-bed range [0.2, 0.6]",
                self.bed_porosity
            )));
        }
        match (self.kind, self.pka) {
            (ResinKind::Sac, Some(_)) => Err(ResinError::InvalidSpec(
                "SAC resins carry no pKa; sulfonate sites stay ionized".into(),
            )),
            (ResinKind::WacNa | ResinKind::WacH, None) => Err(ResinError::InvalidSpec(
                "WAC resins require a carboxylic pKa".into(),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_specs_validate() {
        for kind in [ResinKind::Sac, ResinKind::WacNa, ResinKind::WacH] {
            ResinSpec::library(kind).validate().unwrap();
        }
    }

    #[test]
    fn sac_with_pka_is_rejected() {
        let mut spec = ResinSpec::library(ResinKind::Sac);
        spec.pka = Some(4.8);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn wac_without_pka_is_rejected() {
        let mut spec = ResinSpec::library(ResinKind::WacH);
        spec.pka = None;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn custom_spec_round_trips_through_json() {
        let spec = ResinSpec::library(ResinKind::WacNa);
        let doc = serde_json::to_string(&spec).unwrap();
        let back: ResinSpec = serde_json::from_str(&doc).unwrap();
        assert_eq!(back.kind, ResinKind::WacNa);
        assert!((back.total_capacity_eq_l - spec.total_capacity_eq_l).abs() < 1e-12);
    }
}
