//! The recognized ion set and its physical properties.

use serde::{Deserialize, Serialize};

/// Ions the simulation recognizes.
///
/// Variant order is the lexicographic order of the ion symbols; `Ord` and
/// `BTreeMap` iteration therefore emit ions in a stable, documented order,
/// which keeps generated PHREEQC decks byte-identical for identical inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Ion {
    Ca,
    Cl,
    HCO3,
    K,
    Mg,
    NO3,
    Na,
    SO4,
}

impl Ion {
    /// All recognized ions in emission order.
    pub const ALL: [Ion; 8] = [
        Ion::Ca,
        Ion::Cl,
        Ion::HCO3,
        Ion::K,
        Ion::Mg,
        Ion::NO3,
        Ion::Na,
        Ion::SO4,
    ];

    /// Ions that must be present in a feed analysis. Chloride is absent
    /// because it is the charge-balance closure ion.
    pub const REQUIRED: [Ion; 4] = [Ion::Ca, Ion::HCO3, Ion::Mg, Ion::Na];

    pub fn symbol(&self) -> &'static str {
        match self {
            Ion::Ca => "Ca",
            Ion::Cl => "Cl",
            Ion::HCO3 => "HCO3",
            Ion::K => "K",
            Ion::Mg => "Mg",
            Ion::NO3 => "NO3",
            Ion::Na => "Na",
            Ion::SO4 => "SO4",
        }
    }

    /// Molar mass (g/mol)
    pub fn molar_mass_g_mol(&self) -> f64 {
        match self {
            Ion::Ca => 40.078,
            Ion::Cl => 35.453,
            Ion::HCO3 => 61.02,
            Ion::K => 39.098,
            Ion::Mg => 24.305,
            Ion::NO3 => 62.004,
            Ion::Na => 22.990,
            Ion::SO4 => 96.06,
        }
    }

    /// Signed ionic charge
    pub fn charge(&self) -> i8 {
        match self {
            Ion::Ca => 2,
            Ion::Cl => -1,
            Ion::HCO3 => -1,
            Ion::K => 1,
            Ion::Mg => 2,
            Ion::NO3 => -1,
            Ion::Na => 1,
            Ion::SO4 => -2,
        }
    }

    pub fn is_cation(&self) -> bool {
        self.charge() > 0
    }

    /// Equivalent weight (g/eq)
    pub fn equivalent_weight(&self) -> f64 {
        self.molar_mass_g_mol() / f64::from(self.charge().unsigned_abs())
    }

    /// PHREEQC master-species name for a SOLUTION input line.
    ///
    /// Alkalinity, sulfate and nitrate need an `as` formula so PHREEQC
    /// interprets the mg/L figure against the right gram formula weight.
    pub fn phreeqc_input(&self) -> (&'static str, Option<&'static str>) {
        match self {
            Ion::Ca => ("Ca", None),
            Ion::Cl => ("Cl", None),
            Ion::HCO3 => ("Alkalinity", Some("as HCO3")),
            Ion::K => ("K", None),
            Ion::Mg => ("Mg", None),
            Ion::NO3 => ("N(5)", Some("as NO3")),
            Ion::Na => ("Na", None),
            Ion::SO4 => ("S(6)", Some("as SO4")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emission_order_is_lexicographic() {
        let symbols: Vec<&str> = Ion::ALL.iter().map(|i| i.symbol()).collect();
        let mut sorted = symbols.clone();
        sorted.sort();
        assert_eq!(symbols, sorted);
    }

    #[test]
    fn charges_balance_equivalent_weights() {
        // Ca2+: 40.078 / 2
        assert!((Ion::Ca.equivalent_weight() - 20.039).abs() < 1e-9);
        assert!((Ion::SO4.equivalent_weight() - 48.03).abs() < 1e-9);
    }

    #[test]
    fn serde_uses_bare_symbols() {
        let json = serde_json::to_string(&Ion::HCO3).unwrap();
        assert_eq!(json, "\"HCO3\"");
        let back: Ion = serde_json::from_str("\"SO4\"").unwrap();
        assert_eq!(back, Ion::SO4);
    }
}
