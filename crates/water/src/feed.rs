//! Raw feed water analysis as supplied by the caller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ions::Ion;
use crate::{Result, WaterError};

/// A laboratory water analysis. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedWater {
    /// Ion concentrations (mg/L), keyed by ion symbol
    pub ions: BTreeMap<Ion, f64>,

    /// Feed pH
    pub ph: f64,

    /// Feed temperature (degrees C)
    pub temperature_c: f64,

    /// Design flow per train (m3/h)
    pub flow_m3_h: f64,
}

impl FeedWater {
    /// Concentration of one ion (mg/L); absent ions read as zero.
    pub fn mg_l(&self, ion: Ion) -> f64 {
        self.ions.get(&ion).copied().unwrap_or(0.0)
    }

    /// Milliequivalents per liter of one ion.
    pub fn meq_l(&self, ion: Ion) -> f64 {
        self.mg_l(ion) / ion.equivalent_weight()
    }

    /// Range checks on pH, temperature, flow and concentrations.
    pub fn validate(&self) -> Result<()> {
        if !(4.0..=10.0).contains(&self.ph) {
            return Err(WaterError::OutOfRange {
                field: "pH",
                value: self.ph,
                min: 4.0,
                max: 10.0,
            });
        }
        if !(5.0..=40.0).contains(&self.temperature_c) {
            return Err(WaterError::OutOfRange {
                field: "temperature_c",
                value: self.temperature_c,
                min: 5.0,
                max: 40.0,
            });
        }
        if self.flow_m3_h <= 0.0 {
            return Err(WaterError::OutOfRange {
                field: "flow_m3_h",
                value: self.flow_m3_h,
                min: f64::MIN_POSITIVE,
                max: f64::MAX,
            });
        }
        for (ion, mg_l) in &self.ions {
            if *mg_l < 0.0 || !mg_l.is_finite() {
                return Err(WaterError::OutOfRange {
                    field: ion.symbol(),
                    value: *mg_l,
                    min: 0.0,
                    max: f64::MAX,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moderately_hard() -> FeedWater {
        let mut ions = BTreeMap::new();
        ions.insert(Ion::Ca, 80.0);
        ions.insert(Ion::Mg, 24.0);
        ions.insert(Ion::Na, 839.0);
        ions.insert(Ion::HCO3, 122.0);
        ions.insert(Ion::Cl, 1435.0);
        FeedWater {
            ions,
            ph: 7.8,
            temperature_c: 25.0,
            flow_m3_h: 100.0,
        }
    }

    #[test]
    fn valid_analysis_passes() {
        assert!(moderately_hard().validate().is_ok());
    }

    #[test]
    fn ph_out_of_range_is_rejected() {
        let mut feed = moderately_hard();
        feed.ph = 11.2;
        assert!(matches!(
            feed.validate(),
            Err(WaterError::OutOfRange { field: "pH", .. })
        ));
    }

    #[test]
    fn negative_concentration_is_rejected() {
        let mut feed = moderately_hard();
        feed.ions.insert(Ion::SO4, -1.0);
        assert!(feed.validate().is_err());
    }

    #[test]
    fn unknown_ion_key_is_rejected_by_serde() {
        let doc = r#"{"ions":{"Ca":80.0,"Fe":0.3},"ph":7.0,"temperature_c":20.0,"flow_m3_h":10.0}"#;
        assert!(serde_json::from_str::<FeedWater>(doc).is_err());
    }
}
