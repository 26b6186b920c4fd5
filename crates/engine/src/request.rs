//! The simulate-cycle request schema.
//!
//! Wire names follow the tool contract exactly; conversion into the domain
//! types happens here and nowhere else. Unknown ion keys fail
//! deserialization rather than being silently dropped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use resin::{
    FlowDirection, RegenMode, Regenerant, RegenerationPlan, ResinKind, ResinSpec, Targets,
};
use water::{FeedWater, Ion};

use crate::{EngineError, Result, SCHEMA_VERSION};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub schema_version: String,

    pub resin_type: ResinKind,

    pub water: WaterInput,

    pub vessel: cells::Vessel,

    pub targets: Targets,

    pub cycle: CycleInput,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration_key: Option<CalibrationKeyInput>,

    /// Full resin override; defaults to the built-in library spec for
    /// `resin_type`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resin_spec: Option<ResinSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaterInput {
    pub flow_m3_h: f64,
    pub temperature_c: f64,
    #[serde(rename = "pH")]
    pub ph: f64,
    pub ions_mg_l: BTreeMap<Ion, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleInput {
    pub regenerant_type: Regenerant,
    pub regenerant_dose_g_per_l: f64,
    pub regenerant_concentration_wt: f64,
    pub flow_direction: FlowDirection,
    pub backwash: bool,

    #[serde(default)]
    pub mode: RegenMode,

    #[serde(default = "default_stages")]
    pub stages: usize,

    #[serde(default = "default_regen_flow_bv_h")]
    pub flow_bv_h: f64,

    #[serde(default = "default_slow_rinse_bv")]
    pub slow_rinse_bv: f64,

    #[serde(default = "default_fast_rinse_bv")]
    pub fast_rinse_bv: f64,

    #[serde(default = "default_target_recovery")]
    pub target_recovery: f64,
}

fn default_stages() -> usize {
    1
}
fn default_regen_flow_bv_h() -> f64 {
    4.0
}
fn default_slow_rinse_bv() -> f64 {
    2.0
}
fn default_fast_rinse_bv() -> f64 {
    4.0
}
fn default_target_recovery() -> f64 {
    0.90
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationKeyInput {
    pub site_id: String,
    pub resin: ResinKind,
}

impl SimulationRequest {
    /// Schema-version gate; only 1.x requests are understood.
    pub fn check_version(&self) -> Result<()> {
        if self.schema_version == SCHEMA_VERSION || self.schema_version.starts_with("1.") {
            Ok(())
        } else {
            Err(EngineError::SchemaVersion(self.schema_version.clone()))
        }
    }

    pub fn feed_water(&self) -> FeedWater {
        FeedWater {
            ions: self.water.ions_mg_l.clone(),
            ph: self.water.ph,
            temperature_c: self.water.temperature_c,
            flow_m3_h: self.water.flow_m3_h,
        }
    }

    pub fn resin_spec(&self) -> ResinSpec {
        self.resin_spec
            .clone()
            .unwrap_or_else(|| ResinSpec::library(self.resin_type))
    }

    pub fn regeneration_plan(&self) -> RegenerationPlan {
        let c = &self.cycle;
        RegenerationPlan {
            regenerant: c.regenerant_type,
            dose_g_per_l: c.regenerant_dose_g_per_l,
            strength_wt_pct: c.regenerant_concentration_wt,
            flow_bv_h: c.flow_bv_h,
            direction: c.flow_direction,
            backwash: c.backwash,
            slow_rinse_bv: c.slow_rinse_bv,
            fast_rinse_bv: c.fast_rinse_bv,
            stages: c.stages.max(1),
            mode: c.mode,
            target_recovery: c.target_recovery,
        }
    }

    pub fn calibration_key(&self) -> Option<overlay::CalibrationKey> {
        self.calibration_key
            .as_ref()
            .map(|k| overlay::CalibrationKey {
                site_id: k.site_id.clone(),
                resin: k.resin,
            })
    }

    /// A worked example embedded in error payloads.
    pub fn example() -> SimulationRequest {
        let mut ions = BTreeMap::new();
        ions.insert(Ion::Ca, 80.0);
        ions.insert(Ion::Mg, 24.0);
        ions.insert(Ion::Na, 839.0);
        ions.insert(Ion::HCO3, 122.0);
        ions.insert(Ion::Cl, 1435.0);
        SimulationRequest {
            schema_version: SCHEMA_VERSION.to_string(),
            resin_type: ResinKind::Sac,
            water: WaterInput {
                flow_m3_h: 100.0,
                temperature_c: 25.0,
                ph: 7.8,
                ions_mg_l: ions,
            },
            vessel: cells::Vessel {
                diameter_m: 1.8,
                bed_depth_m: 2.0,
                number_in_service: 1,
                freeboard_m: None,
            },
            targets: Targets {
                hardness_mg_l_caco3: 5.0,
                alkalinity_mg_l_caco3: None,
            },
            cycle: CycleInput {
                regenerant_type: Regenerant::NaCl,
                regenerant_dose_g_per_l: 100.0,
                regenerant_concentration_wt: 10.0,
                flow_direction: FlowDirection::Counter,
                backwash: true,
                mode: RegenMode::Fixed,
                stages: 5,
                flow_bv_h: 4.0,
                slow_rinse_bv: 2.0,
                fast_rinse_bv: 4.0,
                target_recovery: 0.90,
            },
            calibration_key: None,
            resin_spec: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_round_trips() {
        let req = SimulationRequest::example();
        let doc = serde_json::to_string(&req).unwrap();
        let back: SimulationRequest = serde_json::from_str(&doc).unwrap();
        back.check_version().unwrap();
        assert_eq!(back.resin_type, ResinKind::Sac);
        assert!(doc.contains("\"SAC\""));
        assert!(doc.contains("\"counter\""));
    }

    #[test]
    fn unknown_ion_is_rejected() {
        let mut doc: serde_json::Value =
            serde_json::to_value(SimulationRequest::example()).unwrap();
        doc["water"]["ions_mg_l"]["Fe"] = serde_json::json!(0.3);
        assert!(serde_json::from_value::<SimulationRequest>(doc).is_err());
    }

    #[test]
    fn future_major_version_is_refused() {
        let mut req = SimulationRequest::example();
        req.schema_version = "2.0.0".into();
        assert!(matches!(
            req.check_version(),
            Err(EngineError::SchemaVersion(_))
        ));
    }

    #[test]
    fn cycle_defaults_fill_optional_fields() {
        let doc = serde_json::json!({
            "regenerant_type": "NaCl",
            "regenerant_dose_g_per_l": 100.0,
            "regenerant_concentration_wt": 10.0,
            "flow_direction": "counter",
            "backwash": true
        });
        let cycle: CycleInput = serde_json::from_value(doc).unwrap();
        assert_eq!(cycle.stages, 1);
        assert_eq!(cycle.mode, RegenMode::Fixed);
        assert!((cycle.target_recovery - 0.90).abs() < 1e-12);
    }
}
