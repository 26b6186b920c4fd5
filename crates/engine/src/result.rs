//! The unified result schema and the error shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use curves::{BreakthroughCurve, ServiceMetrics};
use overlay::OverlayReport;
use water::Ion;

use crate::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Warning,
    Error,
    Timeout,
}

/// Headline performance figures, read at the breakthrough point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Performance {
    /// Service run length to the effluent target (BV)
    pub service_bv_to_target: f64,

    /// Service run length in hours at design flow
    pub service_hours: f64,

    pub effluent_hardness_mg_l_caco3: f64,
    pub effluent_alkalinity_mg_l_caco3: f64,
    pub effluent_ph: f64,

    /// Hardness actually loaded onto the bed vs nameplate capacity
    pub capacity_utilization_percent: f64,

    /// Clean-bed pressure drop estimate
    pub delta_p_bar: f64,

    pub breakthrough_reached: bool,
}

/// Per-ion bookkeeping across the cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IonTrack {
    pub feed_mg_l: f64,
    pub effluent_mg_l: f64,
    pub waste_mg_l: f64,
    pub removal_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MassBalance {
    pub regenerant_kg_cycle: f64,
    pub backwash_m3_cycle: f64,
    pub rinse_m3_cycle: f64,
    pub waste_m3_cycle: f64,
    pub hardness_removed_kg_caco3: f64,

    /// Waste-side hardness recovered as a percentage of service-side
    /// hardness removed; 100 means the books close exactly
    pub closure_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerationResults {
    pub actual_regenerant_bv: f64,
    pub regenerant_consumed_kg: f64,
    pub peak_waste_tds_mg_l: f64,
    pub peak_waste_hardness_mg_l: f64,
    pub waste_volume_m3: f64,

    /// Fraction of loaded hardness stripped back off the bed
    pub final_resin_recovery: f64,

    pub regeneration_time_hours: f64,
    pub ready_for_service: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveInfo {
    /// Always "phreeqc"
    pub engine: String,

    /// completed | not_converged | timeout
    pub termination_condition: String,

    pub solve_time_seconds: f64,
    pub phreeqc_database: String,

    /// Nominal cell count going into planning
    pub cells: usize,

    /// Cell count actually integrated after capacity refinement
    pub auto_refined_cells: usize,
}

/// One staged-optimize evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerEvaluation {
    /// Dose multiplier tried against the heuristic dose
    pub dose_factor: f64,

    pub regenerant_bv: f64,
    pub resin_recovery: f64,

    /// Best recovery seen up to and including this evaluation; monotone
    pub best_so_far: f64,
}

/// Non-contractual extras a reviewer wants and a dashboard ignores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay: Option<OverlayReport>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub planner_notes: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub optimizer_trace: Vec<OptimizerEvaluation>,

    /// Punch rows dropped or skipped during parsing
    pub discarded_rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub status: Status,
    pub schema_version: String,
    pub performance: Performance,
    pub performance_metrics: ServiceMetrics,
    pub ion_tracking: BTreeMap<Ion, IonTrack>,
    pub mass_balance: MassBalance,
    pub regeneration_results: RegenerationResults,
    pub breakthrough_data: BreakthroughCurve,
    pub solve_info: SolveInfo,
    pub warnings: Vec<String>,
    pub artifacts: Vec<String>,
    pub diagnostics: Diagnostics,
}

/// The §-shaped error payload callers receive instead of a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: Status,
    pub error: String,
    pub details: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub example_structure: Option<serde_json::Value>,
}

impl ErrorBody {
    /// Map an engine failure onto the wire shape, with the hints the
    /// support rotation got tired of typing.
    pub fn from_engine_error(err: &EngineError) -> ErrorBody {
        let (status, kind, hint): (Status, &str, Option<&str>) = match err {
            EngineError::SchemaVersion(_) => (
                Status::Error,
                "SchemaVersion",
                Some("this build speaks schema 1.x"),
            ),
            EngineError::Water(water::WaterError::ChargeImbalance { .. }) => (
                Status::Error,
                "ChargeImbalance",
                Some("supply Ca, Mg, Na and HCO3; Cl auto-closes small anion deficits"),
            ),
            EngineError::Water(water::WaterError::OutOfRange { .. }) => {
                (Status::Error, "OutOfRange", None)
            }
            EngineError::Water(water::WaterError::UnknownIon(_)) => (
                Status::Error,
                "UnknownIon",
                Some("recognized ions: Ca, Mg, Na, K, HCO3, Cl, SO4, NO3"),
            ),
            EngineError::Resin(_) => (Status::Error, "InconsistentResinVessel", None),
            EngineError::Cells(_) => (Status::Error, "InvalidVessel", None),
            EngineError::Deck(_) => (Status::Error, "DeckBuild", None),
            EngineError::Solver(solver::SolverError::NotInstalled(_)) => (
                Status::Error,
                "NotInstalled",
                Some("install PHREEQC or set PHREEQC_EXE"),
            ),
            EngineError::Solver(solver::SolverError::Timeout { .. }) => (
                Status::Timeout,
                "Timeout",
                Some("raise MCP_SIMULATION_TIMEOUT_S or reduce the simulated horizon"),
            ),
            EngineError::Solver(solver::SolverError::Canceled) => {
                (Status::Error, "Canceled", None)
            }
            EngineError::Solver(solver::SolverError::NotConverged { .. }) => (
                Status::Error,
                "NotConverged",
                Some("for WAC Na-form feeds, more cells usually converge; check the feed analysis"),
            ),
            EngineError::Solver(solver::SolverError::NonZeroExit { .. }) => {
                (Status::Error, "NonZeroExit", None)
            }
            EngineError::Solver(_) => (Status::Error, "MalformedOutput", None),
            EngineError::Curve(curves::CurveError::MissingColumn(_)) => {
                (Status::Error, "MissingColumn", None)
            }
            EngineError::Curve(_) => (Status::Error, "MalformedOutput", None),
        };
        ErrorBody {
            status,
            error: kind.to_string(),
            details: err.to_string(),
            hint: hint.map(|h| h.to_string()),
            example_structure: matches!(
                err,
                EngineError::SchemaVersion(_) | EngineError::Water(_)
            )
            .then(|| serde_json::to_value(crate::SimulationRequest::example()).unwrap_or_default()),
        }
    }
}
