//! Breakthrough detection and phase-segmented metrics.

use serde::{Deserialize, Serialize};

use crate::curve::{BreakthroughCurve, Criterion, CurveSample};
use crate::TRANSIENT_WINDOW_BV;

/// Where the service phase crossed the effluent target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breakthrough {
    /// True when the target was exceeded inside the simulated horizon
    pub reached: bool,

    /// BV at the crossing; when not reached, the last simulated BV as a
    /// conservative stand-in (never an extrapolation)
    pub bv: f64,

    /// Effluent quality at the crossing (interpolated between the
    /// bracketing samples)
    pub at: CurveSample,
}

/// Service-phase summary in the two families the result schema reports:
/// point values at breakthrough (sizing) and pre-breakthrough averages
/// (operations).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMetrics {
    pub breakthrough_ca_mg_l: f64,
    pub breakthrough_mg_mg_l: f64,
    pub breakthrough_hardness_mg_l_caco3: f64,
    pub breakthrough_alkalinity_mg_l_caco3: f64,

    pub avg_ca_mg_l: f64,
    pub avg_mg_mg_l: f64,
    pub avg_hardness_mg_l_caco3: f64,
    pub avg_alkalinity_mg_l_caco3: f64,

    pub ph_min: f64,
    pub ph_avg: f64,
    pub ph_max: f64,

    /// Mean CO2 generation over the service phase (mg/L); zero unless the
    /// overlay filled the column
    pub co2_generation_mg_l: f64,
}

/// Find the first service sample past the target, ignoring the initial
/// transient window, and interpolate the crossing.
pub fn detect_breakthrough(
    curve: &BreakthroughCurve,
    criterion: Criterion,
    target: f64,
) -> Option<Breakthrough> {
    let service: Vec<&CurveSample> = curve.service().collect();
    let last = *service.last()?;

    let mut prev: Option<&CurveSample> = None;
    for sample in service.iter().filter(|s| s.bv >= TRANSIENT_WINDOW_BV) {
        if sample.criterion_value(criterion) > target {
            let at = match prev {
                Some(below) => {
                    let v0 = below.criterion_value(criterion);
                    let v1 = sample.criterion_value(criterion);
                    let t = if v1 > v0 { (target - v0) / (v1 - v0) } else { 1.0 };
                    CurveSample::lerp(below, sample, t.clamp(0.0, 1.0))
                }
                None => (*sample).clone(),
            };
            return Some(Breakthrough {
                reached: true,
                bv: at.bv,
                at,
            });
        }
        prev = Some(sample);
    }

    Some(Breakthrough {
        reached: false,
        bv: last.bv,
        at: last.clone(),
    })
}

/// Service metrics against a detected breakthrough.
pub fn service_metrics(curve: &BreakthroughCurve, breakthrough: &Breakthrough) -> Option<ServiceMetrics> {
    let pre: Vec<&CurveSample> = curve
        .service()
        .filter(|s| s.bv <= breakthrough.bv)
        .collect();
    if pre.is_empty() {
        return None;
    }
    let n = pre.len() as f64;
    let mean = |f: fn(&CurveSample) -> f64| pre.iter().map(|s| f(s)).sum::<f64>() / n;

    Some(ServiceMetrics {
        breakthrough_ca_mg_l: breakthrough.at.ca_mg_l,
        breakthrough_mg_mg_l: breakthrough.at.mg_mg_l,
        breakthrough_hardness_mg_l_caco3: breakthrough.at.hardness_mg_l_caco3,
        breakthrough_alkalinity_mg_l_caco3: breakthrough.at.alk_mg_l_caco3,
        avg_ca_mg_l: mean(|s| s.ca_mg_l),
        avg_mg_mg_l: mean(|s| s.mg_mg_l),
        avg_hardness_mg_l_caco3: mean(|s| s.hardness_mg_l_caco3),
        avg_alkalinity_mg_l_caco3: mean(|s| s.alk_mg_l_caco3),
        ph_min: pre.iter().map(|s| s.ph).fold(f64::INFINITY, f64::min),
        ph_avg: mean(|s| s.ph),
        ph_max: pre.iter().map(|s| s.ph).fold(f64::NEG_INFINITY, f64::max),
        co2_generation_mg_l: mean(|s| s.co2_mg_l.unwrap_or(0.0)),
    })
}
