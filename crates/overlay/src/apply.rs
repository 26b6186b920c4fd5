//! The correction pass itself.

use serde::{Deserialize, Serialize};
use tracing::debug;

use curves::BreakthroughCurve;
use deck::Phase;
use resin::{RegenerationPlan, ResinKind, ResinSpec};
use water::{Ion, NormalizedWater};

use crate::calibration::CalibrationParameters;
use crate::efficiency::regeneration_efficiency;

/// Gas constant (J/(mol K))
const R_GAS: f64 = 8.314;
const T_REF_K: f64 = 298.15;

/// Early-service window (BV) over which the minimum leakage is read.
const EARLY_WINDOW_BV: f64 = 20.0;

/// Slack on the temporary-hardness cap (mg/L as CaCO3)
const CAP_EPSILON: f64 = 0.5;

/// Gain on the slip exhaustion term.
const EXHAUSTION_GAIN: f64 = 2.0;

/// First-BV window in which Na-form pH spikes are numerical artifacts.
const PH_SPIKE_WINDOW_BV: f64 = 1.0;
const PH_SPIKE_LIMIT: f64 = 10.0;

/// What the overlay did to a curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayReport {
    /// Regeneration efficiency the floor was computed from
    pub eta: f64,

    /// Leakage floor (mg/L as CaCO3)
    pub leakage_floor_mg_l_caco3: f64,

    /// Offset actually added to the service hardness series
    pub applied_offset_mg_l_caco3: f64,

    /// Equilibrium H-form capacity (eq/L, aged); None for exchanger beds
    pub capacity_equilibrium_eq_l: Option<f64>,

    /// Authoritative H-form capacity (eq/L, aged); None for exchanger beds
    pub capacity_effective_eq_l: Option<f64>,

    pub aging_multiplier: f64,

    /// Capacity-theoretical service length (BV); H-form only
    pub theoretical_service_bv: Option<f64>,

    /// Samples clipped by the temporary-hardness cap
    pub clipped_hardness_samples: usize,

    /// Samples whose pH spike was clipped
    pub clipped_ph_samples: usize,

    pub warnings: Vec<String>,
}

/// Apply the resin-appropriate corrections in place.
///
/// Only concentration columns change; BV and phase tags are read-only
/// here. Idempotent: the floor is applied as a max-offset, slips are
/// recomputed rather than accumulated, and clips are stable.
pub fn apply(
    curve: &mut BreakthroughCurve,
    water: &NormalizedWater,
    spec: &ResinSpec,
    regen: &RegenerationPlan,
    calibration: &CalibrationParameters,
) -> OverlayReport {
    match spec.kind {
        ResinKind::Sac => apply_sac(curve, water, spec, regen, calibration),
        ResinKind::WacNa => apply_wac_na(curve, water, spec, regen, calibration),
        ResinKind::WacH => apply_wac_h(curve, water, spec, regen, calibration),
    }
}

/// SAC correction: the leakage floor alone.
pub fn apply_sac(
    curve: &mut BreakthroughCurve,
    water: &NormalizedWater,
    spec: &ResinSpec,
    regen: &RegenerationPlan,
    calibration: &CalibrationParameters,
) -> OverlayReport {
    apply_floor(curve, water, spec, regen, calibration, 1.0)
}

/// Na-form WAC: the floor with Arrhenius-scaled kinetics, plus the
/// feed-switch pH artifact clip.
pub fn apply_wac_na(
    curve: &mut BreakthroughCurve,
    water: &NormalizedWater,
    spec: &ResinSpec,
    regen: &RegenerationPlan,
    calibration: &CalibrationParameters,
) -> OverlayReport {
    let scale = arrhenius_scale(water.temperature_c, calibration);
    let mut report = apply_floor(curve, water, spec, regen, calibration, scale);
    clip_ph_spikes(curve, &mut report);
    report
}

/// H-form WAC: pKa/kinetic-trap capacity, slip columns, the
/// temporary-hardness cap and CO2 accounting.
pub fn apply_wac_h(
    curve: &mut BreakthroughCurve,
    water: &NormalizedWater,
    spec: &ResinSpec,
    regen: &RegenerationPlan,
    calibration: &CalibrationParameters,
) -> OverlayReport {
    apply_h_form(curve, water, spec, regen, calibration)
}

/// Kinetic leakage multiplier: the floor scales on the ratio of the
/// reference LDF coefficient to its temperature-corrected value, so warm
/// feeds leak less and cold feeds leak more.
fn arrhenius_scale(temperature_c: f64, calibration: &CalibrationParameters) -> f64 {
    let t_k = temperature_c + 273.15;
    (calibration.activation_energy_j_mol / R_GAS * (1.0 / t_k - 1.0 / T_REF_K)).exp()
}

fn apply_floor(
    curve: &mut BreakthroughCurve,
    water: &NormalizedWater,
    spec: &ResinSpec,
    regen: &RegenerationPlan,
    calibration: &CalibrationParameters,
    kinetic_scale: f64,
) -> OverlayReport {
    let eta = regeneration_efficiency(regen, spec);
    let kinetic_term =
        calibration.regen_coeff_a2 * (1.0 - eta).powf(calibration.exponent_b) * kinetic_scale;
    let floor = (calibration.floor_a0
        + calibration.tds_slope_a1 * water.tds_mg_l / 1000.0
        + kinetic_term)
        * calibration.channeling_factor;

    let early_min = early_service_minimum(curve);
    let offset = match early_min {
        Some(min) => (floor - min).max(0.0),
        None => 0.0,
    };

    if offset > 0.0 {
        debug!(floor, offset, "raising service hardness to the leakage floor");
        let feed_ca_share = hardness_share(water.mg_l(Ion::Ca), water.mg_l(Ion::Mg));
        for sample in curve
            .samples
            .iter_mut()
            .filter(|s| s.phase == Phase::Service)
        {
            let share = if sample.hardness_mg_l_caco3 > 0.0 {
                hardness_share(sample.ca_mg_l, sample.mg_mg_l)
            } else {
                feed_ca_share
            };
            sample.hardness_mg_l_caco3 += offset;
            sample.ca_mg_l += offset * share / 2.5;
            sample.mg_mg_l += offset * (1.0 - share) / 4.1;
        }
    }

    OverlayReport {
        eta,
        leakage_floor_mg_l_caco3: floor,
        applied_offset_mg_l_caco3: offset,
        capacity_equilibrium_eq_l: None,
        capacity_effective_eq_l: None,
        aging_multiplier: calibration.aging_multiplier(),
        theoretical_service_bv: None,
        clipped_hardness_samples: 0,
        clipped_ph_samples: 0,
        warnings: Vec::new(),
    }
}

/// Fraction of a hardness figure carried by calcium.
fn hardness_share(ca_mg_l: f64, mg_mg_l: f64) -> f64 {
    let ca_h = 2.5 * ca_mg_l;
    let mg_h = 4.1 * mg_mg_l;
    if ca_h + mg_h > 0.0 {
        ca_h / (ca_h + mg_h)
    } else {
        0.5
    }
}

fn early_service_minimum(curve: &BreakthroughCurve) -> Option<f64> {
    let early = curve
        .service()
        .filter(|s| s.bv >= curves::TRANSIENT_WINDOW_BV && s.bv <= EARLY_WINDOW_BV)
        .map(|s| s.hardness_mg_l_caco3)
        .fold(f64::INFINITY, f64::min);
    if early.is_finite() {
        return Some(early);
    }
    let any = curve
        .service()
        .map(|s| s.hardness_mg_l_caco3)
        .fold(f64::INFINITY, f64::min);
    any.is_finite().then_some(any)
}

fn clip_ph_spikes(curve: &mut BreakthroughCurve, report: &mut OverlayReport) {
    let mut late_spikes = 0usize;
    for sample in curve
        .samples
        .iter_mut()
        .filter(|s| s.phase == Phase::Service && s.ph > PH_SPIKE_LIMIT)
    {
        if sample.bv <= PH_SPIKE_WINDOW_BV {
            sample.ph = PH_SPIKE_LIMIT;
            report.clipped_ph_samples += 1;
        } else {
            late_spikes += 1;
        }
    }
    if report.clipped_ph_samples > 0 {
        report.warnings.push(format!(
            "clipped {} pH spike(s) in the first {} BV after feed switch (numerical artifact)",
            report.clipped_ph_samples, PH_SPIKE_WINDOW_BV
        ));
    }
    if late_spikes > 0 {
        report.warnings.push(format!(
            "{} pH sample(s) above {} beyond the feed-switch window were kept; inspect the curve",
            late_spikes, PH_SPIKE_LIMIT
        ));
    }
}

fn apply_h_form(
    curve: &mut BreakthroughCurve,
    water: &NormalizedWater,
    spec: &ResinSpec,
    regen: &RegenerationPlan,
    calibration: &CalibrationParameters,
) -> OverlayReport {
    let mut warnings = Vec::new();
    let eta = regeneration_efficiency(regen, spec);
    let aging = calibration.aging_multiplier();

    // Capacity: equilibrium says the protonated fraction at feed pH is
    // available; operationally a freshly regenerated bed holds at least
    // ktf of nameplate (the kinetic trap). The larger figure is the
    // authoritative one.
    let pka = spec.pka.unwrap_or(4.8) + calibration.pka_shift;
    let alpha = 1.0 / (1.0 + 10f64.powf(pka - water.ph));
    let capacity_equilibrium = alpha * spec.total_capacity_eq_l * aging;
    let capacity_trap = calibration.kinetic_trap_factor * spec.total_capacity_eq_l * aging;
    let capacity_effective = capacity_equilibrium.max(capacity_trap);

    // Theoretical run length against the removable (temporary) load.
    let temp_eq_l = water.temporary_hardness_mg_l_caco3 / 50_040.0;
    let theoretical_bv = if temp_eq_l > 0.0 {
        capacity_effective / (spec.bed_porosity * temp_eq_l)
    } else {
        f64::INFINITY
    };

    let feed_hardness = water.hardness_mg_l_caco3;
    let temporary = water.temporary_hardness_mg_l_caco3;
    let feed_alk = water.alkalinity_mg_l_caco3;
    let feed_na = water.mg_l(Ion::Na);
    let feed_k = water.mg_l(Ion::K);

    let mut clipped = 0usize;
    for sample in curve
        .samples
        .iter_mut()
        .filter(|s| s.phase == Phase::Service)
    {
        // An H-form bed cannot touch permanent hardness; equilibrium
        // occasionally claims otherwise and is overruled here.
        let removal = feed_hardness - sample.hardness_mg_l_caco3;
        if removal > temporary + CAP_EPSILON {
            let corrected = feed_hardness - temporary;
            if sample.hardness_mg_l_caco3 > 0.0 {
                let scale = corrected / sample.hardness_mg_l_caco3;
                sample.ca_mg_l *= scale;
                sample.mg_mg_l *= scale;
            } else {
                let share = hardness_share(water.mg_l(Ion::Ca), water.mg_l(Ion::Mg));
                sample.ca_mg_l = corrected * share / 2.5;
                sample.mg_mg_l = corrected * (1.0 - share) / 4.1;
            }
            sample.hardness_mg_l_caco3 = corrected;
            clipped += 1;
        }

        // Slip grows with bed exhaustion; recomputed, never accumulated.
        let exhaustion = if theoretical_bv.is_finite() {
            (sample.bv / theoretical_bv).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let growth = 1.0 + EXHAUSTION_GAIN * exhaustion;
        sample.na_slip_mg_l = Some(feed_na * calibration.na_base_slip * growth);
        sample.k_slip_mg_l = Some(feed_k * calibration.k_base_slip * growth);

        // Dealkalization converts alkalinity to carbonic acid.
        let destroyed = (feed_alk - sample.alk_mg_l_caco3).max(0.0);
        sample.co2_mg_l = Some(destroyed / 50.04 * 44.01);
    }

    if clipped > 0 {
        warnings.push(format!(
            "temporary-hardness cap clipped {} service sample(s); equilibrium over-removed permanent hardness",
            clipped
        ));
    }

    OverlayReport {
        eta,
        leakage_floor_mg_l_caco3: 0.0,
        applied_offset_mg_l_caco3: 0.0,
        capacity_equilibrium_eq_l: Some(capacity_equilibrium),
        capacity_effective_eq_l: Some(capacity_effective),
        aging_multiplier: aging,
        theoretical_service_bv: theoretical_bv.is_finite().then_some(theoretical_bv),
        clipped_hardness_samples: clipped,
        clipped_ph_samples: 0,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use curves::CurveSample;
    use resin::{FlowDirection, RegenMode, Regenerant};
    use std::collections::BTreeMap;
    use water::{normalize, FeedWater};

    fn sac_water() -> NormalizedWater {
        let mut ions = BTreeMap::new();
        ions.insert(Ion::Ca, 80.0);
        ions.insert(Ion::Mg, 24.0);
        ions.insert(Ion::Na, 839.0);
        ions.insert(Ion::HCO3, 122.0);
        ions.insert(Ion::Cl, 1435.0);
        normalize(&FeedWater {
            ions,
            ph: 7.8,
            temperature_c: 25.0,
            flow_m3_h: 100.0,
        })
        .unwrap()
    }

    fn h_water() -> NormalizedWater {
        let mut ions = BTreeMap::new();
        ions.insert(Ion::Ca, 120.0);
        ions.insert(Ion::Mg, 40.0);
        ions.insert(Ion::Na, 50.0);
        ions.insert(Ion::K, 8.0);
        ions.insert(Ion::HCO3, 300.0);
        ions.insert(Ion::Cl, 150.0);
        normalize(&FeedWater {
            ions,
            ph: 7.5,
            temperature_c: 25.0,
            flow_m3_h: 50.0,
        })
        .unwrap()
    }

    fn nacl_plan() -> RegenerationPlan {
        RegenerationPlan {
            regenerant: Regenerant::NaCl,
            dose_g_per_l: 100.0,
            strength_wt_pct: 10.0,
            flow_bv_h: 4.0,
            direction: FlowDirection::Counter,
            backwash: true,
            slow_rinse_bv: 2.0,
            fast_rinse_bv: 4.0,
            stages: 5,
            mode: RegenMode::Fixed,
            target_recovery: 0.90,
        }
    }

    fn hcl_plan() -> RegenerationPlan {
        RegenerationPlan {
            regenerant: Regenerant::HCl,
            ..nacl_plan()
        }
    }

    fn sample(bv: f64, hardness: f64, phase: Phase) -> CurveSample {
        CurveSample {
            bv,
            phase,
            ca_mg_l: hardness * 0.8 / 2.5,
            mg_mg_l: hardness * 0.2 / 4.1,
            na_mg_l: 900.0,
            k_mg_l: 0.0,
            ph: 7.8,
            alk_mg_l_caco3: 100.0,
            hardness_mg_l_caco3: hardness,
            co2_mg_l: None,
            na_slip_mg_l: None,
            k_slip_mg_l: None,
        }
    }

    fn service_curve(hardnesses: &[(f64, f64)]) -> BreakthroughCurve {
        BreakthroughCurve {
            samples: hardnesses
                .iter()
                .map(|&(bv, h)| sample(bv, h, Phase::Service))
                .collect(),
            skipped_rows: 0,
            truncated: false,
        }
    }

    #[test]
    fn floor_lifts_clean_early_service() {
        let water = sac_water();
        let spec = ResinSpec::library(ResinKind::Sac);
        let cal = CalibrationParameters::defaults_for(ResinKind::Sac);
        let mut curve = service_curve(&[(1.0, 0.01), (5.0, 0.02), (50.0, 1.0)]);
        let report = apply(&mut curve, &water, &spec, &nacl_plan(), &cal);
        assert!(report.applied_offset_mg_l_caco3 > 0.0);
        let early_min = curve
            .service()
            .map(|s| s.hardness_mg_l_caco3)
            .fold(f64::INFINITY, f64::min);
        assert_relative_eq!(early_min, report.leakage_floor_mg_l_caco3, epsilon = 1e-9);
    }

    #[test]
    fn offset_preserves_the_ca_mg_split() {
        let water = sac_water();
        let spec = ResinSpec::library(ResinKind::Sac);
        let cal = CalibrationParameters::defaults_for(ResinKind::Sac);
        let mut curve = service_curve(&[(1.0, 0.5), (5.0, 1.0)]);
        apply(&mut curve, &water, &spec, &nacl_plan(), &cal);
        for s in curve.service() {
            assert_relative_eq!(
                2.5 * s.ca_mg_l + 4.1 * s.mg_mg_l,
                s.hardness_mg_l_caco3,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn overlay_is_idempotent() {
        let water = sac_water();
        let spec = ResinSpec::library(ResinKind::Sac);
        let cal = CalibrationParameters::defaults_for(ResinKind::Sac);
        let mut curve = service_curve(&[(1.0, 0.01), (5.0, 0.02), (50.0, 1.0)]);
        apply(&mut curve, &water, &spec, &nacl_plan(), &cal);
        let once = serde_json::to_string(&curve).unwrap();
        apply(&mut curve, &water, &spec, &nacl_plan(), &cal);
        let twice = serde_json::to_string(&curve).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn neutral_calibration_is_a_no_op() {
        let water = sac_water();
        let spec = ResinSpec::library(ResinKind::Sac);
        let mut cal = CalibrationParameters::defaults_for(ResinKind::Sac);
        cal.floor_a0 = 0.0;
        cal.tds_slope_a1 = 0.0;
        cal.regen_coeff_a2 = 0.0;
        let mut curve = service_curve(&[(1.0, 0.3), (5.0, 0.4)]);
        let before = serde_json::to_string(&curve).unwrap();
        let report = apply(&mut curve, &water, &spec, &nacl_plan(), &cal);
        assert_eq!(before, serde_json::to_string(&curve).unwrap());
        assert_eq!(report.applied_offset_mg_l_caco3, 0.0);
    }

    #[test]
    fn colder_feed_leaks_more() {
        let cal = CalibrationParameters::defaults_for(ResinKind::WacNa);
        let cold = arrhenius_scale(10.0, &cal);
        let warm = arrhenius_scale(35.0, &cal);
        assert!(cold > 1.0);
        assert!(warm < 1.0);
    }

    #[test]
    fn na_form_ph_spike_is_clipped_only_in_the_window() {
        let water = sac_water();
        let spec = ResinSpec::library(ResinKind::WacNa);
        let cal = CalibrationParameters::defaults_for(ResinKind::WacNa);
        let mut curve = service_curve(&[(0.5, 0.5), (2.0, 0.5)]);
        curve.samples[0].ph = 11.2;
        curve.samples[1].ph = 10.6;
        let report = apply(&mut curve, &water, &spec, &hcl_plan(), &cal);
        assert_eq!(report.clipped_ph_samples, 1);
        assert_relative_eq!(curve.samples[0].ph, 10.0);
        assert_relative_eq!(curve.samples[1].ph, 10.6); // kept, warned
        assert!(report.warnings.iter().any(|w| w.contains("kept")));
    }

    #[test]
    fn h_form_capacity_prefers_the_kinetic_trap() {
        let water = h_water();
        let spec = ResinSpec::library(ResinKind::WacH);
        let cal = CalibrationParameters::defaults_for(ResinKind::WacH);
        let mut curve = service_curve(&[(1.0, 250.0)]);
        let report = apply(&mut curve, &water, &spec, &hcl_plan(), &cal);
        let eq = report.capacity_equilibrium_eq_l.unwrap();
        let eff = report.capacity_effective_eq_l.unwrap();
        assert!(eff >= eq);
        // pH 7.5 >> pKa 4.8 so equilibrium is nearly full capacity and
        // wins over the 0.85 trap floor
        assert!(eq > 0.99 * spec.total_capacity_eq_l * report.aging_multiplier);
    }

    #[test]
    fn temporary_hardness_cap_is_enforced() {
        let water = h_water();
        let spec = ResinSpec::library(ResinKind::WacH);
        let cal = CalibrationParameters::defaults_for(ResinKind::WacH);
        // Equilibrium claims near-total removal; feed has ~218 mg/L
        // permanent hardness that must survive.
        let mut curve = service_curve(&[(1.0, 0.5)]);
        let report = apply(&mut curve, &water, &spec, &hcl_plan(), &cal);
        assert_eq!(report.clipped_hardness_samples, 1);
        let s = &curve.samples[0];
        let removal = water.hardness_mg_l_caco3 - s.hardness_mg_l_caco3;
        assert!(removal <= water.temporary_hardness_mg_l_caco3 + CAP_EPSILON + 1e-9);
        assert_relative_eq!(
            2.5 * s.ca_mg_l + 4.1 * s.mg_mg_l,
            s.hardness_mg_l_caco3,
            epsilon = 1e-6
        );
    }

    #[test]
    fn slip_grows_with_bed_volumes() {
        let water = h_water();
        let spec = ResinSpec::library(ResinKind::WacH);
        let cal = CalibrationParameters::defaults_for(ResinKind::WacH);
        let mut curve = service_curve(&[(1.0, 250.0), (40.0, 250.0), (120.0, 250.0)]);
        apply(&mut curve, &water, &spec, &hcl_plan(), &cal);
        let slips: Vec<f64> = curve
            .service()
            .map(|s| s.na_slip_mg_l.unwrap())
            .collect();
        assert!(slips[0] < slips[1] && slips[1] <= slips[2]);
        assert!(slips[0] >= water.mg_l(Ion::Na) * cal.na_base_slip - 1e-9);
    }

    #[test]
    fn co2_tracks_destroyed_alkalinity() {
        let water = h_water();
        let spec = ResinSpec::library(ResinKind::WacH);
        let cal = CalibrationParameters::defaults_for(ResinKind::WacH);
        let mut curve = service_curve(&[(1.0, 250.0)]);
        curve.samples[0].alk_mg_l_caco3 = 10.0;
        apply(&mut curve, &water, &spec, &hcl_plan(), &cal);
        let co2 = curve.samples[0].co2_mg_l.unwrap();
        let destroyed = water.alkalinity_mg_l_caco3 - 10.0;
        assert_relative_eq!(co2, destroyed / 50.04 * 44.01, epsilon = 1e-9);
        assert!(co2 > 0.0);
    }

    #[test]
    fn h_form_overlay_is_idempotent() {
        let water = h_water();
        let spec = ResinSpec::library(ResinKind::WacH);
        let cal = CalibrationParameters::defaults_for(ResinKind::WacH);
        let mut curve = service_curve(&[(1.0, 0.5), (40.0, 250.0)]);
        apply(&mut curve, &water, &spec, &hcl_plan(), &cal);
        let once = serde_json::to_string(&curve).unwrap();
        apply(&mut curve, &water, &spec, &hcl_plan(), &cal);
        assert_eq!(once, serde_json::to_string(&curve).unwrap());
    }
}
