//! Typed curve samples and the breakthrough criterion.

use serde::{Deserialize, Serialize};

use deck::Phase;
use water::Ion;

/// What "breakthrough" is measured on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Total hardness as CaCO3 (the default)
    HardnessCaCo3,
    /// Alkalinity as CaCO3; H-form dealkalization targets
    Alkalinity,
    /// A single ion concentration (mg/L)
    SingleIon(Ion),
}

impl Default for Criterion {
    fn default() -> Self {
        Criterion::HardnessCaCo3
    }
}

/// One punched shift of the effluent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveSample {
    /// Bed volumes processed within the sample's phase
    pub bv: f64,

    pub phase: Phase,

    pub ca_mg_l: f64,
    pub mg_mg_l: f64,
    pub na_mg_l: f64,
    pub k_mg_l: f64,
    pub ph: f64,
    pub alk_mg_l_caco3: f64,
    pub hardness_mg_l_caco3: f64,

    /// Carbonic acid generated by dealkalization (mg/L); overlay-computed,
    /// H-form only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub co2_mg_l: Option<f64>,

    /// Sodium slip past the bed (mg/L); overlay-computed, H-form only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub na_slip_mg_l: Option<f64>,

    /// Potassium slip past the bed (mg/L); overlay-computed, H-form only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k_slip_mg_l: Option<f64>,
}

impl CurveSample {
    /// Value the breakthrough criterion reads off this sample.
    pub fn criterion_value(&self, criterion: Criterion) -> f64 {
        match criterion {
            Criterion::HardnessCaCo3 => self.hardness_mg_l_caco3,
            Criterion::Alkalinity => self.alk_mg_l_caco3,
            Criterion::SingleIon(Ion::Ca) => self.ca_mg_l,
            Criterion::SingleIon(Ion::Mg) => self.mg_mg_l,
            Criterion::SingleIon(Ion::Na) => self.na_mg_l,
            Criterion::SingleIon(Ion::K) => self.k_mg_l,
            Criterion::SingleIon(_) => f64::NAN,
        }
    }

    /// Linear interpolation between two samples; used for the
    /// breakthrough tie-break.
    pub fn lerp(a: &CurveSample, b: &CurveSample, t: f64) -> CurveSample {
        let mix = |x: f64, y: f64| x + (y - x) * t;
        let mix_opt = |x: Option<f64>, y: Option<f64>| match (x, y) {
            (Some(x), Some(y)) => Some(mix(x, y)),
            _ => None,
        };
        CurveSample {
            bv: mix(a.bv, b.bv),
            phase: a.phase,
            ca_mg_l: mix(a.ca_mg_l, b.ca_mg_l),
            mg_mg_l: mix(a.mg_mg_l, b.mg_mg_l),
            na_mg_l: mix(a.na_mg_l, b.na_mg_l),
            k_mg_l: mix(a.k_mg_l, b.k_mg_l),
            ph: mix(a.ph, b.ph),
            alk_mg_l_caco3: mix(a.alk_mg_l_caco3, b.alk_mg_l_caco3),
            hardness_mg_l_caco3: mix(a.hardness_mg_l_caco3, b.hardness_mg_l_caco3),
            co2_mg_l: mix_opt(a.co2_mg_l, b.co2_mg_l),
            na_slip_mg_l: mix_opt(a.na_slip_mg_l, b.na_slip_mg_l),
            k_slip_mg_l: mix_opt(a.k_slip_mg_l, b.k_slip_mg_l),
        }
    }
}

/// The full parsed cycle.
///
/// BV and phase tags are fixed at parse time; downstream correction layers
/// adjust concentration fields only and must leave `bv` and `phase`
/// untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakthroughCurve {
    pub samples: Vec<CurveSample>,

    /// Rows the parser could not type (unknown phase tag)
    pub skipped_rows: usize,

    /// True when fewer rows arrived than the deck declared; the run died
    /// mid-phase and the curve is a partial record
    pub truncated: bool,
}

impl BreakthroughCurve {
    pub fn phase_samples(&self, phase: Phase) -> impl Iterator<Item = &CurveSample> {
        self.samples.iter().filter(move |s| s.phase == phase)
    }

    pub fn service(&self) -> impl Iterator<Item = &CurveSample> {
        self.phase_samples(Phase::Service)
    }

    /// Samples of every regeneration stage in order.
    pub fn regeneration(&self) -> impl Iterator<Item = &CurveSample> {
        self.samples
            .iter()
            .filter(|s| matches!(s.phase, Phase::RegenStage(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample(bv: f64, hardness: f64) -> CurveSample {
        CurveSample {
            bv,
            phase: Phase::Service,
            ca_mg_l: hardness / 2.5 * 0.8,
            mg_mg_l: hardness / 4.1 * 0.2,
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

    #[test]
    fn lerp_is_linear_in_every_column() {
        let a = sample(10.0, 2.0);
        let b = sample(12.0, 6.0);
        let mid = CurveSample::lerp(&a, &b, 0.5);
        assert!((mid.bv - 11.0).abs() < 1e-12);
        assert!((mid.hardness_mg_l_caco3 - 4.0).abs() < 1e-12);
        assert!((mid.ca_mg_l - (a.ca_mg_l + b.ca_mg_l) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn criterion_reads_the_right_column() {
        let s = sample(5.0, 3.0);
        assert_eq!(s.criterion_value(Criterion::HardnessCaCo3), 3.0);
        assert_eq!(s.criterion_value(Criterion::Alkalinity), 100.0);
        assert_eq!(s.criterion_value(Criterion::SingleIon(Ion::Na)), 900.0);
    }
}
