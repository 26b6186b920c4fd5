//! Per-resin capability records.
//!
//! The resin classes do not form a type hierarchy; class-specific behavior
//! is a record of plain function pointers the controller resolves once per
//! request. Adding a resin class means adding one record here, not
//! touching the pipeline.

use curves::{BreakthroughCurve, Criterion};
use deck::{Deck, DeckContext};
use overlay::{CalibrationParameters, OverlayReport};
use resin::{RegenerationPlan, ResinKind, ResinSpec, Targets};
use water::NormalizedWater;

type BuildDeck = fn(&DeckContext) -> deck::Result<Deck>;
type ApplyOverlay = fn(
    &mut BreakthroughCurve,
    &NormalizedWater,
    &ResinSpec,
    &RegenerationPlan,
    &CalibrationParameters,
) -> OverlayReport;
type DeriveCriterion = fn(&Targets) -> Criterion;

/// The three class-specific operations the controller dispatches on.
#[derive(Clone, Copy)]
pub struct ResinBehavior {
    pub build_deck: BuildDeck,
    pub apply_overlay: ApplyOverlay,
    pub breakthrough_criterion: DeriveCriterion,
}

fn hardness_criterion(_targets: &Targets) -> Criterion {
    Criterion::HardnessCaCo3
}

/// Dealkalizers break through on alkalinity when an alkalinity target is
/// declared; hardness otherwise.
fn h_form_criterion(targets: &Targets) -> Criterion {
    if targets.alkalinity_mg_l_caco3.is_some() {
        Criterion::Alkalinity
    } else {
        Criterion::HardnessCaCo3
    }
}

const SAC: ResinBehavior = ResinBehavior {
    build_deck: deck::build_sac,
    apply_overlay: overlay::apply_sac,
    breakthrough_criterion: hardness_criterion,
};

const WAC_NA: ResinBehavior = ResinBehavior {
    build_deck: deck::build_wac_na,
    apply_overlay: overlay::apply_wac_na,
    breakthrough_criterion: hardness_criterion,
};

const WAC_H: ResinBehavior = ResinBehavior {
    build_deck: deck::build_wac_h,
    apply_overlay: overlay::apply_wac_h,
    breakthrough_criterion: h_form_criterion,
};

impl ResinBehavior {
    pub fn for_kind(kind: ResinKind) -> &'static ResinBehavior {
        match kind {
            ResinKind::Sac => &SAC,
            ResinKind::WacNa => &WAC_NA,
            ResinKind::WacH => &WAC_H,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h_form_switches_to_alkalinity_when_targeted() {
        let behavior = ResinBehavior::for_kind(ResinKind::WacH);
        let with_alk = Targets {
            hardness_mg_l_caco3: 5.0,
            alkalinity_mg_l_caco3: Some(5.0),
        };
        let without = Targets {
            hardness_mg_l_caco3: 5.0,
            alkalinity_mg_l_caco3: None,
        };
        assert!(matches!(
            (behavior.breakthrough_criterion)(&with_alk),
            Criterion::Alkalinity
        ));
        assert!(matches!(
            (behavior.breakthrough_criterion)(&without),
            Criterion::HardnessCaCo3
        ));
    }

    #[test]
    fn records_point_at_class_specific_code() {
        let sac = ResinBehavior::for_kind(ResinKind::Sac);
        let wac = ResinBehavior::for_kind(ResinKind::WacNa);
        assert!(!std::ptr::fn_addr_eq(sac.build_deck, wac.build_deck));
        assert!(!std::ptr::fn_addr_eq(sac.apply_overlay, wac.apply_overlay));
    }
}
