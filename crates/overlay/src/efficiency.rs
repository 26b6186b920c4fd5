//! Regeneration-efficiency correlation.

use resin::{FlowDirection, RegenerationPlan, ResinSpec};

/// Fraction of the applied regenerant that productively strips the bed.
///
/// Piecewise in the dose ratio r = applied / stoichiometric:
/// steep returns up to half-stoichiometric, flattening through r = 1,
/// marginal past it. Counter-current flow earns a fixed bonus because the
/// polishing end sees fresh regenerant; a full displacement rinse adds a
/// small credit. Clamped to [0.30, 0.99], except a zero dose which is
/// simply zero.
pub fn regeneration_efficiency(plan: &RegenerationPlan, spec: &ResinSpec) -> f64 {
    if plan.dose_g_per_l <= 0.0 {
        return 0.0;
    }
    let r = plan.dose_ratio(spec.total_capacity_eq_l);

    let base = if r <= 0.5 {
        0.30 + 0.50 * r
    } else if r <= 1.0 {
        0.55 + 0.30 * (r - 0.5)
    } else if r <= 2.0 {
        0.70 + 0.12 * (r - 1.0)
    } else {
        0.82 + 0.02 * (r - 2.0)
    };

    let direction_bonus = match plan.direction {
        FlowDirection::Counter => 0.10,
        FlowDirection::Co => 0.0,
    };
    let rinse_credit = if plan.slow_rinse_bv >= 2.0 { 0.02 } else { 0.0 };

    (base + direction_bonus + rinse_credit).clamp(0.30, 0.99)
}
