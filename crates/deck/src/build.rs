//! Full-cycle deck assembly per resin class.

use cells::{CellPlan, Vessel};
use resin::{FlowDirection, Regenerant, RegenerationPlan, ResinKind, ResinSpec};
use water::NormalizedWater;

use crate::blocks::{self, num, SolutionLine};
use crate::exchange;
use crate::phases::{Phase, PhaseTracker};
use crate::surface;
use crate::{Database, Deck, DeckError, Result};

/// Everything the builder reads. The builder never mutates any of it.
#[derive(Debug, Clone, Copy)]
pub struct DeckContext<'a> {
    pub water: &'a NormalizedWater,
    pub vessel: &'a Vessel,
    pub spec: &'a ResinSpec,
    pub regen: &'a RegenerationPlan,
    pub plan: &'a CellPlan,
}

/// Sodium level of the preconditioning brine (mg/L). Calibrated to sit in
/// the ionic environment of a Na-loaded exchanger so the conditioning
/// transport does not shock cell 1.
const BRINE_NA_MG_L: f64 = 30000.0;

/// Background after a finished regeneration: dilute NaCl trace.
const BACKGROUND_NA_MG_L: f64 = 50.0;

/// Rinse water sodium (mg/L)
const RINSE_NA_MG_L: f64 = 10.0;

/// Backwash volume (BV) when the plan enables backwash
const BACKWASH_BV: f64 = 1.5;

/// Chloride level of the H-form preload acid (mg/L); carries `charge` so
/// PHREEQC trims it to electroneutrality against the pH 0.5 proton load.
const PRELOAD_ACID_CL_MG_L: f64 = 11200.0;
const PRELOAD_ACID_PH: f64 = 0.5;

/// Ionic strength above which the Pitzer model replaces Debye-Hueckel.
const PITZER_IONIC_STRENGTH: f64 = 0.5;

/// Pick the thermodynamic database for a run. H-form beds always get the
/// default database: pitzer.dat has no surface-complexation support.
pub fn select_database(water: &NormalizedWater, spec: &ResinSpec) -> Database {
    if spec.kind.uses_surface() {
        Database::Phreeqc
    } else if water.ionic_strength_mol_l < PITZER_IONIC_STRENGTH {
        Database::Phreeqc
    } else {
        Database::Pitzer
    }
}

/// Build the full-cycle deck for the context's resin class.
pub fn build(ctx: &DeckContext) -> Result<Deck> {
    ctx.spec.validate()?;
    ctx.regen
        .validate(ctx.spec.kind, ctx.water.alkalinity_mg_l_caco3)?;
    match ctx.spec.kind {
        ResinKind::Sac => build_sac(ctx),
        ResinKind::WacNa => build_wac_na(ctx),
        ResinKind::WacH => build_wac_h(ctx),
    }
}

/// Total regenerant volume in bed volumes for the planned dose; zero dose
/// yields zero BV and the builder emits no regeneration transport at all.
pub fn regenerant_bv(plan: &CellPlan, regen: &RegenerationPlan) -> f64 {
    let g_per_l_solution = regen.regenerant.solution_density_kg_m3(regen.strength_wt_pct)
        * regen.strength_wt_pct
        / 100.0;
    if g_per_l_solution <= 0.0 || regen.dose_g_per_l <= 0.0 {
        return 0.0;
    }
    let volume_l = regen.dose_g_per_l * plan.column_resin_l / g_per_l_solution;
    volume_l / plan.total_pore_kg
}

fn shifts_for(plan: &CellPlan, bv: f64) -> usize {
    if bv <= 0.0 {
        0
    } else {
        (bv * plan.cells as f64).ceil() as usize
    }
}

fn balanced_nacl(na_mg_l: f64) -> [SolutionLine; 2] {
    let cl_mg_l = na_mg_l / 22.99 * 35.453;
    [
        SolutionLine {
            species: "Na",
            mg_l: na_mg_l,
            suffix: None,
        },
        SolutionLine {
            species: "Cl",
            mg_l: cl_mg_l,
            suffix: None,
        },
    ]
}

fn regenerant_lines(regen: &RegenerationPlan) -> (f64, Vec<SolutionLine>) {
    let n = regen.regenerant.normality_eq_l(regen.strength_wt_pct);
    match regen.regenerant {
        Regenerant::NaCl => (
            7.0,
            vec![
                SolutionLine {
                    species: "Na",
                    mg_l: n * 22990.0,
                    suffix: None,
                },
                SolutionLine {
                    species: "Cl",
                    mg_l: n * 35453.0,
                    suffix: None,
                },
            ],
        ),
        Regenerant::HCl => (
            -n.log10(),
            vec![SolutionLine {
                species: "Cl",
                mg_l: n * 35453.0,
                suffix: None,
            }],
        ),
        Regenerant::H2SO4 => (
            -n.log10(),
            vec![SolutionLine {
                species: "S(6)",
                mg_l: n * 48030.0,
                suffix: Some("as SO4"),
            }],
        ),
        Regenerant::NaOH => (
            14.0 + n.log10(),
            vec![SolutionLine {
                species: "Na",
                mg_l: n * 22990.0,
                suffix: None,
            }],
        ),
    }
}

/// State kinds a resin class carries through SAVE/USE.
fn carried_state(kind: ResinKind) -> &'static [&'static str] {
    if kind.uses_surface() {
        &["solution", "surface"]
    } else {
        &["solution", "exchange"]
    }
}

/// Emit the shared cycle tail: backwash, regeneration stages, slow and
/// fast rinse. Returns the regenerant BV actually emitted.
fn emit_cycle_tail(
    buf: &mut String,
    tracker: &mut PhaseTracker,
    ctx: &DeckContext,
) -> Result<f64> {
    let plan = ctx.plan;
    let regen = ctx.regen;
    let kinds = carried_state(ctx.spec.kind);

    if regen.backwash {
        let shifts = shifts_for(plan, BACKWASH_BV);
        blocks::solution_custom(
            buf,
            "0",
            "Backwash water",
            ctx.water.temperature_c,
            7.0,
            &balanced_nacl(RINSE_NA_MG_L),
        )?;
        blocks::use_state(buf, plan.cells, kinds)?;
        blocks::user_punch(buf, Phase::Backwash, plan)?;
        blocks::transport(buf, plan, shifts, true)?;
        blocks::save_state(buf, plan.cells, kinds)?;
        blocks::end(buf)?;
        tracker.record(Phase::Backwash, shifts);
    }

    let total_regen_bv = regenerant_bv(plan, regen);
    if total_regen_bv > 0.0 {
        let stage_bv = total_regen_bv / regen.stages as f64;
        let forward = regen.direction == FlowDirection::Co;
        let (ph, lines) = regenerant_lines(regen);
        for stage in 1..=regen.stages {
            let shifts = shifts_for(plan, stage_bv);
            blocks::solution_custom(
                buf,
                "0",
                &format!(
                    "Regenerant stage {} of {} ({} {}%wt)",
                    stage,
                    regen.stages,
                    regen.regenerant.formula(),
                    num(regen.strength_wt_pct)
                ),
                ctx.water.temperature_c,
                ph,
                &lines,
            )?;
            blocks::use_state(buf, plan.cells, kinds)?;
            blocks::user_punch(buf, Phase::RegenStage(stage), plan)?;
            blocks::transport(buf, plan, shifts, forward)?;
            blocks::save_state(buf, plan.cells, kinds)?;
            blocks::end(buf)?;
            tracker.record(Phase::RegenStage(stage), shifts);
        }

        // Slow rinse displaces regenerant in the same direction; the fast
        // rinse re-establishes service flow.
        for (phase, bv, forward) in [
            (Phase::SlowRinse, regen.slow_rinse_bv, forward),
            (Phase::FastRinse, regen.fast_rinse_bv, true),
        ] {
            let shifts = shifts_for(plan, bv);
            if shifts == 0 {
                continue;
            }
            blocks::solution_custom(
                buf,
                "0",
                &format!("{} water", phase.label()),
                ctx.water.temperature_c,
                7.0,
                &balanced_nacl(RINSE_NA_MG_L),
            )?;
            blocks::use_state(buf, plan.cells, kinds)?;
            blocks::user_punch(buf, phase, plan)?;
            blocks::transport(buf, plan, shifts, forward)?;
            blocks::save_state(buf, plan.cells, kinds)?;
            blocks::end(buf)?;
            tracker.record(phase, shifts);
        }
    }

    Ok(total_regen_bv)
}

fn deck_head(buf: &mut String, database: Database, title: &str) -> Result<()> {
    blocks::title(buf, title)?;
    blocks::database_line(buf, database.file_name())?;
    blocks::knobs_block(buf)?;
    blocks::selected_output(buf, "selected.dat")?;
    Ok(())
}

/// SAC deck: single preconditioning pass, then the cycle.
pub fn build_sac(ctx: &DeckContext) -> Result<Deck> {
    let plan = ctx.plan;
    let database = select_database(ctx.water, ctx.spec);
    let mut buf = String::new();
    let mut tracker = PhaseTracker::new();

    deck_head(
        &mut buf,
        database,
        &format!(
            "SAC softening cycle, {} m bed x {} m dia",
            num(ctx.vessel.bed_depth_m),
            num(ctx.vessel.diameter_m)
        ),
    )?;
    exchange::master_species(&mut buf, ResinKind::Sac)?;
    exchange::species(&mut buf, ctx.spec)?;
    blocks::solution_custom(
        &mut buf,
        &format!("1-{}", plan.cells),
        "Regenerant-displaced background",
        ctx.water.temperature_c,
        7.0,
        &balanced_nacl(BACKGROUND_NA_MG_L),
    )?;
    exchange::exchangers(&mut buf, ctx.spec, plan)?;
    blocks::save_state(&mut buf, plan.cells, &["solution", "exchange"])?;
    blocks::end(&mut buf)?;

    // Service
    blocks::solution_feed(&mut buf, "0", "Feed water", ctx.water)?;
    blocks::use_state(&mut buf, plan.cells, &["solution", "exchange"])?;
    blocks::user_punch(&mut buf, Phase::Service, plan)?;
    blocks::transport(&mut buf, plan, plan.service_shifts, true)?;
    blocks::save_state(&mut buf, plan.cells, &["solution", "exchange"])?;
    blocks::end(&mut buf)?;
    tracker.record(Phase::Service, plan.service_shifts);

    let regenerant_bv = emit_cycle_tail(&mut buf, &mut tracker, ctx)?;

    Ok(Deck {
        text: buf,
        database,
        phases: tracker.into_spans(),
        punch_file: "selected.dat".into(),
        regenerant_bv,
    })
}

/// Na-form WAC decks use the mandatory three-stage pattern: preload,
/// condition, production. A single-stage deck does not converge for
/// realistic capacities; the staged SAVE/USE walk lets the exchanger
/// profile relax before the true feed arrives.
pub fn build_wac_na(ctx: &DeckContext) -> Result<Deck> {
    let plan = ctx.plan;
    let database = select_database(ctx.water, ctx.spec);
    let mut buf = String::new();
    let mut tracker = PhaseTracker::new();

    deck_head(
        &mut buf,
        database,
        &format!(
            "WAC Na-form cycle, {} m bed x {} m dia",
            num(ctx.vessel.bed_depth_m),
            num(ctx.vessel.diameter_m)
        ),
    )?;
    exchange::master_species(&mut buf, ResinKind::WacNa)?;
    exchange::species(&mut buf, ctx.spec)?;

    // Stage 1: preload every cell with brine and charge the exchanger.
    blocks::solution_custom(
        &mut buf,
        &format!("1-{}", plan.cells),
        "Preload brine",
        ctx.water.temperature_c,
        8.0,
        &balanced_nacl(BRINE_NA_MG_L),
    )?;
    exchange::exchangers(&mut buf, ctx.spec, plan)?;
    blocks::save_state(&mut buf, plan.cells, &["solution", "exchange"])?;
    blocks::end(&mut buf)?;
    tracker.record(Phase::Preload, 0);

    // Stage 2: condition with brine feed to smooth the profile.
    blocks::solution_custom(
        &mut buf,
        "0",
        "Conditioning brine feed",
        ctx.water.temperature_c,
        8.0,
        &balanced_nacl(BRINE_NA_MG_L),
    )?;
    blocks::use_state(&mut buf, plan.cells, &["solution", "exchange"])?;
    blocks::user_punch(&mut buf, Phase::Condition, plan)?;
    blocks::transport(&mut buf, plan, plan.condition_shifts, true)?;
    blocks::save_state(&mut buf, plan.cells, &["solution", "exchange"])?;
    blocks::end(&mut buf)?;
    tracker.record(Phase::Condition, plan.condition_shifts);

    // Stage 3: production with the true feed.
    blocks::solution_feed(&mut buf, "0", "Feed water", ctx.water)?;
    blocks::use_state(&mut buf, plan.cells, &["solution", "exchange"])?;
    blocks::user_punch(&mut buf, Phase::Service, plan)?;
    blocks::transport(&mut buf, plan, plan.service_shifts, true)?;
    blocks::save_state(&mut buf, plan.cells, &["solution", "exchange"])?;
    blocks::end(&mut buf)?;
    tracker.record(Phase::Service, plan.service_shifts);

    let regenerant_bv = emit_cycle_tail(&mut buf, &mut tracker, ctx)?;

    Ok(Deck {
        text: buf,
        database,
        phases: tracker.into_spans(),
        punch_file: "selected.dat".into(),
        regenerant_bv,
    })
}

pub fn build_wac_h(ctx: &DeckContext) -> Result<Deck> {
    let plan = ctx.plan;
    if ctx.water.alkalinity_mg_l_caco3 <= 0.0 {
        return Err(DeckError::Unbuildable(
            "H-form deck needs feed alkalinity to react against".into(),
        ));
    }
    let database = select_database(ctx.water, ctx.spec);
    let mut buf = String::new();
    let mut tracker = PhaseTracker::new();

    deck_head(
        &mut buf,
        database,
        &format!(
            "WAC H-form dealkalization, {} m bed x {} m dia",
            num(ctx.vessel.bed_depth_m),
            num(ctx.vessel.diameter_m)
        ),
    )?;
    surface::master_species(&mut buf)?;
    surface::species(&mut buf, ctx.spec)?;

    // Preload: acid placeholder drives every site to Wac_sOH before the
    // feed ever touches the bed.
    blocks::solution_custom(
        &mut buf,
        &format!("1-{}", plan.cells),
        "Acid preload placeholder",
        ctx.water.temperature_c,
        PRELOAD_ACID_PH,
        &[SolutionLine {
            species: "Cl",
            mg_l: PRELOAD_ACID_CL_MG_L,
            suffix: Some("charge"),
        }],
    )?;
    surface::surfaces(&mut buf, ctx.spec, plan)?;
    blocks::save_state(&mut buf, plan.cells, &["solution", "surface"])?;
    blocks::end(&mut buf)?;
    tracker.record(Phase::Preload, 0);

    // Production against the saved protonated state.
    blocks::solution_feed(&mut buf, "0", "Feed water", ctx.water)?;
    blocks::use_state(&mut buf, plan.cells, &["solution", "surface"])?;
    blocks::user_punch(&mut buf, Phase::Service, plan)?;
    blocks::transport(&mut buf, plan, plan.service_shifts, true)?;
    blocks::save_state(&mut buf, plan.cells, &["solution", "surface"])?;
    blocks::end(&mut buf)?;
    tracker.record(Phase::Service, plan.service_shifts);

    let regenerant_bv = emit_cycle_tail(&mut buf, &mut tracker, ctx)?;

    Ok(Deck {
        text: buf,
        database,
        phases: tracker.into_spans(),
        punch_file: "selected.dat".into(),
        regenerant_bv,
    })
}
