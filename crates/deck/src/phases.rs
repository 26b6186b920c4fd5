//! Cycle phases and their shift spans in the punch output.

use serde::{Deserialize, Serialize};

/// One phase of the service/regeneration cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Preload,
    Condition,
    Service,
    Backwash,
    /// 1-based regeneration stage
    RegenStage(usize),
    SlowRinse,
    FastRinse,
}

impl Phase {
    /// Numeric tag punched into the `phase` column.
    pub fn punch_id(&self) -> usize {
        match self {
            Phase::Preload => 0,
            Phase::Condition => 1,
            Phase::Service => 2,
            Phase::Backwash => 3,
            Phase::RegenStage(k) => 10 + k,
            Phase::SlowRinse => 20,
            Phase::FastRinse => 21,
        }
    }

    pub fn from_punch_id(id: usize) -> Option<Phase> {
        match id {
            0 => Some(Phase::Preload),
            1 => Some(Phase::Condition),
            2 => Some(Phase::Service),
            3 => Some(Phase::Backwash),
            20 => Some(Phase::SlowRinse),
            21 => Some(Phase::FastRinse),
            k if (11..20).contains(&k) => Some(Phase::RegenStage(k - 10)),
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Phase::Preload => "preload".into(),
            Phase::Condition => "condition".into(),
            Phase::Service => "service".into(),
            Phase::Backwash => "backwash".into(),
            Phase::RegenStage(k) => format!("regen-stage-{}", k),
            Phase::SlowRinse => "slow-rinse".into(),
            Phase::FastRinse => "fast-rinse".into(),
        }
    }
}

/// Global punched-shift range occupied by one phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PhaseSpan {
    pub phase: Phase,

    /// First global shift of the phase (1-based, inclusive)
    pub first_shift: usize,

    /// Last global shift of the phase (inclusive)
    pub last_shift: usize,
}

impl PhaseSpan {
    pub fn shifts(&self) -> usize {
        self.last_shift - self.first_shift + 1
    }
}

/// Accumulates phase spans while the builder emits TRANSPORT blocks.
#[derive(Debug, Default)]
pub struct PhaseTracker {
    spans: Vec<PhaseSpan>,
    next_shift: usize,
}

impl PhaseTracker {
    pub fn new() -> Self {
        PhaseTracker {
            spans: Vec::new(),
            next_shift: 1,
        }
    }

    /// Record `shifts` punched rows for `phase`.
    pub fn record(&mut self, phase: Phase, shifts: usize) {
        if shifts == 0 {
            return;
        }
        self.spans.push(PhaseSpan {
            phase,
            first_shift: self.next_shift,
            last_shift: self.next_shift + shifts - 1,
        });
        self.next_shift += shifts;
    }

    pub fn into_spans(self) -> Vec<PhaseSpan> {
        self.spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punch_ids_round_trip() {
        for phase in [
            Phase::Preload,
            Phase::Condition,
            Phase::Service,
            Phase::Backwash,
            Phase::RegenStage(1),
            Phase::RegenStage(5),
            Phase::SlowRinse,
            Phase::FastRinse,
        ] {
            assert_eq!(Phase::from_punch_id(phase.punch_id()), Some(phase));
        }
        assert_eq!(Phase::from_punch_id(99), None);
    }

    #[test]
    fn tracker_builds_contiguous_spans() {
        let mut t = PhaseTracker::new();
        t.record(Phase::Service, 100);
        t.record(Phase::Backwash, 0); // skipped phases leave no span
        t.record(Phase::RegenStage(1), 20);
        let spans = t.into_spans();
        assert_eq!(spans.len(), 2);
        assert_eq!((spans[0].first_shift, spans[0].last_shift), (1, 100));
        assert_eq!((spans[1].first_shift, spans[1].last_shift), (101, 120));
        assert_eq!(spans[1].shifts(), 20);
    }
}
