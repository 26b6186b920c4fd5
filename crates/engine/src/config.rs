//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use curves::Criterion;

/// Immutable configuration threaded into the controller at construction.
///
/// There is deliberately no process-wide settings object: two controllers
/// with different configurations coexist without seeing each other.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// PHREEQC executable; None defers to `PHREEQC_EXE` / PATH lookup
    pub phreeqc_exe: Option<PathBuf>,

    /// Installation root carrying `databases/` and `calibrations/`;
    /// None defers to `IX_DESIGN_MCP_ROOT`
    pub root: Option<PathBuf>,

    /// Hard wall-clock limit per PHREEQC invocation
    pub timeout: Duration,

    /// What breakthrough is detected on. H-form runs with an alkalinity
    /// target switch to the alkalinity criterion through the behavior
    /// record unless this is set to something other than the default.
    pub criterion: Criterion,

    /// Entries held by the per-controller result cache
    pub cache_capacity: usize,

    /// Search budget for staged-optimize regeneration (solver invocations)
    pub optimize_budget: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            phreeqc_exe: None,
            root: None,
            timeout: Duration::from_secs(600),
            criterion: Criterion::HardnessCaCo3,
            cache_capacity: 16,
            optimize_budget: 8,
        }
    }
}

impl EngineConfig {
    /// Default configuration with the environment overrides applied:
    /// `PHREEQC_EXE`, `MCP_SIMULATION_TIMEOUT_S`, `IX_DESIGN_MCP_ROOT`.
    pub fn from_env() -> Self {
        let mut config = EngineConfig::default();
        if let Some(exe) = std::env::var_os(solver::runner::PHREEQC_EXE_ENV) {
            config.phreeqc_exe = Some(PathBuf::from(exe));
        }
        if let Some(root) = std::env::var_os(solver::runner::ROOT_ENV) {
            config.root = Some(PathBuf::from(root));
        }
        if let Some(seconds) = std::env::var(solver::runner::TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.timeout = Duration::from_secs(seconds);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_operating_envelope() {
        let c = EngineConfig::default();
        assert_eq!(c.timeout, Duration::from_secs(600));
        assert_eq!(c.optimize_budget, 8);
        assert!(matches!(c.criterion, Criterion::HardnessCaCo3));
    }
}
