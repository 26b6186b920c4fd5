//! PHREEQC subprocess supervision.
//!
//! The geochemical solve is an external process: PHREEQC is invoked with
//! three file arguments (input, output, database) inside a scratch directory
//! that lives exactly as long as the run. Everything here is about doing
//! that safely: bounded capture of the process streams, a hard wall-clock
//! deadline, kill-on-drop so panics and cancellations never leak a child,
//! and a tolerant parse of the SELECTED_OUTPUT table.

pub mod runner;
pub mod table;

pub use runner::{CancelToken, PhreeqcRunner, RunArtifacts};
pub use table::PunchTable;

use thiserror::Error;

/// How a PHREEQC run failed to converge, recognized from the diagnostic
/// strings the solver prints before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceFailure {
    /// "... has not converged ..."
    NotConverged,
    /// "Numerical method failed" or the psi-average iteration cap
    NumericalFailure,
}

impl ConvergenceFailure {
    /// Scan captured output for a known diagnostic.
    pub fn scan(text: &str) -> Option<ConvergenceFailure> {
        if text.contains("has not converged") {
            Some(ConvergenceFailure::NotConverged)
        } else if text.contains("Numerical method failed")
            || text.contains("Too many iterations in calc_psi_avg")
        {
            Some(ConvergenceFailure::NumericalFailure)
        } else {
            None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConvergenceFailure::NotConverged => "NotConverged",
            ConvergenceFailure::NumericalFailure => "NumericalFailure",
        }
    }
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("PHREEQC executable not found: {0}")]
    NotInstalled(String),

    #[error("PHREEQC run exceeded the {seconds} s wall-clock limit")]
    Timeout { seconds: u64, stderr_tail: String },

    #[error("PHREEQC exited with code {code}")]
    NonZeroExit { code: i32, stderr_tail: String },

    #[error("PHREEQC failed to converge ({})", .failure.label())]
    NotConverged {
        failure: ConvergenceFailure,
        /// Punch rows written before the failing shift, when parseable
        partial: Option<PunchTable>,
        stderr_tail: String,
    },

    #[error("malformed SELECTED_OUTPUT: {reason}")]
    MalformedOutput { reason: String },

    #[error("simulation canceled")]
    Canceled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SolverError>;
