// RTMCTL ERROR TYPES
// ENGINE FAILURES ARE RECOVERED LOCALLY BY THE CONTROL LOOP.
// NONE OF THEM TERMINATE THE PROCESS.

use thiserror::Error;

use crate::session::SessionState;
use crate::types::Key;

pub type Result<T> = std::result::Result<T, RtmError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RtmError {
    #[error("model {0} is not trained")]
    NotTrained(Key),
    #[error("no model registered for monitor {0}")]
    UnknownModel(Key),
    #[error("bound {bound} unreachable: best prediction {best}")]
    Infeasible { bound: f64, best: f64 },
    #[error("least-squares fit for model {0} is degenerate")]
    DegenerateFit(Key),
    #[error("predictor vector has {got} entries, models expect {expected}")]
    PredictorMismatch { expected: usize, got: usize },
    #[error("no power monitor or binding performance monitor to optimise against")]
    NoTarget,
    #[error("predictor layout changed during the search")]
    Superseded,
}

impl RtmError {
    // UNTRAINED OR MISSING MODELS SEND THE CALLER BACK TO EXPLORATION
    pub fn is_untrained(&self) -> bool {
        matches!(self, Self::NotTrained(_) | Self::UnknownModel(_))
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid session transition {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },
}
