//! Motion control module
//!
//! The AGV drives with two steppers, which the drive hardware exposes as a handful of open-ended
//! moves (turn on the spot, straight, backward) plus stop and a step counter. Everything above the
//! drive goes through [`MotionCtrl`], which makes every request idempotent, and bounded maneuvers
//! are built with [`StepMove`].

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod cmd;
mod ctrl;
mod step_move;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

pub use cmd::*;
pub use ctrl::*;
pub use step_move::*;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// The drive hardware.
///
/// Each `start_*` call begins a new open-ended move and resets the step counter.
pub trait Drive: Send {
    fn start_turn_left(&mut self) -> Result<(), ActuationFault>;

    fn start_turn_right(&mut self) -> Result<(), ActuationFault>;

    fn start_straight(&mut self) -> Result<(), ActuationFault>;

    fn start_backward(&mut self) -> Result<(), ActuationFault>;

    fn stop(&mut self) -> Result<(), ActuationFault>;

    /// `true` while the current move is still executing.
    fn is_moving(&self) -> bool;

    /// Steps completed since the current move was started.
    fn steps_completed(&self) -> u64;
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// How bad an actuation fault is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultSeverity {
    /// The drive refused or lost a move but is still usable, e.g. a stall
    Recoverable,

    /// The drive can no longer be trusted to move the robot
    Fatal,
}

/// A fault reported by the drive hardware.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{severity:?} actuation fault: {reason}")]
pub struct ActuationFault {
    pub severity: FaultSeverity,
    pub reason: String,
}

impl ActuationFault {
    pub fn recoverable<S: Into<String>>(reason: S) -> Self {
        Self {
            severity: FaultSeverity::Recoverable,
            reason: reason.into(),
        }
    }

    pub fn fatal<S: Into<String>>(reason: S) -> Self {
        Self {
            severity: FaultSeverity::Fatal,
            reason: reason.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == FaultSeverity::Fatal
    }
}
