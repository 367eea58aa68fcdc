//! Motion commands

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;

use crate::obs_store::Side;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A motion the drive can be executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MotionCmd {
    Stop,
    TurnLeft,
    TurnRight,
    Straight,
    Backward,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MotionCmd {
    /// Turn on the spot toward the given side.
    pub fn turn(side: Side) -> Self {
        match side {
            Side::Left => MotionCmd::TurnLeft,
            Side::Right => MotionCmd::TurnRight,
        }
    }
}
