//! Bounded, step-counted moves

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::warn;

use super::{ActuationFault, MotionCmd, MotionCtrl};
use crate::clock::BoundedWait;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A move of a fixed number of steps, which gives up after a timeout.
///
/// The move is polled once per control tick. It starts on the first poll and stops the drive
/// itself when it finishes, either way.
#[derive(Debug, Clone, Copy)]
pub struct StepMove {
    cmd: MotionCmd,
    target_steps: u64,
    timeout_ms: u64,

    /// Set on the first poll
    wait: Option<BoundedWait>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Progress of a [`StepMove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStatus {
    Running,

    /// The target number of steps was reached
    Done,

    /// The timeout elapsed before the target was reached
    TimedOut,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl StepMove {
    pub fn new(cmd: MotionCmd, target_steps: u64, timeout_ms: u64) -> Self {
        Self {
            cmd,
            target_steps,
            timeout_ms,
            wait: None,
        }
    }

    pub fn cmd(&self) -> MotionCmd {
        self.cmd
    }

    /// Advance the move.
    pub fn poll(
        &mut self,
        motion: &mut MotionCtrl,
        now_ms: u64,
    ) -> Result<MoveStatus, ActuationFault> {
        let wait = match self.wait {
            Some(w) => w,
            None => {
                motion.request(self.cmd)?;
                motion.mark_steps();
                self.wait = Some(BoundedWait::start(now_ms, self.timeout_ms));
                return Ok(MoveStatus::Running);
            }
        };

        if motion.steps_since_mark() >= self.target_steps {
            motion.stop()?;
            return Ok(MoveStatus::Done);
        }

        if wait.expired(now_ms) {
            warn!(
                "{:?} move timed out after {} of {} steps",
                self.cmd,
                motion.steps_since_mark(),
                self.target_steps
            );
            motion.stop()?;
            return Ok(MoveStatus::TimedOut);
        }

        // Keep the drive going if anything else stopped it
        motion.request(self.cmd)?;

        Ok(MoveStatus::Running)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::sim::{SimDrive, SimDriveParams};
    use std::sync::Arc;

    #[test]
    fn test_move_completes() {
        let clock = Arc::new(ManualClock::new(0));
        let drive = SimDrive::new(SimDriveParams::default(), clock.clone());
        let handle = drive.handle();
        let mut motion = MotionCtrl::new(Box::new(drive));

        // 400 steps at 800 steps/s
        let mut mv = StepMove::new(MotionCmd::Backward, 400, 5000);

        assert_eq!(mv.poll(&mut motion, clock.now_ms()).unwrap(), MoveStatus::Running);
        clock.advance(250);
        assert_eq!(mv.poll(&mut motion, clock.now_ms()).unwrap(), MoveStatus::Running);
        clock.advance(250);
        assert_eq!(mv.poll(&mut motion, clock.now_ms()).unwrap(), MoveStatus::Done);

        assert_eq!(handle.history(), vec![MotionCmd::Backward, MotionCmd::Stop]);
    }

    #[test]
    fn test_move_times_out() {
        let clock = Arc::new(ManualClock::new(0));
        let drive = SimDrive::new(SimDriveParams::default(), clock.clone());
        let handle = drive.handle();
        let mut motion = MotionCtrl::new(Box::new(drive));

        let mut mv = StepMove::new(MotionCmd::Straight, 400, 200);
        mv.poll(&mut motion, clock.now_ms()).unwrap();

        // Wheels slipping, no progress
        handle.set_stalled(true);
        clock.advance(201);
        assert_eq!(mv.poll(&mut motion, clock.now_ms()).unwrap(), MoveStatus::TimedOut);
        assert_eq!(motion.current(), MotionCmd::Stop);
    }
}
