//! Idempotent motion control

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, trace};

use super::{ActuationFault, Drive, MotionCmd};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Owner of the drive.
///
/// Requests are only forwarded to the drive when they would change what it is doing: asking for
/// the command the drive is already executing does nothing. The only exception is a move which
/// the drive has finished on its own, which is restarted.
pub struct MotionCtrl {
    drive: Box<dyn Drive>,

    /// The last command forwarded to the drive
    current: MotionCmd,

    /// Drive step count at the last mark
    step_mark: u64,

    /// Number of calls made to the drive, for diagnostics
    num_actuations: u64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MotionCtrl {
    /// Take ownership of the drive. The drive is assumed to be stopped.
    pub fn new(drive: Box<dyn Drive>) -> Self {
        Self {
            drive,
            current: MotionCmd::Stop,
            step_mark: 0,
            num_actuations: 0,
        }
    }

    /// Request the drive executes `cmd`.
    pub fn request(&mut self, cmd: MotionCmd) -> Result<(), ActuationFault> {
        if cmd == MotionCmd::Stop {
            return self.stop();
        }

        if cmd == self.current && self.drive.is_moving() {
            trace!("{:?} already executing", cmd);
            return Ok(());
        }

        debug!("Motion command {:?}", cmd);
        self.num_actuations += 1;

        // Only record the command once the drive has accepted it, so a refused command is retried
        // on the next request
        match cmd {
            MotionCmd::TurnLeft => self.drive.start_turn_left(),
            MotionCmd::TurnRight => self.drive.start_turn_right(),
            MotionCmd::Straight => self.drive.start_straight(),
            MotionCmd::Backward => self.drive.start_backward(),
            MotionCmd::Stop => self.drive.stop(),
        }?;

        self.current = cmd;
        self.step_mark = 0;

        Ok(())
    }

    /// Stop the drive, if it isn't already stopped.
    pub fn stop(&mut self) -> Result<(), ActuationFault> {
        if self.current == MotionCmd::Stop {
            return Ok(());
        }

        self.force_stop()
    }

    /// Stop the drive regardless of the last command.
    pub fn force_stop(&mut self) -> Result<(), ActuationFault> {
        debug!("Motion command Stop");
        self.num_actuations += 1;

        // The drive is treated as stopped even if it reported a fault, so that the next request
        // is always forwarded
        self.current = MotionCmd::Stop;
        self.step_mark = 0;

        self.drive.stop()
    }

    /// Start counting steps from now.
    pub fn mark_steps(&mut self) {
        self.step_mark = self.drive.steps_completed();
    }

    /// Steps completed by the current move since the last mark, or since the move started.
    pub fn steps_since_mark(&self) -> u64 {
        self.drive.steps_completed().saturating_sub(self.step_mark)
    }

    /// The last command forwarded to the drive.
    pub fn current(&self) -> MotionCmd {
        self.current
    }

    pub fn is_moving(&self) -> bool {
        self.drive.is_moving()
    }

    pub fn num_actuations(&self) -> u64 {
        self.num_actuations
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sim::{SimDrive, SimDriveParams};
    use std::sync::Arc;

    fn setup() -> (MotionCtrl, crate::sim::SimDriveHandle, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let drive = SimDrive::new(SimDriveParams::default(), clock.clone());
        let handle = drive.handle();
        (MotionCtrl::new(Box::new(drive)), handle, clock)
    }

    #[test]
    fn test_request_is_idempotent() {
        let (mut ctrl, handle, clock) = setup();

        ctrl.request(MotionCmd::TurnLeft).unwrap();
        clock.advance(100);
        ctrl.request(MotionCmd::TurnLeft).unwrap();

        assert_eq!(handle.history(), vec![MotionCmd::TurnLeft]);
        assert_eq!(ctrl.num_actuations(), 1);

        ctrl.request(MotionCmd::Straight).unwrap();
        ctrl.stop().unwrap();
        ctrl.stop().unwrap();

        assert_eq!(
            handle.history(),
            vec![MotionCmd::TurnLeft, MotionCmd::Straight, MotionCmd::Stop]
        );
    }

    #[test]
    fn test_finished_move_is_restarted() {
        let (mut ctrl, handle, clock) = setup();

        ctrl.request(MotionCmd::Straight).unwrap();

        // Long enough for the sim to finish its longest move
        clock.advance(10_000_000);
        assert!(!ctrl.is_moving());

        ctrl.request(MotionCmd::Straight).unwrap();
        assert_eq!(
            handle.history(),
            vec![MotionCmd::Straight, MotionCmd::Straight]
        );
        assert_eq!(ctrl.steps_since_mark(), 0);
    }

    #[test]
    fn test_step_mark() {
        let (mut ctrl, _handle, clock) = setup();
        let steps_per_s = SimDriveParams::default().steps_per_s;

        ctrl.request(MotionCmd::Backward).unwrap();
        clock.advance(1000);
        assert_eq!(ctrl.steps_since_mark(), steps_per_s);

        ctrl.mark_steps();
        assert_eq!(ctrl.steps_since_mark(), 0);
        clock.advance(500);
        assert_eq!(ctrl.steps_since_mark(), steps_per_s / 2);
    }

    #[test]
    fn test_refused_command_is_retried() {
        let (mut ctrl, handle, _clock) = setup();

        handle.inject_fault(ActuationFault::recoverable("stall"));
        assert!(ctrl.request(MotionCmd::TurnRight).is_err());
        assert_eq!(ctrl.current(), MotionCmd::Stop);

        ctrl.request(MotionCmd::TurnRight).unwrap();
        assert_eq!(ctrl.current(), MotionCmd::TurnRight);
        assert_eq!(handle.history(), vec![MotionCmd::TurnRight]);
    }
}
