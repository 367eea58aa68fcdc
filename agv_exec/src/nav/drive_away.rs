//! # [`NavMgrState::DriveAway`] implementation

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::station::RobotStatus;
use log::info;
use serde::Deserialize;

use super::{NavError, NavParams, NavPersistantData, StackAction, StepOutput};
use crate::{
    motion::{MotionCmd, MoveStatus, StepMove},
    obs_store::Side,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// DriveAway state.
///
/// Reverses away from the station then turns about, completing the mission and clearing the
/// stack once done. The turn is cut short if an obstacle appears on the side being turned into.
#[derive(Debug, Default)]
pub struct DriveAway {
    /// Side of the about turn, set once the reverse is done
    turn_side: Option<Side>,

    mv: Option<StepMove>,

    announced: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveAwayParams {
    /// Length of the reverse away from the station, steps
    pub reverse_steps: u64,

    /// Length of a 180 degree turn on the spot, steps
    pub turn_180_steps: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DriveAway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(
        &mut self,
        params: &NavParams,
        persistant: &mut NavPersistantData,
    ) -> Result<StepOutput, NavError> {
        let obs = persistant.obs;
        let now_ms = persistant.now_ms;

        if !self.announced {
            persistant
                .supervisor
                .set_robot_status(RobotStatus::DrivingAway);
            self.announced = true;
        }

        if let Some(side) = self.turn_side {
            if !obs.flank_clear(side, params.us_min_trigger_cm) {
                info!("About turn cut short by an obstacle to the {:?}", side);
                return self.finish(persistant);
            }
        }

        let turn_side = self.turn_side;
        let mv = self.mv.get_or_insert_with(|| match turn_side {
            None => StepMove::new(
                MotionCmd::Backward,
                params.drive_away.reverse_steps,
                params.mnvr_timeout_ms,
            ),
            Some(side) => StepMove::new(
                MotionCmd::turn(side),
                params.drive_away.turn_180_steps,
                params.mnvr_timeout_ms,
            ),
        });

        if mv.poll(&mut persistant.motion, now_ms)? == MoveStatus::Running {
            return Ok(StepOutput::none());
        }
        self.mv = None;

        match self.turn_side {
            None => {
                let side = obs.clearer_side(persistant.scan_dir);
                info!("Clear of the station, turning about to the {:?}", side);
                self.turn_side = Some(side);
                Ok(StepOutput::none())
            }
            Some(_) => self.finish(persistant),
        }
    }

    fn finish(&mut self, persistant: &mut NavPersistantData) -> Result<StepOutput, NavError> {
        persistant.motion.stop()?;
        persistant.supervisor.complete_mission();
        persistant.reset_lock();

        Ok(StepOutput::with(StackAction::Clear))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::mission::MissionState;
    use crate::nav::{dock::test::docked, test::Harness, NavState};

    fn driving_away() -> Harness {
        let mut h = docked();
        h.supervisor.request_drive_away().unwrap();
        assert_eq!(h.step_after(50), NavState::DrivingAway);

        h.ranges([100.0; 5]);
        h
    }

    #[test]
    fn test_reverse_then_turn() {
        let mut h = driving_away();

        h.step_after(50);
        assert_eq!(h.drive.current(), MotionCmd::Backward);
        assert_eq!(
            h.supervisor.agv_status().robot_status,
            RobotStatus::DrivingAway
        );

        // 800 steps at 800 steps/s
        h.step_after(1000);
        h.step_after(50);
        assert_eq!(h.drive.current(), MotionCmd::TurnLeft);

        // 1600 steps
        assert_eq!(h.step_after(2000), NavState::Idle);
        assert_eq!(h.drive.current(), MotionCmd::Stop);

        assert_eq!(h.supervisor.mission(), MissionState::NoMission);
        assert_eq!(
            h.supervisor.agv_status().robot_status,
            RobotStatus::Idle
        );
        assert!(!h.nav.persistant.inner_circle);

        // Stays idle without a mission
        assert_eq!(h.step_after(50), NavState::Idle);
    }

    #[test]
    fn test_turn_cut_short() {
        let mut h = driving_away();

        h.step_after(50);
        h.step_after(1000);
        h.step_after(50);
        assert_eq!(h.drive.current(), MotionCmd::TurnLeft);

        h.ranges([3.0, 100.0, 100.0, 100.0, 100.0]);
        assert_eq!(h.step_after(50), NavState::Idle);
        assert_eq!(h.drive.current(), MotionCmd::Stop);
        assert_eq!(h.supervisor.mission(), MissionState::NoMission);
    }
}
