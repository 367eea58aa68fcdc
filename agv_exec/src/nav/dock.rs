//! # [`NavMgrState::Dock`] implementation

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::station::RobotStatus;
use log::{info, warn};
use serde::Deserialize;

use super::{
    states::DriveAway, NavError, NavMgrState, NavParams, NavPersistantData, StackAction,
    StepOutput,
};
use crate::{
    clock::BoundedWait,
    motion::{MotionCmd, MoveStatus, StepMove},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Dock state.
///
/// Creeps forward to touch the station, then waits stopped for the station to serve the request.
/// The station signals it is done by reporting `Working` and then `Idle`. The wait also ends on
/// an operator drive-away, or after a timeout.
#[derive(Debug)]
pub struct Dock {
    creep: StepMove,

    /// Started once the robot has stopped at the station
    wait: Option<BoundedWait>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockParams {
    /// Length of the final creep toward the station, steps
    pub creep_steps: u64,

    /// Maximum time to wait for the station, ms
    pub wait_timeout_ms: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Dock {
    pub fn new(params: &NavParams) -> Self {
        Self {
            creep: StepMove::new(
                MotionCmd::Straight,
                params.dock.creep_steps,
                params.mnvr_timeout_ms,
            ),
            wait: None,
        }
    }

    pub fn step(
        &mut self,
        params: &NavParams,
        persistant: &mut NavPersistantData,
    ) -> Result<StepOutput, NavError> {
        let now_ms = persistant.now_ms;

        let wait = match self.wait {
            Some(w) => w,
            None => {
                if self.creep.poll(&mut persistant.motion, now_ms)? == MoveStatus::Running {
                    return Ok(StepOutput::none());
                }

                info!("Stopped at the station, waiting for it to serve the request");
                persistant
                    .supervisor
                    .set_robot_status(RobotStatus::StoppedNearStation);
                persistant.supervisor.reset_station_handshake();

                self.wait = Some(BoundedWait::start(now_ms, params.dock.wait_timeout_ms));
                return Ok(StepOutput::none());
            }
        };

        let supervisor = &persistant.supervisor;

        if supervisor.take_drive_away() {
            info!("Leaving the station on operator request");
            supervisor.abandon_station_request();
        } else if supervisor.station_finished() {
            supervisor.complete_station_exchange();
        } else if wait.expired(now_ms) {
            warn!(
                "Station did not finish within {} ms, leaving",
                params.dock.wait_timeout_ms
            );
            supervisor.abandon_station_request();
        } else {
            persistant.motion.stop()?;
            return Ok(StepOutput::none());
        }

        Ok(StepOutput::with(StackAction::Replace(
            NavMgrState::DriveAway(DriveAway::new()),
        )))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
