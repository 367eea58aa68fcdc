//! # Telecommand processor module
//!
//! Applies telecommands from the operator to the [`Supervisor`]. Navigation picks up the effects on
//! its next cycle, this module never touches the drive.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::tc::{Tc, TcResponse};
use log::{debug, info, warn};

use crate::mission::{MissionState, Supervisor};

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Execute a telecommand, returning the response to send back to the operator.
///
/// Selecting a mission blocks while the supervisor waits on the container.
pub fn exec(supervisor: &Supervisor, tc: Tc) -> TcResponse {
    debug!("Received {} command", tc.token());

    match tc {
        Tc::Stop => {
            supervisor.clear_mission();
            TcResponse::Ok
        }
        Tc::DriveAway => match supervisor.request_drive_away() {
            Ok(()) => TcResponse::Ok,
            Err(e) => {
                warn!("Cannot drive away: {}", e);
                TcResponse::CannotExecute
            }
        },
        _ => {
            let mission = match MissionState::from_tc(tc) {
                Some(m) => m,
                None => return TcResponse::Invalid,
            };

            match supervisor.select_mission(mission) {
                Ok(status) => {
                    info!("Accepted {:?}, reporting {}", mission, status);
                    TcResponse::Ok
                }
                Err(e) => {
                    warn!("Cannot select {:?}: {}", mission, e);
                    TcResponse::CannotExecute
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
