//! # Mission and Link Supervisor
//!
//! The [`Supervisor`] holds everything about the AGV's job that isn't an observation of the world:
//!
//! - the current mission and the status record broadcast to the stations (robot status, cargo,
//!   station request),
//! - the liveness of the vision and control links,
//! - the last status received from a station, and any pending operator drive-away.
//!
//! Navigation only runs while [`Supervisor::stop_mode`] is `None`. The supervisor never drives the
//! motors itself.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod params;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::station::{AgvStatus, Cargo, RobotStatus, StationRequest, StationStatus},
    tc::Tc,
};
use log::{info, warn};
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError, TryLockError,
};

use crate::clock::{poll_until, Clock, WaitOutcome};
use crate::obs_store::LinkListener;
use crate::sensors::{
    object::{ObjectSensor, Recognition},
    SensorError,
};

pub use params::MissionParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The mission supervisor, shared between the control link, the navigation loop, the watchdog and
/// the station report emitter.
pub struct Supervisor {
    params: MissionParams,

    clock: Arc<dyn Clock>,

    record: Mutex<MissionRecord>,

    vision_link: AtomicBool,

    control_link: AtomicBool,

    station: Mutex<StationState>,

    /// Set by the operator, consumed by the docking state
    drive_away: AtomicBool,

    /// Only held while a mission is being selected
    object_sensor: Mutex<Box<dyn ObjectSensor>>,
}

/// The mission and the status broadcast to the stations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MissionRecord {
    pub mission: MissionState,
    pub status: AgvStatus,
}

#[derive(Debug, Default)]
struct StationState {
    last_status: Option<StationStatus>,

    /// A station has reported `Working` since the handshake was last reset
    working_seen: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The job the AGV is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MissionState {
    NoMission,
    Deliver,
    FetchGummy,
    FetchCotton,
    FetchBall,
}

/// The links whose liveness gates navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Datagrams from the vision sensor
    Vision,

    /// The operator control link
    Control,
}

/// Why navigation must currently be stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    NoMission,
    ControlLinkDown,
    VisionLinkDown,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SupervisorError {
    #[error("Mission {0:?} is already active")]
    MissionActive(MissionState),

    #[error("{0:?} cannot be selected as a mission")]
    NotAMission(MissionState),

    #[error("Another mission selection is already in progress")]
    SelectionInProgress,

    #[error("No object was loaded into the container in time")]
    ObjectNotLoaded,

    #[error("The container was not emptied in time")]
    ContainerNotEmpty,

    #[error("Could not recognise the loaded object (recognised as {0:?})")]
    RecognitionFailed(Recognition),

    #[error("The control link was lost while waiting for the container")]
    ControlLinkLost,

    #[error("Object sensor error: {0}")]
    SensorError(SensorError),

    #[error("Drive-away is only possible while stopped at a station, robot is {0:?}")]
    NotDocked(RobotStatus),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MissionState {
    /// The mission selected by a telecommand, if it selects one.
    pub fn from_tc(tc: Tc) -> Option<Self> {
        match tc {
            Tc::Deliver => Some(MissionState::Deliver),
            Tc::FetchGummy => Some(MissionState::FetchGummy),
            Tc::FetchCotton => Some(MissionState::FetchCotton),
            Tc::FetchBall => Some(MissionState::FetchBall),
            Tc::Stop | Tc::DriveAway => None,
        }
    }

    pub fn is_active(&self) -> bool {
        *self != MissionState::NoMission
    }

    /// The request made to the fetch station for this mission.
    fn fetch_request(&self) -> Option<StationRequest> {
        match self {
            MissionState::FetchGummy => Some(StationRequest::LoadGummy),
            MissionState::FetchCotton => Some(StationRequest::LoadCotton),
            MissionState::FetchBall => Some(StationRequest::LoadBall),
            MissionState::Deliver | MissionState::NoMission => None,
        }
    }
}

impl Default for MissionRecord {
    fn default() -> Self {
        Self {
            mission: MissionState::NoMission,
            status: AgvStatus::default(),
        }
    }
}

impl Supervisor {
    /// Create a supervisor with no mission and both links down.
    pub fn new(
        params: MissionParams,
        object_sensor: Box<dyn ObjectSensor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            params,
            clock,
            record: Mutex::new(MissionRecord::default()),
            vision_link: AtomicBool::new(false),
            control_link: AtomicBool::new(false),
            station: Mutex::new(StationState::default()),
            drive_away: AtomicBool::new(false),
            object_sensor: Mutex::new(object_sensor),
        }
    }

    // ---- MISSION SELECTION ----

    /// Select a new mission.
    ///
    /// Blocks while waiting for the container: for a delivery an object must be loaded and
    /// recognised, for a fetch the container must be empty. If the wait fails the mission is
    /// rejected and nothing changes.
    pub fn select_mission(&self, mission: MissionState) -> Result<AgvStatus, SupervisorError> {
        if !mission.is_active() {
            return Err(SupervisorError::NotAMission(mission));
        }

        let current = self.mission();
        if current.is_active() {
            return Err(SupervisorError::MissionActive(current));
        }

        let mut sensor = match self.object_sensor.try_lock() {
            Ok(s) => s,
            Err(TryLockError::WouldBlock) => return Err(SupervisorError::SelectionInProgress),
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
        };

        let (cargo, request) = match mission.fetch_request() {
            Some(request) => {
                info!("Waiting for the container to be emptied");
                self.wait_container(&mut **sensor, false)?;
                (Cargo::Empty, request)
            }
            None => {
                info!("Waiting for an object to be loaded");
                self.wait_container(&mut **sensor, true)?;

                let recognition = sensor
                    .recognise()
                    .map_err(SupervisorError::SensorError)?;
                let cargo = recognition
                    .cargo()
                    .ok_or(SupervisorError::RecognitionFailed(recognition))?;
                (cargo, StationRequest::Unloading)
            }
        };

        let mut record = self.lock_record();
        if record.mission.is_active() {
            return Err(SupervisorError::MissionActive(record.mission));
        }

        record.mission = mission;
        record.status = AgvStatus {
            robot_status: RobotStatus::Idle,
            cargo,
            request,
        };
        self.drive_away.store(false, Ordering::SeqCst);

        info!("Mission {:?} selected ({})", mission, record.status);

        Ok(record.status)
    }

    /// Abandon the current mission, if any.
    ///
    /// The cargo is left as it is, since whatever is in the container is still there.
    pub fn clear_mission(&self) {
        let mut record = self.lock_record();

        if record.mission.is_active() {
            info!("Mission {:?} cleared", record.mission);
        }

        record.mission = MissionState::NoMission;
        record.status.robot_status = RobotStatus::Idle;
        record.status.request = StationRequest::None;
        self.drive_away.store(false, Ordering::SeqCst);
    }

    /// Finish the current mission after leaving the station.
    pub fn complete_mission(&self) {
        let mut record = self.lock_record();

        info!(
            "Mission {:?} complete, carrying {:?}",
            record.mission, record.status.cargo
        );

        record.mission = MissionState::NoMission;
        record.status.robot_status = RobotStatus::Idle;
        record.status.request = StationRequest::None;
    }

    // ---- STATUS RECORD ----

    pub fn mission(&self) -> MissionState {
        self.lock_record().mission
    }

    pub fn record(&self) -> MissionRecord {
        *self.lock_record()
    }

    /// The status record broadcast to the stations.
    pub fn agv_status(&self) -> AgvStatus {
        self.lock_record().status
    }

    pub fn set_robot_status(&self, robot_status: RobotStatus) {
        let mut record = self.lock_record();

        if record.status.robot_status != robot_status {
            info!("Robot status: {:?}", robot_status);
            record.status.robot_status = robot_status;
        }
    }

    /// The station has served the request, update the cargo to match.
    pub fn complete_station_exchange(&self) {
        let mut record = self.lock_record();

        if let Some(cargo) = record.status.request.resulting_cargo() {
            info!("Station served {:?}, now carrying {:?}", record.status.request, cargo);
            record.status.cargo = cargo;
        }
        record.status.request = StationRequest::None;
    }

    /// The robot is leaving the station without the request being served.
    pub fn abandon_station_request(&self) {
        let mut record = self.lock_record();

        if record.status.request != StationRequest::None {
            warn!("Leaving the station with {:?} unserved", record.status.request);
        }
        record.status.request = StationRequest::None;
    }

    // ---- DRIVE AWAY ----

    /// Operator request to leave the station now.
    pub fn request_drive_away(&self) -> Result<(), SupervisorError> {
        let robot_status = self.agv_status().robot_status;

        if robot_status != RobotStatus::StoppedNearStation {
            return Err(SupervisorError::NotDocked(robot_status));
        }

        info!("Drive-away requested");
        self.drive_away.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Consume a pending drive-away request.
    pub fn take_drive_away(&self) -> bool {
        self.drive_away.swap(false, Ordering::SeqCst)
    }

    // ---- STATION ----

    /// Record a status received from a station.
    pub fn set_station_status(&self, status: StationStatus) {
        let mut station = self.lock_station();

        if station.last_status != Some(status) {
            info!("Station status: {:?}", status);
        }

        station.last_status = Some(status);
        if status == StationStatus::Working {
            station.working_seen = true;
        }
    }

    pub fn station_status(&self) -> Option<StationStatus> {
        self.lock_station().last_status
    }

    /// Start waiting for a new station handshake.
    pub fn reset_station_handshake(&self) {
        self.lock_station().working_seen = false;
    }

    /// `true` once the station has been working and is idle again since the last reset.
    pub fn station_finished(&self) -> bool {
        let station = self.lock_station();
        station.working_seen && station.last_status == Some(StationStatus::Idle)
    }

    // ---- LINKS ----

    /// Set the state of a link, returning `true` if it changed.
    pub fn set_link_state(&self, kind: LinkKind, up: bool) -> bool {
        let was_up = self.link_flag(kind).swap(up, Ordering::SeqCst);

        if was_up != up {
            if up {
                info!("{:?} link established", kind);
            } else {
                warn!("{:?} link lost", kind);
            }
        }

        was_up != up
    }

    pub fn link_up(&self, kind: LinkKind) -> bool {
        self.link_flag(kind).load(Ordering::SeqCst)
    }

    /// Why navigation must be stopped, or `None` if it may run.
    pub fn stop_mode(&self) -> Option<StopCause> {
        if !self.mission().is_active() {
            Some(StopCause::NoMission)
        } else if !self.link_up(LinkKind::Control) {
            Some(StopCause::ControlLinkDown)
        } else if !self.link_up(LinkKind::Vision) {
            Some(StopCause::VisionLinkDown)
        } else {
            None
        }
    }

    // ---- PRIVATE ----

    fn link_flag(&self, kind: LinkKind) -> &AtomicBool {
        match kind {
            LinkKind::Vision => &self.vision_link,
            LinkKind::Control => &self.control_link,
        }
    }

    /// Wait for the container to become loaded or empty.
    fn wait_container(
        &self,
        sensor: &mut dyn ObjectSensor,
        loaded: bool,
    ) -> Result<(), SupervisorError> {
        let mut sensor_error = None;

        let outcome = poll_until(
            &*self.clock,
            self.params.load_wait_retries,
            self.params.load_wait_delay_ms,
            || !self.link_up(LinkKind::Control),
            || match sensor.object_loaded() {
                Ok(l) => l == loaded,
                Err(e) => {
                    warn!("Could not check the container: {}", e);
                    sensor_error = Some(e);
                    false
                }
            },
        );

        match (outcome, sensor_error) {
            (WaitOutcome::Met, _) => Ok(()),
            (WaitOutcome::Aborted, _) => Err(SupervisorError::ControlLinkLost),
            (WaitOutcome::Exhausted, Some(e)) => Err(SupervisorError::SensorError(e)),
            (WaitOutcome::Exhausted, None) if loaded => Err(SupervisorError::ObjectNotLoaded),
            (WaitOutcome::Exhausted, None) => Err(SupervisorError::ContainerNotEmpty),
        }
    }

    fn lock_record(&self) -> MutexGuard<'_, MissionRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_station(&self) -> MutexGuard<'_, StationState> {
        self.station.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Listener for the observation store which keeps the supervisor's vision link flag in step with
/// the store's. The store must be the flag's only writer.
pub fn vision_link_listener(supervisor: &Arc<Supervisor>) -> LinkListener {
    let supervisor = supervisor.clone();

    Box::new(move |up| {
        supervisor.set_link_state(LinkKind::Vision, up);
    })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sensors::object::{ColourObjectSensor, ColourParams, ColourSample};
    use crate::sim::{SimColourHandle, SimColourSource};

    /// Light level of the empty container in the simulated sensor.
    pub(crate) const EMPTY_LUX: u16 = 400;

    /// A supervisor with a calibrated simulated object sensor, an empty container and both links
    /// up.
    pub(crate) fn supervisor_with_sensor(
        clock: Arc<ManualClock>,
    ) -> (Supervisor, SimColourHandle) {
        let source = SimColourSource::new(ColourSample {
            r: 0,
            g: 0,
            b: 0,
            lux: EMPTY_LUX,
        });
        let handle = source.handle();

        let params = MissionParams {
            load_wait_retries: 4,
            load_wait_delay_ms: 100,
            colour: ColourParams {
                num_samples: 1,
                sample_delay_ms: 0,
            },
        };

        let mut sensor = ColourObjectSensor::new(source, params.colour, clock.clone());
        sensor.calibrate().unwrap();

        // Empty container reads brighter than the calibration
        handle.set_sample(ColourSample {
            lux: EMPTY_LUX + 50,
            ..Default::default()
        });

        let supervisor = Supervisor::new(params, Box::new(sensor), clock);
        supervisor.set_link_state(LinkKind::Control, true);
        supervisor.set_link_state(LinkKind::Vision, true);

        (supervisor, handle)
    }

    #[test]
    fn test_select_fetch() {
        let clock = Arc::new(ManualClock::new(0));
        let (supervisor, _handle) = supervisor_with_sensor(clock);

        let status = supervisor.select_mission(MissionState::FetchCotton).unwrap();
        assert_eq!(status.request, StationRequest::LoadCotton);
        assert_eq!(status.cargo, Cargo::Empty);
        assert_eq!(supervisor.mission(), MissionState::FetchCotton);
        assert_eq!(supervisor.stop_mode(), None);
    }

    #[test]
    fn test_select_rejected_while_active() {
        let clock = Arc::new(ManualClock::new(0));
        let (supervisor, _handle) = supervisor_with_sensor(clock);

        supervisor.select_mission(MissionState::FetchBall).unwrap();
        assert_eq!(
            supervisor.select_mission(MissionState::FetchGummy),
            Err(SupervisorError::MissionActive(MissionState::FetchBall))
        );
        assert_eq!(supervisor.agv_status().request, StationRequest::LoadBall);

        assert_eq!(
            supervisor.select_mission(MissionState::NoMission),
            Err(SupervisorError::NotAMission(MissionState::NoMission))
        );
    }

    #[test]
    fn test_select_deliver() {
        let clock = Arc::new(ManualClock::new(0));
        let (supervisor, handle) = supervisor_with_sensor(clock);

        // A ball in the container, shading the sensor
        handle.set_sample(ColourSample {
            r: 200,
            g: 200,
            b: 100,
            lux: 100,
        });

        let status = supervisor.select_mission(MissionState::Deliver).unwrap();
        assert_eq!(status.cargo, Cargo::Ball);
        assert_eq!(status.request, StationRequest::Unloading);
    }

    #[test]
    fn test_select_deliver_without_object() {
        let clock = Arc::new(ManualClock::new(0));
        let (supervisor, _handle) = supervisor_with_sensor(clock.clone());

        assert_eq!(
            supervisor.select_mission(MissionState::Deliver),
            Err(SupervisorError::ObjectNotLoaded)
        );

        // Bounded by the retries
        assert_eq!(clock.now_ms(), 300);
        assert_eq!(supervisor.record(), MissionRecord::default());
    }

    #[test]
    fn test_select_deliver_unrecognised() {
        let clock = Arc::new(ManualClock::new(0));
        let (supervisor, handle) = supervisor_with_sensor(clock);

        handle.set_sample(ColourSample {
            r: 50,
            g: 100,
            b: 100,
            lux: 10,
        });

        assert_eq!(
            supervisor.select_mission(MissionState::Deliver),
            Err(SupervisorError::RecognitionFailed(Recognition::Error))
        );
        assert_eq!(supervisor.mission(), MissionState::NoMission);
    }

    #[test]
    fn test_select_fetch_with_full_container() {
        let clock = Arc::new(ManualClock::new(0));
        let (supervisor, handle) = supervisor_with_sensor(clock);

        handle.set_sample(ColourSample {
            lux: 10,
            ..Default::default()
        });

        assert_eq!(
            supervisor.select_mission(MissionState::FetchGummy),
            Err(SupervisorError::ContainerNotEmpty)
        );
    }

    #[test]
    fn test_select_aborts_on_control_link_loss() {
        let clock = Arc::new(ManualClock::new(0));
        let (supervisor, _handle) = supervisor_with_sensor(clock);

        supervisor.set_link_state(LinkKind::Control, false);

        assert_eq!(
            supervisor.select_mission(MissionState::FetchGummy),
            Err(SupervisorError::ControlLinkLost)
        );
    }

    #[test]
    fn test_stop_mode() {
        let clock = Arc::new(ManualClock::new(0));
        let (supervisor, _handle) = supervisor_with_sensor(clock);

        assert_eq!(supervisor.stop_mode(), Some(StopCause::NoMission));

        supervisor.select_mission(MissionState::FetchGummy).unwrap();
        assert_eq!(supervisor.stop_mode(), None);

        assert!(supervisor.set_link_state(LinkKind::Vision, false));
        assert!(!supervisor.set_link_state(LinkKind::Vision, false));
        assert_eq!(supervisor.stop_mode(), Some(StopCause::VisionLinkDown));

        supervisor.set_link_state(LinkKind::Control, false);
        assert_eq!(supervisor.stop_mode(), Some(StopCause::ControlLinkDown));

        supervisor.set_link_state(LinkKind::Control, true);
        supervisor.set_link_state(LinkKind::Vision, true);
        supervisor.clear_mission();
        assert_eq!(supervisor.stop_mode(), Some(StopCause::NoMission));
    }

    #[test]
    fn test_drive_away_only_when_docked() {
        let clock = Arc::new(ManualClock::new(0));
        let (supervisor, _handle) = supervisor_with_sensor(clock);

        supervisor.select_mission(MissionState::FetchGummy).unwrap();
        assert_eq!(
            supervisor.request_drive_away(),
            Err(SupervisorError::NotDocked(RobotStatus::Idle))
        );
        assert!(!supervisor.take_drive_away());

        supervisor.set_robot_status(RobotStatus::StoppedNearStation);
        supervisor.request_drive_away().unwrap();
        assert!(supervisor.take_drive_away());
        assert!(!supervisor.take_drive_away());
    }

    #[test]
    fn test_station_handshake() {
        let clock = Arc::new(ManualClock::new(0));
        let (supervisor, _handle) = supervisor_with_sensor(clock);

        supervisor.set_station_status(StationStatus::Idle);
        supervisor.reset_station_handshake();
        assert!(!supervisor.station_finished());

        supervisor.set_station_status(StationStatus::Working);
        assert!(!supervisor.station_finished());

        supervisor.set_station_status(StationStatus::Idle);
        assert!(supervisor.station_finished());

        supervisor.reset_station_handshake();
        assert!(!supervisor.station_finished());
    }

    #[test]
    fn test_station_exchange() {
        let clock = Arc::new(ManualClock::new(0));
        let (supervisor, _handle) = supervisor_with_sensor(clock);

        supervisor.select_mission(MissionState::FetchGummy).unwrap();
        supervisor.complete_station_exchange();

        let status = supervisor.agv_status();
        assert_eq!(status.cargo, Cargo::Gummy);
        assert_eq!(status.request, StationRequest::None);

        supervisor.complete_mission();
        assert_eq!(supervisor.mission(), MissionState::NoMission);
        assert_eq!(supervisor.agv_status().cargo, Cargo::Gummy);
    }
}
