//! # NavMgr module
//!
//! This module implements the [`NavMgr`] state machine, which turns the latest observation and the
//! mission state into motion commands. It is stepped once per control cycle by the executable.
//!
//! The states are held on a stack, so that one state can run another as a sub-routine (for
//! example Search pushes Reposition above itself and resumes scanning once it pops):
//!
//! - `Search` - Rotate on the spot looking for the station's tag
//! - `Reposition` - Move somewhere else to get a better view, then pop back to Search
//! - `Follow` - Steer toward the tag, with an outer or an inner lock
//! - `Avoid` - Step around an obstacle blocking the way to the tag
//! - `Dock` - Touch the station and wait for it to serve the request
//! - `DriveAway` - Leave the station and finish the mission
//!
//! Before any state is stepped the manager checks whether navigation must be held (no mission,
//! a link down, or the ultrasonic readings not ready). While held the robot is stopped and the
//! stack is empty, which is reported as [`NavState::Idle`]. Once the hold clears navigation
//! restarts from Search.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod avoid;
mod dock;
mod drive_away;
mod follow;
mod params;
mod reposition;
mod search;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{error, info, warn};
use serde::Serialize;
use std::{fmt::Display, sync::Arc};

use crate::{
    clock::Clock,
    mission::{StopCause, Supervisor},
    motion::{ActuationFault, MotionCtrl},
    obs_store::{Observation, ObservationStore, Side},
};

pub use self::{
    avoid::AvoidParams, dock::DockParams, drive_away::DriveAwayParams, follow::FollowParams,
    params::NavParams, reposition::RepositionParams, search::SearchParams,
};

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub mod states {
    pub use super::avoid::Avoid;
    pub use super::dock::Dock;
    pub use super::drive_away::DriveAway;
    pub use super::follow::{Follow, Lock};
    pub use super::reposition::Reposition;
    pub use super::search::Search;
}

use states::*;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Navigation Manager
pub struct NavMgr {
    /// Parameters for the NavMgr and all its states.
    pub params: NavParams,

    /// Data shared by all states, kept across state changes.
    persistant: NavPersistantData,

    store: Arc<ObservationStore>,

    clock: Arc<dyn Clock>,

    /// Why navigation is currently held, if it is.
    hold: Option<HoldCause>,

    /// The state reported by the last step.
    state: NavState,

    stack: NavStack,
}

/// Data valid over all states.
pub struct NavPersistantData {
    /// The only path to the drive.
    pub motion: MotionCtrl,

    pub supervisor: Arc<Supervisor>,

    /// Snapshot of the observation store taken at the start of the current step.
    pub obs: Observation,

    /// Time at the start of the current step, ms.
    pub now_ms: u64,

    /// Direction Search rotates in.
    pub scan_dir: Side,

    /// Latched once the tag has looked big enough, cleared when a mission ends or navigation is
    /// held.
    pub inner_circle: bool,
}

/// State stacking abstraction.
#[derive(Debug, Default)]
pub struct NavStack(Vec<NavMgrState>);

/// Output of a state's step function.
#[derive(Debug)]
pub struct StepOutput {
    /// Action to perform on the stack itself
    pub action: StackAction,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The externally visible navigation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NavState {
    Idle,
    Searching,
    FollowingOuter,
    FollowingInner,
    Repositioning,
    AvoidingObstacle,
    Docking,
    DrivingAway,
}

/// Why navigation is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldCause {
    /// The supervisor requires the robot to stop
    Stop(StopCause),

    /// No ultrasonic sweep is available
    SensorNotReady,
}

#[derive(Debug, thiserror::Error)]
pub enum NavError {
    #[error("Actuation fault: {0}")]
    Actuation(ActuationFault),

    #[error("Fatal actuation fault, all motion stopped: {0}")]
    Fatal(ActuationFault),
}

#[derive(Debug)]
pub enum NavMgrState {
    Search(Search),
    Reposition(Reposition),
    Follow(Follow),
    Avoid(Avoid),
    Dock(Dock),
    DriveAway(DriveAway),
}

/// Actions that can be performed on the stack at the end of a state's step function.
#[derive(Debug)]
pub enum StackAction {
    None,

    /// Stop the robot and clear the stack
    Abort,

    Clear,
    PushAbove(NavMgrState),
    Pop,
    Replace(NavMgrState),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NavMgr {
    pub fn new(
        params: NavParams,
        motion: MotionCtrl,
        store: Arc<ObservationStore>,
        supervisor: Arc<Supervisor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            params,
            persistant: NavPersistantData {
                motion,
                supervisor,
                obs: Observation::default(),
                now_ms: 0,
                scan_dir: Side::Left,
                inner_circle: false,
            },
            store,
            clock,
            hold: None,
            state: NavState::Idle,
            stack: NavStack::new(),
        }
    }

    /// Run one control cycle.
    ///
    /// Only a fatal actuation fault is returned as an error, after all motion has been stopped.
    pub fn step(&mut self) -> Result<NavState, NavError> {
        self.persistant.now_ms = self.clock.now_ms();
        self.persistant.obs = self.store.read_current();

        if let Some(cause) = self.hold_cause() {
            self.hold(cause)?;
            return Ok(self.state);
        }

        if let Some(cause) = self.hold.take() {
            info!("Navigation resumed ({} cleared)", cause);
        }

        if self.stack.is_empty() {
            self.stack.push_above(NavMgrState::Search(Search::new()));
            info!("NavMgr state change to: NavMgrState::Search");
        }

        let (output, following) = match self.stack.top() {
            Some(top) => (
                top.step(&self.params, &mut self.persistant),
                matches!(top, NavMgrState::Follow(_)),
            ),
            None => (Ok(StepOutput::none()), false),
        };

        let action = match output {
            Ok(o) => o.action,
            Err(NavError::Actuation(fault)) => self.handle_fault(fault, following)?,
            Err(e) => return Err(e),
        };

        let is_action = action.is_some();

        // Perform any actions required by the top state
        match action {
            StackAction::None => (),
            StackAction::Clear => self.stack.clear(),
            StackAction::Abort => {
                self.stack.clear();
                self.stop_motion()?;
            }
            StackAction::PushAbove(s) => self.stack.push_above(s),
            StackAction::Pop => {
                self.stack.pop();
            }
            StackAction::Replace(s) => {
                self.stack.pop();
                self.stack.push_above(s)
            }
        }

        if is_action {
            match self.stack.top() {
                Some(top) => info!("NavMgr state change to: {}", top),
                None => info!("NavMgr state change to: Idle"),
            }
        }

        Ok(self.update_state())
    }

    /// The state reported by the last step.
    pub fn state(&self) -> NavState {
        self.state
    }

    /// Stop the drive unconditionally, used when the executable shuts down.
    pub fn shutdown(&mut self) -> Result<(), ActuationFault> {
        self.stack.clear();
        self.state = NavState::Idle;
        self.persistant.motion.force_stop()
    }

    /// Number of calls made to the drive so far.
    pub fn num_actuations(&self) -> u64 {
        self.persistant.motion.num_actuations()
    }

    fn hold_cause(&self) -> Option<HoldCause> {
        if let Some(cause) = self.persistant.supervisor.stop_mode() {
            return Some(HoldCause::Stop(cause));
        }

        // Hold on the snapshot the states are about to act on
        if !self.persistant.obs.frame.link_connected {
            return Some(HoldCause::Stop(StopCause::VisionLinkDown));
        }

        if !self.persistant.obs.ranging_ready {
            return Some(HoldCause::SensorNotReady);
        }

        None
    }

    /// Stop the robot and drop to Idle.
    fn hold(&mut self, cause: HoldCause) -> Result<(), NavError> {
        if self.hold != Some(cause) {
            info!("Navigation held: {}", cause);
            self.hold = Some(cause);
        }

        if !self.stack.is_empty() {
            self.stack.clear();
            info!("NavMgr state change to: Idle");
        }

        self.persistant.reset_lock();
        self.update_state();

        self.stop_motion()
    }

    fn handle_fault(
        &mut self,
        fault: ActuationFault,
        following: bool,
    ) -> Result<StackAction, NavError> {
        if fault.is_fatal() {
            error!("{}, stopping all motion", fault);
            if let Err(e) = self.persistant.motion.force_stop() {
                error!("Could not stop the drive: {}", e);
            }
            return Err(NavError::Fatal(fault));
        }

        warn!("{}", fault);
        self.stop_motion()?;

        if following {
            Ok(StackAction::Replace(NavMgrState::Avoid(Avoid::new())))
        } else {
            Ok(StackAction::Abort)
        }
    }

    fn stop_motion(&mut self) -> Result<(), NavError> {
        match self.persistant.motion.stop() {
            Ok(()) => Ok(()),
            Err(f) if f.is_fatal() => {
                error!("Could not stop the drive: {}", f);
                Err(NavError::Fatal(f))
            }
            Err(f) => {
                warn!("Could not stop the drive: {}", f);
                Ok(())
            }
        }
    }

    fn update_state(&mut self) -> NavState {
        self.state = match self.stack.top() {
            Some(top) => top.nav_state(),
            None => NavState::Idle,
        };
        self.state
    }
}

impl NavPersistantData {
    /// Forget everything learned while approaching the station.
    pub fn reset_lock(&mut self) {
        self.inner_circle = false;
        self.scan_dir = Side::Left;
    }
}

impl NavStack {
    /// Create a new empty stack
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a mutable reference to the top state, or `None` if the stack is empty.
    pub fn top(&mut self) -> Option<&mut NavMgrState> {
        self.0.last_mut()
    }

    pub fn push_above(&mut self, new: NavMgrState) {
        self.0.push(new)
    }

    pub fn pop(&mut self) -> Option<NavMgrState> {
        self.0.pop()
    }

    pub fn clear(&mut self) {
        self.0.clear()
    }
}

impl NavMgrState {
    fn step(
        &mut self,
        params: &NavParams,
        persistant: &mut NavPersistantData,
    ) -> Result<StepOutput, NavError> {
        match self {
            NavMgrState::Search(s) => s.step(params, persistant),
            NavMgrState::Reposition(s) => s.step(params, persistant),
            NavMgrState::Follow(s) => s.step(params, persistant),
            NavMgrState::Avoid(s) => s.step(params, persistant),
            NavMgrState::Dock(s) => s.step(params, persistant),
            NavMgrState::DriveAway(s) => s.step(params, persistant),
        }
    }

    pub fn nav_state(&self) -> NavState {
        match self {
            NavMgrState::Search(_) => NavState::Searching,
            NavMgrState::Reposition(_) => NavState::Repositioning,
            NavMgrState::Follow(f) => match f.lock() {
                Lock::Outer => NavState::FollowingOuter,
                Lock::Inner => NavState::FollowingInner,
            },
            NavMgrState::Avoid(_) => NavState::AvoidingObstacle,
            NavMgrState::Dock(_) => NavState::Docking,
            NavMgrState::DriveAway(_) => NavState::DrivingAway,
        }
    }
}

impl Display for NavMgrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NavMgrState::Search(_) => write!(f, "NavMgrState::Search"),
            NavMgrState::Reposition(_) => write!(f, "NavMgrState::Reposition"),
            NavMgrState::Follow(s) => write!(f, "NavMgrState::Follow({:?})", s.lock()),
            NavMgrState::Avoid(_) => write!(f, "NavMgrState::Avoid"),
            NavMgrState::Dock(_) => write!(f, "NavMgrState::Dock"),
            NavMgrState::DriveAway(_) => write!(f, "NavMgrState::DriveAway"),
        }
    }
}

impl Display for HoldCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HoldCause::Stop(StopCause::NoMission) => write!(f, "no mission"),
            HoldCause::Stop(StopCause::ControlLinkDown) => write!(f, "control link down"),
            HoldCause::Stop(StopCause::VisionLinkDown) => write!(f, "vision link down"),
            HoldCause::SensorNotReady => write!(f, "ultrasonic readings not ready"),
        }
    }
}

impl StepOutput {
    pub fn none() -> Self {
        Self {
            action: StackAction::None,
        }
    }

    pub fn with(action: StackAction) -> Self {
        Self { action }
    }
}

impl StackAction {
    pub fn is_some(&self) -> bool {
        !matches!(self, &StackAction::None)
    }
}

impl From<ActuationFault> for NavError {
    fn from(f: ActuationFault) -> Self {
        NavError::Actuation(f)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
