//! # Simulated hardware
//!
//! Stand-ins for the drive, the ultrasonic array and the colour sensor. The executable uses them
//! when no hardware drivers are linked in, and tests use them to script the world. Each simulated
//! device hands out a cloneable handle which can inspect and change its state from outside.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::clock::Clock;
use crate::motion::{ActuationFault, Drive, MotionCmd};
use crate::obs_store::NUM_US_SENSORS;
use crate::sensors::object::{ColourSample, ColourSource};
use crate::sensors::{RangeSensor, SensorError, ECHO_US_PER_CM};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of accepted drive commands remembered, older ones are dropped.
pub const DRIVE_HISTORY_LEN: usize = 256;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters of the simulated drive.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SimDriveParams {
    /// Stepping rate of the motors
    pub steps_per_s: u64,

    /// Length of an open-ended turn before the drive stops by itself
    pub turn_move_steps: u64,

    /// Length of an open-ended straight or backward move before the drive stops by itself
    pub linear_move_steps: u64,
}

/// Drive whose step count advances with the clock.
pub struct SimDrive {
    params: SimDriveParams,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<SimDriveState>>,
}

/// Handle on a [`SimDrive`].
#[derive(Clone)]
pub struct SimDriveHandle {
    state: Arc<Mutex<SimDriveState>>,
}

#[derive(Debug)]
struct SimDriveState {
    cmd: MotionCmd,
    start_ms: u64,

    /// Step count frozen while the drive is stalled
    stalled_at: Option<u64>,

    history: VecDeque<MotionCmd>,

    pending_fault: Option<ActuationFault>,
}

/// Ultrasonic array reporting fixed distances.
pub struct SimRanger {
    distances_cm: Arc<Mutex<[f64; NUM_US_SENSORS]>>,
    fault: Arc<Mutex<Option<SensorError>>>,
}

/// Handle on a [`SimRanger`].
#[derive(Clone)]
pub struct SimRangerHandle {
    distances_cm: Arc<Mutex<[f64; NUM_US_SENSORS]>>,
    fault: Arc<Mutex<Option<SensorError>>>,
}

/// Colour sensor returning a fixed sample.
pub struct SimColourSource {
    state: Arc<Mutex<SimColourState>>,
}

/// Handle on a [`SimColourSource`].
#[derive(Clone)]
pub struct SimColourHandle {
    state: Arc<Mutex<SimColourState>>,
}

#[derive(Debug)]
struct SimColourState {
    sample: ColourSample,
    led_on: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for SimDriveParams {
    fn default() -> Self {
        Self {
            steps_per_s: 800,
            turn_move_steps: 3200,
            linear_move_steps: 20_000,
        }
    }
}

impl SimDrive {
    pub fn new(params: SimDriveParams, clock: Arc<dyn Clock>) -> Self {
        Self {
            params,
            clock,
            state: Arc::new(Mutex::new(SimDriveState {
                cmd: MotionCmd::Stop,
                start_ms: 0,
                stalled_at: None,
                history: VecDeque::with_capacity(DRIVE_HISTORY_LEN),
                pending_fault: None,
            })),
        }
    }

    pub fn handle(&self) -> SimDriveHandle {
        SimDriveHandle {
            state: self.state.clone(),
        }
    }

    fn move_steps(&self, cmd: MotionCmd) -> u64 {
        match cmd {
            MotionCmd::Stop => 0,
            MotionCmd::TurnLeft | MotionCmd::TurnRight => self.params.turn_move_steps,
            MotionCmd::Straight | MotionCmd::Backward => self.params.linear_move_steps,
        }
    }

    fn steps_at(&self, state: &SimDriveState, now_ms: u64) -> u64 {
        if let Some(steps) = state.stalled_at {
            return steps;
        }

        let elapsed_ms = now_ms.saturating_sub(state.start_ms);
        (elapsed_ms * self.params.steps_per_s / 1000).min(self.move_steps(state.cmd))
    }

    fn start(&mut self, cmd: MotionCmd) -> Result<(), ActuationFault> {
        let now_ms = self.clock.now_ms();
        let mut state = lock(&self.state);

        // Faults are only raised on moves, stopping always works
        if cmd != MotionCmd::Stop {
            if let Some(fault) = state.pending_fault.take() {
                return Err(fault);
            }
        }

        state.cmd = cmd;
        state.start_ms = now_ms;
        if state.stalled_at.is_some() {
            state.stalled_at = Some(0);
        }
        if state.history.len() == DRIVE_HISTORY_LEN {
            state.history.pop_front();
        }
        state.history.push_back(cmd);

        Ok(())
    }
}

impl Drive for SimDrive {
    fn start_turn_left(&mut self) -> Result<(), ActuationFault> {
        self.start(MotionCmd::TurnLeft)
    }

    fn start_turn_right(&mut self) -> Result<(), ActuationFault> {
        self.start(MotionCmd::TurnRight)
    }

    fn start_straight(&mut self) -> Result<(), ActuationFault> {
        self.start(MotionCmd::Straight)
    }

    fn start_backward(&mut self) -> Result<(), ActuationFault> {
        self.start(MotionCmd::Backward)
    }

    fn stop(&mut self) -> Result<(), ActuationFault> {
        self.start(MotionCmd::Stop)
    }

    fn is_moving(&self) -> bool {
        let state = lock(&self.state);
        state.cmd != MotionCmd::Stop
            && self.steps_at(&state, self.clock.now_ms()) < self.move_steps(state.cmd)
    }

    fn steps_completed(&self) -> u64 {
        let state = lock(&self.state);
        self.steps_at(&state, self.clock.now_ms())
    }
}

impl SimDriveHandle {
    /// The last [`DRIVE_HISTORY_LEN`] commands the drive has accepted, oldest first.
    pub fn history(&self) -> Vec<MotionCmd> {
        lock(&self.state).history.iter().copied().collect()
    }

    /// Forget the command history.
    pub fn clear_history(&self) {
        lock(&self.state).history.clear()
    }

    /// The move the drive is executing.
    pub fn current(&self) -> MotionCmd {
        lock(&self.state).cmd
    }

    /// Refuse the next move with the given fault.
    pub fn inject_fault(&self, fault: ActuationFault) {
        lock(&self.state).pending_fault = Some(fault);
    }

    /// Hold the step counter at zero, as if the wheels were slipping, or release it.
    pub fn set_stalled(&self, stalled: bool) {
        let mut state = lock(&self.state);
        state.stalled_at = if stalled { Some(0) } else { None };
    }
}

impl SimRanger {
    /// Create a ranger with every sensor reading `distance_cm`.
    pub fn new(distance_cm: f64) -> Self {
        Self {
            distances_cm: Arc::new(Mutex::new([distance_cm; NUM_US_SENSORS])),
            fault: Arc::new(Mutex::new(None)),
        }
    }

    pub fn handle(&self) -> SimRangerHandle {
        SimRangerHandle {
            distances_cm: self.distances_cm.clone(),
            fault: self.fault.clone(),
        }
    }
}

impl RangeSensor for SimRanger {
    fn sweep(&mut self) -> Result<[Option<u32>; NUM_US_SENSORS], SensorError> {
        if let Some(e) = lock(&self.fault).clone() {
            return Err(e);
        }

        let distances = *lock(&self.distances_cm);
        let mut echoes = [None; NUM_US_SENSORS];
        for (e, d) in echoes.iter_mut().zip(distances.iter()) {
            if d.is_finite() {
                *e = Some((d.max(0.0) as u32) * ECHO_US_PER_CM);
            }
        }

        Ok(echoes)
    }
}

impl SimRangerHandle {
    /// Set the distance every sensor reads, in array order.
    pub fn set_distances(&self, distances_cm: [f64; NUM_US_SENSORS]) {
        *lock(&self.distances_cm) = distances_cm;
    }

    /// Make every sweep fail with the given error, or succeed again with `None`.
    pub fn set_fault(&self, fault: Option<SensorError>) {
        *lock(&self.fault) = fault;
    }
}

impl SimColourSource {
    pub fn new(sample: ColourSample) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimColourState {
                sample,
                led_on: false,
            })),
        }
    }

    pub fn handle(&self) -> SimColourHandle {
        SimColourHandle {
            state: self.state.clone(),
        }
    }
}

impl ColourSource for SimColourSource {
    fn sample(&mut self) -> Result<ColourSample, SensorError> {
        Ok(lock(&self.state).sample)
    }

    fn set_led(&mut self, on: bool) -> Result<(), SensorError> {
        lock(&self.state).led_on = on;
        Ok(())
    }
}

impl SimColourHandle {
    pub fn set_sample(&self, sample: ColourSample) {
        lock(&self.state).sample = sample;
    }

    pub fn led_on(&self) -> bool {
        lock(&self.state).led_on
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
