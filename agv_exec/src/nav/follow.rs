//! # [`NavMgrState::Follow`] implementation

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::station::RobotStatus;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::{
    states::{Avoid, Dock, Search},
    NavError, NavMgrState, NavParams, NavPersistantData, StackAction, StepOutput,
};
use crate::{
    motion::{MotionCmd, MoveStatus, StepMove},
    obs_store::{Observation, Side, UsSensor},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Follow state.
///
/// Steers toward the tag. With an inner lock the tag is straight ahead and the robot drives
/// forward. With an outer lock, or when going forward isn't possible, the first safe move of the
/// ladder is taken:
///
/// 1. turn toward the tag
/// 2. straight
/// 3. turn away from the tag
/// 4. reverse, a limited number of times
///
/// When none of them is safe the obstacle is avoided.
///
/// Possible transitions:
/// - Dock, inside the inner circle with the station base close ahead
/// - Search, when the tag is lost
/// - Avoid, when the ladder has no safe move
#[derive(Debug)]
pub struct Follow {
    lock: Lock,

    /// Reverses made since the last turn
    reverses: u32,

    reverse: Option<StepMove>,

    /// The robot status has been set to approaching
    announced: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FollowParams {
    /// Number of consecutive reverses allowed before avoiding the obstacle instead
    pub max_reverses: u32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// How well the robot is aligned with the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Lock {
    /// Off center, steering back toward the tag
    Outer,

    /// Aligned, driving straight at the tag
    Inner,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Follow {
    /// Start following the tag in the observation.
    pub fn new(obs: &Observation, params: &NavParams) -> Self {
        let aligned = in_band(
            obs.frame.tag_center_y,
            params.tag_center,
            params.tag_center_deadzone_small,
        );
        let lock = if aligned {
            Lock::Inner
        } else {
            Lock::Outer
        };

        Self::with_lock(lock)
    }

    /// Start following with an outer lock, used after avoiding an obstacle.
    pub fn outer() -> Self {
        Self::with_lock(Lock::Outer)
    }

    fn with_lock(lock: Lock) -> Self {
        Self {
            lock,
            reverses: 0,
            reverse: None,
            announced: false,
        }
    }

    pub fn lock(&self) -> Lock {
        self.lock
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
                .set_robot_status(RobotStatus::ApproachingStation);
            self.announced = true;
        }

        if !persistant.inner_circle
            && obs.tag_visible()
            && obs.frame.tag_size >= params.tag_close_size
        {
            info!("Inside the inner circle (tag size {:.1})", obs.frame.tag_size);
            persistant.inner_circle = true;
        }

        if persistant.inner_circle && obs.is_blocked(UsSensor::Front, params.us_base_trigger_cm) {
            info!(
                "Station base at {:.0} cm, docking",
                obs.sensors.get(UsSensor::Front)
            );
            persistant.motion.stop()?;
            return Ok(StepOutput::with(StackAction::Replace(NavMgrState::Dock(
                Dock::new(params),
            ))));
        }

        if !obs.tag_visible() {
            info!("Tag lost");
            persistant.motion.stop()?;
            return Ok(StepOutput::with(StackAction::Replace(NavMgrState::Search(
                Search::new(),
            ))));
        }

        if let Some(mv) = self.reverse.as_mut() {
            if mv.poll(&mut persistant.motion, now_ms)? == MoveStatus::Running {
                return Ok(StepOutput::none());
            }
            self.reverse = None;
        }

        self.update_lock(obs.frame.tag_center_y, params);

        let forward_cm = if persistant.inner_circle {
            params.us_base_trigger_cm
        } else {
            params.us_near_trigger_cm
        };

        if self.lock == Lock::Inner && obs.front_clear(forward_cm) {
            persistant.motion.request(MotionCmd::Straight)?;
            return Ok(StepOutput::none());
        }

        // A center below the target row means the tag is to the right
        let toward = if obs.frame.tag_center_y < params.tag_center {
            Side::Right
        } else {
            Side::Left
        };

        let min = params.us_min_trigger_cm;
        if obs.flank_clear(toward, min) {
            self.reverses = 0;
            persistant.motion.request(MotionCmd::turn(toward))?;
        } else if obs.front_clear(forward_cm) {
            persistant.motion.request(MotionCmd::Straight)?;
        } else if obs.flank_clear(toward.opposite(), min) {
            self.reverses = 0;
            persistant
                .motion
                .request(MotionCmd::turn(toward.opposite()))?;
        } else if self.reverses < params.follow.max_reverses {
            self.reverses += 1;
            debug!(
                "Boxed in, reversing ({} of {})",
                self.reverses, params.follow.max_reverses
            );

            let mut mv = StepMove::new(
                MotionCmd::Backward,
                params.backoff_steps,
                params.mnvr_timeout_ms,
            );
            mv.poll(&mut persistant.motion, now_ms)?;
            self.reverse = Some(mv);
        } else {
            warn!("No safe move toward the tag, avoiding the obstacle");
            persistant.motion.stop()?;
            return Ok(StepOutput::with(StackAction::Replace(NavMgrState::Avoid(
                Avoid::new(),
            ))));
        }

        Ok(StepOutput::none())
    }

    /// Acquire the inner lock in the small band, lose it outside the wide band.
    fn update_lock(&mut self, center_y: u32, params: &NavParams) {
        let lock = match self.lock {
            Lock::Inner if !in_band(center_y, params.tag_center, params.tag_center_deadzone) => {
                Lock::Outer
            }
            Lock::Outer
                if in_band(center_y, params.tag_center, params.tag_center_deadzone_small) =>
            {
                Lock::Inner
            }
            l => l,
        };

        if lock != self.lock {
            info!("Tag lock {:?} -> {:?} (row {})", self.lock, lock, center_y);
            self.lock = lock;
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// `true` unless the row is strictly outside `center ± deadzone`.
fn in_band(row: u32, center: u32, deadzone: u32) -> bool {
    let row = row as i64;
    let center = center as i64;
    let deadzone = deadzone as i64;

    !(row < center - deadzone || row > center + deadzone)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::nav::{test::Harness, NavState};

    /// Harness following a tag at the given row.
    fn following(row: f64) -> Harness {
        let mut h = Harness::new();
        h.see_tags(&[row]);
        h.step();
        h
    }

    #[test]
    fn test_in_band_boundaries() {
        assert!(in_band(500, 600, 100));
        assert!(in_band(700, 600, 100));
        assert!(!in_band(499, 600, 100));
        assert!(!in_band(701, 600, 100));
        assert!(in_band(0, 50, 100));
    }

    #[test]
    fn test_deadzone_boundary_keeps_lock() {
        let mut h = following(600.0);
        assert_eq!(h.nav.state(), NavState::FollowingInner);

        h.see_tags(&[500.0]);
        assert_eq!(h.step_after(50), NavState::FollowingInner);
        assert_eq!(h.drive.current(), MotionCmd::Straight);

        h.see_tags(&[499.0]);
        assert_eq!(h.step_after(50), NavState::FollowingOuter);
        assert_eq!(h.drive.current(), MotionCmd::TurnRight);
    }

    #[test]
    fn test_outer_lock_reacquires_inner() {
        let mut h = following(300.0);
        assert_eq!(h.nav.state(), NavState::FollowingOuter);

        // Inside the wide band is not enough
        h.see_tags(&[650.0]);
        assert_eq!(h.step_after(50), NavState::FollowingOuter);
        assert_eq!(h.drive.current(), MotionCmd::TurnLeft);

        h.see_tags(&[640.0]);
        assert_eq!(h.step_after(50), NavState::FollowingInner);
    }

    #[test]
    fn test_ladder_order() {
        let mut h = following(800.0);

        // Toward the tag is left
        h.step_after(50);
        assert_eq!(h.drive.current(), MotionCmd::TurnLeft);

        // Left blocked, straight
        h.ranges([5.0, 100.0, 100.0, 100.0, 100.0]);
        h.step_after(50);
        assert_eq!(h.drive.current(), MotionCmd::Straight);

        // Front blocked too, turn away
        h.ranges([5.0, 100.0, 10.0, 100.0, 100.0]);
        h.step_after(50);
        assert_eq!(h.drive.current(), MotionCmd::TurnRight);

        // Boxed in, reverse
        h.ranges([5.0, 100.0, 10.0, 100.0, 5.0]);
        h.step_after(50);
        assert_eq!(h.drive.current(), MotionCmd::Backward);
        assert_eq!(h.nav.state(), NavState::FollowingOuter);
    }

    #[test]
    fn test_boxed_in_avoids_after_reverses() {
        let mut h = following(800.0);
        h.ranges([5.0, 5.0, 10.0, 5.0, 5.0]);

        for _ in 0..3 {
            h.step_after(50);
            assert_eq!(h.drive.current(), MotionCmd::Backward);

            // Let the reverse finish
            h.see_tags(&[800.0]);
            h.step_after(1000);
        }

        assert_eq!(h.nav.state(), NavState::AvoidingObstacle);
    }

    #[test]
    fn test_tag_lost_returns_to_search() {
        let mut h = following(600.0);
        h.step_after(50);

        h.lose_tag();
        assert_eq!(h.step(), NavState::Searching);
        assert_eq!(h.drive.current(), MotionCmd::Stop);
    }

    #[test]
    fn test_approaching_status() {
        let mut h = following(600.0);
        h.step_after(50);

        assert_eq!(
            h.supervisor.agv_status().robot_status,
            RobotStatus::ApproachingStation
        );
    }

    #[test]
    fn test_docks_inside_inner_circle() {
        let mut h = Harness::new();
        h.see_tags_sized(&[600.0], 300.0);
        h.step();

        // Closer than the near trigger but still further than the base
        h.ranges([100.0, 20.0, 20.0, 20.0, 100.0]);
        h.step_after(50);
        assert_eq!(h.drive.current(), MotionCmd::Straight);
        assert!(h.nav.persistant.inner_circle);

        h.ranges([100.0, 100.0, 12.0, 100.0, 100.0]);
        h.see_tags_sized(&[600.0], 300.0);
        assert_eq!(h.step_after(50), NavState::Docking);
        assert_eq!(h.drive.current(), MotionCmd::Stop);
    }
}
