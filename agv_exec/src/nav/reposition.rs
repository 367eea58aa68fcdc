//! # [`NavMgrState::Reposition`] implementation

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info};
use serde::Deserialize;

use super::{NavError, NavParams, NavPersistantData, StackAction, StepOutput};
use crate::{
    clock::BoundedWait,
    motion::{MotionCmd, MoveStatus, StepMove},
    obs_store::Side,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Reposition state, run as a sub-routine of Search.
///
/// Drives straight while the way ahead and both flanks are clear. When that isn't possible it
/// turns a little toward the clearer flank, or backs off if neither flank is clear, and then
/// tries straight again. Pops once a tag is visible, the time budget is spent, or the forward
/// moves have been interrupted too many times.
#[derive(Debug, Default)]
pub struct Reposition {
    wait: Option<BoundedWait>,

    /// Number of forward moves interrupted by an obstacle
    stops: u32,

    /// Currently driving straight
    driving: bool,

    escape: Option<StepMove>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositionParams {
    /// Number of interrupted forward moves after which repositioning ends
    pub max_stops: u32,

    /// Maximum duration of a reposition, ms
    pub max_time_ms: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Reposition {
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

        if obs.tag_visible() {
            info!("Tag visible, repositioning complete");
            persistant.motion.stop()?;
            return Ok(StepOutput::with(StackAction::Pop));
        }

        let max_time_ms = params.reposition.max_time_ms;
        let wait = *self
            .wait
            .get_or_insert_with(|| BoundedWait::start(now_ms, max_time_ms));

        if wait.expired(now_ms) || self.stops >= params.reposition.max_stops {
            info!(
                "Repositioning complete after {} ms and {} stops",
                wait.elapsed_ms(now_ms),
                self.stops
            );
            persistant.motion.stop()?;
            return Ok(StepOutput::with(StackAction::Pop));
        }

        if let Some(mv) = self.escape.as_mut() {
            if mv.poll(&mut persistant.motion, now_ms)? == MoveStatus::Running {
                return Ok(StepOutput::none());
            }
            self.escape = None;
        }

        let min = params.us_min_trigger_cm;
        if obs.front_clear(params.us_near_trigger_cm)
            && obs.flank_clear(Side::Left, min)
            && obs.flank_clear(Side::Right, min)
        {
            persistant.motion.request(MotionCmd::Straight)?;
            self.driving = true;
            return Ok(StepOutput::none());
        }

        if self.driving {
            self.driving = false;
            self.stops += 1;
            debug!(
                "Forward move interrupted ({} of {})",
                self.stops, params.reposition.max_stops
            );
        }

        let side = obs.clearer_side(persistant.scan_dir);
        let mut mv = if obs.flank_clear(side, min) {
            StepMove::new(
                MotionCmd::turn(side),
                params.turn_increment_steps,
                params.mnvr_timeout_ms,
            )
        } else {
            StepMove::new(
                MotionCmd::Backward,
                params.backoff_steps,
                params.mnvr_timeout_ms,
            )
        };
        debug!("Repositioning with {:?}", mv.cmd());

        mv.poll(&mut persistant.motion, now_ms)?;
        self.escape = Some(mv);

        Ok(StepOutput::none())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use crate::motion::MotionCmd;
    use crate::nav::{
        test::{Harness, OPEN},
        NavState,
    };

    /// Harness which has just pushed a Reposition because both flanks are blocked.
    fn repositioning() -> Harness {
        let mut h = Harness::new();
        h.ranges([3.0, 3.0, 50.0, 3.0, 3.0]);
        assert_eq!(h.step(), NavState::Repositioning);
        h
    }

    #[test]
    fn test_backs_off_when_boxed_in() {
        let mut h = repositioning();

        h.step_after(50);
        assert_eq!(h.drive.current(), MotionCmd::Backward);
    }

    #[test]
    fn test_turns_toward_clearer_flank() {
        let mut h = repositioning();

        // Front blocked, right flank has the room
        h.ranges([10.0, 10.0, 10.0, 80.0, 80.0]);
        h.step_after(50);
        assert_eq!(h.drive.current(), MotionCmd::TurnRight);
    }

    #[test]
    fn test_drives_straight_when_clear() {
        let mut h = repositioning();

        h.ranges(OPEN);
        h.step_after(50);
        assert_eq!(h.drive.current(), MotionCmd::Straight);
        assert_eq!(h.nav.state(), NavState::Repositioning);
    }

    #[test]
    fn test_pops_on_tag() {
        let mut h = repositioning();
        h.ranges(OPEN);
        h.step_after(50);

        h.see_tags(&[600.0]);
        assert_eq!(h.step_after(50), NavState::Searching);
        assert_eq!(h.drive.current(), MotionCmd::Stop);

        // Search hands over on the next cycle
        assert_eq!(h.step_after(50), NavState::FollowingInner);
    }

    #[test]
    fn test_pops_after_max_time() {
        let mut h = repositioning();
        h.ranges(OPEN);

        h.step_after(50);
        assert_eq!(h.step_after(6000), NavState::Repositioning);
        assert_eq!(h.step_after(1), NavState::Searching);
    }

    #[test]
    fn test_pops_after_max_stops() {
        let mut h = repositioning();
        let blocked = [100.0, 100.0, 10.0, 100.0, 100.0];

        h.ranges(OPEN);
        h.step_after(50);
        assert_eq!(h.drive.current(), MotionCmd::Straight);

        for _ in 0..2 {
            // Interrupted, turn a little then carry on straight
            h.ranges(blocked);
            h.step_after(50);
            assert_eq!(h.drive.current(), MotionCmd::TurnLeft);

            h.ranges(OPEN);
            h.step_after(1000);
            assert_eq!(h.drive.current(), MotionCmd::Straight);
        }

        h.ranges(blocked);
        h.step_after(50);
        assert_eq!(h.step_after(1000), NavState::Searching);
    }
}
