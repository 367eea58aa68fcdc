//! # [`NavMgrState::Search`] implementation

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;
use serde::Deserialize;

use super::{
    states::{Follow, Reposition},
    NavError, NavMgrState, NavParams, NavPersistantData, StackAction, StepOutput,
};
use crate::{
    clock::BoundedWait,
    motion::{MotionCmd, MoveStatus, StepMove},
    obs_store::{Side, UsSensor},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Search state.
///
/// Rotates on the spot in the current scan direction until a tag is seen. Obstacles on the scan
/// side reverse the direction, one right in front causes a short back-off. If scanning gets
/// nowhere the robot is repositioned and scanning starts over.
///
/// Possible transitions:
/// - Follow, as soon as a tag is visible
/// - Reposition (pushed above), on timeout, too many reversals, or both flanks blocked
#[derive(Debug, Default)]
pub struct Search {
    /// Started on the first step, and again after each reposition
    wait: Option<BoundedWait>,

    /// Number of times the scan direction was reversed by an obstacle
    reversals: u32,

    backoff: Option<StepMove>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    /// Time to scan without seeing a tag before repositioning, ms
    pub tag_search_timeout_ms: u64,

    /// Number of direction reversals tolerated before repositioning
    pub max_scan_reversals: u32,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Search {
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
            info!("Tag found at row {}", obs.frame.tag_center_y);
            return Ok(StepOutput::with(StackAction::Replace(NavMgrState::Follow(
                Follow::new(&obs, params),
            ))));
        }

        let timeout_ms = params.search.tag_search_timeout_ms;
        let wait = *self
            .wait
            .get_or_insert_with(|| BoundedWait::start(now_ms, timeout_ms));

        // Finish any back-off before scanning again
        if let Some(mv) = self.backoff.as_mut() {
            if mv.poll(&mut persistant.motion, now_ms)? == MoveStatus::Running {
                return Ok(StepOutput::none());
            }
            self.backoff = None;
        }

        if obs.is_blocked(UsSensor::Front, params.us_min_trigger_cm) {
            info!(
                "Front blocked at {:.0} cm, backing off",
                obs.sensors.get(UsSensor::Front)
            );
            let mut mv = StepMove::new(
                MotionCmd::Backward,
                params.backoff_steps,
                params.mnvr_timeout_ms,
            );
            mv.poll(&mut persistant.motion, now_ms)?;
            self.backoff = Some(mv);

            return Ok(StepOutput::none());
        }

        if !obs.flank_clear(Side::Left, params.us_min_trigger_cm)
            && !obs.flank_clear(Side::Right, params.us_min_trigger_cm)
        {
            info!("Both flanks blocked, repositioning");
            return Ok(self.reposition());
        }

        if !obs.flank_clear(persistant.scan_dir, params.us_min_trigger_cm) {
            persistant.scan_dir = persistant.scan_dir.opposite();
            self.reversals += 1;

            info!(
                "Obstacle on the scan side, now scanning {:?} ({} reversals)",
                persistant.scan_dir, self.reversals
            );

            if self.reversals > params.search.max_scan_reversals {
                info!("Too many scan reversals, repositioning");
                return Ok(self.reposition());
            }
        }

        if wait.expired(now_ms) {
            info!(
                "No tag found after {} ms, repositioning",
                wait.elapsed_ms(now_ms)
            );
            return Ok(self.reposition());
        }

        persistant
            .motion
            .request(MotionCmd::turn(persistant.scan_dir))?;

        Ok(StepOutput::none())
    }

    /// Push a Reposition above this state, and start scanning afresh once it pops.
    fn reposition(&mut self) -> StepOutput {
        self.wait = None;
        self.reversals = 0;
        self.backoff = None;

        StepOutput::with(StackAction::PushAbove(NavMgrState::Reposition(
            Reposition::new(),
        )))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use crate::motion::MotionCmd;
    use crate::nav::{test::Harness, NavState};

    #[test]
    fn test_front_blocked_backs_off_first() {
        let mut h = Harness::new();
        h.ranges([100.0, 100.0, 3.0, 100.0, 100.0]);

        assert_eq!(h.step(), NavState::Searching);
        assert_eq!(h.drive.history(), vec![MotionCmd::Backward]);

        // 400 steps at 800 steps/s
        h.ranges([100.0; 5]);
        h.step_after(250);
        assert_eq!(h.drive.history(), vec![MotionCmd::Backward]);

        // Scanning resumes as soon as the back-off is done
        h.step_after(250);
        assert_eq!(
            h.drive.history(),
            vec![MotionCmd::Backward, MotionCmd::Stop, MotionCmd::TurnLeft]
        );
    }

    #[test]
    fn test_scan_side_blocked_reverses() {
        let mut h = Harness::new();
        h.step();
        assert_eq!(h.drive.current(), MotionCmd::TurnLeft);

        h.ranges([5.0, 100.0, 100.0, 100.0, 100.0]);
        h.step_after(50);
        assert_eq!(h.drive.current(), MotionCmd::TurnRight);
        assert_eq!(h.nav.state(), NavState::Searching);
    }

    #[test]
    fn test_too_many_reversals_repositions() {
        let mut h = Harness::new();
        let left_blocked = [5.0, 100.0, 100.0, 100.0, 100.0];
        let right_blocked = [100.0, 100.0, 100.0, 100.0, 5.0];

        h.ranges(left_blocked);
        h.step();
        h.ranges(right_blocked);
        h.step_after(50);
        assert_eq!(h.nav.state(), NavState::Searching);

        // Third reversal
        h.ranges(left_blocked);
        assert_eq!(h.step_after(50), NavState::Repositioning);
    }

    #[test]
    fn test_timeout_repositions() {
        let mut h = Harness::new();
        h.step();

        assert_eq!(h.step_after(10_000), NavState::Searching);
        assert_eq!(h.step_after(1), NavState::Repositioning);
    }

    #[test]
    fn test_tag_ends_search() {
        let mut h = Harness::new();
        h.step();

        h.see_tags(&[300.0]);
        assert_eq!(h.step_after(50), NavState::FollowingOuter);
    }
}
