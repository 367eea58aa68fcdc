//! # [`NavMgrState::Avoid`] implementation

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use serde::Deserialize;

use super::{
    states::{Follow, Search},
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

/// Avoid state.
///
/// Steps around an obstacle which blocks the way to the tag:
///
/// 1. Escape: turn in increments toward the clearer side until the front is clear, counting the
///    net number of increments (left positive).
/// 2. Pass: drive straight past the obstacle.
/// 3. Unwind: turn back by the same number of increments, stopping early if the side to turn
///    toward is blocked.
///
/// Then the tag is followed again with an outer lock. If the way never clears, or avoidance takes
/// too long, the tag is searched for again instead.
#[derive(Debug, Default)]
pub struct Avoid {
    phase: Phase,

    /// Net turn increments, left positive
    turns: i32,

    /// Side chosen for the escape turns
    side: Option<Side>,

    mv: Option<StepMove>,

    wait: Option<BoundedWait>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvoidParams {
    /// Length of the straight pass, steps
    pub pass_steps: u64,

    /// Maximum number of escape turn increments
    pub max_turns: u32,

    /// Maximum duration of an avoidance, ms
    pub max_time_ms: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Escape,
    Pass,
    Unwind,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for Phase {
    fn default() -> Self {
        Phase::Escape
    }
}

impl Avoid {
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

        let max_time_ms = params.avoid.max_time_ms;
        let wait = *self
            .wait
            .get_or_insert_with(|| BoundedWait::start(now_ms, max_time_ms));

        if wait.expired(now_ms) {
            return self.give_up(persistant, "avoidance took too long");
        }

        // Something new in the way while passing, go back to turning
        if self.phase == Phase::Pass && obs.is_blocked(UsSensor::Front, params.us_min_trigger_cm)
        {
            debug!("Pass blocked, escaping again");
            persistant.motion.stop()?;
            self.mv = None;
            self.phase = Phase::Escape;
        }

        if let Some(mv) = self.mv.as_mut() {
            if mv.poll(&mut persistant.motion, now_ms)? == MoveStatus::Running {
                return Ok(StepOutput::none());
            }
            self.mv = None;

            if self.phase == Phase::Pass {
                debug!("Obstacle passed, unwinding {} turns", self.turns);
                self.phase = Phase::Unwind;
            }
        }

        match self.phase {
            Phase::Escape => {
                if obs.front_clear(params.us_near_trigger_cm) {
                    if self.turns == 0 {
                        info!("Way ahead clear, following the tag");
                        return Ok(follow_outer());
                    }

                    self.phase = Phase::Pass;
                    self.start(
                        persistant,
                        MotionCmd::Straight,
                        params.avoid.pass_steps,
                        params,
                    )?;
                    return Ok(StepOutput::none());
                }

                if self.turns.abs() as u32 >= params.avoid.max_turns {
                    return self.give_up(persistant, "way ahead never cleared");
                }

                let side = match self.side {
                    Some(s) => s,
                    None => {
                        let s = obs.clearer_side(persistant.scan_dir);
                        debug!("Escaping to the {:?}", s);
                        self.side = Some(s);
                        s
                    }
                };

                self.turns += side.sign();
                self.start(
                    persistant,
                    MotionCmd::turn(side),
                    params.turn_increment_steps,
                    params,
                )?;
            }
            Phase::Pass => {
                self.start(
                    persistant,
                    MotionCmd::Straight,
                    params.avoid.pass_steps,
                    params,
                )?;
            }
            Phase::Unwind => {
                if self.turns == 0 {
                    info!("Obstacle avoided, following the tag");
                    return Ok(follow_outer());
                }

                let side = if self.turns > 0 { Side::Right } else { Side::Left };
                if !obs.flank_clear(side, params.us_min_trigger_cm) {
                    info!(
                        "Unwind cut short by an obstacle to the {:?}, following the tag",
                        side
                    );
                    return Ok(follow_outer());
                }

                self.turns += side.sign();
                self.start(
                    persistant,
                    MotionCmd::turn(side),
                    params.turn_increment_steps,
                    params,
                )?;
            }
        }

        Ok(StepOutput::none())
    }

    fn start(
        &mut self,
        persistant: &mut NavPersistantData,
        cmd: MotionCmd,
        steps: u64,
        params: &NavParams,
    ) -> Result<(), NavError> {
        let mut mv = StepMove::new(cmd, steps, params.mnvr_timeout_ms);
        mv.poll(&mut persistant.motion, persistant.now_ms)?;
        self.mv = Some(mv);
        Ok(())
    }

    fn give_up(
        &mut self,
        persistant: &mut NavPersistantData,
        reason: &str,
    ) -> Result<StepOutput, NavError> {
        warn!("Giving up avoiding the obstacle: {}", reason);
        persistant.motion.stop()?;

        Ok(StepOutput::with(StackAction::Replace(NavMgrState::Search(
            Search::new(),
        ))))
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn follow_outer() -> StepOutput {
    StepOutput::with(StackAction::Replace(NavMgrState::Follow(Follow::outer())))
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

    const BOXED: [f64; 5] = [5.0, 5.0, 10.0, 5.0, 5.0];

    /// Harness which has just entered Avoid from Follow.
    fn avoiding() -> Harness {
        let mut h = Harness::new();
        h.see_tags(&[800.0]);
        h.step();
        h.ranges(BOXED);

        for _ in 0..3 {
            h.step_after(50);
            h.see_tags(&[800.0]);
            h.step_after(1000);
        }
        assert_eq!(h.nav.state(), NavState::AvoidingObstacle);
        h
    }

    #[test]
    fn test_escape_pass_unwind() {
        let mut h = avoiding();
        h.drive.clear_history();

        // Left has more room
        h.ranges([30.0, 30.0, 10.0, 8.0, 8.0]);
        h.step_after(50);
        assert_eq!(h.drive.current(), MotionCmd::TurnLeft);

        // Two increments, the second started as soon as the first is done
        h.step_after(200);
        assert_eq!(h.drive.current(), MotionCmd::TurnLeft);

        // Front clears, pass
        h.ranges(OPEN);
        h.step_after(200);
        assert_eq!(h.drive.current(), MotionCmd::Straight);

        // 600 steps at 800 steps/s, then unwind right twice
        h.step_after(750);
        assert_eq!(h.drive.current(), MotionCmd::TurnRight);
        h.step_after(200);
        assert_eq!(h.drive.current(), MotionCmd::TurnRight);
        assert_eq!(h.nav.state(), NavState::AvoidingObstacle);

        h.step_after(200);
        assert_eq!(h.nav.state(), NavState::FollowingOuter);

        assert_eq!(
            h.drive.history(),
            vec![
                MotionCmd::TurnLeft,
                MotionCmd::Stop,
                MotionCmd::TurnLeft,
                MotionCmd::Stop,
                MotionCmd::Straight,
                MotionCmd::Stop,
                MotionCmd::TurnRight,
                MotionCmd::Stop,
                MotionCmd::TurnRight,
                MotionCmd::Stop,
            ]
        );
    }

    #[test]
    fn test_unwind_stops_at_blocked_flank() {
        let mut h = avoiding();
        h.drive.clear_history();

        h.ranges([30.0, 30.0, 10.0, 8.0, 8.0]);
        h.step_after(50);
        assert_eq!(h.drive.current(), MotionCmd::TurnLeft);

        h.ranges(OPEN);
        h.step_after(200);
        assert_eq!(h.drive.current(), MotionCmd::Straight);

        // Something close on the right by the end of the pass
        h.ranges([100.0, 100.0, 100.0, 5.0, 5.0]);
        assert_eq!(h.step_after(750), NavState::FollowingOuter);
        assert!(!h.drive.history().contains(&MotionCmd::TurnRight));
    }

    #[test]
    fn test_clear_front_without_turning() {
        let mut h = avoiding();

        h.ranges(OPEN);
        assert_eq!(h.step_after(50), NavState::FollowingOuter);
    }

    #[test]
    fn test_gives_up_after_max_turns() {
        let mut h = avoiding();

        for _ in 0..6 {
            h.step_after(200);
            assert_eq!(h.nav.state(), NavState::AvoidingObstacle);
        }

        assert_eq!(h.step_after(200), NavState::Searching);
        assert_eq!(h.drive.current(), MotionCmd::Stop);
    }
}
