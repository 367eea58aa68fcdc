//! # NavMgr Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use super::{
    avoid::AvoidParams, dock::DockParams, drive_away::DriveAwayParams, follow::FollowParams,
    reposition::RepositionParams, search::SearchParams,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct NavParams {
    /// Image row at which a tag is straight ahead
    pub tag_center: u32,

    /// Half width of the band around `tag_center` in which an inner lock is kept
    pub tag_center_deadzone: u32,

    /// Half width of the band around `tag_center` in which an inner lock is acquired
    pub tag_center_deadzone_small: u32,

    /// Apparent tag size from which the robot is considered inside the station's inner circle
    pub tag_close_size: f64,

    /// Time after which a tag that hasn't been seen is lost, ms
    pub tag_last_seen_timeout_ms: u64,

    /// Distance under which a sensor is blocked, cm
    pub us_min_trigger_cm: f64,

    /// Distance the front must be clear to for forward progress, cm
    pub us_near_trigger_cm: f64,

    /// Distance to the station base at which the robot docks, cm
    pub us_base_trigger_cm: f64,

    /// Length of a backward back-off, steps
    pub backoff_steps: u64,

    /// Length of a single on-the-spot turn increment, steps
    pub turn_increment_steps: u64,

    /// Timeout applied to every step-counted maneuver, ms
    pub mnvr_timeout_ms: u64,

    pub search: SearchParams,

    pub reposition: RepositionParams,

    pub follow: FollowParams,

    pub avoid: AvoidParams,

    pub dock: DockParams,

    pub drive_away: DriveAwayParams,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for NavParams {
    fn default() -> Self {
        Self {
            tag_center: 600,
            tag_center_deadzone: 100,
            tag_center_deadzone_small: 40,
            tag_close_size: 250.0,
            tag_last_seen_timeout_ms: 1000,
            us_min_trigger_cm: 7.0,
            us_near_trigger_cm: 25.0,
            us_base_trigger_cm: 15.0,
            backoff_steps: 400,
            turn_increment_steps: 150,
            mnvr_timeout_ms: 5000,
            search: SearchParams {
                tag_search_timeout_ms: 10_000,
                max_scan_reversals: 2,
            },
            reposition: RepositionParams {
                max_stops: 3,
                max_time_ms: 6000,
            },
            follow: FollowParams { max_reverses: 3 },
            avoid: AvoidParams {
                pass_steps: 600,
                max_turns: 6,
                max_time_ms: 20_000,
            },
            dock: DockParams {
                creep_steps: 200,
                wait_timeout_ms: 120_000,
            },
            drive_away: DriveAwayParams {
                reverse_steps: 800,
                turn_180_steps: 1600,
            },
        }
    }
}
