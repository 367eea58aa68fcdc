//! # AGV Executable Parameters
//!
//! Periods and timeouts of the executable's tasks. Network endpoints live in the shared network
//! parameters, navigation and mission tunables in their own modules.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::{obs_store::StoreParams, sim::SimDriveParams};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AgvExecParams {
    /// Target period of one navigation cycle, ms
    pub cycle_period_ms: u64,

    /// Period of the link-timeout watchdog, ms
    pub watchdog_period_ms: u64,

    /// Period of the ultrasonic sweeps, ms
    pub ranging_period_ms: u64,

    /// Period of the status reports to the stations, ms
    pub report_period_ms: u64,

    /// Time without any vision datagram after which the vision link is lost, ms
    pub vision_link_timeout_ms: u64,

    /// Time after which a station which has stopped sending is no longer reported to, ms
    pub peer_timeout_ms: u64,

    /// Maximum range of the ultrasonic sensors, cm
    pub us_max_range_cm: f64,

    /// Number of consecutive failed sweeps after which the ultrasonic readings are withdrawn
    pub max_consec_ranging_failures: u32,

    /// Read timeout of the datagram socket, ms
    pub udp_recv_timeout_ms: u64,

    /// Period of the ingest diagnostics log, ms
    pub diagnostics_period_ms: u64,

    /// Simulated drive, used while no drive hardware is linked in
    pub sim: SimDriveParams,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl AgvExecParams {
    /// Parameters of the observation store, which combine these with the tag timeout from the
    /// navigation parameters.
    pub fn store_params(&self, tag_last_seen_timeout_ms: u64) -> StoreParams {
        StoreParams {
            tag_last_seen_timeout_ms,
            vision_link_timeout_ms: self.vision_link_timeout_ms,
            us_max_range_cm: self.us_max_range_cm,
        }
    }
}

impl Default for AgvExecParams {
    fn default() -> Self {
        Self {
            cycle_period_ms: 50,
            watchdog_period_ms: 10,
            ranging_period_ms: 100,
            report_period_ms: 500,
            vision_link_timeout_ms: 2000,
            peer_timeout_ms: 10_000,
            us_max_range_cm: 200.0,
            max_consec_ranging_failures: 5,
            udp_recv_timeout_ms: 20,
            diagnostics_period_ms: 10_000,
            sim: SimDriveParams::default(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_shipped_params() {
        let exec: AgvExecParams =
            util::params::from_str(include_str!("../../params/agv_exec.toml")).unwrap();
        assert_eq!(exec.cycle_period_ms, AgvExecParams::default().cycle_period_ms);
        assert_eq!(exec.sim.steps_per_s, 800);

        let store = exec.store_params(1000);
        assert_eq!(store.vision_link_timeout_ms, 2000);
        assert_eq!(store.us_max_range_cm, 200.0);

        let nav: crate::nav::NavParams =
            util::params::from_str(include_str!("../../params/nav.toml")).unwrap();
        assert_eq!(nav.tag_center, 600);
        assert_eq!(nav.dock.wait_timeout_ms, 120_000);

        let mission: crate::mission::MissionParams =
            util::params::from_str(include_str!("../../params/mission.toml")).unwrap();
        assert_eq!(mission.load_wait_retries, 10);
        assert_eq!(mission.colour.num_samples, 10);
    }
}
