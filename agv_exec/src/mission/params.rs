//! # Mission Supervisor Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::sensors::object::ColourParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MissionParams {
    /// Number of times the container is checked before a mission selection gives up waiting for
    /// an object to be loaded (deliver) or removed (fetch)
    pub load_wait_retries: u32,

    /// Delay between container checks, ms
    pub load_wait_delay_ms: u64,

    /// Colour object sensor settings
    pub colour: ColourParams,
}

impl Default for MissionParams {
    fn default() -> Self {
        Self {
            load_wait_retries: 10,
            load_wait_delay_ms: 500,
            colour: ColourParams::default(),
        }
    }
}
