//! # Sensors module
//!
//! Interfaces to the sensor hardware the navigation core depends on. Hardware drivers implement
//! [`RangeSensor`] and [`object::ColourSource`]; the simulated implementations live in
//! [`crate::sim`].

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod object;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use crate::obs_store::NUM_US_SENSORS;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Round trip echo time per centimetre of range, in microseconds.
pub const ECHO_US_PER_CM: u32 = 58;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// The ultrasonic sensor array.
pub trait RangeSensor: Send {
    /// Trigger every sensor in turn and return the echo time of each in microseconds, in array
    /// order. `None` means the sensor heard no echo before its timeout.
    fn sweep(&mut self) -> Result<[Option<u32>; NUM_US_SENSORS], SensorError>;
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors raised by the sensor interfaces.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SensorError {
    #[error("Sensor bus error: {0}")]
    Bus(String),

    #[error("Sensor did not respond in time")]
    Timeout,

    #[error("The object sensor has not been calibrated")]
    NotCalibrated,
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Convert an echo time into a distance in centimetres, clamped to the sensor's maximum range.
///
/// A missing echo means nothing was in range.
pub fn echo_to_cm(echo_us: Option<u32>, max_range_cm: f64) -> f64 {
    match echo_us {
        Some(t) => ((t / ECHO_US_PER_CM) as f64).min(max_range_cm),
        None => max_range_cm,
    }
}

/// Convert the echo times of a whole sweep.
pub fn sweep_to_cm(
    echoes_us: &[Option<u32>; NUM_US_SENSORS],
    max_range_cm: f64,
) -> [f64; NUM_US_SENSORS] {
    let mut distances = [0f64; NUM_US_SENSORS];
    for (d, e) in distances.iter_mut().zip(echoes_us.iter()) {
        *d = echo_to_cm(*e, max_range_cm);
    }
    distances
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_echo_to_cm() {
        assert_eq!(echo_to_cm(Some(0), 200.0), 0.0);
        assert_eq!(echo_to_cm(Some(580), 200.0), 10.0);

        // Integer division, as the echo timer counts whole microseconds
        assert_eq!(echo_to_cm(Some(57), 200.0), 0.0);
        assert_eq!(echo_to_cm(Some(175), 200.0), 3.0);

        assert_eq!(echo_to_cm(Some(58 * 500), 200.0), 200.0);
        assert_eq!(echo_to_cm(None, 200.0), 200.0);
    }

    #[test]
    fn test_sweep_to_cm() {
        let sweep = sweep_to_cm(&[Some(58), None, Some(1450), Some(406), Some(0)], 150.0);
        assert_eq!(sweep, [1.0, 150.0, 25.0, 7.0, 0.0]);
    }
}
