//! # Ranging task
//!
//! Sweeps the ultrasonic array periodically and publishes the distances to the observation store.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    clock::Clock,
    obs_store::ObservationStore,
    sensors::{sweep_to_cm, RangeSensor, SensorError},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct RangingTask {
    sensor: Box<dyn RangeSensor>,
    store: Arc<ObservationStore>,
    clock: Arc<dyn Clock>,

    period_ms: u64,

    /// Number of consecutive failed sweeps after which the readings are withdrawn
    max_consec_failures: u32,

    num_consec_failures: u32,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RangingTask {
    pub fn new(
        sensor: Box<dyn RangeSensor>,
        store: Arc<ObservationStore>,
        clock: Arc<dyn Clock>,
        period_ms: u64,
        max_consec_failures: u32,
    ) -> Self {
        Self {
            sensor,
            store,
            clock,
            period_ms,
            max_consec_failures,
            num_consec_failures: 0,
        }
    }

    /// Perform one sweep.
    ///
    /// A failed sweep leaves the previous readings in place. Once too many sweeps in a row have
    /// failed the readings are invalidated, which holds navigation until a sweep succeeds.
    pub fn sweep_once(&mut self) -> Result<(), SensorError> {
        match self.sensor.sweep() {
            Ok(echoes) => {
                if self.num_consec_failures >= self.max_consec_failures {
                    info!("Ultrasonic sweeps recovered");
                }
                self.num_consec_failures = 0;

                let max_range_cm = self.store.params().us_max_range_cm;
                self.store
                    .mark_sensor_sweep_complete(sweep_to_cm(&echoes, max_range_cm));
                Ok(())
            }
            Err(e) => {
                self.num_consec_failures += 1;

                if self.num_consec_failures == self.max_consec_failures {
                    warn!(
                        "{} consecutive ultrasonic sweeps failed, readings invalidated",
                        self.num_consec_failures
                    );
                    self.store.invalidate_sensors();
                }

                Err(e)
            }
        }
    }

    /// Sweep until `run` is cleared.
    pub fn run(&mut self, run: &AtomicBool) {
        while run.load(Ordering::Relaxed) {
            if let Err(e) = self.sweep_once() {
                warn!("Ultrasonic sweep failed: {}", e);
            }
            self.clock.sleep_ms(self.period_ms);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::ManualClock;
    use crate::obs_store::{StoreParams, UsSensor};
    use crate::sim::SimRanger;

    #[test]
    fn test_sweep_publishes_distances() {
        let store = Arc::new(ObservationStore::new(StoreParams::default()));
        let ranger = SimRanger::new(100.0);
        let handle = ranger.handle();
        handle.set_distances([10.0, 20.0, 30.0, 500.0, f64::INFINITY]);

        let mut task = RangingTask::new(
            Box::new(ranger),
            store.clone(),
            Arc::new(ManualClock::new(0)),
            100,
            3,
        );

        assert!(!store.read_current().ranging_ready);
        task.sweep_once().unwrap();

        let obs = store.read_current();
        assert!(obs.ranging_ready);
        assert_eq!(obs.sensors.get(UsSensor::Left), 10.0);
        assert_eq!(obs.sensors.get(UsSensor::Front), 30.0);

        // Clamped to the maximum range, no echo reads as nothing in range
        assert_eq!(obs.sensors.get(UsSensor::FrontRight), 200.0);
        assert_eq!(obs.sensors.get(UsSensor::Right), 200.0);
    }

    #[test]
    fn test_failures_invalidate_readings() {
        let store = Arc::new(ObservationStore::new(StoreParams::default()));
        let ranger = SimRanger::new(100.0);
        let handle = ranger.handle();

        let mut task = RangingTask::new(
            Box::new(ranger),
            store.clone(),
            Arc::new(ManualClock::new(0)),
            100,
            3,
        );
        task.sweep_once().unwrap();

        handle.set_fault(Some(SensorError::Timeout));
        for _ in 0..2 {
            assert_eq!(task.sweep_once(), Err(SensorError::Timeout));
            assert!(store.read_current().ranging_ready);
        }

        task.sweep_once().unwrap_err();
        assert!(!store.read_current().ranging_ready);

        handle.set_fault(None);
        task.sweep_once().unwrap();
        assert!(store.read_current().ranging_ready);
    }
}
