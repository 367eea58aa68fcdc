//! # Object sensor
//!
//! Detects whether an object is sitting in the AGV's container and recognises which kind it is.
//!
//! The sensor is a colour/light sensor looking into the container:
//! - With its LED off, an object shades the sensor, so the ambient light level drops at or below
//!   the level measured with an empty container during calibration.
//! - With its LED on, the reflected colour identifies the object from the ratios of red and green
//!   to blue.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::station::Cargo;
use log::{debug, info};
use serde::Deserialize;
use std::sync::Arc;

use super::SensorError;
use crate::clock::Clock;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Raw colour sensor hardware.
pub trait ColourSource: Send {
    /// Take one sample.
    fn sample(&mut self) -> Result<ColourSample, SensorError>;

    /// Switch the illumination LED.
    fn set_led(&mut self, on: bool) -> Result<(), SensorError>;
}

/// The object detection and recognition collaborator used by the mission supervisor.
pub trait ObjectSensor: Send {
    /// `true` if an object is in the container.
    fn object_loaded(&mut self) -> Result<bool, SensorError>;

    /// Recognise the object in the container.
    fn recognise(&mut self) -> Result<Recognition, SensorError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One raw reading of the colour sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColourSample {
    pub r: u16,
    pub g: u16,
    pub b: u16,
    pub lux: u16,
}

/// Parameters of the colour object sensor.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ColourParams {
    /// Number of samples averaged for each measurement
    pub num_samples: u32,

    /// Delay between consecutive samples, ms
    pub sample_delay_ms: u64,
}

/// [`ObjectSensor`] backed by a [`ColourSource`].
pub struct ColourObjectSensor<S> {
    source: S,
    params: ColourParams,
    clock: Arc<dyn Clock>,

    /// Mean light level with an empty container
    empty_lux: Option<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Result of recognising an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recognition {
    /// The colour matched no object
    Error,

    /// Nothing to recognise
    None,

    Gummy,
    Cotton,
    Ball,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Recognition {
    /// The cargo this recognition corresponds to, if it is an object.
    pub fn cargo(&self) -> Option<Cargo> {
        match self {
            Recognition::Gummy => Some(Cargo::Gummy),
            Recognition::Cotton => Some(Cargo::Cotton),
            Recognition::Ball => Some(Cargo::Ball),
            Recognition::Error | Recognition::None => None,
        }
    }
}

impl<S: ColourSource> ColourObjectSensor<S> {
    /// Create a new, uncalibrated sensor.
    pub fn new(source: S, params: ColourParams, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            params,
            clock,
            empty_lux: None,
        }
    }

    /// Measure the light level of the empty container.
    ///
    /// Must be called with the container empty before any load detection.
    pub fn calibrate(&mut self) -> Result<f64, SensorError> {
        self.source.set_led(false)?;
        let mean = self.mean_sample()?;

        info!("Object sensor calibrated, empty container light level {:.1}", mean.3);
        self.empty_lux = Some(mean.3);

        Ok(mean.3)
    }

    /// Average `num_samples` samples, returning `(r, g, b, lux)`.
    fn mean_sample(&mut self) -> Result<(f64, f64, f64, f64), SensorError> {
        let n = self.params.num_samples.max(1);
        let mut sum = (0f64, 0f64, 0f64, 0f64);

        for i in 0..n {
            let s = self.source.sample()?;
            sum.0 += s.r as f64;
            sum.1 += s.g as f64;
            sum.2 += s.b as f64;
            sum.3 += s.lux as f64;

            if i + 1 < n {
                self.clock.sleep_ms(self.params.sample_delay_ms);
            }
        }

        let n = n as f64;
        Ok((sum.0 / n, sum.1 / n, sum.2 / n, sum.3 / n))
    }
}

impl<S: ColourSource> ObjectSensor for ColourObjectSensor<S> {
    fn object_loaded(&mut self) -> Result<bool, SensorError> {
        let empty_lux = self.empty_lux.ok_or(SensorError::NotCalibrated)?;

        self.source.set_led(false)?;
        let lux = self.mean_sample()?.3;

        debug!("Container light level {:.1} (empty {:.1})", lux, empty_lux);

        Ok(lux <= empty_lux)
    }

    fn recognise(&mut self) -> Result<Recognition, SensorError> {
        self.source.set_led(true)?;
        let mean = self.mean_sample();

        // Always switch the LED back off, even if sampling failed
        self.source.set_led(false)?;
        let (r, g, b, _) = mean?;

        let recognition = classify_rgb(r as u32, g as u32, b as u32);
        debug!("Object colour ({}, {}, {}) recognised as {:?}", r, g, b, recognition);

        Ok(recognition)
    }
}

impl Default for ColourParams {
    fn default() -> Self {
        Self {
            num_samples: 10,
            sample_delay_ms: 50,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Classify an object from its mean reflected colour.
///
/// The colour is normalised against blue as percentages `r * 100 / b` and `g * 100 / b`. Clear
/// matches are tried first, then the red ratio alone decides.
pub fn classify_rgb(r: u32, g: u32, b: u32) -> Recognition {
    if b == 0 {
        return Recognition::Error;
    }

    let rb = r * 100 / b;
    let gb = g * 100 / b;

    if rb < 72 && gb < 90 {
        Recognition::Cotton
    } else if rb > 72 && rb < 180 && gb > 165 {
        Recognition::Gummy
    } else if rb > 180 && gb > 165 {
        Recognition::Ball
    } else if rb < 50 {
        Recognition::Cotton
    } else if rb > 220 {
        Recognition::Ball
    } else if rb > 50 {
        Recognition::Gummy
    } else {
        Recognition::Error
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sim::SimColourSource;

    #[test]
    fn test_classify_clear_matches() {
        // rb = 60, gb = 80
        assert_eq!(classify_rgb(60, 80, 100), Recognition::Cotton);
        // rb = 100, gb = 200
        assert_eq!(classify_rgb(100, 200, 100), Recognition::Gummy);
        // rb = 200, gb = 200
        assert_eq!(classify_rgb(200, 200, 100), Recognition::Ball);
    }

    #[test]
    fn test_classify_fallbacks() {
        // rb = 40, gb = 120: no clear match, low red
        assert_eq!(classify_rgb(40, 120, 100), Recognition::Cotton);
        // rb = 230, gb = 100: no clear match, high red
        assert_eq!(classify_rgb(230, 100, 100), Recognition::Ball);
        // rb = 120, gb = 100
        assert_eq!(classify_rgb(120, 100, 100), Recognition::Gummy);
        // rb = 50 exactly, gb = 100 falls through every rule
        assert_eq!(classify_rgb(50, 100, 100), Recognition::Error);
        assert_eq!(classify_rgb(10, 10, 0), Recognition::Error);
    }

    #[test]
    fn test_recognition_cargo() {
        assert_eq!(Recognition::Ball.cargo(), Some(Cargo::Ball));
        assert_eq!(Recognition::Error.cargo(), None);
        assert_eq!(Recognition::None.cargo(), None);
    }

    #[test]
    fn test_object_loaded() {
        let clock = Arc::new(ManualClock::new(0));
        let source = SimColourSource::new(ColourSample {
            r: 0,
            g: 0,
            b: 0,
            lux: 400,
        });
        let handle = source.handle();
        let mut sensor = ColourObjectSensor::new(source, ColourParams::default(), clock.clone());

        assert_eq!(sensor.object_loaded(), Err(SensorError::NotCalibrated));

        assert_eq!(sensor.calibrate(), Ok(400.0));

        // Sampling waits between samples
        assert_eq!(clock.now_ms(), 9 * 50);

        // Equal to the empty level counts as loaded
        assert_eq!(sensor.object_loaded(), Ok(true));

        handle.set_sample(ColourSample {
            lux: 401,
            ..Default::default()
        });
        assert_eq!(sensor.object_loaded(), Ok(false));

        handle.set_sample(ColourSample {
            lux: 120,
            ..Default::default()
        });
        assert_eq!(sensor.object_loaded(), Ok(true));
    }

    #[test]
    fn test_recognise_switches_led() {
        let clock = Arc::new(ManualClock::new(0));
        let source = SimColourSource::new(ColourSample {
            r: 200,
            g: 200,
            b: 100,
            lux: 50,
        });
        let handle = source.handle();
        let mut sensor = ColourObjectSensor::new(source, ColourParams::default(), clock);

        assert_eq!(sensor.recognise(), Ok(Recognition::Ball));
        assert!(!handle.led_on());
    }
}
