//! # AGV library.
//!
//! This library holds everything the AGV executable runs, so that it can be exercised by tests and
//! benchmarks without the network or the hardware:
//!
//! - [`obs_store`]: the shared view of the world (tag observation, ultrasonic ranges)
//! - [`mission`]: the mission and link supervisor, which gates navigation
//! - [`nav`]: the navigation state machine
//! - [`motion`] and [`sensors`]: the interfaces to the drive and sensor hardware
//! - the long running tasks: [`ingest`], [`ranging`], [`station_report`], [`watchdog`] and the
//!   control link ([`tc_client`], [`tc_processor`])

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Time sources and bounded waits
pub mod clock;

/// Ingestion of vision and station datagrams
pub mod ingest;

/// Mission and link supervisor
pub mod mission;

/// Drive interface and idempotent motion control
pub mod motion;

/// Navigation state machine
pub mod nav;

/// Observation store - single source of truth for tag and ultrasonic observations
pub mod obs_store;

/// Executable parameters
pub mod params;

/// Ultrasonic ranging task
pub mod ranging;

/// Sensor interfaces (ultrasonic ranger, colour object sensor)
pub mod sensors;

/// Simulated hardware, used when running on a development host and in tests
pub mod sim;

/// Station report emitter - periodically sends the AGV status to the stations
pub mod station_report;

/// Telecommand client - receives operator commands over the control link
pub mod tc_client;

/// Telecommand processor - applies operator commands to the supervisor
pub mod tc_processor;

/// Link-timeout watchdog
pub mod watchdog;
