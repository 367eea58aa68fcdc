//! # Observation Store
//!
//! The single source of truth for what the AGV can currently see: the tag reported by the vision
//! sensor, the liveness of the vision link, and the latest ultrasonic sweep.
//!
//! Writers (ingestion, ranging, watchdog) each own their own fields. The navigation loop only ever
//! reads whole [`Observation`] snapshots, all taken under the one lock, so it never sees a tag
//! center from one packet paired with a size or link flag from another.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::vision::TagDecode;
use serde::Deserialize;
use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of ultrasonic sensors in the array.
pub const NUM_US_SENSORS: usize = 5;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Position of an ultrasonic sensor in the array, in array order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsSensor {
    Left,
    FrontLeft,
    Front,
    FrontRight,
    Right,
}

/// Side of the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Distances measured by one full ultrasonic sweep, in centimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorFrame([f64; NUM_US_SENSORS]);

/// The vision part of the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationFrame {
    /// Mean vertical image position of the visible tags, `0` if no tag is visible
    pub tag_center_y: u32,

    /// Mean apparent size of the visible tags
    pub tag_size: f64,

    /// Time the tag was last seen, ms
    pub tag_last_seen_ms: u64,

    /// Whether datagrams are arriving from the vision sensor
    pub link_connected: bool,

    /// Time of the last structurally valid vision datagram, ms
    pub last_packet_ms: u64,
}

/// An immutable snapshot of the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub frame: ObservationFrame,

    pub sensors: SensorFrame,

    /// `true` once the ranging task has completed a full sweep, and for as long as it keeps
    /// producing them
    pub ranging_ready: bool,
}

/// Parameters of the store's staleness rules.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StoreParams {
    /// Time after which a tag that hasn't been seen is considered lost, ms
    pub tag_last_seen_timeout_ms: u64,

    /// Time without any vision datagram after which the vision link is considered lost, ms
    pub vision_link_timeout_ms: u64,

    /// Maximum range reported by the ultrasonic sensors, cm
    pub us_max_range_cm: f64,
}

/// Told the new state of the vision link each time it changes.
///
/// Called with the store still locked, so listeners see the changes in the order the store made
/// them and must not call back into the store.
pub type LinkListener = Box<dyn Fn(bool) + Send + Sync>;

/// The observation store.
pub struct ObservationStore {
    params: StoreParams,
    link_listener: Option<LinkListener>,
    inner: Mutex<Observation>,
}

/// What changed in an update from a tag decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateReport {
    /// The vision link was down and has been restored by this datagram
    pub link_restored: bool,

    /// The tag was not visible before this datagram and now is
    pub tag_acquired: bool,
}

/// What changed in a watchdog tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    /// The tag has gone stale and is no longer visible
    pub tag_expired: bool,

    /// No datagram has arrived for too long and the vision link is now down
    pub link_lost: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl UsSensor {
    /// All sensors in array order.
    pub const ALL: [UsSensor; NUM_US_SENSORS] = [
        UsSensor::Left,
        UsSensor::FrontLeft,
        UsSensor::Front,
        UsSensor::FrontRight,
        UsSensor::Right,
    ];

    /// Index of the sensor in a [`SensorFrame`].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// The lateral and front-diagonal sensors covering this side.
    pub fn flank_sensors(self) -> [UsSensor; 2] {
        match self {
            Side::Left => [UsSensor::Left, UsSensor::FrontLeft],
            Side::Right => [UsSensor::Right, UsSensor::FrontRight],
        }
    }

    /// `+1` for left, `-1` for right, used to count net turning.
    pub fn sign(self) -> i32 {
        match self {
            Side::Left => 1,
            Side::Right => -1,
        }
    }
}

impl SensorFrame {
    /// Build a frame, clamping every distance into `[0, max_range_cm]`.
    ///
    /// Non-finite distances are treated as "nothing in range".
    pub fn new(distances_cm: [f64; NUM_US_SENSORS], max_range_cm: f64) -> Self {
        let mut frame = [0f64; NUM_US_SENSORS];
        for (f, d) in frame.iter_mut().zip(distances_cm.iter()) {
            *f = if d.is_finite() {
                d.max(0.0).min(max_range_cm)
            } else {
                max_range_cm
            };
        }

        Self(frame)
    }

    /// Distance measured by one sensor, cm.
    pub fn get(&self, sensor: UsSensor) -> f64 {
        self.0[sensor.index()]
    }

    pub fn as_array(&self) -> &[f64; NUM_US_SENSORS] {
        &self.0
    }
}

impl Default for ObservationFrame {
    fn default() -> Self {
        Self {
            tag_center_y: 0,
            tag_size: 0.0,
            tag_last_seen_ms: 0,
            link_connected: false,
            last_packet_ms: 0,
        }
    }
}

impl Default for Observation {
    fn default() -> Self {
        Self {
            frame: ObservationFrame::default(),
            sensors: SensorFrame::default(),
            ranging_ready: false,
        }
    }
}

impl Observation {
    /// `true` if a tag is currently visible.
    pub fn tag_visible(&self) -> bool {
        self.frame.tag_center_y != 0
    }

    /// Distance measured by the sensor, or `None` if no sweep has completed yet.
    pub fn range_cm(&self, sensor: UsSensor) -> Option<f64> {
        if self.ranging_ready {
            Some(self.sensors.get(sensor))
        } else {
            None
        }
    }

    /// `true` if the sensor reads at least `threshold_cm`. Unknown readings are never clear.
    pub fn is_clear(&self, sensor: UsSensor, threshold_cm: f64) -> bool {
        self.range_cm(sensor).map_or(false, |d| d >= threshold_cm)
    }

    /// `true` if the sensor reads less than `threshold_cm`. Unknown readings are never blocked.
    pub fn is_blocked(&self, sensor: UsSensor, threshold_cm: f64) -> bool {
        self.range_cm(sensor).map_or(false, |d| d < threshold_cm)
    }

    /// `true` if both sensors covering the side are clear.
    pub fn flank_clear(&self, side: Side, threshold_cm: f64) -> bool {
        side.flank_sensors()
            .iter()
            .all(|s| self.is_clear(*s, threshold_cm))
    }

    /// Smallest distance on the side, or `None` if unknown.
    pub fn flank_clearance_cm(&self, side: Side) -> Option<f64> {
        let [a, b] = side.flank_sensors();
        Some(self.range_cm(a)?.min(self.range_cm(b)?))
    }

    /// The side with the most room, preferring `tie_break` when both are equal.
    pub fn clearer_side(&self, tie_break: Side) -> Side {
        let other = tie_break.opposite();
        match (
            self.flank_clearance_cm(tie_break),
            self.flank_clearance_cm(other),
        ) {
            (Some(a), Some(b)) if b > a => other,
            _ => tie_break,
        }
    }

    /// `true` if all three forward-facing sensors are clear.
    pub fn front_clear(&self, threshold_cm: f64) -> bool {
        [UsSensor::FrontLeft, UsSensor::Front, UsSensor::FrontRight]
            .iter()
            .all(|s| self.is_clear(*s, threshold_cm))
    }
}

impl ObservationStore {
    pub fn new(params: StoreParams) -> Self {
        Self {
            params,
            link_listener: None,
            inner: Mutex::new(Observation::default()),
        }
    }

    /// Create a store which reports every vision link change to `listener`.
    pub fn with_link_listener(params: StoreParams, listener: LinkListener) -> Self {
        Self {
            link_listener: Some(listener),
            ..Self::new(params)
        }
    }

    pub fn params(&self) -> &StoreParams {
        &self.params
    }

    /// Apply a successfully decoded tag datagram received at `now_ms`.
    ///
    /// Any valid datagram refreshes the link. The tag fields are only written if the datagram
    /// carried at least one tag, losing the tag is left to [`ObservationStore::tick`].
    pub fn update_from_tag_decode(&self, decode: &TagDecode, now_ms: u64) -> UpdateReport {
        let mut obs = self.lock();
        let mut report = UpdateReport::default();

        obs.frame.last_packet_ms = now_ms;
        if !obs.frame.link_connected {
            obs.frame.link_connected = true;
            report.link_restored = true;
            self.notify_link(true);
        }

        if let (Some(center_y), Some(size)) = (decode.mean_center_y(), decode.mean_size()) {
            report.tag_acquired = obs.frame.tag_center_y == 0;

            obs.frame.tag_center_y = center_y;
            obs.frame.tag_size = size;
            obs.frame.tag_last_seen_ms = now_ms;
        }

        report
    }

    /// Store the distances of a completed sweep, in sensor array order.
    pub fn mark_sensor_sweep_complete(&self, distances_cm: [f64; NUM_US_SENSORS]) {
        let frame = SensorFrame::new(distances_cm, self.params.us_max_range_cm);

        let mut obs = self.lock();
        obs.sensors = frame;
        obs.ranging_ready = true;
    }

    /// Mark the ultrasonic readings as unusable until the next completed sweep.
    pub fn invalidate_sensors(&self) {
        self.lock().ranging_ready = false;
    }

    /// Take a snapshot of the store.
    pub fn read_current(&self) -> Observation {
        *self.lock()
    }

    /// Adjudicate staleness at `now_ms`.
    ///
    /// The tag is dropped once it has not been seen for strictly more than the last-seen timeout,
    /// and the link is dropped once no datagram has arrived for strictly more than the link
    /// timeout.
    pub fn tick(&self, now_ms: u64) -> TickReport {
        let mut obs = self.lock();
        let mut report = TickReport::default();

        if obs.frame.tag_center_y != 0
            && now_ms.saturating_sub(obs.frame.tag_last_seen_ms)
                > self.params.tag_last_seen_timeout_ms
        {
            obs.frame.tag_center_y = 0;
            report.tag_expired = true;
        }

        if obs.frame.link_connected
            && now_ms.saturating_sub(obs.frame.last_packet_ms) > self.params.vision_link_timeout_ms
        {
            obs.frame.link_connected = false;
            report.link_lost = true;
            self.notify_link(false);
        }

        report
    }

    /// Must only be called with the store locked.
    fn notify_link(&self, up: bool) {
        if let Some(listener) = &self.link_listener {
            listener(up);
        }
    }

    /// Lock the store. A writer panicking mid-update can only have left a field half written, and
    /// every field is rewritten by the next update, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Observation> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ObservationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationStore")
            .field("params", &self.params)
            .field("link_listener", &self.link_listener.is_some())
            .field("inner", &self.inner)
            .finish()
    }
}

impl Default for StoreParams {
    fn default() -> Self {
        Self {
            tag_last_seen_timeout_ms: 1000,
            vision_link_timeout_ms: 2000,
            us_max_range_cm: 200.0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::eqpt::vision::{decode_tag_datagram, TagObservation};
    use std::sync::Arc;

    fn tag_at(y: f64, size: f64) -> TagObservation {
        let h = size / 2.0;
        TagObservation {
            id: 0,
            hamming_error: 0,
            num_code_bits: 36,
            center: [320.0, y],
            corners: [
                [320.0 - h, y - h],
                [320.0 + h, y - h],
                [320.0 + h, y + h],
                [320.0 - h, y + h],
            ],
            homography: [0.0; 9],
        }
    }

    fn decode_of(tags: Vec<TagObservation>) -> TagDecode {
        TagDecode { tags }
    }

    #[test]
    fn test_update_sets_tag_and_link() {
        let store = ObservationStore::new(StoreParams::default());

        let report = store.update_from_tag_decode(
            &decode_of(vec![tag_at(580.0, 100.0), tag_at(620.0, 100.0)]),
            5000,
        );
        assert!(report.link_restored);
        assert!(report.tag_acquired);

        let obs = store.read_current();
        assert_eq!(obs.frame.tag_center_y, 600);
        assert_eq!(obs.frame.tag_size, 100.0);
        assert_eq!(obs.frame.tag_last_seen_ms, 5000);
        assert_eq!(obs.frame.last_packet_ms, 5000);
        assert!(obs.frame.link_connected);
        assert!(obs.tag_visible());
    }

    #[test]
    fn test_zero_tags_only_refreshes_packet_time() {
        let store = ObservationStore::new(StoreParams::default());
        store.update_from_tag_decode(&decode_of(vec![tag_at(400.0, 50.0)]), 100);

        let report = store.update_from_tag_decode(&decode_of(vec![]), 300);
        assert_eq!(report, UpdateReport::default());

        let obs = store.read_current();
        assert_eq!(obs.frame.tag_center_y, 400);
        assert_eq!(obs.frame.tag_last_seen_ms, 100);
        assert_eq!(obs.frame.last_packet_ms, 300);
    }

    #[test]
    fn test_malformed_datagram_leaves_store_unchanged() {
        let store = ObservationStore::new(StoreParams::default());
        store.update_from_tag_decode(&decode_of(vec![tag_at(400.0, 50.0)]), 100);
        let before = store.read_current();

        // Ingestion only applies successful decodes
        let short = [0x41u8; 10];
        if let Ok(d) = decode_tag_datagram(&short) {
            store.update_from_tag_decode(&d, 200);
        }

        assert_eq!(store.read_current(), before);
    }

    #[test]
    fn test_tick_tag_timeout_boundary() {
        let store = ObservationStore::new(StoreParams::default());
        store.update_from_tag_decode(&decode_of(vec![tag_at(400.0, 50.0)]), 1000);

        // TIMEOUT - 1 since last seen
        assert_eq!(store.tick(1999).tag_expired, false);
        assert_eq!(store.read_current().frame.tag_center_y, 400);

        // Exactly TIMEOUT is not strictly greater
        assert_eq!(store.tick(2000).tag_expired, false);

        assert_eq!(store.tick(2001).tag_expired, true);
        assert_eq!(store.read_current().frame.tag_center_y, 0);

        // Only reported once
        assert_eq!(store.tick(2500).tag_expired, false);
    }

    #[test]
    fn test_tick_link_timeout() {
        let store = ObservationStore::new(StoreParams::default());
        store.update_from_tag_decode(&decode_of(vec![]), 0);

        assert_eq!(store.tick(2000), TickReport::default());

        let report = store.tick(2001);
        assert!(report.link_lost);
        assert!(!store.read_current().frame.link_connected);

        let report = store.update_from_tag_decode(&decode_of(vec![]), 2100);
        assert!(report.link_restored);
    }

    #[test]
    fn test_link_listener_sees_every_change() {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let recorded = changes.clone();
        let store = ObservationStore::with_link_listener(
            StoreParams::default(),
            Box::new(move |up| recorded.lock().unwrap().push(up)),
        );

        store.update_from_tag_decode(&decode_of(vec![]), 0);
        store.update_from_tag_decode(&decode_of(vec![]), 1000);
        store.tick(2000);
        store.tick(3001);
        store.tick(3500);
        store.update_from_tag_decode(&decode_of(vec![]), 3600);

        assert_eq!(*changes.lock().unwrap(), vec![true, false, true]);
    }

    #[test]
    fn test_sensor_sweep() {
        let store = ObservationStore::new(StoreParams::default());
        assert!(!store.read_current().ranging_ready);
        assert_eq!(store.read_current().range_cm(UsSensor::Front), None);

        store.mark_sensor_sweep_complete([10.0, -3.0, 250.0, std::f64::NAN, 42.0]);

        let obs = store.read_current();
        assert!(obs.ranging_ready);
        assert_eq!(obs.sensors.as_array(), &[10.0, 0.0, 200.0, 200.0, 42.0]);

        store.invalidate_sensors();
        assert!(!store.read_current().ranging_ready);
    }

    #[test]
    fn test_clearance_queries() {
        let store = ObservationStore::new(StoreParams::default());

        // Unknown readings are neither clear nor blocked
        let obs = store.read_current();
        assert!(!obs.front_clear(7.0));
        assert!(!obs.is_blocked(UsSensor::Front, 7.0));

        store.mark_sensor_sweep_complete([30.0, 8.0, 3.0, 100.0, 100.0]);
        let obs = store.read_current();

        assert!(obs.is_blocked(UsSensor::Front, 7.0));
        assert!(obs.flank_clear(Side::Left, 7.0));
        assert!(!obs.flank_clear(Side::Left, 25.0));
        assert!(obs.flank_clear(Side::Right, 25.0));
        assert!(!obs.front_clear(7.0));
        assert_eq!(obs.flank_clearance_cm(Side::Left), Some(8.0));
        assert_eq!(obs.clearer_side(Side::Left), Side::Right);
        assert_eq!(obs.clearer_side(Side::Right), Side::Right);
    }
}
