//! # Link-timeout watchdog
//!
//! Ticks the observation store so that a lost tag or a silent vision sensor is noticed even when
//! no datagram arrives, and keeps the supervisor's control link flag in step with the control link
//! socket. The vision link flag follows the store through its link listener.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    clock::{BoundedWait, Clock},
    ingest::IngestStats,
    mission::{LinkKind, Supervisor},
    obs_store::{ObservationStore, TickReport},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Watchdog {
    store: Arc<ObservationStore>,
    supervisor: Arc<Supervisor>,
    clock: Arc<dyn Clock>,

    /// Connection state of the control link socket
    control_link: Arc<AtomicBool>,

    stats: Arc<IngestStats>,

    period_ms: u64,
    diagnostics_period_ms: u64,
    diagnostics: Option<BoundedWait>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Watchdog {
    pub fn new(
        store: Arc<ObservationStore>,
        supervisor: Arc<Supervisor>,
        clock: Arc<dyn Clock>,
        control_link: Arc<AtomicBool>,
        stats: Arc<IngestStats>,
        period_ms: u64,
        diagnostics_period_ms: u64,
    ) -> Self {
        Self {
            store,
            supervisor,
            clock,
            control_link,
            stats,
            period_ms,
            diagnostics_period_ms,
            diagnostics: None,
        }
    }

    pub fn tick(&mut self) -> TickReport {
        let now_ms = self.clock.now_ms();
        let report = self.store.tick(now_ms);

        if report.tag_expired {
            debug!("Tag not seen for too long, lost");
        }

        self.supervisor
            .set_link_state(LinkKind::Control, self.control_link.load(Ordering::Relaxed));

        let period_ms = self.diagnostics_period_ms;
        let diagnostics = self
            .diagnostics
            .get_or_insert_with(|| BoundedWait::start(now_ms, period_ms));
        if diagnostics.expired(now_ms) {
            debug!("Ingest: {:?}", self.stats.snapshot());
            *diagnostics = BoundedWait::start(now_ms, period_ms);
        }

        report
    }

    /// Tick until `run` is cleared.
    pub fn run(&mut self, run: &AtomicBool) {
        while run.load(Ordering::Relaxed) {
            self.tick();
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
    use crate::ingest::Ingest;
    use crate::mission::{
        test::supervisor_with_sensor, vision_link_listener, MissionState, StopCause,
    };
    use crate::obs_store::StoreParams;
    use crate::station_report::PeerRegistry;
    use comms_if::eqpt::vision::{encode_tag_datagram, TagDecode};
    use std::net::SocketAddr;

    struct Setup {
        clock: Arc<ManualClock>,
        store: Arc<ObservationStore>,
        supervisor: Arc<Supervisor>,
        control_link: Arc<AtomicBool>,
        watchdog: Watchdog,
    }

    fn setup() -> Setup {
        let clock = Arc::new(ManualClock::new(0));
        let (supervisor, _handle) = supervisor_with_sensor(clock.clone());
        supervisor.select_mission(MissionState::FetchGummy).unwrap();
        let supervisor = Arc::new(supervisor);

        let store = Arc::new(ObservationStore::with_link_listener(
            StoreParams::default(),
            vision_link_listener(&supervisor),
        ));
        store.update_from_tag_decode(&TagDecode { tags: Vec::new() }, clock.now_ms());

        let control_link = Arc::new(AtomicBool::new(true));

        let watchdog = Watchdog::new(
            store.clone(),
            supervisor.clone(),
            clock.clone(),
            control_link.clone(),
            Arc::new(IngestStats::default()),
            10,
            10_000,
        );

        Setup {
            clock,
            store,
            supervisor,
            control_link,
            watchdog,
        }
    }

    #[test]
    fn test_vision_link_timeout() {
        let mut s = setup();
        let start = s.clock.now_ms();

        s.clock.set(start + 2000);
        assert!(!s.watchdog.tick().link_lost);
        assert_eq!(s.supervisor.stop_mode(), None);

        s.clock.set(start + 2001);
        assert!(s.watchdog.tick().link_lost);
        assert!(!s.store.read_current().frame.link_connected);
        assert_eq!(s.supervisor.stop_mode(), Some(StopCause::VisionLinkDown));
    }

    #[test]
    fn test_control_link_mirrored() {
        let mut s = setup();

        s.control_link.store(false, Ordering::Relaxed);
        s.watchdog.tick();
        assert_eq!(s.supervisor.stop_mode(), Some(StopCause::ControlLinkDown));

        s.control_link.store(true, Ordering::Relaxed);
        s.watchdog.tick();
        assert_eq!(s.supervisor.stop_mode(), None);
    }

    #[test]
    fn test_vision_link_restored_between_tick_and_datagram() {
        let mut s = setup();
        let ingest = Ingest::new(
            s.store.clone(),
            s.supervisor.clone(),
            Arc::new(PeerRegistry::new(Vec::new(), 10_000)),
            s.clock.clone(),
        );
        let from = SocketAddr::from(([192, 168, 4, 3], 4210));
        let dgram = encode_tag_datagram(&[]);

        // Camera silent long enough for the watchdog to drop the link, then a datagram lands
        // straight after the tick
        s.clock.advance(5000);
        assert!(s.watchdog.tick().link_lost);
        assert_eq!(s.supervisor.stop_mode(), Some(StopCause::VisionLinkDown));

        ingest.handle_datagram(&dgram, from).unwrap();
        assert!(s.store.read_current().frame.link_connected);
        assert_eq!(s.supervisor.stop_mode(), None);

        // The watchdog has nothing stale left to apply, and the flags stay in step while the
        // camera keeps streaming
        for _ in 0..600 {
            s.clock.advance(100);
            ingest.handle_datagram(&dgram, from).unwrap();
            s.watchdog.tick();

            assert!(s.store.read_current().frame.link_connected);
            assert_eq!(s.supervisor.stop_mode(), None);
        }
    }
}
