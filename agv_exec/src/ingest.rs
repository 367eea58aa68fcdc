//! # Datagram ingestion
//!
//! Receives datagrams from the vision sensor and the stations on the one UDP socket. Station
//! datagrams are told apart by their length, everything else is decoded as a tag datagram.
//! Malformed datagrams are counted, logged and dropped without touching any state.
//!
//! The vision link flag of the supervisor is not written here, the observation store reports its
//! link changes to the supervisor itself.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::{
    station::{decode_station, StationStatus, STATION_MSG_LEN},
    vision::decode_tag_datagram,
    MalformedPacket,
};
use log::{debug, info, warn};
use std::{
    io::ErrorKind,
    net::{SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use crate::{
    clock::Clock,
    mission::Supervisor,
    obs_store::ObservationStore,
    station_report::PeerRegistry,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Largest datagram accepted, bigger ones are truncated by the socket and fail to decode.
const MAX_DATAGRAM_LEN: usize = 65536;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Counters of received datagrams, for diagnostics.
#[derive(Debug, Default)]
pub struct IngestStats {
    tag_datagrams: AtomicU64,
    station_datagrams: AtomicU64,
    malformed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestStatsSnapshot {
    pub tag_datagrams: u64,
    pub station_datagrams: u64,
    pub malformed: u64,
}

/// The ingestion task.
pub struct Ingest {
    store: Arc<ObservationStore>,
    supervisor: Arc<Supervisor>,
    peers: Arc<PeerRegistry>,
    clock: Arc<dyn Clock>,
    stats: Arc<IngestStats>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// What a datagram was accepted as.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Datagram {
    Tags { num_tags: usize },
    Station(StationStatus),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl IngestStats {
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            tag_datagrams: self.tag_datagrams.load(Ordering::Relaxed),
            station_datagrams: self.station_datagrams.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

impl Ingest {
    pub fn new(
        store: Arc<ObservationStore>,
        supervisor: Arc<Supervisor>,
        peers: Arc<PeerRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            supervisor,
            peers,
            clock,
            stats: Arc::new(IngestStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    /// Handle one datagram received from `from`.
    pub fn handle_datagram(
        &self,
        buf: &[u8],
        from: SocketAddr,
    ) -> Result<Datagram, MalformedPacket> {
        let result = if buf.len() == STATION_MSG_LEN {
            self.handle_station(buf, from)
        } else {
            self.handle_tags(buf)
        };

        if let Err(ref e) = result {
            self.stats.malformed.fetch_add(1, Ordering::Relaxed);
            warn!("Dropped malformed datagram from {}: {}", from, e);
        }

        result
    }

    /// Receive datagrams until `run` is cleared.
    ///
    /// The socket must have a read timeout so that `run` is checked regularly.
    pub fn run(&self, socket: &UdpSocket, run: &AtomicBool) {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

        while run.load(Ordering::Relaxed) {
            match socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    self.handle_datagram(&buf[..len], from).ok();
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                }
                Err(e) => warn!("Error receiving datagram: {}", e),
            }
        }
    }

    fn handle_station(&self, buf: &[u8], from: SocketAddr) -> Result<Datagram, MalformedPacket> {
        let status = decode_station(buf)?;

        self.stats.station_datagrams.fetch_add(1, Ordering::Relaxed);
        self.peers.register(from, self.clock.now_ms());
        self.supervisor.set_station_status(status);

        Ok(Datagram::Station(status))
    }

    fn handle_tags(&self, buf: &[u8]) -> Result<Datagram, MalformedPacket> {
        let decode = decode_tag_datagram(buf)?;

        self.stats.tag_datagrams.fetch_add(1, Ordering::Relaxed);
        let report = self
            .store
            .update_from_tag_decode(&decode, self.clock.now_ms());

        if report.link_restored {
            info!("Vision datagrams arriving");
        }
        if report.tag_acquired {
            debug!("Tag acquired");
        }

        Ok(Datagram::Tags {
            num_tags: decode.num_tags(),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::ManualClock;
    use crate::mission::{test::supervisor_with_sensor, vision_link_listener, LinkKind};
    use crate::obs_store::StoreParams;
    use comms_if::eqpt::{
        station::encode_station,
        vision::{encode_tag_datagram, TagObservation},
    };

    struct Setup {
        clock: Arc<ManualClock>,
        store: Arc<ObservationStore>,
        supervisor: Arc<Supervisor>,
        peers: Arc<PeerRegistry>,
        ingest: Ingest,
    }

    fn setup() -> Setup {
        let clock = Arc::new(ManualClock::new(1000));
        let (supervisor, _handle) = supervisor_with_sensor(clock.clone());
        supervisor.set_link_state(LinkKind::Vision, false);
        let supervisor = Arc::new(supervisor);

        let store = Arc::new(ObservationStore::with_link_listener(
            StoreParams::default(),
            vision_link_listener(&supervisor),
        ));
        let peers = Arc::new(PeerRegistry::new(Vec::new(), 10_000));

        let ingest = Ingest::new(
            store.clone(),
            supervisor.clone(),
            peers.clone(),
            clock.clone(),
        );

        Setup {
            clock,
            store,
            supervisor,
            peers,
            ingest,
        }
    }

    fn from() -> SocketAddr {
        SocketAddr::from(([192, 168, 4, 2], 4210))
    }

    fn tag_at(y: f64) -> TagObservation {
        TagObservation {
            id: 1,
            hamming_error: 0,
            num_code_bits: 36,
            center: [320.0, y],
            corners: [
                [270.0, y - 50.0],
                [370.0, y - 50.0],
                [370.0, y + 50.0],
                [270.0, y + 50.0],
            ],
            homography: [0.0; 9],
        }
    }

    #[test]
    fn test_tag_datagram_updates_store_and_link() {
        let s = setup();

        let dgram = encode_tag_datagram(&[tag_at(580.0), tag_at(620.0)]);
        assert_eq!(
            s.ingest.handle_datagram(&dgram, from()),
            Ok(Datagram::Tags { num_tags: 2 })
        );

        let obs = s.store.read_current();
        assert_eq!(obs.frame.tag_center_y, 600);
        assert_eq!(obs.frame.tag_last_seen_ms, 1000);
        assert!(obs.frame.link_connected);
        assert!(s.supervisor.link_up(LinkKind::Vision));

        // A datagram without tags refreshes the link but keeps the tag
        s.clock.advance(300);
        s.ingest
            .handle_datagram(&encode_tag_datagram(&[]), from())
            .unwrap();
        let obs = s.store.read_current();
        assert_eq!(obs.frame.tag_center_y, 600);
        assert_eq!(obs.frame.tag_last_seen_ms, 1000);
        assert_eq!(obs.frame.last_packet_ms, 1300);

        assert_eq!(s.ingest.stats().snapshot().tag_datagrams, 2);
    }

    #[test]
    fn test_malformed_datagram_dropped() {
        let s = setup();
        let before = s.store.read_current();

        let mut dgram = encode_tag_datagram(&[tag_at(600.0)]);
        dgram[0] = 0;
        assert!(s.ingest.handle_datagram(&dgram, from()).is_err());
        assert!(s.ingest.handle_datagram(&[0x41, 0x50], from()).is_err());
        assert!(s
            .ingest
            .handle_datagram(&[0x41, 0x47, 0x56, 9], from())
            .is_err());

        assert_eq!(s.store.read_current(), before);
        assert!(!s.supervisor.link_up(LinkKind::Vision));
        assert_eq!(s.supervisor.station_status(), None);
        assert_eq!(
            s.ingest.stats().snapshot(),
            IngestStatsSnapshot {
                tag_datagrams: 0,
                station_datagrams: 0,
                malformed: 3,
            }
        );
    }

    #[test]
    fn test_station_datagram() {
        let s = setup();

        assert_eq!(
            s.ingest
                .handle_datagram(&encode_station(StationStatus::Working), from()),
            Ok(Datagram::Station(StationStatus::Working))
        );
        assert_eq!(s.supervisor.station_status(), Some(StationStatus::Working));
        assert_eq!(s.peers.peers(1000), vec![from()]);

        // Station datagrams say nothing about the vision link
        assert!(!s.store.read_current().frame.link_connected);
    }
}
