//! # Station Report Emitter
//!
//! Periodically sends the AGV's status record to every station it knows about. Stations are the
//! ones listed in the network parameters, plus any address a valid station datagram has recently
//! come from.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::station::encode_status;
use log::{debug, trace, warn};
use std::{
    collections::HashMap,
    net::{SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use crate::{clock::Clock, mission::Supervisor};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The set of stations status reports are sent to.
#[derive(Debug)]
pub struct PeerRegistry {
    /// Configured station endpoints, never expire
    fixed: Vec<SocketAddr>,

    /// Learned peers and the time they were last heard from, ms
    learned: Mutex<HashMap<SocketAddr, u64>>,

    peer_timeout_ms: u64,
}

pub struct StationReporter {
    socket: UdpSocket,
    supervisor: Arc<Supervisor>,
    peers: Arc<PeerRegistry>,
    clock: Arc<dyn Clock>,
    period_ms: u64,
}

/// Outcome of one round of reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportRound {
    pub sent: usize,
    pub failed: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PeerRegistry {
    pub fn new(fixed: Vec<SocketAddr>, peer_timeout_ms: u64) -> Self {
        Self {
            fixed,
            learned: Mutex::new(HashMap::new()),
            peer_timeout_ms,
        }
    }

    /// Record that a station was heard from at `now_ms`.
    pub fn register(&self, addr: SocketAddr, now_ms: u64) {
        if self.fixed.contains(&addr) {
            return;
        }

        if self.lock().insert(addr, now_ms).is_none() {
            debug!("New station peer {}", addr);
        }
    }

    /// Every peer to report to at `now_ms`. Learned peers not heard from for strictly more than
    /// the peer timeout are forgotten.
    pub fn peers(&self, now_ms: u64) -> Vec<SocketAddr> {
        let timeout_ms = self.peer_timeout_ms;
        let mut learned = self.lock();

        learned.retain(|addr, last_ms| {
            let keep = now_ms.saturating_sub(*last_ms) <= timeout_ms;
            if !keep {
                debug!("Station peer {} expired", addr);
            }
            keep
        });

        let mut peers = self.fixed.clone();
        peers.extend(learned.keys().copied());
        peers
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SocketAddr, u64>> {
        self.learned.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StationReporter {
    pub fn new(
        socket: UdpSocket,
        supervisor: Arc<Supervisor>,
        peers: Arc<PeerRegistry>,
        clock: Arc<dyn Clock>,
        period_ms: u64,
    ) -> Self {
        Self {
            socket,
            supervisor,
            peers,
            clock,
            period_ms,
        }
    }

    /// Send the current status to every peer.
    ///
    /// A failure to send to one peer is logged and the others are still sent to.
    pub fn send_once(&self) -> ReportRound {
        let status = self.supervisor.agv_status();
        let frame = encode_status(&status);
        let mut round = ReportRound::default();

        for peer in self.peers.peers(self.clock.now_ms()) {
            match self.socket.send_to(&frame, peer) {
                Ok(_) => round.sent += 1,
                Err(e) => {
                    warn!("Could not send status to {}: {}", peer, e);
                    round.failed += 1;
                }
            }
        }

        trace!("Status {} sent to {} stations", status, round.sent);

        round
    }

    /// Report until `run` is cleared.
    pub fn run(&self, run: &AtomicBool) {
        while run.load(Ordering::Relaxed) {
            self.send_once();
            self.clock.sleep_ms(self.period_ms);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
