//! # Telecommand Client
//!
//! Server end of the operator control link. The console connects a REQ socket and sends one
//! command line per request, the AGV answers each with a [`TcResponse`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
    tc::{Tc, TcParseError, TcResponse},
};
use std::sync::{atomic::AtomicBool, Arc};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Telecommand client
pub struct TcClient {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TcClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("The console is not connected")]
    NotConnected,

    #[error("Could not send the response to the console: {0}")]
    SendError(zmq::Error),

    #[error("Could not receive a message from the console: {0}")]
    RecvError(zmq::Error),

    #[error("Could not parse the received telecommand: {0}")]
    TcParseError(TcParseError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TcClient {
    /// Bind the control link server.
    ///
    /// This function will not block until the console connects.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, TcClientError> {
        let socket_options = SocketOptions {
            bind: true,
            block_on_first_connect: false,
            heartbeat_ivl: params.heartbeat_ivl_ms,
            heartbeat_ttl: params.heartbeat_timeout_ms,
            heartbeat_timeout: params.heartbeat_timeout_ms,
            linger: 1,
            recv_timeout: 10,
            send_timeout: 10,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(
            ctx,
            zmq::REP,
            socket_options,
            &params.tc_server_endpoint,
        )
        .map_err(TcClientError::SocketError)?;

        Ok(Self { socket })
    }

    /// Check if the console is connected
    pub fn is_connected(&self) -> bool {
        self.socket.connected()
    }

    /// Handle on the connection state, for the watchdog.
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        self.socket.connected_flag()
    }

    /// Receive a single TC from the console.
    ///
    /// Returns `Ok(None)` if no TC arrived within the socket's receive timeout. After a valid TC
    /// the caller must answer with [`TcClient::send_response`] before receiving again. A TC which
    /// can't be parsed is answered with [`TcResponse::Invalid`] by this function.
    pub fn receive_tc(&self) -> Result<Option<Tc>, TcClientError> {
        if !self.socket.connected() {
            return Err(TcClientError::NotConnected);
        }

        let bytes = match self.socket.recv_bytes(0) {
            Ok(b) => b,
            // No message in timeout
            Err(zmq::Error::EAGAIN) => return Ok(None),
            // No response is sent if we could not receive
            Err(e) => return Err(TcClientError::RecvError(e)),
        };

        match Tc::from_bytes(&bytes) {
            Ok(tc) => Ok(Some(tc)),
            Err(e) => {
                self.send_response(TcResponse::Invalid)?;
                Err(TcClientError::TcParseError(e))
            }
        }
    }

    /// Send the given response back to the console.
    pub fn send_response(&self, response: TcResponse) -> Result<(), TcClientError> {
        self.socket
            .send(&response.to_json(), 0)
            .map_err(TcClientError::SendError)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn params(endpoint: &str) -> NetParams {
        NetParams {
            tc_server_endpoint: endpoint.into(),
            tc_client_endpoint: endpoint.into(),
            udp_bind_addr: "127.0.0.1:0".into(),
            station_endpoints: Vec::new(),
            heartbeat_ivl_ms: 500,
            heartbeat_timeout_ms: 1000,
        }
    }

    #[test]
    fn test_not_connected_without_console() {
        let ctx = zmq::Context::new();
        let client = TcClient::new(&ctx, &params("inproc://tc_client_test")).unwrap();

        assert!(!client.is_connected());
        assert!(matches!(
            client.receive_tc(),
            Err(TcClientError::NotConnected)
        ));
    }
}
