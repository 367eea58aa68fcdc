//! # Docking Station Datagrams
//!
//! Stations and the AGV exchange short frames starting with the `AGV` preamble:
//!
//! - The station sends its status as `AGV` + [`StationStatus`] (4 bytes).
//! - The AGV sends its status as `AGV` + [`RobotStatus`] + [`Cargo`] + [`StationRequest`]
//!   (6 bytes).
//!
//! Enum values are sent as a single byte, in declaration order.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

use super::MalformedPacket;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Preamble at the start of every station frame, `AGV`.
pub const PREAMBLE: [u8; 3] = [0x41, 0x47, 0x56];

/// Length of a frame sent by a station.
pub const STATION_MSG_LEN: usize = 4;

/// Length of a status frame sent by the AGV.
pub const STATUS_MSG_LEN: usize = 6;

// ------------------------------------------------------------------------------------------------
// MACROS
// ------------------------------------------------------------------------------------------------

/// Implement the byte conversions for a fieldless wire enum.
macro_rules! wire_enum {
    ($name:ident, $field:expr, [$($variant:ident = $value:literal),+]) => {
        impl From<$name> for u8 {
            fn from(v: $name) -> u8 {
                match v {
                    $($name::$variant => $value),+
                }
            }
        }

        impl TryFrom<u8> for $name {
            type Error = MalformedPacket;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)+
                    _ => Err(MalformedPacket::UnknownValue { field: $field, value })
                }
            }
        }
    };
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// What the robot is currently doing, as reported to the stations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RobotStatus {
    Idle,
    ApproachingStation,
    StoppedNearStation,
    DrivingAway,
}

/// What the robot is carrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cargo {
    Empty,
    Gummy,
    Cotton,
    Ball,
}

/// What the robot wants the station to do once it has docked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StationRequest {
    None,
    Unloading,
    LoadGummy,
    LoadCotton,
    LoadBall,
}

/// Status reported by a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StationStatus {
    Idle,
    Working,
}

wire_enum!(
    RobotStatus,
    "robot_status",
    [Idle = 0, ApproachingStation = 1, StoppedNearStation = 2, DrivingAway = 3]
);
wire_enum!(Cargo, "cargo", [Empty = 0, Gummy = 1, Cotton = 2, Ball = 3]);
wire_enum!(
    StationRequest,
    "station_request",
    [None = 0, Unloading = 1, LoadGummy = 2, LoadCotton = 3, LoadBall = 4]
);
wire_enum!(StationStatus, "station_status", [Idle = 0, Working = 1]);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The status record broadcast to every station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgvStatus {
    pub robot_status: RobotStatus,
    pub cargo: Cargo,
    pub request: StationRequest,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for AgvStatus {
    fn default() -> Self {
        Self {
            robot_status: RobotStatus::Idle,
            cargo: Cargo::Empty,
            request: StationRequest::None,
        }
    }
}

impl fmt::Display for AgvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}, cargo {:?}, request {:?}",
            self.robot_status, self.cargo, self.request
        )
    }
}

impl StationRequest {
    /// The cargo the robot will hold once the station has served this request, or `None` if
    /// there is no request.
    pub fn resulting_cargo(&self) -> Option<Cargo> {
        match self {
            StationRequest::None => None,
            StationRequest::Unloading => Some(Cargo::Empty),
            StationRequest::LoadGummy => Some(Cargo::Gummy),
            StationRequest::LoadCotton => Some(Cargo::Cotton),
            StationRequest::LoadBall => Some(Cargo::Ball),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Encode the AGV's status frame.
pub fn encode_status(status: &AgvStatus) -> [u8; STATUS_MSG_LEN] {
    [
        PREAMBLE[0],
        PREAMBLE[1],
        PREAMBLE[2],
        status.robot_status.into(),
        status.cargo.into(),
        status.request.into(),
    ]
}

/// Decode an AGV status frame, as a station would.
pub fn decode_status(buf: &[u8]) -> Result<AgvStatus, MalformedPacket> {
    check_frame(buf, STATUS_MSG_LEN)?;

    Ok(AgvStatus {
        robot_status: RobotStatus::try_from(buf[3])?,
        cargo: Cargo::try_from(buf[4])?,
        request: StationRequest::try_from(buf[5])?,
    })
}

/// Encode a station's status frame, as a station would.
pub fn encode_station(status: StationStatus) -> [u8; STATION_MSG_LEN] {
    [PREAMBLE[0], PREAMBLE[1], PREAMBLE[2], status.into()]
}

/// Decode a station's status frame.
pub fn decode_station(buf: &[u8]) -> Result<StationStatus, MalformedPacket> {
    check_frame(buf, STATION_MSG_LEN)?;

    StationStatus::try_from(buf[3])
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn check_frame(buf: &[u8], expected: usize) -> Result<(), MalformedPacket> {
    if buf.len() != expected {
        return Err(MalformedPacket::WrongLength {
            len: buf.len(),
            expected,
        });
    }

    if buf[..3] != PREAMBLE {
        let mut preamble = [0u8; 3];
        preamble.copy_from_slice(&buf[..3]);
        return Err(MalformedPacket::BadPreamble(preamble));
    }

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_encode_status_bytes() {
        let status = AgvStatus {
            robot_status: RobotStatus::StoppedNearStation,
            cargo: Cargo::Cotton,
            request: StationRequest::LoadBall,
        };

        assert_eq!(encode_status(&status), [0x41, 0x47, 0x56, 2, 2, 4]);
        assert_eq!(
            encode_status(&AgvStatus::default()),
            [0x41, 0x47, 0x56, 0, 0, 0]
        );
    }

    #[test]
    fn test_status_round_trip() {
        let status = AgvStatus {
            robot_status: RobotStatus::DrivingAway,
            cargo: Cargo::Gummy,
            request: StationRequest::Unloading,
        };

        assert_eq!(decode_status(&encode_status(&status)), Ok(status));
    }

    #[test]
    fn test_decode_station() {
        assert_eq!(
            decode_station(&[0x41, 0x47, 0x56, 0x01]),
            Ok(StationStatus::Working)
        );
        assert_eq!(
            decode_station(&encode_station(StationStatus::Idle)),
            Ok(StationStatus::Idle)
        );
    }

    #[test]
    fn test_decode_station_malformed() {
        assert_eq!(
            decode_station(&[0x41, 0x47, 0x56]),
            Err(MalformedPacket::WrongLength {
                len: 3,
                expected: 4
            })
        );
        assert_eq!(
            decode_station(&[0x41, 0x47, 0x56, 0x00, 0x00]),
            Err(MalformedPacket::WrongLength {
                len: 5,
                expected: 4
            })
        );
        assert_eq!(
            decode_station(&[0x41, 0x47, 0x57, 0x00]),
            Err(MalformedPacket::BadPreamble([0x41, 0x47, 0x57]))
        );
        assert_eq!(
            decode_station(&[0x41, 0x47, 0x56, 0x07]),
            Err(MalformedPacket::UnknownValue {
                field: "station_status",
                value: 7
            })
        );
    }

    #[test]
    fn test_decode_status_unknown_cargo() {
        assert_eq!(
            decode_status(&[0x41, 0x47, 0x56, 0, 4, 0]),
            Err(MalformedPacket::UnknownValue {
                field: "cargo",
                value: 4
            })
        );
    }

    #[test]
    fn test_resulting_cargo() {
        assert_eq!(StationRequest::None.resulting_cargo(), None);
        assert_eq!(StationRequest::Unloading.resulting_cargo(), Some(Cargo::Empty));
        assert_eq!(StationRequest::LoadCotton.resulting_cargo(), Some(Cargo::Cotton));
    }
}
