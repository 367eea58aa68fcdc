//! # Telecommand module
//!
//! Operator commands are short text tokens typed on the console and carried verbatim over the
//! control link. The AGV answers every command with a [`TcResponse`] serialised as JSON.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A telecommand, i.e. an instruction sent to the AGV by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tc {
    /// `stop`: abandon the current mission and stop
    Stop,

    /// `d`: deliver the loaded object to its station
    Deliver,

    /// `gg`: fetch a gummy
    FetchGummy,

    /// `gc`: fetch cotton
    FetchCotton,

    /// `gb`: fetch a ball
    FetchBall,

    /// `da`: leave the station now, without waiting for the station to finish
    DriveAway,
}

/// Response sent back to the operator for each telecommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TcResponse {
    /// The command was accepted and will be executed
    Ok,

    /// The command could not be parsed
    Invalid,

    /// The command was understood but can't be executed in the current state
    CannotExecute,
}

/// Possible parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TcParseError {
    #[error("Empty telecommand")]
    Empty,

    #[error("\"{0}\" is not a recognised telecommand")]
    Unknown(String),

    #[error("Telecommand is not valid UTF-8")]
    NotUtf8,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Tc {
    /// Parse a TC from one line of operator input.
    ///
    /// Tokens are case-sensitive, surrounding whitespace is ignored.
    pub fn from_line(line: &str) -> Result<Self, TcParseError> {
        match line.trim() {
            "" => Err(TcParseError::Empty),
            "stop" => Ok(Tc::Stop),
            "d" => Ok(Tc::Deliver),
            "gg" => Ok(Tc::FetchGummy),
            "gc" => Ok(Tc::FetchCotton),
            "gb" => Ok(Tc::FetchBall),
            "da" => Ok(Tc::DriveAway),
            s => Err(TcParseError::Unknown(s.to_string())),
        }
    }

    /// Parse a TC from the raw bytes of a control link message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TcParseError> {
        let line = std::str::from_utf8(bytes).map_err(|_| TcParseError::NotUtf8)?;
        Self::from_line(line)
    }

    /// The token the operator types for this TC.
    pub fn token(&self) -> &'static str {
        match self {
            Tc::Stop => "stop",
            Tc::Deliver => "d",
            Tc::FetchGummy => "gg",
            Tc::FetchCotton => "gc",
            Tc::FetchBall => "gb",
            Tc::DriveAway => "da",
        }
    }

    /// `true` if this TC selects a new mission, and so is rejected while a mission is active.
    pub fn selects_mission(&self) -> bool {
        !matches!(self, Tc::Stop | Tc::DriveAway)
    }
}

impl FromStr for Tc {
    type Err = TcParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_line(s)
    }
}

impl fmt::Display for Tc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.token())
    }
}

impl TcResponse {
    /// Serialise the response for the control link.
    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(s) => s,
            // Unit variants always serialise, keep a literal fallback anyway
            Err(_) => String::from("\"Invalid\""),
        }
    }

    /// Parse a response received over the control link.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_tokens() {
        for tc in &[
            Tc::Stop,
            Tc::Deliver,
            Tc::FetchGummy,
            Tc::FetchCotton,
            Tc::FetchBall,
            Tc::DriveAway,
        ] {
            assert_eq!(Tc::from_line(tc.token()), Ok(*tc));
        }

        assert_eq!(Tc::from_line("  gb\r\n"), Ok(Tc::FetchBall));
        assert_eq!("stop".parse::<Tc>(), Ok(Tc::Stop));
        assert_eq!(Tc::from_bytes(b"d\n"), Ok(Tc::Deliver));
    }

    #[test]
    fn test_parse_rejects() {
        assert_eq!(Tc::from_line("   "), Err(TcParseError::Empty));
        assert_eq!(
            Tc::from_line("STOP"),
            Err(TcParseError::Unknown("STOP".into()))
        );
        assert_eq!(
            Tc::from_line("g g"),
            Err(TcParseError::Unknown("g g".into()))
        );
        assert_eq!(Tc::from_bytes(&[0xFF, 0xFE]), Err(TcParseError::NotUtf8));
    }

    #[test]
    fn test_selects_mission() {
        assert!(Tc::Deliver.selects_mission());
        assert!(Tc::FetchCotton.selects_mission());
        assert!(!Tc::Stop.selects_mission());
        assert!(!Tc::DriveAway.selects_mission());
    }

    #[test]
    fn test_response_json() {
        assert_eq!(TcResponse::CannotExecute.to_json(), "\"CannotExecute\"");
        assert_eq!(TcResponse::from_json("\"Ok\"").unwrap(), TcResponse::Ok);
        assert!(TcResponse::from_json("\"Maybe\"").is_err());
    }
}
