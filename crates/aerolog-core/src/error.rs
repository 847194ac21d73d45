//! Fault taxonomy for the engine
//!
//! Every fault here is recoverable from the supervisor's point of view: it is
//! recorded, logged and the cycle carries on. The only unrecoverable fault is a
//! missed watchdog feed, which is not a value at all but a hardware reset.

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Acquisition failure reported by a [`SensorPort`](crate::sensors::SensorPort)
/// or raised by range validation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorFault {
    #[error("sensor bus transaction failed")]
    Bus,
    #[error("sensor value outside the plausible range")]
    OutOfRange,
    #[error("sensor did not answer in time")]
    Timeout,
    #[error("sensor has no measurement ready")]
    NotReady,
}

impl SensorFault {
    /// Short machine-readable code used in JSON output.
    pub const fn code(self) -> &'static str {
        match self {
            Self::Bus => "bus",
            Self::OutOfRange => "out_of_range",
            Self::Timeout => "timeout",
            Self::NotReady => "not_ready",
        }
    }
}

/// Durable storage failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageFault {
    #[error("storage write failed")]
    Write,
    #[error("storage read failed")]
    Read,
    #[error("storage is full")]
    Full,
    #[error("stored data is corrupt")]
    Corrupt,
    #[error("log was compacted while being read")]
    Stale,
    #[error("storage is unavailable")]
    Unavailable,
}

impl StorageFault {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Read => "read",
            Self::Full => "full",
            Self::Corrupt => "corrupt",
            Self::Stale => "stale",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Network link failure seen by the request server's listener.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityFault {
    #[error("network link is down")]
    LinkDown,
    #[error("could not listen for connections")]
    ListenFailed,
}

/// Failure on an individual client connection.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoFault {
    #[error("connection closed by peer")]
    Closed,
    #[error("connection reset")]
    Reset,
}

/// Malformed or unsupported client request. Each variant maps to a 4xx/5xx status.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFault {
    #[error("request is not valid UTF-8")]
    NotUtf8,
    #[error("malformed request line")]
    MalformedRequestLine,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("no such resource")]
    NotFound,
    #[error("request header block too large")]
    HeadersTooLarge,
    #[error("unsupported HTTP version")]
    UnsupportedVersion,
}

/// Configuration rejected by [`DeviceConfig::validate`](crate::config::DeviceConfig::validate).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration is not valid JSON")]
    Parse,
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
