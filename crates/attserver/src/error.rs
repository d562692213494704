//! Local error types for the attserver library
//!
//! These describe failures that stay on this side of the link: registration
//! mistakes, transport and timer failures. Protocol failures that travel to
//! the peer as an Error Response live in [`crate::att::error`].

use crate::att::ConnectionId;
use thiserror::Error;

/// Errors reported by the transport when sending a PDU
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No buffers available")]
    NoBuffers,

    #[error("Connection {0} is not open")]
    NotConnected(ConnectionId),

    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by the device manager when arming a timer
#[derive(Error, Debug)]
pub enum TimerError {
    #[error("No timer available for connection {0}")]
    Unavailable(ConnectionId),

    #[error("Connection {0} is not known to the device manager")]
    UnknownConnection(ConnectionId),
}

/// Errors returned by the server to its local callers
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Connection {0} is already open")]
    DuplicateConnection(ConnectionId),

    #[error("A group starting at handle {0:#06x} is already registered")]
    DuplicateGroup(u16),

    #[error("Invalid attribute group: {0}")]
    InvalidGroup(String),

    #[error("An indication is already outstanding on connection {0}")]
    IndicationPending(ConnectionId),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Timer error: {0}")]
    Timer(#[from] TimerError),
}
