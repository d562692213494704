//! Interfaces between the ATT server and the rest of the stack
use super::error::AttErrorCode;
use super::pdu::SignedWriteCommand;
use super::types::{Access, ConnectionId};
use crate::error::{TimerError, TransportError};
use std::sync::Arc;

/// Outbound path for ATT PDUs (the L2CAP fixed channel)
pub trait Transport: Send + Sync {
    /// Send one complete PDU on a connection
    fn send_pdu(&self, conn: ConnectionId, pdu: &[u8]) -> Result<(), TransportError>;
}

/// Link manager services used by the discovery-idle tracker
pub trait DeviceManager: Send + Sync {
    /// Report whether ATT discovery keeps the connection busy
    fn set_idle(&self, conn: ConnectionId, busy: bool);

    /// Arm the connection's idle timer; expiry is reported back through
    /// `AttServer::on_idle_timeout`, never from inside this call.
    fn start_timer(&self, conn: ConnectionId, seconds: u16) -> Result<(), TimerError>;

    fn stop_timer(&self, conn: ConnectionId);
}

/// Receives connection and indication events.
///
/// Every method has a default empty body, so a profile layer only overrides
/// the events it cares about.
pub trait IndicationHandler: Send + Sync {
    fn connection_opened(&self, _conn: ConnectionId) {}

    fn connection_closed(&self, _conn: ConnectionId) {}

    /// The client confirmed the outstanding indication
    fn confirmation_received(&self, _conn: ConnectionId) {}

    /// L2CAP flow control turned off (`false`) or back on (`true`)
    fn flow_control(&self, _conn: ConnectionId, _enabled: bool) {}
}

/// Indication handler installed by `AttServer::init`
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIndications;

impl IndicationHandler for NoIndications {}

/// Decides on accesses to attributes that require authorization. An error
/// code rejects the access and is sent to the client as is.
pub type AuthorizationCallback =
    Arc<dyn Fn(ConnectionId, Access, u16) -> Result<(), AttErrorCode> + Send + Sync>;

/// Receives Signed Write Commands for signature verification
pub type SignedWriteHandler = Arc<dyn Fn(ConnectionId, &SignedWriteCommand) + Send + Sync>;
