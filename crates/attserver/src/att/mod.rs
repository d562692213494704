//! Attribute Protocol (ATT) server
//!
//! The server owns the attribute registry and answers requests from a remote
//! ATT client. Incoming PDUs are classified into a [`Method`], checked against
//! the method's minimum length and handed to the method handler; failures are
//! turned into Error Responses unless the PDU is a command or confirmation.

pub mod constants;
pub mod database;
pub mod error;
pub mod idle;
pub mod interface;
pub mod method;
pub mod pdu;
pub mod prepare;
pub mod server;
pub mod types;


pub use self::constants::*;
pub use self::database::{
    Attribute, AttributeGroup, AttributeStore, AttributeValue, ReadCallback, StoreGuard,
    WriteCallback, WriteEvent, WriteKind,
};
pub use self::error::{AttError, AttErrorCode, AttResult};
pub use self::idle::{DiscoveryIdleTracker, IdleState};
pub use self::interface::{
    AuthorizationCallback, DeviceManager, IndicationHandler, NoIndications, SignedWriteHandler,
    Transport,
};
pub use self::method::Method;
pub use self::prepare::{PreparedWrite, PreparedWriteQueue, QueueState};
pub use self::server::{AttServer, AttServerConfig};
pub use self::types::{Access, AttributePermissions, AttributeSettings, ConnectionId};
