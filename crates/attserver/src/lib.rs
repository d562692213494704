//! attserver - the server side of the Bluetooth Low Energy Attribute Protocol
//!
//! This library implements the ATT server engine that sits between an L2CAP
//! transport and a GATT profile layer. It keeps the registry of attribute
//! groups, dispatches incoming PDUs by opcode, generates Error Responses,
//! manages prepared (queued) writes per connection and tells the link manager
//! when service discovery on a connection has gone quiet.
//!
//! The transport and the device manager are supplied by the embedding stack
//! through the [`Transport`] and [`DeviceManager`] traits.

pub mod att;
pub mod error;
pub mod uuid;

// Re-export common types for convenience
pub use att::{
    Access, AttError, AttErrorCode, AttResult, AttServer, AttServerConfig, Attribute,
    AttributeGroup, AttributePermissions, AttributeSettings, AttributeStore, ConnectionId,
    DeviceManager, IndicationHandler, Method, Transport,
};
pub use error::{ServerError, TimerError, TransportError};
pub use uuid::Uuid;
