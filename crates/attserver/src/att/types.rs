//! Type definitions shared by the ATT server modules
use bitflags::bitflags;
use std::fmt;

/// Identifier of one link as assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u16);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

impl From<u16> for ConnectionId {
    fn from(id: u16) -> Self {
        ConnectionId(id)
    }
}

bitflags! {
    /// Access permitted to a remote client.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AttributePermissions: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
        /// Reads must be approved by the authorization callback
        const READ_AUTHORIZATION = 0x04;
        /// Writes must be approved by the authorization callback
        const WRITE_AUTHORIZATION = 0x08;

        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

bitflags! {
    /// How the server stores and serves an attribute value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AttributeSettings: u8 {
        /// Stored length follows each write instead of staying fixed
        const VARIABLE_LENGTH = 0x01;
        /// Prepared writes with a non-zero offset are accepted
        const ALLOW_OFFSET = 0x02;
        /// Reads are answered by the group's read callback
        const READ_CALLBACK = 0x04;
        /// Writes are handed to the group's write callback instead of the store
        const WRITE_CALLBACK = 0x08;
        /// Signed Write Commands are accepted
        const ALLOW_SIGNED = 0x10;
    }
}

/// Kind of access asked of the authorization callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl AttributePermissions {
    pub fn permits(&self, access: Access) -> bool {
        match access {
            Access::Read => self.contains(Self::READ),
            Access::Write => self.contains(Self::WRITE),
        }
    }

    pub fn requires_authorization(&self, access: Access) -> bool {
        match access {
            Access::Read => self.contains(Self::READ_AUTHORIZATION),
            Access::Write => self.contains(Self::WRITE_AUTHORIZATION),
        }
    }
}
