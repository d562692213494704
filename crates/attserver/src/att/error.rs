//! Error handling for the ATT protocol
use super::constants::*;
use thiserror::Error;

/// ATT error codes as carried in an Error Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttErrorCode {
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPdu,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    AttributeNotFound,
    AttributeNotLong,
    InsufficientEncryptionKeySize,
    InvalidAttributeValueLength,
    Unlikely,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
    /// Application defined error (0x80 - 0x9F)
    ApplicationError(u8),
    /// Any other code, including the common profile range
    Other(u8),
}

impl From<u8> for AttErrorCode {
    fn from(code: u8) -> Self {
        match code {
            ATT_ERROR_INVALID_HANDLE => AttErrorCode::InvalidHandle,
            ATT_ERROR_READ_NOT_PERMITTED => AttErrorCode::ReadNotPermitted,
            ATT_ERROR_WRITE_NOT_PERMITTED => AttErrorCode::WriteNotPermitted,
            ATT_ERROR_INVALID_PDU => AttErrorCode::InvalidPdu,
            ATT_ERROR_INSUFFICIENT_AUTHENTICATION => AttErrorCode::InsufficientAuthentication,
            ATT_ERROR_REQUEST_NOT_SUPPORTED => AttErrorCode::RequestNotSupported,
            ATT_ERROR_INVALID_OFFSET => AttErrorCode::InvalidOffset,
            ATT_ERROR_INSUFFICIENT_AUTHORIZATION => AttErrorCode::InsufficientAuthorization,
            ATT_ERROR_PREPARE_QUEUE_FULL => AttErrorCode::PrepareQueueFull,
            ATT_ERROR_ATTRIBUTE_NOT_FOUND => AttErrorCode::AttributeNotFound,
            ATT_ERROR_ATTRIBUTE_NOT_LONG => AttErrorCode::AttributeNotLong,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE => {
                AttErrorCode::InsufficientEncryptionKeySize
            }
            ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH => AttErrorCode::InvalidAttributeValueLength,
            ATT_ERROR_UNLIKELY => AttErrorCode::Unlikely,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION => AttErrorCode::InsufficientEncryption,
            ATT_ERROR_UNSUPPORTED_GROUP_TYPE => AttErrorCode::UnsupportedGroupType,
            ATT_ERROR_INSUFFICIENT_RESOURCES => AttErrorCode::InsufficientResources,
            ATT_ERROR_APPLICATION_ERROR_START..=ATT_ERROR_APPLICATION_ERROR_END => {
                AttErrorCode::ApplicationError(code)
            }
            _ => AttErrorCode::Other(code),
        }
    }
}

impl From<AttErrorCode> for u8 {
    fn from(code: AttErrorCode) -> u8 {
        match code {
            AttErrorCode::InvalidHandle => ATT_ERROR_INVALID_HANDLE,
            AttErrorCode::ReadNotPermitted => ATT_ERROR_READ_NOT_PERMITTED,
            AttErrorCode::WriteNotPermitted => ATT_ERROR_WRITE_NOT_PERMITTED,
            AttErrorCode::InvalidPdu => ATT_ERROR_INVALID_PDU,
            AttErrorCode::InsufficientAuthentication => ATT_ERROR_INSUFFICIENT_AUTHENTICATION,
            AttErrorCode::RequestNotSupported => ATT_ERROR_REQUEST_NOT_SUPPORTED,
            AttErrorCode::InvalidOffset => ATT_ERROR_INVALID_OFFSET,
            AttErrorCode::InsufficientAuthorization => ATT_ERROR_INSUFFICIENT_AUTHORIZATION,
            AttErrorCode::PrepareQueueFull => ATT_ERROR_PREPARE_QUEUE_FULL,
            AttErrorCode::AttributeNotFound => ATT_ERROR_ATTRIBUTE_NOT_FOUND,
            AttErrorCode::AttributeNotLong => ATT_ERROR_ATTRIBUTE_NOT_LONG,
            AttErrorCode::InsufficientEncryptionKeySize => {
                ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE
            }
            AttErrorCode::InvalidAttributeValueLength => ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH,
            AttErrorCode::Unlikely => ATT_ERROR_UNLIKELY,
            AttErrorCode::InsufficientEncryption => ATT_ERROR_INSUFFICIENT_ENCRYPTION,
            AttErrorCode::UnsupportedGroupType => ATT_ERROR_UNSUPPORTED_GROUP_TYPE,
            AttErrorCode::InsufficientResources => ATT_ERROR_INSUFFICIENT_RESOURCES,
            AttErrorCode::ApplicationError(code) | AttErrorCode::Other(code) => code,
        }
    }
}

/// Outcome of a failed ATT operation.
///
/// Every variant maps onto a wire error code through [`AttError::to_error_code`]
/// and, where one is known, the handle the Error Response should carry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttError {
    #[error("Invalid PDU")]
    InvalidPdu,

    #[error("Request not supported")]
    RequestNotSupported,

    /// No attribute with this handle is registered
    #[error("Attribute {0:#06x} not found")]
    NotFound(u16),

    /// A range request matched nothing
    #[error("No attributes found from handle {0:#06x}")]
    NoAttributesInRange(u16),

    /// Malformed handle range (zero start, or start after end)
    #[error("Invalid handle range starting at {0:#06x}")]
    InvalidRange(u16),

    #[error("{len} bytes exceed the maximum length {max} of attribute {handle:#06x}")]
    LengthExceeded { handle: u16, len: usize, max: u16 },

    #[error("Invalid offset {offset} for attribute {handle:#06x}")]
    InvalidOffset { handle: u16, offset: u16 },

    #[error("Read not permitted on attribute {0:#06x}")]
    ReadNotPermitted(u16),

    #[error("Write not permitted on attribute {0:#06x}")]
    WriteNotPermitted(u16),

    /// The authorization callback declined access
    #[error("Access to attribute {handle:#06x} not authorized ({code:?})")]
    Unauthorized { handle: u16, code: AttErrorCode },

    #[error("Attribute {0:#06x} is not a long attribute")]
    AttributeNotLong(u16),

    #[error("Prepare queue full")]
    PrepareQueueFull(u16),

    #[error("Unsupported group type")]
    UnsupportedGroupType(u16),

    /// Error code produced by a profile-level read or write callback
    #[error("Application error {code:?} on attribute {handle:#06x}")]
    Application { handle: u16, code: AttErrorCode },
}

impl AttError {
    /// Convert to ATT error code
    pub fn to_error_code(&self) -> AttErrorCode {
        match self {
            AttError::InvalidPdu => AttErrorCode::InvalidPdu,
            AttError::RequestNotSupported => AttErrorCode::RequestNotSupported,
            AttError::NotFound(_) | AttError::InvalidRange(_) => AttErrorCode::InvalidHandle,
            AttError::NoAttributesInRange(_) => AttErrorCode::AttributeNotFound,
            AttError::LengthExceeded { .. } => AttErrorCode::InvalidAttributeValueLength,
            AttError::InvalidOffset { .. } => AttErrorCode::InvalidOffset,
            AttError::ReadNotPermitted(_) => AttErrorCode::ReadNotPermitted,
            AttError::WriteNotPermitted(_) => AttErrorCode::WriteNotPermitted,
            AttError::Unauthorized { code, .. } => *code,
            AttError::AttributeNotLong(_) => AttErrorCode::AttributeNotLong,
            AttError::PrepareQueueFull(_) => AttErrorCode::PrepareQueueFull,
            AttError::UnsupportedGroupType(_) => AttErrorCode::UnsupportedGroupType,
            AttError::Application { code, .. } => *code,
        }
    }

    /// Get the handle associated with this error, if any
    pub fn handle(&self) -> Option<u16> {
        match self {
            AttError::InvalidPdu | AttError::RequestNotSupported => None,
            AttError::NotFound(handle)
            | AttError::NoAttributesInRange(handle)
            | AttError::InvalidRange(handle)
            | AttError::ReadNotPermitted(handle)
            | AttError::WriteNotPermitted(handle)
            | AttError::AttributeNotLong(handle)
            | AttError::PrepareQueueFull(handle)
            | AttError::UnsupportedGroupType(handle) => Some(*handle),
            AttError::LengthExceeded { handle, .. }
            | AttError::InvalidOffset { handle, .. }
            | AttError::Unauthorized { handle, .. }
            | AttError::Application { handle, .. } => Some(*handle),
        }
    }
}

/// ATT Result type
pub type AttResult<T> = Result<T, AttError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_byte_mapping() {
        assert_eq!(u8::from(AttErrorCode::InvalidPdu), 0x04);
        assert_eq!(AttErrorCode::from(0x0D), AttErrorCode::InvalidAttributeValueLength);
        assert_eq!(AttErrorCode::from(0x85), AttErrorCode::ApplicationError(0x85));
        assert_eq!(AttErrorCode::from(0xFD), AttErrorCode::Other(0xFD));
        assert_eq!(u8::from(AttErrorCode::Other(0xFD)), 0xFD);
    }

    #[test]
    fn test_lookup_miss_reports_invalid_handle() {
        let err = AttError::NotFound(0x0042);
        assert_eq!(err.to_error_code(), AttErrorCode::InvalidHandle);
        assert_eq!(err.handle(), Some(0x0042));
        assert_eq!(AttError::InvalidPdu.handle(), None);
    }

    #[test]
    fn test_unauthorized_carries_callback_code() {
        let err = AttError::Unauthorized {
            handle: 7,
            code: AttErrorCode::InsufficientAuthorization,
        };
        assert_eq!(err.to_error_code(), AttErrorCode::InsufficientAuthorization);
    }
}
