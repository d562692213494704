//! Opcode classification and the per-method dispatch table
use super::constants::*;

/// Server-side ATT method an incoming opcode belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    ExchangeMtu,
    FindInformation,
    FindByTypeValue,
    ReadByType,
    Read,
    ReadBlob,
    ReadMultiple,
    ReadByGroupType,
    Write,
    WriteCommand,
    PrepareWrite,
    ExecuteWrite,
    /// Server-to-client only; never handled when received
    ValueNotification,
    /// Server-to-client only; never handled when received
    ValueIndication,
    ValueConfirmation,
    SignedWriteCommand,
    Unknown,
}

impl Method {
    /// Classify a received opcode.
    pub fn from_opcode(opcode: u8) -> Self {
        match opcode {
            ATT_EXCHANGE_MTU_REQ => Method::ExchangeMtu,
            ATT_FIND_INFO_REQ => Method::FindInformation,
            ATT_FIND_BY_TYPE_VALUE_REQ => Method::FindByTypeValue,
            ATT_READ_BY_TYPE_REQ => Method::ReadByType,
            ATT_READ_REQ => Method::Read,
            ATT_READ_BLOB_REQ => Method::ReadBlob,
            ATT_READ_MULTIPLE_REQ => Method::ReadMultiple,
            ATT_READ_BY_GROUP_TYPE_REQ => Method::ReadByGroupType,
            ATT_WRITE_REQ => Method::Write,
            ATT_PREPARE_WRITE_REQ => Method::PrepareWrite,
            ATT_EXECUTE_WRITE_REQ => Method::ExecuteWrite,
            ATT_HANDLE_VALUE_NTF => Method::ValueNotification,
            ATT_HANDLE_VALUE_IND => Method::ValueIndication,
            ATT_HANDLE_VALUE_CONF => Method::ValueConfirmation,
            ATT_WRITE_CMD => Method::WriteCommand,
            ATT_SIGNED_WRITE_CMD => Method::SignedWriteCommand,
            _ => Method::Unknown,
        }
    }

    /// Shortest PDU, opcode included, the method's handler will accept.
    pub fn min_length(&self) -> usize {
        match self {
            Method::ExchangeMtu => ATT_EXCHANGE_MTU_REQ_LEN,
            Method::FindInformation => ATT_FIND_INFO_REQ_LEN,
            Method::FindByTypeValue => ATT_FIND_BY_TYPE_VALUE_REQ_LEN,
            Method::ReadByType => ATT_READ_BY_TYPE_REQ_LEN,
            Method::Read => ATT_READ_REQ_LEN,
            Method::ReadBlob => ATT_READ_BLOB_REQ_LEN,
            Method::ReadMultiple => ATT_READ_MULTIPLE_REQ_LEN,
            Method::ReadByGroupType => ATT_READ_BY_GROUP_TYPE_REQ_LEN,
            Method::Write => ATT_WRITE_REQ_LEN,
            Method::WriteCommand => ATT_WRITE_CMD_LEN,
            Method::PrepareWrite => ATT_PREPARE_WRITE_REQ_LEN,
            Method::ExecuteWrite => ATT_EXECUTE_WRITE_REQ_LEN,
            Method::ValueConfirmation => ATT_HANDLE_VALUE_CONF_LEN,
            Method::SignedWriteCommand => ATT_SIGNED_WRITE_CMD_LEN,
            Method::ValueNotification | Method::ValueIndication | Method::Unknown => 0,
        }
    }

    /// Whether the server processes this method at all.
    pub fn has_handler(&self) -> bool {
        !matches!(
            self,
            Method::ValueNotification | Method::ValueIndication | Method::Unknown
        )
    }

    /// Methods whose traffic keeps a connection out of the idle state.
    pub fn is_discovery(&self) -> bool {
        matches!(
            self,
            Method::ExchangeMtu
                | Method::FindInformation
                | Method::FindByTypeValue
                | Method::ReadByType
                | Method::ReadByGroupType
        )
    }

    /// Handle an Error Response for this request should name, taken from the
    /// raw PDU, or `ATT_HANDLE_NONE` when the PDU does not carry one.
    pub fn request_handle(&self, pdu: &[u8]) -> u16 {
        let carries_handle = matches!(
            self,
            Method::FindInformation
                | Method::FindByTypeValue
                | Method::ReadByType
                | Method::Read
                | Method::ReadBlob
                | Method::ReadMultiple
                | Method::ReadByGroupType
                | Method::Write
                | Method::WriteCommand
                | Method::PrepareWrite
                | Method::SignedWriteCommand
        );

        if carries_handle && pdu.len() >= 3 {
            u16::from_le_bytes([pdu[1], pdu[2]])
        } else {
            ATT_HANDLE_NONE
        }
    }
}

/// Whether a failure on this opcode must stay silent.
///
/// Commands and confirmations never get a response of any kind, and a failed
/// MTU exchange is not answered either.
pub fn suppresses_error_response(opcode: u8) -> bool {
    opcode == ATT_EXCHANGE_MTU_REQ
        || opcode == ATT_HANDLE_VALUE_CONF
        || opcode & ATT_OPCODE_COMMAND_FLAG != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_opcodes_classify() {
        assert_eq!(Method::from_opcode(0x02), Method::ExchangeMtu);
        assert_eq!(Method::from_opcode(0x0A), Method::Read);
        assert_eq!(Method::from_opcode(0x10), Method::ReadByGroupType);
        assert_eq!(Method::from_opcode(0x18), Method::ExecuteWrite);
        assert_eq!(Method::from_opcode(0x1E), Method::ValueConfirmation);
        assert_eq!(Method::from_opcode(0x52), Method::WriteCommand);
        assert_eq!(Method::from_opcode(0xD2), Method::SignedWriteCommand);
    }

    #[test]
    fn test_responses_and_reserved_opcodes_are_unknown() {
        for opcode in [0x00, 0x01, 0x03, 0x0B, 0x13, 0x14, 0x1A, 0x1C, 0x20, 0x53, 0xFF] {
            assert_eq!(Method::from_opcode(opcode), Method::Unknown, "opcode {:#x}", opcode);
        }
    }

    #[test]
    fn test_server_initiated_opcodes_have_no_handler() {
        assert!(!Method::from_opcode(ATT_HANDLE_VALUE_NTF).has_handler());
        assert!(!Method::from_opcode(ATT_HANDLE_VALUE_IND).has_handler());
        assert!(!Method::Unknown.has_handler());
        assert!(Method::Read.has_handler());
    }

    #[test]
    fn test_error_response_suppression() {
        assert!(suppresses_error_response(ATT_EXCHANGE_MTU_REQ));
        assert!(suppresses_error_response(ATT_HANDLE_VALUE_CONF));
        assert!(suppresses_error_response(ATT_WRITE_CMD));
        assert!(suppresses_error_response(ATT_SIGNED_WRITE_CMD));
        assert!(!suppresses_error_response(ATT_READ_REQ));
        assert!(!suppresses_error_response(ATT_HANDLE_VALUE_NTF));
    }

    #[test]
    fn test_request_handle_extraction() {
        assert_eq!(Method::Read.request_handle(&[0x0A, 0x05, 0x00]), 0x0005);
        assert_eq!(Method::FindInformation.request_handle(&[0x04, 0x01, 0x00, 0xFF, 0xFF]), 0x0001);
        assert_eq!(Method::Read.request_handle(&[0x0A, 0x05]), 0);
        assert_eq!(Method::ExecuteWrite.request_handle(&[0x18, 0x01, 0x00]), 0);
    }
}
