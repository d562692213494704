//! Wire format of the PDUs the server receives and sends
//!
//! Requests are parsed from the full PDU (opcode included), responses are
//! serialized the same way. Multi-byte fields are little-endian.
use super::constants::*;
use super::error::{AttError, AttErrorCode, AttResult};
use crate::uuid::Uuid;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// An ATT packet with a fixed opcode
pub trait AttPacket: Sized {
    /// Opcode for this packet
    fn opcode() -> u8;
}

/// A PDU sent by the client
pub trait AttRequest: AttPacket {
    /// Parse packet from bytes, opcode included
    fn parse(data: &[u8]) -> AttResult<Self>;
}

/// A PDU sent by the server
pub trait AttResponse: AttPacket {
    /// Serialize packet to bytes, opcode included
    fn serialize(&self) -> Vec<u8>;
}

/// Cursor over a request body that turns every short read into `InvalidPdu`.
struct PduReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> PduReader<'a> {
    fn new<P: AttPacket>(data: &'a [u8]) -> AttResult<Self> {
        if data.first() != Some(&P::opcode()) {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(data);
        cursor.set_position(1);
        Ok(Self { cursor })
    }

    fn u8(&mut self) -> AttResult<u8> {
        self.cursor.read_u8().map_err(|_| AttError::InvalidPdu)
    }

    fn u16(&mut self) -> AttResult<u16> {
        self.cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| AttError::InvalidPdu)
    }

    fn remaining(&self) -> usize {
        let data = *self.cursor.get_ref();
        data.len().saturating_sub(self.cursor.position() as usize)
    }

    fn take(&mut self, len: usize) -> AttResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| AttError::InvalidPdu)?;
        Ok(buf)
    }

    fn rest(&mut self) -> Vec<u8> {
        let len = self.remaining();
        self.take(len).unwrap_or_default()
    }

    fn uuid(&mut self) -> AttResult<Uuid> {
        let raw = self.rest();
        Uuid::try_from_att_slice(&raw).ok_or(AttError::InvalidPdu)
    }
}

macro_rules! opcode {
    ($ty:ty, $op:expr) => {
        impl AttPacket for $ty {
            fn opcode() -> u8 {
                $op
            }
        }
    };
}

/// Error response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Request opcode in error
    pub request_opcode: u8,
    /// Attribute handle in error
    pub handle: u16,
    pub error_code: AttErrorCode,
}

opcode!(ErrorResponse, ATT_ERROR_RSP);

impl ErrorResponse {
    pub fn new(request_opcode: u8, handle: u16, error_code: AttErrorCode) -> Self {
        Self {
            request_opcode,
            handle,
            error_code,
        }
    }

    /// Parse an Error Response, as a client would see it
    pub fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() != 5 {
            return Err(AttError::InvalidPdu);
        }

        let mut reader = PduReader::new::<Self>(data)?;
        Ok(Self {
            request_opcode: reader.u8()?,
            handle: reader.u16()?,
            error_code: reader.u8()?.into(),
        })
    }
}

impl AttResponse for ErrorResponse {
    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5);
        packet.push(Self::opcode());
        packet.push(self.request_opcode);
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.push(self.error_code.into());
        packet
    }
}

/// Exchange MTU Request packet
#[derive(Debug, Clone)]
pub struct ExchangeMtuRequest {
    /// Client Rx MTU size
    pub client_mtu: u16,
}

opcode!(ExchangeMtuRequest, ATT_EXCHANGE_MTU_REQ);

impl AttRequest for ExchangeMtuRequest {
    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut reader = PduReader::new::<Self>(data)?;
        Ok(Self {
            client_mtu: reader.u16()?,
        })
    }
}

/// Exchange MTU Response packet
#[derive(Debug, Clone)]
pub struct ExchangeMtuResponse {
    /// Server Rx MTU size
    pub server_mtu: u16,
}

opcode!(ExchangeMtuResponse, ATT_EXCHANGE_MTU_RSP);

impl AttResponse for ExchangeMtuResponse {
    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode()];
        packet.extend_from_slice(&self.server_mtu.to_le_bytes());
        packet
    }
}

/// Start and end of a requested handle range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRange {
    pub start: u16,
    pub end: u16,
}

impl HandleRange {
    fn read(reader: &mut PduReader<'_>) -> AttResult<Self> {
        Ok(Self {
            start: reader.u16()?,
            end: reader.u16()?,
        })
    }

    /// A range is only valid when it starts at a real handle and is not reversed
    pub fn validate(&self) -> AttResult<()> {
        if self.start == ATT_HANDLE_NONE || self.start > self.end {
            Err(AttError::InvalidRange(self.start))
        } else {
            Ok(())
        }
    }
}

/// Find Information Request packet
#[derive(Debug, Clone)]
pub struct FindInformationRequest {
    pub range: HandleRange,
}

opcode!(FindInformationRequest, ATT_FIND_INFO_REQ);

impl AttRequest for FindInformationRequest {
    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut reader = PduReader::new::<Self>(data)?;
        Ok(Self {
            range: HandleRange::read(&mut reader)?,
        })
    }
}

/// Find Information Response packet
///
/// All entries must share one UUID width; the format byte is taken from the
/// first entry.
#[derive(Debug, Clone)]
pub struct FindInformationResponse {
    pub entries: Vec<(u16, Uuid)>,
}

opcode!(FindInformationResponse, ATT_FIND_INFO_RSP);

impl AttResponse for FindInformationResponse {
    fn serialize(&self) -> Vec<u8> {
        let short = self
            .entries
            .first()
            .map_or(true, |(_, uuid)| uuid.as_u16().is_some());

        let mut packet = vec![Self::opcode()];
        packet.push(if short {
            ATT_FIND_INFO_RSP_FORMAT_16BIT
        } else {
            ATT_FIND_INFO_RSP_FORMAT_128BIT
        });

        for (handle, uuid) in &self.entries {
            packet.extend_from_slice(&handle.to_le_bytes());
            uuid.write_att(&mut packet);
        }

        packet
    }
}

/// Find By Type Value Request packet
#[derive(Debug, Clone)]
pub struct FindByTypeValueRequest {
    pub range: HandleRange,
    /// Attribute type (always a 16-bit UUID)
    pub attribute_type: u16,
    /// Attribute value to match
    pub attribute_value: Vec<u8>,
}

opcode!(FindByTypeValueRequest, ATT_FIND_BY_TYPE_VALUE_REQ);

impl AttRequest for FindByTypeValueRequest {
    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut reader = PduReader::new::<Self>(data)?;
        Ok(Self {
            range: HandleRange::read(&mut reader)?,
            attribute_type: reader.u16()?,
            attribute_value: reader.rest(),
        })
    }
}

/// Find By Type Value Response packet
#[derive(Debug, Clone)]
pub struct FindByTypeValueResponse {
    /// (found attribute handle, group end handle) pairs
    pub handles: Vec<(u16, u16)>,
}

opcode!(FindByTypeValueResponse, ATT_FIND_BY_TYPE_VALUE_RSP);

impl AttResponse for FindByTypeValueResponse {
    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + self.handles.len() * 4);
        packet.push(Self::opcode());

        for (found, group_end) in &self.handles {
            packet.extend_from_slice(&found.to_le_bytes());
            packet.extend_from_slice(&group_end.to_le_bytes());
        }

        packet
    }
}

/// Read By Type Request packet
#[derive(Debug, Clone)]
pub struct ReadByTypeRequest {
    pub range: HandleRange,
    pub attribute_type: Uuid,
}

opcode!(ReadByTypeRequest, ATT_READ_BY_TYPE_REQ);

impl AttRequest for ReadByTypeRequest {
    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut reader = PduReader::new::<Self>(data)?;
        Ok(Self {
            range: HandleRange::read(&mut reader)?,
            attribute_type: reader.uuid()?,
        })
    }
}

/// Handle and value in Read By Type Response
#[derive(Debug, Clone)]
pub struct HandleValue {
    pub handle: u16,
    pub value: Vec<u8>,
}

/// Read By Type Response packet
#[derive(Debug, Clone)]
pub struct ReadByTypeResponse {
    /// Length of each handle-value pair
    pub length: u8,
    pub data: Vec<HandleValue>,
}

opcode!(ReadByTypeResponse, ATT_READ_BY_TYPE_RSP);

impl AttResponse for ReadByTypeResponse {
    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode(), self.length];

        for entry in &self.data {
            packet.extend_from_slice(&entry.handle.to_le_bytes());
            packet.extend_from_slice(&entry.value);
        }

        packet
    }
}

/// Read Request packet
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub handle: u16,
}

opcode!(ReadRequest, ATT_READ_REQ);

impl AttRequest for ReadRequest {
    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut reader = PduReader::new::<Self>(data)?;
        Ok(Self {
            handle: reader.u16()?,
        })
    }
}

/// Read Response packet
#[derive(Debug, Clone)]
pub struct ReadResponse {
    pub value: Vec<u8>,
}

opcode!(ReadResponse, ATT_READ_RSP);

impl AttResponse for ReadResponse {
    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Read Blob Request packet
#[derive(Debug, Clone)]
pub struct ReadBlobRequest {
    pub handle: u16,
    pub offset: u16,
}

opcode!(ReadBlobRequest, ATT_READ_BLOB_REQ);

impl AttRequest for ReadBlobRequest {
    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut reader = PduReader::new::<Self>(data)?;
        Ok(Self {
            handle: reader.u16()?,
            offset: reader.u16()?,
        })
    }
}

/// Read Blob Response packet
#[derive(Debug, Clone)]
pub struct ReadBlobResponse {
    pub value: Vec<u8>,
}

opcode!(ReadBlobResponse, ATT_READ_BLOB_RSP);

impl AttResponse for ReadBlobResponse {
    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Read Multiple Request packet
#[derive(Debug, Clone)]
pub struct ReadMultipleRequest {
    pub handles: Vec<u16>,
}

opcode!(ReadMultipleRequest, ATT_READ_MULTIPLE_REQ);

impl AttRequest for ReadMultipleRequest {
    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut reader = PduReader::new::<Self>(data)?;

        // At least two handles, and no trailing half handle
        if reader.remaining() < 4 || reader.remaining() % 2 != 0 {
            return Err(AttError::InvalidPdu);
        }

        let mut handles = Vec::with_capacity(reader.remaining() / 2);
        while reader.remaining() > 0 {
            handles.push(reader.u16()?);
        }

        Ok(Self { handles })
    }
}

/// Read Multiple Response packet
#[derive(Debug, Clone)]
pub struct ReadMultipleResponse {
    pub values: Vec<u8>,
}

opcode!(ReadMultipleResponse, ATT_READ_MULTIPLE_RSP);

impl AttResponse for ReadMultipleResponse {
    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + self.values.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.values);
        packet
    }
}

/// Read By Group Type Request packet
#[derive(Debug, Clone)]
pub struct ReadByGroupTypeRequest {
    pub range: HandleRange,
    pub group_type: Uuid,
}

opcode!(ReadByGroupTypeRequest, ATT_READ_BY_GROUP_TYPE_REQ);

impl AttRequest for ReadByGroupTypeRequest {
    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut reader = PduReader::new::<Self>(data)?;
        Ok(Self {
            range: HandleRange::read(&mut reader)?,
            group_type: reader.uuid()?,
        })
    }
}

/// One group in a Read By Group Type Response
#[derive(Debug, Clone)]
pub struct GroupData {
    pub handle: u16,
    pub end_group_handle: u16,
    pub value: Vec<u8>,
}

/// Read By Group Type Response packet
#[derive(Debug, Clone)]
pub struct ReadByGroupTypeResponse {
    /// Length of each group entry
    pub length: u8,
    pub data: Vec<GroupData>,
}

opcode!(ReadByGroupTypeResponse, ATT_READ_BY_GROUP_TYPE_RSP);

impl AttResponse for ReadByGroupTypeResponse {
    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode(), self.length];

        for group in &self.data {
            packet.extend_from_slice(&group.handle.to_le_bytes());
            packet.extend_from_slice(&group.end_group_handle.to_le_bytes());
            packet.extend_from_slice(&group.value);
        }

        packet
    }
}

/// Write Request packet
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub handle: u16,
    pub value: Vec<u8>,
}

opcode!(WriteRequest, ATT_WRITE_REQ);

impl AttRequest for WriteRequest {
    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut reader = PduReader::new::<Self>(data)?;
        Ok(Self {
            handle: reader.u16()?,
            value: reader.rest(),
        })
    }
}

/// Write Response packet
#[derive(Debug, Clone)]
pub struct WriteResponse;

opcode!(WriteResponse, ATT_WRITE_RSP);

impl AttResponse for WriteResponse {
    fn serialize(&self) -> Vec<u8> {
        vec![Self::opcode()]
    }
}

/// Write Command packet
#[derive(Debug, Clone)]
pub struct WriteCommand {
    pub handle: u16,
    pub value: Vec<u8>,
}

opcode!(WriteCommand, ATT_WRITE_CMD);

impl AttRequest for WriteCommand {
    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut reader = PduReader::new::<Self>(data)?;
        Ok(Self {
            handle: reader.u16()?,
            value: reader.rest(),
        })
    }
}

/// Signed Write Command packet
#[derive(Debug, Clone)]
pub struct SignedWriteCommand {
    pub handle: u16,
    pub value: Vec<u8>,
    /// Authentication signature trailing the value
    pub signature: [u8; ATT_SIGNATURE_LEN],
}

opcode!(SignedWriteCommand, ATT_SIGNED_WRITE_CMD);

impl AttRequest for SignedWriteCommand {
    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut reader = PduReader::new::<Self>(data)?;
        let handle = reader.u16()?;

        let value_len = reader
            .remaining()
            .checked_sub(ATT_SIGNATURE_LEN)
            .ok_or(AttError::InvalidPdu)?;
        let value = reader.take(value_len)?;

        let mut signature = [0u8; ATT_SIGNATURE_LEN];
        signature.copy_from_slice(&reader.take(ATT_SIGNATURE_LEN)?);

        Ok(Self {
            handle,
            value,
            signature,
        })
    }
}

/// Prepare Write Request packet
#[derive(Debug, Clone)]
pub struct PrepareWriteRequest {
    pub handle: u16,
    pub offset: u16,
    pub value: Vec<u8>,
}

opcode!(PrepareWriteRequest, ATT_PREPARE_WRITE_REQ);

impl AttRequest for PrepareWriteRequest {
    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut reader = PduReader::new::<Self>(data)?;
        Ok(Self {
            handle: reader.u16()?,
            offset: reader.u16()?,
            value: reader.rest(),
        })
    }
}

/// Prepare Write Response packet, echoing the request
#[derive(Debug, Clone)]
pub struct PrepareWriteResponse {
    pub handle: u16,
    pub offset: u16,
    pub value: Vec<u8>,
}

opcode!(PrepareWriteResponse, ATT_PREPARE_WRITE_RSP);

impl From<PrepareWriteRequest> for PrepareWriteResponse {
    fn from(request: PrepareWriteRequest) -> Self {
        Self {
            handle: request.handle,
            offset: request.offset,
            value: request.value,
        }
    }
}

impl AttResponse for PrepareWriteResponse {
    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.offset.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Execute Write Request packet
#[derive(Debug, Clone)]
pub struct ExecuteWriteRequest {
    /// `true` to apply the queued writes, `false` to discard them
    pub commit: bool,
}

opcode!(ExecuteWriteRequest, ATT_EXECUTE_WRITE_REQ);

impl AttRequest for ExecuteWriteRequest {
    fn parse(data: &[u8]) -> AttResult<Self> {
        let mut reader = PduReader::new::<Self>(data)?;
        match reader.u8()? {
            ATT_EXEC_WRITE_CANCEL => Ok(Self { commit: false }),
            ATT_EXEC_WRITE_COMMIT => Ok(Self { commit: true }),
            _ => Err(AttError::InvalidPdu),
        }
    }
}

/// Execute Write Response packet
#[derive(Debug, Clone)]
pub struct ExecuteWriteResponse;

opcode!(ExecuteWriteResponse, ATT_EXECUTE_WRITE_RSP);

impl AttResponse for ExecuteWriteResponse {
    fn serialize(&self) -> Vec<u8> {
        vec![Self::opcode()]
    }
}

/// Handle Value Notification packet
#[derive(Debug, Clone)]
pub struct HandleValueNotification {
    pub handle: u16,
    pub value: Vec<u8>,
}

opcode!(HandleValueNotification, ATT_HANDLE_VALUE_NTF);

impl AttResponse for HandleValueNotification {
    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Handle Value Indication packet
#[derive(Debug, Clone)]
pub struct HandleValueIndication {
    pub handle: u16,
    pub value: Vec<u8>,
}

opcode!(HandleValueIndication, ATT_HANDLE_VALUE_IND);

impl AttResponse for HandleValueIndication {
    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_layout() {
        let rsp = ErrorResponse::new(ATT_READ_REQ, 0x0005, AttErrorCode::InvalidHandle);
        let bytes = rsp.serialize();
        assert_eq!(bytes, vec![0x01, 0x0A, 0x05, 0x00, 0x01]);
        assert_eq!(ErrorResponse::parse(&bytes).unwrap(), rsp);
    }

    #[test]
    fn test_parse_rejects_wrong_opcode() {
        assert_eq!(ReadRequest::parse(&[0x0C, 0x01, 0x00]).unwrap_err(), AttError::InvalidPdu);
        assert_eq!(ReadRequest::parse(&[]).unwrap_err(), AttError::InvalidPdu);
    }

    #[test]
    fn test_read_by_type_uuid_width() {
        let short = ReadByTypeRequest::parse(&[0x08, 0x01, 0x00, 0xFF, 0xFF, 0x03, 0x28]).unwrap();
        assert_eq!(short.attribute_type, Uuid::from_u16(CHARACTERISTIC_UUID));
        assert_eq!(short.range, HandleRange { start: 1, end: 0xFFFF });

        let mut long = vec![0x08, 0x01, 0x00, 0xFF, 0xFF];
        long.extend_from_slice(&[0xAB; 16]);
        assert!(ReadByTypeRequest::parse(&long).is_ok());

        let odd = [0x08, 0x01, 0x00, 0xFF, 0xFF, 0x03, 0x28, 0x00];
        assert_eq!(ReadByTypeRequest::parse(&odd).unwrap_err(), AttError::InvalidPdu);
    }

    #[test]
    fn test_handle_range_validation() {
        assert!(HandleRange { start: 1, end: 1 }.validate().is_ok());
        assert_eq!(
            HandleRange { start: 0, end: 5 }.validate().unwrap_err(),
            AttError::InvalidRange(0)
        );
        assert_eq!(
            HandleRange { start: 6, end: 5 }.validate().unwrap_err(),
            AttError::InvalidRange(6)
        );
    }

    #[test]
    fn test_read_multiple_needs_whole_handles() {
        let ok = ReadMultipleRequest::parse(&[0x0E, 0x01, 0x00, 0x02, 0x00]).unwrap();
        assert_eq!(ok.handles, vec![1, 2]);
        assert!(ReadMultipleRequest::parse(&[0x0E, 0x01, 0x00, 0x02, 0x00, 0x03]).is_err());
        assert!(ReadMultipleRequest::parse(&[0x0E, 0x01, 0x00]).is_err());
    }

    #[test]
    fn test_signed_write_splits_signature() {
        let mut pdu = vec![0xD2, 0x10, 0x00, 0xAA, 0xBB];
        pdu.extend_from_slice(&[0x5A; ATT_SIGNATURE_LEN]);

        let cmd = SignedWriteCommand::parse(&pdu).unwrap();
        assert_eq!(cmd.handle, 0x0010);
        assert_eq!(cmd.value, vec![0xAA, 0xBB]);
        assert_eq!(cmd.signature, [0x5A; ATT_SIGNATURE_LEN]);
    }

    #[test]
    fn test_execute_write_flags() {
        assert!(ExecuteWriteRequest::parse(&[0x18, 0x01]).unwrap().commit);
        assert!(!ExecuteWriteRequest::parse(&[0x18, 0x00]).unwrap().commit);
        assert_eq!(ExecuteWriteRequest::parse(&[0x18, 0x02]).unwrap_err(), AttError::InvalidPdu);
    }

    #[test]
    fn test_find_information_format_follows_first_entry() {
        let rsp = FindInformationResponse {
            entries: vec![(0x0001, Uuid::from_u16(PRIMARY_SERVICE_UUID))],
        };
        assert_eq!(rsp.serialize(), vec![0x05, 0x01, 0x01, 0x00, 0x00, 0x28]);
    }
}
