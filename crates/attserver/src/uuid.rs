use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth UUID identifying the type of an attribute.
///
/// The value is always kept as 128 bits in little-endian byte order, the order
/// used on the ATT wire. SIG-assigned 16-bit values are expanded with the
/// Bluetooth base UUID and can be recovered with [`Uuid::as_u16`].
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Uuid {
    bytes: [u8; 16],
}

/// "00000000-0000-1000-8000-00805F9B34FB" in little-endian order.
const BASE_UUID_BYTES: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

const BASE_OFFSET: usize = 12;

impl Uuid {
    /// Creates a UUID from 16 little-endian bytes.
    pub const fn from_bytes_le(bytes: [u8; 16]) -> Self {
        Uuid { bytes }
    }

    /// Creates a UUID from 16 big-endian bytes (the textual order).
    pub fn from_bytes_be(mut bytes: [u8; 16]) -> Self {
        bytes.reverse();
        Uuid { bytes }
    }

    /// Creates a UUID from a SIG-assigned 16-bit value.
    pub const fn from_u16(uuid16: u16) -> Self {
        let mut bytes = BASE_UUID_BYTES;
        bytes[BASE_OFFSET] = uuid16 as u8;
        bytes[BASE_OFFSET + 1] = (uuid16 >> 8) as u8;
        Uuid { bytes }
    }

    /// Parses the UUID field of an ATT PDU.
    ///
    /// ATT only carries 16-bit and 128-bit UUIDs, so any other length yields
    /// `None`.
    pub fn try_from_att_slice(slice: &[u8]) -> Option<Self> {
        match slice.len() {
            2 => Some(Uuid::from_u16(u16::from_le_bytes([slice[0], slice[1]]))),
            16 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(slice);
                Some(Uuid::from_bytes_le(bytes))
            }
            _ => None,
        }
    }

    pub const fn as_bytes_le(&self) -> &[u8; 16] {
        &self.bytes
    }

    pub fn as_bytes_be(&self) -> [u8; 16] {
        let mut bytes = self.bytes;
        bytes.reverse();
        bytes
    }

    /// Returns the 16-bit short form if this is a SIG-assigned 16-bit UUID.
    pub fn as_u16(&self) -> Option<u16> {
        let sig_assigned = self.bytes[..BASE_OFFSET] == BASE_UUID_BYTES[..BASE_OFFSET];

        if sig_assigned && self.bytes[BASE_OFFSET + 2] == 0 && self.bytes[BASE_OFFSET + 3] == 0 {
            Some(u16::from_le_bytes([
                self.bytes[BASE_OFFSET],
                self.bytes[BASE_OFFSET + 1],
            ]))
        } else {
            None
        }
    }

    /// Appends the shortest ATT encoding of this UUID to `buf`.
    pub fn write_att(&self, buf: &mut Vec<u8>) {
        match self.as_u16() {
            Some(short) => buf.extend_from_slice(&short.to_le_bytes()),
            None => buf.extend_from_slice(&self.bytes),
        }
    }

    /// Length in bytes of the shortest ATT encoding.
    pub fn att_len(&self) -> usize {
        if self.as_u16().is_some() {
            2
        } else {
            16
        }
    }
}

impl From<u16> for Uuid {
    fn from(uuid16: u16) -> Self {
        Uuid::from_u16(uuid16)
    }
}

impl PartialEq<u16> for Uuid {
    fn eq(&self, other: &u16) -> bool {
        self.as_u16() == Some(*other)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = hex::encode(self.as_bytes_be());
        write!(
            f,
            "{}-{}-{}-{}-{}",
            &b[0..8],
            &b[8..12],
            &b[12..16],
            &b[16..20],
            &b[20..32]
        )
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_u16() {
            Some(short) => write!(f, "Uuid(0x{:04X})", short),
            None => write!(f, "Uuid({})", self),
        }
    }
}

#[derive(Error, Debug)]
pub enum UuidParseError {
    #[error("UUID string must hold 4 or 32 hex digits")]
    InvalidLength,

    #[error("Invalid 16-bit UUID: {0}")]
    InvalidShort(#[from] ParseIntError),

    #[error("Invalid hex in UUID: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl FromStr for Uuid {
    type Err = UuidParseError;

    /// Accepts "180A", "0x180A" or the hyphenated 128-bit form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_start_matches("0x");
        let cleaned: String = s.chars().filter(|c| *c != '-').collect();

        match cleaned.len() {
            4 => Ok(Uuid::from_u16(u16::from_str_radix(&cleaned, 16)?)),
            32 => {
                let mut bytes_be = [0u8; 16];
                hex::decode_to_slice(&cleaned, &mut bytes_be)?;
                Ok(Uuid::from_bytes_be(bytes_be))
            }
            _ => Err(UuidParseError::InvalidLength),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_uuid_round_trips_through_base() {
        let uuid = Uuid::from_u16(0x2800);
        assert_eq!(uuid.as_u16(), Some(0x2800));
        assert_eq!(uuid, 0x2800u16);
        assert_eq!(uuid.to_string(), "00002800-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn test_att_encoding_picks_shortest_form() {
        let mut buf = Vec::new();
        Uuid::from_u16(0x2A00).write_att(&mut buf);
        assert_eq!(buf, vec![0x00, 0x2A]);

        let custom: Uuid = "12345678-1234-5678-1234-56789abcdef0".parse().unwrap();
        assert_eq!(custom.as_u16(), None);
        assert_eq!(custom.att_len(), 16);

        buf.clear();
        custom.write_att(&mut buf);
        assert_eq!(Uuid::try_from_att_slice(&buf), Some(custom));
    }

    #[test]
    fn test_parse_rejects_odd_lengths() {
        assert!("123".parse::<Uuid>().is_err());
        assert_eq!("0x180A".parse::<Uuid>().unwrap(), Uuid::from_u16(0x180A));
        assert_eq!(Uuid::try_from_att_slice(&[0x01, 0x02, 0x03]), None);
    }
}
