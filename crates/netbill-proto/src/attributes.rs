use crate::packet::PacketError;

/// Attribute types carried in Disconnect-Request/NAK packets.
///
/// The subset of RFC 2865 / RFC 3576 attributes the disconnect path uses;
/// values are the IANA-assigned type numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttributeType {
    UserName = 1,
    NasIpAddress = 4,
    NasPort = 5,
    FramedIpAddress = 8,
    CallingStationId = 31,
    NasIdentifier = 32,
    AcctSessionId = 44,
    MessageAuthenticator = 80,
    ErrorCause = 101,
}

/// One attribute TLV: a type octet, a length octet covering the whole
/// TLV, then the value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attr_type: u8,
    pub value: Vec<u8>,
}

impl Attribute {
    /// Type and length octets preceding the value
    pub const OVERHEAD: usize = 2;
    /// Largest value that fits the one-octet TLV length
    pub const MAX_VALUE_LEN: usize = u8::MAX as usize - Self::OVERHEAD;

    pub fn new(attr_type: u8, value: Vec<u8>) -> Result<Self, PacketError> {
        if value.len() > Self::MAX_VALUE_LEN {
            return Err(PacketError::Attribute(format!(
                "value of {} bytes exceeds the {}-byte TLV limit",
                value.len(),
                Self::MAX_VALUE_LEN
            )));
        }
        Ok(Attribute { attr_type, value })
    }

    /// Create a text attribute
    pub fn text(attr_type: u8, value: impl Into<String>) -> Result<Self, PacketError> {
        Self::new(attr_type, value.into().into_bytes())
    }

    /// Create an integer attribute (32-bit big-endian)
    pub fn integer(attr_type: u8, value: u32) -> Result<Self, PacketError> {
        Self::new(attr_type, value.to_be_bytes().to_vec())
    }

    /// Create an IPv4 address attribute
    pub fn ipv4(attr_type: u8, value: [u8; 4]) -> Result<Self, PacketError> {
        Self::new(attr_type, value.to_vec())
    }

    /// On-wire size of this TLV
    pub fn wire_len(&self) -> usize {
        Self::OVERHEAD + self.value.len()
    }

    /// Append the TLV to a wire buffer
    pub fn encode_into(&self, wire: &mut Vec<u8>) -> Result<(), PacketError> {
        let wire_len = self.wire_len();
        if wire_len > u8::MAX as usize {
            return Err(PacketError::Attribute(format!(
                "TLV of {} bytes does not fit a one-octet length",
                wire_len
            )));
        }

        wire.push(self.attr_type);
        wire.push(wire_len as u8);
        wire.extend_from_slice(&self.value);
        Ok(())
    }

    /// Read one TLV off the front of a buffer; returns the attribute and
    /// the number of bytes it occupied.
    pub fn take(wire: &[u8]) -> Result<(Attribute, usize), PacketError> {
        let &[attr_type, declared, ..] = wire else {
            return Err(PacketError::Attribute(format!(
                "TLV header truncated at {} bytes",
                wire.len()
            )));
        };

        let declared = declared as usize;
        if declared < Self::OVERHEAD {
            return Err(PacketError::Attribute(format!(
                "TLV length {} below the two-octet minimum",
                declared
            )));
        }
        if wire.len() < declared {
            return Err(PacketError::Attribute(format!(
                "TLV of {} bytes truncated at {}",
                declared,
                wire.len()
            )));
        }

        let attribute = Attribute {
            attr_type,
            value: wire[Self::OVERHEAD..declared].to_vec(),
        };
        Ok((attribute, declared))
    }

    /// Interpret the value as text
    pub fn as_text(&self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.value.clone())
    }

    /// Interpret the value as a 32-bit big-endian integer
    pub fn as_integer(&self) -> Result<u32, PacketError> {
        let bytes: [u8; 4] = self.value.as_slice().try_into().map_err(|_| {
            PacketError::Attribute(format!(
                "integer attribute carries {} bytes",
                self.value.len()
            ))
        })?;
        Ok(u32::from_be_bytes(bytes))
    }

    /// Interpret the value as an IPv4 address
    pub fn as_ipv4(&self) -> Result<[u8; 4], PacketError> {
        self.value.as_slice().try_into().map_err(|_| {
            PacketError::Attribute(format!(
                "address attribute carries {} bytes",
                self.value.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_attribute() {
        let attr = Attribute::text(AttributeType::UserName as u8, "subscriber").unwrap();
        assert_eq!(attr.attr_type, 1);
        assert_eq!(attr.as_text().unwrap(), "subscriber");
    }

    #[test]
    fn test_integer_attribute() {
        let attr = Attribute::integer(AttributeType::NasPort as u8, 4096).unwrap();
        assert_eq!(attr.attr_type, 5);
        assert_eq!(attr.as_integer().unwrap(), 4096);
        assert!(Attribute::text(1, "x").unwrap().as_integer().is_err());
    }

    #[test]
    fn test_ipv4_attribute_wire_form() {
        let attr = Attribute::ipv4(AttributeType::FramedIpAddress as u8, [192, 0, 2, 1]).unwrap();
        let mut wire = Vec::new();
        attr.encode_into(&mut wire).unwrap();
        assert_eq!(wire, vec![8, 6, 192, 0, 2, 1]);
        assert_eq!(attr.wire_len(), 6);
    }

    #[test]
    fn test_take_round_trip() {
        let attr = Attribute::text(AttributeType::AcctSessionId as u8, "s-0017").unwrap();
        let mut wire = Vec::new();
        attr.encode_into(&mut wire).unwrap();
        // Trailing bytes belong to the next TLV and are left alone
        wire.extend_from_slice(&[1, 3, b'x']);

        let (parsed, consumed) = Attribute::take(&wire).unwrap();
        assert_eq!(parsed, attr);
        assert_eq!(consumed, attr.wire_len());
    }

    #[test]
    fn test_take_rejects_bad_lengths() {
        // Header cut off
        assert!(Attribute::take(&[1]).is_err());
        // Length below the TLV minimum
        assert!(Attribute::take(&[1, 1, 0]).is_err());
        // Declared length runs past the buffer
        assert!(Attribute::take(&[1, 10, 0, 0]).is_err());
    }

    #[test]
    fn test_oversized_value_rejected() {
        let value = vec![0u8; Attribute::MAX_VALUE_LEN + 1];
        assert!(Attribute::new(1, value).is_err());
        assert!(Attribute::new(1, vec![0u8; Attribute::MAX_VALUE_LEN]).is_ok());
    }
}
