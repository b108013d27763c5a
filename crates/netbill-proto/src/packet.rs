use crate::attributes::Attribute;
use crate::auth::calculate_request_authenticator;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet truncated: have {have} bytes, need {need}")]
    Truncated { have: usize, need: usize },
    #[error("length field out of bounds: {0}")]
    BadLength(usize),
    #[error("unknown packet code {0}")]
    UnknownCode(u8),
    #[error("packet too large: {0} bytes")]
    Oversize(usize),
    #[error("malformed attribute: {0}")]
    Attribute(String),
}

/// Dynamic Authorization packet codes as defined in RFC 3576 Section 2.3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Code {
    /// Disconnect-Request (40)
    DisconnectRequest = 40,
    /// Disconnect-ACK (41)
    DisconnectAck = 41,
    /// Disconnect-NAK (42)
    DisconnectNak = 42,
    /// CoA-Request (43)
    CoaRequest = 43,
    /// CoA-ACK (44)
    CoaAck = 44,
    /// CoA-NAK (45)
    CoaNak = 45,
}

impl Code {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            40 => Some(Code::DisconnectRequest),
            41 => Some(Code::DisconnectAck),
            42 => Some(Code::DisconnectNak),
            43 => Some(Code::CoaRequest),
            44 => Some(Code::CoaAck),
            45 => Some(Code::CoaNak),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One RFC 3576 packet.
///
/// The wire layout is the RFC 2865 one: a one-octet code, a one-octet
/// identifier, a two-octet big-endian total length, the 16-octet
/// authenticator, then the attribute TLVs back to back.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub code: Code,
    pub identifier: u8,
    pub authenticator: [u8; 16],
    pub attributes: Vec<Attribute>,
}

impl Packet {
    /// Fixed header size: code, identifier, length, authenticator
    pub const HEADER_LEN: usize = 20;
    /// Largest packet RFC 2865 allows on the wire
    pub const MAX_WIRE_LEN: usize = 4096;

    /// Create a packet with a zeroed authenticator. Call [`Packet::sign`]
    /// after all attributes have been appended.
    pub fn new(code: Code, identifier: u8) -> Self {
        Packet {
            code,
            identifier,
            authenticator: [0u8; 16],
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    /// Fill in the Request Authenticator over the final attribute set.
    ///
    /// Per RFC 3576 Section 2.3 the digest is computed with 16 zero bytes
    /// occupying the authenticator slot, then written back into it.
    pub fn sign(&mut self, secret: &[u8]) {
        self.authenticator = calculate_request_authenticator(self, secret);
    }

    /// Total on-wire size of the packet as currently assembled
    pub fn wire_len(&self) -> usize {
        Self::HEADER_LEN
            + self
                .attributes
                .iter()
                .map(Attribute::wire_len)
                .sum::<usize>()
    }

    /// Serialize to wire bytes.
    ///
    /// The length field is known before a single byte is written, so the
    /// header goes out first and the attributes follow in order.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let wire_len = self.wire_len();
        if wire_len > Self::MAX_WIRE_LEN {
            return Err(PacketError::Oversize(wire_len));
        }

        let mut wire = Vec::with_capacity(wire_len);
        wire.push(self.code.as_u8());
        wire.push(self.identifier);
        wire.extend_from_slice(&(wire_len as u16).to_be_bytes());
        wire.extend_from_slice(&self.authenticator);
        for attribute in &self.attributes {
            attribute.encode_into(&mut wire)?;
        }

        debug_assert_eq!(wire.len(), wire_len);
        Ok(wire)
    }

    /// Parse a packet from wire bytes.
    ///
    /// Trailing bytes beyond the declared length are ignored, matching
    /// how RFC 2865 Section 3 tells receivers to treat padding.
    pub fn decode(wire: &[u8]) -> Result<Self, PacketError> {
        if wire.len() < Self::HEADER_LEN {
            return Err(PacketError::Truncated {
                have: wire.len(),
                need: Self::HEADER_LEN,
            });
        }

        let code = Code::from_u8(wire[0]).ok_or(PacketError::UnknownCode(wire[0]))?;
        let identifier = wire[1];

        let declared = u16::from_be_bytes([wire[2], wire[3]]) as usize;
        if !(Self::HEADER_LEN..=Self::MAX_WIRE_LEN).contains(&declared) {
            return Err(PacketError::BadLength(declared));
        }
        if wire.len() < declared {
            return Err(PacketError::Truncated {
                have: wire.len(),
                need: declared,
            });
        }

        let mut authenticator = [0u8; 16];
        authenticator.copy_from_slice(&wire[4..Self::HEADER_LEN]);

        let mut attributes = Vec::new();
        let mut rest = &wire[Self::HEADER_LEN..declared];
        while !rest.is_empty() {
            let (attribute, consumed) = Attribute::take(rest)?;
            attributes.push(attribute);
            rest = &rest[consumed..];
        }

        Ok(Packet {
            code,
            identifier,
            authenticator,
            attributes,
        })
    }

    /// First attribute of the given type, if any
    pub fn attribute(&self, attr_type: u8) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }
}
