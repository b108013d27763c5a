//! RFC 3576 Dynamic Authorization wire protocol
//!
//! This crate implements the packet layer used to force-terminate subscriber
//! sessions on a NAS: Disconnect-Request / Disconnect-ACK / Disconnect-NAK
//! framing, attribute encoding, the Request Authenticator calculation, and
//! Error-Cause decoding.
//!
//! # Example
//!
//! ```rust
//! use netbill_proto::{Attribute, AttributeType, Code, Packet};
//!
//! let mut packet = Packet::new(Code::DisconnectRequest, 7);
//! packet.add_attribute(Attribute::text(AttributeType::UserName as u8, "alice").unwrap());
//! packet.add_attribute(Attribute::ipv4(AttributeType::FramedIpAddress as u8, [10, 0, 0, 5]).unwrap());
//! packet.sign(b"secret");
//!
//! let wire = packet.encode().unwrap();
//! let decoded = Packet::decode(&wire).unwrap();
//! assert_eq!(decoded.code, Code::DisconnectRequest);
//! ```

pub mod attributes;
pub mod auth;
pub mod error_cause;
pub mod packet;

pub use attributes::{Attribute, AttributeType};
pub use auth::{calculate_request_authenticator, verify_response_authenticator};
pub use error_cause::ErrorCause;
pub use packet::{Code, Packet, PacketError};
