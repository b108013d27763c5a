use crate::packet::Packet;
use rand::Rng;

/// Pick a fresh packet identifier.
///
/// RFC 3576 only requires that identifiers distinguish outstanding requests
/// toward one NAS; a random draw is enough for the disconnect path where a
/// single request is in flight per session.
pub fn random_identifier() -> u8 {
    rand::rng().random()
}

/// Calculate the Request Authenticator per RFC 3576 Section 2.3
///
/// Request Authenticator = MD5(Code + ID + Length + 16 zero octets +
/// Attributes + Secret). The zero octets stand in for the authenticator
/// field itself; the caller writes the digest back into that slot.
pub fn calculate_request_authenticator(packet: &Packet, secret: &[u8]) -> [u8; 16] {
    let mut data = Vec::new();

    data.push(packet.code.as_u8());
    data.push(packet.identifier);
    data.extend_from_slice(&(packet.wire_len() as u16).to_be_bytes());

    // Authenticator slot hashed as zeroes
    data.extend_from_slice(&[0u8; 16]);

    for attr in &packet.attributes {
        attr.encode_into(&mut data)
            .expect("attribute within wire limits");
    }

    data.extend_from_slice(secret);

    let digest = md5::compute(&data);
    let mut authenticator = [0u8; 16];
    authenticator.copy_from_slice(&digest.0);
    authenticator
}

/// Calculate the Response Authenticator per RFC 2865 Section 3
///
/// Response Authenticator = MD5(Code + ID + Length + Request Authenticator +
/// Attributes + Secret). Used to verify Disconnect-ACK/NAK replies.
pub fn calculate_response_authenticator(
    packet: &Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> [u8; 16] {
    let mut data = Vec::new();

    data.push(packet.code.as_u8());
    data.push(packet.identifier);
    data.extend_from_slice(&(packet.wire_len() as u16).to_be_bytes());

    data.extend_from_slice(request_authenticator);

    for attr in &packet.attributes {
        attr.encode_into(&mut data)
            .expect("attribute within wire limits");
    }

    data.extend_from_slice(secret);

    let digest = md5::compute(&data);
    let mut authenticator = [0u8; 16];
    authenticator.copy_from_slice(&digest.0);
    authenticator
}

/// Verify a Disconnect-ACK/NAK Response Authenticator against the request
/// that solicited it.
pub fn verify_response_authenticator(
    response: &Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> bool {
    let calculated = calculate_response_authenticator(response, request_authenticator, secret);
    response.authenticator == calculated
}
