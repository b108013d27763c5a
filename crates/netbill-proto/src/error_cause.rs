use std::fmt;

/// Error-Cause attribute values from RFC 3576 Section 3.5
///
/// Carried in Disconnect-NAK / CoA-NAK replies to explain why the NAS
/// refused the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCause {
    ResidualSessionContextRemoved = 201,
    InvalidEapPacket = 202,
    UnsupportedAttribute = 401,
    MissingAttribute = 402,
    NasIdentificationMismatch = 403,
    InvalidRequest = 404,
    UnsupportedService = 405,
    UnsupportedExtension = 406,
    AdministrativelyProhibited = 501,
    RequestNotRoutable = 502,
    SessionContextNotFound = 503,
    SessionContextNotRemovable = 504,
    OtherProxyProcessingError = 505,
    ResourcesUnavailable = 506,
    RequestInitiated = 507,
}

impl ErrorCause {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            201 => Some(ErrorCause::ResidualSessionContextRemoved),
            202 => Some(ErrorCause::InvalidEapPacket),
            401 => Some(ErrorCause::UnsupportedAttribute),
            402 => Some(ErrorCause::MissingAttribute),
            403 => Some(ErrorCause::NasIdentificationMismatch),
            404 => Some(ErrorCause::InvalidRequest),
            405 => Some(ErrorCause::UnsupportedService),
            406 => Some(ErrorCause::UnsupportedExtension),
            501 => Some(ErrorCause::AdministrativelyProhibited),
            502 => Some(ErrorCause::RequestNotRoutable),
            503 => Some(ErrorCause::SessionContextNotFound),
            504 => Some(ErrorCause::SessionContextNotRemovable),
            505 => Some(ErrorCause::OtherProxyProcessingError),
            506 => Some(ErrorCause::ResourcesUnavailable),
            507 => Some(ErrorCause::RequestInitiated),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCause::ResidualSessionContextRemoved => "Residual Session Context Removed",
            ErrorCause::InvalidEapPacket => "Invalid EAP Packet (Ignored)",
            ErrorCause::UnsupportedAttribute => "Unsupported Attribute",
            ErrorCause::MissingAttribute => "Missing Attribute",
            ErrorCause::NasIdentificationMismatch => "NAS Identification Mismatch",
            ErrorCause::InvalidRequest => "Invalid Request",
            ErrorCause::UnsupportedService => "Unsupported Service",
            ErrorCause::UnsupportedExtension => "Unsupported Extension",
            ErrorCause::AdministrativelyProhibited => "Administratively Prohibited",
            ErrorCause::RequestNotRoutable => "Request Not Routable (Proxy)",
            ErrorCause::SessionContextNotFound => "Session Context Not Found",
            ErrorCause::SessionContextNotRemovable => "Session Context Not Removable",
            ErrorCause::OtherProxyProcessingError => "Other Proxy Processing Error",
            ErrorCause::ResourcesUnavailable => "Resources Unavailable",
            ErrorCause::RequestInitiated => "Request Initiated",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_round_trip() {
        for code in [201, 202, 401, 402, 403, 404, 405, 406, 501, 502, 503, 504, 505, 506, 507] {
            let cause = ErrorCause::from_u32(code).unwrap();
            assert_eq!(cause.as_u32(), code);
        }
    }

    #[test]
    fn test_unknown_code() {
        assert!(ErrorCause::from_u32(0).is_none());
        assert!(ErrorCause::from_u32(300).is_none());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(
            ErrorCause::SessionContextNotFound.to_string(),
            "Session Context Not Found"
        );
        assert_eq!(
            ErrorCause::AdministrativelyProhibited.to_string(),
            "Administratively Prohibited"
        );
    }
}
