//! Protocol versioning for dashpulse.
//!
//! Clients announce their version in the `connect` frame and the server answers
//! with its own in `connected`. Only the major version has to agree.

/// Current protocol version, encoded as `major << 4 | minor`.
pub const PROTOCOL_VERSION: u8 = 0x10;

/// Major component of a packed version byte.
#[must_use]
pub const fn major(version: u8) -> u8 {
    version >> 4
}

/// Minor component of a packed version byte.
#[must_use]
pub const fn minor(version: u8) -> u8 {
    version & 0x0F
}

/// Check whether a peer speaking `remote` can talk to this client.
#[must_use]
pub fn is_compatible(remote: u8) -> bool {
    major(remote) == major(PROTOCOL_VERSION)
}

/// Render a packed version byte as `major.minor`.
#[must_use]
pub fn display(version: u8) -> String {
    format!("{}.{}", major(version), minor(version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compatibility() {
        assert!(is_compatible(0x10));
        assert!(is_compatible(0x13));
        assert!(!is_compatible(0x20));
        assert!(!is_compatible(0x01));
    }

    #[test]
    fn test_version_display() {
        assert_eq!(display(PROTOCOL_VERSION), "1.0");
        assert_eq!(display(0x2A), "2.10");
    }
}
