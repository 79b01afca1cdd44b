//! Device and session identity.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdError;

/// Prefix for MAC address device names.
pub const MAC_PREFIX: &str = "mac";
/// Prefix for UUID device names.
pub const UUID_PREFIX: &str = "uuid";
/// Prefix for DNS device names.
pub const DNS_PREFIX: &str = "dns";
/// Prefix for serial number device names.
pub const SERIAL_PREFIX: &str = "serial";
/// Prefix for names that refer to the gateway itself.
pub const SELF_PREFIX: &str = "self";

static DEVICE_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)(mac|uuid|dns|serial|self):([^/]+)(?:/.*)?$")
        .unwrap_or_else(|_| unreachable!())
});

const MAC_LENGTH: usize = 12;

/// A canonical device identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    /// Wraps an identifier that is already canonical.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parses and canonicalizes a device name such as `MAC:11-22-33-44-55-66/service`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name has no known prefix or the MAC is malformed.
    pub fn parse(name: &str) -> Result<Self, IdError> {
        let captures = DEVICE_NAME_REGEX
            .captures(name.trim())
            .ok_or_else(|| IdError::InvalidName(name.to_string()))?;

        let prefix = captures[1].to_ascii_lowercase();
        let value = &captures[2];

        if prefix == MAC_PREFIX {
            let mut mac = String::with_capacity(MAC_LENGTH);
            for c in value.chars() {
                match c {
                    ':' | '-' | '.' | ',' => {}
                    c if c.is_ascii_hexdigit() => mac.push(c.to_ascii_lowercase()),
                    c => return Err(IdError::InvalidMacCharacter(c)),
                }
            }
            if mac.len() != MAC_LENGTH {
                return Err(IdError::InvalidMacLength(mac.len()));
            }
            return Ok(Self(format!("{MAC_PREFIX}:{mac}")));
        }

        Ok(Self(format!("{prefix}:{value}")))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the bytes used as the consistent-hash key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Id {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifies one connection of a device. Fresh for every [`Device`](crate::Device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a new random session id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use test_case::test_case;

    // ==================== Id::parse Tests ====================

    #[test_case("mac:112233445566", "mac:112233445566" ; "plain mac")]
    #[test_case("MAC:11:22:33:44:55:66", "mac:112233445566" ; "colon delimited")]
    #[test_case("mac:11-22-33-44-55-66", "mac:112233445566" ; "dash delimited")]
    #[test_case("mac:1122.3344.5566", "mac:112233445566" ; "dot delimited")]
    #[test_case("mac:11,22,33,44,55,66", "mac:112233445566" ; "comma delimited")]
    #[test_case("mac:AABBCCDDEEFF", "mac:aabbccddeeff" ; "uppercase hex")]
    #[test_case("mac:112233445566/config", "mac:112233445566" ; "service suffix")]
    #[test_case("UUID:ABC-123", "uuid:ABC-123" ; "uuid keeps value case")]
    #[test_case("dns:gateway.example.com", "dns:gateway.example.com" ; "dns")]
    #[test_case("serial:1234/iot", "serial:1234" ; "serial with service")]
    #[test_case("SELF:gateway", "self:gateway" ; "self")]
    fn test_parse(input: &str, expected: &str) {
        assert_eq!(Id::parse(input).unwrap().as_str(), expected);
    }

    #[test_case("" ; "empty")]
    #[test_case("112233445566" ; "missing prefix")]
    #[test_case("foo:112233445566" ; "unknown prefix")]
    #[test_case("self:" ; "missing value")]
    fn test_parse_invalid_name(input: &str) {
        assert!(matches!(Id::parse(input), Err(IdError::InvalidName(_))));
    }

    #[test]
    fn test_parse_invalid_mac_character() {
        assert_eq!(
            Id::parse("mac:11223344556x"),
            Err(IdError::InvalidMacCharacter('x'))
        );
    }

    #[test_case("mac:1122334455" ; "too short")]
    #[test_case("mac:11223344556677" ; "too long")]
    fn test_parse_invalid_mac_length(input: &str) {
        assert!(matches!(Id::parse(input), Err(IdError::InvalidMacLength(_))));
    }

    #[test]
    fn test_new_is_unchanged() {
        let id = Id::new("ID 1");
        assert_eq!(id.as_str(), "ID 1");
        assert_eq!(id.to_string(), "ID 1");
        assert_eq!(id.as_bytes(), b"ID 1");
    }

    #[test]
    fn test_id_serializes_as_string() {
        assert_eq!(serde_json::to_string(&Id::new("ID 1")).unwrap(), r#""ID 1""#);
    }

    // ==================== SessionId Tests ====================

    #[test]
    fn test_session_ids_are_unique() {
        let ids: HashSet<SessionId> = (0..1000).map(|_| SessionId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_session_id_display_is_not_empty() {
        assert!(!SessionId::new().to_string().is_empty());
    }

    proptest! {
        #[test]
        fn prop_parse_is_idempotent(mac in "[0-9a-fA-F]{12}") {
            let once = Id::parse(&format!("mac:{mac}")).unwrap();
            let twice = Id::parse(once.as_str()).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
