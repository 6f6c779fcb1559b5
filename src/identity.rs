// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device identity types.
//!
//! A device is identified by its hardware address, which is stable across
//! network address reassignment. The canonical form is uppercase
//! colon-separated (`AA:BB:CC:DD:EE:FF`). A short [`DeviceId`] is derived
//! from the canonical form and used as the externally visible identifier so
//! hardware addresses never leak to clients.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::error::ValidationError;

/// Normalized hardware address of a device (12 hex octets).
///
/// Parsing accepts `:`, `-` and `.` separators as well as bare hex, in any
/// case; everything else is rejected. Normalization is total: two spellings
/// of the same address always compare equal.
///
/// # Examples
///
/// ```
/// use plugfleet::HardwareAddr;
///
/// let a: HardwareAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
/// let b: HardwareAddr = "AA-BB-CC-DD-EE-FF".parse().unwrap();
/// let c: HardwareAddr = "aabbccddeeff".parse().unwrap();
///
/// assert_eq!(a, b);
/// assert_eq!(b, c);
/// assert_eq!(a.to_string(), "AA:BB:CC:DD:EE:FF");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HardwareAddr([u8; 6]);

impl HardwareAddr {
    /// Returns the raw octets.
    #[must_use]
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Derives the short stable device id for this address.
    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        DeviceId::from_addr(self)
    }
}

impl FromStr for HardwareAddr {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean: String = s
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .collect();

        if clean.len() != 12 || !clean.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidHardwareAddr(s.to_string()));
        }

        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            // Slicing is safe: length and hex-ness were just checked.
            *octet = u8::from_str_radix(&clean[i * 2..i * 2 + 2], 16)
                .map_err(|_| ValidationError::InvalidHardwareAddr(s.to_string()))?;
        }

        Ok(Self(octets))
    }
}

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl fmt::Debug for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HardwareAddr({self})")
    }
}

impl serde::Serialize for HardwareAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for HardwareAddr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Number of hex characters in the short device id.
const DEVICE_ID_LEN: usize = 8;

/// Short stable identifier derived from a hardware address.
///
/// This is the first 8 hex characters of the SHA-256 digest of the canonical
/// address string. It is deterministic, so the same physical device always
/// maps to the same id regardless of how its address was spelled.
#[derive(Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Derives the id from a normalized hardware address.
    #[must_use]
    pub fn from_addr(addr: &HardwareAddr) -> Self {
        let digest = Sha256::digest(addr.to_string().as_bytes());
        let mut id = String::with_capacity(DEVICE_ID_LEN);
        for byte in &digest[..DEVICE_ID_LEN / 2] {
            use fmt::Write as _;
            // Writing to a String cannot fail.
            let _ = write!(id, "{byte:02x}");
        }
        Self(id)
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

impl From<&HardwareAddr> for DeviceId {
    fn from(addr: &HardwareAddr) -> Self {
        Self::from_addr(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_all_common_spellings() {
        let expected = "AA:BB:CC:DD:EE:FF";
        for input in ["aa:bb:cc:dd:ee:ff", "AA-BB-CC-DD-EE-FF", "aabbccddeeff"] {
            let addr: HardwareAddr = input.parse().unwrap();
            assert_eq!(addr.to_string(), expected, "input: {input}");
        }
    }

    #[test]
    fn dotted_form_is_accepted() {
        let addr: HardwareAddr = "aabb.ccdd.eeff".parse().unwrap();
        assert_eq!(addr.to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn rejects_invalid_input() {
        for input in [
            "",
            "aa:bb:cc:dd:ee",       // too short
            "aa:bb:cc:dd:ee:ff:00", // too long
            "gg:bb:cc:dd:ee:ff",    // not hex
            "aa bb cc dd ee ff",    // unsupported separator
            "not a mac",
        ] {
            assert!(
                input.parse::<HardwareAddr>().is_err(),
                "should reject: {input:?}"
            );
        }
    }

    #[test]
    fn equal_addresses_compare_equal() {
        let a: HardwareAddr = "00:1a:2b:3c:4d:5e".parse().unwrap();
        let b: HardwareAddr = "001A2B3C4D5E".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn device_id_is_deterministic() {
        let a: HardwareAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let b: HardwareAddr = "AABBCCDDEEFF".parse().unwrap();
        assert_eq!(a.device_id(), b.device_id());
        assert_eq!(a.device_id().as_str().len(), 8);
    }

    #[test]
    fn device_id_differs_per_address() {
        let a: HardwareAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let b: HardwareAddr = "aa:bb:cc:dd:ee:fe".parse().unwrap();
        assert_ne!(a.device_id(), b.device_id());
    }

    #[test]
    fn device_id_is_lowercase_hex() {
        let addr: HardwareAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let id = addr.device_id();
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id.as_str(), id.as_str().to_lowercase());
    }

    #[test]
    fn serde_round_trip() {
        let addr: HardwareAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"AA:BB:CC:DD:EE:FF\"");
        let back: HardwareAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
