// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device whitelist loaded from configuration.
//!
//! Only whitelisted devices are ever contacted. Each entry carries the
//! hardware address (the identity), a display name, the broadcast target
//! used for discovery, and optional per-device credentials. The whole set
//! is replaced atomically on reload; in-flight workers keep the record they
//! resolved at submission time.
//!
//! Expected file format:
//!
//! ```json
//! {
//!   "devices": [
//!     {
//!       "mac": "AA:BB:CC:DD:EE:FF",
//!       "name": "Desk Lamp",
//!       "target": "192.168.1.255",
//!       "username": "user@example.com",
//!       "password": "secret"
//!     }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use thiserror::Error;

use crate::error::ValidationError;
use crate::identity::{DeviceId, HardwareAddr};
use crate::session::Credentials;

/// Errors raised while loading the whitelist.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The whitelist file could not be read.
    #[error("failed to read whitelist: {0}")]
    Io(#[from] std::io::Error),

    /// The whitelist file is not valid JSON.
    #[error("failed to parse whitelist: {0}")]
    Json(#[from] serde_json::Error),

    /// An entry's hardware address is malformed.
    #[error("whitelist entry rejected: {0}")]
    Addr(#[from] ValidationError),
}

/// A whitelisted device. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    /// Normalized hardware address (the device identity).
    pub addr: HardwareAddr,
    /// Externally visible short id, derived from `addr`.
    pub id: DeviceId,
    /// Display name; falls back to the short id when absent in the file.
    pub name: String,
    /// Broadcast address used to scope network discovery.
    pub discovery_target: String,
    /// Optional credentials passed through to the SDK.
    pub credentials: Option<Credentials>,
}

#[derive(Deserialize)]
struct WhitelistFile {
    #[serde(default)]
    devices: Vec<WhitelistEntry>,
}

#[derive(Deserialize)]
struct WhitelistEntry {
    mac: String,
    name: Option<String>,
    target: String,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Default)]
struct RegistryMap {
    by_addr: HashMap<HardwareAddr, Arc<DeviceRecord>>,
    by_id: HashMap<String, HardwareAddr>,
}

impl RegistryMap {
    fn from_records(records: Vec<DeviceRecord>) -> Self {
        let mut map = Self::default();
        for record in records {
            if map.by_addr.contains_key(&record.addr) {
                tracing::warn!(addr = %record.addr, "Duplicate whitelist entry, last one wins");
            }
            map.by_id.insert(record.id.to_string(), record.addr);
            map.by_addr.insert(record.addr, Arc::new(record));
        }
        map
    }
}

/// The device whitelist, with id ↔ address resolution.
///
/// Cheap to clone and share; lookups hand out `Arc<DeviceRecord>` so a
/// reload cannot invalidate a record a worker is already using.
#[derive(Clone)]
pub struct DeviceRegistry {
    inner: Arc<RwLock<Arc<RegistryMap>>>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(RegistryMap::default()))),
        }
    }

    /// Creates a registry from pre-built records.
    #[must_use]
    pub fn from_records(records: Vec<DeviceRecord>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(RegistryMap::from_records(records)))),
        }
    }

    /// Loads a registry from a whitelist file.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if the file cannot be read or parsed, or
    /// if any entry carries a malformed hardware address.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let contents = std::fs::read_to_string(path)?;
        Self::load_from_str(&contents)
    }

    /// Loads a registry from whitelist JSON.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if the JSON cannot be parsed or any
    /// entry carries a malformed hardware address.
    pub fn load_from_str(json: &str) -> Result<Self, RegistryError> {
        let records = parse_whitelist(json)?;
        let registry = Self::from_records(records);
        tracing::info!(count = registry.len(), "Loaded device whitelist");
        Ok(registry)
    }

    /// Replaces the whole whitelist atomically.
    ///
    /// On parse failure the previous set stays in place.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if the JSON cannot be parsed or any
    /// entry carries a malformed hardware address.
    pub fn reload_from_str(&self, json: &str) -> Result<(), RegistryError> {
        let records = parse_whitelist(json)?;
        let map = Arc::new(RegistryMap::from_records(records));
        *self.inner.write() = map;
        tracing::info!(count = self.len(), "Reloaded device whitelist");
        Ok(())
    }

    /// Replaces the whitelist from a file.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if the file cannot be read or parsed.
    pub fn reload_from_path(&self, path: impl AsRef<Path>) -> Result<(), RegistryError> {
        let contents = std::fs::read_to_string(path)?;
        self.reload_from_str(&contents)
    }

    /// Resolves an externally visible device id to its record.
    #[must_use]
    pub fn by_id(&self, id: &str) -> Option<Arc<DeviceRecord>> {
        let map = self.inner.read().clone();
        let addr = map.by_id.get(id)?;
        map.by_addr.get(addr).cloned()
    }

    /// Resolves a hardware address to its record.
    #[must_use]
    pub fn by_addr(&self, addr: &HardwareAddr) -> Option<Arc<DeviceRecord>> {
        self.inner.read().by_addr.get(addr).cloned()
    }

    /// Returns all records, ordered by hardware address for stable output.
    #[must_use]
    pub fn records(&self) -> Vec<Arc<DeviceRecord>> {
        let map = self.inner.read().clone();
        let mut records: Vec<_> = map.by_addr.values().cloned().collect();
        records.sort_by_key(|r| r.addr);
        records
    }

    /// Returns the number of whitelisted devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().by_addr.len()
    }

    /// Returns true if the whitelist is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.len())
            .finish()
    }
}

fn parse_whitelist(json: &str) -> Result<Vec<DeviceRecord>, RegistryError> {
    let file: WhitelistFile = serde_json::from_str(json)?;

    let mut records = Vec::with_capacity(file.devices.len());
    for entry in file.devices {
        let addr: HardwareAddr = entry.mac.parse()?;
        let id = addr.device_id();
        let name = entry
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| id.to_string());

        let credentials = match (entry.username, entry.password) {
            (Some(username), Some(password)) => Some(Credentials::new(username, password)),
            _ => None,
        };

        tracing::debug!(
            %addr,
            %id,
            name = %name,
            target = %entry.target,
            auth = credentials.is_some(),
            "Loaded whitelist entry"
        );

        records.push(DeviceRecord {
            addr,
            id,
            name,
            discovery_target: entry.target,
            credentials,
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITELIST: &str = r#"{
        "devices": [
            {"mac": "aa:bb:cc:dd:ee:ff", "name": "Desk Lamp", "target": "192.168.1.255"},
            {"mac": "11-22-33-44-55-66", "target": "192.168.1.255",
             "username": "u@example.com", "password": "pw"}
        ]
    }"#;

    #[test]
    fn loads_entries_with_normalized_addresses() {
        let registry = DeviceRegistry::load_from_str(WHITELIST).unwrap();
        assert_eq!(registry.len(), 2);

        let addr: HardwareAddr = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let record = registry.by_addr(&addr).unwrap();
        assert_eq!(record.name, "Desk Lamp");
        assert_eq!(record.discovery_target, "192.168.1.255");
        assert!(record.credentials.is_none());
    }

    #[test]
    fn name_falls_back_to_device_id() {
        let registry = DeviceRegistry::load_from_str(WHITELIST).unwrap();
        let addr: HardwareAddr = "11:22:33:44:55:66".parse().unwrap();
        let record = registry.by_addr(&addr).unwrap();
        assert_eq!(record.name, record.id.to_string());
        assert!(record.credentials.is_some());
    }

    #[test]
    fn resolves_by_short_id() {
        let registry = DeviceRegistry::load_from_str(WHITELIST).unwrap();
        let addr: HardwareAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let id = addr.device_id();

        let record = registry.by_id(id.as_str()).unwrap();
        assert_eq!(record.addr, addr);
        assert!(registry.by_id("ffffffff").is_none());
    }

    #[test]
    fn rejects_malformed_address() {
        let json = r#"{"devices": [{"mac": "nope", "target": "192.168.1.255"}]}"#;
        assert!(matches!(
            DeviceRegistry::load_from_str(json),
            Err(RegistryError::Addr(_))
        ));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            DeviceRegistry::load_from_str("{not json"),
            Err(RegistryError::Json(_))
        ));
    }

    #[test]
    fn empty_devices_list_is_valid() {
        let registry = DeviceRegistry::load_from_str(r#"{"devices": []}"#).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn reload_replaces_whole_set() {
        let registry = DeviceRegistry::load_from_str(WHITELIST).unwrap();
        assert_eq!(registry.len(), 2);

        registry
            .reload_from_str(
                r#"{"devices": [{"mac": "99:88:77:66:55:44", "target": "10.0.0.255"}]}"#,
            )
            .unwrap();

        assert_eq!(registry.len(), 1);
        let gone: HardwareAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert!(registry.by_addr(&gone).is_none());
    }

    #[test]
    fn failed_reload_keeps_previous_set() {
        let registry = DeviceRegistry::load_from_str(WHITELIST).unwrap();
        assert!(registry.reload_from_str("{broken").is_err());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_mac_last_entry_wins() {
        let json = r#"{
            "devices": [
                {"mac": "aa:bb:cc:dd:ee:ff", "name": "First", "target": "192.168.1.255"},
                {"mac": "AABBCCDDEEFF", "name": "Second", "target": "192.168.1.255"}
            ]
        }"#;
        let registry = DeviceRegistry::load_from_str(json).unwrap();
        assert_eq!(registry.len(), 1);

        let addr: HardwareAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(registry.by_addr(&addr).unwrap().name, "Second");
    }
}
