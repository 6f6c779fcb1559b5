// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared caches: last-known addresses and last-known state snapshots.
//!
//! Entries follow a single-writer-per-key discipline: only the worker (or
//! health-check path) responsible for a device identity writes that key.
//! The maps themselves take a coarse lock to guard first insertion of new
//! keys; no guard is ever held across an await point.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::identity::HardwareAddr;
use crate::registry::DeviceRecord;
use crate::state::StateSnapshot;

/// A cached network address for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressEntry {
    /// Last network address the device answered at.
    pub address: String,
    /// When the device was last successfully contacted there.
    pub last_seen: DateTime<Utc>,
}

/// Last-known network address per device identity.
///
/// Advisory only: an entry may be stale, so a freshly connected session's
/// reported identity must be verified before the address is trusted for a
/// command. A failed escalation never removes an entry; the address is
/// still the best known guess for the next cycle.
#[derive(Debug, Default)]
pub struct AddressCache {
    inner: RwLock<HashMap<HardwareAddr, AddressEntry>>,
}

impl AddressCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached address for a device, if any.
    #[must_use]
    pub fn get(&self, addr: &HardwareAddr) -> Option<AddressEntry> {
        self.inner.read().get(addr).cloned()
    }

    /// Records the address a device just answered at.
    pub fn record_seen(&self, addr: HardwareAddr, address: impl Into<String>) {
        let entry = AddressEntry {
            address: address.into(),
            last_seen: Utc::now(),
        };
        self.inner.write().insert(addr, entry);
    }

    /// Returns the number of cached addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Returns true if no addresses are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Last-known state snapshot per device identity.
///
/// Read by API-facing queries, written only by the orchestration engine.
#[derive(Debug, Default)]
pub struct StateCache {
    inner: RwLock<HashMap<HardwareAddr, StateSnapshot>>,
}

impl StateCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached snapshot for a device, if any.
    #[must_use]
    pub fn get(&self, addr: &HardwareAddr) -> Option<StateSnapshot> {
        self.inner.read().get(addr).cloned()
    }

    /// Stores a fresh snapshot.
    pub fn insert(&self, addr: HardwareAddr, snapshot: StateSnapshot) {
        self.inner.write().insert(addr, snapshot);
    }

    /// Replaces a device's snapshot with an offline one, preserving any
    /// previously observed topology. Returns the stored snapshot.
    pub fn mark_offline(&self, record: &DeviceRecord) -> StateSnapshot {
        let mut guard = self.inner.write();
        let snapshot = StateSnapshot::offline(record, guard.get(&record.addr));
        guard.insert(record.addr, snapshot.clone());
        snapshot
    }

    /// Returns the cached snapshot, or an offline placeholder for a
    /// whitelisted device that has never been observed.
    #[must_use]
    pub fn snapshot_or_placeholder(&self, record: &DeviceRecord) -> StateSnapshot {
        self.get(&record.addr)
            .unwrap_or_else(|| StateSnapshot::offline(record, None))
    }
}
