// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Point-in-time device state snapshots.

use chrono::{DateTime, Utc};

use crate::identity::DeviceId;
use crate::registry::DeviceRecord;
use crate::session::PlugSession;

/// Reachability of a device at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Device answered on its last contact.
    Online,
    /// Device could not be reached; power states are unknown.
    Offline,
}

/// State of one child outlet on a multi-outlet device.
///
/// `is_on` is `None` when the parent device is offline: the outlet is still
/// known to exist (topology is assumed stable) but its power state is not
/// trustworthy.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct OutletSnapshot {
    /// Device-assigned outlet identifier.
    pub id: String,
    /// User-facing outlet alias.
    pub alias: String,
    /// Power state, unknown while offline.
    pub is_on: Option<bool>,
}

/// Point-in-time record of a device's power state and topology.
///
/// When `status` is [`DeviceStatus::Offline`], `is_on` and every child's
/// `is_on` are `None`, while `alias`, `model`, `is_multi_outlet` and the
/// child id/alias list carry over from the previous snapshot, since hardware
/// facts are assumed stable even when the device is unreachable. Topology
/// is never invented: a device that was never seen online has none.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StateSnapshot {
    /// Externally visible device id.
    pub id: DeviceId,
    /// Whitelist display name.
    pub name: String,
    /// Reachability at snapshot time.
    pub status: DeviceStatus,
    /// Device relay power state, unknown while offline.
    pub is_on: Option<bool>,
    /// Device-reported alias, if ever observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Device-reported model name, if ever observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// True if the device exposes child outlets.
    pub is_multi_outlet: bool,
    /// Child outlets in device order; empty for single-outlet devices.
    pub children: Vec<OutletSnapshot>,
    /// When this snapshot was taken, if the device was ever observed.
    pub last_updated: Option<DateTime<Utc>>,
}

impl StateSnapshot {
    /// Builds an online snapshot from a live session.
    ///
    /// Reads power state, alias, model and the child outlet list as the
    /// session last observed them (callers refresh the session first).
    #[must_use]
    pub fn online(record: &DeviceRecord, session: &dyn PlugSession) -> Self {
        let topology = session.topology();
        let children = topology
            .children()
            .iter()
            .map(|child| OutletSnapshot {
                id: child.id.clone(),
                alias: child.alias.clone(),
                is_on: Some(child.is_on),
            })
            .collect();

        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            status: DeviceStatus::Online,
            is_on: Some(session.is_on()),
            alias: Some(session.display_name().to_string()),
            model: Some(session.model_name().to_string()),
            is_multi_outlet: topology.is_multi_outlet(),
            children,
            last_updated: Some(Utc::now()),
        }
    }

    /// Builds an offline snapshot, preserving topology from `previous`.
    ///
    /// All power states become unknown. Alias, model, the multi-outlet flag
    /// and the child id/alias list come from the previous snapshot when one
    /// exists; otherwise they are left empty.
    #[must_use]
    pub fn offline(record: &DeviceRecord, previous: Option<&StateSnapshot>) -> Self {
        let children = previous
            .map(|prev| {
                prev.children
                    .iter()
                    .map(|child| OutletSnapshot {
                        id: child.id.clone(),
                        alias: child.alias.clone(),
                        is_on: None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            status: DeviceStatus::Offline,
            is_on: None,
            alias: previous.and_then(|prev| prev.alias.clone()),
            model: previous.and_then(|prev| prev.model.clone()),
            is_multi_outlet: previous.is_some_and(|prev| prev.is_multi_outlet),
            children,
            last_updated: previous.and_then(|prev| prev.last_updated),
        }
    }

    /// Returns true if the device was reachable at snapshot time.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }

    /// Looks up a child outlet by its device-assigned id.
    #[must_use]
    pub fn child(&self, id: &str) -> Option<&OutletSnapshot> {
        self.children.iter().find(|c| c.id == id)
    }
}
