// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cached device state and topology.
//!
//! Two in-memory maps back the engine: the [`AddressCache`] remembers the
//! last network address each device answered at, and the [`StateCache`]
//! holds the last [`StateSnapshot`] per device for instant, zero-I/O status
//! queries. Both degrade gracefully: losing reach of a device clears its
//! power state but never erases known topology, and a failed escalation
//! leaves the cached address untouched.

mod cache;
mod snapshot;

pub use cache::{AddressCache, AddressEntry, StateCache};
pub use snapshot::{DeviceStatus, OutletSnapshot, StateSnapshot};
