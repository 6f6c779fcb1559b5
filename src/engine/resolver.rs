// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection resolution: reuse → reconnect → rediscover.
//!
//! Given a device identity, an optional live session, and a command to run,
//! [`ConnectionResolver::execute`] guarantees one of two outcomes: the
//! command executes and a fresh snapshot plus a validated live session are
//! handed back, or the device is judged offline. No partial state escapes:
//! every abandoned connection attempt disconnects its session before the
//! next step runs.

use std::sync::Arc;
use std::time::Duration;

use crate::registry::DeviceRecord;
use crate::session::{Credentials, PlugSession, PlugTransport, SessionError};
use crate::state::{AddressCache, StateSnapshot};
use crate::CommandAction;

/// Terminal failure of one resolution cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResolveError {
    /// The requested child outlet does not exist on the connected device.
    /// Immediate, not retried; the session stays usable.
    UnknownChild(String),
    /// The device was reached but rejected the command. Reconnecting
    /// cannot fix a rejection, so no escalation; the session stays usable.
    Rejected(String),
    /// Every escalation step failed; the device is confirmed offline.
    Offline,
}

/// Failure of a single command attempt on one session.
enum AttemptError {
    UnknownChild(String),
    Rejected(String),
    Transport(SessionError),
}

/// Owns the retry-and-rediscover escalation for reaching devices.
pub struct ConnectionResolver<T> {
    transport: Arc<T>,
    addresses: Arc<AddressCache>,
    connect_retries: u32,
    connect_retry_delay: Duration,
}

impl<T: PlugTransport> ConnectionResolver<T> {
    /// Creates a resolver over the given transport and address cache.
    pub fn new(
        transport: Arc<T>,
        addresses: Arc<AddressCache>,
        connect_retries: u32,
        connect_retry_delay: Duration,
    ) -> Self {
        Self {
            transport,
            addresses,
            connect_retries,
            connect_retry_delay,
        }
    }

    /// Executes a command against a device, escalating through the three
    /// reachability steps.
    ///
    /// `slot` carries the live session between consecutive commands. On
    /// success the session used stays in the slot and the address it
    /// answered at is recorded in the cache. On [`ResolveError::Offline`]
    /// the slot is empty and the cached address is left untouched.
    pub(crate) async fn execute(
        &self,
        record: &DeviceRecord,
        slot: &mut Option<Box<dyn PlugSession>>,
        action: CommandAction,
        child_id: Option<&str>,
    ) -> Result<StateSnapshot, ResolveError> {
        // Step 1: reuse the connection from the previous command.
        if let Some(session) = slot.as_deref_mut() {
            match self.attempt(record, session, action, child_id).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(AttemptError::UnknownChild(id)) => {
                    return Err(ResolveError::UnknownChild(id));
                }
                Err(AttemptError::Rejected(message)) => {
                    return Err(ResolveError::Rejected(message));
                }
                Err(AttemptError::Transport(e)) => {
                    tracing::warn!(
                        name = %record.name,
                        error = %e,
                        "Command failed on existing connection, reconnecting"
                    );
                    session.disconnect().await;
                    *slot = None;
                }
            }
        }

        // Step 2: reconnect at the cached address, verifying identity in
        // case the address was reassigned to a different device.
        if let Some(entry) = self.addresses.get(&record.addr) {
            tracing::debug!(name = %record.name, address = %entry.address, "Retrying at cached address");

            match self
                .connect_with_retry(&entry.address, record.credentials.as_ref())
                .await
            {
                Ok(mut session) => {
                    if session.identity() == record.addr {
                        match self.attempt(record, session.as_mut(), action, child_id).await {
                            Ok(snapshot) => {
                                *slot = Some(session);
                                return Ok(snapshot);
                            }
                            Err(AttemptError::UnknownChild(id)) => {
                                *slot = Some(session);
                                return Err(ResolveError::UnknownChild(id));
                            }
                            Err(AttemptError::Rejected(message)) => {
                                *slot = Some(session);
                                return Err(ResolveError::Rejected(message));
                            }
                            Err(AttemptError::Transport(e)) => {
                                tracing::warn!(
                                    name = %record.name,
                                    error = %e,
                                    "Command at cached address failed"
                                );
                                session.disconnect().await;
                            }
                        }
                    } else {
                        tracing::warn!(
                            name = %record.name,
                            address = %entry.address,
                            reported = %session.identity(),
                            "Cached address no longer belongs to this device"
                        );
                        session.disconnect().await;
                    }
                }
                Err(e) => {
                    tracing::debug!(name = %record.name, error = %e, "Reconnect at cached address failed");
                }
            }
        }

        // Step 3: rediscover on the device's broadcast target.
        tracing::info!(name = %record.name, target = %record.discovery_target, "Rediscovering device");
        if let Some(address) = self.discover_address(record).await {
            if let Ok(mut session) = self
                .connect_with_retry(&address, record.credentials.as_ref())
                .await
            {
                match self.attempt(record, session.as_mut(), action, child_id).await {
                    Ok(snapshot) => {
                        *slot = Some(session);
                        return Ok(snapshot);
                    }
                    Err(AttemptError::UnknownChild(id)) => {
                        *slot = Some(session);
                        return Err(ResolveError::UnknownChild(id));
                    }
                    Err(AttemptError::Rejected(message)) => {
                        *slot = Some(session);
                        return Err(ResolveError::Rejected(message));
                    }
                    Err(AttemptError::Transport(e)) => {
                        tracing::warn!(
                            name = %record.name,
                            error = %e,
                            "Command at rediscovered address failed"
                        );
                        session.disconnect().await;
                    }
                }
            }
        }

        // Step 4: give up. The cached address is deliberately kept: it is
        // still the best known guess for the next cycle.
        Err(ResolveError::Offline)
    }

    /// Refreshes a device's state via the cached-address → discover
    /// escalation, without going through the command queue.
    ///
    /// Connect, refresh, snapshot, disconnect. Returns `None` if the
    /// device could not be reached.
    pub async fn refresh(&self, record: &DeviceRecord) -> Option<StateSnapshot> {
        if let Some(snapshot) = self.probe_cached(record).await {
            return Some(snapshot);
        }

        let address = self.discover_address(record).await?;
        let session = self
            .connect_with_retry(&address, record.credentials.as_ref())
            .await
            .ok()?;
        self.snapshot_and_disconnect(record, session).await
    }

    /// Refreshes a device's state at its cached address only.
    ///
    /// Used by the health monitor, which deliberately skips discovery:
    /// devices without a cached address are left to the on-demand
    /// resolver.
    pub async fn probe_cached(&self, record: &DeviceRecord) -> Option<StateSnapshot> {
        let entry = self.addresses.get(&record.addr)?;
        let mut session = self
            .connect_with_retry(&entry.address, record.credentials.as_ref())
            .await
            .ok()?;

        if session.identity() != record.addr {
            tracing::warn!(
                name = %record.name,
                address = %entry.address,
                "Cached address no longer belongs to this device"
            );
            session.disconnect().await;
            return None;
        }

        self.snapshot_and_disconnect(record, session).await
    }

    /// Opens a session at `address` with a small number of immediate
    /// retries to absorb transient socket noise.
    ///
    /// Policy: try without credentials first; if the device demands
    /// authentication and credentials are on file, retry with them.
    ///
    /// # Errors
    ///
    /// Returns the last [`SessionError`] once every attempt is exhausted.
    pub async fn connect_with_retry(
        &self,
        address: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn PlugSession>, SessionError> {
        let mut last_error = match self.connect_phase(address, None).await {
            Ok(session) => return Ok(session),
            Err(e) => e,
        };

        if last_error.is_auth() {
            if let Some(creds) = credentials {
                tracing::debug!(address, "Device requires authentication, retrying with credentials");
                match self.connect_phase(address, Some(creds)).await {
                    Ok(session) => return Ok(session),
                    Err(e) => last_error = e,
                }
            }
        }

        Err(last_error)
    }

    /// One retry loop of connection attempts with fixed credentials.
    async fn connect_phase(
        &self,
        address: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn PlugSession>, SessionError> {
        let attempts = self.connect_retries.max(1);
        let mut last_error = SessionError::ConnectionFailed("no attempts made".to_string());

        for attempt in 1..=attempts {
            match self.transport.connect(address, credentials).await {
                Ok(session) => return Ok(session),
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    tracing::debug!(address, attempt, error = %e, "Connection attempt failed");
                    last_error = e;
                    if attempt < attempts {
                        tokio::time::sleep(self.connect_retry_delay).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    /// Runs discovery on the device's broadcast target and returns the
    /// address of the session whose reported identity matches.
    ///
    /// Every discovered session is disconnected before returning; the
    /// caller reconnects at the returned address.
    async fn discover_address(&self, record: &DeviceRecord) -> Option<String> {
        let mut rx = match self.transport.discover(&record.discovery_target).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(target = %record.discovery_target, error = %e, "Discovery failed to start");
                return None;
            }
        };

        let mut found: Option<String> = None;
        while let Some(mut session) = rx.recv().await {
            if found.is_none() && session.identity() == record.addr {
                let address = session.address().to_string();
                tracing::info!(name = %record.name, %address, "Discovered device");
                found = Some(address);
            }
            session.disconnect().await;
        }

        if found.is_none() {
            tracing::info!(name = %record.name, "Device not found on network");
        }
        found
    }

    /// Executes one command attempt on a connected session: resolve the
    /// child outlet, send the action, refresh, snapshot, record the
    /// address.
    async fn attempt(
        &self,
        record: &DeviceRecord,
        session: &mut dyn PlugSession,
        action: CommandAction,
        child_id: Option<&str>,
    ) -> Result<StateSnapshot, AttemptError> {
        if let Some(id) = child_id {
            if session.topology().child(id).is_none() {
                return Err(AttemptError::UnknownChild(id.to_string()));
            }
        }

        let sent = match action {
            CommandAction::TurnOn => session.turn_on(child_id).await,
            CommandAction::TurnOff => session.turn_off(child_id).await,
        };
        match sent {
            Ok(()) => {}
            Err(SessionError::CommandRejected(message)) => {
                return Err(AttemptError::Rejected(message));
            }
            Err(e) => return Err(AttemptError::Transport(e)),
        }

        session.refresh().await.map_err(AttemptError::Transport)?;

        let snapshot = StateSnapshot::online(record, session);
        self.addresses
            .record_seen(record.addr, session.address());
        Ok(snapshot)
    }

    /// Refreshes a session, builds its snapshot, records the address, and
    /// disconnects.
    async fn snapshot_and_disconnect(
        &self,
        record: &DeviceRecord,
        mut session: Box<dyn PlugSession>,
    ) -> Option<StateSnapshot> {
        let refreshed = session.refresh().await;
        let snapshot = match refreshed {
            Ok(()) => {
                let snapshot = StateSnapshot::online(record, session.as_ref());
                self.addresses
                    .record_seen(record.addr, session.address());
                Some(snapshot)
            }
            Err(e) => {
                tracing::debug!(name = %record.name, error = %e, "Refresh failed");
                None
            }
        };
        session.disconnect().await;
        snapshot
    }

    /// The address cache this resolver records into.
    pub(crate) fn addresses(&self) -> &AddressCache {
        &self.addresses
    }
}

impl<T> std::fmt::Debug for ConnectionResolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionResolver")
            .field("connect_retries", &self.connect_retries)
            .field("connect_retry_delay", &self.connect_retry_delay)
            .finish_non_exhaustive()
    }
}
