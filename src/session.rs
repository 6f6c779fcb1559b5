// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capability traits for the device SDK collaborator.
//!
//! The wire-level protocol (session establishment, encryption, RPC framing,
//! broadcast discovery packets) is out of scope for this crate. It is
//! consumed through two traits: [`PlugTransport`], which opens sessions and
//! runs broadcast discovery, and [`PlugSession`], a live connection to one
//! device. The orchestration engine is generic over the transport, which is
//! also what makes it testable with a scripted in-process implementation.
//!
//! Whether a device exposes child outlets is resolved once per connection
//! into an [`OutletTopology`], not probed per access.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::identity::HardwareAddr;

/// Errors reported by the SDK session layer.
#[derive(Debug, Error)]
pub enum SessionError {
    /// TCP-level connection to the device failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection attempt timed out.
    #[error("connection timed out after {0} ms")]
    Timeout(u64),

    /// The device requires credentials that were not supplied.
    #[error("authentication required")]
    AuthenticationRequired,

    /// The supplied credentials were rejected.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The device accepted the connection but rejected the command.
    #[error("command rejected: {0}")]
    CommandRejected(String),

    /// Broadcast discovery could not be started.
    #[error("discovery failed: {0}")]
    DiscoveryFailed(String),

    /// Malformed or unexpected device response.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    /// Returns true if supplying credentials could resolve this error.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationRequired | Self::AuthenticationFailed
        )
    }
}

/// Credentials passed through to the device SDK.
///
/// The engine never interprets these; it only forwards them from the
/// whitelist entry to [`PlugTransport::connect`].
#[derive(Clone, PartialEq, Eq, serde::Deserialize)]
pub struct Credentials {
    /// Account username.
    pub username: String,
    /// Account password.
    pub password: String,
}

impl Credentials {
    /// Creates a credentials pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A child outlet as reported by a connected multi-outlet device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildOutlet {
    /// Device-assigned outlet identifier.
    pub id: String,
    /// User-facing outlet alias.
    pub alias: String,
    /// Current power state of the outlet.
    pub is_on: bool,
}

/// Outlet layout of a connected device, resolved once per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutletTopology {
    /// A plain plug with a single relay.
    Single,
    /// A power strip exposing independently controllable child outlets,
    /// in device order.
    Strip(Vec<ChildOutlet>),
}

impl OutletTopology {
    /// Returns the child outlets, empty for single-outlet devices.
    #[must_use]
    pub fn children(&self) -> &[ChildOutlet] {
        match self {
            Self::Single => &[],
            Self::Strip(children) => children,
        }
    }

    /// Returns true if the device exposes child outlets.
    #[must_use]
    pub fn is_multi_outlet(&self) -> bool {
        matches!(self, Self::Strip(children) if !children.is_empty())
    }

    /// Looks up a child outlet by its device-assigned id.
    #[must_use]
    pub fn child(&self, id: &str) -> Option<&ChildOutlet> {
        self.children().iter().find(|c| c.id == id)
    }
}

/// A live session with one device.
///
/// Accessors reflect the state captured at the last connect or
/// [`refresh`](Self::refresh). Power commands accept an optional child
/// outlet id; callers resolve the id against [`topology`](Self::topology)
/// first, but a session may still reject an id it no longer recognizes.
#[async_trait]
pub trait PlugSession: Send {
    /// Hardware address reported by the connected device.
    ///
    /// This is the device's own claim and must be compared against the
    /// intended target before the session is trusted, since a cached
    /// network address may have been reassigned to a different device.
    fn identity(&self) -> HardwareAddr;

    /// Network address this session is connected to.
    fn address(&self) -> &str;

    /// Device-reported alias.
    fn display_name(&self) -> &str;

    /// Device-reported model name.
    fn model_name(&self) -> &str;

    /// Power state of the device relay.
    fn is_on(&self) -> bool;

    /// Outlet layout, resolved at connect time.
    fn topology(&self) -> &OutletTopology;

    /// Turns the device (or one child outlet) on.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] if the device is unreachable or rejects
    /// the command.
    async fn turn_on(&mut self, child_id: Option<&str>) -> Result<(), SessionError>;

    /// Turns the device (or one child outlet) off.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] if the device is unreachable or rejects
    /// the command.
    async fn turn_off(&mut self, child_id: Option<&str>) -> Result<(), SessionError>;

    /// Re-reads power state and topology from the device.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] if the device is unreachable.
    async fn refresh(&mut self) -> Result<(), SessionError>;

    /// Closes the session. Best-effort: errors are swallowed by the SDK.
    async fn disconnect(&mut self);
}

/// Factory for device sessions and broadcast discovery.
#[async_trait]
pub trait PlugTransport: Send + Sync + 'static {
    /// Opens a session to the device at `address`.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] if the device cannot be reached or
    /// authentication fails.
    async fn connect(
        &self,
        address: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn PlugSession>, SessionError>;

    /// Runs broadcast discovery scoped to `target` (a broadcast address
    /// such as `192.168.1.255`).
    ///
    /// Discovered devices arrive as live sessions on the returned channel;
    /// the channel closes when the discovery window ends. The caller is
    /// responsible for filtering by reported identity and for disconnecting
    /// every session it does not keep.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] if discovery cannot be started.
    async fn discover(
        &self,
        target: &str,
    ) -> Result<mpsc::Receiver<Box<dyn PlugSession>>, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip(children: &[(&str, &str, bool)]) -> OutletTopology {
        OutletTopology::Strip(
            children
                .iter()
                .map(|(id, alias, is_on)| ChildOutlet {
                    id: (*id).to_string(),
                    alias: (*alias).to_string(),
                    is_on: *is_on,
                })
                .collect(),
        )
    }

    #[test]
    fn single_topology_has_no_children() {
        let topo = OutletTopology::Single;
        assert!(topo.children().is_empty());
        assert!(!topo.is_multi_outlet());
        assert!(topo.child("0").is_none());
    }

    #[test]
    fn strip_topology_resolves_children_by_id() {
        let topo = strip(&[("plug0", "Lamp", true), ("plug1", "Fan", false)]);
        assert!(topo.is_multi_outlet());
        assert_eq!(topo.children().len(), 2);
        assert_eq!(topo.child("plug1").unwrap().alias, "Fan");
        assert!(topo.child("plug9").is_none());
    }

    #[test]
    fn empty_strip_is_not_multi_outlet() {
        let topo = OutletTopology::Strip(Vec::new());
        assert!(!topo.is_multi_outlet());
    }

    #[test]
    fn auth_errors_are_flagged() {
        assert!(SessionError::AuthenticationRequired.is_auth());
        assert!(SessionError::AuthenticationFailed.is_auth());
        assert!(!SessionError::ConnectionFailed("refused".to_string()).is_auth());
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials::new("user", "hunter2");
        let debug = format!("{creds:?}");
        assert!(debug.contains("user"));
        assert!(!debug.contains("hunter2"));
    }
}
