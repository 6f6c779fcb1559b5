// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The engine facade.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::command::CommandAction;
use crate::engine::{CommandQueue, ConnectionResolver, EngineConfig, HealthMonitor};
use crate::error::{Error, Result, ValidationError};
use crate::registry::{DeviceRecord, DeviceRegistry, RegistryError};
use crate::session::PlugTransport;
use crate::state::{AddressCache, StateCache, StateSnapshot};

/// Orchestrates command execution, connection lifecycle and state caching
/// for a whitelisted fleet of smart plugs.
///
/// All methods take `&self`; the engine is designed to sit behind an `Arc`
/// and serve concurrent callers. Queries ([`cached_state`], the whole
/// [`all_cached_states`] listing) never touch the network; only command
/// submission and [`force_refresh`] do.
///
/// [`cached_state`]: Self::cached_state
/// [`all_cached_states`]: Self::all_cached_states
/// [`force_refresh`]: Self::force_refresh
///
/// # Examples
///
/// ```no_run
/// use plugfleet::engine::{EngineConfig, PlugEngine};
/// use plugfleet::{CommandAction, DeviceRegistry};
/// # use plugfleet::session::{Credentials, PlugSession, PlugTransport, SessionError};
/// # struct MyTransport;
/// # #[async_trait::async_trait]
/// # impl PlugTransport for MyTransport {
/// #     async fn connect(&self, _: &str, _: Option<&Credentials>)
/// #         -> Result<Box<dyn PlugSession>, SessionError> { unimplemented!() }
/// #     async fn discover(&self, _: &str)
/// #         -> Result<tokio::sync::mpsc::Receiver<Box<dyn PlugSession>>, SessionError> { unimplemented!() }
/// # }
///
/// # async fn run() -> plugfleet::Result<()> {
/// let registry = DeviceRegistry::load_from_path("devices.json").unwrap();
/// let engine = PlugEngine::start(MyTransport, registry, EngineConfig::default());
///
/// let snapshot = engine.submit_command("1a2b3c4d", CommandAction::TurnOn, None).await?;
/// println!("{} is on: {:?}", snapshot.name, snapshot.is_on);
///
/// engine.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct PlugEngine<T> {
    registry: DeviceRegistry,
    states: Arc<StateCache>,
    resolver: Arc<ConnectionResolver<T>>,
    queue: Arc<CommandQueue<T>>,
    monitor: Mutex<Option<HealthMonitor>>,
    config: EngineConfig,
    shut_down: AtomicBool,
}

impl<T: PlugTransport> PlugEngine<T> {
    /// Brings the engine up over a transport and whitelist.
    ///
    /// Spawns the background health monitor; workers spawn lazily as
    /// commands arrive. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(transport: T, registry: DeviceRegistry, config: EngineConfig) -> Self {
        let addresses = Arc::new(AddressCache::new());
        let states = Arc::new(StateCache::new());
        let resolver = Arc::new(ConnectionResolver::new(
            Arc::new(transport),
            addresses,
            config.connect_retries,
            config.connect_retry_delay,
        ));
        let queue = Arc::new(CommandQueue::new(
            Arc::clone(&resolver),
            Arc::clone(&states),
            config.idle_timeout,
            config.min_command_interval,
        ));
        let monitor = HealthMonitor::spawn(
            registry.clone(),
            Arc::clone(&resolver),
            Arc::clone(&queue),
            Arc::clone(&states),
            config.health_interval,
        );

        tracing::info!(devices = registry.len(), "Engine started");
        Self {
            registry,
            states,
            resolver,
            queue,
            monitor: Mutex::new(Some(monitor)),
            config,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Submits a control command and waits for its outcome.
    ///
    /// Validation happens before any queueing or network contact: the
    /// device id must be whitelisted, and a requested child outlet must
    /// exist in the device's last observed topology (devices never yet
    /// observed skip the child check and let execution resolve it).
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for an unknown device or child,
    /// [`Error::Offline`] when the device cannot be reached,
    /// [`Error::Timeout`] when the completion wait expires,
    /// [`Error::Operation`] when the device rejects the command, and
    /// [`Error::ShutDown`] after [`shutdown`](Self::shutdown).
    pub async fn submit_command(
        &self,
        device_id: &str,
        action: CommandAction,
        child_id: Option<&str>,
    ) -> Result<StateSnapshot> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }

        let record = self.resolve(device_id)?;
        self.validate_child(&record, child_id)?;

        let command = self
            .queue
            .submit(&record, action, child_id.map(str::to_string));
        let snapshot = self
            .queue
            .wait_for_completion(&command, self.config.wait_timeout)
            .await?;
        Ok(snapshot)
    }

    /// Returns a device's last known state without touching the network.
    ///
    /// A whitelisted device that has never been observed yields an
    /// offline placeholder.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if the device id is not whitelisted.
    pub fn cached_state(&self, device_id: &str) -> Result<StateSnapshot> {
        let record = self.resolve(device_id)?;
        Ok(self.states.snapshot_or_placeholder(&record))
    }

    /// Returns the last known state of every whitelisted device, ordered
    /// by hardware address. Never touches the network.
    #[must_use]
    pub fn all_cached_states(&self) -> Vec<StateSnapshot> {
        self.registry
            .records()
            .iter()
            .map(|record| self.states.snapshot_or_placeholder(record))
            .collect()
    }

    /// Refreshes a device's state immediately, bypassing the command
    /// queue.
    ///
    /// Escalates through the cached address and rediscovery; if the
    /// device cannot be reached it is marked offline and the offline
    /// snapshot is returned. This races benignly with an active worker:
    /// both writers store equally fresh snapshots.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if the device id is not whitelisted, and
    /// [`Error::ShutDown`] after [`shutdown`](Self::shutdown).
    pub async fn force_refresh(&self, device_id: &str) -> Result<StateSnapshot> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }

        let record = self.resolve(device_id)?;
        match self.resolver.refresh(&record).await {
            Some(snapshot) => {
                self.states.insert(record.addr, snapshot.clone());
                Ok(snapshot)
            }
            None => Ok(self.states.mark_offline(&record)),
        }
    }

    /// Replaces the whitelist from JSON. On parse failure the previous
    /// whitelist stays in effect.
    ///
    /// Removed devices keep their cached state and addresses; they simply
    /// stop resolving. Workers already executing a command finish with
    /// the record they started with.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if the JSON cannot be parsed or an
    /// entry carries a malformed hardware address.
    pub fn reload_whitelist(&self, json: &str) -> std::result::Result<(), RegistryError> {
        self.registry.reload_from_str(json)
    }

    /// The whitelist this engine resolves devices against.
    #[must_use]
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Stops the health monitor and every worker, disconnecting all open
    /// sessions. Pending commands fail; later submissions are rejected
    /// with [`Error::ShutDown`]. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Engine shutting down");

        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }
        self.queue.shutdown().await;
        tracing::info!("Engine shut down");
    }

    fn resolve(&self, device_id: &str) -> Result<Arc<DeviceRecord>> {
        self.registry
            .by_id(device_id)
            .ok_or_else(|| ValidationError::UnknownDevice(device_id.to_string()).into())
    }

    /// Rejects a child-targeted command early when the last observed
    /// topology proves the child cannot exist.
    fn validate_child(&self, record: &DeviceRecord, child_id: Option<&str>) -> Result<()> {
        let Some(child_id) = child_id else {
            return Ok(());
        };
        let Some(snapshot) = self.states.get(&record.addr) else {
            return Ok(());
        };
        // Placeholder snapshots carry no topology; only a device actually
        // observed online can veto a child id.
        if snapshot.last_updated.is_none() {
            return Ok(());
        }

        if !snapshot.is_multi_outlet || snapshot.child(child_id).is_none() {
            return Err(ValidationError::UnknownChild(child_id.to_string()).into());
        }
        Ok(())
    }
}

impl<T> std::fmt::Debug for PlugEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlugEngine")
            .field("devices", &self.registry.len())
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::session::{Credentials, PlugSession, SessionError};
    use crate::state::DeviceStatus;
    use tokio::sync::mpsc;

    struct DeadTransport;

    #[async_trait::async_trait]
    impl PlugTransport for DeadTransport {
        async fn connect(
            &self,
            _address: &str,
            _credentials: Option<&Credentials>,
        ) -> std::result::Result<Box<dyn PlugSession>, SessionError> {
            Err(SessionError::ConnectionFailed("no route".to_string()))
        }

        async fn discover(
            &self,
            _target: &str,
        ) -> std::result::Result<mpsc::Receiver<Box<dyn PlugSession>>, SessionError> {
            let (_, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    const WHITELIST: &str = r#"{
        "devices": [
            {"mac": "aa:bb:cc:dd:ee:ff", "name": "Desk Lamp", "target": "192.168.1.255"}
        ]
    }"#;

    fn engine() -> PlugEngine<DeadTransport> {
        let registry = DeviceRegistry::load_from_str(WHITELIST).unwrap();
        PlugEngine::start(DeadTransport, registry, EngineConfig::default())
    }

    fn device_id() -> String {
        let addr: crate::HardwareAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        addr.device_id().to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_device_id_is_rejected_before_queueing() {
        let engine = engine();
        let err = engine
            .submit_command("deadbeef", CommandAction::TurnOn, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::UnknownDevice(_))
        ));
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cached_state_placeholder_for_unseen_device() {
        let engine = engine();
        let snap = engine.cached_state(&device_id()).unwrap();
        assert_eq!(snap.status, DeviceStatus::Offline);
        assert_eq!(snap.name, "Desk Lamp");
        assert!(snap.last_updated.is_none());
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn all_cached_states_covers_whole_whitelist() {
        let engine = engine();
        let states = engine.all_cached_states();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].name, "Desk Lamp");
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn submit_after_shutdown_is_rejected() {
        let engine = engine();
        engine.shutdown().await;

        let err = engine
            .submit_command(&device_id(), CommandAction::TurnOn, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ShutDown));

        let err = engine.force_refresh(&device_id()).await.unwrap_err();
        assert!(matches!(err, Error::ShutDown));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_idempotent() {
        let engine = engine();
        engine.shutdown().await;
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reload_swaps_whitelist() {
        let engine = engine();
        engine
            .reload_whitelist(
                r#"{"devices": [{"mac": "11:22:33:44:55:66", "target": "10.0.0.255"}]}"#,
            )
            .unwrap();

        let err = engine.cached_state(&device_id()).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::UnknownDevice(_))
        ));
        engine.shutdown().await;
    }
}
