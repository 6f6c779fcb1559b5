// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The command/connection orchestration engine.
//!
//! One [`PlugEngine`] owns everything mutable: the per-identity command
//! queues and workers, the address and state caches, and the background
//! health monitor. Its lifetime is explicit: [`PlugEngine::start`] brings
//! the engine up and [`PlugEngine::shutdown`] cancels every worker, each of
//! which disconnects its open session before exiting.
//!
//! # Execution model
//!
//! Commands for one device identity run strictly serialized through a
//! single worker, which connects on the first command, reuses the
//! connection for consecutive commands, and disconnects after 30 seconds of
//! inactivity. Workers for different identities run concurrently and never
//! block each other. Reaching a device escalates through reuse of the live
//! connection, reconnection at the cached address (with identity
//! verification), and network rediscovery, before the device is declared
//! offline.

use std::time::Duration;

mod monitor;
mod plug_engine;
mod queue;
mod resolver;

pub use plug_engine::PlugEngine;
pub use queue::CommandQueue;
pub use resolver::ConnectionResolver;

pub(crate) use monitor::HealthMonitor;
pub(crate) use resolver::ResolveError;

/// Tuning knobs for the engine.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use plugfleet::engine::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_idle_timeout(Duration::from_secs(10))
///     .with_health_interval(Duration::from_secs(120));
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a worker waits for the next command before disconnecting
    /// and exiting.
    pub idle_timeout: Duration,
    /// Minimum spacing between consecutive commands to one identity,
    /// measured send-time to send-time.
    pub min_command_interval: Duration,
    /// How long a caller waits for command completion before the command
    /// is forced to a timeout failure.
    pub wait_timeout: Duration,
    /// Interval of the background health refresh for idle devices.
    pub health_interval: Duration,
    /// Immediate connection attempts per escalation step.
    pub connect_retries: u32,
    /// Fixed delay between immediate connection attempts.
    pub connect_retry_delay: Duration,
}

impl EngineConfig {
    /// Sets the worker idle timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the minimum inter-command interval per identity.
    #[must_use]
    pub fn with_min_command_interval(mut self, interval: Duration) -> Self {
        self.min_command_interval = interval;
        self
    }

    /// Sets the caller-side completion wait timeout.
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Sets the health monitor interval.
    #[must_use]
    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Sets the number of immediate connection attempts per step.
    #[must_use]
    pub fn with_connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries;
        self
    }

    /// Sets the delay between immediate connection attempts.
    #[must_use]
    pub fn with_connect_retry_delay(mut self, delay: Duration) -> Self {
        self.connect_retry_delay = delay;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            min_command_interval: Duration::from_millis(500),
            wait_timeout: Duration::from_secs(30),
            health_interval: Duration::from_secs(60),
            connect_retries: 3,
            connect_retry_delay: Duration::from_millis(500),
        }
    }
}
