// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background freshness sweep over idle devices.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::{CommandQueue, ConnectionResolver};
use crate::registry::DeviceRegistry;
use crate::session::PlugTransport;
use crate::state::StateCache;

/// Periodically refreshes cached state for devices nobody is commanding.
///
/// Each sweep probes devices at their cached address only; devices with an
/// active worker are skipped (the worker's command results are fresher),
/// and devices that have never been seen are left to on-demand resolution.
/// A sweep never touches discovery and never fails the engine.
pub(crate) struct HealthMonitor {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// Spawns the sweep task.
    pub(crate) fn spawn<T: PlugTransport>(
        registry: DeviceRegistry,
        resolver: Arc<ConnectionResolver<T>>,
        queue: Arc<CommandQueue<T>>,
        states: Arc<StateCache>,
        interval: Duration,
    ) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(sweep_loop(registry, resolver, queue, states, interval, rx));
        Self { shutdown, handle }
    }

    /// Stops the sweep task and waits for it to exit.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Health monitor did not exit cleanly");
        }
    }
}

async fn sweep_loop<T: PlugTransport>(
    registry: DeviceRegistry,
    resolver: Arc<ConnectionResolver<T>>,
    queue: Arc<CommandQueue<T>>,
    states: Arc<StateCache>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The immediate first tick would race engine startup; skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        for record in registry.records() {
            if *shutdown.borrow() {
                return;
            }
            if queue.has_active_processor(&record.addr) {
                continue;
            }
            if resolver.addresses().get(&record.addr).is_none() {
                continue;
            }

            match resolver.probe_cached(&record).await {
                Some(snapshot) => {
                    tracing::debug!(name = %record.name, "Health sweep refreshed device");
                    states.insert(record.addr, snapshot);
                }
                None => {
                    tracing::debug!(name = %record.name, "Health sweep could not reach device");
                    states.mark_offline(&record);
                }
            }
        }
    }
}
