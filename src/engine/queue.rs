// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device command queues and their worker tasks.
//!
//! Each device identity gets its own FIFO queue and at most one worker
//! task at a time, so commands to one device are strictly serialized while
//! different devices proceed concurrently. Workers are ephemeral: spawned
//! on the first command, kept alive while commands keep arriving, and exit
//! after [`EngineConfig::idle_timeout`](super::EngineConfig) of inactivity,
//! disconnecting their session on the way out.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::command::{Command, CommandAction, CommandError};
use crate::engine::{ConnectionResolver, ResolveError};
use crate::identity::HardwareAddr;
use crate::registry::DeviceRecord;
use crate::session::{PlugSession, PlugTransport};
use crate::state::StateCache;

/// FIFO of pending commands for one device identity.
///
/// `last_send` lives here rather than in the worker so command spacing
/// survives worker restarts.
#[derive(Default)]
struct DeviceQueue {
    pending: Mutex<VecDeque<Arc<Command>>>,
    notify: Notify,
    last_send: Mutex<Option<Instant>>,
}

impl DeviceQueue {
    fn push(&self, command: Arc<Command>) {
        self.pending.lock().push_back(command);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Arc<Command>> {
        self.pending.lock().pop_front()
    }

    fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Finds a queued command that duplicates the action/child pair.
    fn find_duplicate(
        &self,
        action: CommandAction,
        child_id: Option<&str>,
    ) -> Option<Arc<Command>> {
        self.pending
            .lock()
            .iter()
            .find(|cmd| cmd.duplicates(action, child_id))
            .cloned()
    }

    /// Fails every still-queued command. Used at shutdown.
    fn drain_failing(&self, error: &CommandError) {
        let drained: Vec<_> = self.pending.lock().drain(..).collect();
        for command in drained {
            command.fail(error.clone());
        }
    }
}

/// Dispatches commands to per-device worker tasks.
pub struct CommandQueue<T> {
    resolver: Arc<ConnectionResolver<T>>,
    states: Arc<StateCache>,
    queues: Mutex<HashMap<HardwareAddr, Arc<DeviceQueue>>>,
    workers: Mutex<HashMap<HardwareAddr, JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    idle_timeout: Duration,
    min_command_interval: Duration,
}

impl<T: PlugTransport> CommandQueue<T> {
    /// Creates an empty queue set over the given resolver and state cache.
    pub fn new(
        resolver: Arc<ConnectionResolver<T>>,
        states: Arc<StateCache>,
        idle_timeout: Duration,
        min_command_interval: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            resolver,
            states,
            queues: Mutex::new(HashMap::new()),
            workers: Mutex::new(HashMap::new()),
            shutdown,
            idle_timeout,
            min_command_interval,
        }
    }

    /// Enqueues a command for a device, deduplicating against commands
    /// still waiting in that device's queue.
    ///
    /// If a queued command with the same action and child already exists,
    /// the caller is attached to it instead of growing the queue. A
    /// command already being processed never absorbs new submissions.
    pub fn submit(
        self: &Arc<Self>,
        record: &Arc<DeviceRecord>,
        action: CommandAction,
        child_id: Option<String>,
    ) -> Arc<Command> {
        let queue = self.device_queue(record.addr);

        if let Some(existing) = queue.find_duplicate(action, child_id.as_deref()) {
            tracing::debug!(
                name = %record.name,
                %action,
                command_id = %existing.id(),
                "Joining duplicate queued command"
            );
            return existing;
        }

        let command = Arc::new(Command::new(record.addr, action, child_id));
        tracing::debug!(
            name = %record.name,
            %action,
            command_id = %command.id(),
            "Command queued"
        );
        queue.push(Arc::clone(&command));
        self.ensure_worker(record, &queue);
        command
    }

    /// Waits for a command to finish, forcing it to a timeout failure if
    /// the deadline expires first.
    ///
    /// The worker may still be executing the command on the wire after a
    /// timeout; its late terminal write loses to the timeout and is
    /// ignored.
    pub async fn wait_for_completion(
        &self,
        command: &Arc<Command>,
        timeout: Duration,
    ) -> Result<crate::state::StateSnapshot, CommandError> {
        if tokio::time::timeout(timeout, command.completed())
            .await
            .is_err()
        {
            let waited_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            command.fail(CommandError::Timeout { waited_ms });
            tracing::warn!(command_id = %command.id(), waited_ms, "Timed out waiting for command");
        }
        command.outcome()
    }

    /// Returns true if a worker task for this device is currently alive.
    pub fn has_active_processor(&self, addr: &HardwareAddr) -> bool {
        self.workers
            .lock()
            .get(addr)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops every worker and fails all still-queued commands.
    ///
    /// Workers observe the shutdown signal, disconnect their sessions, and
    /// exit before this returns.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);

        let handles: Vec<_> = {
            let mut workers = self.workers.lock();
            workers.drain().collect()
        };
        for (addr, handle) in handles {
            if let Err(e) = handle.await {
                tracing::warn!(%addr, error = %e, "Worker task did not exit cleanly");
            }
        }

        let queues: Vec<_> = {
            let mut queues = self.queues.lock();
            queues.drain().map(|(_, queue)| queue).collect()
        };
        let error = CommandError::Operation {
            message: "engine shut down".to_string(),
        };
        for queue in queues {
            queue.drain_failing(&error);
        }
    }

    fn device_queue(&self, addr: HardwareAddr) -> Arc<DeviceQueue> {
        Arc::clone(
            self.queues
                .lock()
                .entry(addr)
                .or_insert_with(|| Arc::new(DeviceQueue::default())),
        )
    }

    /// Spawns a worker for the device unless one is already running.
    fn ensure_worker(self: &Arc<Self>, record: &Arc<DeviceRecord>, queue: &Arc<DeviceQueue>) {
        let mut workers = self.workers.lock();
        if workers
            .get(&record.addr)
            .is_some_and(|handle| !handle.is_finished())
        {
            return;
        }

        if *self.shutdown.borrow() {
            return;
        }

        tracing::debug!(name = %record.name, "Starting command worker");
        let handle = tokio::spawn(worker_loop(
            Arc::clone(self),
            Arc::clone(record),
            Arc::clone(queue),
            self.shutdown.subscribe(),
        ));
        workers.insert(record.addr, handle);
    }
}

impl<T> std::fmt::Debug for CommandQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("idle_timeout", &self.idle_timeout)
            .field("min_command_interval", &self.min_command_interval)
            .finish_non_exhaustive()
    }
}

/// Serialized command loop for one device.
///
/// Owns the device's live session between commands. Exits, after
/// disconnecting, when the queue stays empty for the idle timeout or the
/// engine shuts down.
async fn worker_loop<T: PlugTransport>(
    queue_set: Arc<CommandQueue<T>>,
    record: Arc<DeviceRecord>,
    queue: Arc<DeviceQueue>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut slot: Option<Box<dyn PlugSession>> = None;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let command = loop {
            if let Some(command) = queue.pop() {
                break Some(command);
            }
            tokio::select! {
                () = queue.notify.notified() => {}
                // A submission can land just as the idle timer fires and
                // lose the select race, so pop once more before retiring.
                () = tokio::time::sleep(queue_set.idle_timeout) => break queue.pop(),
                _ = shutdown.changed() => break None,
            }
        };

        let Some(command) = command else {
            // Retire. Submissions that arrive while the session closes see
            // this worker as still alive and spawn no replacement, so pick
            // them up here instead of stranding them in the queue.
            if let Some(mut session) = slot.take() {
                tracing::debug!(name = %record.name, "Worker idle, disconnecting");
                session.disconnect().await;
                if !queue.is_empty() && !*shutdown.borrow() {
                    continue;
                }
            }
            break;
        };

        // A waiter may have timed the command out while it sat queued.
        if command.status().is_terminal() {
            continue;
        }
        command.mark_processing();

        pace_commands(&queue, queue_set.min_command_interval).await;

        tracing::debug!(
            name = %record.name,
            command_id = %command.id(),
            action = %command.action(),
            "Executing command"
        );
        let outcome = queue_set
            .resolver
            .execute(&record, &mut slot, command.action(), command.child_id())
            .await;
        *queue.last_send.lock() = Some(Instant::now());

        match outcome {
            Ok(snapshot) => {
                queue_set.states.insert(record.addr, snapshot.clone());
                command.complete(snapshot);
            }
            Err(ResolveError::UnknownChild(id)) => {
                command.fail(CommandError::UnknownChild(id));
            }
            Err(ResolveError::Rejected(message)) => {
                tracing::warn!(name = %record.name, %message, "Device rejected command");
                command.fail(CommandError::Operation { message });
            }
            Err(ResolveError::Offline) => {
                tracing::warn!(name = %record.name, "Device is offline");
                queue_set.states.mark_offline(&record);
                command.fail(CommandError::Offline {
                    name: record.name.clone(),
                });
            }
        }
    }

    // Shutdown path; the idle path already closed its session above.
    if let Some(mut session) = slot {
        tracing::debug!(name = %record.name, "Worker stopping, disconnecting");
        session.disconnect().await;
    }
}

/// Enforces the minimum spacing between consecutive sends to one device.
async fn pace_commands(queue: &DeviceQueue, min_interval: Duration) {
    let wait = queue.last_send.lock().map(|last| {
        min_interval.saturating_sub(last.elapsed())
    });
    if let Some(wait) = wait {
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
