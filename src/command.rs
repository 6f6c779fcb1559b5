// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device control commands and their completion signalling.
//!
//! A [`Command`] is created by the engine facade, queued, and driven to a
//! terminal state by exactly one worker, or by a waiting caller whose
//! timeout expires first. Terminal transitions are first-write-wins: once a
//! command is completed or failed it never changes again, and its
//! [`CompletionSignal`] fires at most once no matter who races.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{Error, ValidationError};
use crate::identity::HardwareAddr;
use crate::state::StateSnapshot;

/// The action a command performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandAction {
    /// Turn the device (or child outlet) on.
    TurnOn,
    /// Turn the device (or child outlet) off.
    TurnOff,
}

impl CommandAction {
    /// Returns the wire-facing action string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TurnOn => "on",
            Self::TurnOff => "off",
        }
    }
}

impl std::fmt::Display for CommandAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommandAction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Self::TurnOn),
            "off" => Ok(Self::TurnOff),
            _ => Err(ValidationError::InvalidAction(s.to_string())),
        }
    }
}

/// Lifecycle state of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Enqueued, not yet picked up by a worker.
    Queued,
    /// A worker is executing it.
    Processing,
    /// Finished successfully; a result snapshot is available.
    Completed,
    /// Finished unsuccessfully; an error is available.
    Failed,
}

impl CommandStatus {
    /// Returns true for `Completed` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Terminal failure of a command. Cloneable so every waiter gets a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The named child outlet does not exist on the device.
    UnknownChild(String),
    /// The device is unreachable after the full escalation sequence.
    Offline {
        /// Display name of the unreachable device.
        name: String,
    },
    /// The device was reached but the action itself failed.
    Operation {
        /// Description of the underlying failure.
        message: String,
    },
    /// The caller's wait deadline expired.
    Timeout {
        /// How long the caller waited, in milliseconds.
        waited_ms: u64,
    },
}

impl From<CommandError> for Error {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::UnknownChild(id) => {
                Error::Validation(ValidationError::UnknownChild(id))
            }
            CommandError::Offline { name } => Error::Offline { name },
            CommandError::Operation { message } => Error::Operation { message },
            CommandError::Timeout { waited_ms } => Error::Timeout { waited_ms },
        }
    }
}

/// One-shot broadcast signal for command completion.
///
/// Safe to fire at most once ([`fire`](Self::fire) reports whether the
/// caller was the one that fired it) and safe to be observed by zero or
/// more waiters. A waiter that subscribes after the fire returns
/// immediately.
#[derive(Debug)]
pub struct CompletionSignal {
    tx: watch::Sender<bool>,
}

impl CompletionSignal {
    /// Creates an unfired signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Fires the signal, waking all current and future waiters.
    ///
    /// Returns true if this call transitioned the signal; false if it had
    /// already been fired.
    pub fn fire(&self) -> bool {
        !self.tx.send_replace(true)
    }

    /// Returns true if the signal has fired.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Waits until the signal fires. Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so wait_for cannot fail here.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

struct CommandInner {
    status: CommandStatus,
    result: Option<StateSnapshot>,
    error: Option<CommandError>,
}

/// A device control command submitted to the queue.
///
/// Shared as `Arc<Command>` between the submitting caller, possible
/// deduplicated co-waiters, and the executing worker.
pub struct Command {
    id: Uuid,
    addr: HardwareAddr,
    action: CommandAction,
    child_id: Option<String>,
    created_at: DateTime<Utc>,
    inner: Mutex<CommandInner>,
    signal: CompletionSignal,
}

impl Command {
    /// Creates a queued command.
    #[must_use]
    pub fn new(addr: HardwareAddr, action: CommandAction, child_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            addr,
            action,
            child_id,
            created_at: Utc::now(),
            inner: Mutex::new(CommandInner {
                status: CommandStatus::Queued,
                result: None,
                error: None,
            }),
            signal: CompletionSignal::new(),
        }
    }

    /// Unique command id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Target device identity.
    #[must_use]
    pub fn addr(&self) -> HardwareAddr {
        self.addr
    }

    /// The requested action.
    #[must_use]
    pub fn action(&self) -> CommandAction {
        self.action
    }

    /// Target child outlet id, if any.
    #[must_use]
    pub fn child_id(&self) -> Option<&str> {
        self.child_id.as_deref()
    }

    /// When the command was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> CommandStatus {
        self.inner.lock().status
    }

    /// Returns true while the command has not been picked up by a worker.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.status() == CommandStatus::Queued
    }

    /// Returns true if this queued command would duplicate the given
    /// action/child combination.
    #[must_use]
    pub fn duplicates(&self, action: CommandAction, child_id: Option<&str>) -> bool {
        self.is_queued() && self.action == action && self.child_id.as_deref() == child_id
    }

    /// Marks the command as picked up by a worker.
    ///
    /// No-op if the command is already terminal (e.g. a waiter timed it
    /// out while it sat in the queue).
    pub fn mark_processing(&self) {
        let mut inner = self.inner.lock();
        if inner.status == CommandStatus::Queued {
            inner.status = CommandStatus::Processing;
        }
    }

    /// Completes the command with a result snapshot and fires the signal.
    ///
    /// First-write-wins: ignored if the command is already terminal.
    pub fn complete(&self, snapshot: StateSnapshot) {
        {
            let mut inner = self.inner.lock();
            if inner.status.is_terminal() {
                return;
            }
            inner.status = CommandStatus::Completed;
            inner.result = Some(snapshot);
        }
        self.signal.fire();
    }

    /// Fails the command and fires the signal.
    ///
    /// First-write-wins: ignored if the command is already terminal.
    pub fn fail(&self, error: CommandError) {
        {
            let mut inner = self.inner.lock();
            if inner.status.is_terminal() {
                return;
            }
            inner.status = CommandStatus::Failed;
            inner.error = Some(error);
        }
        self.signal.fire();
    }

    /// Waits until the command reaches a terminal state.
    pub async fn completed(&self) {
        self.signal.wait().await;
    }

    /// Returns the terminal outcome.
    ///
    /// # Panics
    ///
    /// Never panics; a non-terminal command yields an `Operation` error,
    /// which callers only see if they skip waiting for completion.
    #[must_use]
    pub fn outcome(&self) -> Result<StateSnapshot, CommandError> {
        let inner = self.inner.lock();
        match inner.status {
            CommandStatus::Completed => inner.result.clone().ok_or(CommandError::Operation {
                message: "completed command is missing its result".to_string(),
            }),
            CommandStatus::Failed => Err(inner.error.clone().unwrap_or(CommandError::Operation {
                message: "failed command is missing its error".to_string(),
            })),
            CommandStatus::Queued | CommandStatus::Processing => Err(CommandError::Operation {
                message: "command has not completed".to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("action", &self.action)
            .field("child_id", &self.child_id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn addr() -> HardwareAddr {
        "aa:bb:cc:dd:ee:ff".parse().unwrap()
    }

    fn offline_snapshot() -> StateSnapshot {
        let record = crate::registry::DeviceRecord {
            addr: addr(),
            id: addr().device_id(),
            name: "Plug".to_string(),
            discovery_target: "192.168.1.255".to_string(),
            credentials: None,
        };
        StateSnapshot::offline(&record, None)
    }

    #[test]
    fn action_parses_on_and_off_only() {
        assert_eq!("on".parse::<CommandAction>().unwrap(), CommandAction::TurnOn);
        assert_eq!(
            "off".parse::<CommandAction>().unwrap(),
            CommandAction::TurnOff
        );
        assert!("toggle".parse::<CommandAction>().is_err());
        assert!("ON".parse::<CommandAction>().is_err());
    }

    #[test]
    fn new_command_is_queued() {
        let cmd = Command::new(addr(), CommandAction::TurnOn, None);
        assert_eq!(cmd.status(), CommandStatus::Queued);
        assert!(cmd.is_queued());
    }

    #[test]
    fn duplicates_matches_action_and_child() {
        let cmd = Command::new(addr(), CommandAction::TurnOn, Some("plug0".to_string()));

        assert!(cmd.duplicates(CommandAction::TurnOn, Some("plug0")));
        assert!(!cmd.duplicates(CommandAction::TurnOff, Some("plug0")));
        assert!(!cmd.duplicates(CommandAction::TurnOn, Some("plug1")));
        assert!(!cmd.duplicates(CommandAction::TurnOn, None));

        cmd.mark_processing();
        assert!(!cmd.duplicates(CommandAction::TurnOn, Some("plug0")));
    }

    #[test]
    fn complete_is_first_write_wins() {
        let cmd = Command::new(addr(), CommandAction::TurnOn, None);
        cmd.complete(offline_snapshot());
        cmd.fail(CommandError::Timeout { waited_ms: 1 });

        assert_eq!(cmd.status(), CommandStatus::Completed);
        assert!(cmd.outcome().is_ok());
    }

    #[test]
    fn fail_is_first_write_wins() {
        let cmd = Command::new(addr(), CommandAction::TurnOff, None);
        cmd.fail(CommandError::Offline {
            name: "Plug".to_string(),
        });
        cmd.complete(offline_snapshot());

        assert_eq!(cmd.status(), CommandStatus::Failed);
        assert!(matches!(
            cmd.outcome(),
            Err(CommandError::Offline { .. })
        ));
    }

    #[test]
    fn mark_processing_after_terminal_is_ignored() {
        let cmd = Command::new(addr(), CommandAction::TurnOn, None);
        cmd.fail(CommandError::Timeout { waited_ms: 5 });
        cmd.mark_processing();
        assert_eq!(cmd.status(), CommandStatus::Failed);
    }

    #[test]
    fn signal_fires_at_most_once() {
        let signal = CompletionSignal::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
    }

    #[tokio::test]
    async fn multiple_waiters_all_unblock() {
        let cmd = Arc::new(Command::new(addr(), CommandAction::TurnOn, None));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let cmd = Arc::clone(&cmd);
                tokio::spawn(async move {
                    cmd.completed().await;
                    cmd.outcome()
                })
            })
            .collect();

        cmd.complete(offline_snapshot());

        for waiter in waiters {
            assert!(waiter.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn wait_after_fire_returns_immediately() {
        let signal = CompletionSignal::new();
        signal.fire();
        signal.wait().await;
    }

    #[test]
    fn command_error_maps_to_crate_error() {
        let err: Error = CommandError::UnknownChild("plug9".to_string()).into();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::UnknownChild(_))
        ));

        let err: Error = CommandError::Offline {
            name: "Plug".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Offline { .. }));

        let err: Error = CommandError::Timeout { waited_ms: 100 }.into();
        assert!(matches!(err, Error::Timeout { waited_ms: 100 }));
    }
}
