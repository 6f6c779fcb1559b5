// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `plugfleet` - A Rust library to orchestrate fleets of smart plugs.
//!
//! This library sits between an API layer and a smart-plug SDK: callers
//! submit on/off commands and state queries for whitelisted devices, and
//! the engine handles queueing, connection lifecycle and reachability so
//! the devices' quirks never leak upward.
//!
//! # Supported Features
//!
//! - **Serialized command queues**: One FIFO per device identity, so
//!   commands to the same plug never interleave while different plugs
//!   proceed concurrently
//! - **Connection escalation**: Reuse the live connection, reconnect at
//!   the last known address (with identity verification), rediscover on
//!   the network, then declare the device offline
//! - **Short-lived connections**: Workers connect on demand, reuse the
//!   session across consecutive commands, and disconnect after a short
//!   idle window
//! - **Graceful degradation**: State queries answer from cache without
//!   network I/O; offline snapshots preserve the last observed topology
//!   with power states marked unknown
//! - **Multi-outlet devices**: Commands and state cover child outlets on
//!   power strips
//!
//! # Quick Start
//!
//! ```no_run
//! use plugfleet::engine::{EngineConfig, PlugEngine};
//! use plugfleet::{CommandAction, DeviceRegistry};
//! # use plugfleet::session::{Credentials, PlugSession, PlugTransport, SessionError};
//! # struct SdkTransport;
//! # #[async_trait::async_trait]
//! # impl PlugTransport for SdkTransport {
//! #     async fn connect(&self, _: &str, _: Option<&Credentials>)
//! #         -> Result<Box<dyn PlugSession>, SessionError> { unimplemented!() }
//! #     async fn discover(&self, _: &str)
//! #         -> Result<tokio::sync::mpsc::Receiver<Box<dyn PlugSession>>, SessionError> { unimplemented!() }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> plugfleet::Result<()> {
//!     // The whitelist is the only source of commandable devices.
//!     let registry = DeviceRegistry::load_from_path("devices.json")
//!         .expect("whitelist must parse");
//!
//!     let engine = PlugEngine::start(SdkTransport, registry, EngineConfig::default());
//!
//!     // Commands queue per device and wait for their outcome.
//!     let snapshot = engine
//!         .submit_command("1a2b3c4d", CommandAction::TurnOn, None)
//!         .await?;
//!     println!("{}: on = {:?}", snapshot.name, snapshot.is_on);
//!
//!     // Queries answer from cache and never touch the network.
//!     for state in engine.all_cached_states() {
//!         println!("{} is {:?}", state.name, state.status);
//!     }
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod engine;
pub mod error;
mod identity;
mod registry;
pub mod session;
pub mod state;

pub use command::{Command, CommandAction, CommandError, CommandStatus, CompletionSignal};
pub use engine::{EngineConfig, PlugEngine};
pub use error::{Error, Result, ValidationError};
pub use identity::{DeviceId, HardwareAddr};
pub use registry::{DeviceRecord, DeviceRegistry, RegistryError};
pub use session::{
    ChildOutlet, Credentials, OutletTopology, PlugSession, PlugTransport, SessionError,
};
pub use state::{DeviceStatus, OutletSnapshot, StateSnapshot};
