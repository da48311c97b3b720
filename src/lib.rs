//! Rust library for bridging UniPi Neuron controllers over the Evok protocol
//!
//! This library keeps a live, in-memory copy of every device on a UniPi
//! controller and tells observers when something changes. It supports:
//!
//! - A persistent Evok WebSocket session per controller
//! - Full-state sync on every connect, enriched from the `/rest/all` endpoint
//! - Streaming state changes merged into a per-controller cache
//! - Change notifications keyed by controller, device-type and circuit
//! - Transparent reconnection at a fixed interval
//! - Relay, output and PWM commands
//!
//! # Quick Start
//!
//! ```no_run
//! use unipi_evok::{ChangeNotifier, ControllerSession, DeviceAddress, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // One notifier per application, shared by every session
//!     let notifier = ChangeNotifier::new();
//!
//!     let config = SessionConfig::new("192.168.1.40").with_name("Basement");
//!     let session = ControllerSession::connect(config, notifier.clone()).await?;
//!
//!     // The cache is populated as soon as the session exists
//!     for (address, state) in session.cache().devices_of_type("relay") {
//!         println!("{} = {:?} ({:?})", address, state.value(), state.display_name());
//!     }
//!
//!     // Observers are told *that* a device changed and re-read the cache
//!     let input = DeviceAddress::new("di", "1_01");
//!     let mut changes = session.subscribe(input.clone());
//!     while changes.recv().await.is_ok() {
//!         println!("{:?}", session.get(&input));
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Session**: `ControllerSession`, one per controller, owns the cache
//! - **Supervisor**: background task owning the connection lifecycle
//! - **Sync**: bootstrap snapshot over the WebSocket plus `/rest/all`
//! - **Ingest**: streamed messages merged into the cache
//! - **Cache**: `StateCache`, the merge rules for device records
//! - **Subscription**: `ChangeNotifier`, keyed fan-out of change signals
//! - **Connection**: the `Transport` contract and its WebSocket implementation
//! - **Protocol**: Evok message shapes

mod cache;
mod config;
mod connection;
mod error;
mod ingest;
mod protocol;
mod rest;
mod session;
mod subscription;
mod supervisor;
mod sync;
mod types;

// Public exports
pub use cache::{StateCache, SupplementMerge, INPUT_DEVICE_TYPES};
pub use config::{BridgeConfig, SessionConfig};
pub use connection::{EvokTransport, Transport};
pub use error::{EvokError, Result};
pub use protocol::Request;
pub use rest::RestClient;
pub use session::ControllerSession;
pub use subscription::{ChangeNotification, ChangeNotifier, NotificationKey, Subscription};
pub use supervisor::SessionState;
pub use types::{ControllerId, DeviceAddress, DeviceState};
