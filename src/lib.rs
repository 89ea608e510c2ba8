#![allow(unused_assignments)]

//! # Mission Control
//!
//! Keeps a catalogue of declared container services in step with a Docker
//! host.
//!
//! ## Features
//!
//! - **Idempotent lifecycle**: start, stop and restart reuse existing containers and never duplicate them
//! - **Self-healing state**: stale container references are cleared and re-resolved by image
//! - **Event reconciliation**: container start/stop/die/destroy events update the catalogue as they happen
//! - **Daemons**: always-on services are brought up at boot
//! - **Streaming**: container logs and CPU/memory/disk statistics as cancellable streams
//! - **Image cache**: images are pulled on demand and warmed at boot
//!
//! ## Quick Start
//!
//! ```no_run
//! use mission_control::docker::DockerClient;
//! use mission_control::model::ServiceSpec;
//! use mission_control::notify::BroadcastNotifier;
//! use mission_control::state::SqliteServiceStore;
//! use mission_control::MissionControl;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), mission_control::Error> {
//! let store = SqliteServiceStore::new("mission-control.db").await?;
//! let app = MissionControl::new(
//!     Arc::new(DockerClient::new()),
//!     store,
//!     Arc::new(BroadcastNotifier::default()),
//! )
//! .await?;
//!
//! let mut web = app.seed(vec![ServiceSpec::new("web", "nginx")], false).await?.remove(0);
//! let outcome = app.controller().start(&mut web).await?;
//! println!("{}: {}", web, outcome);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! - Calls for different services are independent; calls for one service
//!   should not overlap
//! - The event loop and stream relays are tokio tasks sharing the store
//! - Runtime-state writes are single-row updates; the last write wins

pub mod config;
pub mod docker;
pub mod error;
pub mod handlers;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod runtime;
pub mod service;
pub mod state;
pub mod streaming;

// Re-export commonly used types
pub use error::{Error, Result};
pub use handlers::{ServiceHandlers, Session};
pub use model::{RuntimeState, Service, ServiceSpec};
pub use orchestrator::MissionControl;
pub use runtime::ContainerRuntime;
pub use service::ServiceController;
pub use state::SqliteServiceStore;
