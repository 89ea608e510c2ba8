//! Long-running coordination: boot sequence, daemon supervision and the
//! event reconciliation loop.

mod core;
pub mod daemons;
pub mod events;

pub use self::core::{BootReport, MissionControl, DEFAULT_STATS_INTERVAL};
pub use daemons::{supervise_daemons, DaemonReport};
pub use events::{process_event, run_event_loop, spawn_event_loop};
