//! Persistent service catalogue.
//!
//! Services live in a SQLite database with WAL mode enabled. The schema is
//! generated from [`crate::model::registry`]. Runtime state (running flag and
//! container reference) is only ever written as a unit through
//! [`SqliteServiceStore::update_runtime_state`].
//!
//! # Example
//!
//! ```ignore
//! use mission_control::state::{ServiceFilter, SqliteServiceStore};
//!
//! let store = SqliteServiceStore::new("mission-control.db").await?;
//! store.initialize().await?;
//!
//! for daemon in store.list(ServiceFilter::daemons()).await? {
//!     println!("{}", daemon);
//! }
//! ```

mod sqlite;

pub use sqlite::SqliteServiceStore;

/// Which services [`SqliteServiceStore::list`] returns. `None` matches any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceFilter {
    pub disabled: Option<bool>,
    pub daemon: Option<bool>,
}

impl ServiceFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn enabled() -> Self {
        Self {
            disabled: Some(false),
            daemon: None,
        }
    }

    /// Daemons eligible for auto-start.
    pub fn daemons() -> Self {
        Self {
            disabled: Some(false),
            daemon: Some(true),
        }
    }
}
