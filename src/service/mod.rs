//! Service lifecycle against the container runtime.
//!
//! - [`translate`]: declared attributes to runtime parameters
//! - [`locator`]: service to container resolution with image fallback
//! - [`images`]: local image cache
//! - [`lifecycle`]: the [`ServiceController`] tying them together
//!
//! # Example
//!
//! ```ignore
//! use mission_control::service::{ServiceController, StartOutcome};
//!
//! let mut service = controller.load(3).await?;
//! match controller.start(&mut service).await? {
//!     StartOutcome::AlreadyRunning => println!("nothing to do"),
//!     outcome => println!("{}", outcome),
//! }
//! ```

pub mod images;
pub mod lifecycle;
pub mod locator;
pub mod translate;

pub use images::{ensure_cached, warm, CacheOutcome, WarmReport};
pub use lifecycle::{RestartOutcome, ServiceController, StartOutcome, StopOutcome};
pub use locator::locate;
