mod cache;
mod lifecycle;
mod list;
mod seed;
mod serve;
mod stream;
mod validate;

pub use cache::run_cache;
pub use lifecycle::{run_restart, run_start, run_stop};
pub use list::run_list;
pub use seed::run_seed;
pub use serve::run_serve;
pub use stream::{run_logs, run_stats, stats_interval};
pub use validate::run_validate;
