//! Settings for mission-control.
//!
//! - `types` - the [`Settings`] structure and its derived values
//! - `parser` - discovery and YAML loading
//! - `duration` - "30s"-style durations
//! - `validation` - checks run on every load

mod duration;
mod parser;
mod types;
mod validation;

pub use duration::{parse_duration_string, parse_setting};
pub use parser::{
    find_config_in_dir, load_settings, parse_settings, resolve, LoadedSettings, CONFIG_FILE_NAME,
};
pub use types::{DatabaseSettings, DockerSettings, Settings, StreamingSettings};
