//! Configuration management.

mod settings;
mod xdg;

pub use settings::{ConfigError, Settings, CONFIG_FILE_NAME};
pub use xdg::XdgDirs;
