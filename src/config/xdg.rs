//! XDG Base Directory support.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "swarm";

/// XDG directory paths for swarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XdgDirs {
    /// Config directory (~/.config/swarm or XDG_CONFIG_HOME/swarm)
    pub config: PathBuf,
    /// State directory (~/.local/state/swarm or XDG_STATE_HOME/swarm), holds the log file
    pub state: PathBuf,
}

impl XdgDirs {
    /// Get XDG directories, respecting environment variables.
    pub fn new() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::resolve(&home, |var| std::env::var(var).ok())
    }

    /// Resolve against `home`, reading overrides through `var`.
    pub fn resolve<F>(home: &Path, var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = |name: &str, fallback: &str| {
            var(name)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(fallback))
                .join(APP_DIR)
        };

        Self {
            config: base("XDG_CONFIG_HOME", ".config"),
            state: base("XDG_STATE_HOME", ".local/state"),
        }
    }

    /// `config.json` inside the config directory.
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.json")
    }

    /// `swarm.log` inside the state directory.
    pub fn log_file(&self) -> PathBuf {
        self.state.join("swarm.log")
    }
}

impl Default for XdgDirs {
    fn default() -> Self {
        Self::new()
    }
}
