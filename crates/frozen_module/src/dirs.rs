//! Platform directories used by the freezer

use std::path::PathBuf;

use etcetera::{BaseStrategy, choose_base_strategy};

/// Name of the configuration file, both per user and per project
pub const CONFIG_FILE_NAME: &str = "frozen_module.toml";

/// Directory holding the per-user configuration
///
/// Follows the XDG convention (`$XDG_CONFIG_HOME/frozen_module`, falling back
/// to `~/.config/frozen_module`) on Unix and the roaming app data folder on
/// Windows. `None` when no home directory can be determined.
pub fn user_config_dir() -> Option<PathBuf> {
    choose_base_strategy()
        .ok()
        .map(|strategy| strategy.config_dir().join("frozen_module"))
}

/// Path of the per-user configuration file, whether or not it exists
pub fn user_config_file() -> Option<PathBuf> {
    user_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}
