//! Configuration for the freezer
//!
//! Settings are layered, later sources overriding earlier ones key by key:
//!
//! 1. built-in defaults
//! 2. the user configuration file (see [`crate::dirs::user_config_file`])
//! 3. `frozen_module.toml` in the current directory
//! 4. a file passed with `--config`
//! 5. `FROZEN_MODULE_*` environment variables
//! 6. command line flags, applied by the binary

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use toml::Table;

use crate::{dirs, hashing::SingletonHashes};

/// Environment variable overriding [`Config::python`]
pub const ENV_PYTHON: &str = "FROZEN_MODULE_PYTHON";
/// Environment variable overriding [`Config::extra_modules`], comma separated
pub const ENV_EXTRA_MODULES: &str = "FROZEN_MODULE_EXTRA_MODULES";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Target interpreter executable
    pub python: PathBuf,
    /// Modules frozen in addition to the startup set
    pub extra_modules: Vec<String>,
    /// Modules never frozen, even when imported at startup
    pub exclude_modules: Vec<String>,
    pub abi: AbiConfig,
    pub registry: RegistryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            python: PathBuf::from("python3.7"),
            extra_modules: Vec::new(),
            exclude_modules: Vec::new(),
            abi: AbiConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

/// Facts about the target build the freezer cannot derive itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AbiConfig {
    /// `hash(None)` in the target binary
    pub none_hash: Option<i64>,
    /// `hash(Ellipsis)` in the target binary
    pub ellipsis_hash: Option<i64>,
}

impl AbiConfig {
    pub fn singleton_hashes(&self) -> SingletonHashes {
        SingletonHashes {
            none: self.none_hash,
            ellipsis: self.ellipsis_hash,
        }
    }
}

/// Names of the C functions a module registry exports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    pub init_function: String,
    pub lookup_function: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            init_function: "_PyFrozenModules_Init".to_owned(),
            lookup_function: "_PyFrozenModules_Lookup".to_owned(),
        }
    }
}

impl Config {
    /// Load the full hierarchy for the current process
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let project_dir = std::env::current_dir().context("Failed to get current directory")?;
        Self::load_from(dirs::user_config_file().as_deref(), &project_dir, explicit)
    }

    /// Load the hierarchy from explicit locations
    ///
    /// Missing user or project files are skipped; a missing explicit file is
    /// an error.
    pub fn load_from(
        user_file: Option<&Path>,
        project_dir: &Path,
        explicit: Option<&Path>,
    ) -> Result<Self> {
        let mut merged = Table::new();

        let project_file = project_dir.join(dirs::CONFIG_FILE_NAME);
        for path in user_file.into_iter().chain([project_file.as_path()]) {
            if path.is_file() {
                merge_tables(&mut merged, read_table(path)?);
            }
        }
        if let Some(path) = explicit {
            merge_tables(&mut merged, read_table(path)?);
        }

        let mut config: Self = toml::Value::Table(merged)
            .try_into()
            .context("Invalid frozen_module configuration")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse one configuration file on its own
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid frozen_module configuration")
    }

    fn apply_env_overrides(&mut self) {
        if let Some(python) = std::env::var_os(ENV_PYTHON).filter(|value| !value.is_empty()) {
            debug!("Target interpreter overridden by {ENV_PYTHON}");
            self.python = PathBuf::from(python);
        }
        if let Ok(modules) = std::env::var(ENV_EXTRA_MODULES) {
            debug!("Extra modules overridden by {ENV_EXTRA_MODULES}");
            self.extra_modules = modules
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_owned)
                .collect();
        }
    }
}

fn read_table(path: &Path) -> Result<Table> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let table = toml::from_str(&text)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    debug!("Loaded configuration from {}", path.display());
    Ok(table)
}

/// Merge `overlay` into `base`, descending into nested tables
fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                merge_tables(existing, nested);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use tempfile::TempDir;

    use super::*;

    /// Run `f` with `FROZEN_MODULE_*` variables cleared
    fn without_env<T>(f: impl FnOnce() -> T) -> T {
        let saved: Vec<_> = [ENV_PYTHON, ENV_EXTRA_MODULES]
            .into_iter()
            .map(|name| (name, std::env::var_os(name)))
            .collect();
        // SAFETY: callers are marked #[serial]
        unsafe {
            for (name, _) in &saved {
                std::env::remove_var(name);
            }
        }
        let result = f();
        // SAFETY: as above
        unsafe {
            for (name, value) in saved {
                if let Some(value) = value {
                    std::env::set_var(name, value);
                }
            }
        }
        result
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.python, PathBuf::from("python3.7"));
        assert_eq!(config.registry.init_function, "_PyFrozenModules_Init");
        assert_eq!(config.abi.singleton_hashes(), SingletonHashes::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            exclude_modules = ["site"]

            [abi]
            none_hash = 8795340422
            "#,
        )
        .unwrap();
        assert_eq!(
            config,
            Config {
                exclude_modules: vec!["site".to_owned()],
                abi: AbiConfig {
                    none_hash: Some(8_795_340_422),
                    ellipsis_hash: None,
                },
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let error = Config::from_toml("pyhton = 'python3'").unwrap_err();
        assert!(format!("{error:#}").contains("pyhton"));
    }

    #[test]
    #[serial]
    fn test_layers_override_key_by_key() {
        let temp_dir = TempDir::new().unwrap();
        let user_file = temp_dir.path().join("user.toml");
        fs::write(
            &user_file,
            "python = '/usr/bin/python3.7'\n[registry]\ninit_function = 'user_init'\n",
        )
        .unwrap();
        fs::write(
            temp_dir.path().join(dirs::CONFIG_FILE_NAME),
            "[registry]\nlookup_function = 'project_lookup'\n",
        )
        .unwrap();
        let explicit = temp_dir.path().join("explicit.toml");
        fs::write(&explicit, "extra_modules = ['json']\n").unwrap();

        let config = without_env(|| {
            Config::load_from(Some(&user_file), temp_dir.path(), Some(&explicit)).unwrap()
        });

        assert_eq!(config.python, PathBuf::from("/usr/bin/python3.7"));
        assert_eq!(config.registry.init_function, "user_init");
        assert_eq!(config.registry.lookup_function, "project_lookup");
        assert_eq!(config.extra_modules, vec!["json".to_owned()]);
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.toml");
        let result = without_env(|| Config::load_from(None, temp_dir.path(), Some(&missing)));
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_environment_overrides_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(dirs::CONFIG_FILE_NAME),
            "python = 'python3'\nextra_modules = ['json']\n",
        )
        .unwrap();

        let config = without_env(|| {
            // SAFETY: test is marked #[serial]
            unsafe {
                std::env::set_var(ENV_PYTHON, "/opt/python/bin/python3.7");
                std::env::set_var(ENV_EXTRA_MODULES, "decimal, fractions,,");
            }
            let config = Config::load_from(None, temp_dir.path(), None).unwrap();
            // SAFETY: test is marked #[serial]
            unsafe {
                std::env::remove_var(ENV_PYTHON);
                std::env::remove_var(ENV_EXTRA_MODULES);
            }
            config
        });

        assert_eq!(config.python, PathBuf::from("/opt/python/bin/python3.7"));
        assert_eq!(
            config.extra_modules,
            vec!["decimal".to_owned(), "fractions".to_owned()]
        );
    }
}
