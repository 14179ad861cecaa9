//! Registry of the modules frozen into one registry unit
//!
//! The ModuleRegistry is the single source of truth for which modules end up
//! in the generated lookup table. It keeps them in discovery order, so the
//! emitted table is stable across runs.

use std::{
    fs,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::{
    config::Config,
    marshal,
    target_runtime::{ModuleSpec, TargetRuntime},
    types::{FxIndexMap, FxIndexSet},
    value::Code,
};

/// Everything the registry template needs about one module
#[derive(Debug, Clone)]
pub struct FrozenModule {
    /// Fully qualified import name (e.g., "encodings.utf_8")
    pub name: String,
    pub code: Code,
    /// Packages get a `__path__` when imported
    pub is_package: bool,
    /// Enclosing package, empty for top-level modules
    pub parent: String,
    /// Source file the code was compiled from
    pub origin: Option<PathBuf>,
    /// Cache file the interpreter would have used
    pub cached: Option<PathBuf>,
}

/// Insertion-ordered set of modules to freeze
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    /// Map from module name to complete module information
    modules: FxIndexMap<String, FrozenModule>,
    /// Map from source path to module name for fast lookups
    path_to_name: FxIndexMap<PathBuf, String>,
}

impl ModuleRegistry {
    /// Create a new empty module registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module to the registry
    ///
    /// Registering the same module twice is a no-op. Registering a name
    /// again with a different origin is a discovery bug and panics.
    pub fn add_module(&mut self, module: FrozenModule) {
        if let Some(existing) = self.modules.get(&module.name) {
            assert!(
                existing.origin == module.origin,
                "Attempting to register module {} from two origins: {:?} and {:?}",
                module.name,
                existing.origin,
                module.origin
            );
            debug!("Module {} already registered", module.name);
            return;
        }

        if let Some(origin) = &module.origin {
            if let Some(other) = self.path_to_name.get(origin) {
                debug!(
                    "Source {} is registered as both {} and {}",
                    origin.display(),
                    other,
                    module.name
                );
            } else {
                self.path_to_name
                    .insert(origin.clone(), module.name.clone());
            }
        }
        self.modules.insert(module.name.clone(), module);
    }

    /// Get module info by name
    pub fn get_by_name(&self, name: &str) -> Option<&FrozenModule> {
        self.modules.get(name)
    }

    /// Get the module name registered for a source path
    pub fn get_name_by_path(&self, path: &Path) -> Option<&str> {
        self.path_to_name.get(path).map(String::as_str)
    }

    /// Iterate over all modules in registration order
    pub fn iter(&self) -> impl Iterator<Item = &FrozenModule> {
        self.modules.values()
    }

    /// Get total number of modules in the registry
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Get all module names
    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}

/// Name the interpreter gives the script it runs; never importable
const MAIN_MODULE: &str = "__main__";

/// Names to freeze: startup modules, then extras, minus exclusions
///
/// Excluding a package excludes its submodules too. Order is preserved and
/// duplicates are dropped. `__main__` is always left out.
pub fn select_module_names(
    startup: &[String],
    extras: &[String],
    excludes: &[String],
) -> Vec<String> {
    let is_excluded = |name: &str| {
        name == MAIN_MODULE
            || excludes.iter().any(|excluded| {
                name == excluded
                    || name
                        .strip_prefix(excluded.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            })
    };

    let selected: FxIndexSet<&String> = startup
        .iter()
        .chain(extras)
        .filter(|name| !is_excluded(name))
        .collect();
    selected.into_iter().cloned().collect()
}

/// Build the registry for the modules the target loads at startup
pub fn discover_modules(
    runtime: &TargetRuntime,
    config: &Config,
    extra_modules: &[String],
) -> Result<ModuleRegistry> {
    let magic = runtime.magic_number()?;
    let startup = runtime
        .startup_modules()
        .context("Failed to list the target's startup modules")?;

    let extras: Vec<String> = config
        .extra_modules
        .iter()
        .chain(extra_modules)
        .cloned()
        .collect();
    let names = select_module_names(&startup, &extras, &config.exclude_modules);
    debug!(
        "Selected {} of {} startup modules plus {} extras",
        names.len(),
        startup.len(),
        extras.len()
    );

    let specs = runtime
        .find_specs(&names)
        .context("Failed to locate modules in the target interpreter")?;

    let mut registry = ModuleRegistry::new();
    for spec in specs {
        let requested = extras.contains(&spec.name);
        // Aliases such as `os.path` share their source with another module
        let alias_of = spec
            .origin
            .as_deref()
            .and_then(|origin| registry.get_name_by_path(origin))
            .and_then(|name| registry.get_by_name(name));
        let code = match alias_of {
            Some(module) => {
                debug!("Module {} shares its source with {}", spec.name, module.name);
                Some(module.code.clone())
            }
            None => load_module_code(runtime, &spec, &magic)?,
        };
        let Some(code) = code else {
            if requested {
                warn!(
                    "Module {} has no Python code to freeze, skipping",
                    spec.name
                );
            } else {
                debug!("Skipping built-in or extension module {}", spec.name);
            }
            continue;
        };
        registry.add_module(FrozenModule {
            name: spec.name,
            code,
            is_package: spec.is_package,
            parent: spec.parent,
            origin: spec.origin,
            cached: spec.cached,
        });
    }

    info!("Discovered {} modules to freeze", registry.len());
    debug!(
        "Modules to freeze: {}",
        registry.module_names().collect::<Vec<_>>().join(", ")
    );
    Ok(registry)
}

/// Code for one module, `None` when it has no Python code
///
/// A fresh cache file is decoded directly; otherwise the source is compiled
/// by the target.
fn load_module_code(
    runtime: &TargetRuntime,
    spec: &ModuleSpec,
    magic: &[u8; 4],
) -> Result<Option<Code>> {
    let Some(origin) = &spec.origin else {
        return Ok(None);
    };
    match origin.extension().and_then(|ext| ext.to_str()) {
        Some("py") => {}
        Some("pyc") => {
            let data = fs::read(origin)
                .with_context(|| format!("Failed to read {}", origin.display()))?;
            return marshal::load_pyc(&data, Some(magic))
                .with_context(|| format!("Failed to load {}", origin.display()))
                .map(Some);
        }
        _ => return Ok(None),
    }

    if let Some(cached) = &spec.cached
        && let Some(data) = read_fresh_cache(origin, cached)?
    {
        debug!("Using cache file {} for {}", cached.display(), spec.name);
        return marshal::load_pyc(&data, Some(magic))
            .with_context(|| format!("Failed to load {}", cached.display()))
            .map(Some);
    }

    debug!("Compiling {} for {}", origin.display(), spec.name);
    runtime.compile_source(origin).map(Some)
}

/// Contents of `cached` if it exists and was written for the current `source`
fn read_fresh_cache(source: &Path, cached: &Path) -> Result<Option<Vec<u8>>> {
    let Ok(data) = fs::read(cached) else {
        return Ok(None);
    };
    let metadata = fs::metadata(source)
        .with_context(|| format!("Failed to stat {}", source.display()))?;
    // The header stores both fields truncated to 32 bits
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |elapsed| elapsed.as_secs() as u32);
    let size = metadata.len() as u32;
    Ok(marshal::pyc_matches_source(&data, mtime, size).then_some(data))
}
