//! End-to-end freeze operations
//!
//! Each operation renders its whole translation unit in memory and only then
//! replaces the destination, so a failed freeze never leaves partial output
//! behind.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{debug, info};
use tempfile::NamedTempFile;

use crate::{
    code_generator::{RegistryEntry, render_registry, render_script},
    config::Config,
    marshal,
    module_registry::{self, ModuleRegistry},
    serializer::Serializer,
    target_runtime::TargetRuntime,
    value::{Code, Value},
};

/// Freeze one script into a standalone program
///
/// A `.pyc` input is decoded directly; anything else is compiled by the
/// configured target interpreter.
pub fn freeze_script(input: &Path, output: &Path, config: &Config) -> Result<()> {
    let code = load_script(input, config)?;
    let source_name = input.display().to_string();
    let unit = render_script_unit(code, &source_name, config)
        .with_context(|| format!("Failed to freeze {}", input.display()))?;
    write_atomically(output, &unit)?;
    info!("Froze {} into {}", input.display(), output.display());
    Ok(())
}

/// Freeze the target interpreter's startup modules into a registry
pub fn freeze_modules(output: &Path, config: &Config, extra_modules: &[String]) -> Result<()> {
    let runtime = TargetRuntime::new(&config.python);
    let registry = module_registry::discover_modules(&runtime, config, extra_modules)?;
    let unit = render_registry_unit(&registry, config)?;
    write_atomically(output, &unit)?;
    info!(
        "Froze {} modules from {} into {}",
        registry.len(),
        runtime.executable().display(),
        output.display()
    );
    Ok(())
}

/// Translation unit running `code` as `__main__`
pub fn render_script_unit(code: Code, source_name: &str, config: &Config) -> Result<String> {
    let mut serializer = Serializer::new(config.abi.singleton_hashes());
    let root = serializer.root_ref(&Value::Code(Box::new(code)))?;
    let unit = serializer.finish();
    debug!(
        "Script unit holds {} declarations",
        unit.declarations.len()
    );
    Ok(render_script(&unit, &root, source_name))
}

/// Translation unit exposing every module in `registry`
///
/// All modules share one serializer, so a constant used by several modules
/// is emitted once.
pub fn render_registry_unit(registry: &ModuleRegistry, config: &Config) -> Result<String> {
    let mut serializer = Serializer::new(config.abi.singleton_hashes());
    let mut entries: Vec<RegistryEntry> = Vec::with_capacity(registry.len());
    for module in registry.iter() {
        // Modules sharing a source file point at one code object
        let shared = module
            .origin
            .as_deref()
            .and_then(|origin| registry.get_name_by_path(origin))
            .filter(|&owner| owner != module.name)
            .and_then(|owner| entries.iter().find(|entry| entry.name == owner));
        let code_ref = match shared {
            Some(entry) => entry.code_ref.clone(),
            None => serializer
                .root_ref(&Value::Code(Box::new(module.code.clone())))
                .with_context(|| format!("Failed to freeze module {}", module.name))?,
        };
        entries.push(RegistryEntry {
            name: module.name.clone(),
            code_ref,
            needs_path: module.is_package,
            parent: module.parent.clone(),
            origin: RegistryEntry::path_text(module.origin.as_deref()),
            cached: RegistryEntry::path_text(module.cached.as_deref()),
        });
    }
    let unit = serializer.finish();
    debug!(
        "Registry unit holds {} declarations for {} modules",
        unit.declarations.len(),
        entries.len()
    );
    Ok(render_registry(&unit, &entries, &config.registry))
}

fn load_script(input: &Path, config: &Config) -> Result<Code> {
    if input.extension().is_some_and(|ext| ext == "pyc") {
        let data =
            fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
        return marshal::load_pyc(&data, Some(&marshal::PY37_MAGIC))
            .with_context(|| format!("Failed to load {}", input.display()));
    }
    TargetRuntime::new(&config.python).compile_source(input)
}

/// Replace `path` with `contents` in a single rename
fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut file = NamedTempFile::new_in(&dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    file.persist(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!("Wrote {} bytes to {}", contents.len(), path.display());
    Ok(())
}
