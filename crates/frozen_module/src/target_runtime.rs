//! Queries against the target interpreter
//!
//! The freezer never links against the interpreter it targets. Everything it
//! needs to know (magic number, startup modules, module locations, compiled
//! code for stale sources) comes from short scripts run in a child process,
//! which answer by writing one marshalled value to stdout.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, trace};

use crate::{
    marshal,
    value::{Code, Value},
};

const MAGIC_SCRIPT: &str = "\
import importlib.util, marshal, sys
sys.stdout.buffer.write(marshal.dumps(importlib.util.MAGIC_NUMBER))
";

// Snapshot sys.modules before importing anything the query itself needs.
// __main__ is the query itself and has no spec.
const STARTUP_MODULES_SCRIPT: &str = "\
import sys
names = tuple(sorted(name for name in sys.modules if name != '__main__'))
import marshal
sys.stdout.buffer.write(marshal.dumps(names))
";

const FIND_SPECS_SCRIPT: &str = "\
import importlib.util, marshal, sys
specs = []
for name in sys.argv[1:]:
    try:
        spec = importlib.util.find_spec(name)
    except (ImportError, ValueError):
        spec = None
    if spec is None:
        specs.append((name, None, None, False, ''))
        continue
    origin = spec.origin if spec.has_location else None
    cached = spec.cached if spec.has_location else None
    is_package = spec.submodule_search_locations is not None
    specs.append((name, origin, cached, is_package, spec.parent or ''))
sys.stdout.buffer.write(marshal.dumps(tuple(specs)))
";

const COMPILE_SCRIPT: &str = "\
import marshal, sys
path = sys.argv[1]
with open(path, 'rb') as f:
    source = f.read()
sys.stdout.buffer.write(marshal.dumps(compile(source, path, 'exec', dont_inherit=True)))
";

/// Where the target interpreter finds one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    /// Fully qualified module name
    pub name: String,
    /// Source file, `None` for built-in and frozen modules
    pub origin: Option<PathBuf>,
    /// Cache file the interpreter would use for `origin`
    pub cached: Option<PathBuf>,
    pub is_package: bool,
    /// Enclosing package, empty for top-level modules
    pub parent: String,
}

/// Handle on the interpreter executable being targeted
#[derive(Debug, Clone)]
pub struct TargetRuntime {
    executable: PathBuf,
}

impl TargetRuntime {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Magic number the target writes into its cache files
    pub fn magic_number(&self) -> Result<[u8; 4]> {
        match self.query(MAGIC_SCRIPT, &[])? {
            Value::Bytes(bytes) => <[u8; 4]>::try_from(bytes.as_slice())
                .map_err(|_| anyhow!("magic number has {} bytes, expected 4", bytes.len())),
            other => bail!("magic number query returned {}", other.kind()),
        }
    }

    /// Names of the modules imported by a bare interpreter start
    pub fn startup_modules(&self) -> Result<Vec<String>> {
        let names = expect_tuple(self.query(STARTUP_MODULES_SCRIPT, &[])?, "startup modules")?;
        names
            .into_iter()
            .map(|name| expect_str(name, "module name"))
            .collect()
    }

    /// Locate every module in `names`
    ///
    /// Modules the target cannot find come back without an origin.
    pub fn find_specs(&self, names: &[String]) -> Result<Vec<ModuleSpec>> {
        let args: Vec<&OsStr> = names.iter().map(OsStr::new).collect();
        let records = expect_tuple(self.query(FIND_SPECS_SCRIPT, &args)?, "module specs")?;
        records.into_iter().map(parse_spec).collect()
    }

    /// Compile the source file at `path` with the target's compiler
    pub fn compile_source(&self, path: &Path) -> Result<Code> {
        let payload = self.run(COMPILE_SCRIPT, &[path.as_os_str()])?;
        marshal::loads_code(&payload)
            .with_context(|| format!("Failed to decode compiled code for {}", path.display()))
    }

    fn query(&self, script: &str, args: &[&OsStr]) -> Result<Value> {
        let payload = self.run(script, args)?;
        marshal::loads(&payload).context("Target interpreter returned malformed marshal data")
    }

    fn run(&self, script: &str, args: &[&OsStr]) -> Result<Vec<u8>> {
        trace!(
            "Running query against {} with {} arguments",
            self.executable.display(),
            args.len()
        );
        let output = Command::new(&self.executable)
            .arg("-c")
            .arg(script)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| {
                format!(
                    "Failed to launch target interpreter {}",
                    self.executable.display()
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Target interpreter {} failed ({}): {}",
                self.executable.display(),
                output.status,
                stderr.trim()
            );
        }
        debug!(
            "Target interpreter answered with {} bytes",
            output.stdout.len()
        );
        Ok(output.stdout)
    }
}

fn parse_spec(record: Value) -> Result<ModuleSpec> {
    let fields = expect_tuple(record, "module spec")?;
    let [name, origin, cached, is_package, parent] = <[Value; 5]>::try_from(fields)
        .map_err(|fields| anyhow!("module spec has {} fields, expected 5", fields.len()))?;
    Ok(ModuleSpec {
        name: expect_str(name, "module name")?,
        origin: expect_optional_path(origin, "origin")?,
        cached: expect_optional_path(cached, "cached")?,
        is_package: match is_package {
            Value::Bool(flag) => flag,
            other => bail!("is_package is {}, expected bool", other.kind()),
        },
        parent: expect_str(parent, "parent")?,
    })
}

fn expect_tuple(value: Value, what: &str) -> Result<Vec<Value>> {
    match value {
        Value::Tuple(items) => Ok(items),
        other => bail!("{what} query returned {}, expected tuple", other.kind()),
    }
}

fn expect_str(value: Value, what: &str) -> Result<String> {
    match value {
        Value::Str(text) => Ok(text),
        other => bail!("{what} is {}, expected str", other.kind()),
    }
}

fn expect_optional_path(value: Value, what: &str) -> Result<Option<PathBuf>> {
    match value {
        Value::None => Ok(None),
        other => expect_str(other, what).map(|path| Some(PathBuf::from(path))),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::{fs, os::unix::fs::PermissionsExt};

    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use tempfile::TempDir;

    use super::*;

    /// Stand-in interpreter that ignores its arguments and runs `body`
    fn fake_interpreter(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("python");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut permissions = fs::metadata(&path).unwrap().permissions();
        permissions.set_mode(0o755);
        fs::set_permissions(&path, permissions).unwrap();
        path
    }

    #[test]
    #[serial]
    fn test_magic_number_query() {
        let dir = TempDir::new().unwrap();
        // marshal.dumps(b'B\r\r\n')
        let runtime = TargetRuntime::new(fake_interpreter(
            &dir,
            r"printf 's\004\000\000\000B\r\r\n'",
        ));
        assert_eq!(runtime.magic_number().unwrap(), [0x42, 0x0d, 0x0d, 0x0a]);
    }

    #[test]
    #[serial]
    fn test_startup_modules_query() {
        let dir = TempDir::new().unwrap();
        let runtime = TargetRuntime::new(fake_interpreter(
            &dir,
            r"printf ')\002z\003sysz\002io'",
        ));
        assert_eq!(
            runtime.startup_modules().unwrap(),
            vec!["sys".to_owned(), "io".to_owned()]
        );
    }

    #[test]
    #[serial]
    fn test_find_specs_query() {
        let dir = TempDir::new().unwrap();
        // (('abc', '/lib/abc.py', '/lib/__pycache__/abc.pyc', False, ''),
        //  ('sys', None, None, False, ''))
        let runtime = TargetRuntime::new(fake_interpreter(
            &dir,
            concat!(
                r"printf ')\002)\005z\003abcz\013/lib/abc.py",
                r"z\030/lib/__pycache__/abc.pycFz\000",
                r")\005z\003sysNNFz\000'"
            ),
        ));

        let specs = runtime
            .find_specs(&["abc".to_owned(), "sys".to_owned()])
            .unwrap();
        assert_eq!(
            specs,
            vec![
                ModuleSpec {
                    name: "abc".to_owned(),
                    origin: Some(PathBuf::from("/lib/abc.py")),
                    cached: Some(PathBuf::from("/lib/__pycache__/abc.pyc")),
                    is_package: false,
                    parent: String::new(),
                },
                ModuleSpec {
                    name: "sys".to_owned(),
                    origin: None,
                    cached: None,
                    is_package: false,
                    parent: String::new(),
                },
            ]
        );
    }

    #[test]
    fn test_queries_skip_modules_without_specs() {
        // find_spec raises for __main__ of a -c process
        assert!(STARTUP_MODULES_SCRIPT.contains("if name != '__main__'"));
        assert!(FIND_SPECS_SCRIPT.contains("except (ImportError, ValueError):\n        spec = None"));
    }

    #[test]
    #[serial]
    fn test_failing_interpreter_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let runtime = TargetRuntime::new(fake_interpreter(
            &dir,
            "echo 'SyntaxError: invalid syntax' >&2; exit 1",
        ));
        let error = runtime.compile_source(Path::new("broken.py")).unwrap_err();
        assert!(error.to_string().contains("SyntaxError: invalid syntax"));
    }

    #[test]
    #[serial]
    fn test_malformed_answer_is_an_error() {
        let dir = TempDir::new().unwrap();
        let runtime = TargetRuntime::new(fake_interpreter(&dir, "printf 'N'"));
        let error = runtime.startup_modules().unwrap_err();
        assert!(error.to_string().contains("expected tuple"));
    }

    #[test]
    #[serial]
    fn test_missing_interpreter() {
        let runtime = TargetRuntime::new("/nonexistent/python3.7");
        let error = runtime.magic_number().unwrap_err();
        assert!(error.to_string().contains("Failed to launch target interpreter"));
    }
}
