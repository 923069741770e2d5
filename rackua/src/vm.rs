use std::cell::Cell;
use std::fs;
use std::path::Path;

use mlua::{Lua, Table, Value};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::config::VmConfig;
use crate::error::{self, LoadError, Raised, RenderedError};

/// Guest-side support module, compiled into the host binary.
const PRELUDE: &str = include_str!("prelude.lua");

static BOOTED: OnceCell<()> = OnceCell::new();

/// The embedded interpreter plus the pending-error channel.
///
/// Neither `Send` nor `Sync`: exactly one native thread may execute guest
/// code, and the type system enforces it. The pending slot is the guest's
/// out-of-band error channel. Any entry point that raises parks a rendered
/// error here, and the next [`check_and_clear`](Vm::check_and_clear) drains
/// it, so a raise can never leak into an unrelated call.
pub(crate) struct Vm {
    lua: Lua,
    prelude: Table,
    pending: Cell<Option<RenderedError>>,
    script_name: String,
}

impl Vm {
    /// Bring up the interpreter: extend the module search path, register the
    /// prelude, record the diagnostic chunk name. Failure here means the
    /// embedding cannot proceed at all.
    pub(crate) fn start(config: &VmConfig) -> Vm {
        if BOOTED.set(()).is_err() {
            warn!("a guest VM is already running in this process; keep guest calls serialized");
        }

        let lua = Lua::new();

        if !config.module_paths.is_empty() {
            let package: Table = lua
                .globals()
                .get("package")
                .expect("interpreter always provides the package table");
            let mut search_path: String = package
                .get("path")
                .expect("package.path is always a string");
            for dir in &config.module_paths {
                search_path.push_str(&format!(";{}/?.lua", dir.display()));
            }
            package
                .set("path", search_path)
                .expect("package.path is writable");
        }

        let prelude: Table = lua
            .load(PRELUDE)
            .set_name("=rackua.prelude")
            .eval()
            .expect("embedded prelude must load");

        // Guest code reaches the support module as require("rackua").
        let loaded: Table = lua
            .load("return package.loaded")
            .eval()
            .expect("package.loaded is always a table");
        loaded
            .set("rackua", prelude.clone())
            .expect("package.loaded is writable");

        let version: String = lua
            .load("return _VERSION")
            .eval()
            .unwrap_or_else(|_| String::from("unknown version"));
        info!("booted {version}");

        Vm {
            lua,
            prelude,
            pending: Cell::new(None),
            script_name: config.script_name.clone(),
        }
    }

    pub(crate) fn lua(&self) -> &Lua {
        &self.lua
    }

    pub(crate) fn prelude(&self) -> &Table {
        &self.prelude
    }

    /// Run a VM operation; a raise is rendered into the pending slot and
    /// surfaced as [`Raised`].
    pub(crate) fn enter<T>(&self, op: impl FnOnce() -> mlua::Result<T>) -> Result<T, Raised> {
        match op() {
            Ok(value) => Ok(value),
            Err(err) => {
                self.pending.set(Some(error::render(&err)));
                Err(Raised)
            }
        }
    }

    /// Read and clear the pending guest error. No mutation when unset.
    pub(crate) fn check_and_clear(&self) -> Option<RenderedError> {
        self.pending.take()
    }

    /// Drain the slot after an entry point reported a raise.
    pub(crate) fn drain(&self) -> RenderedError {
        self.check_and_clear().unwrap_or_else(|| RenderedError {
            message: String::from("unknown guest error"),
            backtrace: String::new(),
        })
    }

    /// Evaluate an expression under the diagnostic chunk name.
    pub(crate) fn eval(&self, code: &str) -> Result<Value, Raised> {
        let name = format!("={}", self.script_name);
        self.enter(|| self.lua.load(code).set_name(name).eval())
    }

    /// Execute the application entry file, the guest analogue of `dofile`.
    pub(crate) fn load_file(&self, path: &Path) -> Result<(), LoadError> {
        let source = fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let name = format!("@{}", path.display());
        self.enter(|| self.lua.load(&source).set_name(name).exec())
            .map_err(|_| LoadError::Guest(self.drain()))
    }

    /// Coerce a guest value to a native string through the interpreter's
    /// string-coercion rules; `None` when the value is not string-like.
    pub(crate) fn stringify(&self, value: Value) -> Option<String> {
        let coerced = self.lua.coerce_string(value).ok().flatten()?;
        Some(String::from_utf8_lossy(&coerced.as_bytes()).into_owned())
    }

    /// Same coercion, keeping the raw bytes (bodies need not be UTF-8).
    pub(crate) fn stringify_bytes(&self, value: Value) -> Option<bytes::Bytes> {
        let coerced = self.lua.coerce_string(value).ok().flatten()?;
        Some(bytes::Bytes::copy_from_slice(&coerced.as_bytes()))
    }

    pub(crate) fn coerce_status(&self, value: Value) -> Option<u16> {
        let numeric = self.lua.coerce_integer(value).ok().flatten()?;
        u16::try_from(numeric).ok()
    }
}
