use std::path::Path;

use mlua::{Function, Table, Value};
use tracing::debug;

use crate::config::VmConfig;
use crate::decode;
use crate::error::{CallError, LoadError, Raised, RenderedError};
use crate::marshal;
use crate::probe;
use crate::types::{RequestEnvironment, Response};
use crate::vm::Vm;

/// Hosts the embedded interpreter and drives the calling convention:
/// marshal the environment, invoke the guest application, decode the
/// response, and keep the pending-error channel clean across entry points.
///
/// Neither `Send` nor `Sync`: exactly one native thread may execute guest
/// code at a time. Multi-threaded embeddings go through
/// [`Worker`](crate::Worker), which owns a bridge on one dedicated thread.
pub struct Bridge {
    vm: Vm,
}

impl Bridge {
    /// Boot the interpreter. Call once per embedding, before anything else;
    /// a failure here means the process cannot proceed.
    pub fn initialize(config: VmConfig) -> Bridge {
        Bridge {
            vm: Vm::start(&config),
        }
    }

    /// Load the guest application's entry file. A failure here is not
    /// recoverable; the embedding should abort startup.
    pub fn load_application(&self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading application");
        self.vm.load_file(path)
    }

    /// Evaluate a guest expression. Escape hatch for embedders, and how
    /// application objects are resolved by name.
    pub fn eval(&self, code: &str) -> Result<Value, RenderedError> {
        self.vm.eval(code).map_err(|_| self.vm.drain())
    }

    /// Read and clear the pending guest error. Returns `None` (and performs
    /// no mutation) when nothing is pending.
    pub fn check_and_clear(&self) -> Option<RenderedError> {
        self.vm.check_and_clear()
    }

    /// Invoke the guest application named by `app_name` with the request
    /// environment as its sole argument, and decode its response.
    pub fn call_application(
        &self,
        app_name: &str,
        request: &RequestEnvironment,
    ) -> Result<Response, CallError> {
        let env = marshal::build_environment(&self.vm, request)
            .map_err(|_| CallError::Marshal(self.vm.drain()))?;

        let app = self.resolve(app_name)?;

        debug!(app_name, pairs = request.pairs().len(), "calling application");

        let value = self
            .invoke(app, env)
            .map_err(|_| CallError::AppRaised(self.vm.drain()))?;

        decode::decode(&self.vm, value).map_err(CallError::from)
    }

    /// Resolve the application by evaluating its name as a guest expression
    /// (a global, or a dotted path into one).
    fn resolve(&self, app_name: &str) -> Result<Value, CallError> {
        let app = self
            .vm
            .eval(app_name)
            .map_err(|_| CallError::AppNotFound(self.vm.drain()))?;

        if !callable(&self.vm, &app) {
            return Err(CallError::AppNotFound(RenderedError {
                message: format!("'{app_name}' did not evaluate to a callable application"),
                backtrace: String::new(),
            }));
        }

        Ok(app)
    }

    /// Call the application through the guest trampoline, so plain
    /// functions and `__call` tables behave identically.
    fn invoke(&self, app: Value, env: Table) -> Result<Value, Raised> {
        self.vm.enter(|| {
            let trampoline: Function = self.vm.prelude().get("invoke")?;
            trampoline.call::<Value>((app, env))
        })
    }

}

/// A guest value is callable when it is a function or carries a `__call`
/// metamethod.
fn callable(vm: &Vm, value: &Value) -> bool {
    match value {
        Value::Function(_) => true,
        Value::Table(_) => {
            let Ok(check) = vm.prelude().get::<Function>("callable") else {
                return false;
            };
            check
                .call::<Value>(value.clone())
                .map(|answer| probe::truthy(&answer))
                .unwrap_or(false)
        }
        _ => false,
    }
}
