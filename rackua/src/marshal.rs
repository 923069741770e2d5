use mlua::{Function, Table, Value};

use crate::error::Raised;
use crate::types::RequestEnvironment;
use crate::vm::Vm;

/// Reserved environment key: the input-stream adapter wrapping the raw
/// request body. The sole entry the marshaller adds beyond the
/// caller-supplied pairs.
pub const INPUT_KEY: &str = "rackua.input";

/// Build the guest environment table from the native pairs and wrap the raw
/// body under [`INPUT_KEY`]. Duplicate keys follow guest mapping semantics:
/// last write wins.
pub(crate) fn build_environment(vm: &Vm, request: &RequestEnvironment) -> Result<Table, Raised> {
    let env = vm.enter(|| {
        let env = vm.lua().create_table()?;
        for kv in request.pairs() {
            env.set(kv.key.as_str(), kv.value.as_str())?;
        }
        Ok(env)
    })?;

    let input = wrap_body(vm, request.raw_body())?;
    vm.enter(|| env.set(INPUT_KEY, input))?;

    Ok(env)
}

/// Wrap the raw byte body in the guest's buffered stream, then in the
/// input-stream adapter the calling convention hands to applications.
pub(crate) fn wrap_body(vm: &Vm, body: &[u8]) -> Result<Value, Raised> {
    vm.enter(|| {
        let data = vm.lua().create_string(body)?;
        let into_input: Function = vm.prelude().get("input")?;
        into_input.call::<Value>(data)
    })
}
