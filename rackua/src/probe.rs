use mlua::{Function, Value};

use crate::vm::Vm;

/// Canonical guest truthiness: everything except nil and false.
///
/// All boolean-like answers coming back from guest code go through this one
/// conversion; guest truthiness does not line up with "is the value `true`",
/// and comparing guest booleans any other way is a trap.
pub(crate) fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Nil | Value::Boolean(false))
}

/// Duck-typed member lookup. Goes through the guest so `__index` chains on
/// tables, userdata and strings all behave, and runs under `pcall` so a
/// raising metamethod reads as "no such member" instead of an error.
pub(crate) fn member(vm: &Vm, value: &Value, name: &str) -> Option<Value> {
    if value.is_nil() {
        return None;
    }
    let lookup: Function = vm.prelude().get("member").ok()?;
    match lookup.call::<Value>((value.clone(), name)) {
        Ok(Value::Nil) | Err(_) => None,
        Ok(found) => Some(found),
    }
}

/// Does the guest value's dynamic shape include the named capability?
///
/// Nil never does, and the check must not enter the VM for it. A value that
/// implements its own `respond_to` gets the final say; its answer is
/// canonicalized through [`truthy`], since guest code is free to return
/// anything boolean-like.
pub(crate) fn responds_to(vm: &Vm, value: &Value, name: &str) -> bool {
    if value.is_nil() {
        return false;
    }

    if let Some(Value::Function(custom)) = member(vm, value, "respond_to") {
        return custom
            .call::<Value>((value.clone(), name))
            .map(|answer| truthy(&answer))
            .unwrap_or(false);
    }

    member(vm, value, name).is_some_and(|found| truthy(&found))
}
