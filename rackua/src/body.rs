use mlua::Value;
use tracing::debug;

use crate::error::ProtocolError;
use crate::probe;
use crate::types::ResponseBody;
use crate::vm::Vm;

/// Capability names recognized on response body objects.
const SEQUENCE_CAPABILITY: &str = "to_array";
const PATH_CAPABILITY: &str = "path";

/// Resolve the duck-typed body object into a native body.
///
/// Capabilities are checked in fixed priority order and the first match
/// wins: a buffered sequence beats a path. A value with neither capability
/// is a legal empty body, not an error; applications may return body shapes
/// the bridge does not understand.
pub(crate) fn resolve(vm: &Vm, value: Value) -> Result<ResponseBody, ProtocolError> {
    if probe::responds_to(vm, &value, SEQUENCE_CAPABILITY) {
        return first_chunk(vm, &value);
    }

    if probe::responds_to(vm, &value, PATH_CAPABILITY) {
        return file_path(vm, &value);
    }

    debug!("response body exposes no recognized capability, degrading to empty");
    Ok(ResponseBody::empty())
}

fn first_chunk(vm: &Vm, value: &Value) -> Result<ResponseBody, ProtocolError> {
    let sequence = match call_capability(vm, value, SEQUENCE_CAPABILITY)? {
        Value::Table(sequence) => sequence,
        other => {
            return Err(ProtocolError::MalformedResponse(format!(
                "{SEQUENCE_CAPABILITY} returned {} instead of a sequence",
                other.type_name()
            )))
        }
    };

    let chunk: Value = sequence.raw_get(1).map_err(|err| {
        ProtocolError::MalformedResponse(format!("sequence body is unreadable: {err}"))
    })?;

    // An absent first chunk is an empty body, not an error.
    if chunk.is_nil() {
        return Ok(ResponseBody::empty());
    }

    match vm.stringify_bytes(chunk) {
        Some(bytes) => Ok(ResponseBody::Inline(bytes)),
        None => Err(ProtocolError::MalformedResponse(
            "body chunk is not stringifiable".into(),
        )),
    }
}

fn file_path(vm: &Vm, value: &Value) -> Result<ResponseBody, ProtocolError> {
    let path = call_capability(vm, value, PATH_CAPABILITY)?;
    match vm.stringify(path) {
        Some(path) => Ok(ResponseBody::File(path.into())),
        None => Err(ProtocolError::MalformedResponse(
            "path body did not return a path string".into(),
        )),
    }
}

/// Invoke a capability method on the body object. A raise here is a protocol
/// violation scoped to this request; the slot is drained so it cannot leak
/// into the next call.
fn call_capability(vm: &Vm, value: &Value, name: &str) -> Result<Value, ProtocolError> {
    let method = match probe::member(vm, value, name) {
        Some(Value::Function(method)) => method,
        Some(other) => {
            return Err(ProtocolError::MalformedResponse(format!(
                "{name} is a {} and cannot be called",
                other.type_name()
            )))
        }
        None => {
            return Err(ProtocolError::MalformedResponse(format!(
                "{name} capability is not callable"
            )))
        }
    };

    vm.enter(|| method.call::<Value>(value.clone()))
        .map_err(|_| ProtocolError::MalformedResponse(vm.drain().message))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::config::VmConfig;

    fn vm() -> Vm {
        Vm::start(&VmConfig::default())
    }

    fn guest(vm: &Vm, code: &str) -> Value {
        vm.eval(code).expect("fixture must evaluate")
    }

    #[test]
    fn sequence_bodies_yield_the_first_chunk() {
        let vm = vm();
        let body = guest(
            &vm,
            "{ to_array = function(self) return { 'hello', 'ignored' } end }",
        );
        let resolved = resolve(&vm, body).unwrap();
        assert_eq!(resolved, ResponseBody::Inline(Bytes::from_static(b"hello")));
        assert!(!resolved.is_file());
    }

    #[test]
    fn path_bodies_yield_a_file() {
        let vm = vm();
        let body = guest(&vm, "{ path = function(self) return '/tmp/x' end }");
        let resolved = resolve(&vm, body).unwrap();
        assert_eq!(resolved, ResponseBody::File("/tmp/x".into()));
        assert!(resolved.is_file());
    }

    #[test]
    fn sequence_wins_over_path() {
        let vm = vm();
        let body = guest(
            &vm,
            r#"{
                 to_array = function(self) return { 'inline' } end,
                 path = function(self) return '/tmp/never' end,
               }"#,
        );
        let resolved = resolve(&vm, body).unwrap();
        assert_eq!(resolved, ResponseBody::Inline(Bytes::from_static(b"inline")));
    }

    #[test]
    fn unrecognized_bodies_degrade_to_empty() {
        let vm = vm();
        for fixture in ["false", "{}", "'a bare string'", "3.14"] {
            let body = guest(&vm, fixture);
            assert_eq!(resolve(&vm, body).unwrap(), ResponseBody::empty());
        }
        assert_eq!(resolve(&vm, Value::Nil).unwrap(), ResponseBody::empty());
    }

    #[test]
    fn empty_sequences_are_empty_bodies() {
        let vm = vm();
        let body = guest(&vm, "{ to_array = function(self) return {} end }");
        assert_eq!(resolve(&vm, body).unwrap(), ResponseBody::empty());
    }

    #[test]
    fn numeric_chunks_coerce_to_text() {
        let vm = vm();
        let body = guest(&vm, "{ to_array = function(self) return { 42 } end }");
        assert_eq!(
            resolve(&vm, body).unwrap(),
            ResponseBody::Inline(Bytes::from_static(b"42"))
        );
    }

    #[test]
    fn unstringifiable_chunks_are_malformed() {
        let vm = vm();
        let body = guest(&vm, "{ to_array = function(self) return { {} } end }");
        match resolve(&vm, body) {
            Err(ProtocolError::MalformedResponse(_)) => {}
            other => panic!("expected a protocol error, got {other:?}"),
        }
    }

    #[test]
    fn raising_capabilities_are_malformed_and_leave_the_slot_clean() {
        let vm = vm();
        let body = guest(&vm, "{ to_array = function(self) error('broken body') end }");
        match resolve(&vm, body) {
            Err(ProtocolError::MalformedResponse(detail)) => {
                assert!(detail.contains("broken body"))
            }
            other => panic!("expected a protocol error, got {other:?}"),
        }
        assert!(vm.check_and_clear().is_none());
    }

    #[test]
    fn non_sequence_to_array_results_are_malformed() {
        let vm = vm();
        let body = guest(&vm, "{ to_array = function(self) return 'nope' end }");
        match resolve(&vm, body) {
            Err(ProtocolError::MalformedResponse(detail)) => assert!(detail.contains("to_array")),
            other => panic!("expected a protocol error, got {other:?}"),
        }
    }
}
