use mlua::{Table, Value};
use tracing::debug;

use crate::body;
use crate::error::ProtocolError;
use crate::types::{KeyValue, Response};
use crate::vm::Vm;

/// Number of elements in a well-formed application response.
const RESPONSE_ARITY: usize = 3;

/// Validate and unpack the guest's `{ status, headers, body }` response.
///
/// The returned [`Response`] retains the root guest value, keeping every
/// substructure the decoded fields came from alive until the caller
/// releases it.
pub(crate) fn decode(vm: &Vm, value: Value) -> Result<Response, ProtocolError> {
    let tuple = match &value {
        Value::Table(tuple) => tuple.clone(),
        other => {
            return Err(ProtocolError::MalformedResponse(format!(
                "expected a {RESPONSE_ARITY}-element sequence, got {}",
                other.type_name()
            )))
        }
    };

    if tuple.raw_len() != RESPONSE_ARITY {
        return Err(ProtocolError::MalformedResponse(format!(
            "expected {RESPONSE_ARITY} elements, got {}",
            tuple.raw_len()
        )));
    }

    let raw_status: Value = element(&tuple, 1)?;
    let status = vm
        .coerce_status(raw_status.clone())
        .ok_or_else(|| ProtocolError::NonNumericStatus(format!("{raw_status:?}")))?;

    let mapping = match element(&tuple, 2)? {
        Value::Table(mapping) => mapping,
        other => {
            return Err(ProtocolError::MalformedResponse(format!(
                "headers must be a mapping, got {}",
                other.type_name()
            )))
        }
    };

    // Iteration order is the mapping's own; only the count is authoritative.
    let mut headers = Vec::new();
    for entry in mapping.pairs::<Value, Value>() {
        let (key, val) = entry.map_err(|err| {
            ProtocolError::MalformedResponse(format!("header mapping is unreadable: {err}"))
        })?;
        let key = vm
            .stringify(key)
            .ok_or_else(|| ProtocolError::UnstringifiableHeader("key".into()))?;
        let value = vm
            .stringify(val)
            .ok_or_else(|| ProtocolError::UnstringifiableHeader(format!("value for {key:?}")))?;
        headers.push(KeyValue::new(key, value));
    }

    let resolved = body::resolve(vm, element(&tuple, 3)?)?;

    debug!(
        status,
        header_count = headers.len(),
        "decoded application response"
    );

    Ok(Response {
        status,
        headers,
        body: resolved,
        retained: value,
    })
}

fn element(tuple: &Table, index: i64) -> Result<Value, ProtocolError> {
    tuple.raw_get(index).map_err(|err| {
        ProtocolError::MalformedResponse(format!("response sequence is unreadable: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::config::VmConfig;
    use crate::types::ResponseBody;

    fn vm() -> Vm {
        Vm::start(&VmConfig::default())
    }

    fn guest(vm: &Vm, code: &str) -> Value {
        vm.eval(code).expect("fixture must evaluate")
    }

    #[test]
    fn well_formed_responses_decode() {
        let vm = vm();
        let value = guest(
            &vm,
            r#"{
                 200,
                 { ['Content-Type'] = 'text/html', ['X-Frame'] = 'deny' },
                 { to_array = function(self) return { '<p>hi</p>' } end },
               }"#,
        );

        let response = decode(&vm, value).unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers().len(), 2);
        assert_eq!(response.header("Content-Type"), Some("text/html"));
        assert_eq!(response.header("X-Frame"), Some("deny"));
        assert_eq!(
            response.body(),
            &ResponseBody::Inline(Bytes::from_static(b"<p>hi</p>"))
        );
        assert!(matches!(response.raw(), Value::Table(_)));
    }

    #[test]
    fn status_goes_through_guest_coercion() {
        let vm = vm();
        let value = guest(&vm, "{ '201', {}, false }");
        assert_eq!(decode(&vm, value).unwrap().status(), 201);

        let value = guest(&vm, "{ 200.0, {}, false }");
        assert_eq!(decode(&vm, value).unwrap().status(), 200);
    }

    #[test]
    fn non_numeric_status_is_rejected() {
        let vm = vm();
        let value = guest(&vm, "{ 'created', {}, false }");
        match decode(&vm, value) {
            Err(ProtocolError::NonNumericStatus(_)) => {}
            other => panic!("expected NonNumericStatus, got {other:?}"),
        }
    }

    #[test]
    fn short_sequences_are_malformed() {
        let vm = vm();
        let value = guest(&vm, "{ 200, {} }");
        match decode(&vm, value) {
            Err(ProtocolError::MalformedResponse(_)) => {}
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
    }

    #[test]
    fn non_sequence_responses_are_malformed() {
        let vm = vm();
        for fixture in ["42", "'three-part string'", "true"] {
            let value = guest(&vm, fixture);
            match decode(&vm, value) {
                Err(ProtocolError::MalformedResponse(_)) => {}
                other => panic!("expected MalformedResponse for {fixture}, got {other:?}"),
            }
        }
    }

    #[test]
    fn non_mapping_headers_are_malformed() {
        let vm = vm();
        let value = guest(&vm, "{ 200, 'not a mapping', false }");
        match decode(&vm, value) {
            Err(ProtocolError::MalformedResponse(detail)) => assert!(detail.contains("mapping")),
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
    }

    #[test]
    fn symbolish_headers_stringify() {
        let vm = vm();
        // Numeric keys and values are string-like under guest coercion.
        let value = guest(&vm, "{ 200, { [1] = 204.5 }, false }");
        let response = decode(&vm, value).unwrap();
        assert_eq!(response.headers().len(), 1);
        assert_eq!(response.header("1"), Some("204.5"));
    }

    #[test]
    fn unstringifiable_header_values_are_rejected() {
        let vm = vm();
        let value = guest(&vm, "{ 200, { ['X-Bad'] = true }, false }");
        match decode(&vm, value) {
            Err(ProtocolError::UnstringifiableHeader(detail)) => {
                assert!(detail.contains("X-Bad"))
            }
            other => panic!("expected UnstringifiableHeader, got {other:?}"),
        }
    }

    #[test]
    fn header_count_matches_the_mapping() {
        let vm = vm();
        let value = guest(
            &vm,
            r#"{
                 204,
                 { a = '1', b = '2', c = '3', d = '4', e = '5' },
                 false,
               }"#,
        );
        let response = decode(&vm, value).unwrap();
        assert_eq!(response.headers().len(), 5);
    }

    #[test]
    fn body_with_neither_capability_decodes_empty() {
        let vm = vm();
        let value = guest(&vm, "{ 204, {}, false }");
        let response = decode(&vm, value).unwrap();
        assert_eq!(response.body(), &ResponseBody::empty());
        assert!(!response.is_file());
    }
}
