//! Payload sanitization.

use serde_json::Value;

/// Strip NUL bytes from every string value, recursively. Silent: the
/// adapter's backend rejects `\x00` in text columns, nothing else does.
pub fn sanitize_strings(value: &mut Value) {
    match value {
        Value::String(s) => {
            if s.contains('\x00') {
                *s = s.replace('\x00', "");
            }
        }
        Value::Array(items) => {
            for item in items {
                sanitize_strings(item);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                sanitize_strings(v);
            }
        }
        _ => {}
    }
}
