//! Content-addressed task identity
//!
//! A task id is the MD5 digest of the canonical JSON form of its user
//! parameters, encoded as URL-safe base64 without padding. The canonical form
//! sorts object keys at every depth so the id does not depend on insertion
//! order.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use md5::{Digest, Md5};
use serde_json::{Map, Value};

/// Computes the stable identifier of a parameter map
pub fn task_id(params: &Map<String, Value>) -> String {
    let mut canonical = String::new();
    write_object(params, &mut canonical);

    let digest = Md5::digest(canonical.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

fn write_object(map: &Map<String, Value>, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_value(&map[key], out);
    }
    out.push('}');
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
