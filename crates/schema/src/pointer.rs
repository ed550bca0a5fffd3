//! SchemaPointer: either a locally-held schema document or a link to a
//! foreign one (spec.md §3, §4.E).

use serde::{Deserialize, Serialize};

use crate::error::SchemaResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SchemaBody {
    /// A schema document owned by this index.
    Local(serde_json::Value),
    /// A link delegating schema resolution to another index's document.
    Foreign(String),
}

/// A cached entry: a schema body plus whether it has been durably
/// persisted to the owning `IndexBackend`'s `_schema` metadata key.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaPointer {
    pub body: SchemaBody,
    pub persisted: bool,
}

impl SchemaPointer {
    pub fn local(value: serde_json::Value, persisted: bool) -> Self {
        SchemaPointer {
            body: SchemaBody::Local(value),
            persisted,
        }
    }

    pub fn foreign(uri: impl Into<String>, persisted: bool) -> Self {
        SchemaPointer {
            body: SchemaBody::Foreign(uri.into()),
            persisted,
        }
    }

    pub fn foreign_uri(&self) -> Option<&str> {
        match &self.body {
            SchemaBody::Foreign(uri) => Some(uri),
            SchemaBody::Local(_) => None,
        }
    }

    pub fn serialise(&self) -> SchemaResult<Vec<u8>> {
        Ok(rmp_serde::to_vec(&self.body).map_err(|e| crate::error::SchemaError::Other(e.to_string()))?)
    }

    pub fn deserialise(bytes: &[u8]) -> SchemaResult<SchemaBody> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// The minimal bootstrap schema used to break the chicken-and-egg of
/// resolving `.xapiand/index`'s own schema (spec.md §4.E escape hatch).
pub fn bootstrap_schema() -> serde_json::Value {
    serde_json::json!({ "_bootstrap": true })
}

/// Default schema installed for a fresh local index.
pub fn default_schema() -> serde_json::Value {
    serde_json::json!({})
}

/// Infer each top-level field's primitive type name from a JSON document
/// body (spec.md S1: "metadata `_schema` contains a schema with a field
/// `a:integer`"). Non-object or non-JSON bodies contribute no fields.
pub fn infer_field_types(doc: &[u8]) -> Vec<(String, &'static str)> {
    let value: serde_json::Value = match serde_json::from_slice(doc) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    match value.as_object() {
        Some(object) => object.iter().map(|(k, v)| (k.clone(), json_type_name(v))).collect(),
        None => Vec::new(),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        serde_json::Value::Number(_) => "float",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Merge newly-observed `(field, type)` pairs into a local schema body's
/// `fields` map, under the `SchemasLRU::set` CAS dance (spec.md §4.E).
/// Returns `None` when every observed field is already present, meaning
/// there is nothing to CAS in. Foreign links never gain inferred fields
/// directly; the merge targets the resolved local body.
pub fn merge_fields(body: &SchemaBody, observed: &[(String, &'static str)]) -> Option<SchemaBody> {
    let SchemaBody::Local(value) = body else { return None };
    let mut object = value.as_object().cloned().unwrap_or_default();
    let fields = object.entry("fields".to_string()).or_insert_with(|| serde_json::json!({}));
    let fields_obj = fields.as_object_mut().expect("\"fields\" is always inserted as an object");

    let mut changed = false;
    for (name, ty) in observed {
        if !fields_obj.contains_key(name) {
            fields_obj.insert(name.clone(), serde_json::Value::String((*ty).to_string()));
            changed = true;
        }
    }
    changed.then(|| SchemaBody::Local(serde_json::Value::Object(object)))
}

/// Percent-encode a path for use in a synthesized foreign-link URI. Only
/// the characters that would otherwise break the `scheme/path` shape are
/// escaped; this is not a general-purpose URI encoder.
pub fn percent_encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char);
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
