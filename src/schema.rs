//! Minimal configuration/info/stats schema representation.
//!
//! This is deliberately *not* a general JSON-Schema compiler — that lives
//! outside this crate's scope. What lives here is just enough field-typing to parse a
//! device-class config blob, diff two config blobs for change detection
//! (`reload` on a plain device or a bridge), and project an RPC reply's
//! fields into a caller-supplied output blob for `dump_info`/`dump_stats`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One field declared by a class's config/info/stats schema.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub kind: FieldKind,
}

/// Field shapes recognised by the reference schema implementation.
///
/// Covers exactly the field kinds a bridge's `empty:bool`/
/// `ifname:array-of-string` config needs, plus the scalar kinds a
/// `dump_stats` reply typically carries.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Bool,
    String,
    I64,
    U64,
    ArrayOfString,
    Table,
}

/// Errors raised while loading or applying a schema.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum SchemaError {
    #[error("class metadata record is not a JSON object")]
    NotAnObject,
    #[error("class metadata is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("bridge-capable class is missing `member_prefix`")]
    MissingMemberPrefix,
    #[error("field `{field}` declared kind `{kind:?}` but the value did not match")]
    TypeMismatch { field: String, kind: FieldKind },
}

/// A class's declared schema for one of config/info/stats.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<SchemaField>,
}

impl Schema {
    pub fn from_fields(fields: Vec<SchemaField>) -> Self {
        Self { fields }
    }

    /// Validates `value`'s declared fields against their kinds.
    ///
    /// Unknown fields in `value` are ignored (forward-compatibility with a
    /// handler that returns extra fields); a declared field that is present
    /// but mistyped is a [`SchemaError::TypeMismatch`].
    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        let Value::Object(map) = value else {
            return Err(SchemaError::NotAnObject);
        };
        for field in &self.fields {
            let Some(found) = map.get(&field.name) else {
                continue;
            };
            if !kind_matches(field.kind, found) {
                return Err(SchemaError::TypeMismatch {
                    field: field.name.clone(),
                    kind: field.kind,
                });
            }
        }
        Ok(())
    }

    /// Projects `reply`'s fields into `out`, preserving nested
    /// arrays/tables, as required for `dump_info`/`dump_stats`.
    pub fn project_into(&self, reply: &Value, out: &mut serde_json::Map<String, Value>) {
        let Value::Object(map) = reply else {
            return;
        };
        for field in &self.fields {
            if let Some(found) = map.get(&field.name) {
                out.insert(field.name.clone(), found.clone());
            }
        }
    }
}

fn kind_matches(kind: FieldKind, value: &Value) -> bool {
    match kind {
        FieldKind::Bool => value.is_boolean(),
        FieldKind::String => value.is_string(),
        FieldKind::I64 => value.is_i64() || value.is_u64(),
        FieldKind::U64 => value.is_u64(),
        FieldKind::ArrayOfString => {
            value.is_array() && value.as_array().unwrap().iter().all(Value::is_string)
        }
        FieldKind::Table => value.is_object() || value.is_array(),
    }
}

/// An owned configuration blob, copied before being stored on a shadow.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConfigBlob(pub Value);

impl ConfigBlob {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn empty_object() -> Self {
        Self(Value::Object(serde_json::Map::new()))
    }

    /// Reads the `ifname` array field, if present, as owned strings.
    pub fn ifnames(&self) -> Vec<String> {
        self.0
            .get("ifname")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Reads the `empty` bool field, defaulting to `false`.
    pub fn is_empty_bridge(&self) -> bool {
        self.0
            .get("empty")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl PartialEq<Value> for ConfigBlob {
    fn eq(&self, other: &Value) -> bool {
        &self.0 == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(FieldKind::Bool, json!(true), true)]
    #[case(FieldKind::Bool, json!("true"), false)]
    #[case(FieldKind::String, json!("eth0"), true)]
    #[case(FieldKind::String, json!(1), false)]
    #[case(FieldKind::I64, json!(-1), true)]
    #[case(FieldKind::U64, json!(5), true)]
    #[case(FieldKind::U64, json!(-1), false)]
    #[case(FieldKind::ArrayOfString, json!(["eth0", "eth1"]), true)]
    #[case(FieldKind::ArrayOfString, json!([1, 2]), false)]
    #[case(FieldKind::Table, json!({"a": 1}), true)]
    #[case(FieldKind::Table, json!(1), false)]
    fn kind_matches_recognizes_every_declared_field_kind(
        #[case] kind: FieldKind,
        #[case] value: Value,
        #[case] expected: bool,
    ) {
        assert_eq!(kind_matches(kind, &value), expected);
    }

    #[test]
    fn validate_accepts_matching_fields_and_ignores_extras() {
        let schema = Schema::from_fields(vec![SchemaField {
            name: "empty".into(),
            kind: FieldKind::Bool,
        }]);
        let value = json!({"empty": true, "extra": 1});
        assert!(schema.validate(&value).is_ok());
    }

    #[test]
    fn validate_rejects_type_mismatch() {
        let schema = Schema::from_fields(vec![SchemaField {
            name: "ifname".into(),
            kind: FieldKind::ArrayOfString,
        }]);
        let value = json!({"ifname": "eth0"});
        assert_eq!(
            schema.validate(&value),
            Err(SchemaError::TypeMismatch {
                field: "ifname".into(),
                kind: FieldKind::ArrayOfString,
            })
        );
    }

    #[test]
    fn config_blob_reads_bridge_fields() {
        let blob = ConfigBlob::new(json!({"ifname": ["eth0", "eth1"], "empty": false}));
        assert_eq!(blob.ifnames(), vec!["eth0".to_string(), "eth1".to_string()]);
        assert!(!blob.is_empty_bridge());
    }
}
