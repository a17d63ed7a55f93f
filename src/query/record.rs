//! Row shape descriptors derived from SQL projections.
//!
//! A [`RecordSchema`] is the ordered list of decoded fields for one query
//! shape: the derived field name, the scan kind, and nullability. The
//! decoder writes each row into a JSON object keyed by the derived names,
//! which makes result decoding work for arbitrary ad-hoc queries.

use std::collections::HashSet;

use serde_json::{Map, Value};
use sqlx::any::AnyRow;
use sqlx::Row as _;

/// Coarse decoding class derived from the driver's reported column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
}

impl ScanKind {
    pub fn from_type_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "BOOLEAN" | "BOOL" => Self::Bool,
            "SMALLINT" | "INTEGER" | "INT" | "BIGINT" => Self::Int,
            "REAL" | "DOUBLE" | "FLOAT" => Self::Float,
            "BLOB" => Self::Bytes,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldSchema {
    /// Derived exported field name, unique within the record.
    pub name: String,
    /// Original column label.
    pub column: String,
    pub kind: ScanKind,
    pub nullable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RecordSchema {
    pub fields: Vec<FieldSchema>,
}

impl RecordSchema {
    /// Build a record schema from detected columns
    /// `(name, type name, nullable)`.
    pub fn from_columns(columns: impl IntoIterator<Item = (String, String, bool)>) -> Self {
        let mut used = HashSet::new();
        let mut fields = Vec::new();
        for (index, (column, type_name, nullable)) in columns.into_iter().enumerate() {
            let label = if column.is_empty() {
                format!("c{index}")
            } else {
                column.clone()
            };
            let mut name = sanitize_identifier(&to_upper_camel(&label));
            while used.contains(&name) {
                name.push('_');
            }
            used.insert(name.clone());
            fields.push(FieldSchema {
                name,
                column,
                kind: ScanKind::from_type_name(&type_name),
                nullable,
            });
        }
        Self { fields }
    }

    /// Decode one row into a JSON object keyed by the derived field names.
    pub fn decode(&self, row: &AnyRow) -> Result<Map<String, Value>, sqlx::Error> {
        let mut object = Map::with_capacity(self.fields.len());
        for (index, field) in self.fields.iter().enumerate() {
            object.insert(field.name.clone(), decode_value(row, index, field.kind));
        }
        Ok(object)
    }
}

/// Decode one column by its scan kind, degrading to a string and finally to
/// bytes when the driver reports a value the primary kind cannot hold.
fn decode_value(row: &AnyRow, index: usize, kind: ScanKind) -> Value {
    match kind {
        ScanKind::Bool => {
            if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
                return v.map(Value::Bool).unwrap_or(Value::Null);
            }
        }
        ScanKind::Int => {
            if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
                return v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null);
            }
        }
        ScanKind::Float => {
            if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
                return v
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null);
            }
        }
        ScanKind::Text | ScanKind::Bytes => {}
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    // Binary fallback: UTF-8 when possible, hex otherwise.
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return v
            .map(|bytes| match String::from_utf8(bytes) {
                Ok(text) => Value::String(text),
                Err(err) => {
                    let hex: String = err
                        .into_bytes()
                        .iter()
                        .map(|byte| format!("{byte:02x}"))
                        .collect();
                    Value::String(format!("0x{hex}"))
                }
            })
            .unwrap_or(Value::Null);
    }
    Value::Null
}

/// Convert a column label to UpperCamelCase, splitting on `_`, `-` and
/// spaces.
fn to_upper_camel(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut upper_next = true;
    for ch in label.chars() {
        if matches!(ch, '_' | '-' | ' ') {
            upper_next = true;
            continue;
        }
        if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Coerce a string into a valid exported identifier: the first rune must be
/// an upper-case letter (prefixed with `X` when it is not a letter),
/// subsequent runes are limited to letters, digits and underscore. Already
/// valid exported identifiers pass through unchanged.
pub fn sanitize_identifier(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, mut ch) in s.chars().enumerate() {
        if i == 0 {
            if !ch.is_alphabetic() {
                out.push('X');
            }
            ch = ch.to_uppercase().next().unwrap_or(ch);
        }
        if ch.is_alphanumeric() {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        return "X".to_string();
    }
    out
}
