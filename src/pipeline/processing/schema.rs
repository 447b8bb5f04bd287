//! Diagnostic shape inspection for arbitrary nested records.
//!
//! Used by the `analyze` command to show operators what a source actually
//! sends. Nothing here feeds the import path.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    Null,
    Bool,
    Number,
    String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Scalar { scalar: ScalarType },
    Array { len: usize },
    Object { keys: usize },
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Scalar { scalar } => write!(f, "scalar({:?})", scalar),
            FieldKind::Array { len } => write!(f, "array[{}]", len),
            FieldKind::Object { keys } => write!(f, "object{{{}}}", keys),
        }
    }
}

/// One field of a record, addressed by dotted path (`eventLocation.address`,
/// `ticketTypes[]` for array elements)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldShape {
    pub path: String,
    pub kind: FieldKind,
}

/// Presence of one path across a sample of records
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldPresence {
    pub path: String,
    pub seen: usize,
    pub kinds: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SchemaAnalyzer {
    max_depth: usize,
}

impl Default for SchemaAnalyzer {
    fn default() -> Self {
        Self { max_depth: 4 }
    }
}

impl SchemaAnalyzer {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Classify every field of `record`, depth-first, in key order
    pub fn analyze(&self, record: &Value) -> Vec<FieldShape> {
        let mut shapes = Vec::new();
        if let Value::Object(map) = record {
            for (key, value) in map {
                self.walk(key.clone(), value, 0, &mut shapes);
            }
        }
        shapes
    }

    fn walk(&self, path: String, value: &Value, depth: usize, out: &mut Vec<FieldShape>) {
        out.push(FieldShape {
            path: path.clone(),
            kind: classify(value),
        });
        if depth >= self.max_depth {
            return;
        }
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    self.walk(format!("{}.{}", path, key), child, depth + 1, out);
                }
            }
            // The first element stands in for the element shape
            Value::Array(items) => {
                if let Some(first) = items.first() {
                    self.walk(format!("{}[]", path), first, depth + 1, out);
                }
            }
            _ => {}
        }
    }

    /// Merge the shapes of many records into per-path presence counts
    pub fn analyze_many<'a>(&self, records: impl IntoIterator<Item = &'a Value>) -> Vec<FieldPresence> {
        let mut merged: BTreeMap<String, (usize, Vec<String>)> = BTreeMap::new();
        for record in records {
            for shape in self.analyze(record) {
                let entry = merged.entry(shape.path).or_default();
                entry.0 += 1;
                let label = kind_label(&shape.kind).to_string();
                if !entry.1.contains(&label) {
                    entry.1.push(label);
                }
            }
        }
        merged
            .into_iter()
            .map(|(path, (seen, kinds))| FieldPresence { path, seen, kinds })
            .collect()
    }
}

fn classify(value: &Value) -> FieldKind {
    match value {
        Value::Null => FieldKind::Scalar { scalar: ScalarType::Null },
        Value::Bool(_) => FieldKind::Scalar { scalar: ScalarType::Bool },
        Value::Number(_) => FieldKind::Scalar { scalar: ScalarType::Number },
        Value::String(_) => FieldKind::Scalar { scalar: ScalarType::String },
        Value::Array(items) => FieldKind::Array { len: items.len() },
        Value::Object(map) => FieldKind::Object { keys: map.len() },
    }
}

fn kind_label(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::Scalar { scalar: ScalarType::Null } => "null",
        FieldKind::Scalar { scalar: ScalarType::Bool } => "bool",
        FieldKind::Scalar { scalar: ScalarType::Number } => "number",
        FieldKind::Scalar { scalar: ScalarType::String } => "string",
        FieldKind::Array { .. } => "array",
        FieldKind::Object { .. } => "object",
    }
}
