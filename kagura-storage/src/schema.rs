//! Optional per-collection schema validation. A schema lists expected
//! field types and required fields; violations reject the document
//! before any storage or index mutation happens.

use serde::{Deserialize, Serialize};

use kagura_core::value::Value;
use kagura_core::{Error, Result};

/// Expected type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Bool,
    Int,
    Float,
    /// Either integer or float.
    Number,
    String,
    Array,
    Object,
    Any,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::Bool => matches!(value, Value::Bool(_)),
            FieldType::Int => matches!(value, Value::Int(_)),
            FieldType::Float => matches!(value, Value::Float(_)),
            FieldType::Number => matches!(value, Value::Int(_) | Value::Float(_)),
            FieldType::String => matches!(value, Value::String(_)),
            FieldType::Array => matches!(value, Value::Array(_)),
            FieldType::Object => matches!(value, Value::Object(_)),
            FieldType::Any => true,
        }
    }
}

/// One declared field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldType,
    #[serde(default)]
    pub required: bool,
}

/// Declared shape of a collection's documents. Fields not listed are
/// unconstrained; a null value satisfies any optional field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<FieldSchema>,
}

impl Schema {
    pub fn field(mut self, name: impl Into<String>, kind: FieldType, required: bool) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            kind,
            required,
        });
        self
    }

    /// Validate a document body against this schema.
    pub fn validate(&self, collection: &str, body: &Value) -> Result<()> {
        for spec in &self.fields {
            match body.get(&spec.name) {
                None => {
                    if spec.required {
                        return Err(Error::SchemaViolation {
                            collection: collection.to_string(),
                            field: spec.name.clone(),
                            message: "required field is missing".to_string(),
                        });
                    }
                }
                Some(Value::Null) if !spec.required => {}
                Some(value) => {
                    if !spec.kind.accepts(value) {
                        return Err(Error::SchemaViolation {
                            collection: collection.to_string(),
                            field: spec.name.clone(),
                            message: format!(
                                "expected {:?}, got {}",
                                spec.kind,
                                value.type_name()
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
