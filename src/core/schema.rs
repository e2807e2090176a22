//! Explicit per-variant field schemas.
//!
//! Each content variant declares the exact set of fields a generator may
//! populate. Generation output is checked against the declaration: every
//! declared key must be present and no unrecognized key may appear.

use crate::core::codec::AttrValue;
use crate::core::error::DripError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    Sequence,
    Mapping,
    Any,
}

impl FieldKind {
    /// Null is accepted for every kind; optional fields stay unset as null.
    pub fn accepts(&self, value: &AttrValue) -> bool {
        match (self, value) {
            (_, AttrValue::Null) => true,
            (FieldKind::Any, _) => true,
            (FieldKind::Text, AttrValue::Str(_)) => true,
            (FieldKind::Integer, AttrValue::Int(_)) => true,
            (FieldKind::Float, AttrValue::Float(_) | AttrValue::Int(_)) => true,
            (FieldKind::Boolean, AttrValue::Bool(_)) => true,
            (FieldKind::Sequence, AttrValue::Seq(_)) => true,
            (FieldKind::Mapping, AttrValue::Map(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSchema {
    pub variant: String,
    pub fields: Vec<FieldSpec>,
}

impl VariantSchema {
    pub fn new(variant: &str, fields: &[(&str, FieldKind)]) -> Self {
        Self {
            variant: variant.to_string(),
            fields: fields
                .iter()
                .map(|(name, kind)| FieldSpec {
                    name: name.to_string(),
                    kind: *kind,
                })
                .collect(),
        }
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Enforce that `attrs` carries exactly the declared key set, with
    /// kind-compatible values.
    pub fn check(&self, attrs: &BTreeMap<String, AttrValue>) -> Result<(), DripError> {
        for field in &self.fields {
            match attrs.get(&field.name) {
                None => {
                    return Err(DripError::SchemaViolation {
                        variant: self.variant.clone(),
                        reason: format!("missing declared field '{}'", field.name),
                    });
                }
                Some(value) if !field.kind.accepts(value) => {
                    return Err(DripError::SchemaViolation {
                        variant: self.variant.clone(),
                        reason: format!(
                            "field '{}' has kind {:?}, got {:?}",
                            field.name, field.kind, value
                        ),
                    });
                }
                Some(_) => {}
            }
        }
        for key in attrs.keys() {
            if !self.fields.iter().any(|f| &f.name == key) {
                return Err(DripError::SchemaViolation {
                    variant: self.variant.clone(),
                    reason: format!("unrecognized field '{}'", key),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> VariantSchema {
        VariantSchema::new(
            "post",
            &[("text", FieldKind::Text), ("likes", FieldKind::Integer)],
        )
    }

    #[test]
    fn test_exact_key_set_passes() {
        let mut attrs = BTreeMap::new();
        attrs.insert("text".to_string(), AttrValue::Str("hi".to_string()));
        attrs.insert("likes".to_string(), AttrValue::Null);
        assert!(schema().check(&attrs).is_ok());
    }

    #[test]
    fn test_missing_field_fails() {
        let mut attrs = BTreeMap::new();
        attrs.insert("text".to_string(), AttrValue::Str("hi".to_string()));
        assert!(matches!(
            schema().check(&attrs),
            Err(DripError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn test_unrecognized_field_fails() {
        let mut attrs = BTreeMap::new();
        attrs.insert("text".to_string(), AttrValue::Str("hi".to_string()));
        attrs.insert("likes".to_string(), AttrValue::Int(1));
        attrs.insert("extra".to_string(), AttrValue::Int(1));
        assert!(matches!(
            schema().check(&attrs),
            Err(DripError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn test_kind_mismatch_fails() {
        let mut attrs = BTreeMap::new();
        attrs.insert("text".to_string(), AttrValue::Int(7));
        attrs.insert("likes".to_string(), AttrValue::Int(1));
        assert!(schema().check(&attrs).is_err());
    }
}
