//! Tagged attribute value codec.
//!
//! Content attributes are persisted in TEXT columns. Each value carries a
//! one-byte type discriminator so decoding never has to sniff the payload:
//!
//! ```text
//! n            null
//! b:true       boolean
//! i:42         integer
//! f:0.25       float
//! s:hello      string (raw, no escaping)
//! q:[...]      sequence, JSON payload
//! m:{...}      mapping, JSON payload
//! ```
//!
//! Sequence and mapping payloads are JSON, where integers and floats stay
//! distinguishable (`2` vs `2.0`), so `decode(encode(v)) == v` holds for
//! every supported value. Non-finite floats are rejected at encode time.

use crate::core::error::DripError;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }

    pub fn encode(&self) -> Result<String, DripError> {
        match self {
            AttrValue::Null => Ok("n".to_string()),
            AttrValue::Bool(b) => Ok(format!("b:{}", b)),
            AttrValue::Int(i) => Ok(format!("i:{}", i)),
            AttrValue::Float(f) => {
                if !f.is_finite() {
                    return Err(DripError::ValidationError(format!(
                        "non-finite float cannot be persisted: {}",
                        f
                    )));
                }
                Ok(format!("f:{}", f))
            }
            AttrValue::Str(s) => Ok(format!("s:{}", s)),
            AttrValue::Seq(_) => Ok(format!("q:{}", self.to_json()?)),
            AttrValue::Map(_) => Ok(format!("m:{}", self.to_json()?)),
        }
    }

    pub fn decode(encoded: &str) -> Result<AttrValue, DripError> {
        if encoded == "n" {
            return Ok(AttrValue::Null);
        }
        let (tag, payload) = encoded.split_once(':').ok_or_else(|| {
            DripError::ValidationError(format!("malformed encoded value: '{}'", encoded))
        })?;
        match tag {
            "b" => match payload {
                "true" => Ok(AttrValue::Bool(true)),
                "false" => Ok(AttrValue::Bool(false)),
                other => Err(DripError::ValidationError(format!(
                    "malformed boolean payload: '{}'",
                    other
                ))),
            },
            "i" => payload.parse::<i64>().map(AttrValue::Int).map_err(|e| {
                DripError::ValidationError(format!("malformed integer payload '{}': {}", payload, e))
            }),
            "f" => payload.parse::<f64>().map(AttrValue::Float).map_err(|e| {
                DripError::ValidationError(format!("malformed float payload '{}': {}", payload, e))
            }),
            "s" => Ok(AttrValue::Str(payload.to_string())),
            "q" | "m" => {
                let json: JsonValue = serde_json::from_str(payload).map_err(|e| {
                    DripError::ValidationError(format!("malformed JSON payload: {}", e))
                })?;
                let value = AttrValue::from_json(&json)?;
                match (tag, &value) {
                    ("q", AttrValue::Seq(_)) | ("m", AttrValue::Map(_)) => Ok(value),
                    _ => Err(DripError::ValidationError(format!(
                        "payload does not match discriminator '{}'",
                        tag
                    ))),
                }
            }
            other => Err(DripError::ValidationError(format!(
                "unknown type discriminator: '{}'",
                other
            ))),
        }
    }

    pub fn to_json(&self) -> Result<JsonValue, DripError> {
        Ok(match self {
            AttrValue::Null => JsonValue::Null,
            AttrValue::Bool(b) => JsonValue::Bool(*b),
            AttrValue::Int(i) => JsonValue::from(*i),
            AttrValue::Float(f) => JsonValue::Number(
                serde_json::Number::from_f64(*f).ok_or_else(|| {
                    DripError::ValidationError(format!(
                        "non-finite float cannot be persisted: {}",
                        f
                    ))
                })?,
            ),
            AttrValue::Str(s) => JsonValue::String(s.clone()),
            AttrValue::Seq(items) => JsonValue::Array(
                items
                    .iter()
                    .map(AttrValue::to_json)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            AttrValue::Map(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json()?)))
                    .collect::<Result<serde_json::Map<_, _>, DripError>>()?,
            ),
        })
    }

    pub fn from_json(json: &JsonValue) -> Result<AttrValue, DripError> {
        Ok(match json {
            JsonValue::Null => AttrValue::Null,
            JsonValue::Bool(b) => AttrValue::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    AttrValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    AttrValue::Float(f)
                } else {
                    return Err(DripError::ValidationError(format!(
                        "integer out of range: {}",
                        n
                    )));
                }
            }
            JsonValue::String(s) => AttrValue::Str(s.clone()),
            JsonValue::Array(items) => AttrValue::Seq(
                items
                    .iter()
                    .map(AttrValue::from_json)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            JsonValue::Object(entries) => AttrValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), AttrValue::from_json(v)?)))
                    .collect::<Result<BTreeMap<_, _>, DripError>>()?,
            ),
        })
    }
}
