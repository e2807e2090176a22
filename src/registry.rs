//! Closed collaborator registry.
//!
//! Generators, publishers and authorizers are registered under stable
//! string identifiers; declared specs reference them by id. The mapping
//! is built once at startup and never consulted dynamically beyond a map
//! lookup, so behavior identity is the identifier itself (which is what
//! gets fingerprinted), not any reflection over the implementation.

use crate::core::codec::AttrValue;
use crate::core::error::DripError;
use crate::core::schema::{FieldKind, VariantSchema};
use std::collections::BTreeMap;

/// Flat credential mapping, passed opaquely to every collaborator call.
pub type KeyBundle = BTreeMap<String, String>;

/// Full attribute view of a content instance.
pub type AttrMap = BTreeMap<String, AttrValue>;

/// Produces the attribute mapping for a fresh instance. The returned key
/// set must equal the variant's declared schema exactly.
pub trait Generator {
    fn generate(&self, keys: &KeyBundle) -> Result<AttrMap, DripError>;
}

/// Irreversible external publication. No required return value.
pub trait Publisher {
    fn publish(&self, attrs: &AttrMap, keys: &KeyBundle) -> Result<(), DripError>;
}

/// Outcome of an authorization gate. The gate enforces its own wait
/// bound; the engine treats a timeout like a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Approved,
    Rejected,
    TimedOut,
}

pub trait Authorizer {
    fn authorize(&self, attrs: &AttrMap, keys: &KeyBundle) -> Result<AuthDecision, DripError>;
}

#[derive(Default)]
pub struct Registry {
    generators: BTreeMap<String, Box<dyn Generator>>,
    publishers: BTreeMap<String, Box<dyn Publisher>>,
    authorizers: BTreeMap<String, Box<dyn Authorizer>>,
    schemas: BTreeMap<String, VariantSchema>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in collaborators: a `static_text`
    /// generator fed from the key bundle, a `console` publisher and an
    /// `always_approve` authorizer, plus the `social_post` variant.
    /// Real LLM or platform collaborators register alongside these.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register_schema(VariantSchema::new(
            "social_post",
            &[
                ("text", FieldKind::Text),
                ("thread", FieldKind::Text),
                ("media", FieldKind::Text),
                ("reply_to", FieldKind::Text),
            ],
        ));
        registry.register_generator("static_text", Box::new(StaticTextGenerator));
        registry.register_publisher("console", Box::new(ConsolePublisher));
        registry.register_authorizer("always_approve", Box::new(AlwaysApprove));
        registry
    }

    pub fn register_generator(&mut self, id: &str, generator: Box<dyn Generator>) {
        self.generators.insert(id.to_string(), generator);
    }

    pub fn register_publisher(&mut self, id: &str, publisher: Box<dyn Publisher>) {
        self.publishers.insert(id.to_string(), publisher);
    }

    pub fn register_authorizer(&mut self, id: &str, authorizer: Box<dyn Authorizer>) {
        self.authorizers.insert(id.to_string(), authorizer);
    }

    pub fn register_schema(&mut self, schema: VariantSchema) {
        self.schemas.insert(schema.variant.clone(), schema);
    }

    pub fn generator(&self, id: &str) -> Result<&dyn Generator, DripError> {
        self.generators
            .get(id)
            .map(|g| g.as_ref())
            .ok_or_else(|| DripError::NotFound(format!("generator '{}'", id)))
    }

    pub fn publisher(&self, id: &str) -> Result<&dyn Publisher, DripError> {
        self.publishers
            .get(id)
            .map(|p| p.as_ref())
            .ok_or_else(|| DripError::NotFound(format!("publisher '{}'", id)))
    }

    pub fn authorizer(&self, id: &str) -> Result<&dyn Authorizer, DripError> {
        self.authorizers
            .get(id)
            .map(|a| a.as_ref())
            .ok_or_else(|| DripError::NotFound(format!("authorizer '{}'", id)))
    }

    pub fn schema(&self, variant: &str) -> Result<&VariantSchema, DripError> {
        self.schemas
            .get(variant)
            .ok_or_else(|| DripError::NotFound(format!("variant schema '{}'", variant)))
    }
}

// --- Builtins ---

/// Emits the `social_post` schema from the key bundle: `text` is
/// required, the remaining fields default to null.
struct StaticTextGenerator;

impl Generator for StaticTextGenerator {
    fn generate(&self, keys: &KeyBundle) -> Result<AttrMap, DripError> {
        let text = keys.get("text").ok_or_else(|| {
            DripError::ValidationError("static_text generator requires a 'text' key".to_string())
        })?;
        let mut attrs = AttrMap::new();
        attrs.insert("text".to_string(), AttrValue::Str(text.clone()));
        for field in ["thread", "media", "reply_to"] {
            let value = keys
                .get(field)
                .map(|v| AttrValue::Str(v.clone()))
                .unwrap_or(AttrValue::Null);
            attrs.insert(field.to_string(), value);
        }
        Ok(attrs)
    }
}

struct ConsolePublisher;

impl Publisher for ConsolePublisher {
    fn publish(&self, attrs: &AttrMap, _keys: &KeyBundle) -> Result<(), DripError> {
        let mut view = serde_json::Map::new();
        for (k, v) in attrs {
            view.insert(k.clone(), v.to_json()?);
        }
        println!("{}", serde_json::Value::Object(view));
        Ok(())
    }
}

struct AlwaysApprove;

impl Authorizer for AlwaysApprove {
    fn authorize(&self, _attrs: &AttrMap, _keys: &KeyBundle) -> Result<AuthDecision, DripError> {
        Ok(AuthDecision::Approved)
    }
}
