//! Content instance lifecycle.
//!
//! An instance is the stateful realization of a declared spec:
//! `Unrealized -> Generating -> AwaitingAuthorization -> Authorized ->
//! Scheduled -> Published`, with `Abandoned` as the terminal outcome when
//! the authorization budget runs out. Abandonment persists nothing; the
//! next reconciliation pass starts over from `Unrealized`.

use crate::config::ContentSpec;
use crate::core::codec::AttrValue;
use crate::core::error::DripError;
use crate::core::events::EventLog;
use crate::core::schedule;
use crate::core::schema::VariantSchema;
use crate::core::store::{
    COL_AUTHORIZED, COL_AUTHORIZER, COL_FINGERPRINT, COL_GENERATOR, COL_KEYS_REF, COL_PUBLISHER,
    COL_SCHEDULE, Row,
};
use crate::registry::{AttrMap, AuthDecision, KeyBundle, Registry};

/// Generate+authorize rounds before an instance is abandoned.
pub const AUTH_RETRY_BUDGET: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unrealized,
    Generating,
    AwaitingAuthorization,
    Authorized,
    Scheduled,
    Published,
    Abandoned,
}

#[derive(Debug)]
pub struct ContentInstance {
    pub fingerprint: String,
    pub variant: String,
    pub generator: String,
    pub publisher: String,
    pub authorizer: Option<String>,
    pub schedule: Option<String>,
    pub keys_ref: Option<String>,
    pub is_authorized: bool,
    pub state: Lifecycle,
    schema: VariantSchema,
    attrs: AttrMap,
    keys: KeyBundle,
}

impl ContentInstance {
    /// Build an unrealized instance from a declared spec. Fails fast with
    /// `InvalidSchedule` before the instance is used anywhere.
    pub fn new(
        spec: &ContentSpec,
        schema: VariantSchema,
        keys: KeyBundle,
    ) -> Result<Self, DripError> {
        if let Some(expr) = &spec.schedule {
            schedule::validate(expr)?;
        }
        Ok(Self {
            fingerprint: spec.fingerprint(),
            variant: spec.variant.clone(),
            generator: spec.generator.clone(),
            publisher: spec.publisher.clone(),
            authorizer: spec.authorizer.clone(),
            schedule: spec.schedule.clone(),
            keys_ref: spec.keys.as_ref().map(|p| p.display().to_string()),
            is_authorized: spec.authorized,
            state: Lifecycle::Unrealized,
            schema,
            attrs: AttrMap::new(),
            keys,
        })
    }

    pub fn attrs(&self) -> &AttrMap {
        &self.attrs
    }

    /// Invoke the generator and replace the attribute set. The returned
    /// key set must equal the declared schema exactly.
    pub fn generate(&mut self, registry: &Registry) -> Result<(), DripError> {
        self.state = Lifecycle::Generating;
        let attrs = registry.generator(&self.generator)?.generate(&self.keys)?;
        self.schema.check(&attrs)?;
        self.attrs = attrs;
        self.state = Lifecycle::AwaitingAuthorization;
        Ok(())
    }

    /// No-op success when already authorized. A missing authorizer is
    /// automatic authorization. Anything but `Approved` leaves the flag
    /// untouched; the caller must regenerate before retrying.
    pub fn authorize(&mut self, registry: &Registry) -> Result<bool, DripError> {
        if self.is_authorized {
            self.state = Lifecycle::Authorized;
            return Ok(true);
        }
        let decision = match &self.authorizer {
            None => AuthDecision::Approved,
            Some(id) => registry
                .authorizer(id)?
                .authorize(&self.full_view()?, &self.keys)?,
        };
        if decision == AuthDecision::Approved {
            self.is_authorized = true;
            self.state = Lifecycle::Authorized;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Drive generate+authorize rounds up to the retry budget. Returns
    /// whether the instance reached `Authorized`; exhaustion is not an
    /// error. A schema violation consumes one round.
    pub fn realize(&mut self, registry: &Registry, events: &EventLog) -> Result<bool, DripError> {
        for _ in 0..AUTH_RETRY_BUDGET {
            match self.generate(registry) {
                Ok(()) => {}
                Err(e @ DripError::SchemaViolation { .. }) => {
                    events.record_detail(
                        "instance.generate",
                        &self.fingerprint,
                        "schema_violation",
                        &e.to_string(),
                    )?;
                    continue;
                }
                Err(e) => return Err(e),
            }
            if self.authorize(registry)? {
                return Ok(true);
            }
        }
        self.state = Lifecycle::Abandoned;
        events.record("instance.realize", &self.fingerprint, "abandoned")?;
        Ok(false)
    }

    /// Invoke the publisher with the attribute view and key bundle. The
    /// platform side effect is irreversible; callers delete the job and
    /// record before invoking this.
    pub fn publish(&self, registry: &Registry) -> Result<(), DripError> {
        if !self.is_authorized {
            return Err(DripError::NotAuthorized(self.fingerprint.clone()));
        }
        registry
            .publisher(&self.publisher)?
            .publish(&self.attrs, &self.keys)
    }

    pub fn mark_scheduled(&mut self) {
        self.state = Lifecycle::Scheduled;
    }

    pub fn mark_published(&mut self) {
        self.state = Lifecycle::Published;
    }

    /// Attribute view handed to authorizers: declared fields plus the
    /// spec's behavioral definition, so a human gate sees what would run.
    fn full_view(&self) -> Result<AttrMap, DripError> {
        let mut view = self.attrs.clone();
        view.insert(
            "fingerprint".to_string(),
            AttrValue::Str(self.fingerprint.clone()),
        );
        view.insert("variant".to_string(), AttrValue::Str(self.variant.clone()));
        view.insert(
            "generator".to_string(),
            AttrValue::Str(self.generator.clone()),
        );
        view.insert(
            "publisher".to_string(),
            AttrValue::Str(self.publisher.clone()),
        );
        view.insert(
            "authorizer".to_string(),
            option_str(self.authorizer.as_deref()),
        );
        view.insert("schedule".to_string(), option_str(self.schedule.as_deref()));
        Ok(view)
    }

    /// Row layout: declared fields tagged-encoded; bookkeeping columns
    /// tagged as well, except the fingerprint, which stays bare so SQL
    /// equality can key on it.
    pub fn to_row(&self) -> Result<Row, DripError> {
        let mut row = Row::new();
        for field in &self.schema.fields {
            let value = self.attrs.get(&field.name).unwrap_or(&AttrValue::Null);
            row.insert(field.name.clone(), value.encode()?);
        }
        row.insert(COL_FINGERPRINT.to_string(), self.fingerprint.clone());
        row.insert(
            COL_AUTHORIZED.to_string(),
            AttrValue::Bool(self.is_authorized).encode()?,
        );
        row.insert(
            COL_SCHEDULE.to_string(),
            option_str(self.schedule.as_deref()).encode()?,
        );
        row.insert(
            COL_KEYS_REF.to_string(),
            option_str(self.keys_ref.as_deref()).encode()?,
        );
        row.insert(
            COL_GENERATOR.to_string(),
            AttrValue::Str(self.generator.clone()).encode()?,
        );
        row.insert(
            COL_PUBLISHER.to_string(),
            AttrValue::Str(self.publisher.clone()).encode()?,
        );
        row.insert(
            COL_AUTHORIZER.to_string(),
            option_str(self.authorizer.as_deref()).encode()?,
        );
        Ok(row)
    }

    /// Rebuild an instance from its persisted row. Rows only exist for
    /// instances that reached `Authorized`, but the flag is still read
    /// back rather than assumed.
    pub fn from_row(
        schema: VariantSchema,
        row: &Row,
        keys: KeyBundle,
    ) -> Result<Self, DripError> {
        let fingerprint = row
            .get(COL_FINGERPRINT)
            .cloned()
            .ok_or_else(|| DripError::ValidationError("row missing fingerprint".to_string()))?;
        let is_authorized = matches!(decode_col(row, COL_AUTHORIZED)?, AttrValue::Bool(true));
        let mut attrs = AttrMap::new();
        for field in &schema.fields {
            let value = match row.get(&field.name) {
                Some(encoded) => AttrValue::decode(encoded)?,
                None => AttrValue::Null,
            };
            attrs.insert(field.name.clone(), value);
        }
        Ok(Self {
            fingerprint,
            variant: schema.variant.clone(),
            generator: decode_opt_str(row, COL_GENERATOR)?.unwrap_or_default(),
            publisher: decode_opt_str(row, COL_PUBLISHER)?.unwrap_or_default(),
            authorizer: decode_opt_str(row, COL_AUTHORIZER)?,
            schedule: decode_opt_str(row, COL_SCHEDULE)?,
            keys_ref: decode_opt_str(row, COL_KEYS_REF)?,
            is_authorized,
            state: if is_authorized {
                Lifecycle::Authorized
            } else {
                Lifecycle::AwaitingAuthorization
            },
            schema,
            attrs,
            keys,
        })
    }
}

fn option_str(value: Option<&str>) -> AttrValue {
    match value {
        Some(s) => AttrValue::Str(s.to_string()),
        None => AttrValue::Null,
    }
}

fn decode_col(row: &Row, col: &str) -> Result<AttrValue, DripError> {
    match row.get(col) {
        Some(encoded) => AttrValue::decode(encoded),
        None => Ok(AttrValue::Null),
    }
}

fn decode_opt_str(row: &Row, col: &str) -> Result<Option<String>, DripError> {
    match decode_col(row, col)? {
        AttrValue::Str(s) => Ok(Some(s)),
        AttrValue::Null => Ok(None),
        other => Err(DripError::ValidationError(format!(
            "column '{}' holds {:?}, expected string or null",
            col, other
        ))),
    }
}
