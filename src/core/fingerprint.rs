//! Content-spec identity derivation.
//!
//! A spec's identity is the sha256 over its registered behavior
//! identifiers (variant, generator, publisher, authorizer) and schedule
//! expression. Identifiers are stable registry keys, so refactoring an
//! implementation behind an unchanged id keeps its identity, while
//! swapping any collaborator or editing the schedule yields a new one.
//! Fingerprinting never validates the schedule; that happens separately.

use sha2::{Digest, Sha256};

pub fn fingerprint(
    variant: &str,
    generator: &str,
    publisher: &str,
    authorizer: Option<&str>,
    schedule: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    update_field(&mut hasher, variant);
    update_field(&mut hasher, generator);
    update_field(&mut hasher, publisher);
    update_optional(&mut hasher, authorizer);
    update_optional(&mut hasher, schedule);
    format!("{:x}", hasher.finalize())
}

// Length-prefixed fields so adjacent values cannot collide by
// concatenation ("ab"+"c" vs "a"+"bc").
fn update_field(hasher: &mut Sha256, value: &str) {
    hasher.update(value.len().to_string().as_bytes());
    hasher.update(b":");
    hasher.update(value.as_bytes());
    hasher.update(b"\n");
}

fn update_optional(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update(b"+");
            update_field(hasher, v);
        }
        None => hasher.update(b"-\n"),
    }
}
