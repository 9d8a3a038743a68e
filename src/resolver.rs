//! Deterministic conflict resolution for equal-clock writes.
//!
//! When two replicas write the same field at the same Lamport state, neither
//! write causally precedes the other. Every replica must still pick the same
//! winner, so the tie-break is a fixed total order over values: arbitrary,
//! but deterministic and independent of which replica is asking.
//!
//! Comparison happens on a canonical serialized form. With serde_json's
//! default features object keys are already sorted (`BTreeMap` maps) and
//! floats print as shortest round-trip decimals, so `serde_json::to_string`
//! is canonical as-is.

use core::cmp::Ordering;

use serde_json::Value;

use crate::error::{GraphError, Result};
use crate::field::FieldMeta;

/// The canonical string form of a value.
///
/// Stable across replicas: object keys sorted, strings JSON-escaped, numbers
/// as shortest round-trip decimals.
#[must_use]
pub fn canonical_string(value: &Value) -> String {
    // Serializing a `Value` cannot fail: keys are strings and non-finite
    // numbers cannot be constructed.
    serde_json::to_string(value).unwrap_or_default()
}

/// Check that a value can be canonicalized.
///
/// Walks the value tree and rejects non-finite numbers. `serde_json::Number`
/// already refuses to hold them, so this is a boundary guarantee that holds
/// even if the value representation widens.
pub fn validate(value: &Value) -> Result<()> {
    match value {
        Value::Number(n) => {
            if n.as_f64().is_some_and(|f| !f.is_finite()) {
                return Err(GraphError::invalid_value(format!("non-finite number: {n}")));
            }
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(validate),
        Value::Object(map) => map.values().try_for_each(validate),
        _ => Ok(()),
    }
}

/// Pick the winner between two field records with equal Lamport states.
///
/// Total and antisymmetric: for any pair, both replicas pick the same winning
/// value regardless of argument order. The rules fire in order:
///
/// 1. Structurally equal values: `a`.
/// 2. Object vs object: greater canonical string; tie means equal values.
/// 3. Object vs non-object: the object side.
/// 4. Scalar vs scalar: greater canonical string.
/// 5. Same canonical string, different types: the non-string side.
/// 6. Otherwise: `a`.
#[must_use]
pub fn resolve<'a>(a: &'a FieldMeta, b: &'a FieldMeta) -> &'a FieldMeta {
    if a.value == b.value {
        return a;
    }

    let a_is_object = a.value.is_object();
    let b_is_object = b.value.is_object();

    if a_is_object && b_is_object {
        return match canonical_string(&a.value).cmp(&canonical_string(&b.value)) {
            Ordering::Less => b,
            Ordering::Equal | Ordering::Greater => a,
        };
    }
    if a_is_object {
        return a;
    }
    if b_is_object {
        return b;
    }

    match canonical_string(&a.value).cmp(&canonical_string(&b.value)) {
        Ordering::Greater => a,
        Ordering::Less => b,
        Ordering::Equal => {
            if a.value.is_string() && !b.value.is_string() {
                b
            } else {
                a
            }
        }
    }
}
