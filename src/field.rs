//! Wire-level metadata records: one per field, one per entity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Lamport;

/// Metadata for a single versioned field.
///
/// Carries the field's current value and Lamport state, plus any extra
/// annotations (linked-list pointers such as `prev` / `next`, aggregation
/// flags). Extras are opaque to merge: they travel with the record but are
/// never compared.
///
/// On the wire a `FieldMeta` is a flat JSON object:
///
/// ```text
/// { "value": <JSON value>, "state": <non-negative integer>, ...extras }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    /// The field's visible value.
    pub value: Value,
    /// Lamport clock of the last write to this field.
    pub state: Lamport,
    /// Opaque annotations carried alongside the value.
    #[serde(flatten)]
    pub extras: BTreeMap<String, Value>,
}

impl FieldMeta {
    /// Create a metadata record at the zero state.
    ///
    /// The state is assigned by whichever operation writes the record; see
    /// [`Entity::set_metadata`](crate::Entity::set_metadata).
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            value,
            state: Lamport::ZERO,
            extras: BTreeMap::new(),
        }
    }

    /// The same record at an explicit state.
    #[must_use]
    pub fn with_state(mut self, state: Lamport) -> Self {
        self.state = state;
        self
    }

    /// Attach an extra annotation.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }
}

/// The identity record stored under the reserved `"@object"` key.
///
/// Holds the entity's uid, which is set at construction and never mutated.
/// Additional identifiers round-trip through `extras`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// The entity's universally unique identifier.
    pub uid: String,
    /// Additional identity annotations.
    #[serde(flatten)]
    pub extras: BTreeMap<String, Value>,
}

impl ObjectMeta {
    /// Create an identity record for the given uid.
    #[must_use]
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            extras: BTreeMap::new(),
        }
    }
}
