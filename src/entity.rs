//! The field container shared by nodes.
//!
//! An [`Entity`] maps field names to [`FieldMeta`] records and carries its
//! own identity under the reserved `"@object"` key. It implements every
//! operation that does not mutate through merge: reads, snapshots, the
//! generic delta computation, and the time-travel primitives `overlap` and
//! `rebase`. [`Node`](crate::Node) layers merge and event emission on top.

use std::collections::BTreeMap;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::clock::Lamport;
use crate::error::{GraphError, Result};
use crate::field::{FieldMeta, ObjectMeta};
use crate::resolver::{resolve, validate};

/// The single reserved field name, holding an entity's identity record.
pub const RESERVED_KEY: &str = "@object";

/// A keyed collection of versioned fields.
///
/// Invariants:
/// - the uid is set at construction and never mutated;
/// - the `"@object"` record is not iterated, not returned by
///   [`value`](Entity::value), not part of snapshots, and not subject to
///   merge;
/// - a non-reserved field is present exactly when its state is at least 1 —
///   absence reads as state 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    ident: ObjectMeta,
    fields: BTreeMap<String, FieldMeta>,
}

/// The two halves of a field-level delta.
///
/// `update` holds the records that won and should be applied; `history`
/// holds the records they superseded (or stale incoming records). Both carry
/// the receiver's uid and alias none of its storage.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDelta {
    /// Fields that newly won.
    pub update: Entity,
    /// Fields that were superseded.
    pub history: Entity,
}

impl Entity {
    /// Create an empty entity with a random uid.
    #[must_use]
    pub fn new() -> Self {
        Self::with_uid(Uuid::new_v4().to_string())
    }

    /// Create an empty entity with the given uid.
    #[must_use]
    pub fn with_uid(uid: impl Into<String>) -> Self {
        Self {
            ident: ObjectMeta::new(uid),
            fields: BTreeMap::new(),
        }
    }

    /// Wrap a wire-format `NodeObject`.
    ///
    /// The input must be a JSON object carrying an `"@object"` identity
    /// record; every other key is read as a [`FieldMeta`]. No validation
    /// beyond shape.
    pub fn source(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|err| GraphError::malformed(err.to_string()))
    }

    /// The wire-format JSON for this entity.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// This entity's uid.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.ident.uid
    }

    /// The identity record stored under `"@object"`.
    #[must_use]
    pub fn object_meta(&self) -> &ObjectMeta {
        &self.ident
    }

    /// Metadata for a field, or `None` when absent.
    ///
    /// The reserved key is not addressable here; use
    /// [`object_meta`](Entity::object_meta) for the identity record.
    #[must_use]
    pub fn meta(&self, field: &str) -> Option<&FieldMeta> {
        self.fields.get(field)
    }

    /// The visible value of a field, or `None` for unknown or reserved
    /// fields.
    #[must_use]
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).map(|meta| &meta.value)
    }

    /// The Lamport state of a field; zero when absent.
    #[must_use]
    pub fn state(&self, field: &str) -> Lamport {
        self.fields
            .get(field)
            .map_or(Lamport::ZERO, |meta| meta.state)
    }

    /// Write a field's metadata, advancing its clock.
    ///
    /// The stored state is `state(field) + 1`; any state embedded in the
    /// argument is discarded. The value must be canonicalizable and the
    /// field name must not be reserved.
    pub fn set_metadata(&mut self, field: impl Into<String>, meta: FieldMeta) -> Result<()> {
        let field = field.into();
        if field == RESERVED_KEY {
            return Err(GraphError::malformed(format!(
                "{RESERVED_KEY:?} is not a writable field"
            )));
        }
        validate(&meta.value)?;

        let next = self.state(&field).tick();
        self.fields.insert(field, meta.with_state(next));
        Ok(())
    }

    /// A plain mapping of every non-reserved field to its visible value.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.fields
            .iter()
            .map(|(name, meta)| (name.clone(), meta.value.clone()))
            .collect()
    }

    /// Iterate over `(field, metadata)` pairs.
    ///
    /// The identity record is not included. Order is stable within a process
    /// but carries no meaning.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldMeta)> {
        self.fields.iter().map(|(name, meta)| (name.as_str(), meta))
    }

    /// Iterate over field names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Number of non-reserved fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the entity has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The intersection of two field sets.
    ///
    /// The result contains exactly the fields present in both entities, with
    /// metadata cloned from the receiver, under the receiver's uid.
    #[must_use]
    pub fn overlap(&self, other: &Entity) -> Entity {
        let fields = self
            .fields
            .iter()
            .filter(|(name, _)| other.fields.contains_key(*name))
            .map(|(name, meta)| (name.clone(), meta.clone()))
            .collect();

        Entity {
            ident: self.ident.clone(),
            fields,
        }
    }

    /// Re-apply this entity's fields on top of `target`.
    ///
    /// Starts from `target` and overlays the receiver. Every receiver field
    /// whose state the target matches or exceeds is bumped to
    /// `target.state + 1`, so the rebased write wins future merges against
    /// the target. All metadata is cloned, never aliased.
    #[must_use]
    pub fn rebase(&self, target: &Entity) -> Entity {
        let mut fields = target.fields.clone();

        for (name, meta) in &self.fields {
            let mut meta = meta.clone();
            let held = target.state(name);
            if held >= meta.state {
                meta.state = held.tick();
            }
            fields.insert(name.clone(), meta);
        }

        Entity {
            ident: self.ident.clone(),
            fields,
        }
    }

    /// Split an incoming entity into winning and superseded records.
    ///
    /// For each incoming field, the Lamport comparison against the
    /// receiver's state decides:
    /// - a strictly newer record wins (the replaced record, if any, goes to
    ///   history);
    /// - a strictly older record is stale and goes to history;
    /// - at equal clocks the [resolver](crate::resolver::resolve) picks the
    ///   winner, and only a change of winner is recorded.
    ///
    /// The receiver is not mutated; applying the delta is the merger's job.
    pub fn delta(&self, update: &Entity) -> Result<EntityDelta> {
        let mut winners = Entity::with_uid(self.uid());
        let mut losers = Entity::with_uid(self.uid());

        for (name, incoming) in &update.fields {
            validate(&incoming.value)?;

            let theirs = incoming.state;
            let ours = self.state(name);

            if theirs > ours {
                winners.fields.insert(name.clone(), incoming.clone());
                if let Some(current) = self.fields.get(name) {
                    losers.fields.insert(name.clone(), current.clone());
                }
            } else if theirs < ours {
                losers.fields.insert(name.clone(), incoming.clone());
            } else if let Some(current) = self.fields.get(name) {
                // Equal clocks: neither write precedes the other, so the
                // resolver imposes the fixed tie-break.
                let winner = resolve(current, incoming);
                if std::ptr::eq(winner, incoming) {
                    winners.fields.insert(name.clone(), incoming.clone());
                    losers.fields.insert(name.clone(), current.clone());
                }
            }
            // Both sides at state zero: the field is absent everywhere.
        }

        Ok(EntityDelta {
            update: winners,
            history: losers,
        })
    }

    /// Overwrite a field record without touching its clock.
    ///
    /// Merge-internal: callers guarantee the name is not reserved and the
    /// record has already won its comparison.
    pub(crate) fn apply(&mut self, field: &str, meta: FieldMeta) {
        self.fields.insert(field.to_string(), meta);
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::new()
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry(RESERVED_KEY, &self.ident)?;
        for (name, meta) in &self.fields {
            map.serialize_entry(name, meta)?;
        }
        map.end()
    }
}

struct EntityVisitor;

impl<'de> Visitor<'de> for EntityVisitor {
    type Value = Entity;

    fn expecting(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("a node object with an \"@object\" identity record")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Entity, A::Error> {
        let mut ident: Option<ObjectMeta> = None;
        let mut fields = BTreeMap::new();

        while let Some(name) = access.next_key::<String>()? {
            if name == RESERVED_KEY {
                ident = Some(access.next_value()?);
            } else {
                fields.insert(name, access.next_value::<FieldMeta>()?);
            }
        }

        let ident = ident.ok_or_else(|| de::Error::custom("missing \"@object\" record"))?;
        Ok(Entity { ident, fields })
    }
}

impl<'de> Deserialize<'de> for Entity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(EntityVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value, state: u64) -> FieldMeta {
        FieldMeta::new(value).with_state(Lamport::new(state))
    }

    #[test]
    fn uid_is_set_at_construction() {
        let entity = Entity::with_uid("u1");
        assert_eq!(entity.uid(), "u1");
        assert_eq!(entity.object_meta().uid, "u1");
    }

    #[test]
    fn random_uids_are_distinct() {
        assert_ne!(Entity::new().uid(), Entity::new().uid());
    }

    #[test]
    fn absent_fields_read_as_state_zero() {
        let entity = Entity::with_uid("u1");
        assert_eq!(entity.state("name"), Lamport::ZERO);
        assert!(entity.meta("name").is_none());
        assert!(entity.value("name").is_none());
    }

    #[test]
    fn set_metadata_discards_the_supplied_state() {
        let mut entity = Entity::with_uid("u1");
        entity
            .set_metadata("name", record(json!("Ada"), 99))
            .unwrap();
        assert_eq!(entity.state("name"), Lamport::new(1));
        assert_eq!(entity.value("name"), Some(&json!("Ada")));
    }

    #[test]
    fn set_metadata_advances_the_clock() {
        let mut entity = Entity::with_uid("u1");
        entity.set_metadata("n", FieldMeta::new(json!(1))).unwrap();
        entity.set_metadata("n", FieldMeta::new(json!(2))).unwrap();
        assert_eq!(entity.state("n"), Lamport::new(2));
        assert_eq!(entity.value("n"), Some(&json!(2)));
    }

    #[test]
    fn reserved_key_is_not_writable() {
        let mut entity = Entity::with_uid("u1");
        let err = entity
            .set_metadata(RESERVED_KEY, FieldMeta::new(json!("x")))
            .unwrap_err();
        assert!(matches!(err, GraphError::MalformedWire { .. }));
    }

    #[test]
    fn reserved_key_is_not_a_field() {
        let entity = Entity::with_uid("u1");
        assert!(entity.value(RESERVED_KEY).is_none());
        assert!(entity.meta(RESERVED_KEY).is_none());
        assert_eq!(entity.state(RESERVED_KEY), Lamport::ZERO);
    }

    #[test]
    fn snapshot_maps_fields_to_values() {
        let mut entity = Entity::with_uid("u1");
        entity
            .set_metadata("name", FieldMeta::new(json!("Ada")))
            .unwrap();
        entity
            .set_metadata("age", FieldMeta::new(json!(36)))
            .unwrap();

        let snapshot = entity.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["name"], json!("Ada"));
        assert_eq!(snapshot["age"], json!(36));
        assert!(!snapshot.contains_key(RESERVED_KEY));
    }

    #[test]
    fn iteration_skips_the_identity_record() {
        let mut entity = Entity::with_uid("u1");
        entity.set_metadata("a", FieldMeta::new(json!(1))).unwrap();
        let names: Vec<&str> = entity.keys().collect();
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn overlap_keeps_shared_fields_with_receiver_metadata() {
        let mut left = Entity::with_uid("u1");
        left.set_metadata("shared", FieldMeta::new(json!("mine")))
            .unwrap();
        left.set_metadata("only-left", FieldMeta::new(json!(1)))
            .unwrap();

        let mut right = Entity::with_uid("u2");
        right
            .set_metadata("shared", FieldMeta::new(json!("theirs")))
            .unwrap();
        right
            .set_metadata("only-right", FieldMeta::new(json!(2)))
            .unwrap();

        let common = left.overlap(&right);
        assert_eq!(common.uid(), "u1");
        assert_eq!(common.len(), 1);
        assert_eq!(common.value("shared"), Some(&json!("mine")));
    }

    #[test]
    fn rebase_bumps_dominated_states_past_the_target() {
        let mut target = Entity::with_uid("u1");
        target.apply("x", record(json!(1), 5));

        let mut local = Entity::with_uid("u1");
        local.apply("x", record(json!(2), 1));

        let rebased = local.rebase(&target);
        assert_eq!(rebased.value("x"), Some(&json!(2)));
        assert_eq!(rebased.state("x"), Lamport::new(6));
    }

    #[test]
    fn rebase_keeps_already_winning_states() {
        let mut target = Entity::with_uid("u1");
        target.apply("x", record(json!(1), 2));

        let mut local = Entity::with_uid("u1");
        local.apply("x", record(json!(2), 7));

        let rebased = local.rebase(&target);
        assert_eq!(rebased.state("x"), Lamport::new(7));
        assert_eq!(rebased.value("x"), Some(&json!(2)));
    }

    #[test]
    fn rebase_carries_target_only_fields() {
        let mut target = Entity::with_uid("u1");
        target.apply("theirs", record(json!("t"), 3));

        let mut local = Entity::with_uid("u1");
        local.apply("mine", record(json!("m"), 1));

        let rebased = local.rebase(&target);
        assert_eq!(rebased.value("theirs"), Some(&json!("t")));
        assert_eq!(rebased.state("theirs"), Lamport::new(3));
        assert_eq!(rebased.value("mine"), Some(&json!("m")));
    }

    #[test]
    fn delta_reports_new_fields_as_updates() {
        let receiver = Entity::with_uid("u1");
        let mut incoming = Entity::with_uid("u1");
        incoming.apply("name", record(json!("Ada"), 1));

        let delta = receiver.delta(&incoming).unwrap();
        assert_eq!(delta.update.value("name"), Some(&json!("Ada")));
        assert!(delta.history.is_empty());
        assert_eq!(delta.update.uid(), "u1");
    }

    #[test]
    fn delta_records_the_replaced_value_in_history() {
        let mut receiver = Entity::with_uid("u1");
        receiver.apply("x", record(json!("old"), 1));

        let mut incoming = Entity::with_uid("u1");
        incoming.apply("x", record(json!("new"), 2));

        let delta = receiver.delta(&incoming).unwrap();
        assert_eq!(delta.update.value("x"), Some(&json!("new")));
        assert_eq!(delta.history.value("x"), Some(&json!("old")));
    }

    #[test]
    fn delta_files_stale_updates_under_history() {
        let mut receiver = Entity::with_uid("u1");
        receiver.apply("x", record(json!("new"), 2));

        let mut incoming = Entity::with_uid("u1");
        incoming.apply("x", record(json!("old"), 1));

        let delta = receiver.delta(&incoming).unwrap();
        assert!(delta.update.is_empty());
        assert_eq!(delta.history.value("x"), Some(&json!("old")));
        assert_eq!(delta.history.state("x"), Lamport::new(1));
    }

    #[test]
    fn delta_is_silent_when_the_tie_keeps_the_current_value() {
        let mut receiver = Entity::with_uid("u1");
        receiver.apply("x", record(json!("b"), 1));

        let mut incoming = Entity::with_uid("u1");
        incoming.apply("x", record(json!("a"), 1));

        let delta = receiver.delta(&incoming).unwrap();
        assert!(delta.update.is_empty());
        assert!(delta.history.is_empty());
    }

    #[test]
    fn delta_swaps_winner_and_loser_when_the_tie_flips() {
        let mut receiver = Entity::with_uid("u1");
        receiver.apply("x", record(json!("a"), 1));

        let mut incoming = Entity::with_uid("u1");
        incoming.apply("x", record(json!("b"), 1));

        let delta = receiver.delta(&incoming).unwrap();
        assert_eq!(delta.update.value("x"), Some(&json!("b")));
        assert_eq!(delta.history.value("x"), Some(&json!("a")));
    }

    #[test]
    fn delta_skips_fields_absent_on_both_sides() {
        let receiver = Entity::with_uid("u1");
        let mut incoming = Entity::with_uid("u1");
        incoming.apply("ghost", record(json!("x"), 0));

        let delta = receiver.delta(&incoming).unwrap();
        assert!(delta.update.is_empty());
        assert!(delta.history.is_empty());
    }

    #[test]
    fn delta_does_not_mutate_the_receiver() {
        let mut receiver = Entity::with_uid("u1");
        receiver.apply("x", record(json!(1), 1));
        let before = receiver.clone();

        let mut incoming = Entity::with_uid("u1");
        incoming.apply("x", record(json!(2), 5));
        receiver.delta(&incoming).unwrap();

        assert_eq!(receiver, before);
    }

    #[test]
    fn source_requires_an_object() {
        let err = Entity::source(json!("nope")).unwrap_err();
        assert!(matches!(err, GraphError::MalformedWire { .. }));
    }

    #[test]
    fn source_requires_the_identity_record() {
        let err = Entity::source(json!({ "x": { "value": 1, "state": 1 } })).unwrap_err();
        assert!(matches!(err, GraphError::MalformedWire { .. }));
    }

    #[test]
    fn wire_roundtrip_preserves_fields_and_identity() {
        let mut entity = Entity::with_uid("u1");
        entity.apply(
            "name",
            record(json!("Ada"), 4).with_extra("prev", json!("title")),
        );

        let wire = entity.to_value();
        assert_eq!(wire[RESERVED_KEY]["uid"], json!("u1"));
        assert_eq!(wire["name"]["state"], json!(4));

        let back = Entity::source(wire).unwrap();
        assert_eq!(back, entity);
    }
}
