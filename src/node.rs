//! A merge-capable collection of versioned fields.
//!
//! [`Node`] wraps an [`Entity`] with the CRDT merge operation and an event
//! stream. Merging applies exactly the winning half of a field-level delta,
//! announces what changed (`update`), what was superseded (`history`), and
//! which equal-clock writes were tie-broken (`conflict`), then hands the
//! delta back to the caller for further propagation.
//!
//! # Example
//!
//! ```
//! use crdt_graph::Node;
//! use serde_json::json;
//!
//! # fn main() -> crdt_graph::Result<()> {
//! let mut replica = Node::with_uid("profile");
//! replica.update([("name", json!("Ada"))])?;
//!
//! let mut other = Node::with_uid("profile");
//! other.merge(&replica)?;
//!
//! assert_eq!(other.snapshot(), replica.snapshot());
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, trace};

use crate::clock::Lamport;
use crate::entity::{Entity, RESERVED_KEY};
use crate::error::{GraphError, Result};
use crate::field::{FieldMeta, ObjectMeta};
use crate::observer::{Observer, Subscription};
use crate::resolver::validate;

/// Events a node emits while merging.
///
/// Delivery is synchronous, after the receiver has been mutated: first
/// `history` (when any field was superseded), then `update` (when any field
/// changed). `conflict` fires per equal-clock field as it is applied.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// Fields that changed in this merge, as a delta node.
    Update(Node),
    /// Fields that were superseded in this merge, as a delta node.
    History(Node),
    /// An equal-clock write was tie-broken against the current value.
    Conflict {
        /// The record that won and was applied.
        winner: FieldMeta,
        /// The record it displaced.
        loser: FieldMeta,
    },
}

/// The pair of delta nodes returned by [`Node::merge`].
///
/// Freshly allocated on every merge; shares no storage with the receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDelta {
    /// Fields that newly won.
    pub update: Node,
    /// Fields that were superseded.
    pub history: Node,
}

impl NodeDelta {
    /// Whether the merge changed nothing and superseded nothing.
    ///
    /// Hosts use this to skip broadcasting an empty delta.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.update.is_empty() && self.history.is_empty()
    }
}

/// An entity with CRDT merge semantics and an event stream.
pub struct Node {
    entity: Entity,
    observer: Observer<NodeEvent>,
}

impl Node {
    /// Create an empty node with a random uid.
    #[must_use]
    pub fn new() -> Self {
        Self::from_entity(Entity::new())
    }

    /// Create an empty node with the given uid.
    #[must_use]
    pub fn with_uid(uid: impl Into<String>) -> Self {
        Self::from_entity(Entity::with_uid(uid))
    }

    /// An empty node carrying the same uid as this one.
    ///
    /// Deltas are allocated through this so they always name their origin.
    #[must_use]
    pub fn new_like(&self) -> Self {
        Self::with_uid(self.uid())
    }

    /// Create a node from plain values, each at the minimum present state.
    ///
    /// Every field starts at state 1 under a random uid.
    pub fn from_map<K, I>(fields: I) -> Result<Self>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut node = Self::new();
        for (name, value) in fields {
            let name = name.into();
            reject_reserved(&name)?;
            validate(&value)?;
            node.entity
                .apply(&name, FieldMeta::new(value).with_state(Lamport::new(1)));
        }
        Ok(node)
    }

    /// Wrap a wire-format `NodeObject` directly.
    pub fn source(value: Value) -> Result<Self> {
        Entity::source(value).map(Self::from_entity)
    }

    /// The wire-format JSON for this node.
    #[must_use]
    pub fn to_value(&self) -> Value {
        self.entity.to_value()
    }

    pub(crate) fn from_entity(entity: Entity) -> Self {
        Self {
            entity,
            observer: Observer::new(),
        }
    }

    /// This node's uid.
    #[must_use]
    pub fn uid(&self) -> &str {
        self.entity.uid()
    }

    /// The identity record stored under `"@object"`.
    #[must_use]
    pub fn object_meta(&self) -> &ObjectMeta {
        self.entity.object_meta()
    }

    /// Metadata for a field, or `None` when absent.
    #[must_use]
    pub fn meta(&self, field: &str) -> Option<&FieldMeta> {
        self.entity.meta(field)
    }

    /// The visible value of a field, or `None` for unknown or reserved
    /// fields.
    #[must_use]
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.entity.value(field)
    }

    /// The Lamport state of a field; zero when absent.
    #[must_use]
    pub fn state(&self, field: &str) -> Lamport {
        self.entity.state(field)
    }

    /// Write a field's metadata directly, advancing its clock.
    pub fn set_metadata(&mut self, field: impl Into<String>, meta: FieldMeta) -> Result<()> {
        self.entity.set_metadata(field, meta)
    }

    /// A plain mapping of every non-reserved field to its visible value.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entity.snapshot()
    }

    /// Iterate over `(field, metadata)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldMeta)> {
        self.entity.iter()
    }

    /// Iterate over field names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entity.keys()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entity.len()
    }

    /// Whether the node has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entity.is_empty()
    }

    /// Register a listener for this node's events.
    pub fn subscribe(&mut self, listener: impl FnMut(&NodeEvent) + 'static) -> Subscription {
        self.observer.subscribe(listener)
    }

    /// Deregister a listener. Returns `true` if it was registered.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        self.observer.unsubscribe(subscription)
    }

    /// Merge another replica's state into this one.
    ///
    /// Computes the field-level delta, applies the winning records, emits
    /// `conflict` per tie-broken field, then `history` and `update` when
    /// those halves are non-empty. Either every winning field is applied or,
    /// on error, none are.
    pub fn merge(&mut self, incoming: &Node) -> Result<NodeDelta> {
        let delta = self.entity.delta(&incoming.entity)?;
        debug!(
            uid = %self.uid(),
            updates = delta.update.len(),
            superseded = delta.history.len(),
            "merging node"
        );

        for (name, winner) in delta.update.iter() {
            if self.entity.state(name) == incoming.state(name) {
                let loser = self.entity.meta(name).cloned();
                if let Some(loser) = loser {
                    trace!(uid = %self.uid(), field = name, "equal-clock conflict");
                    self.observer.emit(&NodeEvent::Conflict {
                        winner: winner.clone(),
                        loser,
                    });
                }
            }
            self.entity.apply(name, winner.clone());
        }

        if !delta.history.is_empty() {
            self.observer
                .emit(&NodeEvent::History(Self::from_entity(delta.history.clone())));
        }
        if !delta.update.is_empty() {
            self.observer
                .emit(&NodeEvent::Update(Self::from_entity(delta.update.clone())));
        }

        Ok(NodeDelta {
            update: Self::from_entity(delta.update),
            history: Self::from_entity(delta.history),
        })
    }

    /// Apply an in-process write.
    ///
    /// Synthesizes an incoming node in which every written field sits one
    /// step past this node's clock, then merges it — a local write always
    /// advances its own clock and therefore always wins locally.
    pub fn update<K, I>(&mut self, fields: I) -> Result<NodeDelta>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut incoming = self.new_like();
        for (name, value) in fields {
            let name = name.into();
            reject_reserved(&name)?;
            validate(&value)?;
            let meta = FieldMeta::new(value).with_state(self.state(&name).tick());
            incoming.entity.apply(&name, meta);
        }
        self.merge(&incoming)
    }

    /// Split an incoming node into winning and superseded halves without
    /// mutating this one.
    pub fn delta(&self, incoming: &Node) -> Result<NodeDelta> {
        let delta = self.entity.delta(&incoming.entity)?;
        Ok(NodeDelta {
            update: Self::from_entity(delta.update),
            history: Self::from_entity(delta.history),
        })
    }

    /// The intersection of two nodes' field sets, metadata from the
    /// receiver.
    #[must_use]
    pub fn overlap(&self, other: &Node) -> Node {
        Self::from_entity(self.entity.overlap(&other.entity))
    }

    /// Re-apply this node's fields on top of `target`, advancing clocks so
    /// the rebased writes win future merges against it.
    #[must_use]
    pub fn rebase(&self, target: &Node) -> Node {
        Self::from_entity(self.entity.rebase(&target.entity))
    }
}

fn reject_reserved(name: &str) -> Result<()> {
    if name == RESERVED_KEY {
        return Err(GraphError::malformed(format!(
            "{RESERVED_KEY:?} is not a writable field"
        )));
    }
    Ok(())
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

// A clone carries the CRDT state only. Listeners are capabilities tied to
// the instance they were registered on and do not transfer.
impl Clone for Node {
    fn clone(&self) -> Self {
        Self::from_entity(self.entity.clone())
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity
    }
}

impl core::fmt::Debug for Node {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Node")
            .field("uid", &self.uid())
            .field("fields", &self.entity)
            .field("listeners", &self.observer.len())
            .finish()
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.entity.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Entity::deserialize(deserializer).map(Self::from_entity)
    }
}
