//! A keyed collection of nodes with composed merges.
//!
//! [`Graph`] maps uids to [`Node`]s, preserving insertion order. Merging a
//! graph delegates to each member node and aggregates the per-node deltas
//! into two parallel delta graphs — one of everything that won, one of
//! everything that was superseded — which are also announced to the graph's
//! listeners.
//!
//! # Example
//!
//! ```
//! use crdt_graph::{Graph, Node};
//! use serde_json::json;
//!
//! # fn main() -> crdt_graph::Result<()> {
//! let mut profile = Node::with_uid("user-ada");
//! profile.update([("name", json!("Ada"))])?;
//!
//! let mut replica = Graph::new();
//! replica.merge(&Graph::from_nodes([profile]))?;
//!
//! let node = replica.value("user-ada").unwrap();
//! assert_eq!(node.snapshot()["name"], json!("Ada"));
//! # Ok(())
//! # }
//! ```

use indexmap::IndexMap;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::node::{Node, NodeDelta};
use crate::observer::{Observer, Subscription};
use crate::resolver::validate;

/// Events a graph emits after merging.
///
/// `update` first, then `history`; listeners observe the already-mutated
/// receiver.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    /// Everything that won in this merge, as a delta graph.
    Update(Graph),
    /// Everything that was superseded in this merge, as a delta graph.
    History(Graph),
}

/// The pair of delta graphs returned by [`Graph::merge`].
///
/// Each half carries an entry for every merged uid, even when that node's
/// half-delta is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphDelta {
    /// Per-node winning fields.
    pub update: Graph,
    /// Per-node superseded fields.
    pub history: Graph,
}

impl GraphDelta {
    /// Whether no member contributed any field to either half.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.update.nodes.values().all(Node::is_empty)
            && self.history.nodes.values().all(Node::is_empty)
    }
}

/// An insertion-ordered map of uids to nodes.
///
/// Invariants:
/// - every key equals its node's uid;
/// - iteration yields members in insertion order, which carries no semantic
///   meaning and is not part of equality;
/// - a node referenced by any successful merge is present afterwards, even
///   when the merge delivered no field updates.
pub struct Graph {
    nodes: IndexMap<String, Node>,
    observer: Observer<GraphEvent>,
}

impl Graph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
            observer: Observer::new(),
        }
    }

    /// Build a graph directly from owned nodes, keyed by their uids.
    #[must_use]
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let mut graph = Self::new();
        for node in nodes {
            graph.nodes.insert(node.uid().to_string(), node);
        }
        graph
    }

    /// Wrap a wire-format `GraphObject`.
    ///
    /// Every member must be a `NodeObject` whose uid agrees with its key;
    /// anything else is [`MalformedWire`](GraphError::MalformedWire).
    pub fn source(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|err| GraphError::malformed(err.to_string()))
    }

    /// The wire-format JSON for this graph.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// The node stored at `uid`, or `None`.
    #[must_use]
    pub fn value(&self, uid: &str) -> Option<&Node> {
        self.nodes.get(uid)
    }

    /// The node stored at `uid`, or [`UnknownUid`](GraphError::UnknownUid).
    ///
    /// For callers that assume presence; prefer [`value`](Graph::value).
    pub fn require(&self, uid: &str) -> Result<&Node> {
        self.nodes.get(uid).ok_or_else(|| GraphError::UnknownUid {
            uid: uid.to_string(),
        })
    }

    /// Whether a node exists at `uid`.
    #[must_use]
    pub fn contains(&self, uid: &str) -> bool {
        self.nodes.contains_key(uid)
    }

    /// Iterate over `(uid, node)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.nodes.iter().map(|(uid, node)| (uid.as_str(), node))
    }

    /// Iterate over member uids in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Number of member nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Register a listener for this graph's events.
    pub fn subscribe(&mut self, listener: impl FnMut(&GraphEvent) + 'static) -> Subscription {
        self.observer.subscribe(listener)
    }

    /// Deregister a listener. Returns `true` if it was registered.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        self.observer.unsubscribe(subscription)
    }

    /// Merge another graph's members into this one.
    ///
    /// Unknown uids get an empty shell first, so every referenced node is
    /// present afterwards. Each member merge contributes its two half-deltas
    /// to the aggregated delta graphs regardless of emptiness. Emits
    /// `update` then `history`, and returns both halves.
    ///
    /// Incoming values are validated before the first member is touched:
    /// a reported error leaves this graph unchanged.
    pub fn merge(&mut self, incoming: &Graph) -> Result<GraphDelta> {
        for (_, node) in incoming.iter() {
            for (_, meta) in node.iter() {
                validate(&meta.value)?;
            }
        }
        debug!(members = incoming.len(), "merging graph");

        let mut update = Graph::new();
        let mut history = Graph::new();

        for (uid, node) in incoming.iter() {
            let target = self
                .nodes
                .entry(uid.to_string())
                .or_insert_with(|| node.new_like());

            let NodeDelta {
                update: won,
                history: superseded,
            } = target.merge(node)?;

            update.nodes.insert(uid.to_string(), won);
            history.nodes.insert(uid.to_string(), superseded);
        }

        let delta = GraphDelta { update, history };
        self.observer
            .emit(&GraphEvent::Update(delta.update.clone()));
        self.observer
            .emit(&GraphEvent::History(delta.history.clone()));
        Ok(delta)
    }

    /// Re-apply this graph's members on top of `target`.
    ///
    /// The result holds both graphs' members; every node present on both
    /// sides is rebased so this graph's writes win future merges against
    /// the target.
    pub fn rebase(&self, target: &Graph) -> Result<Graph> {
        let mut rebased = Graph::new();
        rebased.merge(target)?;
        rebased.merge(self)?;

        for (uid, node) in self.iter() {
            if let Some(base) = target.value(uid) {
                rebased.nodes.insert(uid.to_string(), node.rebase(base));
            }
        }
        Ok(rebased)
    }

    /// The intersection of two graphs.
    ///
    /// Members present on both sides contribute the overlap of their field
    /// sets; one-sided members are omitted.
    pub fn overlap(&self, target: &Graph) -> Result<Graph> {
        let mut common = Graph::new();
        for (uid, node) in self.iter() {
            if let Some(other) = target.value(uid) {
                common.merge(&Graph::from_nodes([node.overlap(other)]))?;
            }
        }
        Ok(common)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

// A clone carries the CRDT state only; listeners do not transfer.
impl Clone for Graph {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            observer: Observer::new(),
        }
    }
}

// Insertion order is not part of equality.
impl PartialEq for Graph {
    fn eq(&self, other: &Self) -> bool {
        self.nodes.len() == other.nodes.len()
            && self
                .nodes
                .iter()
                .all(|(uid, node)| other.nodes.get(uid) == Some(node))
    }
}

impl core::fmt::Debug for Graph {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes)
            .field("listeners", &self.observer.len())
            .finish()
    }
}

impl Serialize for Graph {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.nodes.len()))?;
        for (uid, node) in &self.nodes {
            map.serialize_entry(uid, node)?;
        }
        map.end()
    }
}

struct GraphVisitor;

impl<'de> Visitor<'de> for GraphVisitor {
    type Value = Graph;

    fn expecting(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("a graph object keyed by uid")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Graph, A::Error> {
        let mut graph = Graph::new();
        while let Some(uid) = access.next_key::<String>()? {
            let node = access.next_value::<Node>()?;
            if node.uid() != uid {
                return Err(de::Error::custom(format!(
                    "member {uid:?} carries uid {:?}",
                    node.uid()
                )));
            }
            graph.nodes.insert(uid, node);
        }
        Ok(graph)
    }
}

impl<'de> Deserialize<'de> for Graph {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(GraphVisitor)
    }
}
