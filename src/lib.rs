//! # crdt-graph
//!
//! A delta-state graph CRDT for peer-to-peer replication of arbitrary,
//! interconnected JSON-compatible data.
//!
//! Replicas edit a [`Graph`] of [`Node`]s independently — possibly while
//! disconnected — and exchange the `{update, history}` deltas that every
//! merge returns. Any two replicas that have seen the same set of deltas, in
//! any order and any number of times, converge to identical state: each
//! field carries a Lamport clock, newer writes win outright, and equal-clock
//! writes are settled by a fixed deterministic tie-break.
//!
//! The library is embedded into host applications. It opens no sockets and
//! persists nothing; transport and storage consume the wire-format JSON that
//! [`Graph::source`] reads and serde emits.
//!
//! ## Quick Start
//!
//! ```
//! use crdt_graph::{Graph, Node};
//! use serde_json::json;
//!
//! # fn main() -> crdt_graph::Result<()> {
//! // A local write on one replica...
//! let mut profile = Node::with_uid("user-ada");
//! profile.update([("name", json!("Ada")), ("role", json!("admin"))])?;
//!
//! let mut alice = Graph::new();
//! let delta = alice.merge(&Graph::from_nodes([profile]))?;
//!
//! // ...replicates to another by shipping the delta.
//! let mut bob = Graph::new();
//! bob.merge(&delta.update)?;
//!
//! assert_eq!(
//!     bob.value("user-ada").unwrap().snapshot(),
//!     alice.value("user-ada").unwrap().snapshot(),
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Pieces
//!
//! - [`Graph`] - insertion-ordered collection of nodes; composes member
//!   merges into graph-level deltas
//! - [`Node`] - keyed collection of versioned fields; merge emits
//!   `update` / `history` / `conflict` events
//! - [`Entity`] - the field container underneath a node: reads, snapshots,
//!   delta computation, `overlap`, `rebase`
//! - [`Lamport`] - the per-field clock
//! - [`resolver`] - the deterministic equal-clock tie-break
//! - [`Observer`] - per-instance event subscription
//!
//! Merge is commutative, associative, and idempotent at the field level;
//! `tests/properties.rs` checks those laws with generated replicas.

#![warn(missing_docs)]

mod clock;
mod entity;
mod error;
mod field;
mod graph;
mod node;
mod observer;

pub mod prelude;
pub mod resolver;

pub use clock::Lamport;
pub use entity::{Entity, EntityDelta, RESERVED_KEY};
pub use error::{GraphError, Result};
pub use field::{FieldMeta, ObjectMeta};
pub use graph::{Graph, GraphDelta, GraphEvent};
pub use node::{Node, NodeDelta, NodeEvent};
pub use observer::{Observer, Subscription};
