//! Convenient re-exports for common usage.
//!
//! ```
//! use crdt_graph::prelude::*;
//! ```

pub use crate::FieldMeta;
pub use crate::Graph;
pub use crate::GraphDelta;
pub use crate::GraphError;
pub use crate::GraphEvent;
pub use crate::Lamport;
pub use crate::Node;
pub use crate::NodeDelta;
pub use crate::NodeEvent;
pub use crate::Result;
