use thiserror::Error;

/// Errors surfaced by merge, resolution, and wire decoding.
///
/// All errors arise from caller input and are reported synchronously at the
/// call that introduced them. A failed merge leaves the receiver unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A value that cannot be canonicalized reached merge or the resolver.
    #[error("invalid value: {reason}")]
    InvalidValue {
        /// Why the value was rejected.
        reason: String,
    },

    /// A lookup assumed a node that is not in the graph.
    #[error("unknown uid: {uid}")]
    UnknownUid {
        /// The uid that was not found.
        uid: String,
    },

    /// Wire input is not shaped as a `GraphObject` / `NodeObject`.
    #[error("malformed wire data: {reason}")]
    MalformedWire {
        /// What was wrong with the input shape.
        reason: String,
    },
}

impl GraphError {
    pub(crate) fn invalid_value(reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedWire {
            reason: reason.into(),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, GraphError>;
