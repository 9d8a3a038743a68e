//! Lamport clocks for field versioning.
//!
//! Every field carries a [`Lamport`] scalar that advances on each local write
//! to that field. Clock comparison decides merges outright; only equal clocks
//! fall through to the [resolver](crate::resolver). A zero clock means the
//! field is absent — present fields always carry a state of at least 1.
//!
//! # Example
//!
//! ```
//! use crdt_graph::Lamport;
//!
//! let absent = Lamport::ZERO;
//! let first = absent.tick();
//! let second = first.tick();
//!
//! assert!(absent < first);
//! assert_eq!(second.get(), 2);
//! assert_eq!(first.join(second), second);
//! ```

use core::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// A per-field Lamport clock.
///
/// A monotonic non-negative counter with no wall-clock component. Serialized
/// as a bare integer on the wire; fractional input is accepted on read and
/// truncated toward zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lamport(u64);

impl Lamport {
    /// The zero clock: the state of an absent field.
    pub const ZERO: Lamport = Lamport(0);

    /// Create a clock at an explicit value.
    #[must_use]
    pub fn new(state: u64) -> Self {
        Self(state)
    }

    /// The raw counter value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    /// Advance the clock by one step, as a local write does.
    ///
    /// Saturates at `u64::MAX` rather than wrapping, so a clock can never
    /// move backwards.
    #[must_use]
    pub fn tick(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// The least upper bound of two clocks.
    #[must_use]
    pub fn join(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    /// Whether this clock marks an absent field.
    #[must_use]
    pub fn is_absent(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Lamport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Lamport {
    fn from(state: u64) -> Self {
        Self(state)
    }
}

impl Serialize for Lamport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

struct LamportVisitor;

impl Visitor<'_> for LamportVisitor {
    type Value = Lamport;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative integer state")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Lamport, E> {
        Ok(Lamport(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Lamport, E> {
        if v < 0 {
            return Err(E::custom(format!("negative state: {v}")));
        }
        Ok(Lamport(v as u64))
    }

    // Fractional states appear in wire data from loose encoders. They are
    // accepted and truncated toward zero.
    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Lamport, E> {
        if !v.is_finite() || v < 0.0 {
            return Err(E::custom(format!("invalid state: {v}")));
        }
        Ok(Lamport(v as u64))
    }
}

impl<'de> Deserialize<'de> for Lamport {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_u64(LamportVisitor)
    }
}
