use std::fmt;
use std::sync::Arc;

use crate::core::{ArcStr, Hash32};

/// Identifier of a node in the working graph.
///
/// Keys are a closed set of shapes so that they can be hashed and compared
/// without looking at user data:
///
/// * [`Key::Name`] is a plain string key, e.g. `"total"`.
/// * [`Key::Chunk`] is a name followed by integer indices, the shape used
///   for the pieces of a chunked collection, e.g. `("sum-a31f", 0, 2)`.
/// * [`Key::Derived`] is a synthetic key created while flattening a graph.
///   It is the digest of the sub-expression it stands for, and never
///   collides with keys supplied by the caller.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Name(ArcStr),
    Chunk(ArcStr, Box<[i64]>),
    Derived(Hash32),
}

impl Key {
    pub fn name(name: impl Into<ArcStr>) -> Self {
        Key::Name(name.into())
    }

    pub fn chunk(name: impl Into<ArcStr>, indices: impl IntoIterator<Item = i64>) -> Self {
        Key::Chunk(name.into(), indices.into_iter().collect())
    }

    /// Whether the key was generated by the evaluator rather than the caller.
    pub fn is_derived(&self) -> bool {
        matches!(self, Key::Derived(_))
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Name(Arc::from(value))
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Name(Arc::from(value))
    }
}

impl<const N: usize> From<(&str, [i64; N])> for Key {
    fn from((name, indices): (&str, [i64; N])) -> Self {
        Key::chunk(name, indices)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(name) => f.write_str(name),
            Key::Chunk(name, indices) => {
                write!(f, "({name}")?;
                for index in indices.iter() {
                    write!(f, ", {index}")?;
                }
                f.write_str(")")
            }
            Key::Derived(hash) => write!(f, "~{}", &hash.to_hex()[..12]),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}
