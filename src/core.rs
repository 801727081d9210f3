use std::any::Any;
use std::sync::Arc;

/// A type-erased, thread-safe container.
pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

/// Atomic reference-counted string type used for identifiers.
pub(crate) type ArcStr = Arc<str>;

/// A 32-byte BLAKE3 hash used for content-addressing.
///
/// In `vinegraph` it names the synthetic nodes created when a graph is
/// flattened. Two structurally identical sub-expressions hash to the same
/// digest, so a shared sub-expression becomes a single node and is computed
/// only once.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    /// Digest of anything implementing [`std::hash::Hash`], fed through BLAKE3.
    pub(crate) fn of<T: std::hash::Hash + ?Sized>(item: &T) -> Self {
        let mut hasher = Blake3Hasher::default();
        item.hash(&mut hasher);
        hasher.into()
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

#[derive(Default)]
pub(crate) struct Blake3Hasher(blake3::Hasher);

impl From<Blake3Hasher> for Hash32 {
    fn from(value: Blake3Hasher) -> Self {
        let bytes: [u8; 32] = value.0.finalize().into();
        Hash32::from(bytes)
    }
}

impl std::hash::Hasher for Blake3Hasher {
    fn finish(&self) -> u64 {
        let mut output = [0u8; 8];
        self.0.finalize_xof().fill(&mut output);
        u64::from_le_bytes(output)
    }

    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_is_lowercase_and_full_length() {
        let hash = Hash32::of("vinegraph");
        let hex = hash.to_hex();

        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_of_is_structural() {
        let a = Hash32::of(&("add", 1u64, 2u64));
        let b = Hash32::of(&("add", 1u64, 2u64));
        let c = Hash32::of(&("add", 2u64, 1u64));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
