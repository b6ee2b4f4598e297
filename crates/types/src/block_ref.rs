//! Block identifiers.

use crate::BlockNum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A reference to a block: its opaque id and its number.
///
/// Ids are opaque strings; two refs with the same number but different ids
/// are siblings on different forks. The [empty ref](Self::empty) (empty id,
/// number zero) is a distinguished "no block" value used before any block
/// is known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    id: String,
    num: BlockNum,
}

impl BlockRef {
    /// Create a new block reference.
    pub fn new(id: impl Into<String>, num: BlockNum) -> Self {
        Self { id: id.into(), num }
    }

    /// The distinguished empty reference (empty id, number zero).
    pub const fn empty() -> Self {
        Self { id: String::new(), num: 0 }
    }

    /// Whether this is the empty reference.
    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.num == 0
    }

    /// The block id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The block number.
    pub const fn num(&self) -> BlockNum {
        self.num
    }

    /// Decompose the reference into its id and number.
    pub fn into_parts(self) -> (String, BlockNum) {
        (self.id, self.num)
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(empty)");
        }
        write!(f, "#{} ({})", self.num, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ref() {
        let empty = BlockRef::empty();
        assert!(empty.is_empty());
        assert_eq!(empty.to_string(), "(empty)");
        assert!(!BlockRef::new("aa", 0).is_empty());
        assert_eq!(BlockRef::default(), BlockRef::empty());
    }

    #[test]
    fn display() {
        assert_eq!(BlockRef::new("00000002a", 2).to_string(), "#2 (00000002a)");
    }

    #[test]
    fn sibling_refs_differ() {
        assert_ne!(BlockRef::new("3a", 3), BlockRef::new("3b", 3));
        assert_eq!(BlockRef::new("3a", 3), BlockRef::new("3a", 3));
    }
}
