//! Decoded blocks and preprocessed blocks.

use crate::BlockRef;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// A block number.
pub type BlockNum = u64;

/// A decoded block record.
///
/// Blocks carry their own id, their parent's id, the last irreversible
/// block number they assert, and an opaque payload. A block whose id equals
/// its parent id is bad data and is rejected by the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The opaque block id.
    pub id: String,
    /// The block number.
    pub num: BlockNum,
    /// The id of the parent block.
    pub previous_id: String,
    /// The last irreversible block number asserted by this block.
    pub lib_num: BlockNum,
    /// The opaque block body.
    #[serde(default, skip_serializing_if = "Bytes::is_empty")]
    pub payload: Bytes,
}

impl Block {
    /// Create a new block with an empty payload.
    pub fn new(
        id: impl Into<String>,
        num: BlockNum,
        previous_id: impl Into<String>,
        lib_num: BlockNum,
    ) -> Self {
        Self { id: id.into(), num, previous_id: previous_id.into(), lib_num, payload: Bytes::new() }
    }

    /// Attach a payload to the block.
    #[must_use]
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }

    /// A reference to this block.
    ///
    /// Named `to_ref` rather than `as_ref` so calls through `Arc<Block>`
    /// do not resolve to [`AsRef`] on the `Arc` itself.
    pub fn to_ref(&self) -> BlockRef {
        BlockRef::new(self.id.clone(), self.num)
    }

    /// A reference to this block's parent.
    ///
    /// The parent number is not carried by the block; callers that need it
    /// must resolve it against their own view of the chain. The returned
    /// ref uses the parent id with this block's number minus one, which is
    /// only a hint on chains with number gaps.
    pub fn previous_ref(&self) -> BlockRef {
        BlockRef::new(self.previous_id.clone(), self.num.saturating_sub(1))
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.num, self.id)
    }
}

/// A block paired with the result of its preprocessing.
#[derive(Debug, Clone)]
pub struct PreprocessedBlock<O> {
    /// The decoded block.
    pub block: Arc<Block>,
    /// The preprocessing result attached to the block.
    pub obj: O,
}

impl<O> PreprocessedBlock<O> {
    /// Create a new preprocessed block.
    pub const fn new(block: Arc<Block>, obj: O) -> Self {
        Self { block, obj }
    }

    /// The number of the underlying block.
    pub fn num(&self) -> BlockNum {
        self.block.num
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refs() {
        let blk = Block::new("2a", 2, "1a", 1);
        assert_eq!(blk.to_ref(), BlockRef::new("2a", 2));
        assert_eq!(blk.previous_ref().id(), "1a");
        assert_eq!(blk.to_string(), "#2 (2a)");
    }

    #[test]
    fn serde_round_trip() {
        let blk = Block::new("2a", 2, "1a", 1).with_payload(Bytes::from_static(b"body"));
        let json = serde_json::to_string(&blk).unwrap();
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back, blk);
    }

    #[test]
    fn empty_payload_omitted() {
        let json = serde_json::to_string(&Block::new("2a", 2, "1a", 1)).unwrap();
        assert!(!json.contains("payload"));
    }
}
