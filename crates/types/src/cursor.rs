//! The resume token carried by every emitted block.

use crate::{BlockRef, Step};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A stream resume token.
///
/// A cursor records the last delivered block, the head of the chain at the
/// time of delivery, and the last irreversible block sent, together with
/// the step the block was delivered under. Feeding a cursor back to a
/// source replays exactly the undos and news needed to move a consumer
/// from that point onto the current canonical chain.
///
/// Invariant (not enforced by construction): `lib.num ≤ block.num ≤
/// head_block.num`.
///
/// # Wire form
///
/// [`Display`](fmt::Display) and [`FromStr`] implement an opaque textual
/// form:
///
/// ```text
/// c1:<step>:<block_num>:<block_id>:<head_num>:<head_id>:<lib_num>:<lib_id>
/// ```
///
/// where `<step>` is the numeric step token. The empty cursor encodes as
/// the empty string. Block ids must not contain `:`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// The step the block was delivered under.
    pub step: Option<Step>,
    /// The delivered block.
    pub block: BlockRef,
    /// The head of the chain at delivery time.
    pub head_block: BlockRef,
    /// The last irreversible block sent at delivery time.
    pub lib: BlockRef,
}

impl Cursor {
    /// Create a new cursor.
    pub const fn new(step: Step, block: BlockRef, head_block: BlockRef, lib: BlockRef) -> Self {
        Self { step: Some(step), block, head_block, lib }
    }

    /// The distinguished empty cursor.
    pub const fn empty() -> Self {
        Self {
            step: None,
            block: BlockRef::empty(),
            head_block: BlockRef::empty(),
            lib: BlockRef::empty(),
        }
    }

    /// Whether this is the empty cursor.
    pub fn is_empty(&self) -> bool {
        self.step.is_none() || self.block.is_empty()
    }
}

/// Errors parsing a cursor wire form.
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    /// The cursor string does not have the expected shape.
    #[error("malformed cursor: {0}")]
    Malformed(String),

    /// The cursor version prefix is not recognized.
    #[error("unsupported cursor version: {0}")]
    UnsupportedVersion(String),

    /// The step token is not a valid step.
    #[error("invalid step token: {0}")]
    InvalidStep(String),

    /// A block number token is not a valid number.
    #[error("invalid block number: {0}")]
    InvalidBlockNum(String),
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(step) = self.step else { return Ok(()) };
        write!(
            f,
            "c1:{}:{}:{}:{}:{}:{}:{}",
            step.wire_token(),
            self.block.num(),
            self.block.id(),
            self.head_block.num(),
            self.head_block.id(),
            self.lib.num(),
            self.lib.id(),
        )
    }
}

impl FromStr for Cursor {
    type Err = CursorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::empty());
        }

        let parts: Vec<&str> = s.split(':').collect();
        let [version, step, block_num, block_id, head_num, head_id, lib_num, lib_id] = parts[..]
        else {
            return Err(CursorError::Malformed(s.to_owned()));
        };

        if version != "c1" {
            return Err(CursorError::UnsupportedVersion(version.to_owned()));
        }

        let token =
            step.parse::<u16>().map_err(|_| CursorError::InvalidStep(step.to_owned()))?;
        let step =
            Step::from_wire_token(token).ok_or_else(|| CursorError::InvalidStep(s.to_owned()))?;

        let num = |t: &str| t.parse().map_err(|_| CursorError::InvalidBlockNum(t.to_owned()));

        Ok(Self::new(
            step,
            BlockRef::new(block_id, num(block_num)?),
            BlockRef::new(head_id, num(head_num)?),
            BlockRef::new(lib_id, num(lib_num)?),
        ))
    }
}
