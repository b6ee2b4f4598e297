//! Objects attached to blocks flowing through the fork-aware stage.

use chainstream_types::{Block, BlockRef, Cursor, PreprocessedBlock, Step};
use std::sync::Arc;

/// A block and its upstream object as stored in the fork database.
#[derive(Debug, Clone)]
pub struct ForkableBlock<O> {
    /// The decoded block.
    pub block: Arc<Block>,
    /// The object that accompanied the block upstream.
    pub obj: O,
    /// Whether this block was already delivered under the New step.
    pub(crate) sent_as_new: bool,
}

impl<O> ForkableBlock<O> {
    pub(crate) const fn new(block: Arc<Block>, obj: O) -> Self {
        Self { block, obj, sent_as_new: false }
    }
}

/// The object delivered to the downstream handler with every emitted block.
///
/// Carries the step, the head block and LIB context needed to build a
/// resume [`Cursor`], the upstream object, and batch metadata when the
/// emission is part of a multi-block step (an undo segment, an
/// irreversible segment). For single-block steps `step_count` is zero and
/// `step_blocks` is empty.
#[derive(Debug, Clone)]
pub struct ForkableObject<O> {
    pub(crate) step: Step,
    pub(crate) head_block: BlockRef,
    pub(crate) block: BlockRef,
    pub(crate) last_lib_sent: BlockRef,
    pub(crate) step_index: usize,
    pub(crate) step_count: usize,
    pub(crate) step_blocks: Arc<[PreprocessedBlock<O>]>,
    pub(crate) obj: O,
}

impl<O> ForkableObject<O> {
    /// The step this block is delivered under.
    pub const fn step(&self) -> Step {
        self.step
    }

    /// The head of the chain at emission time.
    pub const fn head_block(&self) -> &BlockRef {
        &self.head_block
    }

    /// The emitted block.
    pub const fn block(&self) -> &BlockRef {
        &self.block
    }

    /// The last irreversible block sent at emission time.
    pub const fn last_lib_sent(&self) -> &BlockRef {
        &self.last_lib_sent
    }

    /// The index of this block within a multi-block step.
    pub const fn step_index(&self) -> usize {
        self.step_index
    }

    /// The total number of blocks in a multi-block step (zero for
    /// single-block steps).
    pub const fn step_count(&self) -> usize {
        self.step_count
    }

    /// Every block of a multi-block step, in step order.
    ///
    /// Receivers may batch work by acting only when `step_index == 0` or
    /// when `step_index + 1 == step_count`.
    pub fn step_blocks(&self) -> &[PreprocessedBlock<O>] {
        &self.step_blocks
    }

    /// The upstream object carried alongside the block.
    pub const fn obj(&self) -> &O {
        &self.obj
    }

    /// Consume the object, returning the upstream object.
    pub fn into_obj(self) -> O {
        self.obj
    }

    /// The resume cursor for this emission.
    ///
    /// Returns the empty cursor when any of the context references is
    /// missing.
    pub fn cursor(&self) -> Cursor {
        if self.block.is_empty() || self.head_block.is_empty() || self.last_lib_sent.is_empty() {
            return Cursor::empty();
        }
        Cursor::new(
            self.step,
            self.block.clone(),
            self.head_block.clone(),
            self.last_lib_sent.clone(),
        )
    }
}

pub(crate) fn empty_batch<O>() -> Arc<[PreprocessedBlock<O>]> {
    Arc::from(Vec::new())
}
