//! Trait seams for the external collaborators of the file source.
//!
//! The source is agnostic to where bundles live and how blocks are
//! encoded: [`ObjectStore`] abstracts the object store, and
//! [`BlockReaderFactory`] / [`BlockReader`] abstract the block codec.
//! [`BlockIndexer`] and [`Gator`] are optional filters.

use crate::SourceResult;
use chainstream_types::{Block, BlockNum};
use std::future::Future;
use tokio::io::AsyncRead;

/// Read access to a store of named byte objects.
///
/// All methods are async and return futures that are `Send`.
pub trait ObjectStore: Send + Sync + 'static {
    /// The reader returned for an opened object.
    type Reader: AsyncRead + Send + Unpin + 'static;

    /// Whether the named object exists.
    fn object_exists(&self, name: &str) -> impl Future<Output = SourceResult<bool>> + Send;

    /// Open the named object for reading.
    fn open_object(&self, name: &str) -> impl Future<Output = SourceResult<Self::Reader>> + Send;

    /// A human-readable path for the named object (diagnostics only).
    fn object_path(&self, name: &str) -> String;
}

/// Creates a [`BlockReader`] over a raw object reader.
pub trait BlockReaderFactory<R>: Send + Sync + 'static {
    /// The block reader produced by this factory.
    type Reader: BlockReader + Send + 'static;

    /// Wrap a raw reader into a block reader.
    fn new_reader(&self, reader: R) -> SourceResult<Self::Reader>;
}

/// Decodes blocks sequentially out of one bundle.
pub trait BlockReader: Send {
    /// Read the next block. `Ok(None)` signals the end of the bundle.
    fn read_block(&mut self) -> impl Future<Output = SourceResult<Option<Block>>> + Send;
}

/// A sparse index over the blocks worth streaming.
///
/// When attached to a source, whole bundles without relevant blocks are
/// skipped and only the indexed block numbers are forwarded.
pub trait BlockIndexer: Send + Sync {
    /// The relevant block numbers within `[base, base + bundle_size)`,
    /// sorted ascending.
    fn blocks_in_range(&self, base: BlockNum, bundle_size: u64) -> SourceResult<Vec<BlockNum>>;
}

/// A stateful block filter consulted before preprocessing.
///
/// Implementations are shared across tasks; stateful gates use interior
/// mutability.
pub trait Gator: Send + Sync {
    /// Whether the block may flow.
    fn pass(&self, block: &Block) -> bool;
}

/// A [`Gator`] that passes blocks at or above a threshold number.
#[derive(Debug, Clone, Copy)]
pub struct BlockNumGate {
    min_block_num: BlockNum,
}

impl BlockNumGate {
    /// Pass blocks numbered `min_block_num` or higher.
    pub const fn new(min_block_num: BlockNum) -> Self {
        Self { min_block_num }
    }
}

impl Gator for BlockNumGate {
    fn pass(&self, block: &Block) -> bool {
        block.num >= self.min_block_num
    }
}
