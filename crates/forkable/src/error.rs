//! Error types for fork-aware stream processing.

use chainstream_types::{BlockRef, HandlerError, Step};

/// Result type alias for fork-aware stream operations.
pub type ForkableResult<T, E = ForkableError> = Result<T, E>;

/// Error type for fork-aware stream operations.
#[derive(Debug, thiserror::Error)]
pub enum ForkableError {
    /// A block referenced itself as its own parent.
    #[error("invalid block id detected on block {block}: id equals previous id, bad data")]
    SelfParenting {
        /// The offending block.
        block: BlockRef,
    },

    /// Too many consecutive blocks could not be linked to the DAG.
    ///
    /// The upstream is most likely streaming a divergent chain.
    #[error("too many consecutive unlinkable blocks, last block {block}")]
    UnlinkableFlood {
        /// The last unlinkable block.
        block: BlockRef,
    },

    /// A block id expected in the fork database was not found.
    #[error("fork database has no block {0}")]
    MissingBlock(String),

    /// The downstream handler failed; the stream is aborted.
    #[error("process block {block} step={step}: {source}")]
    Handler {
        /// The block being delivered when the handler failed.
        block: BlockRef,
        /// The step the block was delivered under.
        step: Step,
        /// The handler's error.
        #[source]
        source: HandlerError,
    },
}
