//! Error types for the file-backed block source.

use chainstream_types::{BlockRef, HandlerError};

/// Result type alias for source operations.
pub type SourceResult<T, E = SourceError> = Result<T, E>;

/// Error type for the file-backed block source.
///
/// A missing bundle is not an error: the source retries it indefinitely at
/// its retry delay. Everything below is fatal to the source and shuts it
/// down through the shutter; the first error wins.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// An object store or decoding i/o failure.
    #[error("object store i/o: {0}")]
    Io(#[from] std::io::Error),

    /// A bundle or one-block object contained undecodable data.
    #[error("invalid block data: {0}")]
    InvalidData(String),

    /// Processing of one bundle failed.
    #[error("processing of bundle {filename} failed: {source}")]
    Bundle {
        /// The bundle filename.
        filename: String,
        /// The underlying failure.
        #[source]
        source: Box<SourceError>,
    },

    /// The block index was queried beyond the configured stop block.
    #[error("cannot look up block index at base {base}: beyond stop block {stop}")]
    IndexBeyondStopBlock {
        /// The requested bundle base.
        base: u64,
        /// The configured stop block.
        stop: u64,
    },

    /// Preprocessing a block failed.
    #[error("preprocess block {block}: {source}")]
    Preprocess {
        /// The block being preprocessed.
        block: BlockRef,
        /// The preprocessor's error.
        #[source]
        source: HandlerError,
    },

    /// The downstream handler failed.
    #[error("process block failed: {0}")]
    Handler(#[source] HandlerError),

    /// A resumed cursor could not be reconciled with the stream.
    #[error("unable to resolve cursor {cursor}: {reason}")]
    CursorResolution {
        /// The wire form of the cursor being resolved.
        cursor: String,
        /// Why resolution failed.
        reason: String,
    },
}
