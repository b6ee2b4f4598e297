//! File-backed block streaming out of an object store.
//!
//! Historical blocks live in fixed-size bundle files named by their
//! zero-padded base block number (e.g. `0000012300`). [`FileSource`] reads
//! those bundles in order, decodes them through an injected
//! [`BlockReaderFactory`], preprocesses blocks on a bounded task pool with
//! strictly ordered output, and delivers the stream to a
//! [`Handler`](chainstream_types::Handler). Missing bundles are retried
//! indefinitely; everything else fatal shuts the source down through a
//! single-shot [`Shutdown`] that keeps the first error.
//!
//! # Example
//!
//! ```ignore
//! use chainstream_source::FileSourceBuilder;
//!
//! let source = FileSourceBuilder::new(store, reader_factory, 100)
//!     .stop_block_num(500)
//!     .concurrent_preprocess(|block| Ok(block.payload.len()), 4)
//!     .build(handler);
//! source.run().await?;
//! ```
//!
//! Resuming from a [`Cursor`](chainstream_types::Cursor) goes through
//! [`FileSourceFactory::source_from_cursor`], which starts at the cursor's
//! LIB and reconciles the boundary with a [`CursorResolverHandler`].

#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    clippy::missing_const_for_fn,
    rustdoc::all
)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod error;
pub use error::{SourceError, SourceResult};

mod traits;
pub use traits::{BlockIndexer, BlockNumGate, BlockReader, BlockReaderFactory, Gator, ObjectStore};

mod shutdown;
pub use shutdown::Shutdown;

mod filesource;
pub use filesource::{
    DEFAULT_BUNDLE_SIZE, DEFAULT_RETRY_DELAY, FileSource, FileSourceBuilder, PreprocessFunc,
    SourceObject, SourceProgress, bundle_filename, open_files_count,
};

mod cursor_resolver;
pub use cursor_resolver::CursorResolverHandler;

mod factory;
pub use factory::FileSourceFactory;

/// In-memory store and codec for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mem;
