//! Fork-aware step emission over an in-memory block DAG.
//!
//! Blocks arriving from an upstream source in approximately head order are
//! inserted into a [`ForkDB`], the canonical (longest) chain is recomputed,
//! and a totally ordered stream of step-annotated events is emitted to a
//! downstream [`Handler`](chainstream_types::Handler):
//!
//! - **New**: first delivery of a block on the current best chain
//! - **Undo**: a previously delivered block is rolled back by a chain switch
//! - **Irreversible**: a previously delivered block became final
//! - **NewIrreversible**: a block delivered for the first time already final
//! - **Stalled**: a block that fell below the last irreversible block on a
//!   non-canonical branch
//!
//! # Architecture
//!
//! - [`ForkDB`] holds the DAG: id-keyed parent links, block numbers, and
//!   attached payloads. All operations are pure over its state.
//! - [`Forkable`] owns a `ForkDB` behind a read/write lock, drives the step
//!   state machine from [`Forkable::process_block`], and serves the
//!   cursor-resume queries [`Forkable::blocks_from_cursor`] and
//!   [`Forkable::blocks_from_final`].
//! - [`ForkDbSnapshot`] is the serializable form of a `ForkDB` for
//!   persistence across restarts.
//!
//! # Example
//!
//! ```ignore
//! use chainstream_forkable::ForkableBuilder;
//! use chainstream_types::Steps;
//!
//! let forkable = ForkableBuilder::new()
//!     .filter_steps(Steps::NEW.union(Steps::IRREVERSIBLE))
//!     .build(handler);
//!
//! for (block, obj) in source {
//!     forkable.process_block(block, obj)?;
//! }
//! ```

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
pub use error::{ForkableError, ForkableResult};

mod forkdb;
pub use forkdb::{ForkDB, ForkNode};

mod object;
pub use object::{ForkableBlock, ForkableObject};

mod forkable;
pub use forkable::{Forkable, ForkableBuilder};

mod snapshot;
pub use snapshot::{ForkDbSnapshot, PayloadKindError, SnapshotError, SnapshotPayload};
