//! Types shared by the chainstream block streaming crates.
//!
//! These are the low-level building blocks of the block stream: block
//! identifiers ([`BlockRef`]), decoded blocks ([`Block`]), the step
//! taxonomy ([`Step`], [`Steps`]), the resume token ([`Cursor`]) and the
//! downstream consumer seam ([`Handler`]).

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

mod block;
pub use block::{Block, BlockNum, PreprocessedBlock};

mod block_ref;
pub use block_ref::BlockRef;

mod cursor;
pub use cursor::{Cursor, CursorError};

mod handler;
pub use handler::{Handler, HandlerError, HandlerFn, HandlerResult, handler_fn};

mod step;
pub use step::{Step, Steps};
