//! The downstream consumer seam.

use crate::Block;
use std::sync::Arc;

/// Error type returned by handlers.
///
/// Handlers are external collaborators; their failures are carried opaquely
/// and abort the stream that invoked them.
pub type HandlerError = Box<dyn core::error::Error + Send + Sync + 'static>;

/// Result type alias for handler invocations.
pub type HandlerResult = Result<(), HandlerError>;

/// A downstream block consumer.
///
/// Handlers are invoked serially per source: a source never delivers the
/// next block before the previous call returned. The first error aborts
/// the source and is propagated to its driver.
///
/// The `O` parameter is the object delivered alongside each block; sources
/// and transformers each define their own (a file source delivers its
/// wrapped preprocessing result, a fork-aware stage delivers its step
/// object).
pub trait Handler<O>: Send {
    /// Process one block and its attached object.
    fn process_block(&mut self, block: Arc<Block>, obj: O) -> HandlerResult;
}

/// A [`Handler`] built from a closure. See [`handler_fn`].
#[derive(Debug, Clone, Copy)]
pub struct HandlerFn<F>(F);

/// Wrap a closure as a [`Handler`].
///
/// # Example
///
/// ```
/// use chainstream_types::{handler_fn, Block, Handler};
/// use std::sync::Arc;
///
/// let mut handler = handler_fn(|block: Arc<Block>, _obj: ()| {
///     println!("got {block}");
///     Ok(())
/// });
/// handler.process_block(Arc::new(Block::new("1a", 1, "0a", 1)), ()).unwrap();
/// ```
pub const fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn(f)
}

impl<O, F> Handler<O> for HandlerFn<F>
where
    F: FnMut(Arc<Block>, O) -> HandlerResult + Send,
{
    fn process_block(&mut self, block: Arc<Block>, obj: O) -> HandlerResult {
        (self.0)(block, obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_handlers() {
        let mut seen = Vec::new();
        let mut handler = handler_fn(|block: Arc<Block>, num: u64| {
            seen.push((block.id.clone(), num));
            Ok(())
        });

        let blk = Arc::new(Block::new("1a", 1, "0a", 1));
        handler.process_block(blk.clone(), 7).unwrap();
        handler.process_block(blk, 8).unwrap();
        drop(handler);
        assert_eq!(seen, vec![("1a".to_owned(), 7), ("1a".to_owned(), 8)]);
    }
}
