//! Cursor reconciliation across a resume boundary.

use crate::{
    BlockReader, BlockReaderFactory, ObjectStore, SourceError, SourceObject, SourceResult,
};
use chainstream_types::{Block, Cursor, Handler, HandlerResult, Step};
use std::{
    collections::HashMap,
    sync::Arc,
};
use tracing::debug;

/// A handler wrapper that reconciles a resumed [`Cursor`] with the live
/// stream before becoming a pass-through.
///
/// A source resumed from a cursor starts streaming at the cursor's LIB.
/// This wrapper swallows the blocks the consumer already has, and when the
/// stream first passes the cursor's block it decides:
///
/// - the cursor sits on the canonical chain: any canonical blocks above it
///   are replayed, then every block passes through;
/// - the cursor sits on an abandoned fork: the fork ancestry is fetched
///   block by block from the one-block store (objects are keyed by block
///   id), Undo steps are emitted down to the junction, the canonical tail
///   is replayed, then every block passes through.
///
/// Fetching from the one-block store blocks the sink task, so the wrapper
/// must run inside a multi-thread tokio runtime.
pub struct CursorResolverHandler<S, F, H, O> {
    one_blocks_store: Arc<S>,
    reader_factory: Arc<F>,
    cursor: Cursor,
    handler: H,
    state: ResolverState<O>,
}

enum ResolverState<O> {
    /// Recording the stream up to the cursor's block.
    Resolving {
        /// Blocks seen so far, by id.
        seen: HashMap<String, (Arc<Block>, SourceObject<O>)>,
    },
    /// Reconciled; forwarding everything.
    PassThrough,
}

impl<S, F, H, O> std::fmt::Debug for CursorResolverHandler<S, F, H, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorResolverHandler").field("cursor", &self.cursor).finish_non_exhaustive()
    }
}

impl<S, F, H, O> CursorResolverHandler<S, F, H, O>
where
    S: ObjectStore,
    F: BlockReaderFactory<S::Reader>,
    H: Handler<SourceObject<O>>,
    O: Send,
{
    pub(crate) fn new(
        one_blocks_store: Arc<S>,
        reader_factory: Arc<F>,
        cursor: Cursor,
        handler: H,
    ) -> Self {
        Self {
            one_blocks_store,
            reader_factory,
            cursor,
            handler,
            state: ResolverState::Resolving { seen: HashMap::new() },
        }
    }

    fn unresolvable(&self, reason: impl Into<String>) -> SourceError {
        SourceError::CursorResolution {
            cursor: self.cursor.to_string(),
            reason: reason.into(),
        }
    }

    /// Fetch a single block by id from the one-block store.
    fn fetch_one_block(&self, id: &str) -> SourceResult<Arc<Block>> {
        let store = self.one_blocks_store.clone();
        let factory = self.reader_factory.clone();
        let name = id.to_owned();
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let reader = store.open_object(&name).await?;
                let mut block_reader = factory.new_reader(reader)?;
                match block_reader.read_block().await? {
                    Some(block) => Ok(Arc::new(block)),
                    None => Err(SourceError::InvalidData(format!(
                        "one-block object {name} holds no block"
                    ))),
                }
            })
        })
    }

    /// Reconcile the cursor against the first block past it.
    fn resolve(&mut self, block: Arc<Block>, obj: SourceObject<O>) -> HandlerResult {
        let ResolverState::Resolving { seen } =
            std::mem::replace(&mut self.state, ResolverState::PassThrough)
        else {
            return self.handler.process_block(block, obj);
        };

        // the canonical ancestry of the triggering block, newest first
        let mut canonical: Vec<String> = Vec::new();
        let mut cur = block.previous_id.clone();
        while let Some((ancestor, _)) = seen.get(&cur) {
            canonical.push(cur.clone());
            cur = ancestor.previous_id.clone();
        }

        if canonical.iter().any(|id| id == self.cursor.block.id()) {
            // cursor on the canonical chain: replay what lies above it
            debug!(cursor = %self.cursor, "cursor is on the canonical chain");
            let mut replay: Vec<String> = canonical
                .iter()
                .take_while(|id| *id != self.cursor.block.id())
                .cloned()
                .collect();
            replay.reverse();
            let mut seen = seen;
            for id in replay {
                let Some((replay_block, replay_obj)) = seen.remove(&id) else { continue };
                self.handler.process_block(replay_block, replay_obj)?;
            }
            return self.handler.process_block(block, obj);
        }

        // cursor on an abandoned fork: unwind it from the one-block store
        debug!(cursor = %self.cursor, "cursor is on a fork, unwinding");
        let mut undone: Vec<Arc<Block>> = Vec::new();
        let mut cur = self.cursor.block.id().to_owned();
        while !canonical.iter().any(|id| *id == cur) {
            let fork_block = self.fetch_one_block(&cur)?;
            if fork_block.num <= self.cursor.lib.num() {
                return Err(self
                    .unresolvable("fork ancestry walked below the cursor lib without a junction")
                    .into());
            }
            cur = fork_block.previous_id.clone();
            undone.push(fork_block);
        }
        let junction = cur;

        for (idx, fork_block) in undone.iter().enumerate() {
            if idx == 0 && self.cursor.step == Some(Step::Undo) {
                continue;
            }
            let undo_cursor = Cursor::new(
                Step::Undo,
                fork_block.to_ref(),
                fork_block.to_ref(),
                self.cursor.lib.clone(),
            );
            self.handler.process_block(
                fork_block.clone(),
                SourceObject { cursor: undo_cursor, obj: None },
            )?;
        }

        // replay the canonical tail above the junction, then the trigger
        let mut replay: Vec<String> =
            canonical.iter().take_while(|id| **id != junction).cloned().collect();
        replay.reverse();
        let mut seen = seen;
        for id in replay {
            let Some((replay_block, replay_obj)) = seen.remove(&id) else { continue };
            self.handler.process_block(replay_block, replay_obj)?;
        }
        self.handler.process_block(block, obj)
    }
}

impl<S, F, H, O> Handler<SourceObject<O>> for CursorResolverHandler<S, F, H, O>
where
    S: ObjectStore,
    F: BlockReaderFactory<S::Reader>,
    H: Handler<SourceObject<O>>,
    O: Send,
{
    fn process_block(&mut self, block: Arc<Block>, obj: SourceObject<O>) -> HandlerResult {
        match &mut self.state {
            ResolverState::PassThrough => self.handler.process_block(block, obj),
            ResolverState::Resolving { seen } => {
                if block.num <= self.cursor.block.num() {
                    // the consumer already has everything up to its cursor
                    seen.insert(block.id.clone(), (block, obj));
                    Ok(())
                } else {
                    self.resolve(block, obj)
                }
            }
        }
    }
}
