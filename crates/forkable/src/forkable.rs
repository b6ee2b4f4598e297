//! The fork-aware step state machine.

use crate::{
    ForkDB, ForkNode, ForkableBlock, ForkableError, ForkableObject, ForkableResult,
    object::empty_batch,
};
use chainstream_types::{
    Block, BlockRef, Cursor, Handler, HandlerResult, PreprocessedBlock, Step, Steps,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fatal threshold for blocks that cannot be linked to the DAG.
const MAX_CONSECUTIVE_UNLINKABLE_BLOCKS: u32 = 20;

/// A fork-aware stage that turns a raw block stream into a step-annotated
/// event stream.
///
/// Every incoming block is inserted into the internal [`ForkDB`], the
/// longest chain is recomputed, and the resulting Undo/New/Irreversible/
/// Stalled events are delivered to the downstream handler in order. The
/// stage also answers cursor-resume queries over its current state.
///
/// # Locking
///
/// [`process_block`](Self::process_block) holds an internal write lock for
/// its entire duration and invokes the downstream handler *while holding
/// it*. Handlers must not call back into the same `Forkable`, or the call
/// will deadlock. The read-only queries take the read lock and can run
/// concurrently with each other.
pub struct Forkable<H, O> {
    inner: RwLock<Inner<H, O>>,
}

impl<H, O> std::fmt::Debug for Forkable<H, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forkable").finish_non_exhaustive()
    }
}

struct Inner<H, O> {
    handler: H,
    forkdb: ForkDB<ForkableBlock<O>>,
    last_block_sent: Option<Arc<Block>>,
    last_lib_seen: BlockRef,
    filter_steps: Steps,

    ensure_block_flows: BlockRef,
    ensure_block_flowed: bool,
    ensure_all_blocks_trigger_longest_chain: bool,

    hold_blocks_until_lib: bool,
    kept_final_blocks: u64,
    include_initial_lib: bool,

    consecutive_unlinkable_blocks: u32,
    last_longest_chain: Option<Vec<ForkNode>>,
}

/// Builder for [`Forkable`] instances.
///
/// All options are optional; [`build`](Self::build) attaches the
/// downstream handler.
#[derive(Debug, Clone)]
pub struct ForkableBuilder {
    filter_steps: Steps,
    ensure_block_flows: BlockRef,
    ensure_all_blocks_trigger_longest_chain: bool,
    hold_blocks_until_lib: bool,
    kept_final_blocks: u64,
    initial_lib: Option<BlockRef>,
    include_initial_lib: bool,
}

impl Default for ForkableBuilder {
    fn default() -> Self {
        Self {
            filter_steps: Steps::all(),
            ensure_block_flows: BlockRef::empty(),
            ensure_all_blocks_trigger_longest_chain: false,
            hold_blocks_until_lib: false,
            kept_final_blocks: 0,
            initial_lib: None,
            include_initial_lib: false,
        }
    }
}

impl ForkableBuilder {
    /// Create a builder with default options: all steps emitted, no
    /// retention below the LIB, no preset LIB.
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit only the given step kinds. Suppressed steps are still computed
    /// (the DAG and LIB advance normally) but not delivered.
    #[must_use]
    pub const fn filter_steps(mut self, steps: Steps) -> Self {
        self.filter_steps = steps;
        self
    }

    /// Guarantee the given block is emitted as New at least once before
    /// any LIB processing yields. Until it flows, longest-chain resolution
    /// targets it instead of the incoming block.
    #[must_use]
    pub fn ensure_block_flows(mut self, block: BlockRef) -> Self {
        self.ensure_block_flows = block;
        self
    }

    /// Re-evaluate the longest chain on every block, even those at or
    /// below the last sent block number.
    #[must_use]
    pub const fn ensure_all_blocks_trigger_longest_chain(mut self) -> Self {
        self.ensure_all_blocks_trigger_longest_chain = true;
        self
    }

    /// Do not deliver anything until a LIB is established.
    #[must_use]
    pub const fn hold_blocks_until_lib(mut self) -> Self {
        self.hold_blocks_until_lib = true;
        self
    }

    /// Retain this many blocks below the LIB when purging.
    #[must_use]
    pub const fn kept_final_blocks(mut self, kept: u64) -> Self {
        self.kept_final_blocks = kept;
        self
    }

    /// Establish the LIB up front, without emitting the LIB block itself.
    /// Streaming starts at its children.
    #[must_use]
    pub fn with_exclusive_lib(mut self, lib: BlockRef) -> Self {
        self.initial_lib = Some(lib);
        self.include_initial_lib = false;
        self
    }

    /// Establish the LIB up front and emit the LIB block itself as
    /// NewIrreversible when it arrives (bootstrap).
    #[must_use]
    pub fn with_inclusive_lib(mut self, lib: BlockRef) -> Self {
        self.initial_lib = Some(lib);
        self.include_initial_lib = true;
        self
    }

    /// Attach the downstream handler and build the stage.
    pub fn build<H, O>(self, handler: H) -> Forkable<H, O>
    where
        H: Handler<ForkableObject<O>>,
        O: Clone + Send,
    {
        let mut forkdb = ForkDB::new();
        if let Some(lib) = &self.initial_lib {
            forkdb.set_lib(lib.clone(), "", lib.num());
        }

        Forkable {
            inner: RwLock::new(Inner {
                handler,
                forkdb,
                last_block_sent: None,
                last_lib_seen: BlockRef::empty(),
                filter_steps: self.filter_steps,
                ensure_block_flows: self.ensure_block_flows,
                ensure_block_flowed: false,
                ensure_all_blocks_trigger_longest_chain: self
                    .ensure_all_blocks_trigger_longest_chain,
                hold_blocks_until_lib: self.hold_blocks_until_lib,
                kept_final_blocks: self.kept_final_blocks,
                include_initial_lib: self.include_initial_lib,
                consecutive_unlinkable_blocks: 0,
                last_longest_chain: None,
            }),
        }
    }
}

impl<H, O> Forkable<H, O>
where
    H: Handler<ForkableObject<O>>,
    O: Clone + Send,
{
    /// Build a stage with default options around the given handler.
    pub fn new(handler: H) -> Self {
        ForkableBuilder::new().build(handler)
    }

    /// Process one block through the fork-aware state machine.
    ///
    /// Holds the internal write lock for the whole call, including the
    /// downstream handler invocations. See the type-level locking notes.
    pub fn process_block(&self, block: Arc<Block>, obj: O) -> ForkableResult<()> {
        self.inner.write().process_block(block, obj)
    }

    /// The last block delivered downstream, if any.
    pub fn last_block_sent(&self) -> Option<BlockRef> {
        self.inner.read().last_block_sent.as_ref().map(|b| b.to_ref())
    }

    /// The current LIB of the internal fork database (empty until
    /// established).
    pub fn lib_ref(&self) -> BlockRef {
        self.inner.read().forkdb.lib_ref().clone()
    }

    /// Every block from `from` up to the current head on the canonical
    /// chain, labelled NewIrreversible up to the LIB and New above it.
    ///
    /// Returns `None` when the stage cannot serve the request (no LIB yet,
    /// no chain sent yet, or the head does not link down to the LIB).
    pub fn blocks_from_final(
        &self,
        from: &BlockRef,
    ) -> Option<Vec<(Arc<Block>, ForkableObject<O>)>> {
        self.inner.read().blocks_from_final(from)
    }

    /// The step events bringing a consumer from `cursor` onto the current
    /// canonical chain: irreversible catch-up below the LIB, New blocks up
    /// to the head, and Undo hops first when the cursor sits on a fork.
    ///
    /// Returns `None` when the journey cannot be reconstructed from the
    /// in-memory DAG; the caller must restart from a lower point.
    pub fn blocks_from_cursor(
        &self,
        cursor: &Cursor,
    ) -> Option<Vec<(Arc<Block>, ForkableObject<O>)>> {
        self.inner.read().blocks_from_cursor(cursor)
    }
}

impl<H, O> Handler<O> for Forkable<H, O>
where
    H: Handler<ForkableObject<O>>,
    O: Clone + Send,
{
    fn process_block(&mut self, block: Arc<Block>, obj: O) -> HandlerResult {
        Forkable::process_block(self, block, obj).map_err(Into::into)
    }
}

impl<H, O> Inner<H, O>
where
    H: Handler<ForkableObject<O>>,
    O: Clone + Send,
{
    fn process_block(&mut self, block: Arc<Block>, obj: O) -> ForkableResult<()> {
        if block.id == block.previous_id {
            return Err(ForkableError::SelfParenting { block: block.to_ref() });
        }

        // tolerate replays of already-final blocks
        if block.num < self.forkdb.lib_num() && self.last_block_sent.is_some() {
            return Ok(());
        }

        let triggers_new_longest_chain = self.triggers_new_longest_chain(&block);
        debug!(block = %block, new_longest_chain = triggers_new_longest_chain, "processing block");

        if self.include_initial_lib
            && self.last_block_sent.is_none()
            && block.id == self.forkdb.lib_id()
        {
            return self.process_initial_inclusive_irreversible_block(block, obj);
        }

        // chain-switch segments are resolved against the pre-insertion state
        let mut undos = Vec::new();
        let mut redos = Vec::new();
        if self.filter_steps.intersects(Steps::UNDO) && triggers_new_longest_chain {
            if let Some(last_sent) = &self.last_block_sent {
                let last_sent_id = last_sent.id.clone();
                (undos, redos) =
                    self.sent_chain_switch_segments(&last_sent_id, &block.previous_id)?;
            }
        }

        let exists = self.forkdb.add_link(
            block.to_ref(),
            block.previous_id.clone(),
            ForkableBlock::new(block.clone(), obj),
        );
        if exists {
            return Ok(());
        }

        let mut first_irreversible_block: Option<ForkNode> = None;
        if !self.forkdb.has_lib() {
            self.forkdb.set_lib(block.to_ref(), &block.previous_id, block.lib_num);
            if self.forkdb.has_lib() {
                if self.forkdb.lib_num() == block.num {
                    // the block that just came in was itself resolved as the
                    // LIB; it is the first streamable block and must flow
                    let obj = self
                        .forkdb
                        .object(&block.id)
                        .map(|fb| fb.obj.clone())
                        .ok_or_else(|| ForkableError::MissingBlock(block.id.clone()))?;
                    return self.process_initial_inclusive_irreversible_block(block, obj);
                }
                first_irreversible_block = self.forkdb.node(&self.forkdb.lib_id().to_owned());
            } else if self.hold_blocks_until_lib {
                return Ok(());
            }
        }

        self.compute_new_longest_chain(&block);
        if self.last_longest_chain.is_none() && self.forkdb.has_lib() {
            self.consecutive_unlinkable_blocks += 1;
            if self.consecutive_unlinkable_blocks > MAX_CONSECUTIVE_UNLINKABLE_BLOCKS {
                warn!(block = %block, forkdb_size = self.forkdb.len(), "too many consecutive unlinkable blocks");
                return Err(ForkableError::UnlinkableFlood { block: block.to_ref() });
            }
        } else {
            self.consecutive_unlinkable_blocks = 0;
        }

        let chain_len = self.last_longest_chain.as_ref().map_or(0, Vec::len);
        if !triggers_new_longest_chain || chain_len == 0 {
            return Ok(());
        }
        debug!(
            chain_length = chain_len,
            undos_length = undos.len(),
            redos_length = redos.len(),
            "got longest chain"
        );

        if self.filter_steps.intersects(Steps::UNDO) {
            self.process_batch(block.to_ref(), undos, Step::Undo)?;
        }
        if self.filter_steps.intersects(Steps::NEW) {
            self.process_batch(block.to_ref(), redos, Step::New)?;
        }

        let chain = self.last_longest_chain.take().unwrap_or_default();
        let sent = self.process_new_blocks(&chain);
        self.last_longest_chain = Some(chain);
        sent?;

        let Some(last_sent) = self.last_block_sent.clone() else { return Ok(()) };
        if !self.forkdb.has_lib() {
            return Ok(());
        }

        // from here on a LIB is established; see if it advances
        let new_lib_num = last_sent.lib_num;
        let lib_ref = self.forkdb.block_in_current_chain(last_sent.to_ref(), new_lib_num);
        if lib_ref.is_empty() {
            // the LIB was set initially and the lib-to-head buffer is not
            // filled yet
            debug!(new_head_block = %last_sent, new_lib_num, "missing links to reach lib num");
            return Ok(());
        }

        let (has_new, mut irreversible_segment, stalled_blocks) =
            self.forkdb.has_new_irreversible_segment(&lib_ref);
        let had_first = first_irreversible_block.is_some();
        if let Some(first) = first_irreversible_block {
            irreversible_segment.push(first);
        }
        if !has_new && !had_first {
            return Ok(());
        }

        // resolve payloads before the purge below can drop them
        let irreversible_group = self.resolve_segment(&irreversible_segment)?;
        let stalled_group = self.resolve_segment(&stalled_blocks)?;

        debug!(lib = %lib_ref, "moving lib");
        self.forkdb.move_lib(lib_ref);
        let purged = self.forkdb.purge_before_lib(self.kept_final_blocks);
        if !purged.is_empty() {
            debug!(purged = purged.len(), "purged blocks below lib");
        }

        self.process_irreversible_segment(irreversible_group, block.to_ref())?;
        self.process_stalled_segment(stalled_group, block.to_ref())?;

        Ok(())
    }

    /// Resolve the stored block and object for each node of a segment.
    fn resolve_segment(&self, nodes: &[ForkNode]) -> ForkableResult<Vec<(Arc<Block>, O)>> {
        let mut group = Vec::with_capacity(nodes.len());
        for node in nodes {
            let Some(fb) = self.forkdb.object(&node.id) else {
                return Err(ForkableError::MissingBlock(node.id.clone()));
            };
            group.push((fb.block.clone(), fb.obj.clone()));
        }
        Ok(group)
    }

    fn triggers_new_longest_chain(&self, block: &Block) -> bool {
        self.ensure_all_blocks_trigger_longest_chain
            || self.last_block_sent.as_ref().is_none_or(|last| block.num > last.num)
    }

    fn target_chain_block(&self, block: &Block) -> BlockRef {
        if !self.ensure_block_flows.is_empty() && !self.ensure_block_flowed {
            self.ensure_block_flows.clone()
        } else {
            block.to_ref()
        }
    }

    fn block_flowed(&mut self, block: &BlockRef) {
        if self.ensure_block_flows.is_empty() || self.ensure_block_flowed {
            return;
        }
        if block.id() == self.ensure_block_flows.id() {
            self.ensure_block_flowed = true;
        }
    }

    fn compute_new_longest_chain(&mut self, block: &Block) {
        if let Some(chain) = &mut self.last_longest_chain {
            // appending linearly skips the segment walk, unless the LIB
            // moved since the chain was computed (it must then re-anchor)
            let linear = chain.last().is_some_and(|tail| tail.id == block.previous_id)
                && chain.first().is_some_and(|root| root.previous_id == self.forkdb.lib_id());
            if linear {
                chain.push(ForkNode {
                    id: block.id.clone(),
                    num: block.num,
                    previous_id: block.previous_id.clone(),
                });
                return;
            }
        }

        let target = self.target_chain_block(block);
        self.last_longest_chain = self.forkdb.reversible_segment(target);
    }

    fn last_lib_sent_ref(&self) -> BlockRef {
        if !self.last_lib_seen.is_empty() {
            self.last_lib_seen.clone()
        } else {
            self.forkdb.lib_ref().clone()
        }
    }

    fn sent_chain_switch_segments(
        &self,
        current_head_id: &str,
        new_heads_previous_id: &str,
    ) -> ForkableResult<(Vec<(Arc<Block>, O)>, Vec<(Arc<Block>, O)>)> {
        if current_head_id == new_heads_previous_id {
            return Ok((Vec::new(), Vec::new()));
        }

        let (undo_ids, redo_ids) =
            self.forkdb.chain_switch_segments(current_head_id, new_heads_previous_id);
        let undos = self.sent_chain_segment(&undo_ids, false)?;
        let redos = self.sent_chain_segment(&redo_ids, true)?;
        Ok((undos, redos))
    }

    fn sent_chain_segment(
        &self,
        ids: &[String],
        doing_redos: bool,
    ) -> ForkableResult<Vec<(Arc<Block>, O)>> {
        let mut out = Vec::new();
        for id in ids {
            let Some(fb) = self.forkdb.object(id) else {
                return Err(ForkableError::MissingBlock(id.clone()));
            };
            if doing_redos && !fb.sent_as_new {
                continue;
            }
            out.push((fb.block.clone(), fb.obj.clone()));
        }
        Ok(out)
    }

    fn emit(&mut self, block: Arc<Block>, fo: ForkableObject<O>) -> ForkableResult<()> {
        let step = fo.step;
        let block_ref = block.to_ref();
        self.handler
            .process_block(block, fo)
            .map_err(|source| ForkableError::Handler { block: block_ref, step, source })
    }

    fn process_batch(
        &mut self,
        head_block: BlockRef,
        blocks: Vec<(Arc<Block>, O)>,
        step: Step,
    ) -> ForkableResult<()> {
        if blocks.is_empty() {
            return Ok(());
        }

        let step_blocks: Arc<[PreprocessedBlock<O>]> = blocks
            .iter()
            .map(|(block, obj)| PreprocessedBlock::new(block.clone(), obj.clone()))
            .collect();
        let step_count = blocks.len();

        for (step_index, (block, obj)) in blocks.into_iter().enumerate() {
            let fo = ForkableObject {
                step,
                head_block: head_block.clone(),
                block: block.to_ref(),
                last_lib_sent: self.last_lib_sent_ref(),
                step_index,
                step_count,
                step_blocks: step_blocks.clone(),
                obj,
            };
            debug!(block = %block, step = %step, "sending block");
            self.emit(block, fo)?;
        }
        Ok(())
    }

    fn process_new_blocks(&mut self, chain: &[ForkNode]) -> ForkableResult<()> {
        let Some(head) = chain.last() else { return Ok(()) };
        let head_block = head.as_ref();

        for node in chain {
            let Some((block, obj, sent_as_new)) = self
                .forkdb
                .object(&node.id)
                .map(|fb| (fb.block.clone(), fb.obj.clone(), fb.sent_as_new))
            else {
                return Err(ForkableError::MissingBlock(node.id.clone()));
            };
            if sent_as_new {
                continue;
            }

            if self.filter_steps.intersects(Steps::NEW) {
                let fo = ForkableObject {
                    step: Step::New,
                    head_block: head_block.clone(),
                    block: block.to_ref(),
                    last_lib_sent: self.last_lib_sent_ref(),
                    step_index: 0,
                    step_count: 0,
                    step_blocks: empty_batch(),
                    obj,
                };
                debug!(block = %block, "sending block as new to consumer");
                self.emit(block.clone(), fo)?;
            }

            self.block_flowed(&block.to_ref());
            if let Some(fb) = self.forkdb.object_mut(&node.id) {
                fb.sent_as_new = true;
            }
            self.last_block_sent = Some(block);
        }
        Ok(())
    }

    fn process_initial_inclusive_irreversible_block(
        &mut self,
        block: Arc<Block>,
        obj: O,
    ) -> ForkableResult<()> {
        let block_ref = block.to_ref();
        debug!(block = %block, "sending initial inclusive irreversible block");

        if self.filter_steps.intersects(Steps::NEW_IRREVERSIBLE) {
            let step_blocks: Arc<[PreprocessedBlock<O>]> =
                vec![PreprocessedBlock::new(block.clone(), obj.clone())].into();
            let fo = ForkableObject {
                step: Step::NewIrreversible,
                head_block: block_ref.clone(),
                block: block_ref.clone(),
                // this block is the LIB
                last_lib_sent: block_ref.clone(),
                step_index: 0,
                step_count: 1,
                step_blocks,
                obj,
            };
            self.emit(block.clone(), fo)?;
        }

        self.block_flowed(&block_ref);
        if let Some(fb) = self.forkdb.object_mut(&block.id) {
            fb.sent_as_new = true;
        }
        self.last_lib_seen = block_ref;
        self.last_block_sent = Some(block);
        Ok(())
    }

    fn process_irreversible_segment(
        &mut self,
        segment: Vec<(Arc<Block>, O)>,
        head_block: BlockRef,
    ) -> ForkableResult<()> {
        if segment.is_empty() {
            return Ok(());
        }

        let last_ref = segment.last().map(|(block, _)| block.to_ref());

        if self.filter_steps.intersects(Steps::IRREVERSIBLE) {
            let step_blocks: Arc<[PreprocessedBlock<O>]> = segment
                .iter()
                .map(|(block, obj)| PreprocessedBlock::new(block.clone(), obj.clone()))
                .collect();
            let step_count = segment.len();

            for (step_index, (block, obj)) in segment.into_iter().enumerate() {
                let fo = ForkableObject {
                    step: Step::Irreversible,
                    head_block: head_block.clone(),
                    block: block.to_ref(),
                    // the emitted block is itself the last LIB sent
                    last_lib_sent: block.to_ref(),
                    step_index,
                    step_count,
                    step_blocks: step_blocks.clone(),
                    obj,
                };
                debug!(block = %block, "sending block as irreversible");
                self.emit(block, fo)?;
            }
        }

        // the cursor LIB always tracks the last irreversible block, even
        // when irreversible steps are filtered out
        if let Some(last) = last_ref {
            self.last_lib_seen = last;
        }
        Ok(())
    }

    fn process_stalled_segment(
        &mut self,
        stalled: Vec<(Arc<Block>, O)>,
        head_block: BlockRef,
    ) -> ForkableResult<()> {
        if stalled.is_empty() || !self.filter_steps.intersects(Steps::STALLED) {
            return Ok(());
        }

        let step_blocks: Arc<[PreprocessedBlock<O>]> = stalled
            .iter()
            .map(|(block, obj)| PreprocessedBlock::new(block.clone(), obj.clone()))
            .collect();
        let step_count = stalled.len();

        for (step_index, (block, obj)) in stalled.into_iter().enumerate() {
            let fo = ForkableObject {
                step: Step::Stalled,
                head_block: head_block.clone(),
                block: block.to_ref(),
                last_lib_sent: self.last_lib_seen.clone(),
                step_index,
                step_count,
                step_blocks: step_blocks.clone(),
                obj,
            };
            debug!(block = %block, "sending block as stalled");
            self.emit(block, fo)?;
        }
        Ok(())
    }

    // --- read-only resume queries ---

    fn wrap_node(
        &self,
        node: &ForkNode,
        step: Step,
        head_block: BlockRef,
        last_lib_sent: BlockRef,
    ) -> Option<(Arc<Block>, ForkableObject<O>)> {
        let fb = self.forkdb.object(&node.id)?;
        Some((
            fb.block.clone(),
            ForkableObject {
                step,
                head_block,
                block: node.as_ref(),
                last_lib_sent,
                step_index: 0,
                step_count: 0,
                step_blocks: empty_batch(),
                obj: fb.obj.clone(),
            },
        ))
    }

    fn blocks_from_final(&self, from: &BlockRef) -> Option<Vec<(Arc<Block>, ForkableObject<O>)>> {
        if !self.forkdb.has_lib() {
            return None;
        }
        self.last_longest_chain.as_ref()?;
        let head = self.last_block_sent.as_ref()?.to_ref();

        let segment = self.forkdb.complete_segment(head.clone())?;
        let lib_num = self.forkdb.lib_num();

        let mut out = Vec::new();
        let mut seen = false;
        for node in &segment {
            if !seen && node.num == from.num() && node.id == from.id() {
                seen = true;
            }
            if !seen {
                continue;
            }

            // never hand out a cursor whose LIB is above its own block
            let mut lib = self.forkdb.lib_ref().clone();
            if lib.num() > node.num {
                lib = node.as_ref();
            }
            let step = if node.num <= lib_num { Step::NewIrreversible } else { Step::New };
            out.push(self.wrap_node(node, step, head.clone(), lib)?);
        }
        Some(out)
    }

    fn blocks_from_cursor(&self, cursor: &Cursor) -> Option<Vec<(Arc<Block>, ForkableObject<O>)>> {
        if !self.forkdb.has_lib() {
            return None;
        }
        let head = self.last_block_sent.as_ref()?.to_ref();
        let segment = self.forkdb.complete_segment(head.clone())?;
        let in_segment = |id: &str| segment.iter().any(|n| n.id == id);

        // the cursor is not forked: bring it straight to the head
        if in_segment(cursor.block.id()) && in_segment(cursor.lib.id()) {
            let lib_num = self.forkdb.lib_num();
            let mut out = Vec::new();
            for node in &segment {
                if node.num <= cursor.lib.num() {
                    continue;
                }

                // irreversible notifications up to the current LIB
                if node.num <= lib_num {
                    let step = if node.num > cursor.block.num() {
                        Step::NewIrreversible
                    } else {
                        Step::Irreversible
                    };
                    out.push(self.wrap_node(node, step, head.clone(), node.as_ref())?);
                }

                // new blocks from the cursor's block up to the head
                if node.num > cursor.block.num() {
                    out.push(self.wrap_node(
                        node,
                        Step::New,
                        head.clone(),
                        self.forkdb.lib_ref().clone(),
                    )?);
                }
            }
            return Some(out);
        }

        // the cursor is forked: unwind its branch back onto the canonical
        // chain, then catch up from the junction
        let mut undos = Vec::new();
        let bound = self.forkdb.len() + 1;
        let mut block_id = cursor.block.id().to_owned();
        let mut hops = 0usize;
        loop {
            let node = self.forkdb.node(&block_id)?;

            let already_undone =
                block_id == cursor.block.id() && cursor.step == Some(Step::Undo);
            if !already_undone {
                undos.push(self.wrap_node(&node, Step::Undo, head.clone(), cursor.lib.clone())?);
            }

            block_id = node.previous_id;
            if in_segment(&block_id) {
                break;
            }
            hops += 1;
            if hops > bound {
                return None;
            }
        }

        let junction = self.forkdb.node(&block_id)?;
        let resume = Cursor::new(Step::New, junction.as_ref(), head, cursor.lib.clone());
        let mut tail = self.blocks_from_cursor(&resume)?;

        let mut out = undos;
        out.append(&mut tail);
        Some(out)
    }
}
