//! The in-memory block DAG.
//!
//! Nodes are keyed by block id; edges are parent ids, not pointers, which
//! keeps purging trivial and sidesteps ownership cycles. Every traversal is
//! bounded by the size of the link map so a malformed DAG (a cycle) makes
//! walks fail closed instead of spinning.

use chainstream_types::{BlockNum, BlockRef};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A node of the fork DAG, without its attached payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkNode {
    /// The block id.
    pub id: String,
    /// The block number.
    pub num: BlockNum,
    /// The parent block id.
    pub previous_id: String,
}

impl ForkNode {
    /// A reference to this node's block.
    pub fn as_ref(&self) -> BlockRef {
        BlockRef::new(self.id.clone(), self.num)
    }
}

/// The in-memory DAG of recently seen blocks.
///
/// Tracks parent links, block numbers, an attached payload per node, and
/// the last irreversible block (LIB). Operations are pure over this state;
/// concurrency discipline is imposed by the enclosing
/// [`Forkable`](crate::Forkable) lock.
#[derive(Debug, Clone)]
pub struct ForkDB<T> {
    links: HashMap<String, String>,
    nums: HashMap<String, BlockNum>,
    objects: HashMap<String, T>,
    lib_ref: BlockRef,
}

impl<T> Default for ForkDB<T> {
    fn default() -> Self {
        Self {
            links: HashMap::new(),
            nums: HashMap::new(),
            objects: HashMap::new(),
            lib_ref: BlockRef::empty(),
        }
    }
}

impl<T> ForkDB<T> {
    /// Create an empty fork database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a LIB has been established.
    pub fn has_lib(&self) -> bool {
        !self.lib_ref.is_empty()
    }

    /// The current LIB reference (empty until established).
    pub const fn lib_ref(&self) -> &BlockRef {
        &self.lib_ref
    }

    /// The current LIB number (zero until established).
    pub const fn lib_num(&self) -> BlockNum {
        self.lib_ref.num()
    }

    /// The current LIB id (empty until established).
    pub fn lib_id(&self) -> &str {
        self.lib_ref.id()
    }

    /// The number of nodes in the DAG.
    pub fn len(&self) -> usize {
        self.nums.len()
    }

    /// Whether the DAG holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nums.is_empty()
    }

    /// Insert a node. Returns `true` if the id was already present, in
    /// which case nothing is modified.
    pub fn add_link(&mut self, blk: BlockRef, previous_id: impl Into<String>, obj: T) -> bool {
        let (id, num) = blk.into_parts();
        if self.links.contains_key(&id) {
            return true;
        }
        self.links.insert(id.clone(), previous_id.into());
        self.nums.insert(id.clone(), num);
        self.objects.insert(id, obj);
        false
    }

    /// Establish the initial LIB from a block's own LIB assertion.
    ///
    /// Resolves the ancestor of `blk` numbered `lib_num` by following
    /// parent links. If `lib_num` is the block's own number the block
    /// itself becomes the LIB. If no such ancestor is linked yet the LIB
    /// stays unset and a later block may establish it.
    pub fn set_lib(&mut self, blk: BlockRef, previous_id: &str, lib_num: BlockNum) {
        if blk.num() == lib_num {
            self.lib_ref = blk;
            return;
        }

        let bound = self.links.len() + 1;
        let mut cur: &str = previous_id;
        for _ in 0..bound {
            let Some(&num) = self.nums.get(cur) else { return };
            if num == lib_num {
                self.lib_ref = BlockRef::new(cur, num);
                return;
            }
            if num < lib_num {
                return;
            }
            match self.links.get(cur) {
                Some(prev) => cur = prev,
                None => return,
            }
        }
    }

    /// Advance the LIB.
    ///
    /// Requires an established LIB and a new reference at or above the
    /// current one; the LIB never decreases.
    pub fn move_lib(&mut self, new_lib: BlockRef) {
        debug_assert!(self.has_lib());
        debug_assert!(new_lib.num() >= self.lib_ref.num());
        self.lib_ref = new_lib;
    }

    /// Remove every node numbered below `lib - kept_final_blocks`.
    ///
    /// Returns the purged ids. Purged nodes are irrecoverable. With
    /// `kept_final_blocks == 0` nothing below the LIB is retained.
    pub fn purge_before_lib(&mut self, kept_final_blocks: u64) -> Vec<String> {
        let cutoff = self.lib_ref.num().saturating_sub(kept_final_blocks);
        let purged: Vec<String> = self
            .nums
            .iter()
            .filter(|&(_, &num)| num < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &purged {
            self.links.remove(id);
            self.nums.remove(id);
            self.objects.remove(id);
        }
        purged
    }

    /// The path from the LIB (exclusive) up to `head` (inclusive), ordered
    /// oldest first.
    ///
    /// With an established LIB, returns `None` when `head` does not link
    /// down to it (an unlinkable head, a fork below the LIB, or a cycle).
    /// Before a LIB is established the walk stops at the first unknown
    /// parent and the partial chain is returned.
    pub fn reversible_segment(&self, head: BlockRef) -> Option<Vec<ForkNode>> {
        let has_lib = self.has_lib();
        let bound = self.links.len() + 1;

        let (mut cur_id, mut cur_num) = head.into_parts();
        let mut reversed: Vec<ForkNode> = Vec::new();
        for _ in 0..=bound {
            if has_lib {
                if cur_id == self.lib_ref.id() {
                    reversed.reverse();
                    return Some(reversed);
                }
                if cur_num < self.lib_ref.num() {
                    // fell below the LIB without meeting it: fork below LIB
                    return None;
                }
            }
            let Some(prev) = self.links.get(&cur_id) else {
                if has_lib {
                    return None;
                }
                reversed.reverse();
                return Some(reversed);
            };
            reversed.push(ForkNode { id: cur_id, num: cur_num, previous_id: prev.clone() });
            cur_num = self.nums.get(prev).copied().unwrap_or_default();
            cur_id = prev.clone();
        }

        debug!(head_id = %reversed.last().map(|n| n.id.as_str()).unwrap_or_default(), "cycle detected walking reversible segment");
        None
    }

    /// Like [`reversible_segment`](Self::reversible_segment) but walks
    /// through the LIB down to the oldest retained ancestor, so the path
    /// covers the LIB itself and the finalized blocks kept below it.
    ///
    /// Returns `None` unless a LIB is established and `head` links down to
    /// it.
    pub fn complete_segment(&self, head: BlockRef) -> Option<Vec<ForkNode>> {
        if !self.has_lib() {
            return None;
        }

        let bound = self.links.len() + 1;
        let (mut cur_id, mut cur_num) = head.into_parts();
        let mut reversed: Vec<ForkNode> = Vec::new();
        let mut reached_lib = false;
        for _ in 0..=bound {
            if cur_id == self.lib_ref.id() {
                reached_lib = true;
            } else if !reached_lib && cur_num < self.lib_ref.num() {
                // fell below the LIB without meeting it: fork below LIB
                return None;
            }
            let Some(prev) = self.links.get(&cur_id) else { break };
            reversed.push(ForkNode { id: cur_id, num: cur_num, previous_id: prev.clone() });
            cur_num = self.nums.get(prev).copied().unwrap_or_default();
            cur_id = prev.clone();
        }
        if !reached_lib {
            return None;
        }

        reversed.reverse();
        Some(reversed)
    }

    /// The reference of the block numbered `num` on the chain ending at
    /// `head`, or the empty reference when no such block is linked.
    pub fn block_in_current_chain(&self, head: BlockRef, num: BlockNum) -> BlockRef {
        if head.num() == num {
            return head;
        }

        let bound = self.links.len() + 1;
        let mut cur = head.id().to_owned();
        for _ in 0..bound {
            let Some(prev) = self.links.get(&cur) else { return BlockRef::empty() };
            match self.nums.get(prev) {
                Some(&n) if n == num => return BlockRef::new(prev.clone(), n),
                Some(&n) if n < num => return BlockRef::empty(),
                Some(_) => cur = prev.clone(),
                None => return BlockRef::empty(),
            }
        }
        BlockRef::empty()
    }

    /// The segments to unwind and replay when switching from the chain
    /// ending at `current_head_id` to the chain whose head's parent is
    /// `new_heads_previous_id`.
    ///
    /// Walks both chains back to their lowest common ancestor. `undo_ids`
    /// are ordered head to junction (most recent first); `redo_ids` are
    /// ordered junction to head (oldest first). The junction itself is in
    /// neither.
    pub fn chain_switch_segments(
        &self,
        current_head_id: &str,
        new_heads_previous_id: &str,
    ) -> (Vec<String>, Vec<String>) {
        let bound = self.links.len() + 1;

        // backward walk of the new chain, new head's parent down to a root
        let mut new_chain: Vec<String> = Vec::new();
        let mut cur = new_heads_previous_id.to_owned();
        for _ in 0..bound {
            if cur.is_empty() {
                break;
            }
            new_chain.push(cur.clone());
            match self.links.get(&cur) {
                Some(prev) => cur = prev.clone(),
                None => break,
            }
        }
        let positions: HashMap<&str, usize> =
            new_chain.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();

        // unwind the old chain until it meets the new one
        let mut undos: Vec<String> = Vec::new();
        let mut junction: Option<usize> = None;
        let mut cur = current_head_id.to_owned();
        for _ in 0..bound {
            if let Some(&pos) = positions.get(cur.as_str()) {
                junction = Some(pos);
                break;
            }
            if !self.nums.contains_key(&cur) {
                break;
            }
            undos.push(cur.clone());
            match self.links.get(&cur) {
                Some(prev) => cur = prev.clone(),
                None => break,
            }
        }

        let redos: Vec<String> = match junction {
            Some(pos) => new_chain[..pos].iter().rev().cloned().collect(),
            None => new_chain.into_iter().rev().collect(),
        };
        (undos, redos)
    }

    /// Given a candidate new LIB on the current chain, the nodes between
    /// the current LIB (exclusive) and `new_lib` (inclusive), ordered
    /// oldest first, plus every node at or below `new_lib`'s number that is
    /// neither on that path nor part of the LIB's finalized ancestry.
    ///
    /// The first return value is `false` when `new_lib` is already the
    /// current LIB.
    pub fn has_new_irreversible_segment(
        &self,
        new_lib: &BlockRef,
    ) -> (bool, Vec<ForkNode>, Vec<ForkNode>) {
        if self.lib_ref.id() == new_lib.id() {
            return (false, Vec::new(), Vec::new());
        }

        let bound = self.links.len() + 1;
        let mut segment: Vec<ForkNode> = Vec::new();
        let mut cur_id = new_lib.id().to_owned();
        let mut cur_num = new_lib.num();
        for _ in 0..bound {
            if cur_id == self.lib_ref.id() {
                break;
            }
            let Some(prev) = self.links.get(&cur_id) else { break };
            segment.push(ForkNode { id: cur_id, num: cur_num, previous_id: prev.clone() });
            cur_num = self.nums.get(prev).copied().unwrap_or_default();
            cur_id = prev.clone();
        }
        segment.reverse();
        let has_new = !segment.is_empty();

        // the canonical set: the new irreversible path plus the finalized
        // ancestry of the current LIB (blocks retained below it)
        let mut canonical: HashSet<&str> = segment.iter().map(|n| n.id.as_str()).collect();
        let mut cur: &str = self.lib_ref.id();
        for _ in 0..bound {
            canonical.insert(cur);
            match self.links.get(cur) {
                Some(prev) => cur = prev,
                None => break,
            }
        }

        let mut stalled: Vec<ForkNode> = self
            .nums
            .iter()
            .filter(|&(id, &num)| num <= new_lib.num() && !canonical.contains(id.as_str()))
            .map(|(id, &num)| ForkNode {
                id: id.clone(),
                num,
                previous_id: self.links.get(id).cloned().unwrap_or_default(),
            })
            .collect();
        stalled.sort_by(|a, b| (a.num, &a.id).cmp(&(b.num, &b.id)));

        (has_new, segment, stalled)
    }

    /// The node with the given id, if known.
    pub fn node(&self, id: &str) -> Option<ForkNode> {
        let num = *self.nums.get(id)?;
        Some(ForkNode {
            id: id.to_owned(),
            num,
            previous_id: self.links.get(id).cloned().unwrap_or_default(),
        })
    }

    /// The payload attached to the node with the given id.
    pub fn object(&self, id: &str) -> Option<&T> {
        self.objects.get(id)
    }

    /// Mutable access to the payload attached to the node with the given id.
    pub fn object_mut(&mut self, id: &str) -> Option<&mut T> {
        self.objects.get_mut(id)
    }

    pub(crate) fn links(&self) -> &HashMap<String, String> {
        &self.links
    }

    pub(crate) fn nums(&self) -> &HashMap<String, BlockNum> {
        &self.nums
    }

    pub(crate) fn objects(&self) -> &HashMap<String, T> {
        &self.objects
    }

    pub(crate) fn from_parts(
        links: HashMap<String, String>,
        nums: HashMap<String, BlockNum>,
        objects: HashMap<String, T>,
        lib_ref: BlockRef,
    ) -> Self {
        Self { links, nums, objects, lib_ref }
    }
}
