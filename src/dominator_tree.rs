//! Dominator and post-dominator trees represented as mappings of blocks to
//! their immediate (post-)dominators.

use core::cmp::Ordering;

use crate::entity::SecondaryMap;
use crate::packed_option::PackedOption;

use crate::ir::{Block, Function, Inst, Layout, ProgramPoint};
use crate::flowgraph::{BlockPredecessor, ControlFlowGraph};

/// RPO numbers are not first assigned in a contiguous way but as multiples of
/// STRIDE, to leave room for modifications of the tree.
const STRIDE: u32 = 4;

/// Special RPO numbers used during `compute_postorder`.
const DONE: u32 = 1;
const SEEN: u32 = 2;

/// Dominator tree node. We keep one of these per block.
#[derive(Clone, Default)]
struct DomNode {
    /// Number of this node in a reverse post-order traversal of the CFG,
    /// starting from 2. This number is monotonic in the reverse postorder
    /// but not contiguous, since we leave holes for later localized
    /// modifications of the dominator tree.
    /// Unreachable nodes get number 0, all others are positive.
    rpo_number: u32,

    /// The immediate dominator of this block, represented as the branch
    /// instruction at the end of the dominating basic block.
    ///
    /// This is `None` for unreachable blocks and the entry block which
    /// doesn't have an immediate dominator.
    idom: PackedOption<Inst>,
}

/// The dominator tree for a single function.
pub struct DominatorTree {
    nodes: SecondaryMap<Block, DomNode>,

    /// CFG post-order of all reachable blocks.
    postorder: Vec<Block>,

    /// Scratch memory used by `compute_postorder()`.
    stack: Vec<Block>,

    valid: bool,
}

/// Methods for querying the dominator tree.
impl DominatorTree {
    /// Is `block` reachable from the entry block?
    pub fn is_reachable(&self, block: Block) -> bool {
        self.nodes[block].rpo_number != 0
    }

    /// Get the CFG post-order of blocks that was used to compute the
    /// dominator tree.
    ///
    /// Note that this post-order is not updated automatically when the CFG
    /// is modified. It is computed from scratch and cached by `compute()`.
    pub fn cfg_postorder(&self) -> &[Block] {
        debug_assert!(self.is_valid());
        &self.postorder
    }

    /// Returns the immediate dominator of `block`.
    ///
    /// The immediate dominator of a basic block is a basic block which we
    /// represent by the branch instruction at the end of it.
    ///
    /// A branch is said to *dominate* `block` if all control flow paths from
    /// the function entry to `block` must go through the branch.
    ///
    /// The *immediate dominator* is the dominator that is closest to
    /// `block`. All other dominators also dominate the immediate dominator.
    ///
    /// This returns `None` if `block` is not reachable from the entry block,
    /// or if it is the entry block which has no dominators.
    pub fn idom(&self, block: Block) -> Option<Inst> {
        self.nodes[block].idom.into()
    }

    /// Compare two blocks relative to the reverse post-order.
    fn rpo_cmp_block(&self, a: Block, b: Block) -> Ordering {
        self.nodes[a].rpo_number.cmp(&self.nodes[b].rpo_number)
    }

    /// Compare two program points relative to a reverse post-order traversal
    /// of the control-flow graph.
    ///
    /// Return `Ordering::Less` if `a` comes before `b` in the RPO.
    ///
    /// If `a` and `b` belong to the same block, compare their relative
    /// position in the block.
    pub fn rpo_cmp<A, B>(&self, a: A, b: B, layout: &Layout) -> Ordering
    where
        A: Into<ProgramPoint>,
        B: Into<ProgramPoint>,
    {
        let a = a.into();
        let b = b.into();
        self.rpo_cmp_block(layout.pp_block(a), layout.pp_block(b))
            .then_with(|| layout.cmp(a, b))
    }

    /// Returns `true` if `a` dominates `b`.
    ///
    /// This means that every control-flow path from the function entry to
    /// `b` must go through `a`.
    ///
    /// Dominance is ill defined for unreachable blocks. This function can
    /// always determine dominance for instructions in the same block, but
    /// otherwise returns `false` if either block is unreachable.
    ///
    /// An instruction is considered to dominate itself.
    pub fn dominates<A, B>(&self, a: A, b: B, layout: &Layout) -> bool
    where
        A: Into<ProgramPoint>,
        B: Into<ProgramPoint>,
    {
        let a = a.into();
        let b = b.into();
        match a {
            ProgramPoint::Block(block_a) => {
                a == b || self.last_dominator(block_a, b, layout).is_some()
            }
            ProgramPoint::Inst(inst_a) => {
                let block_a = layout.inst_block(inst_a).expect("instruction not in layout");
                match self.last_dominator(block_a, b, layout) {
                    Some(last) => layout.cmp(inst_a, last) != Ordering::Greater,
                    None => false,
                }
            }
        }
    }

    /// Find the last instruction in `a` that dominates `b`.
    /// If no instructions in `a` dominate `b`, return `None`.
    pub fn last_dominator<B>(&self, a: Block, b: B, layout: &Layout) -> Option<Inst>
    where
        B: Into<ProgramPoint>,
    {
        let (mut block_b, mut inst_b) = match b.into() {
            ProgramPoint::Block(block) => (block, None),
            ProgramPoint::Inst(inst) => (
                layout.inst_block(inst).expect("instruction not in layout"),
                Some(inst),
            ),
        };
        let rpo_a = self.nodes[a].rpo_number;

        // Run a finger up the dominator tree from b until we see a.
        // Do nothing if b is unreachable.
        while rpo_a < self.nodes[block_b].rpo_number {
            let idom = match self.idom(block_b) {
                Some(idom) => idom,
                None => return None, // a is unreachable, so we climbed past the entry
            };
            block_b = layout.inst_block(idom).expect("dominator got removed");
            inst_b = Some(idom);
        }
        if a == block_b {
            inst_b
        } else {
            None
        }
    }

    /// Compute the common dominator of two basic blocks.
    ///
    /// Both basic blocks are assumed to be reachable.
    fn common_dominator(
        &self,
        mut a: BlockPredecessor,
        mut b: BlockPredecessor,
        layout: &Layout,
    ) -> BlockPredecessor {
        loop {
            match self.rpo_cmp_block(a.block, b.block) {
                Ordering::Less => {
                    // `a` comes before `b` in the RPO. Move `b` up.
                    let idom = self.nodes[b.block].idom.expect("unreachable basic block?");
                    b = BlockPredecessor::new(
                        layout.inst_block(idom).expect("dangling idom instruction"),
                        idom,
                    );
                }
                Ordering::Greater => {
                    // `b` comes before `a` in the RPO. Move `a` up.
                    let idom = self.nodes[a.block].idom.expect("unreachable basic block?");
                    a = BlockPredecessor::new(
                        layout.inst_block(idom).expect("dangling idom instruction"),
                        idom,
                    );
                }
                Ordering::Equal => break,
            }
        }

        debug_assert_eq!(a.block, b.block, "unreachable block passed to common_dominator?");

        // We're in the same block. The common dominator is the earlier
        // instruction.
        if layout.cmp(a.inst, b.inst) == Ordering::Less {
            a
        } else {
            b
        }
    }
}

impl DominatorTree {
    /// Allocate a new blank dominator tree. Use `compute` to compute the
    /// dominator tree for a function.
    pub fn new() -> Self {
        Self {
            nodes: SecondaryMap::new(),
            postorder: Vec::new(),
            stack: Vec::new(),
            valid: false,
        }
    }

    /// Allocate and compute a dominator tree.
    pub fn with_function(func: &Function, cfg: &ControlFlowGraph) -> Self {
        let mut domtree = Self::new();
        domtree.compute(func, cfg);
        domtree
    }

    /// Reset and compute a CFG post-order and dominator tree.
    pub fn compute(&mut self, func: &Function, cfg: &ControlFlowGraph) {
        debug_assert!(cfg.is_valid());
        self.clear();
        self.compute_postorder(func);
        self.compute_domtree(func, cfg);
        self.valid = true;
    }

    /// Clear the data structures used to represent the dominator tree. This
    /// will leave the tree in a state where `is_valid()` returns false.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.postorder.clear();
        debug_assert!(self.stack.is_empty());
        self.valid = false;
    }

    /// Check if the dominator tree is in a valid state.
    ///
    /// Note that this doesn't perform any kind of validity checks. It simply
    /// checks if the `compute()` method has been called since the last
    /// `clear()`. It does not check that the dominator tree is consistent
    /// with the CFG.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Reset all internal data structures and compute a post-order of the
    /// control flow graph.
    ///
    /// This leaves `rpo_number == 1` for all reachable blocks, 0 for
    /// unreachable ones.
    fn compute_postorder(&mut self, func: &Function) {
        self.nodes.resize(func.dfg.num_blocks());

        match func.layout.entry_block() {
            Some(block) => {
                self.stack.push(block);
                self.nodes[block].rpo_number = SEEN;
            }
            None => return,
        }

        // During this algorithm only, use `rpo_number` to hold the following
        // state:
        //
        //   0:    block has not yet been reached in the pre-order.
        //   SEEN: block has been pushed on the stack but successors not yet
        //         pushed.
        //   DONE: Successors pushed.
        while let Some(block) = self.stack.pop() {
            match self.nodes[block].rpo_number {
                SEEN => {
                    // This is the first time we pop the block, so we need to
                    // scan its successors and then revisit it.
                    self.nodes[block].rpo_number = DONE;
                    self.stack.push(block);
                    if let Some(term) = func.layout.last_inst(block) {
                        for succ in func.dfg[term].branch_destinations() {
                            self.push_if_unseen(succ);
                        }
                    }
                }
                DONE => {
                    // This is the second time we pop the block, so all
                    // successors have been processed.
                    self.postorder.push(block);
                }
                _ => unreachable!(),
            }
        }
    }

    /// Push `block` onto `self.stack` if it has not already been seen.
    fn push_if_unseen(&mut self, block: Block) {
        if self.nodes[block].rpo_number == 0 {
            self.nodes[block].rpo_number = SEEN;
            self.stack.push(block);
        }
    }

    /// Build a dominator tree from a control flow graph using Keith D.
    /// Cooper's "Simple, Fast Dominator Algorithm."
    fn compute_domtree(&mut self, func: &Function, cfg: &ControlFlowGraph) {
        // During this algorithm, `rpo_number` has the following values:
        //
        // 0: block is not reachable.
        // 1: block is reachable, but has not yet been visited during the
        //    first pass. This is set by `compute_postorder`.
        // 2+: block is reachable and has an assigned RPO number.

        // We'll be iterating over a reverse post-order of the CFG, skipping
        // the entry block.
        let (entry_block, postorder) = match self.postorder.as_slice().split_last() {
            Some((&eb, rest)) => (eb, rest),
            None => return,
        };
        debug_assert_eq!(Some(entry_block), func.layout.entry_block());

        // Do a first pass where we assign RPO numbers to all reachable
        // nodes.
        self.nodes[entry_block].rpo_number = 2 * STRIDE;
        for (rpo_idx, &block) in postorder.iter().rev().enumerate() {
            // Update the current node and give it an RPO number.
            // The entry block got 2, the rest start at 3 by multiples of
            // STRIDE to leave room for future dominator tree modifications.
            //
            // Since `compute_idom` will only look at nodes with an assigned
            // RPO number, the function will never see an uninitialized
            // predecessor.
            //
            // Due to the nature of the post-order traversal, every node we
            // visit will have at least one predecessor that has previously
            // been visited during this RPO.
            self.nodes[block] = DomNode {
                idom: self.compute_idom(block, cfg, &func.layout).into(),
                rpo_number: (rpo_idx as u32 + 3) * STRIDE,
            }
        }

        // Now that we have RPO numbers for everything and initial immediate
        // dominator estimates, iterate until convergence.
        //
        // If the function is free of irreducible control flow, this will
        // exit after one iteration.
        let mut changed = true;
        while changed {
            changed = false;
            for &block in postorder.iter().rev() {
                let idom = self.compute_idom(block, cfg, &func.layout).into();
                if self.nodes[block].idom != idom {
                    self.nodes[block].idom = idom;
                    changed = true;
                }
            }
        }
    }

    // Compute the immediate dominator for `block` using the current `idom`
    // states for the reachable nodes.
    fn compute_idom(&self, block: Block, cfg: &ControlFlowGraph, layout: &Layout) -> Inst {
        // Get an iterator with just the reachable, already visited
        // predecessors to `block`. Note that during the first pass,
        // `rpo_number` is 1 for reachable blocks that haven't been visited
        // yet, 0 for unreachable blocks.
        let mut reachable_preds = cfg
            .pred_iter(block)
            .filter(|pred| self.nodes[pred.block].rpo_number > 1);

        // The RPO must visit at least one predecessor before this node.
        let mut idom = reachable_preds
            .next()
            .expect("block node must have one reachable predecessor");

        for pred in reachable_preds {
            idom = self.common_dominator(idom, pred, layout);
        }

        idom.inst
    }
}

impl Default for DominatorTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Post-dominator tree node.
#[derive(Clone, Default)]
struct PostDomNode {
    /// Number of this node in a reverse post-order traversal of the
    /// *reversed* CFG. Blocks that cannot reach an exit get number 0.
    rpo_number: u32,

    /// The immediate post-dominator of this block.
    ///
    /// `None` for exit blocks, for blocks whose only common post-dominator
    /// with a sibling exit path is the virtual exit, and for blocks that
    /// cannot reach an exit at all.
    ipdom: PackedOption<Block>,
}

/// The post-dominator tree for a single function.
///
/// This is the dominator tree of the reversed CFG, rooted at the function's
/// exit blocks. A virtual exit joining all exit blocks is implicit: it is
/// represented by `None` in the immediate post-dominator links.
///
/// Post-dominance is undecidable in the presence of indirect jumps; callers
/// are expected to check `Function::has_indirect_jumps` before relying on
/// the answers.
pub struct PostDominatorTree {
    nodes: SecondaryMap<Block, PostDomNode>,

    /// Post-order of the reversed CFG: all blocks that can reach an exit.
    postorder: Vec<Block>,

    /// Scratch memory used by `compute_postorder()`.
    stack: Vec<Block>,

    valid: bool,
}

impl PostDominatorTree {
    /// Allocate a new blank post-dominator tree. Use `compute` to compute
    /// the tree for a function.
    pub fn new() -> Self {
        Self {
            nodes: SecondaryMap::new(),
            postorder: Vec::new(),
            stack: Vec::new(),
            valid: false,
        }
    }

    /// Allocate and compute a post-dominator tree.
    pub fn with_function(func: &Function, cfg: &ControlFlowGraph) -> Self {
        let mut tree = Self::new();
        tree.compute(func, cfg);
        tree
    }

    /// Reset and compute the post-dominator tree.
    pub fn compute(&mut self, func: &Function, cfg: &ControlFlowGraph) {
        debug_assert!(cfg.is_valid());
        self.clear();
        self.compute_postorder(func, cfg);
        self.compute_pdomtree(cfg);
        self.valid = true;
    }

    /// Clear the data structures in this tree.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.postorder.clear();
        debug_assert!(self.stack.is_empty());
        self.valid = false;
    }

    /// Check if the tree has been computed since the last `clear()`.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Can `block` reach a function exit?
    ///
    /// Post-dominance is ill defined for blocks that cannot, e.g. blocks
    /// caught in an infinite loop.
    pub fn is_exit_reachable(&self, block: Block) -> bool {
        self.nodes[block].rpo_number != 0
    }

    /// Returns the immediate post-dominator of `block`, or `None` if it is
    /// an exit block, if its paths only rejoin at the virtual exit, or if it
    /// cannot reach an exit.
    pub fn ipdom(&self, block: Block) -> Option<Block> {
        self.nodes[block].ipdom.into()
    }

    /// Returns `true` if `a` post-dominates `b`.
    ///
    /// This means that every control-flow path from `b` to a function exit
    /// must go through `a`.
    ///
    /// A program point is considered to post-dominate itself.
    pub fn post_dominates<A, B>(&self, a: A, b: B, layout: &Layout) -> bool
    where
        A: Into<ProgramPoint>,
        B: Into<ProgramPoint>,
    {
        let a = a.into();
        let b = b.into();
        let block_a = layout.pp_block(a);
        let block_b = layout.pp_block(b);
        if !self.is_exit_reachable(block_a) || !self.is_exit_reachable(block_b) {
            return false;
        }
        if block_a == block_b {
            // Within a block, execution is a straight line to the
            // terminator, so `a` post-dominates `b` iff it is not earlier.
            return layout.cmp(a, b) != Ordering::Less;
        }
        // Run a finger up the post-dominator tree from b until we see a.
        let rpo_a = self.nodes[block_a].rpo_number;
        let mut finger = block_b;
        while rpo_a < self.nodes[finger].rpo_number {
            match self.ipdom(finger) {
                Some(ipdom) => finger = ipdom,
                // Reached the virtual exit without passing `a`.
                None => return false,
            }
        }
        finger == block_a
    }

    /// Compute a post-order of the reversed CFG.
    ///
    /// The traversal is rooted at every exit block: blocks whose terminator
    /// has no successors. This leaves `rpo_number == 1` for all blocks that
    /// can reach an exit, 0 for the rest.
    fn compute_postorder(&mut self, func: &Function, cfg: &ControlFlowGraph) {
        self.nodes.resize(func.dfg.num_blocks());

        // Seed the stack with all exit blocks, in layout order.
        for block in func.layout.blocks() {
            let is_exit = func
                .layout
                .last_inst(block)
                .map(|term| func.dfg[term].branch_destinations().is_empty())
                .unwrap_or(false);
            if is_exit {
                self.nodes[block].rpo_number = SEEN;
                self.stack.push(block);
            }
        }

        while let Some(block) = self.stack.pop() {
            match self.nodes[block].rpo_number {
                SEEN => {
                    self.nodes[block].rpo_number = DONE;
                    self.stack.push(block);
                    // The successors in the reversed CFG are the CFG
                    // predecessors.
                    let preds: Vec<Block> =
                        cfg.pred_iter(block).map(|pred| pred.block).collect();
                    for pred in preds {
                        if self.nodes[pred].rpo_number == 0 {
                            self.nodes[pred].rpo_number = SEEN;
                            self.stack.push(pred);
                        }
                    }
                }
                DONE => self.postorder.push(block),
                _ => unreachable!(),
            }
        }
    }

    /// Build the post-dominator tree with the same "simple, fast dominance"
    /// scheme as `DominatorTree`, run on the reversed CFG.
    fn compute_pdomtree(&mut self, cfg: &ControlFlowGraph) {
        // First pass: assign RPO numbers and initial immediate
        // post-dominator estimates, in reverse post-order of the reversed
        // CFG. Each non-root node has at least one already-numbered
        // successor (its DFS tree parent), which is all `compute_ipdom`
        // needs.
        let order: Vec<Block> = self.postorder.iter().rev().copied().collect();
        for (rpo_idx, &block) in order.iter().enumerate() {
            let ipdom = self.compute_ipdom(block, cfg);
            let node = &mut self.nodes[block];
            node.rpo_number = (rpo_idx as u32 + 2) * STRIDE;
            node.ipdom = ipdom;
        }

        // Iterate to convergence, as in the forward tree.
        let mut changed = true;
        while changed {
            changed = false;
            for &block in &order {
                let ipdom = self.compute_ipdom(block, cfg);
                if self.nodes[block].ipdom != ipdom {
                    self.nodes[block].ipdom = ipdom;
                    changed = true;
                }
            }
        }
    }

    // Compute the immediate post-dominator for `block` using the current
    // `ipdom` states: the common post-dominator of all its already-numbered
    // CFG successors, or `None` for exit blocks and for nodes whose
    // successors only rejoin at the virtual exit.
    fn compute_ipdom(&self, block: Block, cfg: &ControlFlowGraph) -> PackedOption<Block> {
        let mut processed_succs = cfg
            .succ_iter(block)
            .filter(|&succ| self.nodes[succ].rpo_number > 1);

        let mut ipdom = match processed_succs.next() {
            Some(succ) => succ,
            // An exit block.
            None => return None.into(),
        };

        for succ in processed_succs {
            match self.common_post_dominator(ipdom, succ) {
                Some(common) => ipdom = common,
                // The paths only rejoin at the virtual exit.
                None => return None.into(),
            }
        }
        ipdom.into()
    }

    // Compute the common post-dominator of two blocks, or `None` if it is
    // the virtual exit.
    fn common_post_dominator(&self, mut a: Block, mut b: Block) -> Option<Block> {
        while a != b {
            while self.nodes[a].rpo_number > self.nodes[b].rpo_number {
                a = self.nodes[a].ipdom.expand()?;
            }
            while self.nodes[b].rpo_number > self.nodes[a].rpo_number {
                b = self.nodes[b].ipdom.expand()?;
            }
        }
        Some(a)
    }
}

impl Default for PostDominatorTree {
    fn default() -> Self {
        Self::new()
    }
}
