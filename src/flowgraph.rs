//! A control flow graph represented as mappings of basic blocks to their
//! predecessors and successors.
//!
//! Successors are represented as basic blocks while predecessors are
//! represented by `(Block, Inst)` pairs naming the branch instruction at the
//! end of the predecessor block:
//!
//! ```text
//!     block0:
//!         ...
//!         br v0, block1, block2
//! ```
//!
//! Here `block1` and `block2` each have the single predecessor
//! `(block0, br)`.

use crate::entity::SecondaryMap;

use crate::ir::{Block, Function, Inst};

/// A basic block denoted by its enclosing block and its branch instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockPredecessor {
    /// Enclosing block key.
    pub block: Block,
    /// The branch instruction at the end of the predecessor.
    pub inst: Inst,
}

impl BlockPredecessor {
    /// Convenient method to construct a new `BlockPredecessor`.
    pub fn new(block: Block, inst: Inst) -> Self {
        Self { block, inst }
    }
}

/// A container for the successors and predecessors of some block.
#[derive(Clone, Default)]
struct CFGNode {
    /// Branch instructions that can transfer control to this block.
    predecessors: Vec<BlockPredecessor>,

    /// Set of blocks that are the targets of branches in this block,
    /// ordered by block number.
    successors: Vec<Block>,
}

/// The control flow graph maintains a mapping of blocks to their
/// predecessors and successors.
pub struct ControlFlowGraph {
    data: SecondaryMap<Block, CFGNode>,
    valid: bool,
}

impl ControlFlowGraph {
    /// Allocate a new blank control flow graph.
    pub fn new() -> Self {
        Self {
            data: SecondaryMap::new(),
            valid: false,
        }
    }

    /// Clear all data structures in this control flow graph.
    pub fn clear(&mut self) {
        self.data.clear();
        self.valid = false;
    }

    /// Allocate and compute the control flow graph for `func`.
    pub fn with_function(func: &Function) -> Self {
        let mut cfg = Self::new();
        cfg.compute(func);
        cfg
    }

    /// Compute the control flow graph of `func`.
    ///
    /// This will clear and overwrite any information already stored in this
    /// data structure.
    pub fn compute(&mut self, func: &Function) {
        self.clear();
        self.data.resize(func.dfg.num_blocks());

        for block in &func.layout {
            self.compute_block(func, block);
        }

        self.valid = true;
    }

    fn compute_block(&mut self, func: &Function, block: Block) {
        // Only the terminator can transfer control out of a block.
        if let Some(term) = func.layout.last_inst(block) {
            for dest in func.dfg[term].branch_destinations() {
                self.add_edge(block, term, dest);
            }
        }
    }

    fn invalidate_block_successors(&mut self, block: Block) {
        // Temporarily take ownership because we need mutable access to
        // self.data inside the loop.
        let mut successors = core::mem::take(&mut self.data[block].successors);
        for succ in successors.drain(..) {
            self.data[succ]
                .predecessors
                .retain(|pred| pred.block != block);
        }
    }

    /// Recompute the control flow graph of `block`.
    ///
    /// This is for use after modifying instructions within a specific block.
    /// It recomputes all edges from `block` while leaving edges to `block`
    /// intact. Its functionality is a subset of that of the more expensive
    /// `compute`, and should be used when we know we don't need to recompute
    /// the CFG from scratch, but rather that our changes have been
    /// restricted to specific blocks.
    pub fn recompute_block(&mut self, func: &Function, block: Block) {
        debug_assert!(self.is_valid());
        self.invalidate_block_successors(block);
        self.compute_block(func, block);
    }

    fn add_edge(&mut self, from: Block, from_inst: Inst, to: Block) {
        let successors = &mut self.data[from].successors;
        if let Err(idx) = successors.binary_search(&to) {
            successors.insert(idx, to);
        }
        let predecessors = &mut self.data[to].predecessors;
        let pred = BlockPredecessor::new(from, from_inst);
        if !predecessors.contains(&pred) {
            predecessors.push(pred);
        }
    }

    /// Get an iterator over the CFG predecessors to `block`.
    pub fn pred_iter(&self, block: Block) -> impl Iterator<Item = BlockPredecessor> + '_ {
        self.data[block].predecessors.iter().copied()
    }

    /// Get an iterator over the CFG successors to `block`.
    pub fn succ_iter(&self, block: Block) -> impl Iterator<Item = Block> + '_ {
        debug_assert!(self.is_valid());
        self.data[block].successors.iter().copied()
    }

    /// Check if the CFG is in a valid state.
    ///
    /// Note that this doesn't perform any kind of validity checks. It simply
    /// checks if the `compute()` method has been called since the last
    /// `clear()`. It does not check that the CFG is consistent with the
    /// function.
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Default for ControlFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{Cursor, FuncCursor};
    use crate::ir::types::Type::*;
    use crate::ir::{Function, Signature};

    #[test]
    fn empty() {
        let func = Function::new();
        ControlFlowGraph::with_function(&func);
    }

    #[test]
    fn no_predecessors() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let block1 = func.dfg.make_block();
        func.layout.append_block(block0);
        func.layout.append_block(block1);

        let cfg = ControlFlowGraph::with_function(&func);
        for block in func.layout.blocks() {
            assert_eq!(cfg.pred_iter(block).count(), 0);
            assert_eq!(cfg.succ_iter(block).count(), 0);
        }
    }

    #[test]
    fn branches_and_jumps() {
        let mut func = Function::with_name_signature("f", Signature::new(vec![B1], None));
        let cond = func.arg_values()[0];
        let block0 = func.dfg.make_block();
        let block1 = func.dfg.make_block();
        let block2 = func.dfg.make_block();

        let br_block0;
        let jump_block1;
        {
            let mut cur = FuncCursor::new(&mut func);

            cur.insert_block(block0);
            br_block0 = cur.ins().br(cond, block2, block1);

            cur.insert_block(block1);
            jump_block1 = cur.ins().jump(block2);

            cur.insert_block(block2);
            cur.ins().return_(None);
        }

        let cfg = ControlFlowGraph::with_function(&func);

        assert_eq!(cfg.pred_iter(block0).count(), 0);
        assert_eq!(
            cfg.pred_iter(block1).collect::<Vec<_>>(),
            [BlockPredecessor::new(block0, br_block0)]
        );
        let block2_preds = cfg.pred_iter(block2).collect::<Vec<_>>();
        assert!(block2_preds.contains(&BlockPredecessor::new(block0, br_block0)));
        assert!(block2_preds.contains(&BlockPredecessor::new(block1, jump_block1)));

        assert_eq!(cfg.succ_iter(block0).collect::<Vec<_>>(), [block1, block2]);
        assert_eq!(cfg.succ_iter(block1).collect::<Vec<_>>(), [block2]);
        assert_eq!(cfg.succ_iter(block2).count(), 0);
    }

    #[test]
    fn br_table_edges() {
        let mut func = Function::with_name_signature("f", Signature::new(vec![I32], None));
        let idx = func.arg_values()[0];
        let block0 = func.dfg.make_block();
        let block1 = func.dfg.make_block();
        let block2 = func.dfg.make_block();

        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            cur.ins().br_table(idx, block2, &[(0, block1), (1, block2)]);
            cur.insert_block(block1);
            cur.ins().return_(None);
            cur.insert_block(block2);
            cur.ins().return_(None);
        }

        let cfg = ControlFlowGraph::with_function(&func);
        assert_eq!(cfg.succ_iter(block0).collect::<Vec<_>>(), [block1, block2]);
        // A block targeted both by a case and the default still has a single
        // predecessor entry.
        assert_eq!(cfg.pred_iter(block2).count(), 1);
    }

    #[test]
    fn recompute_block_after_edit() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let block1 = func.dfg.make_block();
        let block2 = func.dfg.make_block();
        let jump;
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            jump = cur.ins().jump(block1);
            cur.insert_block(block1);
            cur.ins().return_(None);
            cur.insert_block(block2);
            cur.ins().return_(None);
        }

        let mut cfg = ControlFlowGraph::with_function(&func);
        assert_eq!(cfg.succ_iter(block0).collect::<Vec<_>>(), [block1]);

        func.dfg[jump] = crate::ir::InstructionData::Jump { dest: block2 };
        cfg.recompute_block(&func, block0);
        assert_eq!(cfg.succ_iter(block0).collect::<Vec<_>>(), [block2]);
        assert_eq!(cfg.pred_iter(block1).count(), 0);
        assert_eq!(
            cfg.pred_iter(block2).collect::<Vec<_>>(),
            [BlockPredecessor::new(block0, jump)]
        );
    }
}
