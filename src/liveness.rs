//! Per-instruction liveness analysis.
//!
//! This computes, for each instruction `I` in a function, the set of values
//! that are live immediately *before* `I`. It is the analysis backing
//! control-point instrumentation: the values recorded in a stackmap are
//! exactly the live values at the instrumented site.
//!
//! The algorithm is the classic backward data-flow from chapter 10 of
//! Appel's *Modern Compiler Implementation*, computed at instruction rather
//! than block granularity:
//!
//! ```text
//! in[I]  = use[I] ∪ (out[I] \ def[I])
//! out[I] = ⋃ { in[S] : S ∈ succ(I) }
//! ```
//!
//! where the successors of a non-terminator are simply the next instruction
//! in the block, and the successors of a terminator are the first
//! instructions of its successor blocks.
//!
//! Two details are not in the book:
//!
//! * Phi instructions contribute nothing to `use`. Phi operands flow in
//!   along specific edges rather than being read at the phi itself;
//!   treating them as uses would propagate liveness backward through loops
//!   to before the corresponding definitions.
//! * A function implicitly defines its arguments. They are added to the
//!   `def` set of the first instruction of the entry block, which injects
//!   them into the data flow so they propagate as live through all their
//!   uses.

use std::collections::BTreeSet;

use crate::entity::SecondaryMap;

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Function, Inst, Opcode, Value};

/// Liveness information for a function.
///
/// Live sets are ordered by value number, so iterating one is deterministic
/// across runs and platforms.
pub struct Liveness {
    /// The values live immediately before each instruction.
    live_in: SecondaryMap<Inst, BTreeSet<Value>>,

    valid: bool,
}

impl Liveness {
    /// Allocate an empty liveness container. Use `compute` to fill it in.
    pub fn new() -> Self {
        Self {
            live_in: SecondaryMap::new(),
            valid: false,
        }
    }

    /// Allocate and compute liveness for `func`.
    pub fn with_function(func: &Function, cfg: &ControlFlowGraph) -> Self {
        let mut liveness = Self::new();
        liveness.compute(func, cfg);
        liveness
    }

    /// The set of values live immediately before `inst`.
    ///
    /// Empty for instructions in unreachable blocks, and for every
    /// instruction of a function with no blocks.
    pub fn live_before(&self, inst: Inst) -> &BTreeSet<Value> {
        debug_assert!(self.valid);
        &self.live_in[inst]
    }

    /// Check if liveness has been computed since the last `clear()`.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Clear the stored liveness information.
    pub fn clear(&mut self) {
        self.live_in.clear();
        self.valid = false;
    }

    /// Reset and compute liveness for `func`.
    pub fn compute(&mut self, func: &Function, cfg: &ControlFlowGraph) {
        self.clear();
        self.valid = true;

        let entry = match func.layout.entry_block() {
            Some(entry) => entry,
            None => return,
        };

        // Precompute the use set of every instruction.
        //
        // Only dataflow values can be live: constants are filtered out here,
        // and block labels and callees are not operands at all. Phi
        // instructions get an empty use set.
        let mut uses: SecondaryMap<Inst, Vec<Value>> = SecondaryMap::new();
        for block in func.layout.blocks() {
            for inst in func.layout.block_insts(block) {
                let data = &func.dfg[inst];
                if data.opcode() == Opcode::Phi {
                    continue;
                }
                let mut used = Vec::new();
                data.for_each_arg(|v| {
                    if func.dfg.value_def(v).is_dataflow() && !used.contains(&v) {
                        used.push(v);
                    }
                });
                uses[inst] = used;
            }
        }

        // The entry instruction additionally defines the function arguments.
        let entry_inst = func
            .layout
            .first_inst(entry)
            .expect("entry block has no instructions");

        // Visit the blocks bottom-up (CFG postorder) with the instructions
        // of each block in reverse, updating out[I] before in[I]. Working
        // against the direction of control flow lets long runs of liveness
        // propagate in a single sweep; the surrounding loop still iterates
        // to a fixed point, which the finite power-set lattice guarantees
        // exists.
        let postorder = cfg_postorder(func, cfg, entry);
        let mut out: SecondaryMap<Inst, BTreeSet<Value>> = SecondaryMap::new();
        let mut changed = true;
        while changed {
            changed = false;
            for &block in &postorder {
                let mut insts: Vec<Inst> = func.layout.block_insts(block).collect();
                insts.reverse();
                for inst in insts {
                    // out[I] is the union of the in-sets of I's successor
                    // instructions.
                    let mut new_out = BTreeSet::new();
                    match func.layout.next_inst(inst) {
                        Some(next) => new_out.extend(self.live_in[next].iter().copied()),
                        None => {
                            for succ in func.dfg[inst].branch_destinations() {
                                if let Some(first) = func.layout.first_inst(succ) {
                                    new_out.extend(self.live_in[first].iter().copied());
                                }
                            }
                        }
                    }
                    if out[inst] != new_out {
                        out[inst] = new_out;
                        changed = true;
                    }

                    // in[I] = use[I] ∪ (out[I] \ def[I]).
                    let mut new_in = out[inst].clone();
                    if let Some(result) = func.dfg.inst_result(inst) {
                        new_in.remove(&result);
                    }
                    if inst == entry_inst {
                        for arg in func.dfg.args() {
                            new_in.remove(arg);
                        }
                    }
                    new_in.extend(uses[inst].iter().copied());
                    if self.live_in[inst] != new_in {
                        self.live_in[inst] = new_in;
                        changed = true;
                    }
                }
            }
        }
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute a post-order of the blocks reachable from `entry`.
fn cfg_postorder(func: &Function, cfg: &ControlFlowGraph, entry: Block) -> Vec<Block> {
    debug_assert!(cfg.is_valid());
    let mut postorder = Vec::new();
    let mut seen: SecondaryMap<Block, bool> = SecondaryMap::new();
    seen.resize(func.dfg.num_blocks());
    // (block, successors pushed yet?)
    let mut stack = vec![(entry, false)];
    seen[entry] = true;
    while let Some((block, expanded)) = stack.pop() {
        if expanded {
            postorder.push(block);
            continue;
        }
        stack.push((block, true));
        for succ in cfg.succ_iter(block) {
            if !seen[succ] {
                seen[succ] = true;
                stack.push((succ, false));
            }
        }
    }
    postorder
}
