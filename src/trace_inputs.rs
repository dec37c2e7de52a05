//! Trace input inference.
//!
//! An interpreter marks the region of itself it wants traced with a pair of
//! calls: `__yktrace_start_tracing` and `__yktrace_stop_tracing`. When
//! tracing begins, the runtime must capture the machine values that flow
//! into the region from outside it. This pass works out precisely which
//! values those are and rewrites the start call to carry them as arguments.
//!
//! For each function containing a start marker:
//!
//! 1. Find the matching stop marker. There must be exactly one.
//! 2. Validate the region shape: the start must dominate the stop and the
//!    stop must post-dominate the start. The checks are skipped when the
//!    function contains indirect jumps, where the analyses are
//!    conservatively incomplete.
//! 3. Walk the CFG forward from the start, collecting every value that is
//!    used inside the region but not defined inside it. Phi operands are
//!    not uses (they carry edge semantics), callees are symbols rather than
//!    operands, and constants need no capturing.
//! 4. Replace the start call with one carrying the discovered inputs as
//!    extra arguments, in a deterministic discovery order.

use std::collections::VecDeque;

use indexmap::IndexSet;
use rustc_hash::FxHashSet;

use crate::cursor::{Cursor, FuncCursor};
use crate::dominator_tree::{DominatorTree, PostDominatorTree};
use crate::flowgraph::ControlFlowGraph;
use crate::ir::{
    Block, FuncId, Function, Inst, InstructionData, Module, Opcode, Value, TRACE_START,
    TRACE_STOP,
};
use crate::result::{TransformError, TransformResult};

/// Rewrite the trace-start call of every marker region in `module` to carry
/// the region's inputs.
///
/// A module without the start marker symbol is left unchanged. A function
/// whose markers do not form a single well-shaped region is a fatal
/// [`TransformError::RegionMalformed`].
pub fn infer_trace_inputs(module: &mut Module) -> TransformResult<bool> {
    let start_fn = match module.get_function(TRACE_START) {
        Some(start_fn) => start_fn,
        None => return Ok(false),
    };
    let stop_fn = module.get_function(TRACE_STOP);

    let mut changed = false;
    for id in module.func_ids() {
        changed |= process_function(module, id, start_fn, stop_fn)?;
    }
    Ok(changed)
}

/// Find and rewrite the marker region of `caller`, if it has one.
fn process_function(
    module: &mut Module,
    caller: FuncId,
    start_fn: FuncId,
    stop_fn: Option<FuncId>,
) -> TransformResult<bool> {
    let func = module.func(caller);

    let starts = calls_to(func, start_fn);
    let start = match starts.as_slice() {
        [] => return Ok(false),
        [start] => *start,
        _ => return Err(region_error(func, "multiple trace start markers")),
    };

    // Exactly one stop marker must pair with the start.
    let stops = match stop_fn {
        Some(stop_fn) => calls_to(func, stop_fn),
        None => Vec::new(),
    };
    let stop = match stops.as_slice() {
        [stop] => *stop,
        [] => return Err(region_error(func, "no trace stop marker")),
        _ => return Err(region_error(func, "multiple trace stop markers")),
    };

    let cfg = ControlFlowGraph::with_function(func);

    // The dominance checks are only decidable without indirect jumps.
    if func.has_indirect_jumps() {
        log::debug!(
            "skipping region shape checks in %{}: function has indirect jumps",
            func.name
        );
    } else {
        let domtree = DominatorTree::with_function(func, &cfg);
        if !domtree.dominates(start, stop, &func.layout) {
            return Err(region_error(func, "start marker does not dominate stop marker"));
        }
        let postdom = PostDominatorTree::with_function(func, &cfg);
        if !postdom.post_dominates(stop, start, &func.layout) {
            return Err(region_error(func, "stop marker does not post-dominate start marker"));
        }
    }

    let inputs = region_inputs(func, &cfg, start, stop);
    log::debug!(
        "trace region in %{} takes {} inputs",
        func.name,
        inputs.len()
    );

    // Build the replacement start call: the original kind argument, the
    // input count if the marker signature carries one, then the inputs in
    // discovery order.
    let old_args = match &func.dfg[start] {
        InstructionData::Call { args, .. } => args.clone(),
        _ => unreachable!("start marker is not a call"),
    };
    let ret = module.func(start_fn).signature.ret;
    let func = module.func_mut(caller);
    let mut new_args = Vec::with_capacity(2 + inputs.len());
    match old_args.as_slice() {
        [kind] => new_args.push(*kind),
        [kind, n_inputs] => {
            let count_ty = func.dfg.value_type(*n_inputs);
            new_args.push(*kind);
            new_args.push(func.dfg.iconst(count_ty, inputs.len() as i64));
        }
        _ => {
            return Err(region_error(func, "unrecognised trace start signature"));
        }
    }
    new_args.extend(inputs.iter().copied());

    // Insert the new call immediately before the old one, hand any uses
    // over, and erase the old call.
    let mut cur = FuncCursor::new(func).at_inst(start);
    let new_start = cur.ins().call(start_fn, ret, &new_args);
    if let (Some(old_result), Some(new_result)) = (
        cur.func.dfg.inst_result(start),
        cur.func.dfg.inst_result(new_start),
    ) {
        cur.func.dfg.replace_uses(old_result, new_result);
    }
    cur.func.layout.remove_inst(start);

    Ok(true)
}

/// All calls in `func` whose callee is `callee`, in layout order.
fn calls_to(func: &Function, callee: FuncId) -> Vec<Inst> {
    let mut calls = Vec::new();
    for block in func.layout.blocks() {
        for inst in func.layout.block_insts(block) {
            if let InstructionData::Call { func: f, .. } = &func.dfg[inst] {
                if *f == callee {
                    calls.push(inst);
                }
            }
        }
    }
    calls
}

/// Walk the region between `start` and `stop` and collect its inputs: the
/// values used inside but defined outside, in first-use order.
///
/// The walk visits each block once. A value defined on a back edge was
/// already recorded when its block was first processed, so a single pass
/// suffices for the region shapes the dominance checks admit.
fn region_inputs(
    func: &Function,
    cfg: &ControlFlowGraph,
    start: Inst,
    stop: Inst,
) -> IndexSet<Value> {
    let start_block = func
        .layout
        .inst_block(start)
        .expect("start marker is not in the layout");

    let mut defined_in_trace: FxHashSet<Value> = FxHashSet::default();
    let mut new_inputs: IndexSet<Value> = IndexSet::new();
    let mut seen_blocks: FxHashSet<Block> = FxHashSet::default();
    let mut queue: VecDeque<Block> = VecDeque::new();

    seen_blocks.insert(start_block);
    queue.push_back(start_block);

    while let Some(block) = queue.pop_front() {
        let mut hit_stop = false;
        // In the first block, fast-forward past the start marker itself.
        let mut before_start = block == start_block;

        for inst in func.layout.block_insts(block) {
            if before_start {
                if inst == start {
                    before_start = false;
                }
                continue;
            }
            if inst == stop {
                // The region ends here; do not look at the stop call's
                // operands or walk past it.
                hit_stop = true;
                break;
            }

            if let Some(result) = func.dfg.inst_result(inst) {
                defined_in_trace.insert(result);
            }

            // Phi operands have edge semantics, not use semantics; treating
            // them as uses would invent inputs for values that only flow
            // around inside the region.
            if func.dfg[inst].opcode() == Opcode::Phi {
                continue;
            }

            // For calls this visits the argument operands only; the callee
            // is a symbol, not a value.
            func.dfg[inst].for_each_arg(|v| {
                if func.dfg.value_def(v).is_dataflow() && !defined_in_trace.contains(&v) {
                    new_inputs.insert(v);
                }
            });
        }

        if !hit_stop {
            for succ in cfg.succ_iter(block) {
                if seen_blocks.insert(succ) {
                    queue.push_back(succ);
                }
            }
        }
    }

    new_inputs
}

fn region_error(func: &Function, reason: &str) -> TransformError {
    TransformError::RegionMalformed {
        func: func.name.clone(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::Type::*;
    use crate::ir::{IntCC, Signature, Type};

    /// Declare the marker symbols and a function `f` with the given
    /// signature, returning the module and the ids.
    fn marker_module(params: Vec<Type>, kind_only: bool) -> (Module, FuncId, FuncId, FuncId) {
        let mut module = Module::new();
        let start_sig = if kind_only {
            Signature::vararg(vec![I64], None)
        } else {
            Signature::vararg(vec![I64, I32], None)
        };
        let start = module.declare_function(TRACE_START, start_sig);
        let stop = module.declare_function(TRACE_STOP, Signature::new(vec![I64], None));
        let f = module.declare_function("f", Signature::new(params, None));
        (module, start, stop, f)
    }

    fn start_call_args(module: &Module, f: FuncId) -> Vec<Value> {
        let func = module.func(f);
        let start_fn = module.get_function(TRACE_START).unwrap();
        let calls = calls_to(func, start_fn);
        assert_eq!(calls.len(), 1);
        match &func.dfg[calls[0]] {
            InstructionData::Call { args, .. } => args.to_vec(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn module_without_markers_is_untouched() {
        let mut module = Module::new();
        let f = module.declare_function("f", Signature::new(vec![], None));
        let func = module.func_mut(f);
        let block0 = func.dfg.make_block();
        let mut cur = FuncCursor::new(func);
        cur.insert_block(block0);
        cur.ins().return_(None);

        assert_eq!(infer_trace_inputs(&mut module), Ok(false));
    }

    #[test]
    fn single_block_trace() {
        // start(0); %x = iadd %arg0, 1; stop(0); return
        let (mut module, start, stop, f) = marker_module(vec![I32], true);
        let kind;
        let zero;
        {
            let func = module.func_mut(f);
            let arg0 = func.arg_values()[0];
            kind = func.dfg.iconst(I64, 0);
            zero = func.dfg.iconst(I64, 0);
            let one = func.dfg.iconst(I32, 1);
            let block0 = func.dfg.make_block();
            let mut cur = FuncCursor::new(func);
            cur.insert_block(block0);
            cur.ins().call(start, None, &[kind]);
            cur.ins().iadd(arg0, one);
            cur.ins().call(stop, None, &[zero]);
            cur.ins().return_(None);
        }

        assert_eq!(infer_trace_inputs(&mut module), Ok(true));

        // The rewritten start call carries the kind and the one input.
        let arg0 = module.func(f).arg_values()[0];
        assert_eq!(start_call_args(&module, f), vec![kind, arg0]);
        assert!(crate::verifier::verify_module(&module).is_ok());
    }

    #[test]
    fn n_inputs_signature_form() {
        // The two-parameter marker form gets an input count constant.
        let (mut module, start, stop, f) = marker_module(vec![I32, I32], false);
        {
            let func = module.func_mut(f);
            let a = func.arg_values()[0];
            let b = func.arg_values()[1];
            let kind = func.dfg.iconst(I64, 0);
            let n = func.dfg.iconst(I32, 0);
            let block0 = func.dfg.make_block();
            let mut cur = FuncCursor::new(func);
            cur.insert_block(block0);
            cur.ins().call(start, None, &[kind, n]);
            cur.ins().iadd(a, b);
            cur.ins().call(stop, None, &[kind]);
            cur.ins().return_(None);
        }

        assert_eq!(infer_trace_inputs(&mut module), Ok(true));

        let args = start_call_args(&module, f);
        let func = module.func(f);
        assert_eq!(args.len(), 4);
        // The count argument is a constant 2 of the original count type.
        assert_eq!(func.dfg.value_const(args[1]), Some(2));
        assert_eq!(func.dfg.value_type(args[1]), I32);
        assert_eq!(&args[2..], &func.arg_values()[..2]);
    }

    #[test]
    fn values_defined_inside_are_not_inputs() {
        // %x is defined inside the region and used inside it.
        let (mut module, start, stop, f) = marker_module(vec![I32], true);
        let kind;
        {
            let func = module.func_mut(f);
            let arg0 = func.arg_values()[0];
            kind = func.dfg.iconst(I64, 0);
            let block0 = func.dfg.make_block();
            let mut cur = FuncCursor::new(func);
            cur.insert_block(block0);
            cur.ins().call(start, None, &[kind]);
            let add = cur.ins().iadd(arg0, arg0);
            let x = cur.func.dfg.inst_result(add).unwrap();
            cur.ins().imul(x, x);
            cur.ins().call(stop, None, &[kind]);
            cur.ins().return_(None);
        }

        assert_eq!(infer_trace_inputs(&mut module), Ok(true));
        let arg0 = module.func(f).arg_values()[0];
        assert_eq!(start_call_args(&module, f), vec![kind, arg0]);
    }

    #[test]
    fn phi_operands_are_not_inputs() {
        // A loop inside the region:
        //
        // block0: start(0) ; jump block1
        // block1: %p = phi [%a, block0], [%y, block1]
        //         %y = iadd %p, 1
        //         %d = icmp eq %y, %lim ; br %d, block2, block1
        // block2: stop(0) ; return
        //
        // %a reaches the region only as a phi operand, so it is not an
        // input; %lim is used by a real instruction and is.
        let (mut module, start, stop, f) = marker_module(vec![I32, I32], true);
        let a;
        let lim;
        let kind;
        {
            let func = module.func_mut(f);
            a = func.arg_values()[0];
            lim = func.arg_values()[1];
            kind = func.dfg.iconst(I64, 0);
            let one = func.dfg.iconst(I32, 1);
            let block0 = func.dfg.make_block();
            let block1 = func.dfg.make_block();
            let block2 = func.dfg.make_block();
            let mut cur = FuncCursor::new(func);
            cur.insert_block(block0);
            cur.ins().call(start, None, &[kind]);
            cur.ins().jump(block1);
            cur.insert_block(block1);
            let phi = cur.ins().phi(I32, &[(a, block0)]);
            let p = cur.func.dfg.inst_result(phi).unwrap();
            let add = cur.ins().iadd(p, one);
            let y = cur.func.dfg.inst_result(add).unwrap();
            match &mut cur.func.dfg[phi] {
                InstructionData::Phi { incomings } => {
                    incomings.push(crate::ir::PhiIncoming {
                        value: y,
                        block: block1,
                    });
                }
                _ => unreachable!(),
            }
            let cmp = cur.ins().icmp(IntCC::Equal, y, lim);
            let d = cur.func.dfg.inst_result(cmp).unwrap();
            cur.ins().br(d, block2, block1);
            cur.insert_block(block2);
            cur.ins().call(stop, None, &[kind]);
            cur.ins().return_(None);
        }

        assert_eq!(infer_trace_inputs(&mut module), Ok(true));

        let args = start_call_args(&module, f);
        assert_eq!(args, vec![kind, lim]);
        assert!(!args.contains(&a));
    }

    #[test]
    fn call_arguments_are_inputs_but_callee_is_not() {
        let (mut module, start, stop, f) = marker_module(vec![I32], true);
        let g = module.declare_function("g", Signature::new(vec![I32], None));
        let kind;
        {
            let func = module.func_mut(f);
            let x = func.arg_values()[0];
            kind = func.dfg.iconst(I64, 0);
            let block0 = func.dfg.make_block();
            let mut cur = FuncCursor::new(func);
            cur.insert_block(block0);
            cur.ins().call(start, None, &[kind]);
            cur.ins().call(g, None, &[x]);
            cur.ins().call(stop, None, &[kind]);
            cur.ins().return_(None);
        }

        assert_eq!(infer_trace_inputs(&mut module), Ok(true));
        let x = module.func(f).arg_values()[0];
        assert_eq!(start_call_args(&module, f), vec![kind, x]);
    }

    #[test]
    fn value_defined_before_start_in_same_block_is_an_input() {
        let (mut module, start, stop, f) = marker_module(vec![I32], true);
        let kind;
        {
            let func = module.func_mut(f);
            let arg0 = func.arg_values()[0];
            kind = func.dfg.iconst(I64, 0);
            let block0 = func.dfg.make_block();
            let mut cur = FuncCursor::new(func);
            cur.insert_block(block0);
            let pre = cur.ins().iadd(arg0, arg0);
            let t = cur.func.dfg.inst_result(pre).unwrap();
            cur.ins().call(start, None, &[kind]);
            cur.ins().imul(t, t);
            cur.ins().call(stop, None, &[kind]);
            cur.ins().return_(None);
        }

        assert_eq!(infer_trace_inputs(&mut module), Ok(true));
        let func = module.func(f);
        let args = start_call_args(&module, f);
        assert_eq!(args.len(), 2);
        // The input is the iadd result, not the argument.
        let t = args[1];
        assert!(matches!(
            func.dfg.value_def(t),
            crate::ir::ValueDef::Result(_)
        ));
    }

    #[test]
    fn missing_stop_marker_is_an_error() {
        let (mut module, start, _stop, f) = marker_module(vec![], true);
        {
            let func = module.func_mut(f);
            let kind = func.dfg.iconst(I64, 0);
            let block0 = func.dfg.make_block();
            let mut cur = FuncCursor::new(func);
            cur.insert_block(block0);
            cur.ins().call(start, None, &[kind]);
            cur.ins().return_(None);
        }

        match infer_trace_inputs(&mut module) {
            Err(TransformError::RegionMalformed { reason, .. }) => {
                assert!(reason.contains("no trace stop"));
            }
            other => panic!("expected RegionMalformed, got {:?}", other),
        }
    }

    #[test]
    fn multiple_start_markers_are_an_error() {
        // Only one trace region per function is permitted.
        let (mut module, start, stop, f) = marker_module(vec![], true);
        {
            let func = module.func_mut(f);
            let kind = func.dfg.iconst(I64, 0);
            let block0 = func.dfg.make_block();
            let mut cur = FuncCursor::new(func);
            cur.insert_block(block0);
            cur.ins().call(start, None, &[kind]);
            cur.ins().call(start, None, &[kind]);
            cur.ins().call(stop, None, &[kind]);
            cur.ins().return_(None);
        }

        match infer_trace_inputs(&mut module) {
            Err(TransformError::RegionMalformed { reason, .. }) => {
                assert!(reason.contains("multiple trace start"));
            }
            other => panic!("expected RegionMalformed, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_stop_marker_is_an_error() {
        let (mut module, start, stop, f) = marker_module(vec![], true);
        {
            let func = module.func_mut(f);
            let kind = func.dfg.iconst(I64, 0);
            let block0 = func.dfg.make_block();
            let mut cur = FuncCursor::new(func);
            cur.insert_block(block0);
            cur.ins().call(start, None, &[kind]);
            cur.ins().call(stop, None, &[kind]);
            cur.ins().call(stop, None, &[kind]);
            cur.ins().return_(None);
        }

        match infer_trace_inputs(&mut module) {
            Err(TransformError::RegionMalformed { reason, .. }) => {
                assert!(reason.contains("multiple trace stop"));
            }
            other => panic!("expected RegionMalformed, got {:?}", other),
        }
    }

    #[test]
    fn start_must_dominate_stop() {
        // The stop marker precedes the start marker.
        let (mut module, start, stop, f) = marker_module(vec![], true);
        {
            let func = module.func_mut(f);
            let kind = func.dfg.iconst(I64, 0);
            let block0 = func.dfg.make_block();
            let mut cur = FuncCursor::new(func);
            cur.insert_block(block0);
            cur.ins().call(stop, None, &[kind]);
            cur.ins().call(start, None, &[kind]);
            cur.ins().return_(None);
        }

        match infer_trace_inputs(&mut module) {
            Err(TransformError::RegionMalformed { reason, .. }) => {
                assert!(reason.contains("does not dominate"));
            }
            other => panic!("expected RegionMalformed, got {:?}", other),
        }
    }

    #[test]
    fn stop_must_post_dominate_start() {
        // One arm of the branch bypasses the stop marker.
        let (mut module, start, stop, f) = marker_module(vec![B1], true);
        {
            let func = module.func_mut(f);
            let c = func.arg_values()[0];
            let kind = func.dfg.iconst(I64, 0);
            let block0 = func.dfg.make_block();
            let block1 = func.dfg.make_block();
            let block2 = func.dfg.make_block();
            let mut cur = FuncCursor::new(func);
            cur.insert_block(block0);
            cur.ins().call(start, None, &[kind]);
            cur.ins().br(c, block1, block2);
            cur.insert_block(block1);
            cur.ins().call(stop, None, &[kind]);
            cur.ins().return_(None);
            cur.insert_block(block2);
            cur.ins().return_(None);
        }

        match infer_trace_inputs(&mut module) {
            Err(TransformError::RegionMalformed { reason, .. }) => {
                assert!(reason.contains("post-dominate"));
            }
            other => panic!("expected RegionMalformed, got {:?}", other),
        }
    }

    #[test]
    fn indirect_jumps_disable_the_shape_checks() {
        // The same bypassing shape as above, but the function contains an
        // indirect jump, so the checks are skipped and the walk proceeds.
        let (mut module, start, stop, f) = marker_module(vec![B1, Ptr], true);
        {
            let func = module.func_mut(f);
            let c = func.arg_values()[0];
            let addr = func.arg_values()[1];
            let kind = func.dfg.iconst(I64, 0);
            let block0 = func.dfg.make_block();
            let block1 = func.dfg.make_block();
            let block2 = func.dfg.make_block();
            let block3 = func.dfg.make_block();
            let mut cur = FuncCursor::new(func);
            cur.insert_block(block0);
            cur.ins().call(start, None, &[kind]);
            cur.ins().br(c, block1, block2);
            cur.insert_block(block1);
            cur.ins().call(stop, None, &[kind]);
            cur.ins().return_(None);
            cur.insert_block(block2);
            cur.ins().indirect_jump(addr, &[block3]);
            cur.insert_block(block3);
            cur.ins().return_(None);
        }

        assert_eq!(infer_trace_inputs(&mut module), Ok(true));
        let args = start_call_args(&module, f);
        // %c is used by the branch inside the region; %addr by the
        // indirect jump on the unchecked path.
        let func = module.func(f);
        assert!(args.contains(&func.arg_values()[0]));
        assert!(args.contains(&func.arg_values()[1]));
    }

    #[test]
    fn inputs_are_in_first_use_order() {
        let (mut module, start, stop, f) = marker_module(vec![I32, I32, I32], true);
        let kind;
        {
            let func = module.func_mut(f);
            let a = func.arg_values()[0];
            let b = func.arg_values()[1];
            let c = func.arg_values()[2];
            kind = func.dfg.iconst(I64, 0);
            let block0 = func.dfg.make_block();
            let mut cur = FuncCursor::new(func);
            cur.insert_block(block0);
            cur.ins().call(start, None, &[kind]);
            // First uses in the order c, a, b.
            cur.ins().iadd(c, c);
            cur.ins().iadd(a, c);
            cur.ins().iadd(b, a);
            cur.ins().call(stop, None, &[kind]);
            cur.ins().return_(None);
        }

        assert_eq!(infer_trace_inputs(&mut module), Ok(true));
        let func = module.func(f);
        let a = func.arg_values()[0];
        let b = func.arg_values()[1];
        let c = func.arg_values()[2];
        assert_eq!(start_call_args(&module, f), vec![kind, c, a, b]);
    }
}
