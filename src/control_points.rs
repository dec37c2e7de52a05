//! Control-point instrumentation.
//!
//! A deoptimising runtime must be able to reconstruct the interpreter's
//! state at every point where a trace can diverge from the recorded path:
//! every call site and every control-flow decision. This pass emits a
//! stackmap intrinsic call immediately before each such site, recording a
//! unique 64-bit site id, a 32-bit shadow constant, and the values live at
//! that point.
//!
//! Only integer values of width 8, 16, 32, or 64 bits go into the payload;
//! richer values are handled through other mechanisms.
//!
//! The pass is *not* idempotent: a second run would instrument the stackmap
//! calls themselves. The pipeline in [`Context`](crate::Context) records
//! that the pass has run and refuses re-entry.

use crate::cursor::{Cursor, FuncCursor};
use crate::flowgraph::ControlFlowGraph;
use crate::ir::types::Type::{I32, I64};
use crate::ir::{FuncId, Inst, InstructionData, Module, Opcode, Value, CONTROL_POINT};
use crate::liveness::Liveness;
use crate::result::TransformResult;
use crate::verifier::verify_module;

/// Is `data` an instrumentation site: a call, a conditional branch, or a
/// switch?
fn is_site(data: &InstructionData) -> bool {
    matches!(
        data.opcode(),
        Opcode::Call | Opcode::Br | Opcode::BrTable
    )
}

/// Insert a stackmap intrinsic call before every call, conditional branch,
/// and switch in `module`.
///
/// Site ids are dense, start at 0, and follow the instruction walk order,
/// so they are stable across runs. If the instrumented module fails
/// verification the error is reported through the diagnostic log and the
/// pass reports no changes.
pub fn insert_control_points(module: &mut Module) -> TransformResult<bool> {
    let stackmap = module.stackmap_intrinsic()?;

    // Record every site together with its live set before touching
    // anything; inserting while walking would instrument our own calls.
    let mut sites: Vec<(FuncId, Inst, Vec<Value>)> = Vec::new();
    for id in module.func_ids() {
        let func = module.func(id);
        if func.is_declaration() {
            continue;
        }
        let cfg = ControlFlowGraph::with_function(func);
        let liveness = Liveness::with_function(func, &cfg);
        for block in func.layout.blocks() {
            for inst in func.layout.block_insts(block) {
                if is_site(&func.dfg[inst]) {
                    let live: Vec<Value> =
                        liveness.live_before(inst).iter().copied().collect();
                    sites.push((id, inst, live));
                }
            }
        }
    }

    let changed = !sites.is_empty();
    let mut count: u64 = 0;
    let mut live_count: u64 = 0;
    for (id, inst, live) in sites {
        let func = module.func_mut(id);
        let site_id = func.dfg.iconst(I64, count as i64);
        let shadow = func.dfg.iconst(I32, 0);
        let mut args = vec![site_id, shadow];
        // The stackmap payload is restricted to plain integers.
        for value in live {
            if func.dfg.value_type(value).is_int() {
                args.push(value);
                live_count += 1;
            }
        }
        let mut cur = FuncCursor::new(func).at_inst(inst);
        cur.ins().call(stackmap, None, &args);
        count += 1;
    }
    log::debug!("injected {} stackmaps recording {} live values", count, live_count);

    // This pass runs after the host compiler has verified the module, so a
    // failure here means we produced the invalid IR ourselves.
    if let Err(errors) = verify_module(module) {
        log::error!("control point pass generated invalid IR:\n{}", errors);
        return Ok(false);
    }
    Ok(changed)
}

/// Locate the single call to the dummy control point in `module`.
///
/// Returns `None` when the module does not use the control point symbol.
/// If the program calls it more than once, the first call in walk order is
/// returned; multiple control points are not supported at this stage.
pub fn find_control_point_call(module: &Module) -> Option<(FuncId, Inst)> {
    let target = module.get_function(CONTROL_POINT)?;
    for (id, func) in module.functions() {
        for block in func.layout.blocks() {
            for inst in func.layout.block_insts(block) {
                if let InstructionData::Call { func: callee, .. } = &func.dfg[inst] {
                    if *callee == target {
                        return Some((id, inst));
                    }
                }
            }
        }
    }
    None
}
