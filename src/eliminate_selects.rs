//! Select elimination.
//!
//! Rewrites every select instruction into an equivalent branching
//! control-flow diamond whose merge uses a phi. A trace-based JIT observes
//! control flow, not data flow; after this pass every choice a program
//! makes is visible to the tracer as a conditional branch.
//!
//! Each select becomes:
//!
//! ```text
//! old_block:
//!     ...
//!     br cond, true_block, false_block
//! true_block:
//!     jump merge_block
//! false_block:
//!     jump merge_block
//! merge_block:
//!     result = phi [then_val, true_block], [else_val, false_block]
//!     ...
//! ```
//!
//! Both arms are empty blocks, so no observable behavior changes.

use crate::cursor::{Cursor, FuncCursor};
use crate::ir::{Block, FuncId, Function, Inst, InstructionData, Module, Opcode};
use crate::result::{TransformError, TransformResult};

/// Rewrite every select in `module` into a branch diamond.
///
/// Returns whether anything changed. The pass is idempotent: a second run
/// finds no selects and reports no change.
pub fn eliminate_selects(module: &mut Module) -> TransformResult<bool> {
    // Collect the full list of selects before rewriting anything. The
    // rewrites split blocks, but the collected instruction references stay
    // valid: a select that has not had its turn yet merely moves into a
    // newly split block.
    let mut selects: Vec<(FuncId, Inst)> = Vec::new();
    for (id, func) in module.functions() {
        for block in func.layout.blocks() {
            for inst in func.layout.block_insts(block) {
                if func.dfg[inst].opcode() == Opcode::Select {
                    selects.push((id, inst));
                }
            }
        }
    }

    let count = selects.len();
    for (id, select) in selects {
        eliminate_select(module.func_mut(id), select)?;
    }
    if count != 0 {
        log::debug!("eliminated {} selects", count);
    }
    Ok(count != 0)
}

/// Rewrite one select instruction.
fn eliminate_select(func: &mut Function, select: Inst) -> TransformResult<()> {
    let (cond, then_val, else_val) = match func.dfg[select] {
        InstructionData::Select { args } => (args[0], args[1], args[2]),
        _ => panic!("not a select: {}", select),
    };
    let result = func
        .dfg
        .inst_result(select)
        .expect("select has no result");
    let ty = func.dfg.value_type(result);
    let old_block = func
        .layout
        .inst_block(select)
        .expect("select is not in the layout");

    // Split the block at the select. The select becomes the first
    // instruction of the merge block, and the old block is terminated by an
    // unconditional branch to it.
    let true_block = func.dfg.make_block();
    let false_block = func.dfg.make_block();
    let merge_block = split_before(func, select);

    // Replace the split's unconditional terminator with a conditional
    // branch to the (still empty) arms.
    let old_term = func
        .layout
        .last_inst(old_block)
        .expect("split left no terminator");
    match func.dfg[old_term] {
        InstructionData::Jump { dest } if dest == merge_block => {}
        _ => return Err(TransformError::UnexpectedTerminator { block: old_block }),
    }
    func.dfg[old_term] = InstructionData::Br {
        cond,
        then_dest: true_block,
        else_dest: false_block,
    };

    // The arms are empty blocks going straight to the merge block.
    let mut cur = FuncCursor::new(func);
    cur.goto_bottom(old_block);
    cur.insert_block(true_block);
    cur.ins().jump(merge_block);
    cur.insert_block(false_block);
    cur.ins().jump(merge_block);

    // The merge block chooses the value with a phi.
    cur.goto_inst(select);
    let phi = cur
        .ins()
        .phi(ty, &[(then_val, true_block), (else_val, false_block)]);

    // Redirect all uses of the select to the phi, then erase it.
    let func = cur.func;
    let phi_result = func.dfg.inst_result(phi).expect("phi has no result");
    func.dfg.replace_uses(result, phi_result);
    func.layout.remove_inst(select);

    Ok(())
}

/// Split the block containing `before` in two, leaving `before` as the
/// first instruction of the new block, and terminate the old block with a
/// jump to the new one. Returns the new block.
fn split_before(func: &mut Function, before: Inst) -> Block {
    let new_block = func.dfg.make_block();
    func.layout.split_block(new_block, before);
    let old_block = func
        .layout
        .prev_block(new_block)
        .expect("split block has no predecessor");

    // The old block's terminator moved into the new block, so phis in its
    // successors must now name the new block as their predecessor.
    if let Some(term) = func.layout.last_inst(new_block) {
        for dest in func.dfg[term].branch_destinations() {
            let phis: Vec<Inst> = func
                .layout
                .block_insts(dest)
                .take_while(|&inst| func.dfg[inst].opcode() == Opcode::Phi)
                .collect();
            for phi in phis {
                if let InstructionData::Phi { incomings } = &mut func.dfg[phi] {
                    for incoming in incomings.iter_mut() {
                        if incoming.block == old_block {
                            incoming.block = new_block;
                        }
                    }
                }
            }
        }
    }

    let mut cur = FuncCursor::new(func).at_bottom(old_block);
    cur.ins().jump(new_block);
    new_block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{Cursor, FuncCursor};
    use crate::ir::types::Type::*;
    use crate::ir::{Module, Signature};
    use crate::verifier::verify_module;

    /// Count the selects in a module.
    fn count_selects(module: &Module) -> usize {
        let mut count = 0;
        for (_, func) in module.functions() {
            for block in func.layout.blocks() {
                for inst in func.layout.block_insts(block) {
                    if func.dfg[inst].opcode() == Opcode::Select {
                        count += 1;
                    }
                }
            }
        }
        count
    }

    #[test]
    fn no_selects_no_change() {
        let mut module = Module::new();
        let f = module.declare_function("f", Signature::new(vec![], None));
        let func = module.func_mut(f);
        let block0 = func.dfg.make_block();
        let mut cur = FuncCursor::new(func);
        cur.insert_block(block0);
        cur.ins().return_(None);

        assert_eq!(eliminate_selects(&mut module), Ok(false));
    }

    #[test]
    fn single_select_becomes_a_diamond() {
        // f(c: b1, a: i32, b: i32) -> i32 { return select c, a, b }
        let mut module = Module::new();
        let f = module.declare_function("f", Signature::new(vec![B1, I32, I32], Some(I32)));
        let func = module.func_mut(f);
        let c = func.arg_values()[0];
        let a = func.arg_values()[1];
        let b = func.arg_values()[2];
        let block0 = func.dfg.make_block();
        let mut cur = FuncCursor::new(func);
        cur.insert_block(block0);
        let select = cur.ins().select(c, a, b);
        let s = cur.func.dfg.inst_result(select).unwrap();
        cur.ins().return_(Some(s));

        assert_eq!(eliminate_selects(&mut module), Ok(true));
        assert_eq!(count_selects(&module), 0);
        assert!(verify_module(&module).is_ok());

        let func = module.func(f);
        // The entry now ends with a conditional branch to the two empty
        // arms, which both jump to the merge block.
        let entry = func.layout.entry_block().unwrap();
        let entry_term = func.layout.last_inst(entry).unwrap();
        let (then_dest, else_dest) = match func.dfg[entry_term] {
            InstructionData::Br {
                cond,
                then_dest,
                else_dest,
            } => {
                assert_eq!(cond, c);
                (then_dest, else_dest)
            }
            ref other => panic!("expected br, got {:?}", other),
        };
        let merge = match func.dfg[func.layout.last_inst(then_dest).unwrap()] {
            InstructionData::Jump { dest } => dest,
            ref other => panic!("expected jump, got {:?}", other),
        };
        assert_eq!(func.layout.first_inst(then_dest), func.layout.last_inst(then_dest));
        match func.dfg[func.layout.last_inst(else_dest).unwrap()] {
            InstructionData::Jump { dest } => assert_eq!(dest, merge),
            ref other => panic!("expected jump, got {:?}", other),
        }

        // The merge block starts with the phi and returns its result.
        let phi = func.layout.first_inst(merge).unwrap();
        match &func.dfg[phi] {
            InstructionData::Phi { incomings } => {
                assert_eq!(incomings.len(), 2);
                assert!(incomings
                    .iter()
                    .any(|i| i.value == a && i.block == then_dest));
                assert!(incomings
                    .iter()
                    .any(|i| i.value == b && i.block == else_dest));
            }
            other => panic!("expected phi, got {:?}", other),
        }
        let p = func.dfg.inst_result(phi).unwrap();
        match func.dfg[func.layout.last_inst(merge).unwrap()] {
            InstructionData::Return { arg } => assert_eq!(arg, Some(p)),
            ref other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn chained_selects_in_one_block() {
        // Two selects where the second uses the first's result.
        let mut module = Module::new();
        let f = module.declare_function("f", Signature::new(vec![B1, I32, I32], Some(I32)));
        let func = module.func_mut(f);
        let c = func.arg_values()[0];
        let a = func.arg_values()[1];
        let b = func.arg_values()[2];
        let block0 = func.dfg.make_block();
        let mut cur = FuncCursor::new(func);
        cur.insert_block(block0);
        let s0 = cur.ins().select(c, a, b);
        let v0 = cur.func.dfg.inst_result(s0).unwrap();
        let s1 = cur.ins().select(c, v0, a);
        let v1 = cur.func.dfg.inst_result(s1).unwrap();
        cur.ins().return_(Some(v1));

        assert_eq!(eliminate_selects(&mut module), Ok(true));
        assert_eq!(count_selects(&module), 0);
        assert!(verify_module(&module).is_ok());
    }

    #[test]
    fn successor_phis_follow_the_split() {
        // block0 ends in a jump to a block whose phi names block0 as its
        // predecessor. After the split moves that jump into the merge
        // block, the phi must name the merge block instead.
        let mut module = Module::new();
        let f = module.declare_function("f", Signature::new(vec![B1, I32, I32], Some(I32)));
        let func = module.func_mut(f);
        let c = func.arg_values()[0];
        let a = func.arg_values()[1];
        let b = func.arg_values()[2];
        let block0 = func.dfg.make_block();
        let block1 = func.dfg.make_block();
        let mut cur = FuncCursor::new(func);
        cur.insert_block(block0);
        let select = cur.ins().select(c, a, b);
        let s = cur.func.dfg.inst_result(select).unwrap();
        cur.ins().jump(block1);
        cur.insert_block(block1);
        let phi = cur.ins().phi(I32, &[(s, block0)]);
        let p = cur.func.dfg.inst_result(phi).unwrap();
        cur.ins().return_(Some(p));

        assert_eq!(eliminate_selects(&mut module), Ok(true));
        assert!(verify_module(&module).is_ok());

        let func = module.func(f);
        // block1's phi now has the merge block as its predecessor, and its
        // incoming value is the diamond's phi.
        match &func.dfg[phi] {
            InstructionData::Phi { incomings } => {
                assert_eq!(incomings.len(), 1);
                let merge = incomings[0].block;
                assert_ne!(merge, block0);
                assert_eq!(
                    func.layout.inst_block(func.dfg.value_def(incomings[0].value).unwrap_inst()),
                    Some(merge)
                );
            }
            other => panic!("expected phi, got {:?}", other),
        }
    }

    #[test]
    fn eliminate_selects_is_idempotent() {
        let mut module = Module::new();
        let f = module.declare_function("f", Signature::new(vec![B1, I32, I32], Some(I32)));
        let func = module.func_mut(f);
        let c = func.arg_values()[0];
        let a = func.arg_values()[1];
        let b = func.arg_values()[2];
        let block0 = func.dfg.make_block();
        let mut cur = FuncCursor::new(func);
        cur.insert_block(block0);
        let select = cur.ins().select(c, a, b);
        let s = cur.func.dfg.inst_result(select).unwrap();
        cur.ins().return_(Some(s));

        assert_eq!(eliminate_selects(&mut module), Ok(true));
        let after_first = module.func(f).to_string();
        assert_eq!(eliminate_selects(&mut module), Ok(false));
        assert_eq!(module.func(f).to_string(), after_first);
    }

    #[test]
    fn selects_in_multiple_functions() {
        let mut module = Module::new();
        for name in ["f", "g"] {
            let id = module.declare_function(name, Signature::new(vec![B1, I32, I32], Some(I32)));
            let func = module.func_mut(id);
            let c = func.arg_values()[0];
            let a = func.arg_values()[1];
            let b = func.arg_values()[2];
            let block0 = func.dfg.make_block();
            let mut cur = FuncCursor::new(func);
            cur.insert_block(block0);
            let select = cur.ins().select(c, a, b);
            let s = cur.func.dfg.inst_result(select).unwrap();
            cur.ins().return_(Some(s));
        }

        assert_eq!(eliminate_selects(&mut module), Ok(true));
        assert_eq!(count_selects(&module), 0);
        assert!(verify_module(&module).is_ok());
    }
}
