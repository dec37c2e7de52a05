//! Converting IR to text.
//!
//! The textual form is what shows up in logs and test failures; there is no
//! parser for it.

use core::fmt::{self, Write};

use crate::ir::{DataFlowGraph, Function, Inst, InstructionData, Value};

/// Write `func` to `w` as text.
pub fn write_function(w: &mut dyn Write, func: &Function) -> fmt::Result {
    write!(w, "function %{}{}", func.name, func.signature)?;
    if func.is_declaration() {
        return writeln!(w, ";");
    }
    writeln!(w, " {{")?;
    for block in func.layout.blocks() {
        writeln!(w, "{}:", block)?;
        for inst in func.layout.block_insts(block) {
            write!(w, "    ")?;
            write_inst(w, &func.dfg, inst)?;
            writeln!(w)?;
        }
    }
    writeln!(w, "}}")
}

/// Write the instruction `inst` to `w` as text.
pub fn write_inst(w: &mut dyn Write, dfg: &DataFlowGraph, inst: Inst) -> fmt::Result {
    if let Some(result) = dfg.inst_result(inst) {
        write!(w, "{} = ", result)?;
    }
    let data = &dfg[inst];
    match data {
        InstructionData::Binary { opcode, args } => {
            write!(w, "{} ", opcode)?;
            write_operand(w, dfg, args[0])?;
            write!(w, ", ")?;
            write_operand(w, dfg, args[1])
        }
        InstructionData::IntCompare { cond, args } => {
            write!(w, "icmp {} ", cond)?;
            write_operand(w, dfg, args[0])?;
            write!(w, ", ")?;
            write_operand(w, dfg, args[1])
        }
        InstructionData::Select { args } => {
            write!(w, "select ")?;
            write_operand(w, dfg, args[0])?;
            write!(w, ", ")?;
            write_operand(w, dfg, args[1])?;
            write!(w, ", ")?;
            write_operand(w, dfg, args[2])
        }
        InstructionData::Phi { incomings } => {
            write!(w, "phi")?;
            for (i, incoming) in incomings.iter().enumerate() {
                if i != 0 {
                    write!(w, ",")?;
                }
                write!(w, " [")?;
                write_operand(w, dfg, incoming.value)?;
                write!(w, ", {}]", incoming.block)?;
            }
            Ok(())
        }
        InstructionData::Call { func, args } => {
            write!(w, "call {}(", func)?;
            for (i, &arg) in args.iter().enumerate() {
                if i != 0 {
                    write!(w, ", ")?;
                }
                write_operand(w, dfg, arg)?;
            }
            write!(w, ")")
        }
        InstructionData::Jump { dest } => write!(w, "jump {}", dest),
        InstructionData::Br {
            cond,
            then_dest,
            else_dest,
        } => {
            write!(w, "br ")?;
            write_operand(w, dfg, *cond)?;
            write!(w, ", {}, {}", then_dest, else_dest)
        }
        InstructionData::BrTable {
            arg,
            default,
            table,
        } => {
            write!(w, "br_table ")?;
            write_operand(w, dfg, *arg)?;
            write!(w, ", {}", default)?;
            for (case, dest) in table.iter() {
                write!(w, ", [{}: {}]", case, dest)?;
            }
            Ok(())
        }
        InstructionData::IndirectJump { arg, dests } => {
            write!(w, "indirect_jump ")?;
            write_operand(w, dfg, *arg)?;
            for dest in dests.iter() {
                write!(w, ", {}", dest)?;
            }
            Ok(())
        }
        InstructionData::Return { arg } => {
            write!(w, "return")?;
            if let Some(arg) = arg {
                write!(w, " ")?;
                write_operand(w, dfg, *arg)?;
            }
            Ok(())
        }
    }
}

/// Constants print inline as `imm.ty`; other values print as their entity
/// name.
fn write_operand(w: &mut dyn Write, dfg: &DataFlowGraph, value: Value) -> fmt::Result {
    match dfg.value_const(value) {
        Some(imm) => write!(w, "{}.{}", imm, dfg.value_type(value)),
        None => write!(w, "{}", value),
    }
}
