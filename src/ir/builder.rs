//! Instruction builder.
//!
//! An `InstBuilder` is obtained from a cursor's `ins()` method. Each builder
//! method creates one instruction, gives it a result value if its opcode
//! produces one, and inserts it at the cursor's position.

use smallvec::SmallVec;

use crate::cursor::{Cursor, FuncCursor};
use crate::ir::instructions::PhiIncoming;
use crate::ir::types::Type::{self, B1};
use crate::ir::{Block, FuncId, Inst, InstructionData, IntCC, Opcode, Value};

/// Builder inserting an instruction at a cursor position.
pub struct InstBuilder<'c, 'f> {
    cur: &'c mut FuncCursor<'f>,
}

impl<'c, 'f> InstBuilder<'c, 'f> {
    /// Create a builder inserting at the position of `cur`.
    pub fn new(cur: &'c mut FuncCursor<'f>) -> Self {
        Self { cur }
    }

    fn build(self, data: InstructionData, ty: Option<Type>) -> Inst {
        let inst = self.cur.func.dfg.make_inst(data);
        if let Some(ty) = ty {
            self.cur.func.dfg.make_inst_result(inst, ty);
        }
        self.cur.insert_inst(inst);
        inst
    }

    fn binary(self, opcode: Opcode, x: Value, y: Value) -> Inst {
        let ty = self.cur.func.dfg.value_type(x);
        self.build(InstructionData::Binary { opcode, args: [x, y] }, Some(ty))
    }

    /// Integer add.
    pub fn iadd(self, x: Value, y: Value) -> Inst {
        self.binary(Opcode::Iadd, x, y)
    }

    /// Integer subtract.
    pub fn isub(self, x: Value, y: Value) -> Inst {
        self.binary(Opcode::Isub, x, y)
    }

    /// Integer multiply.
    pub fn imul(self, x: Value, y: Value) -> Inst {
        self.binary(Opcode::Imul, x, y)
    }

    /// Float add.
    pub fn fadd(self, x: Value, y: Value) -> Inst {
        self.binary(Opcode::Fadd, x, y)
    }

    /// Integer comparison, producing a `b1`.
    pub fn icmp(self, cond: IntCC, x: Value, y: Value) -> Inst {
        self.build(InstructionData::IntCompare { cond, args: [x, y] }, Some(B1))
    }

    /// Ternary select: `cond ? then_val : else_val`.
    pub fn select(self, cond: Value, then_val: Value, else_val: Value) -> Inst {
        let ty = self.cur.func.dfg.value_type(then_val);
        self.build(
            InstructionData::Select {
                args: [cond, then_val, else_val],
            },
            Some(ty),
        )
    }

    /// Phi node of type `ty` with the given incoming value/block pairs.
    pub fn phi(self, ty: Type, incomings: &[(Value, Block)]) -> Inst {
        let incomings: SmallVec<[PhiIncoming; 2]> = incomings
            .iter()
            .map(|&(value, block)| PhiIncoming { value, block })
            .collect();
        self.build(InstructionData::Phi { incomings }, Some(ty))
    }

    /// Call `func` with `args`. `ret` must be the callee's return type; a
    /// result value is created when it is not `None`.
    pub fn call(self, func: FuncId, ret: Option<Type>, args: &[Value]) -> Inst {
        self.build(
            InstructionData::Call {
                func,
                args: SmallVec::from_slice(args),
            },
            ret,
        )
    }

    /// Unconditional branch to `dest`.
    pub fn jump(self, dest: Block) -> Inst {
        self.build(InstructionData::Jump { dest }, None)
    }

    /// Conditional branch on `cond`.
    pub fn br(self, cond: Value, then_dest: Block, else_dest: Block) -> Inst {
        self.build(
            InstructionData::Br {
                cond,
                then_dest,
                else_dest,
            },
            None,
        )
    }

    /// Switch on `arg` with a case table and a default destination.
    pub fn br_table(self, arg: Value, default: Block, table: &[(i64, Block)]) -> Inst {
        self.build(
            InstructionData::BrTable {
                arg,
                default,
                table: table.to_vec().into_boxed_slice(),
            },
            None,
        )
    }

    /// Branch to the computed address `arg`; `dests` lists every block the
    /// jump may target.
    pub fn indirect_jump(self, arg: Value, dests: &[Block]) -> Inst {
        self.build(
            InstructionData::IndirectJump {
                arg,
                dests: dests.to_vec().into_boxed_slice(),
            },
            None,
        )
    }

    /// Return, with an optional value.
    pub fn return_(self, arg: Option<Value>) -> Inst {
        self.build(InstructionData::Return { arg }, None)
    }
}
