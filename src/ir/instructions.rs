//! Instruction formats and opcodes.
//!
//! The `InstructionData` enum holds the full payload of every instruction:
//! its value operands, its branch destinations, and its callee where
//! applicable. Branch destinations are `Block` references and callees are
//! `FuncId` references, not values, so neither can ever be mistaken for a
//! dataflow operand.

use core::fmt;

use smallvec::SmallVec;

use crate::ir::{Block, FuncId, Value};

/// An instruction opcode.
///
/// The terminators and the variants the transformation passes must recognise
/// (call, phi, select, the branches) each get their own format in
/// [`InstructionData`]; the plain arithmetic opcodes share the `Binary`
/// format.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Opcode {
    /// Integer add.
    Iadd,
    /// Integer subtract.
    Isub,
    /// Integer multiply.
    Imul,
    /// Float add.
    Fadd,
    /// Integer comparison producing a `b1`.
    Icmp,
    /// Ternary select.
    Select,
    /// Phi node choosing a value by predecessor edge.
    Phi,
    /// Call to a function or intrinsic named by a `FuncId`.
    Call,
    /// Unconditional branch.
    Jump,
    /// Two-way conditional branch.
    Br,
    /// Multi-way switch on an integer with a default destination.
    BrTable,
    /// Branch to a computed address with a list of possible destinations.
    IndirectJump,
    /// Return from the function.
    Return,
}

impl Opcode {
    /// True if this opcode must appear last in its block.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Self::Jump | Self::Br | Self::BrTable | Self::IndirectJump | Self::Return
        )
    }

    /// True if this opcode can transfer control to another block.
    pub fn is_branch(self) -> bool {
        matches!(self, Self::Jump | Self::Br | Self::BrTable | Self::IndirectJump)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Iadd => "iadd",
            Self::Isub => "isub",
            Self::Imul => "imul",
            Self::Fadd => "fadd",
            Self::Icmp => "icmp",
            Self::Select => "select",
            Self::Phi => "phi",
            Self::Call => "call",
            Self::Jump => "jump",
            Self::Br => "br",
            Self::BrTable => "br_table",
            Self::IndirectJump => "indirect_jump",
            Self::Return => "return",
        };
        f.write_str(s)
    }
}

/// Condition codes for integer comparisons.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum IntCC {
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// Signed `<`
    SignedLessThan,
    /// Signed `>=`
    SignedGreaterThanOrEqual,
}

impl fmt::Display for IntCC {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Equal => "eq",
            Self::NotEqual => "ne",
            Self::SignedLessThan => "slt",
            Self::SignedGreaterThanOrEqual => "sge",
        };
        f.write_str(s)
    }
}

/// A phi incoming: the value flowing in along the edge from `block`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct PhiIncoming {
    /// The incoming value.
    pub value: Value,
    /// The predecessor block this value arrives from.
    pub block: Block,
}

/// The complete payload of an instruction.
#[derive(Clone, PartialEq, Debug)]
pub enum InstructionData {
    /// A two-operand arithmetic instruction.
    Binary {
        /// One of the arithmetic opcodes.
        opcode: Opcode,
        /// The two operands.
        args: [Value; 2],
    },
    /// An integer comparison producing a `b1`.
    IntCompare {
        /// The comparison condition.
        cond: IntCC,
        /// The two operands.
        args: [Value; 2],
    },
    /// A ternary select: `cond ? then_val : else_val`.
    Select {
        /// Condition, then-value, else-value.
        args: [Value; 3],
    },
    /// A phi node. One incoming per predecessor edge.
    ///
    /// Phi operands have edge semantics, not use semantics: the liveness
    /// analysis and the trace-input walk never treat them as uses at the
    /// phi's own program point.
    Phi {
        /// The incoming value/block pairs.
        incomings: SmallVec<[PhiIncoming; 2]>,
    },
    /// A call. The callee is a symbol, not an operand.
    Call {
        /// The called function or intrinsic.
        func: FuncId,
        /// The argument values.
        args: SmallVec<[Value; 4]>,
    },
    /// An unconditional branch.
    Jump {
        /// The destination block.
        dest: Block,
    },
    /// A two-way conditional branch.
    Br {
        /// The `b1` condition.
        cond: Value,
        /// Destination when the condition is true.
        then_dest: Block,
        /// Destination when the condition is false.
        else_dest: Block,
    },
    /// A switch: compare an integer against a case table.
    BrTable {
        /// The integer being switched on.
        arg: Value,
        /// Destination when no case matches.
        default: Block,
        /// The `(case value, destination)` table.
        table: Box<[(i64, Block)]>,
    },
    /// A branch to a computed address.
    ///
    /// The possible destinations are listed so the CFG stays complete, but
    /// dominator-based analyses treat functions containing this instruction
    /// as undecidable.
    IndirectJump {
        /// The address being jumped to.
        arg: Value,
        /// All blocks this jump might target.
        dests: Box<[Block]>,
    },
    /// Return, with an optional value.
    Return {
        /// The returned value, if the function returns one.
        arg: Option<Value>,
    },
}

impl InstructionData {
    /// Get the opcode of this instruction.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Binary { opcode, .. } => *opcode,
            Self::IntCompare { .. } => Opcode::Icmp,
            Self::Select { .. } => Opcode::Select,
            Self::Phi { .. } => Opcode::Phi,
            Self::Call { .. } => Opcode::Call,
            Self::Jump { .. } => Opcode::Jump,
            Self::Br { .. } => Opcode::Br,
            Self::BrTable { .. } => Opcode::BrTable,
            Self::IndirectJump { .. } => Opcode::IndirectJump,
            Self::Return { .. } => Opcode::Return,
        }
    }

    /// Call `f` for each value operand of this instruction, in operand order.
    ///
    /// Phi incomings are visited too; callers that want use semantics rather
    /// than the raw operand list must check for `Opcode::Phi` themselves.
    pub fn for_each_arg(&self, mut f: impl FnMut(Value)) {
        match self {
            Self::Binary { args, .. } | Self::IntCompare { args, .. } => {
                f(args[0]);
                f(args[1]);
            }
            Self::Select { args } => {
                f(args[0]);
                f(args[1]);
                f(args[2]);
            }
            Self::Phi { incomings } => {
                for incoming in incomings {
                    f(incoming.value);
                }
            }
            Self::Call { args, .. } => {
                for &arg in args {
                    f(arg);
                }
            }
            Self::Jump { .. } => {}
            Self::Br { cond, .. } => f(*cond),
            Self::BrTable { arg, .. } | Self::IndirectJump { arg, .. } => f(*arg),
            Self::Return { arg } => {
                if let Some(arg) = arg {
                    f(*arg);
                }
            }
        }
    }

    /// Rewrite each value operand of this instruction with `f`.
    pub fn map_args(&mut self, mut f: impl FnMut(Value) -> Value) {
        match self {
            Self::Binary { args, .. } | Self::IntCompare { args, .. } => {
                args[0] = f(args[0]);
                args[1] = f(args[1]);
            }
            Self::Select { args } => {
                args[0] = f(args[0]);
                args[1] = f(args[1]);
                args[2] = f(args[2]);
            }
            Self::Phi { incomings } => {
                for incoming in incomings.iter_mut() {
                    incoming.value = f(incoming.value);
                }
            }
            Self::Call { args, .. } => {
                for arg in args.iter_mut() {
                    *arg = f(*arg);
                }
            }
            Self::Jump { .. } => {}
            Self::Br { cond, .. } => *cond = f(*cond),
            Self::BrTable { arg, .. } | Self::IndirectJump { arg, .. } => *arg = f(*arg),
            Self::Return { arg } => {
                if let Some(arg) = arg {
                    *arg = f(*arg);
                }
            }
        }
    }

    /// The blocks this instruction can transfer control to, in operand order.
    ///
    /// Empty for non-branches and for returns. Destinations can repeat, e.g.
    /// a conditional branch whose arms coincide.
    pub fn branch_destinations(&self) -> SmallVec<[Block; 2]> {
        match self {
            Self::Jump { dest } => SmallVec::from_slice(&[*dest]),
            Self::Br {
                then_dest,
                else_dest,
                ..
            } => SmallVec::from_slice(&[*then_dest, *else_dest]),
            Self::BrTable { default, table, .. } => {
                let mut dests = SmallVec::new();
                dests.push(*default);
                for &(_, dest) in table.iter() {
                    dests.push(dest);
                }
                dests
            }
            Self::IndirectJump { dests, .. } => SmallVec::from_slice(dests),
            _ => SmallVec::new(),
        }
    }
}
