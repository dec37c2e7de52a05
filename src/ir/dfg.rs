//! Data flow graph tracking instructions and values.
//!
//! The `DataFlowGraph` owns the definitions of all instructions, blocks, and
//! values in a function, without regard to their position in the function
//! (which is the [`Layout`](crate::ir::Layout)'s business).

use core::ops::{Index, IndexMut};

use crate::entity::{PrimaryMap, SecondaryMap};
use crate::packed_option::PackedOption;
use rustc_hash::FxHashMap;

use crate::ir::{Block, Inst, InstructionData, Type, Value};

/// How a value came to be.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ValueDef {
    /// The value is the result of an instruction.
    Result(Inst),
    /// The value is the function argument with the given index.
    Arg(usize),
    /// The value is a constant.
    Const,
}

impl ValueDef {
    /// Is this value defined by the dataflow of the function, i.e. by an
    /// instruction or a function argument?
    ///
    /// Constants are operands but not dataflow: they never appear in live
    /// sets, trace-input lists, or stackmap payloads.
    pub fn is_dataflow(self) -> bool {
        matches!(self, Self::Result(_) | Self::Arg(_))
    }

    /// Unwrap the defining instruction, panicking if the value is not an
    /// instruction result.
    pub fn unwrap_inst(self) -> Inst {
        match self {
            Self::Result(inst) => inst,
            _ => panic!("not an instruction result"),
        }
    }
}

/// Internal table entry for a value.
#[derive(Clone, Debug)]
enum ValueData {
    /// Result of `inst`.
    Result { ty: Type, inst: Inst },
    /// Function argument number `num`.
    Arg { ty: Type, num: u32 },
    /// A constant with the given immediate.
    Const { ty: Type, imm: i64 },
}

/// A data flow graph defines all instructions and values in a function as
/// well as their defining relationships.
#[derive(Clone)]
pub struct DataFlowGraph {
    /// Data about all of the instructions in the function. The instructions
    /// in this map are not in program order; that is tracked by `Layout`.
    insts: PrimaryMap<Inst, InstructionData>,

    /// The single result value of each non-void instruction.
    results: SecondaryMap<Inst, PackedOption<Value>>,

    /// Definitions of all values.
    values: PrimaryMap<Value, ValueData>,

    /// The values representing the function arguments, in signature order.
    args: Vec<Value>,

    /// Interning table for constants, so a `(type, bits)` pair maps to a
    /// single `Value`.
    constants: FxHashMap<(Type, i64), Value>,

    /// Number of basic blocks created so far. Blocks carry no data of their
    /// own; membership and order live in the layout.
    num_blocks: u32,
}

impl DataFlowGraph {
    /// Create a new empty `DataFlowGraph`.
    pub fn new() -> Self {
        Self {
            insts: PrimaryMap::new(),
            results: SecondaryMap::new(),
            values: PrimaryMap::new(),
            args: Vec::new(),
            constants: FxHashMap::default(),
            num_blocks: 0,
        }
    }

    /// Clear everything.
    pub fn clear(&mut self) {
        self.insts.clear();
        self.results.clear();
        self.values.clear();
        self.args.clear();
        self.constants.clear();
        self.num_blocks = 0;
    }

    /// Get the total number of instructions created in this function,
    /// whether they are currently inserted in the layout or not.
    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    /// Does the given instruction reference exist?
    pub fn inst_is_valid(&self, inst: Inst) -> bool {
        self.insts.is_valid(inst)
    }

    /// Get the total number of basic blocks created in this function.
    pub fn num_blocks(&self) -> usize {
        self.num_blocks as usize
    }

    /// Get the total number of values.
    pub fn num_values(&self) -> usize {
        self.values.len()
    }
}

/// Handling values.
impl DataFlowGraph {
    /// Get the type of a value.
    pub fn value_type(&self, v: Value) -> Type {
        match self.values[v] {
            ValueData::Result { ty, .. }
            | ValueData::Arg { ty, .. }
            | ValueData::Const { ty, .. } => ty,
        }
    }

    /// Get the definition of a value.
    pub fn value_def(&self, v: Value) -> ValueDef {
        match self.values[v] {
            ValueData::Result { inst, .. } => ValueDef::Result(inst),
            ValueData::Arg { num, .. } => ValueDef::Arg(num as usize),
            ValueData::Const { .. } => ValueDef::Const,
        }
    }

    /// If `v` is a constant, get its immediate bits.
    pub fn value_const(&self, v: Value) -> Option<i64> {
        match self.values[v] {
            ValueData::Const { imm, .. } => Some(imm),
            _ => None,
        }
    }

    /// Get an interned constant value.
    pub fn iconst(&mut self, ty: Type, imm: i64) -> Value {
        if let Some(&v) = self.constants.get(&(ty, imm)) {
            return v;
        }
        let v = self.values.push(ValueData::Const { ty, imm });
        self.constants.insert((ty, imm), v);
        v
    }

    /// Create the next function argument value. Called by
    /// `Function::with_name_signature` in signature order.
    pub fn make_arg(&mut self, ty: Type) -> Value {
        let num = u32::try_from(self.args.len()).expect("too many arguments");
        let v = self.values.push(ValueData::Arg { ty, num });
        self.args.push(v);
        v
    }

    /// The values of the function arguments, in signature order.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Rewrite every use of `old` in every instruction to `new`.
    ///
    /// This is how erased instructions hand their uses over to a
    /// replacement; the caller detaches the old instruction from the layout
    /// afterwards. Phi incomings are rewritten like any other operand.
    pub fn replace_uses(&mut self, old: Value, new: Value) {
        debug_assert_ne!(old, new, "replacing a value with itself");
        for data in self.insts.values_mut() {
            data.map_args(|v| if v == old { new } else { v });
        }
    }
}

/// Handling instructions and blocks.
impl DataFlowGraph {
    /// Create a new instruction. The instruction is not placed anywhere; use
    /// a cursor to insert it into a layout.
    pub fn make_inst(&mut self, data: InstructionData) -> Inst {
        self.insts.push(data)
    }

    /// Attach a result value of type `ty` to `inst`.
    ///
    /// Every instruction defines at most one value.
    pub fn make_inst_result(&mut self, inst: Inst, ty: Type) -> Value {
        debug_assert!(
            self.results[inst].is_none(),
            "instruction already has a result"
        );
        let v = self.values.push(ValueData::Result { ty, inst });
        self.results[inst] = v.into();
        v
    }

    /// Get the result of `inst`, or `None` if it is void.
    pub fn inst_result(&self, inst: Inst) -> Option<Value> {
        self.results[inst].expand()
    }

    /// Create a new basic block. The block is not placed anywhere; use the
    /// layout to insert it.
    pub fn make_block(&mut self) -> Block {
        let block = Block::from_u32(self.num_blocks);
        self.num_blocks += 1;
        block
    }
}

impl Default for DataFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Allow immutable access to instructions via indexing.
impl Index<Inst> for DataFlowGraph {
    type Output = InstructionData;

    fn index(&self, inst: Inst) -> &InstructionData {
        &self.insts[inst]
    }
}

/// Allow mutable access to instructions via indexing.
impl IndexMut<Inst> for DataFlowGraph {
    fn index_mut(&mut self, inst: Inst) -> &mut InstructionData {
        &mut self.insts[inst]
    }
}
