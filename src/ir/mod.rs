//! Representation of a typed, SSA-form intermediate representation.
//!
//! The `ir` module defines the module/function/block/instruction hierarchy
//! the transformation passes operate on, along with the builder used to
//! construct it.

mod builder;
mod dfg;
mod entities;
mod extfunc;
mod function;
mod instructions;
mod layout;
mod module;
mod progpoint;
pub mod types;

pub use self::builder::InstBuilder;
pub use self::dfg::{DataFlowGraph, ValueDef};
pub use self::entities::{Block, FuncId, Inst, Value};
pub use self::extfunc::Signature;
pub use self::function::Function;
pub use self::instructions::{InstructionData, IntCC, Opcode, PhiIncoming};
pub use self::layout::Layout;
pub use self::module::{Module, CONTROL_POINT, STACKMAP, TRACE_START, TRACE_STOP};
pub use self::progpoint::ProgramPoint;
pub use self::types::Type;
