//! IR entity references.
//!
//! Instructions need to reference other entities in a function: the values
//! they use, the blocks they branch to, and the functions they call. These
//! references are not Rust references, both because the ownership and
//! mutability rules would make the IR unworkable, and because a `u32` index
//! into a table is far more compact. There is a separate index type for each
//! entity type so we don't lose type safety.
//!
//! Compact data structures store a reference-or-null with
//! `PackedOption<EntityRef>`; function arguments and return values prefer the
//! more Rust-like `Option<EntityRef>`.
//!
//! The entity references all implement `Display` in a way that matches the
//! textual IR format.

use crate::entity::entity_impl;

/// An opaque reference to an SSA value.
///
/// A value is defined by an instruction result, a function argument, or a
/// constant; see `ValueDef` in the data flow graph.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(u32);
entity_impl!(Value, "v");

/// An opaque reference to an instruction in a function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// An opaque reference to a basic block in a function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An opaque reference to a function in a module.
///
/// Both defined functions and declarations get a `FuncId`; call instructions
/// name their callee with one, which is why a callee can never appear as a
/// dataflow operand.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(u32);
entity_impl!(FuncId, "fn");
