//! Intermediate representation of a function.
//!
//! The `Function` struct defined in this module owns all of its basic blocks
//! and instructions.

use core::fmt;

use crate::ir::{DataFlowGraph, Layout, Opcode, Signature, Value};
use crate::write::write_function;

/// A function.
///
/// A function with no blocks in its layout is a *declaration*: a symbol the
/// module knows the signature of but has no body for. Intrinsics and the
/// trace marker symbols are declarations.
#[derive(Clone)]
pub struct Function {
    /// Name of this function, used for symbol lookup in the module.
    pub name: String,

    /// Signature of this function.
    pub signature: Signature,

    /// Data flow graph containing the primary definition of all instructions,
    /// blocks and values.
    pub dfg: DataFlowGraph,

    /// Layout of blocks and instructions in the function body.
    pub layout: Layout,
}

impl Function {
    /// Create a function with the given name and signature.
    ///
    /// Values for the signature's parameters are created immediately and can
    /// be retrieved with [`Function::arg_values`].
    pub fn with_name_signature(name: impl Into<String>, signature: Signature) -> Self {
        let mut dfg = DataFlowGraph::new();
        for &ty in &signature.params {
            dfg.make_arg(ty);
        }
        Self {
            name: name.into(),
            signature,
            dfg,
            layout: Layout::new(),
        }
    }

    /// Create a new empty, anonymous function with a void signature.
    pub fn new() -> Self {
        Self::with_name_signature(String::new(), Signature::default())
    }

    /// The values of this function's arguments, in signature order.
    pub fn arg_values(&self) -> &[Value] {
        self.dfg.args()
    }

    /// Is this function a declaration without a body?
    pub fn is_declaration(&self) -> bool {
        self.layout.entry_block().is_none()
    }

    /// Does this function contain any indirect jumps?
    ///
    /// Dominator-based region validation is skipped for such functions
    /// because the analyses are conservatively incomplete there.
    pub fn has_indirect_jumps(&self) -> bool {
        self.layout.blocks().any(|block| {
            self.layout
                .block_insts(block)
                .any(|inst| self.dfg[inst].opcode() == Opcode::IndirectJump)
        })
    }
}

impl Default for Function {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_function(f, self)
    }
}
