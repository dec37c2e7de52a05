//! Program points.
//!
//! A program point is a position in a function where the live range of a
//! value can begin or end, and where dominance questions can be asked. It is
//! either an instruction or the header of a basic block.

use core::fmt;

use crate::ir::{Block, Inst};

/// A program point: an instruction, or the top of a block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ProgramPoint {
    /// An instruction in the function.
    Inst(Inst),
    /// A block header.
    Block(Block),
}

impl From<Inst> for ProgramPoint {
    fn from(inst: Inst) -> Self {
        Self::Inst(inst)
    }
}

impl From<Block> for ProgramPoint {
    fn from(block: Block) -> Self {
        Self::Block(block)
    }
}

impl fmt::Display for ProgramPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Inst(inst) => write!(f, "{}", inst),
            Self::Block(block) => write!(f, "{}", block),
        }
    }
}
