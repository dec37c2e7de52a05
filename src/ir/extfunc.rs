//! Function signatures.

use core::fmt;

use crate::ir::Type;

/// The signature of a function: what arguments it takes and what it returns.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Signature {
    /// Types of the fixed parameters.
    pub params: Vec<Type>,
    /// The return type, or `None` for a void function.
    pub ret: Option<Type>,
    /// True if calls may pass extra arguments beyond the fixed parameters.
    ///
    /// The stackmap intrinsic and the trace-start marker are variadic.
    pub varargs: bool,
}

impl Signature {
    /// Create a fixed-arity signature.
    pub fn new(params: Vec<Type>, ret: Option<Type>) -> Self {
        Self {
            params,
            ret,
            varargs: false,
        }
    }

    /// Create a variadic signature with the given fixed parameter prefix.
    pub fn vararg(params: Vec<Type>, ret: Option<Type>) -> Self {
        Self {
            params,
            ret,
            varargs: true,
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        if self.varargs {
            if !self.params.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "...")?;
        }
        write!(f, ")")?;
        if let Some(ret) = self.ret {
            write!(f, " -> {}", ret)?;
        }
        Ok(())
    }
}
