//! A module of functions.
//!
//! The module is the unit the transformation passes operate on. It owns the
//! functions, maps symbol names to them, and lazily declares the intrinsics
//! the passes emit calls to.

use crate::entity::PrimaryMap;
use rustc_hash::FxHashMap;

use crate::ir::types::Type::{I32, I64};
use crate::ir::{FuncId, Function, Signature};
use crate::result::TransformError;

/// Name of the dummy control point the interpreter author calls from the
/// dispatch loop. Higher-level instrumentation patches this call.
pub const CONTROL_POINT: &str = "yk_mt_control_point";

/// Name of the begin-trace marker. Rewritten by trace input inference.
pub const TRACE_START: &str = "__yktrace_start_tracing";

/// Name of the end-trace marker. Left unchanged by trace input inference.
pub const TRACE_STOP: &str = "__yktrace_stop_tracing";

/// Name of the builtin stackmap intrinsic emitted by control-point
/// instrumentation. Signature `(i64 site_id, i32 shadow_bytes, ...) -> void`.
pub const STACKMAP: &str = "tracelift.stackmap";

/// A collection of functions with symbol lookup by name.
#[derive(Clone, Default)]
pub struct Module {
    funcs: PrimaryMap<FuncId, Function>,
    names: FxHashMap<String, FuncId>,
}

impl Module {
    /// Create an empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a function with the given name and signature and no body.
    ///
    /// The returned id can be used as a call target and the function body can
    /// be filled in later through [`Module::func_mut`].
    ///
    /// Panics if the name is already taken.
    pub fn declare_function(&mut self, name: &str, signature: Signature) -> FuncId {
        assert!(
            !self.names.contains_key(name),
            "duplicate function name: {}",
            name
        );
        let id = self
            .funcs
            .push(Function::with_name_signature(name, signature));
        self.names.insert(name.to_string(), id);
        id
    }

    /// Look up a function by symbol name.
    pub fn get_function(&self, name: &str) -> Option<FuncId> {
        self.names.get(name).copied()
    }

    /// Borrow a function.
    pub fn func(&self, id: FuncId) -> &Function {
        &self.funcs[id]
    }

    /// Mutably borrow a function.
    pub fn func_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.funcs[id]
    }

    /// Does the given function reference exist in this module?
    pub fn func_is_valid(&self, id: FuncId) -> bool {
        self.funcs.is_valid(id)
    }

    /// The ids of all functions in the module, in declaration order.
    ///
    /// Collected into a vector so passes can mutate functions while walking
    /// the list.
    pub fn func_ids(&self) -> Vec<FuncId> {
        self.funcs.keys().collect()
    }

    /// Iterate over all functions in declaration order.
    pub fn functions(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.funcs.iter()
    }

    /// Get the stackmap intrinsic, declaring it if this module does not have
    /// it yet. The declaration is module-scoped and reused by later calls.
    ///
    /// Returns `IntrinsicUnavailable` if the symbol exists with a signature
    /// other than the intrinsic's `(i64, i32, ...) -> void`.
    pub fn stackmap_intrinsic(&mut self) -> Result<FuncId, TransformError> {
        let want = Signature::vararg(vec![I64, I32], None);
        match self.get_function(STACKMAP) {
            Some(id) => {
                if self.funcs[id].signature == want {
                    Ok(id)
                } else {
                    Err(TransformError::IntrinsicUnavailable { name: STACKMAP })
                }
            }
            None => Ok(self.declare_function(STACKMAP, want)),
        }
    }
}
