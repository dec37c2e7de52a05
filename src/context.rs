//! A pipeline context for running the passes in order.
//!
//! The passes compose sequentially: select elimination must run before
//! control-point instrumentation (liveness has to see the branch diamonds),
//! and trace input inference conventionally runs between them. The context
//! enforces the order and makes the non-idempotence of control-point
//! instrumentation structural: a module instrumented through a context
//! cannot be instrumented again through it.

use crate::control_points::insert_control_points;
use crate::eliminate_selects::eliminate_selects;
use crate::ir::Module;
use crate::result::{TransformError, TransformResult};
use crate::settings::Flags;
use crate::trace_inputs::infer_trace_inputs;
use crate::verifier::verify_module;

/// Persistent state for driving the transformation pipeline.
pub struct Context {
    /// The flags the pipeline runs under.
    pub flags: Flags,
    control_points_inserted: bool,
}

impl Context {
    /// Create a new context with default flags.
    pub fn new() -> Self {
        Self::with_flags(Flags::default())
    }

    /// Create a new context with the given flags.
    pub fn with_flags(flags: Flags) -> Self {
        Self {
            flags,
            control_points_inserted: false,
        }
    }

    /// Run the full pipeline on `module`: select elimination, trace input
    /// inference, then control-point instrumentation.
    ///
    /// Returns whether the module changed.
    pub fn prepare_for_tracing(&mut self, module: &mut Module) -> TransformResult<bool> {
        let mut changed = self.eliminate_selects(module)?;
        changed |= self.infer_trace_inputs(module)?;
        changed |= self.insert_control_points(module)?;
        Ok(changed)
    }

    /// Run select elimination, verifying afterwards if the flags ask for
    /// it.
    pub fn eliminate_selects(&mut self, module: &mut Module) -> TransformResult<bool> {
        let changed = eliminate_selects(module)?;
        trace_dump("select elimination", module);
        self.maybe_verify(module)?;
        Ok(changed)
    }

    /// Run trace input inference, verifying afterwards if the flags ask
    /// for it.
    pub fn infer_trace_inputs(&mut self, module: &mut Module) -> TransformResult<bool> {
        let changed = infer_trace_inputs(module)?;
        trace_dump("trace input inference", module);
        self.maybe_verify(module)?;
        Ok(changed)
    }

    /// Run control-point instrumentation once.
    ///
    /// A second call through the same context returns
    /// [`TransformError::ControlPointsAlreadyInserted`] without touching
    /// the module: re-instrumenting would put stackmaps in front of the
    /// stackmap calls themselves.
    pub fn insert_control_points(&mut self, module: &mut Module) -> TransformResult<bool> {
        if self.control_points_inserted {
            return Err(TransformError::ControlPointsAlreadyInserted);
        }
        let changed = insert_control_points(module)?;
        trace_dump("control point instrumentation", module);
        self.control_points_inserted = true;
        Ok(changed)
    }

    fn maybe_verify(&self, module: &Module) -> TransformResult<()> {
        if self.flags.enable_verifier() {
            verify_module(module).map_err(TransformError::Verifier)?;
        }
        Ok(())
    }
}

/// Dump the whole module to the trace log.
fn trace_dump(pass: &str, module: &Module) {
    if !log::log_enabled!(log::Level::Trace) {
        return;
    }
    let mut text = String::new();
    for (_, func) in module.functions() {
        let _ = crate::write::write_function(&mut text, func);
    }
    log::trace!("module after {}:\n{}", pass, text);
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{Cursor, FuncCursor};
    use crate::ir::types::Type::*;
    use crate::ir::{Opcode, Signature, STACKMAP, TRACE_START, TRACE_STOP};

    /// An interpreter-ish function: a select feeding a traced region with a
    /// call inside.
    fn build_module() -> crate::ir::Module {
        let mut module = crate::ir::Module::new();
        let start = module.declare_function(TRACE_START, Signature::vararg(vec![I64], None));
        let stop = module.declare_function(TRACE_STOP, Signature::new(vec![I64], None));
        let h = module.declare_function("h", Signature::new(vec![I32], None));
        let f = module.declare_function("f", Signature::new(vec![B1, I32, I32], None));
        let func = module.func_mut(f);
        let c = func.arg_values()[0];
        let a = func.arg_values()[1];
        let b = func.arg_values()[2];
        let kind = func.dfg.iconst(I64, 0);
        let block0 = func.dfg.make_block();
        let mut cur = FuncCursor::new(func);
        cur.insert_block(block0);
        let select = cur.ins().select(c, a, b);
        let s = cur.func.dfg.inst_result(select).unwrap();
        cur.ins().call(start, None, &[kind]);
        cur.ins().call(h, None, &[s]);
        cur.ins().call(stop, None, &[kind]);
        cur.ins().return_(None);
        module
    }

    #[test]
    fn full_pipeline() {
        let mut module = build_module();
        let mut ctx = Context::new();
        assert_eq!(ctx.prepare_for_tracing(&mut module), Ok(true));

        // No selects remain, the start call was rewritten, and stackmaps
        // are in place.
        let mut selects = 0;
        let mut stackmaps = 0;
        let stackmap = module.get_function(STACKMAP).unwrap();
        for (_, func) in module.functions() {
            for block in func.layout.blocks() {
                for inst in func.layout.block_insts(block) {
                    match &func.dfg[inst] {
                        crate::ir::InstructionData::Call { func: callee, .. }
                            if *callee == stackmap =>
                        {
                            stackmaps += 1
                        }
                        data if data.opcode() == Opcode::Select => selects += 1,
                        _ => {}
                    }
                }
            }
        }
        assert_eq!(selects, 0);
        assert!(stackmaps > 0);
        assert!(crate::verifier::verify_module(&module).is_ok());
    }

    #[test]
    fn verifier_can_be_disabled() {
        let flags = crate::settings::Builder::default()
            .enable_verifier(false)
            .build();
        let mut module = build_module();
        let mut ctx = Context::with_flags(flags);
        assert!(!ctx.flags.enable_verifier());
        assert_eq!(ctx.prepare_for_tracing(&mut module), Ok(true));
    }

    #[test]
    fn control_points_refuse_reentry() {
        let mut module = build_module();
        let mut ctx = Context::new();
        assert_eq!(ctx.prepare_for_tracing(&mut module), Ok(true));
        assert_eq!(
            ctx.insert_control_points(&mut module),
            Err(TransformError::ControlPointsAlreadyInserted)
        );
    }
}
