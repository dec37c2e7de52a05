//! A verifier for ensuring that functions are well formed.
//! It verifies:
//!
//! block integrity
//!
//! - All blocks in the layout are non-empty.
//! - The last instruction of every block, and only it, is a terminator.
//! - Phi instructions form a leading prefix of their block.
//!
//! SSA form
//!
//! - The definition of every value used by an instruction dominates the
//!   use. Phi operands are checked at the terminator of their incoming
//!   edge's predecessor instead of at the phi itself.
//! - The incoming edges of a phi match the block's predecessors exactly.
//!
//! Types
//!
//! - Arithmetic, comparison, select, and phi operand types agree with
//!   their result types.
//! - Branch conditions are `b1`, switch arguments are integers, indirect
//!   jump targets are pointers.
//! - Returned values match the function signature.
//! - Call arguments match the callee signature, allowing extra arguments
//!   for variadic callees. (These checks need module context and are only
//!   performed by `verify_module`.)

use core::fmt;

use crate::dominator_tree::DominatorTree;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::types::Type::{B1, Ptr};
use crate::ir::{
    Block, Function, Inst, InstructionData, Module, Opcode, Signature, Value, ValueDef,
};

/// A verifier error.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct VerifierError {
    /// The name of the function where the error was found.
    pub func: String,
    /// The error message.
    pub message: String,
}

impl fmt::Display for VerifierError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "function %{}: {}", self.func, self.message)
    }
}

/// A list of verifier errors.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct VerifierErrors(pub Vec<VerifierError>);

impl VerifierErrors {
    /// Are there no errors?
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VerifierErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for error in &self.0 {
            writeln!(f, "{}", error)?;
        }
        Ok(())
    }
}

/// Verify `func` without module context.
///
/// Call signatures cannot be checked without the module; use
/// [`verify_module`] for the full set of checks.
pub fn verify_function(func: &Function) -> Result<(), VerifierErrors> {
    let mut errors = VerifierErrors::default();
    Verifier::new(func, None).run(&mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Verify every function in `module`, including call signature checks.
pub fn verify_module(module: &Module) -> Result<(), VerifierErrors> {
    let mut errors = VerifierErrors::default();
    for (_, func) in module.functions() {
        Verifier::new(func, Some(module)).run(&mut errors);
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

struct Verifier<'a> {
    func: &'a Function,
    module: Option<&'a Module>,
    cfg: ControlFlowGraph,
    domtree: DominatorTree,
}

impl<'a> Verifier<'a> {
    fn new(func: &'a Function, module: Option<&'a Module>) -> Self {
        let cfg = ControlFlowGraph::with_function(func);
        let domtree = DominatorTree::with_function(func, &cfg);
        Self {
            func,
            module,
            cfg,
            domtree,
        }
    }

    fn report(&self, errors: &mut VerifierErrors, message: String) {
        errors.0.push(VerifierError {
            func: self.func.name.clone(),
            message,
        });
    }

    fn run(&self, errors: &mut VerifierErrors) {
        // A declaration has no body to check.
        if self.func.is_declaration() {
            return;
        }
        for block in self.func.layout.blocks() {
            self.block_integrity(block, errors);
            for inst in self.func.layout.block_insts(block) {
                self.inst_integrity(block, inst, errors);
                self.inst_types(inst, errors);
            }
        }
    }

    /// Check terminator placement and phi positions within `block`.
    fn block_integrity(&self, block: Block, errors: &mut VerifierErrors) {
        let last = match self.func.layout.last_inst(block) {
            Some(last) => last,
            None => {
                self.report(errors, format!("{} is empty", block));
                return;
            }
        };
        if !self.func.dfg[last].opcode().is_terminator() {
            self.report(errors, format!("{} does not end in a terminator", block));
        }

        let mut phis_done = false;
        for inst in self.func.layout.block_insts(block) {
            let opcode = self.func.dfg[inst].opcode();
            if opcode.is_terminator() && inst != last {
                self.report(
                    errors,
                    format!("{}: terminator {} in the middle of {}", inst, opcode, block),
                );
            }
            if opcode == Opcode::Phi {
                if phis_done {
                    self.report(
                        errors,
                        format!("{}: phi after a non-phi instruction in {}", inst, block),
                    );
                }
            } else {
                phis_done = true;
            }
        }
    }

    /// Check that the operands of `inst` obey SSA dominance, and that its
    /// branch targets are laid out.
    fn inst_integrity(&self, block: Block, inst: Inst, errors: &mut VerifierErrors) {
        let data = &self.func.dfg[inst];

        for dest in data.branch_destinations() {
            if !self.func.layout.is_block_inserted(dest) {
                self.report(
                    errors,
                    format!("{}: branch target {} is not in the layout", inst, dest),
                );
            }
        }

        if let InstructionData::Phi { incomings } = data {
            // The incoming edges must match the predecessors exactly.
            let preds: Vec<Block> = self.cfg.pred_iter(block).map(|p| p.block).collect();
            for incoming in incomings {
                if !preds.contains(&incoming.block) {
                    self.report(
                        errors,
                        format!(
                            "{}: phi incoming from {} which is not a predecessor of {}",
                            inst, incoming.block, block
                        ),
                    );
                    continue;
                }
                // The incoming value must be available at the end of the
                // predecessor, not at the phi itself.
                if let Some(term) = self.func.layout.last_inst(incoming.block) {
                    self.value_dominates(incoming.value, term, inst, errors);
                }
            }
            for pred in &preds {
                let count = incomings.iter().filter(|i| i.block == *pred).count();
                if count != 1 {
                    self.report(
                        errors,
                        format!(
                            "{}: phi has {} incomings for predecessor {}",
                            inst, count, pred
                        ),
                    );
                }
            }
        } else {
            data.for_each_arg(|v| self.value_dominates(v, inst, inst, errors));
        }
    }

    /// Check that the definition of `value` dominates the program point
    /// `point`. `user` is the instruction reported in errors.
    fn value_dominates(
        &self,
        value: Value,
        point: Inst,
        user: Inst,
        errors: &mut VerifierErrors,
    ) {
        match self.func.dfg.value_def(value) {
            // Arguments and constants are available everywhere.
            ValueDef::Arg(_) | ValueDef::Const => {}
            ValueDef::Result(def) => {
                if self.func.layout.inst_block(def).is_none() {
                    self.report(
                        errors,
                        format!("{}: uses {} whose definition was removed", user, value),
                    );
                } else if def == point {
                    self.report(errors, format!("{}: uses its own result", user));
                } else if !self.domtree.dominates(def, point, &self.func.layout) {
                    self.report(
                        errors,
                        format!("{}: use of {} does not dominate it", user, value),
                    );
                }
            }
        }
    }

    /// Check the operand and result types of `inst`.
    fn inst_types(&self, inst: Inst, errors: &mut VerifierErrors) {
        let dfg = &self.func.dfg;
        let data = &dfg[inst];
        match data {
            InstructionData::Binary { opcode, args } => {
                let ty = dfg.value_type(args[0]);
                if dfg.value_type(args[1]) != ty {
                    self.report(errors, format!("{}: operand types disagree", inst));
                }
                let float_op = *opcode == Opcode::Fadd;
                if float_op != ty.is_float() {
                    self.report(errors, format!("{}: {} applied to {}", inst, opcode, ty));
                }
                self.result_type_is(inst, Some(ty), errors);
            }
            InstructionData::IntCompare { args, .. } => {
                let ty = dfg.value_type(args[0]);
                if !ty.is_int() || dfg.value_type(args[1]) != ty {
                    self.report(errors, format!("{}: bad icmp operand types", inst));
                }
                self.result_type_is(inst, Some(B1), errors);
            }
            InstructionData::Select { args } => {
                if dfg.value_type(args[0]) != B1 {
                    self.report(errors, format!("{}: select condition is not b1", inst));
                }
                let ty = dfg.value_type(args[1]);
                if dfg.value_type(args[2]) != ty {
                    self.report(errors, format!("{}: select arms disagree on type", inst));
                }
                self.result_type_is(inst, Some(ty), errors);
            }
            InstructionData::Phi { incomings } => {
                let ty = dfg
                    .inst_result(inst)
                    .map(|r| dfg.value_type(r));
                for incoming in incomings {
                    if Some(dfg.value_type(incoming.value)) != ty {
                        self.report(
                            errors,
                            format!("{}: phi incoming {} has the wrong type", inst, incoming.value),
                        );
                    }
                }
            }
            InstructionData::Call { func, args } => {
                if let Some(module) = self.module {
                    if !module.func_is_valid(*func) {
                        self.report(errors, format!("{}: call to unknown function", inst));
                        return;
                    }
                    let sig = &module.func(*func).signature;
                    self.check_call(inst, sig, args, errors);
                }
            }
            InstructionData::Jump { .. } => {}
            InstructionData::Br { cond, .. } => {
                if dfg.value_type(*cond) != B1 {
                    self.report(errors, format!("{}: branch condition is not b1", inst));
                }
            }
            InstructionData::BrTable { arg, .. } => {
                if !dfg.value_type(*arg).is_int() {
                    self.report(errors, format!("{}: switch argument is not an integer", inst));
                }
            }
            InstructionData::IndirectJump { arg, .. } => {
                if dfg.value_type(*arg) != Ptr {
                    self.report(
                        errors,
                        format!("{}: indirect jump target is not a pointer", inst),
                    );
                }
            }
            InstructionData::Return { arg } => {
                let want = self.func.signature.ret;
                match (arg, want) {
                    (Some(arg), Some(want)) => {
                        if dfg.value_type(*arg) != want {
                            self.report(errors, format!("{}: returned value has the wrong type", inst));
                        }
                    }
                    (None, None) => {}
                    (Some(_), None) => {
                        self.report(errors, format!("{}: return with a value in a void function", inst));
                    }
                    (None, Some(_)) => {
                        self.report(errors, format!("{}: return is missing a value", inst));
                    }
                }
            }
        }
    }

    /// Check a call against the callee signature.
    fn check_call(
        &self,
        inst: Inst,
        sig: &Signature,
        args: &[Value],
        errors: &mut VerifierErrors,
    ) {
        let fixed = sig.params.len();
        if args.len() < fixed || (!sig.varargs && args.len() != fixed) {
            self.report(
                errors,
                format!(
                    "{}: call has {} arguments, callee expects {}{}",
                    inst,
                    args.len(),
                    fixed,
                    if sig.varargs { "+" } else { "" }
                ),
            );
            return;
        }
        for (arg, &want) in args.iter().zip(sig.params.iter()) {
            if self.func.dfg.value_type(*arg) != want {
                self.report(errors, format!("{}: call argument {} has the wrong type", inst, arg));
            }
        }
        self.result_type_is(inst, sig.ret, errors);
    }

    /// Check that `inst` has a result of type `want`, or no result when
    /// `want` is `None`.
    fn result_type_is(
        &self,
        inst: Inst,
        want: Option<crate::ir::Type>,
        errors: &mut VerifierErrors,
    ) {
        let got = self
            .func
            .dfg
            .inst_result(inst)
            .map(|r| self.func.dfg.value_type(r));
        if got != want {
            self.report(
                errors,
                format!("{}: result type mismatch", inst),
            );
        }
    }
}
