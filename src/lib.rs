//! Tracelift: IR transformation passes for trace-based JIT preparation.
//!
//! This library operates on a typed, SSA-form intermediate representation and
//! provides the three passes that make an ahead-of-time compiled interpreter
//! traceable:
//!
//! - [`eliminate_selects`](eliminate_selects::eliminate_selects) turns every
//!   select instruction into a branch diamond merged by a phi.
//! - [`infer_trace_inputs`](trace_inputs::infer_trace_inputs) rewrites
//!   trace-start marker calls to carry the values that flow into the marked
//!   region from outside it.
//! - [`insert_control_points`](control_points::insert_control_points) records
//!   the live integer values before every call, conditional branch, and
//!   switch with a stackmap intrinsic call.
//!
//! The IR itself lives in the [`ir`] module, supporting analyses in
//! [`flowgraph`], [`dominator_tree`], and [`liveness`], and the pipeline
//! driver in [`Context`].

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub use crate::context::Context;
pub use crate::result::{TransformError, TransformResult};
pub use crate::verifier::{verify_function, verify_module};
pub use crate::write::write_function;

pub use cranelift_entity as entity;
pub use crate::entity::packed_option;

pub mod control_points;
pub mod cursor;
pub mod dominator_tree;
pub mod eliminate_selects;
pub mod flowgraph;
pub mod ir;
pub mod liveness;
pub mod settings;
pub mod trace_inputs;
pub mod verifier;
pub mod write;

mod context;
mod result;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
