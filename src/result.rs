//! Result and error types representing the outcome of transforming a
//! module.

use crate::ir::Block;
use crate::verifier::VerifierErrors;

/// An error produced by one of the transformation passes.
///
/// A missing well-known symbol is deliberately not an error: a pass whose
/// symbol is absent simply reports that it changed nothing.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum TransformError {
    /// A trace region is malformed: its stop marker is missing or
    /// duplicated, or the markers fail the dominance checks.
    #[error("malformed trace region in function {func}: {reason}")]
    RegionMalformed {
        /// Name of the function containing the bad region.
        func: String,
        /// What exactly was wrong with it.
        reason: String,
    },

    /// Select elimination found a terminator it did not itself create where
    /// the block split's unconditional branch should be. This indicates an
    /// internal consistency bug, not a malformed input.
    #[error("unexpected terminator in {block} while eliminating a select")]
    UnexpectedTerminator {
        /// The block whose terminator was unexpected.
        block: Block,
    },

    /// The stackmap intrinsic could not be obtained because its symbol is
    /// taken by a declaration with a different signature.
    #[error("stackmap intrinsic `{name}` is unavailable")]
    IntrinsicUnavailable {
        /// The intrinsic's symbol name.
        name: &'static str,
    },

    /// Control-point instrumentation was requested a second time.
    ///
    /// The pass is not idempotent: running it again would instrument the
    /// stackmap calls themselves, so the pipeline refuses re-entry.
    #[error("control points have already been inserted into this module")]
    ControlPointsAlreadyInserted,

    /// A module failed verification.
    #[error("verifier errors:\n{0}")]
    Verifier(VerifierErrors),
}

/// A convenient alias for a `Result` that uses `TransformError` as the
/// error type.
pub type TransformResult<T> = Result<T, TransformError>;
