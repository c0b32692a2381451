// src/errors.rs
//! Compile errors (E1xxx).
//!
//! User errors cover constructs the compiler rejects; the E19xx range is
//! internal-consistency checking on the emitted machine and should never
//! surface for a well-formed input.

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum LowerError {
    #[error("break outside of loop")]
    #[diagnostic(code(E1001))]
    BreakOutsideLoop {
        #[label("not inside a loop")]
        span: SourceSpan,
    },

    #[error("next outside of loop")]
    #[diagnostic(code(E1002))]
    NextOutsideLoop {
        #[label("not inside a loop")]
        span: SourceSpan,
    },

    #[error("yield, break, or next in an unsupported position")]
    #[diagnostic(
        code(E1003),
        help("suspensions and loop control must sit in statement position, not inside another expression")
    )]
    ControlPosition {
        #[label("cannot suspend or branch here")]
        span: SourceSpan,
    },

    #[error("yield inside a nested function")]
    #[diagnostic(
        code(E1004),
        help("a generator cannot suspend across a closure boundary")
    )]
    YieldInClosure {
        #[label("closure defined here")]
        span: SourceSpan,
    },

    #[error("internal: unresolved jump target in block {block}")]
    #[diagnostic(code(E1900))]
    UnresolvedTarget { block: u32 },

    #[error("internal: block {index} emitted twice")]
    #[diagnostic(code(E1901))]
    DuplicateBlock { index: u32 },

    #[error("internal: no block emitted for state {index}")]
    #[diagnostic(code(E1902))]
    MissingBlock { index: u32 },

    #[error("internal: unlowered control form left in block {block}")]
    #[diagnostic(code(E1903))]
    UnloweredControl { block: u32 },

    #[error("internal: block {index} has no terminator")]
    #[diagnostic(code(E1904))]
    BlockNotTerminated { index: u32 },

    #[error("internal: block {block} jumps to state {target}, which was never allocated")]
    #[diagnostic(code(E1905))]
    TargetOutOfRange { block: u32, target: u32 },
}
