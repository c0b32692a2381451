// src/lib.rs
//! Compiles coroutine/generator function bodies into flat state machines.
//!
//! A body containing suspension points (`yield`) and structured control
//! flow (`if`, `repeat`, `while`, `for`, `break`, `next`) is lowered
//! into a dense list of numbered basic blocks wired together by
//! explicit jumps (`Goto`), suspensions (`Pause`) and returns. A
//! runtime driver can then step the machine one block at a time,
//! keeping all user variables in a single flat frame between steps.
//!
//! ```
//! use reel::{Expr, Interner, MachinePrinter, lower_body};
//!
//! let mut interner = Interner::new();
//! // repeat { yield(1) }
//! let body = Expr::block(vec![Expr::repeat(Expr::block(vec![
//!     Expr::yield_(Some(Expr::lit(1))),
//! ]))]);
//! let machine = lower_body(body, &mut interner).unwrap();
//!
//! let rendered = MachinePrinter::new(&interner).print_machine(&machine);
//! assert_eq!(rendered, "B1: Goto 2\nB2: Pause(2, 1)\nB3: Return(invisible)");
//! ```

pub mod ast;
pub mod ast_display;
pub mod errors;
pub mod intern;
pub mod span;
pub mod transforms;

pub use ast::{Expr, ExprKind, Label, Literal, StateId};
pub use ast_display::MachinePrinter;
pub use errors::LowerError;
pub use intern::{Interner, Symbol};
pub use span::Span;
pub use transforms::{Machine, MachineBlock, lower_body};
