// src/transforms/mod.rs
//! The body-to-state-machine transformation.
//!
//! [`lower_body`] splits a coroutine body into numbered basic blocks at
//! every suspension point: the sequence compiler walks straight-line
//! code, the construct translators flatten `if`, `repeat`, `while` and
//! `for`, and the driver enforces terminators and verifies the result.

mod branch;
mod loops;
mod machine;
mod seq;

pub use machine::{Machine, MachineBlock, lower_body};
