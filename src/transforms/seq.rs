// src/transforms/seq.rs
//! The sequence compiler.
//!
//! Walks an ordered expression sequence (a function body, loop body, or
//! branch) and splits it into blocks at every suspension point. Leaves
//! accumulate into the open block; `yield` lowers to a `Pause` whose
//! resume target stays pending until the continuation block is
//! allocated; structural constructs hand off to their translators.

use std::collections::VecDeque;

use crate::ast::{Expr, ExprKind, Label};
use crate::errors::LowerError;

use super::machine::Lowering;

impl Lowering<'_> {
    /// Compile a sequence of expressions, appending blocks to the
    /// machine. On return the open block holds the sequence tail; any
    /// dangling resume targets are left pending for the caller (the
    /// enclosing loop translator or the driver) to settle.
    pub(crate) fn compile_seq(&mut self, mut queue: VecDeque<Expr>) -> Result<(), LowerError> {
        while let Some(expr) = queue.pop_front() {
            let span = expr.span;
            let lowered = expr.needs_lowering();
            match expr.kind {
                // Brace blocks are sequential composition in a single
                // flat frame; splice their contents into the walk.
                ExprKind::Block(inner) => {
                    for e in inner.into_iter().rev() {
                        queue.push_front(e);
                    }
                }

                ExprKind::Yield(value) => {
                    if value.as_ref().is_some_and(|v| v.needs_lowering()) {
                        return Err(LowerError::ControlPosition { span: span.into() });
                    }
                    tracing::trace!(block = %self.cur_idx, "lowering yield to pause");
                    let resume = Label::unresolved();
                    self.push_pending(resume.clone());
                    self.current
                        .push(Expr::pause(resume, value.map(|v| *v)).with_span(span));
                    self.resume_future(&mut queue)?;
                }

                ExprKind::If(if_expr) if lowered => {
                    self.lower_if(*if_expr, span)?;
                    self.resume_future(&mut queue)?;
                }

                // Loop translators leave the open block at the loop-exit
                // state; the rest of the sequence continues there.
                ExprKind::Repeat(body) if lowered => self.lower_repeat(*body)?,
                ExprKind::While(while_expr) if lowered => self.lower_while(*while_expr, span)?,
                ExprKind::For(for_expr) if lowered => self.lower_for(*for_expr, span)?,

                ExprKind::Break => {
                    let label = Label::unresolved();
                    match self.loops.last_mut() {
                        Some(frame) => frame.breaks.push(label.clone()),
                        None => {
                            return Err(LowerError::BreakOutsideLoop { span: span.into() });
                        }
                    }
                    self.current.push(Expr::goto(label).with_span(span));
                    self.split_unreachable(&mut queue)?;
                }

                ExprKind::Next => {
                    let head = match self.loops.last() {
                        Some(frame) => frame.head,
                        None => {
                            return Err(LowerError::NextOutsideLoop { span: span.into() });
                        }
                    };
                    self.current.push(Expr::goto_state(head).with_span(span));
                    self.split_unreachable(&mut queue)?;
                }

                ExprKind::Return(value) if !lowered => {
                    self.current
                        .push(Expr::ret(value.map(|v| *v)).with_span(span));
                    self.split_unreachable(&mut queue)?;
                }

                // Emitted forms pass through so an already-compiled body
                // recompiles to itself.
                ExprKind::Pause(pause) => {
                    let unresolved = !pause.resume.is_resolved();
                    if unresolved {
                        self.push_pending(pause.resume.clone());
                    }
                    self.current
                        .push(Expr { kind: ExprKind::Pause(pause), span });
                    if unresolved {
                        self.resume_future(&mut queue)?;
                    } else {
                        self.split_unreachable(&mut queue)?;
                    }
                }
                ExprKind::Goto(label) => {
                    self.current.push(Expr::goto(label).with_span(span));
                    self.split_unreachable(&mut queue)?;
                }
                ExprKind::MachineBlock(exprs) => {
                    self.current.extend(exprs);
                    self.split_unreachable(&mut queue)?;
                }

                // A suspension or loop control buried where the block
                // walk cannot split (call arguments, an assignment's
                // value, a return value).
                _ if lowered => {
                    return Err(LowerError::ControlPosition { span: span.into() });
                }

                kind => self.current.push(Expr { kind, span }),
            }
        }
        Ok(())
    }

    /// Begin compiling the future after a dangling suspension: allocate
    /// the continuation block, patch every pending target to it, and
    /// open it. With an empty future the targets stay pending for the
    /// enclosing translator or driver.
    fn resume_future(&mut self, queue: &mut VecDeque<Expr>) -> Result<(), LowerError> {
        if queue.is_empty() {
            return Ok(());
        }
        let idx = self.poke();
        self.patch_pending(idx);
        self.transition(idx)
    }

    /// The cursor ended the block without a resume point (`return`,
    /// `break`, `next`, a raw goto); any remaining future is unreachable
    /// but still compiled, so emission stays dense and deterministic.
    fn split_unreachable(&mut self, queue: &mut VecDeque<Expr>) -> Result<(), LowerError> {
        if queue.is_empty() {
            return Ok(());
        }
        let idx = self.poke();
        self.transition(idx)
    }
}
