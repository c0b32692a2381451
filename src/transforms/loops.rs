// src/transforms/loops.rs
//! Translators for `repeat`, `while` and `for`.
//!
//! Each translator pushes a loop frame, compiles the body as a sequence
//! starting at the loop head, cycles the tail back to the head, and
//! patches every `break` to the exit state. Dangling resume targets at
//! the body's end (a tail `yield`, a dangling branch join) are patched
//! to the head: resuming after the last suspension of an iteration
//! re-enters the loop.

use std::collections::VecDeque;

use smallvec::{SmallVec, smallvec};

use crate::ast::{Expr, ExprKind, ForExpr, Label, StateId, WhileExpr};
use crate::errors::LowerError;
use crate::span::Span;

use super::machine::{LoopFrame, Lowering};

impl Lowering<'_> {
    /// `repeat { body }`: the past flows into the loop through an
    /// explicit `Goto` to the head; the head is the body's first block.
    pub(crate) fn lower_repeat(&mut self, body: Expr) -> Result<(), LowerError> {
        let head = self.poke();
        tracing::debug!(head = %head, "lowering repeat");
        self.current.push(Expr::goto_state(head));
        self.transition(head)?;

        self.loops.push(LoopFrame {
            head,
            breaks: SmallVec::new(),
        });
        self.compile_seq(into_seq(body))?;
        self.close_loop(head)
    }

    /// `while (cond) body`, as `repeat { if (cond) body else break }`
    /// with the test hoisted into a dedicated head block. The head
    /// reuses the open block when the past is empty; otherwise the past
    /// jumps to a fresh head.
    pub(crate) fn lower_while(&mut self, while_expr: WhileExpr, span: Span) -> Result<(), LowerError> {
        let WhileExpr { cond, body } = while_expr;
        if cond.contains_yield() || cond.has_open_loop_control() {
            return Err(LowerError::ControlPosition {
                span: cond.span.into(),
            });
        }

        let head = self.loop_head()?;
        tracing::debug!(head = %head, "lowering while");
        let body_idx = self.poke();
        let exit = Label::unresolved();
        self.loops.push(LoopFrame {
            head,
            breaks: smallvec![exit.clone()],
        });

        let head_if = Expr::if_else(
            cond,
            Expr::machine_block(vec![Expr::goto_state(body_idx)]),
            Expr::machine_block(vec![Expr::goto(exit)]),
        )
        .with_span(span);
        self.current.push(head_if);
        self.transition(body_idx)?;

        self.compile_seq(into_seq(body))?;
        self.close_loop(head)
    }

    /// `for (var in seq) body`, lowered to a `while` over an explicit
    /// iterator held in the hidden `_for_iter_<k>` variable.
    pub(crate) fn lower_for(&mut self, for_expr: ForExpr, span: Span) -> Result<(), LowerError> {
        let ForExpr { var, seq, body } = for_expr;
        if seq.contains_yield() || seq.has_open_loop_control() {
            return Err(LowerError::ControlPosition {
                span: seq.span.into(),
            });
        }

        let depth = self.loops.len() + 1;
        let iter_var = self.interner.intern(&format!("_for_iter_{depth}"));
        let as_iterator = self.interner.intern("as_iterator");
        let has_next = self.interner.intern("has_next");
        let iter_next = self.interner.intern("iter_next");

        let seq_span = seq.span;
        self.current.push(
            Expr::assign(iter_var, Expr::call(Expr::ident(as_iterator), vec![seq]))
                .with_span(seq_span),
        );

        // The init must not rerun on cycling, so the head always gets
        // its own block.
        let head = self.poke();
        tracing::debug!(head = %head, depth, "lowering for");
        self.current.push(Expr::goto_state(head));
        self.transition(head)?;

        let body_idx = self.poke();
        let exit = Label::unresolved();
        self.loops.push(LoopFrame {
            head,
            breaks: smallvec![exit.clone()],
        });

        let head_if = Expr::if_else(
            Expr::call(Expr::ident(has_next), vec![Expr::ident(iter_var)]),
            Expr::machine_block(vec![Expr::goto_state(body_idx)]),
            Expr::machine_block(vec![Expr::goto(exit)]),
        )
        .with_span(span);
        self.current.push(head_if);
        self.transition(body_idx)?;

        self.current.push(Expr::assign(
            var,
            Expr::call(Expr::ident(iter_next), vec![Expr::ident(iter_var)]),
        ));
        self.compile_seq(into_seq(body))?;
        self.close_loop(head)
    }

    /// The block index the loop test lives at: the open block if it is
    /// still empty, otherwise a fresh block the past jumps to.
    fn loop_head(&mut self) -> Result<StateId, LowerError> {
        if self.current.is_empty() {
            // At cursor dispatch the open block is the newest allocation.
            debug_assert_eq!(self.cur_idx, self.peek());
            Ok(self.cur_idx)
        } else {
            let head = self.poke();
            self.current.push(Expr::goto_state(head));
            self.transition(head)?;
            Ok(head)
        }
    }

    /// Shared loop tail: cycle a falling-through body back to the head,
    /// patch dangling resumes to the head, open the exit block, and
    /// patch every `break` to it.
    fn close_loop(&mut self, head: StateId) -> Result<(), LowerError> {
        if !self.ends_exiting() {
            self.current.push(Expr::goto_state(head));
        }
        self.patch_pending(head);

        let exit = self.poke();
        self.transition(exit)?;
        if let Some(frame) = self.loops.pop() {
            for label in frame.breaks {
                label.patch(exit);
            }
        }
        Ok(())
    }
}

fn into_seq(body: Expr) -> VecDeque<Expr> {
    match body.kind {
        ExprKind::Block(exprs) => exprs.into(),
        _ => VecDeque::from(vec![body]),
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{Expr, ExprKind, StateId};
    use crate::intern::Interner;
    use crate::transforms::lower_body;

    #[test]
    fn repeat_with_tail_yield_cycles_through_the_pause() {
        // repeat { yield(1) }
        let mut interner = Interner::new();
        let body = Expr::block(vec![Expr::repeat(Expr::block(vec![Expr::yield_(Some(
            Expr::lit(1),
        ))]))]);
        let machine = lower_body(body, &mut interner).unwrap();
        assert_eq!(machine.len(), 3);

        // B2 pauses and resumes at itself: the loop head.
        let head = machine.block(StateId(2)).unwrap();
        match &head.exprs.last().unwrap().kind {
            ExprKind::Pause(pause) => assert_eq!(pause.resume.get(), Some(StateId(2))),
            other => panic!("expected pause terminator, got {other:?}"),
        }
    }

    #[test]
    fn loop_without_suspension_stays_a_leaf() {
        let mut interner = Interner::new();
        let body = Expr::block(vec![
            Expr::lit("before"),
            Expr::repeat(Expr::null()),
            Expr::yield_(Some(Expr::lit(1))),
            Expr::lit("after"),
        ]);
        let machine = lower_body(body, &mut interner).unwrap();
        assert_eq!(machine.len(), 2);
        let first = machine.block(StateId(1)).unwrap();
        assert!(matches!(first.exprs[1].kind, ExprKind::Repeat(_)));
    }

    #[test]
    fn for_without_suspension_stays_a_leaf() {
        let mut interner = Interner::new();
        let i = interner.intern("i");
        let xs = interner.intern("xs");
        let body = Expr::block(vec![Expr::for_(
            i,
            Expr::ident(xs),
            Expr::block(vec![Expr::lit("tick")]),
        )]);
        let machine = lower_body(body, &mut interner).unwrap();
        assert_eq!(machine.len(), 1);
        assert!(matches!(
            machine.block(StateId(1)).unwrap().exprs[0].kind,
            ExprKind::For(_)
        ));
    }

    #[test]
    fn nested_loop_break_binds_to_the_inner_frame() {
        // repeat { repeat { yield(1); break }; yield(2) }
        let mut interner = Interner::new();
        let inner = Expr::repeat(Expr::block(vec![
            Expr::yield_(Some(Expr::lit(1))),
            Expr::break_(),
        ]));
        let body = Expr::block(vec![Expr::repeat(Expr::block(vec![
            inner,
            Expr::yield_(Some(Expr::lit(2))),
        ]))]);
        let machine = lower_body(body, &mut interner).unwrap();

        // Inner break jumps to the block holding the outer body's
        // continuation (the yield(2) block), not the outer exit.
        // B1: Goto 2 (outer entry), B2: Goto 3 (inner entry),
        // B3: Pause(4, 1), B4: Goto 5 (break -> inner exit),
        // B5: Pause(2, 2) (cycles to outer head), B6: Return.
        assert_eq!(machine.len(), 6);
        let break_block = machine.block(StateId(4)).unwrap();
        match &break_block.exprs.last().unwrap().kind {
            ExprKind::Goto(label) => assert_eq!(label.get(), Some(StateId(5))),
            other => panic!("expected goto, got {other:?}"),
        }
        let outer_tail = machine.block(StateId(5)).unwrap();
        match &outer_tail.exprs.last().unwrap().kind {
            ExprKind::Pause(pause) => assert_eq!(pause.resume.get(), Some(StateId(2))),
            other => panic!("expected pause, got {other:?}"),
        }
    }
}
