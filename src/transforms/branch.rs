// src/transforms/branch.rs
//! Translator for `if` with suspension or loop control in its arms.
//!
//! The rewritten `if` is terminal: each arm becomes a small machine
//! block ending in a jump. A non-suspending arm stays inline with its
//! tail `break`/`next` lowered in place; a suspending arm (or one whose
//! loop control is not in tail position) is compiled as its own block
//! run behind a `Goto` stub. Arms that fall through jump to the join —
//! the code after the `if` — whose index materializes when the sequence
//! compiler resumes the future and patches the pending targets.

use std::collections::VecDeque;

use crate::ast::{Expr, ExprKind, IfExpr, Label};
use crate::errors::LowerError;
use crate::span::Span;

use super::machine::Lowering;

impl Lowering<'_> {
    pub(crate) fn lower_if(&mut self, if_expr: IfExpr, span: Span) -> Result<(), LowerError> {
        let IfExpr {
            cond,
            then_branch,
            else_branch,
        } = if_expr;
        if cond.contains_yield() || cond.has_open_loop_control() {
            return Err(LowerError::ControlPosition {
                span: cond.span.into(),
            });
        }

        let then_stub = self.lower_arm(then_branch)?;
        let else_stub = match else_branch {
            Some(arm) => self.lower_arm(arm)?,
            None => Expr::machine_block(vec![self.join_goto()]),
        };

        self.current
            .push(Expr::if_else(cond, then_stub, else_stub).with_span(span));
        Ok(())
    }

    /// A jump to the not-yet-allocated join point after the `if`.
    fn join_goto(&mut self) -> Expr {
        let join = Label::unresolved();
        self.push_pending(join.clone());
        Expr::goto(join)
    }

    fn lower_arm(&mut self, arm: Expr) -> Result<Expr, LowerError> {
        let exprs = flatten(arm);
        if arm_inlineable(&exprs) {
            let body = self.lower_arm_inline(exprs)?;
            Ok(Expr::machine_block(body))
        } else {
            // The arm gets its own block run; the stub jumps into it.
            let entry = self.poke();
            tracing::debug!(entry = %entry, "lowering branch arm");
            let saved_pending = self.stash_pending();
            let saved_current = std::mem::take(&mut self.current);
            let saved_idx = self.cur_idx;
            self.cur_idx = entry;

            self.compile_seq(VecDeque::from(exprs))?;
            if !self.ends_exiting() {
                let join = self.join_goto();
                self.current.push(join);
            }
            self.seal()?;

            self.cur_idx = saved_idx;
            self.current = saved_current;
            self.restore_pending(saved_pending);
            Ok(Expr::machine_block(vec![Expr::goto_state(entry)]))
        }
    }

    /// Rewrite a non-suspending arm in place: leaves pass through,
    /// tail-position `break`/`next` (possibly under nested `if`s) become
    /// jumps, and a falling-through tail gets the join jump.
    fn lower_arm_inline(&mut self, exprs: Vec<Expr>) -> Result<Vec<Expr>, LowerError> {
        let mut out = Vec::with_capacity(exprs.len() + 1);
        let mut queue = VecDeque::from(exprs);
        while let Some(expr) = queue.pop_front() {
            match expr.kind {
                ExprKind::Block(inner) => {
                    for e in inner.into_iter().rev() {
                        queue.push_front(e);
                    }
                }
                _ => {
                    let lowered = self.lower_tail_control(expr)?;
                    out.push(lowered);
                }
            }
        }
        if !out.last().is_some_and(|e| e.is_exiting()) {
            let join = self.join_goto();
            out.push(join);
        }
        Ok(out)
    }

    fn lower_tail_control(&mut self, expr: Expr) -> Result<Expr, LowerError> {
        let span = expr.span;
        let lowered = expr.needs_lowering();
        match expr.kind {
            ExprKind::Break => {
                let label = Label::unresolved();
                match self.loops.last_mut() {
                    Some(frame) => frame.breaks.push(label.clone()),
                    None => {
                        return Err(LowerError::BreakOutsideLoop { span: span.into() });
                    }
                }
                Ok(Expr::goto(label).with_span(span))
            }
            ExprKind::Next => {
                let head = match self.loops.last() {
                    Some(frame) => frame.head,
                    None => {
                        return Err(LowerError::NextOutsideLoop { span: span.into() });
                    }
                };
                Ok(Expr::goto_state(head).with_span(span))
            }
            ExprKind::If(if_expr) if lowered => {
                let IfExpr {
                    cond,
                    then_branch,
                    else_branch,
                } = *if_expr;
                let then_stub =
                    Expr::machine_block(self.lower_arm_inline(flatten(then_branch))?);
                let else_stub = match else_branch {
                    Some(arm) => Expr::machine_block(self.lower_arm_inline(flatten(arm))?),
                    None => Expr::machine_block(vec![self.join_goto()]),
                };
                Ok(Expr::if_else(cond, then_stub, else_stub).with_span(span))
            }
            kind => Ok(Expr { kind, span }),
        }
    }
}

fn flatten(arm: Expr) -> Vec<Expr> {
    match arm.kind {
        ExprKind::Block(exprs) => exprs,
        _ => vec![arm],
    }
}

/// An arm can stay inline when nothing in it suspends and every
/// `break`/`next` sits in a tail-exiting shape: the last expression,
/// possibly under nested `if`s whose arms are themselves inlineable.
fn arm_inlineable(exprs: &[Expr]) -> bool {
    let n = exprs.len();
    exprs.iter().enumerate().all(|(i, e)| {
        if !e.needs_lowering() {
            true
        } else if i + 1 == n {
            tail_control_ok(e)
        } else {
            false
        }
    })
}

fn tail_control_ok(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Break | ExprKind::Next => true,
        ExprKind::If(if_expr) => {
            if if_expr.cond.contains_yield() || if_expr.cond.has_open_loop_control() {
                return false;
            }
            branch_inlineable(&if_expr.then_branch)
                && if_expr
                    .else_branch
                    .as_ref()
                    .is_none_or(branch_inlineable)
        }
        ExprKind::Block(exprs) => arm_inlineable(exprs),
        _ => false,
    }
}

fn branch_inlineable(arm: &Expr) -> bool {
    match &arm.kind {
        ExprKind::Block(exprs) => arm_inlineable(exprs),
        _ => arm_inlineable(std::slice::from_ref(arm)),
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{Expr, ExprKind, StateId};
    use crate::intern::Interner;
    use crate::transforms::lower_body;

    fn terminal_if(block: &crate::transforms::MachineBlock) -> &crate::ast::IfExpr {
        match &block.exprs.last().unwrap().kind {
            ExprKind::If(if_expr) => if_expr,
            other => panic!("expected terminal if, got {other:?}"),
        }
    }

    #[test]
    fn asymmetric_suspension_joins_both_arms() {
        // if (c) yield(1) else "z"; "after"
        let mut interner = Interner::new();
        let c = interner.intern("c");
        let body = Expr::block(vec![
            Expr::if_else(
                Expr::ident(c),
                Expr::yield_(Some(Expr::lit(1))),
                Expr::lit("z"),
            ),
            Expr::lit("after"),
        ]);
        let machine = lower_body(body, &mut interner).unwrap();
        assert_eq!(machine.len(), 3);

        let head = terminal_if(machine.block(StateId(1)).unwrap());
        // Suspending arm jumps into its own block.
        match &head.then_branch.kind {
            ExprKind::MachineBlock(exprs) => match &exprs.last().unwrap().kind {
                ExprKind::Goto(label) => assert_eq!(label.get(), Some(StateId(2))),
                other => panic!("expected goto stub, got {other:?}"),
            },
            other => panic!("expected machine block arm, got {other:?}"),
        }
        // Inline arm keeps its code and jumps to the join.
        match &head.else_branch.as_ref().unwrap().kind {
            ExprKind::MachineBlock(exprs) => {
                assert_eq!(exprs.len(), 2);
                match &exprs[1].kind {
                    ExprKind::Goto(label) => assert_eq!(label.get(), Some(StateId(3))),
                    other => panic!("expected join goto, got {other:?}"),
                }
            }
            other => panic!("expected machine block arm, got {other:?}"),
        }
        // The pause resumes at the join.
        match &machine.block(StateId(2)).unwrap().exprs[0].kind {
            ExprKind::Pause(pause) => assert_eq!(pause.resume.get(), Some(StateId(3))),
            other => panic!("expected pause, got {other:?}"),
        }
    }

    #[test]
    fn missing_else_synthesizes_a_join_jump() {
        // if (c) yield(1)
        let mut interner = Interner::new();
        let c = interner.intern("c");
        let body = Expr::block(vec![Expr::if_(
            Expr::ident(c),
            Expr::yield_(Some(Expr::lit(1))),
        )]);
        let machine = lower_body(body, &mut interner).unwrap();
        assert_eq!(machine.len(), 3);

        let head = terminal_if(machine.block(StateId(1)).unwrap());
        match &head.else_branch.as_ref().unwrap().kind {
            ExprKind::MachineBlock(exprs) => match &exprs[0].kind {
                ExprKind::Goto(label) => assert_eq!(label.get(), Some(StateId(3))),
                other => panic!("expected goto, got {other:?}"),
            },
            other => panic!("expected machine block arm, got {other:?}"),
        }
        // Final block is the invisible return both arms reach.
        assert!(matches!(
            machine.block(StateId(3)).unwrap().exprs.last().unwrap().kind,
            ExprKind::Return(None)
        ));
    }

    #[test]
    fn both_arms_suspending_allocate_in_order() {
        // if (c) yield(1) else yield(2); "after"
        let mut interner = Interner::new();
        let c = interner.intern("c");
        let body = Expr::block(vec![
            Expr::if_else(
                Expr::ident(c),
                Expr::yield_(Some(Expr::lit(1))),
                Expr::yield_(Some(Expr::lit(2))),
            ),
            Expr::lit("after"),
        ]);
        let machine = lower_body(body, &mut interner).unwrap();
        assert_eq!(machine.len(), 4);

        // Then-arm at 2, else-arm at 3, join at 4; both pauses resume
        // at the join.
        for state in [2, 3] {
            match &machine.block(StateId(state)).unwrap().exprs[0].kind {
                ExprKind::Pause(pause) => assert_eq!(pause.resume.get(), Some(StateId(4))),
                other => panic!("expected pause, got {other:?}"),
            }
        }
    }

    #[test]
    fn yield_in_condition_is_rejected() {
        let mut interner = Interner::new();
        let body = Expr::block(vec![Expr::if_(
            Expr::yield_(Some(Expr::lit(1))),
            Expr::yield_(Some(Expr::lit(2))),
        )]);
        let err = lower_body(body, &mut interner).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::LowerError::ControlPosition { .. }
        ));
    }
}
