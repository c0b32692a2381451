// src/transforms/machine.rs
//! Compilation context and driver.
//!
//! The [`Lowering`] context owns everything a single compilation needs:
//! the block-index counter, the pending-patch list, the loop stack, the
//! index-keyed table of sealed blocks, and the block currently under
//! construction. [`lower_body`] is the entry point: it runs the sequence
//! compiler over the body, settles dangling resume targets into the
//! final block, enforces terminators, and verifies the emitted machine
//! before handing it back.

use smallvec::SmallVec;

use crate::ast::{Expr, ExprKind, Label, StateId};
use crate::errors::LowerError;
use crate::intern::Interner;

/// One emitted basic block: a straight-line expression sequence ending
/// in exactly one control-flow terminator.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineBlock {
    pub exprs: Vec<Expr>,
}

/// The compiled output: a dense, ordered list of blocks indexed `1..=K`.
#[derive(Debug, Clone, PartialEq)]
pub struct Machine {
    blocks: Vec<MachineBlock>,
}

impl Machine {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Block at the given 1-based state index.
    pub fn block(&self, state: StateId) -> Option<&MachineBlock> {
        if state.0 == 0 {
            return None;
        }
        self.blocks.get(state.0 as usize - 1)
    }

    pub fn blocks(&self) -> &[MachineBlock] {
        &self.blocks
    }
}

/// Record on the loop stack for the innermost surrounding loop.
pub(crate) struct LoopFrame {
    /// Block index `next` jumps to (and the body tail cycles to).
    pub(crate) head: StateId,
    /// Placeholder `Goto`s awaiting the loop-exit index.
    pub(crate) breaks: SmallVec<[Label; 2]>,
}

/// Mutable state for one compilation call.
pub(crate) struct Lowering<'a> {
    pub(crate) interner: &'a mut Interner,
    /// Highest allocated block index; also the index of the first block.
    counter: u32,
    /// Pause/goto targets awaiting the next explicitly patched index.
    pending: SmallVec<[Label; 4]>,
    pub(crate) loops: Vec<LoopFrame>,
    /// Sealed blocks, keyed by index (slot `i` holds block `i + 1`).
    slots: Vec<Option<MachineBlock>>,
    /// Expressions of the block under construction.
    pub(crate) current: Vec<Expr>,
    /// Index the open block will seal at.
    pub(crate) cur_idx: StateId,
}

impl<'a> Lowering<'a> {
    pub(crate) fn new(interner: &'a mut Interner) -> Self {
        Self {
            interner,
            counter: 1,
            pending: SmallVec::new(),
            loops: Vec::new(),
            slots: Vec::new(),
            current: Vec::new(),
            cur_idx: StateId(1),
        }
    }

    /// Current highest allocated block index.
    pub(crate) fn peek(&self) -> StateId {
        StateId(self.counter)
    }

    /// Allocate the next block index.
    pub(crate) fn poke(&mut self) -> StateId {
        self.counter += 1;
        tracing::trace!(state = self.counter, "allocated block index");
        StateId(self.counter)
    }

    /// Register a target to be rewritten by the next [`patch_pending`].
    pub(crate) fn push_pending(&mut self, label: Label) {
        self.pending.push(label);
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Point every pending target at `to` and clear the list. Patching
    /// is always explicit; allocating an index never patches by itself.
    pub(crate) fn patch_pending(&mut self, to: StateId) {
        for label in self.pending.drain(..) {
            label.patch(to);
        }
    }

    /// Swap in an empty pending list for a nested compilation; the saved
    /// list is restored (and the nested leftovers merged) by
    /// [`restore_pending`].
    pub(crate) fn stash_pending(&mut self) -> SmallVec<[Label; 4]> {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn restore_pending(&mut self, saved: SmallVec<[Label; 4]>) {
        let nested = std::mem::replace(&mut self.pending, saved);
        self.pending.extend(nested);
    }

    /// Seal the open block into its slot.
    pub(crate) fn seal(&mut self) -> Result<(), LowerError> {
        let index = self.cur_idx.0 as usize;
        if self.slots.len() < index {
            self.slots.resize_with(index, || None);
        }
        let slot = &mut self.slots[index - 1];
        if slot.is_some() {
            return Err(LowerError::DuplicateBlock {
                index: self.cur_idx.0,
            });
        }
        tracing::debug!(block = %self.cur_idx, exprs = self.current.len(), "sealed block");
        *slot = Some(MachineBlock {
            exprs: std::mem::take(&mut self.current),
        });
        Ok(())
    }

    /// Seal the open block and start a new one at `to`.
    pub(crate) fn transition(&mut self, to: StateId) -> Result<(), LowerError> {
        self.seal()?;
        self.cur_idx = to;
        Ok(())
    }

    pub(crate) fn ends_exiting(&self) -> bool {
        self.current.last().is_some_and(|e| e.is_exiting())
    }

    /// Close out the compilation: settle dangling targets, enforce the
    /// final terminator, and verify the machine.
    pub(crate) fn finish(mut self) -> Result<Machine, LowerError> {
        if self.has_pending() {
            // Dangling pauses and branch joins resume at a final
            // invisible-return block.
            debug_assert!(self.ends_exiting() || self.current.is_empty());
            let exit = self.poke();
            self.patch_pending(exit);
            self.transition(exit)?;
            self.current.push(Expr::ret(None));
        } else if !self.ends_exiting() {
            match self.current.pop() {
                Some(last) if produces_value(&last) => {
                    let span = last.span;
                    self.current
                        .push(Expr::ret(Some(last)).with_span(span));
                }
                Some(last) => {
                    // Loops and assignments produce nothing to return.
                    self.current.push(last);
                    self.current.push(Expr::ret(None));
                }
                None => self.current.push(Expr::ret(None)),
            }
        }
        self.seal()?;

        let total = self.counter;
        let mut blocks = Vec::with_capacity(total as usize);
        let mut slots = self.slots.into_iter();
        for index in 1..=total {
            match slots.next().flatten() {
                Some(block) => blocks.push(block),
                None => return Err(LowerError::MissingBlock { index }),
            }
        }
        verify(&blocks, total)?;
        Ok(Machine { blocks })
    }
}

fn produces_value(expr: &Expr) -> bool {
    !matches!(
        expr.kind,
        ExprKind::Repeat(_) | ExprKind::While(_) | ExprKind::For(_) | ExprKind::Assign(_)
    )
}

/// Compile a function body into its block machine.
///
/// The body is compiled as a sequence with an empty loop stack; the
/// result is a dense list of blocks, each ending in a `Return`, `Pause`,
/// `Goto`, or an `If` whose arms both exit. The runtime driving the
/// machine must provide the iterator protocol heads `as_iterator`,
/// `has_next` and `iter_next` used by the `for` lowering, and must treat
/// `_for_iter_<k>` variables as compiler-private.
pub fn lower_body(body: Expr, interner: &mut Interner) -> Result<Machine, LowerError> {
    if let Some(span) = body.find_suspending_closure() {
        return Err(LowerError::YieldInClosure { span: span.into() });
    }
    let mut cx = Lowering::new(interner);
    let exprs = match body.kind {
        ExprKind::Block(exprs) => exprs,
        _ => vec![body],
    };
    cx.compile_seq(exprs.into())?;
    cx.finish()
}

/// Check the emitted machine against the output contract: dense indices,
/// resolved in-range targets, a terminator on every block, and no
/// unlowered control anywhere.
fn verify(blocks: &[MachineBlock], total: u32) -> Result<(), LowerError> {
    for (i, block) in blocks.iter().enumerate() {
        let index = (i + 1) as u32;
        if !block.exprs.last().is_some_and(|e| e.is_exiting()) {
            return Err(LowerError::BlockNotTerminated { index });
        }
        for expr in &block.exprs {
            verify_expr(expr, index, total, false)?;
        }
    }
    Ok(())
}

fn verify_label(label: &Label, block: u32, total: u32) -> Result<(), LowerError> {
    match label.get() {
        None => Err(LowerError::UnresolvedTarget { block }),
        Some(target) if target.0 < 1 || target.0 > total => Err(LowerError::TargetOutOfRange {
            block,
            target: target.0,
        }),
        Some(_) => Ok(()),
    }
}

/// `in_loop` marks descent into a leaf loop's body, where `break` and
/// `next` are legitimately evaluated by the runtime rather than lowered.
fn verify_expr(expr: &Expr, block: u32, total: u32, in_loop: bool) -> Result<(), LowerError> {
    match &expr.kind {
        ExprKind::Yield(_) => Err(LowerError::UnloweredControl { block }),
        ExprKind::Break | ExprKind::Next if !in_loop => {
            Err(LowerError::UnloweredControl { block })
        }
        ExprKind::Break | ExprKind::Next => Ok(()),
        ExprKind::Literal(_) | ExprKind::Identifier(_) | ExprKind::Closure(_) => Ok(()),
        ExprKind::Goto(label) => verify_label(label, block, total),
        ExprKind::Pause(pause) => {
            verify_label(&pause.resume, block, total)?;
            if let Some(value) = &pause.value {
                verify_expr(value, block, total, in_loop)?;
            }
            Ok(())
        }
        ExprKind::Call(call) => {
            verify_expr(&call.head, block, total, in_loop)?;
            for arg in &call.args {
                verify_expr(arg, block, total, in_loop)?;
            }
            Ok(())
        }
        ExprKind::Assign(assign) => verify_expr(&assign.value, block, total, in_loop),
        ExprKind::If(if_expr) => {
            verify_expr(&if_expr.cond, block, total, in_loop)?;
            verify_expr(&if_expr.then_branch, block, total, in_loop)?;
            if let Some(else_branch) = &if_expr.else_branch {
                verify_expr(else_branch, block, total, in_loop)?;
            }
            Ok(())
        }
        ExprKind::Block(exprs) | ExprKind::MachineBlock(exprs) => {
            for e in exprs {
                verify_expr(e, block, total, in_loop)?;
            }
            Ok(())
        }
        ExprKind::Repeat(body) => verify_expr(body, block, total, true),
        ExprKind::While(while_expr) => {
            verify_expr(&while_expr.cond, block, total, in_loop)?;
            verify_expr(&while_expr.body, block, total, true)
        }
        ExprKind::For(for_expr) => {
            verify_expr(&for_expr.seq, block, total, in_loop)?;
            verify_expr(&for_expr.body, block, total, true)
        }
        ExprKind::Return(value) => match value {
            Some(v) => verify_expr(v, block, total, in_loop),
            None => Ok(()),
        },
    }
}
