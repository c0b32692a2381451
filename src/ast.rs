// src/ast.rs
//! Expression model for coroutine bodies.
//!
//! There is no parser in this crate: callers build bodies through the
//! constructor helpers on [`Expr`] and hand the root to
//! [`lower_body`](crate::transforms::lower_body). The model covers the
//! user surface (`yield`, `if`, `repeat`, `while`, `for`, `break`,
//! `next`, `return`) and the emitted forms only the compiler produces
//! (`Pause`, `Goto`, machine blocks).

use std::cell::Cell;
use std::rc::Rc;

use crate::intern::Symbol;
use crate::span::Span;

/// Index of an emitted machine block. Block numbering starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub u32);

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sentinel for a jump target that has not been patched yet.
const UNRESOLVED: i32 = -1;

/// Patchable jump target carried by `Pause` and `Goto` nodes.
///
/// A label starts unresolved and is patched exactly once, when the block
/// it jumps to is allocated. The cell is shared between the node that was
/// already moved into an emitted block and the pending-patch list that
/// still has to rewrite it; cloning a label clones the *reference*, not
/// the target.
#[derive(Debug, Clone)]
pub struct Label(Rc<Cell<i32>>);

impl Label {
    pub fn unresolved() -> Self {
        Label(Rc::new(Cell::new(UNRESOLVED)))
    }

    pub fn to(state: StateId) -> Self {
        Label(Rc::new(Cell::new(state.0 as i32)))
    }

    pub fn patch(&self, state: StateId) {
        self.0.set(state.0 as i32);
    }

    pub fn get(&self) -> Option<StateId> {
        let raw = self.0.get();
        if raw == UNRESOLVED {
            None
        } else {
            Some(StateId(raw as u32))
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.0.get() != UNRESOLVED
    }
}

impl PartialEq for Label {
    /// Labels compare by target, not by identity.
    fn eq(&self, other: &Self) -> bool {
        self.0.get() == other.0.get()
    }
}

/// Literal values are opaque to the compiler; they pass through into the
/// emitted blocks untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Null,
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Bool(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::Str(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::Str(v)
    }
}

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Identifier(Symbol),
    Call(Box<CallExpr>),
    Assign(Box<AssignExpr>),
    If(Box<IfExpr>),
    Block(Vec<Expr>),
    Repeat(Box<Expr>),
    While(Box<WhileExpr>),
    For(Box<ForExpr>),
    Break,
    Next,
    /// Function return; `None` is the invisible return.
    Return(Option<Box<Expr>>),
    /// User-surface suspension; never survives into emitted blocks.
    Yield(Option<Box<Expr>>),
    /// Nested function value, opaque to the compiler. A closure whose
    /// body suspends is rejected up front.
    Closure(Box<ClosureExpr>),

    // Emitted forms. Only the compiler produces these, but they are
    // accepted in input so that an already-compiled body recompiles to
    // itself.
    Pause(Box<PauseExpr>),
    Goto(Label),
    MachineBlock(Vec<Expr>),
}

/// Generic application: head expression plus ordered arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub head: Expr,
    pub args: Vec<Expr>,
}

/// Assignment into the single flat frame: `target = value`.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignExpr {
    pub target: Symbol,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfExpr {
    pub cond: Expr,
    pub then_branch: Expr,
    pub else_branch: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileExpr {
    pub cond: Expr,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForExpr {
    pub var: Symbol,
    pub seq: Expr,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosureExpr {
    pub params: Vec<Symbol>,
    pub body: Expr,
}

/// Emitted suspension: yield `value` externally, resume at `resume`.
#[derive(Debug, Clone, PartialEq)]
pub struct PauseExpr {
    pub resume: Label,
    pub value: Option<Expr>,
}

impl Expr {
    fn new(kind: ExprKind) -> Self {
        Expr {
            kind,
            span: Span::default(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn lit(value: impl Into<Literal>) -> Self {
        Expr::new(ExprKind::Literal(value.into()))
    }

    pub fn null() -> Self {
        Expr::new(ExprKind::Literal(Literal::Null))
    }

    pub fn ident(sym: Symbol) -> Self {
        Expr::new(ExprKind::Identifier(sym))
    }

    pub fn call(head: Expr, args: Vec<Expr>) -> Self {
        Expr::new(ExprKind::Call(Box::new(CallExpr { head, args })))
    }

    pub fn assign(target: Symbol, value: Expr) -> Self {
        Expr::new(ExprKind::Assign(Box::new(AssignExpr { target, value })))
    }

    pub fn if_(cond: Expr, then_branch: Expr) -> Self {
        Expr::new(ExprKind::If(Box::new(IfExpr {
            cond,
            then_branch,
            else_branch: None,
        })))
    }

    pub fn if_else(cond: Expr, then_branch: Expr, else_branch: Expr) -> Self {
        Expr::new(ExprKind::If(Box::new(IfExpr {
            cond,
            then_branch,
            else_branch: Some(else_branch),
        })))
    }

    pub fn block(exprs: Vec<Expr>) -> Self {
        Expr::new(ExprKind::Block(exprs))
    }

    pub fn repeat(body: Expr) -> Self {
        Expr::new(ExprKind::Repeat(Box::new(body)))
    }

    pub fn while_(cond: Expr, body: Expr) -> Self {
        Expr::new(ExprKind::While(Box::new(WhileExpr { cond, body })))
    }

    pub fn for_(var: Symbol, seq: Expr, body: Expr) -> Self {
        Expr::new(ExprKind::For(Box::new(ForExpr { var, seq, body })))
    }

    pub fn break_() -> Self {
        Expr::new(ExprKind::Break)
    }

    pub fn next() -> Self {
        Expr::new(ExprKind::Next)
    }

    pub fn ret(value: Option<Expr>) -> Self {
        Expr::new(ExprKind::Return(value.map(Box::new)))
    }

    pub fn yield_(value: Option<Expr>) -> Self {
        Expr::new(ExprKind::Yield(value.map(Box::new)))
    }

    pub fn closure(params: Vec<Symbol>, body: Expr) -> Self {
        Expr::new(ExprKind::Closure(Box::new(ClosureExpr { params, body })))
    }

    pub fn pause(resume: Label, value: Option<Expr>) -> Self {
        Expr::new(ExprKind::Pause(Box::new(PauseExpr { resume, value })))
    }

    pub fn goto(label: Label) -> Self {
        Expr::new(ExprKind::Goto(label))
    }

    pub fn goto_state(state: StateId) -> Self {
        Expr::goto(Label::to(state))
    }

    pub fn machine_block(exprs: Vec<Expr>) -> Self {
        Expr::new(ExprKind::MachineBlock(exprs))
    }
}

impl Expr {
    /// Check if this expression contains a `yield` anywhere. Closures are
    /// opaque; a closure body is not searched here (a suspending closure
    /// is rejected separately before compilation starts).
    pub fn contains_yield(&self) -> bool {
        match &self.kind {
            ExprKind::Yield(_) => true,
            ExprKind::Literal(_)
            | ExprKind::Identifier(_)
            | ExprKind::Break
            | ExprKind::Next
            | ExprKind::Goto(_)
            | ExprKind::Closure(_) => false,
            ExprKind::Call(call) => {
                call.head.contains_yield() || call.args.iter().any(|a| a.contains_yield())
            }
            ExprKind::Assign(assign) => assign.value.contains_yield(),
            ExprKind::If(if_expr) => {
                if_expr.cond.contains_yield()
                    || if_expr.then_branch.contains_yield()
                    || if_expr
                        .else_branch
                        .as_ref()
                        .is_some_and(|e| e.contains_yield())
            }
            ExprKind::Block(exprs) | ExprKind::MachineBlock(exprs) => {
                exprs.iter().any(|e| e.contains_yield())
            }
            ExprKind::Repeat(body) => body.contains_yield(),
            ExprKind::While(while_expr) => {
                while_expr.cond.contains_yield() || while_expr.body.contains_yield()
            }
            ExprKind::For(for_expr) => {
                for_expr.seq.contains_yield() || for_expr.body.contains_yield()
            }
            ExprKind::Return(value) => value.as_ref().is_some_and(|v| v.contains_yield()),
            ExprKind::Pause(pause) => pause.value.as_ref().is_some_and(|v| v.contains_yield()),
        }
    }

    /// Check if this expression contains a `break` or `next` that is not
    /// captured by a loop nested inside the expression itself. Loop nodes
    /// capture their own body's loop control; closures never see ours.
    pub(crate) fn has_open_loop_control(&self) -> bool {
        match &self.kind {
            ExprKind::Break | ExprKind::Next => true,
            ExprKind::Literal(_)
            | ExprKind::Identifier(_)
            | ExprKind::Goto(_)
            | ExprKind::Closure(_)
            | ExprKind::Repeat(_)
            | ExprKind::While(_)
            | ExprKind::For(_) => false,
            ExprKind::Call(call) => {
                call.head.has_open_loop_control()
                    || call.args.iter().any(|a| a.has_open_loop_control())
            }
            ExprKind::Assign(assign) => assign.value.has_open_loop_control(),
            ExprKind::If(if_expr) => {
                if_expr.cond.has_open_loop_control()
                    || if_expr.then_branch.has_open_loop_control()
                    || if_expr
                        .else_branch
                        .as_ref()
                        .is_some_and(|e| e.has_open_loop_control())
            }
            ExprKind::Block(exprs) | ExprKind::MachineBlock(exprs) => {
                exprs.iter().any(|e| e.has_open_loop_control())
            }
            ExprKind::Return(value) | ExprKind::Yield(value) => {
                value.as_ref().is_some_and(|v| v.has_open_loop_control())
            }
            ExprKind::Pause(pause) => pause
                .value
                .as_ref()
                .is_some_and(|v| v.has_open_loop_control()),
        }
    }

    /// Decide whether compiling this cursor expression produces further
    /// blocks. Loop nodes are lowered when their body suspends anywhere
    /// or carries loop control at the loop's own level; everything else
    /// is lowered when it contains a suspension or open loop control.
    pub(crate) fn needs_lowering(&self) -> bool {
        match &self.kind {
            ExprKind::Repeat(body) => body.contains_yield() || body.has_open_loop_control(),
            ExprKind::While(while_expr) => {
                while_expr.cond.contains_yield()
                    || while_expr.body.contains_yield()
                    || while_expr.body.has_open_loop_control()
            }
            ExprKind::For(for_expr) => {
                for_expr.seq.contains_yield()
                    || for_expr.body.contains_yield()
                    || for_expr.body.has_open_loop_control()
            }
            _ => self.contains_yield() || self.has_open_loop_control(),
        }
    }

    /// Check if this expression already terminates control flow: a
    /// `Return`, `Pause` or `Goto`, an `If` both of whose branches are
    /// exiting, or a block whose last expression is exiting.
    pub fn is_exiting(&self) -> bool {
        match &self.kind {
            ExprKind::Return(_) | ExprKind::Pause(_) | ExprKind::Goto(_) => true,
            ExprKind::If(if_expr) => {
                if_expr.then_branch.is_exiting()
                    && if_expr
                        .else_branch
                        .as_ref()
                        .is_some_and(|e| e.is_exiting())
            }
            ExprKind::Block(exprs) | ExprKind::MachineBlock(exprs) => {
                exprs.last().is_some_and(|e| e.is_exiting())
            }
            _ => false,
        }
    }

    /// Find a closure whose body suspends, anywhere in this expression.
    /// Returns the closure's span for the error report.
    pub(crate) fn find_suspending_closure(&self) -> Option<Span> {
        match &self.kind {
            ExprKind::Closure(closure) => {
                if yields_anywhere(&closure.body) {
                    Some(self.span)
                } else {
                    None
                }
            }
            ExprKind::Literal(_)
            | ExprKind::Identifier(_)
            | ExprKind::Break
            | ExprKind::Next
            | ExprKind::Goto(_) => None,
            ExprKind::Call(call) => call
                .head
                .find_suspending_closure()
                .or_else(|| call.args.iter().find_map(|a| a.find_suspending_closure())),
            ExprKind::Assign(assign) => assign.value.find_suspending_closure(),
            ExprKind::If(if_expr) => if_expr
                .cond
                .find_suspending_closure()
                .or_else(|| if_expr.then_branch.find_suspending_closure())
                .or_else(|| {
                    if_expr
                        .else_branch
                        .as_ref()
                        .and_then(|e| e.find_suspending_closure())
                }),
            ExprKind::Block(exprs) | ExprKind::MachineBlock(exprs) => {
                exprs.iter().find_map(|e| e.find_suspending_closure())
            }
            ExprKind::Repeat(body) => body.find_suspending_closure(),
            ExprKind::While(while_expr) => while_expr
                .cond
                .find_suspending_closure()
                .or_else(|| while_expr.body.find_suspending_closure()),
            ExprKind::For(for_expr) => for_expr
                .seq
                .find_suspending_closure()
                .or_else(|| for_expr.body.find_suspending_closure()),
            ExprKind::Return(value) | ExprKind::Yield(value) => {
                value.as_ref().and_then(|v| v.find_suspending_closure())
            }
            ExprKind::Pause(pause) => pause
                .value
                .as_ref()
                .and_then(|v| v.find_suspending_closure()),
        }
    }
}

/// Like [`Expr::contains_yield`], but descends into closures too.
fn yields_anywhere(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Closure(closure) => yields_anywhere(&closure.body),
        ExprKind::Yield(_) => true,
        ExprKind::Literal(_)
        | ExprKind::Identifier(_)
        | ExprKind::Break
        | ExprKind::Next
        | ExprKind::Goto(_) => false,
        ExprKind::Call(call) => {
            yields_anywhere(&call.head) || call.args.iter().any(yields_anywhere)
        }
        ExprKind::Assign(assign) => yields_anywhere(&assign.value),
        ExprKind::If(if_expr) => {
            yields_anywhere(&if_expr.cond)
                || yields_anywhere(&if_expr.then_branch)
                || if_expr.else_branch.as_ref().is_some_and(|e| yields_anywhere(e))
        }
        ExprKind::Block(exprs) | ExprKind::MachineBlock(exprs) => {
            exprs.iter().any(yields_anywhere)
        }
        ExprKind::Repeat(body) => yields_anywhere(body),
        ExprKind::While(while_expr) => {
            yields_anywhere(&while_expr.cond) || yields_anywhere(&while_expr.body)
        }
        ExprKind::For(for_expr) => {
            yields_anywhere(&for_expr.seq) || yields_anywhere(&for_expr.body)
        }
        ExprKind::Return(value) => value.as_ref().is_some_and(|v| yields_anywhere(v)),
        ExprKind::Pause(pause) => pause.value.as_ref().is_some_and(|v| yields_anywhere(v)),
    }
}
