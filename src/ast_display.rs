// src/ast_display.rs
//! Text rendering for emitted machines with symbol resolution.
//!
//! One block per line, `B<i>: expr; expr; terminator`. The notation is
//! stable and meant for tests and debugging output, not for parsing.

use std::fmt::Write;

use crate::ast::{Expr, ExprKind, Label, Literal};
use crate::intern::Interner;
use crate::transforms::{Machine, MachineBlock};

/// Renderer for machines and expressions that resolves symbols through
/// an [`Interner`].
pub struct MachinePrinter<'a> {
    interner: &'a Interner,
}

impl<'a> MachinePrinter<'a> {
    pub fn new(interner: &'a Interner) -> Self {
        Self { interner }
    }

    /// Render a whole machine, one block per line.
    pub fn print_machine(&self, machine: &Machine) -> String {
        let mut out = String::new();
        for (i, block) in machine.blocks().iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            write!(out, "B{}: ", i + 1).unwrap();
            self.write_block_body(&mut out, block);
        }
        out
    }

    pub fn print_block(&self, block: &MachineBlock) -> String {
        let mut out = String::new();
        self.write_block_body(&mut out, block);
        out
    }

    pub fn print_expr(&self, expr: &Expr) -> String {
        let mut out = String::new();
        self.write_expr(&mut out, expr);
        out
    }

    fn write_block_body(&self, out: &mut String, block: &MachineBlock) {
        self.write_exprs(out, &block.exprs);
    }

    fn write_exprs(&self, out: &mut String, exprs: &[Expr]) {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                out.push_str("; ");
            }
            self.write_expr(out, expr);
        }
    }

    fn write_expr(&self, out: &mut String, expr: &Expr) {
        match &expr.kind {
            ExprKind::Literal(lit) => self.write_literal(out, lit),
            ExprKind::Identifier(sym) => out.push_str(self.interner.resolve(*sym)),
            ExprKind::Call(call) => {
                self.write_expr(out, &call.head);
                out.push('(');
                for (i, arg) in call.args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_expr(out, arg);
                }
                out.push(')');
            }
            ExprKind::Assign(assign) => {
                out.push_str(self.interner.resolve(assign.target));
                out.push_str(" = ");
                self.write_expr(out, &assign.value);
            }
            ExprKind::If(if_expr) => {
                out.push_str("If(");
                self.write_expr(out, &if_expr.cond);
                out.push_str(", ");
                self.write_expr(out, &if_expr.then_branch);
                if let Some(else_branch) = &if_expr.else_branch {
                    out.push_str(", ");
                    self.write_expr(out, else_branch);
                }
                out.push(')');
            }
            ExprKind::Block(exprs) => {
                out.push_str("{ ");
                self.write_exprs(out, exprs);
                out.push_str(" }");
            }
            ExprKind::Repeat(body) => {
                out.push_str("Repeat(");
                self.write_expr(out, body);
                out.push(')');
            }
            ExprKind::While(while_expr) => {
                out.push_str("While(");
                self.write_expr(out, &while_expr.cond);
                out.push_str(", ");
                self.write_expr(out, &while_expr.body);
                out.push(')');
            }
            ExprKind::For(for_expr) => {
                out.push_str("For(");
                out.push_str(self.interner.resolve(for_expr.var));
                out.push_str(", ");
                self.write_expr(out, &for_expr.seq);
                out.push_str(", ");
                self.write_expr(out, &for_expr.body);
                out.push(')');
            }
            ExprKind::Break => out.push_str("Break"),
            ExprKind::Next => out.push_str("Next"),
            ExprKind::Return(value) => match value {
                Some(v) => {
                    out.push_str("Return(");
                    self.write_expr(out, v);
                    out.push(')');
                }
                None => out.push_str("Return(invisible)"),
            },
            ExprKind::Yield(value) => match value {
                Some(v) => {
                    out.push_str("Yield(");
                    self.write_expr(out, v);
                    out.push(')');
                }
                None => out.push_str("Yield"),
            },
            ExprKind::Closure(closure) => {
                out.push_str("Closure(");
                for (i, param) in closure.params.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(self.interner.resolve(*param));
                }
                out.push_str(") ");
                self.write_expr(out, &closure.body);
            }
            ExprKind::Pause(pause) => {
                out.push_str("Pause(");
                self.write_target(out, &pause.resume);
                if let Some(value) = &pause.value {
                    out.push_str(", ");
                    self.write_expr(out, value);
                }
                out.push(')');
            }
            ExprKind::Goto(label) => {
                out.push_str("Goto ");
                self.write_target(out, label);
            }
            ExprKind::MachineBlock(exprs) => {
                out.push_str("MBlock(");
                self.write_exprs(out, exprs);
                out.push(')');
            }
        }
    }

    fn write_target(&self, out: &mut String, label: &Label) {
        match label.get() {
            Some(state) => write!(out, "{state}").unwrap(),
            None => out.push('?'),
        }
    }

    fn write_literal(&self, out: &mut String, lit: &Literal) {
        match lit {
            Literal::Int(v) => write!(out, "{v}").unwrap(),
            Literal::Float(v) => write!(out, "{v:?}").unwrap(),
            Literal::Bool(true) => out.push_str("TRUE"),
            Literal::Bool(false) => out.push_str("FALSE"),
            Literal::Str(s) => write!(out, "{s:?}").unwrap(),
            Literal::Null => out.push_str("NULL"),
        }
    }
}
