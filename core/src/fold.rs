//! AST constant folding: integer operations over literal operands are
//! rewritten to literals, in place, bottom-up. Division only folds when the
//! divisor is nonzero. Runs after analysis on an already-clean program;
//! replacement nodes get fresh ids.

use crate::ast::{
    DeclInit, Expr, ExprKind, Function, IdGen, Program, Stmt, StmtKind,
    Struct,
};
use crate::repository::TypeRepository;
use crate::token::{Token, TokenKind};
use log::debug;
use std::rc::Rc;

pub fn fold_program(
    program: &Program,
    repo: &TypeRepository,
    ids: &IdGen,
) {
    for unit in &program.units {
        for f in &unit.functions {
            fold_function(f, ids);
        }
    }
    // Covers unit structs and monomorphized instances alike; folding is
    // idempotent, so revisiting a struct is harmless.
    for s in repo.all_structs() {
        fold_struct(&s, ids);
    }
    debug!("constant folding pass complete");
}

fn fold_struct(s: &Rc<Struct>, ids: &IdGen) {
    for m in &s.methods {
        fold_function(m, ids);
    }
    for c in &s.ctors {
        fold_stmt(&mut c.body.borrow_mut(), ids);
    }
    for d in &s.dtors {
        fold_stmt(&mut d.body.borrow_mut(), ids);
    }
    for p in &s.properties {
        for a in &p.accessors {
            if let Some(body) = a.body.borrow_mut().as_mut() {
                fold_stmt(body, ids);
            }
        }
    }
}

fn fold_function(f: &Rc<Function>, ids: &IdGen) {
    if let Some(body) = f.body.borrow_mut().as_mut() {
        fold_stmt(body, ids);
    }
}

fn fold_stmt(stmt: &mut Stmt, ids: &IdGen) {
    match &mut stmt.kind {
        StmtKind::Block(stmts) => {
            for s in stmts {
                fold_stmt(s, ids);
            }
        }
        StmtKind::Return { value, .. } => {
            if let Some(e) = value {
                fold_expr(e, ids);
            }
        }
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            fold_expr(cond, ids);
            fold_stmt(then_branch, ids);
            if let Some(e) = else_branch {
                fold_stmt(e, ids);
            }
        }
        StmtKind::While { cond, body } => {
            fold_expr(cond, ids);
            fold_stmt(body, ids);
        }
        StmtKind::Declaration { init, .. } => match init {
            Some(DeclInit::Expr(e)) => fold_expr(e, ids),
            Some(DeclInit::Ctor(args)) => {
                for a in args {
                    fold_expr(a, ids);
                }
            }
            None => {}
        },
        StmtKind::Expression(e) => fold_expr(e, ids),
        StmtKind::Delete { operand, .. } => fold_expr(operand, ids),
    }
}

fn fold_expr(expr: &mut Expr, ids: &IdGen) {
    // Children first, so nested constants collapse upward.
    match &mut expr.kind {
        ExprKind::Unary { right, .. } => fold_expr(right, ids),
        ExprKind::Binary { left, right, .. }
        | ExprKind::Assignment { left, right, .. } => {
            fold_expr(left, ids);
            fold_expr(right, ids);
        }
        ExprKind::MemberAccess { left, .. }
        | ExprKind::QualifiedAccess { left, .. } => fold_expr(left, ids),
        ExprKind::Call { callee, args } => {
            fold_expr(callee, ids);
            for a in args {
                fold_expr(a, ids);
            }
        }
        ExprKind::New { args, .. } => {
            for a in args {
                fold_expr(a, ids);
            }
        }
        ExprKind::InitializerList { values, .. } => {
            for v in values {
                fold_expr(v, ids);
            }
        }
        _ => {}
    }

    let folded = match &expr.kind {
        ExprKind::Binary { left, op, right } => {
            match (&left.kind, &right.kind) {
                (
                    ExprKind::IntLit { value: a, .. },
                    ExprKind::IntLit { value: b, .. },
                ) => compute(op.kind, *a, *b).map(|v| (op.clone(), v)),
                _ => None,
            }
        }
        ExprKind::Unary { op, right } => match (&op.kind, &right.kind) {
            (TokenKind::Minus, ExprKind::IntLit { value, .. }) => {
                Some((op.clone(), value.wrapping_neg()))
            }
            (TokenKind::Plus, ExprKind::IntLit { value, .. }) => {
                Some((op.clone(), *value))
            }
            _ => None,
        },
        _ => None,
    };

    if let Some((at, value)) = folded {
        let id = ids.next();
        *expr = Expr {
            id,
            kind: ExprKind::IntLit {
                token: Token::new(
                    TokenKind::IntLit,
                    value.to_string(),
                    at.line,
                    at.column,
                ),
                value,
            },
        };
    }
}

/// Wrapping arithmetic; comparisons produce 0/1. `None` leaves the
/// expression unfolded.
fn compute(op: TokenKind, a: i32, b: i32) -> Option<i32> {
    match op {
        TokenKind::Plus => Some(a.wrapping_add(b)),
        TokenKind::Minus => Some(a.wrapping_sub(b)),
        TokenKind::Star => Some(a.wrapping_mul(b)),
        TokenKind::Slash => {
            if b == 0 {
                None
            } else {
                Some(a.wrapping_div(b))
            }
        }
        TokenKind::EqEq => Some((a == b) as i32),
        TokenKind::NotEq => Some((a != b) as i32),
        TokenKind::Lt => Some((a < b) as i32),
        TokenKind::Gt => Some((a > b) as i32),
        _ => None,
    }
}
