//! Checked syntax tree produced by [`compiler::compile`](crate::compiler::compile).
//!
//! Every special form has already been validated when an [`Expr`] exists, so the
//! evaluator never re-checks arity of `if`, `let` and friends.

use std::rc::Rc;

use crate::utils::metadata::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Var(Rc<str>),
    Define(Rc<str>, Box<Expr>),
    Set(Rc<str>, Box<Expr>),
    If(Box<Expr>, Box<Expr>, Option<Box<Expr>>),
    Lambda(Rc<Lambda>),
    Do(Vec<Expr>),
    Let(Vec<(Rc<str>, Expr)>, Vec<Expr>),
    While(Box<Expr>, Vec<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Call(Box<Expr>, Vec<Expr>),
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// A function body. Chunks are lambdas without parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub name: Option<Rc<str>>,
    pub params: Vec<Rc<str>>,
    /// Name bound to the list of surplus arguments (`& rest`).
    pub rest: Option<Rc<str>>,
    pub body: Vec<Expr>,
    pub span: Span,
}

impl Lambda {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("?")
    }
}
