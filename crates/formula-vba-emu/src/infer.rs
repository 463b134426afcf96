//! Heuristic typing of variables that have no value yet, for compiled-loop prologues.

use crate::analysis::LetStatements;
use crate::ast::{BinOp, Expr, Node, VbaType};
use crate::context::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferredType {
    Integer,
    String,
}

impl InferredType {
    pub fn as_vba_type(self) -> VbaType {
        match self {
            Self::Integer => VbaType::Integer,
            Self::String => VbaType::String,
        }
    }

    fn from_declared(ty: VbaType) -> Self {
        match ty {
            VbaType::String => Self::String,
            _ => Self::Integer,
        }
    }
}

/// Substrings of a right-hand side that only show up in string-valued code.
const STRING_MARKERS: &[&str] = &[
    "cstr(", "chr(", "left(", "right(", "mid(", "join(", "lcase(", "replace(", "trim(", "ucase(",
    "chrw(", " & ",
];

/// Guess the type of `var` from the assignments to it inside `region`.
///
/// Returns the type and whether the guess is certain. Without any classifiable assignment the
/// answer is an uncertain Integer.
pub fn infer_type(var: &str, region: Node<'_>, ctx: &Context) -> (InferredType, bool) {
    let mut lets = LetStatements::new(var);
    region.accept(&mut lets);
    for value in &lets.values {
        if let Some(ty) = expr_type(value, ctx) {
            return (ty, true);
        }
        let text = value.to_string().to_ascii_lowercase();
        if STRING_MARKERS.iter().any(|m| text.contains(m)) {
            return (InferredType::String, true);
        }
    }
    (InferredType::Integer, false)
}

/// Type of an expression when it is evident from its shape or from a declared return type.
pub fn expr_type(expr: &Expr, ctx: &Context) -> Option<InferredType> {
    match expr {
        Expr::Call { callee, .. } => match callee.as_ref() {
            Expr::Var(name) => call_type(name, ctx),
            _ => None,
        },
        Expr::Unary { .. } => Some(InferredType::Integer),
        Expr::Binary { op, left, right } => match op {
            BinOp::Concat => Some(InferredType::String),
            // The rightmost classifiable operand decides.
            BinOp::Add => expr_type(right, ctx).or_else(|| expr_type(left, ctx)),
            _ => Some(InferredType::Integer),
        },
        Expr::Var(name) if ctx.procedure(name).is_some() => call_type(name, ctx),
        _ => None,
    }
}

fn call_type(name: &str, ctx: &Context) -> Option<InferredType> {
    if let Some(proc) = ctx.procedure(name) {
        return proc.return_type.map(InferredType::from_declared);
    }
    let external = ctx.external(name).and_then(|e| e.alias.clone());
    ctx.library()
        .get(external.as_deref().unwrap_or(name))
        .and_then(|f| f.return_type)
        .map(InferredType::from_declared)
}
