//! Read-only visitors over the AST used by type inference and the loop compiler.

use std::collections::BTreeSet;
use std::rc::Rc;

use crate::ast::{Expr, Node, Procedure, Stmt, Visitor};
use crate::context::Context;
use crate::names::normalize;

/// Variables read anywhere in a region. Names in call position are kept apart since they may be
/// arrays or functions.
#[derive(Debug, Default)]
pub struct VarsInExpr {
    pub vars: BTreeSet<String>,
    pub callees: BTreeSet<String>,
}

impl Visitor for VarsInExpr {
    fn visit(&mut self, node: Node<'_>) -> bool {
        match node {
            Node::Expr(Expr::Var(name)) => {
                self.vars.insert(normalize(name));
            }
            Node::Expr(Expr::Call { callee, args }) => {
                if let Expr::Var(name) = callee.as_ref() {
                    self.callees.insert(normalize(name));
                    for arg in args {
                        Node::Expr(arg).accept(self);
                    }
                    return false;
                }
            }
            Node::Stmt(Stmt::Call(Expr::Var(name))) => {
                self.callees.insert(normalize(name));
                return false;
            }
            _ => {}
        }
        true
    }
}

/// Names written in a region: assignment targets, array element targets and loop indices.
#[derive(Debug, Default)]
pub struct LhsVars {
    pub vars: BTreeSet<String>,
}

pub(crate) fn assigned_name(target: &Expr) -> Option<&str> {
    match target {
        Expr::Var(name) => Some(name),
        Expr::Call { callee, .. } => match callee.as_ref() {
            Expr::Var(name) if !name.eq_ignore_ascii_case("mid") => Some(name),
            _ => None,
        },
        _ => None,
    }
}

/// `Mid(s, ...) = x` writes `s`.
fn mid_target(target: &Expr) -> Option<&str> {
    let Expr::Call { callee, args } = target else {
        return None;
    };
    match (callee.as_ref(), args.first()) {
        (Expr::Var(f), Some(Expr::Var(name))) if f.eq_ignore_ascii_case("mid") => Some(name),
        _ => None,
    }
}

impl Visitor for LhsVars {
    fn visit(&mut self, node: Node<'_>) -> bool {
        match node {
            Node::Stmt(Stmt::Assign { target, .. }) => {
                if let Some(name) = assigned_name(target).or_else(|| mid_target(target)) {
                    self.vars.insert(normalize(name));
                }
            }
            Node::Stmt(Stmt::For { var, .. } | Stmt::ForEach { var, .. }) => {
                self.vars.insert(normalize(var));
            }
            _ => {}
        }
        true
    }
}

/// Right-hand sides assigned to one variable, in source order.
#[derive(Debug)]
pub struct LetStatements {
    var: String,
    pub values: Vec<Expr>,
}

impl LetStatements {
    pub fn new(var: &str) -> Self {
        Self {
            var: normalize(var),
            values: Vec::new(),
        }
    }
}

impl Visitor for LetStatements {
    fn visit(&mut self, node: Node<'_>) -> bool {
        if let Node::Stmt(Stmt::Assign { target, value }) = node {
            if assigned_name(target).map_or(false, |n| normalize(n) == self.var) {
                self.values.push(value.clone());
            }
        }
        true
    }
}

/// Names that may be invoked: call targets and bare identifiers (VBA lets zero-argument
/// functions be called without parentheses).
#[derive(Debug, Default)]
pub struct FunctionCalls {
    pub names: BTreeSet<String>,
}

impl Visitor for FunctionCalls {
    fn visit(&mut self, node: Node<'_>) -> bool {
        if let Node::Expr(Expr::Var(name)) = node {
            self.names.insert(normalize(name));
        }
        true
    }
}

/// Local procedures reachable from `root` through calls, in a stable order.
pub fn reachable_procedures(root: Node<'_>, ctx: &Context) -> Vec<Rc<Procedure>> {
    let mut calls = FunctionCalls::default();
    root.accept(&mut calls);
    let mut seen = BTreeSet::new();
    let mut pending: Vec<String> = calls.names.into_iter().collect();
    let mut found = Vec::new();
    while let Some(name) = pending.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        let Some(proc) = ctx.procedure(&name) else {
            continue;
        };
        let mut inner = FunctionCalls::default();
        Node::Procedure(&proc).accept(&mut inner);
        pending.extend(inner.names.into_iter().filter(|n| !seen.contains(n)));
        found.push(proc);
    }
    found.sort_by(|a, b| normalize(&a.name).cmp(&normalize(&b.name)));
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinOp;
    use pretty_assertions::assert_eq;

    fn sample() -> Stmt {
        Stmt::For {
            var: "i".to_string(),
            start: Expr::lit(1),
            end: Expr::var("n"),
            step: None,
            body: vec![
                Stmt::Assign {
                    target: Expr::call("out", vec![Expr::var("i")]),
                    value: Expr::call("Helper", vec![Expr::var("Key")]),
                },
                Stmt::assign(
                    "acc",
                    Expr::binary(BinOp::Add, Expr::var("acc"), Expr::var("i")),
                ),
            ],
        }
    }

    #[test]
    fn collects_reads_and_writes() {
        let stmt = sample();
        let mut reads = VarsInExpr::default();
        Node::Stmt(&stmt).accept(&mut reads);
        assert_eq!(
            reads.vars.into_iter().collect::<Vec<_>>(),
            vec!["acc", "i", "key", "n"]
        );
        assert!(reads.callees.contains("helper"));

        let mut writes = LhsVars::default();
        Node::Stmt(&stmt).accept(&mut writes);
        assert_eq!(
            writes.vars.into_iter().collect::<Vec<_>>(),
            vec!["acc", "i", "out"]
        );

        let mut lets = LetStatements::new("ACC");
        Node::Stmt(&stmt).accept(&mut lets);
        assert_eq!(lets.values.len(), 1);
    }

    #[test]
    fn reachability_is_transitive() {
        let mut ctx = Context::default();
        ctx.set_procedure(Rc::new(Procedure::function(
            "Helper",
            &["k"],
            None,
            vec![Stmt::assign("Helper", Expr::call("Inner", vec![Expr::var("k")]))],
        )));
        ctx.set_procedure(Rc::new(Procedure::function(
            "Inner",
            &["k"],
            None,
            vec![Stmt::assign("Inner", Expr::var("k"))],
        )));
        let stmt = sample();
        let names: Vec<String> = reachable_procedures(Node::Stmt(&stmt), &ctx)
            .iter()
            .map(|p| p.name.clone())
            .collect();
        assert_eq!(names, vec!["Helper", "Inner"]);
    }
}
