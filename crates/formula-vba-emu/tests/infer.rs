mod common;

use std::rc::Rc;

use formula_vba_emu::{
    infer_type, BinOp, Context, Environment, Expr, ExternalFunction, InferredType, Node,
    Procedure, Stmt, VbaType,
};
use pretty_assertions::assert_eq;

use common::{concat, for_loop, var};

#[test]
fn lcase_concatenation_is_a_certain_string() {
    let ctx = Context::default();
    let stmt = Stmt::assign("a", concat(Expr::call("LCase", vec![var("x")]), Expr::lit("y")));
    assert_eq!(
        infer_type("a", Node::Stmt(&stmt), &ctx),
        (InferredType::String, true)
    );
}

#[test]
fn xor_is_a_certain_integer() {
    let ctx = Context::default();
    let stmt = Stmt::assign("b", Expr::binary(BinOp::Xor, Expr::lit(3), var("c")));
    assert_eq!(
        infer_type("b", Node::Stmt(&stmt), &ctx),
        (InferredType::Integer, true)
    );
}

#[test]
fn first_classifiable_assignment_in_a_loop_wins() {
    let ctx = Context::default();
    let lp = for_loop(
        "i",
        1,
        Expr::lit(10),
        vec![
            Stmt::assign("out", var("seed")),
            Stmt::assign("out", concat(var("out"), Expr::lit("!"))),
            Stmt::assign("out", Expr::lit(0)),
        ],
    );
    assert_eq!(
        infer_type("out", Node::Stmt(&lp), &ctx),
        (InferredType::String, true)
    );
    assert_eq!(
        infer_type("never", Node::Stmt(&lp), &ctx),
        (InferredType::Integer, false)
    );
}

#[test]
fn declared_return_types_are_used() {
    let mut ctx = Context::default();
    ctx.set_procedure(Rc::new(Procedure::function(
        "Decode",
        &["s"],
        Some(VbaType::String),
        Vec::new(),
    )));
    let body = vec![Stmt::assign("plain", Expr::call("Decode", vec![var("blob")]))];
    let proc = Procedure::sub("Run", &[], body);
    assert_eq!(
        infer_type("plain", Node::Procedure(&proc), &ctx),
        (InferredType::String, true)
    );

    // Called without parentheses.
    let stmt = Stmt::assign("plain", var("Decode"));
    assert_eq!(
        infer_type("plain", Node::Stmt(&stmt), &ctx),
        (InferredType::String, true)
    );
}

#[test]
fn declared_externals_resolve_through_their_alias() {
    let mut env = Environment::default();
    env.externals.insert(
        "CopyMem",
        ExternalFunction {
            name: "CopyMem".to_string(),
            lib: "kernel32".to_string(),
            alias: Some("RtlMoveMemory".to_string()),
        },
    );
    let ctx = Context::new(env);
    let stmt = Stmt::assign(
        "r",
        Expr::call("CopyMem", vec![var("dst"), var("src"), Expr::lit(4)]),
    );
    assert_eq!(
        infer_type("r", Node::Stmt(&stmt), &ctx),
        (InferredType::Integer, true)
    );
}

#[test]
fn string_markers_in_source_text() {
    let ctx = Context::default();
    // `Unknown` has no declared type, but the argument text gives the value away.
    let stmt = Stmt::assign(
        "t",
        Expr::call("Unknown", vec![Expr::call("Chr", vec![Expr::lit(65)])]),
    );
    assert_eq!(
        infer_type("t", Node::Stmt(&stmt), &ctx),
        (InferredType::String, true)
    );
}
