#![allow(dead_code)]

use std::rc::Rc;

use formula_vba_emu::{
    BinOp, Context, EmulationPolicy, Environment, Expr, InMemoryWorkbook, Module, Procedure, Stmt,
};

pub fn context_with(policy: EmulationPolicy) -> Context {
    Context::new(Environment::new(policy))
}

pub fn context_without_jit() -> Context {
    context_with(EmulationPolicy {
        jit_enabled: false,
        ..EmulationPolicy::default()
    })
}

pub fn context_with_workbook(wb: InMemoryWorkbook) -> Context {
    Context::new(Environment::default().with_document(Rc::new(wb)))
}

pub fn var(name: &str) -> Expr {
    Expr::var(name)
}

pub fn add(l: Expr, r: Expr) -> Expr {
    Expr::binary(BinOp::Add, l, r)
}

pub fn concat(l: Expr, r: Expr) -> Expr {
    Expr::binary(BinOp::Concat, l, r)
}

pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::call(name, args)
}

pub fn for_loop(var: &str, start: i64, end: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::For {
        var: var.to_string(),
        start: Expr::lit(start),
        end,
        step: None,
        body,
    }
}

/// `For i = 1 To 3: buf = buf & Chr(64 + i): Next`
pub fn abc_loop() -> Stmt {
    for_loop(
        "i",
        1,
        Expr::lit(3),
        vec![Stmt::assign(
            "buf",
            concat(var("buf"), call("Chr", vec![add(Expr::lit(64), var("i"))])),
        )],
    )
}

pub fn module(procedures: Vec<Procedure>) -> Module {
    Module {
        name: "Module1".to_string(),
        procedures,
        ..Module::default()
    }
}
