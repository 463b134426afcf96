mod common;

use std::rc::Rc;
use std::time::Duration;

use formula_vba_emu::{
    compile, exec_block, Context, EmuError, EmulationPolicy, ErrorMode, Expr, Procedure,
    ResourceLimiter, Stmt, VarDecl, VbaValue,
};
use pretty_assertions::assert_eq;

use common::{add, call, context_with, for_loop, var};

fn shallow_policy(jit_enabled: bool) -> EmulationPolicy {
    EmulationPolicy {
        max_call_depth: 10,
        jit_enabled,
        ..EmulationPolicy::default()
    }
}

/// `Function Deep(n): Deep = Deep(n + 1): End Function`
fn endless_recursion() -> Rc<Procedure> {
    Rc::new(Procedure::function(
        "Deep",
        &["n"],
        None,
        vec![Stmt::assign(
            "Deep",
            call("Deep", vec![add(var("n"), Expr::lit(1))]),
        )],
    ))
}

#[test]
fn depth_guard_releases_on_drop() {
    let limiter = Rc::new(ResourceLimiter::new(2, Duration::from_secs(60)));
    {
        let _a = limiter.enter().unwrap();
        let _b = limiter.enter().unwrap();
        assert_eq!(limiter.depth(), 2);
        assert_eq!(
            limiter.enter().unwrap_err(),
            EmuError::RecursionLimit { depth: 3 }
        );
        assert_eq!(limiter.depth(), 2);
    }
    assert_eq!(limiter.depth(), 0);
}

#[test]
fn endless_recursion_is_fatal() {
    let mut ctx = context_with(shallow_policy(false));
    ctx.set_procedure(endless_recursion());
    ctx.set("before", VbaValue::Integer(1));

    let err = exec_block(
        &[
            Stmt::assign("x", call("Deep", vec![Expr::lit(0)])),
            Stmt::assign("after", Expr::lit(1)),
        ],
        &mut ctx,
    )
    .unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, EmuError::RecursionLimit { .. }));
    assert_eq!(ctx.limiter().depth(), 0);
    assert!(ctx.get("x").is_err());
    assert!(ctx.get("after").is_err());
    assert_eq!(ctx.error_count(), 0);
}

#[test]
fn recursion_inside_a_compiled_loop_is_fatal_and_merges_nothing() {
    let mut ctx = context_with(shallow_policy(true));
    ctx.set_procedure(endless_recursion());
    ctx.set("total", VbaValue::Integer(0));
    let lp = for_loop(
        "i",
        1,
        Expr::lit(3),
        vec![Stmt::assign(
            "total",
            add(var("total"), call("Deep", vec![var("i")])),
        )],
    );

    let err = compile(&lp, &mut ctx).unwrap_err();
    assert!(matches!(err, EmuError::RecursionLimit { .. }));
    assert_eq!(ctx.limiter().depth(), 0);
    assert_eq!(ctx.get("total").unwrap(), VbaValue::Integer(0));
    assert!(ctx.get("i").is_err());
    assert_eq!(ctx.caches().loop_entries(), 0);
}

#[test]
fn exhausted_deadline_aborts_the_block() {
    let mut ctx = context_with(EmulationPolicy {
        max_execution_time: Duration::ZERO,
        ..EmulationPolicy::default()
    });
    let err = exec_block(&[Stmt::assign("x", Expr::lit(1))], &mut ctx).unwrap_err();
    assert_eq!(err, EmuError::Timeout);
    assert!(ctx.get("x").is_err());
}

#[test]
fn interpreted_loops_are_abandoned_after_their_budget() {
    let mut ctx = context_with(EmulationPolicy {
        jit_enabled: false,
        max_loop_iterations: 50,
        ..EmulationPolicy::default()
    });
    ctx.set("n", VbaValue::Integer(0));
    let forever = Stmt::DoLoop {
        cond: None,
        test_first: true,
        body: vec![Stmt::assign("n", add(var("n"), Expr::lit(1)))],
    };
    exec_block(&[forever], &mut ctx).unwrap();
    assert_eq!(ctx.get("n").unwrap(), VbaValue::Integer(50));
}

#[test]
fn oversized_allocations_raise_runtime_errors() {
    let mut ctx = Context::default();
    ctx.set_error_mode(ErrorMode::ResumeNext);
    exec_block(
        &[
            Stmt::assign("s", call("Space", vec![Expr::lit(i64::MAX)])),
            Stmt::assign("t", call("String", vec![Expr::lit(i64::MAX), Expr::lit("A")])),
            Stmt::Dim(vec![VarDecl {
                bounds: vec![Expr::lit(1_000_000_000_000_i64)],
                ..VarDecl::new("a", None)
            }]),
            Stmt::assign("after", Expr::lit(1)),
        ],
        &mut ctx,
    )
    .unwrap();
    assert_eq!(ctx.error_count(), 3);
    assert_eq!(ctx.last_error().number, 7);
    assert!(ctx.get("s").is_err());
    assert!(ctx.get("a").is_err());
    assert_eq!(ctx.get("after").unwrap(), VbaValue::Integer(1));
}

#[test]
fn memory_moves_near_the_top_of_the_address_space() {
    let mut ctx = Context::default();
    exec_block(
        &[Stmt::Call(call(
            "RtlMoveMemory",
            vec![Expr::lit(i64::MAX), Expr::lit("AB"), Expr::lit(2)],
        ))],
        &mut ctx,
    )
    .unwrap();
    assert_eq!(ctx.error_count(), 0);
    assert_eq!(ctx.shellcode_data(), vec![0x41]);
}
