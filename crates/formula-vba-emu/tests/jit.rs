mod common;

use std::rc::Rc;

use formula_vba_emu::{
    compile, exec_block, BinOp, CacheStats, Context, EmulationPolicy, Environment, EvalCaches,
    ExitKind, Expr, ExternalFunction, Procedure, Stmt, VarDecl, VbaType, VbaValue,
};
use pretty_assertions::assert_eq;

use common::{abc_loop, add, call, concat, context_with, for_loop, var};

fn jit_policy(enabled: bool) -> EmulationPolicy {
    EmulationPolicy {
        jit_enabled: enabled,
        ..EmulationPolicy::default()
    }
}

fn with_copy_mem(policy: EmulationPolicy) -> Context {
    let mut env = Environment::new(policy);
    env.externals.insert(
        "CopyMem",
        ExternalFunction {
            name: "CopyMem".to_string(),
            lib: "kernel32".to_string(),
            alias: Some("RtlMoveMemory".to_string()),
        },
    );
    Context::new(env)
}

#[test]
fn compiled_loop_builds_a_string() {
    let mut ctx = Context::default();
    assert!(compile(&abc_loop(), &mut ctx).unwrap());

    assert_eq!(ctx.get("buf").unwrap(), VbaValue::from("ABC"));
    assert_eq!(ctx.get("i").unwrap(), VbaValue::Integer(4));
    assert_eq!(ctx.get_type("buf"), Some(VbaType::String));
}

#[test]
fn identical_loops_reuse_the_cached_result() {
    let caches = Rc::new(EvalCaches::new());
    let mut first = Context::new(Environment::default().with_caches(caches.clone()));
    let mut second = Context::new(Environment::default().with_caches(caches.clone()));

    assert!(compile(&abc_loop(), &mut first).unwrap());
    assert_eq!(caches.loop_entries(), 1);
    assert!(compile(&abc_loop(), &mut second).unwrap());

    assert_eq!(
        caches.stats(),
        CacheStats {
            loop_hits: 1,
            loop_misses: 1,
            ..CacheStats::default()
        }
    );
    assert_eq!(caches.loop_entries(), 1);
    assert_eq!(first.get("buf").unwrap(), second.get("buf").unwrap());
    assert_eq!(first.get("i").unwrap(), second.get("i").unwrap());
    assert_eq!(second.get_type("buf"), Some(VbaType::String));
}

#[test]
fn changed_inputs_miss_the_cache() {
    let mut ctx = Context::default();
    assert!(compile(&abc_loop(), &mut ctx).unwrap());
    assert!(compile(&abc_loop(), &mut ctx).unwrap());

    assert_eq!(ctx.get("buf").unwrap(), VbaValue::from("ABCABC"));
    assert_eq!(ctx.caches().stats().loop_misses, 2);
    assert_eq!(ctx.caches().loop_entries(), 2);
}

#[test]
fn dynamic_code_is_never_compiled() {
    let mut ctx = Context::default();
    let lp = Stmt::DoLoop {
        cond: Some((
            formula_vba_emu::LoopConditionKind::While,
            Expr::binary(BinOp::Lt, var("x"), Expr::lit(3)),
        )),
        test_first: true,
        body: vec![
            Stmt::Call(call("Execute", vec![Expr::lit("y = 1")])),
            Stmt::assign("x", add(var("x"), Expr::lit(1))),
        ],
    };

    assert!(!compile(&lp, &mut ctx).unwrap());
    assert!(!compile(&lp, &mut ctx).unwrap());
    assert_eq!(ctx.caches().loop_entries(), 0);
    assert_eq!(ctx.caches().stats(), CacheStats::default());
}

#[test]
fn dynamic_code_in_a_called_procedure_is_not_compiled() {
    let mut ctx = Context::default();
    ctx.set_procedure(Rc::new(Procedure::sub(
        "Stage",
        &[],
        vec![Stmt::Call(call("ExecuteGlobal", vec![var("code")]))],
    )));
    let lp = for_loop("i", 1, Expr::lit(2), vec![Stmt::Call(var("Stage"))]);
    assert!(!compile(&lp, &mut ctx).unwrap());
    assert_eq!(ctx.caches().loop_entries(), 0);
}

#[test]
fn loops_inside_with_blocks_are_compiled() {
    let mut ctx = Context::default();
    ctx.set("ws", VbaValue::from("Sheet1"));
    ctx.push_with(var("ws"));
    assert!(compile(&abc_loop(), &mut ctx).unwrap());
    assert_eq!(ctx.get("buf").unwrap(), VbaValue::from("ABC"));
    assert_eq!(ctx.get("ws").unwrap(), VbaValue::from("Sheet1"));
    assert_eq!(ctx.with_prefix(), Some("ws"));
}

#[test]
fn with_member_shorthand_is_interpreted() {
    let mut ctx = Context::default();
    ctx.push_with(var("ws"));
    let lp = for_loop(
        "i",
        1,
        Expr::lit(3),
        vec![Stmt::assign("t", Expr::member(Expr::With, "Name"))],
    );
    assert!(!compile(&lp, &mut ctx).unwrap());
    assert_eq!(ctx.caches().loop_entries(), 0);
}

#[test]
fn runaway_loop_is_skipped_without_side_effects() {
    let mut ctx = context_with(EmulationPolicy {
        jit_max_iterations: 100,
        ..EmulationPolicy::default()
    });
    ctx.set("n", VbaValue::Integer(5));
    let forever = Stmt::DoLoop {
        cond: None,
        test_first: true,
        body: vec![Stmt::assign("n", add(var("n"), Expr::lit(1)))],
    };

    assert!(compile(&forever, &mut ctx).unwrap());
    assert_eq!(ctx.get("n").unwrap(), VbaValue::Integer(5));
    assert_eq!(ctx.caches().loop_entries(), 1);

    // A loop that failed before is handed back to the interpreter.
    assert!(!compile(&forever, &mut ctx).unwrap());
    assert_eq!(ctx.caches().stats().loop_hits, 1);
}

#[test]
fn faulting_body_statements_are_skipped() {
    let mut ctx = Context::default();
    ctx.set("count", VbaValue::Integer(0));
    let lp = for_loop(
        "i",
        1,
        Expr::lit(3),
        vec![
            Stmt::assign("bad", Expr::binary(BinOp::Div, Expr::lit(1), Expr::lit(0))),
            Stmt::assign("count", add(var("count"), Expr::lit(1))),
        ],
    );
    assert!(compile(&lp, &mut ctx).unwrap());
    assert_eq!(ctx.get("count").unwrap(), VbaValue::Integer(3));
}

#[test]
fn too_many_faults_count_as_runaway() {
    let mut ctx = context_with(EmulationPolicy {
        max_loop_errors: 2,
        ..EmulationPolicy::default()
    });
    ctx.set("count", VbaValue::Integer(0));
    let lp = for_loop(
        "i",
        1,
        Expr::lit(3),
        vec![
            Stmt::assign("bad", Expr::binary(BinOp::Div, Expr::lit(1), Expr::lit(0))),
            Stmt::assign("count", add(var("count"), Expr::lit(1))),
        ],
    );
    assert!(compile(&lp, &mut ctx).unwrap());
    assert_eq!(ctx.get("count").unwrap(), VbaValue::Integer(0));
}

/// Module-level code exercising arrays, branches, nested exits and procedure calls.
fn sample_program(ctx: &mut Context) -> Vec<Stmt> {
    ctx.set_procedure(Rc::new(Procedure::function(
        "Shift",
        &["c"],
        None,
        vec![Stmt::assign("Shift", add(var("c"), var("key")))],
    )));
    ctx.set_procedure(Rc::new(Procedure::sub(
        "Bump",
        &[],
        vec![Stmt::assign("counter", add(var("counter"), Expr::lit(1)))],
    )));
    vec![
        Stmt::Dim(vec![VarDecl {
            bounds: vec![Expr::lit(4)],
            ..VarDecl::new("arr", None)
        }]),
        Stmt::assign("total", Expr::lit(0)),
        Stmt::assign("s", Expr::lit("")),
        Stmt::assign("key", Expr::lit(3)),
        Stmt::assign("shifted", Expr::lit(0)),
        Stmt::assign("counter", Expr::lit(0)),
        for_loop(
            "i",
            0,
            Expr::lit(4),
            vec![Stmt::Assign {
                target: call("arr", vec![var("i")]),
                value: Expr::binary(BinOp::Mul, var("i"), var("i")),
            }],
        ),
        for_loop(
            "j",
            0,
            Expr::lit(4),
            vec![Stmt::If {
                arms: vec![(
                    Expr::binary(BinOp::Gt, call("arr", vec![var("j")]), Expr::lit(5)),
                    vec![Stmt::assign("total", add(var("total"), call("arr", vec![var("j")])))],
                )],
                else_body: vec![Stmt::assign(
                    "s",
                    concat(var("s"), call("Chr", vec![add(Expr::lit(65), var("j"))])),
                )],
            }],
        ),
        for_loop(
            "k",
            1,
            Expr::lit(3),
            vec![
                Stmt::assign("shifted", add(var("shifted"), call("Shift", vec![var("k")]))),
                Stmt::Call(var("Bump")),
                for_loop(
                    "m",
                    1,
                    Expr::lit(10),
                    vec![Stmt::If {
                        arms: vec![(
                            Expr::binary(BinOp::Eq, var("m"), Expr::lit(2)),
                            vec![Stmt::Exit(ExitKind::For)],
                        )],
                        else_body: Vec::new(),
                    }],
                ),
            ],
        ),
    ]
}

fn run_sample(enabled: bool) -> Context {
    let mut ctx = context_with(jit_policy(enabled));
    let program = sample_program(&mut ctx);
    exec_block(&program, &mut ctx).unwrap();
    assert!(!ctx.must_handle_error());
    ctx
}

#[test]
fn compiled_and_interpreted_runs_agree() {
    let jit = run_sample(true);
    let interpreted = run_sample(false);

    assert!(jit.caches().loop_entries() > 0);
    assert_eq!(interpreted.caches().loop_entries(), 0);
    for name in ["arr", "total", "s", "shifted", "counter", "i", "j", "k", "m"] {
        assert_eq!(
            jit.get(name).unwrap(),
            interpreted.get(name).unwrap(),
            "{name}"
        );
    }
    assert_eq!(
        interpreted.get("arr").unwrap(),
        VbaValue::new_list(vec![0.into(), 1.into(), 4.into(), 9.into(), 16.into()])
    );
    assert_eq!(interpreted.get("total").unwrap(), VbaValue::Integer(25));
    assert_eq!(interpreted.get("s").unwrap(), VbaValue::from("ABC"));
    assert_eq!(interpreted.get("shifted").unwrap(), VbaValue::Integer(15));
    assert_eq!(interpreted.get("counter").unwrap(), VbaValue::Integer(3));
    assert_eq!(interpreted.get("m").unwrap(), VbaValue::Integer(2));
}

#[test]
fn memory_writes_match_the_interpreter() {
    let run = |enabled: bool| {
        let mut ctx = with_copy_mem(jit_policy(enabled));
        ctx.set(
            "sc",
            VbaValue::new_list(vec![0xfc.into(), 0xe8.into(), 0x82.into()]),
        );
        ctx.set("base", VbaValue::Integer(0x4000));
        let lp = for_loop(
            "i",
            0,
            Expr::lit(2),
            vec![Stmt::Call(call(
                "CopyMem",
                vec![
                    add(var("base"), var("i")),
                    call("sc", vec![var("i")]),
                    Expr::lit(1),
                ],
            ))],
        );
        exec_block(&[lp], &mut ctx).unwrap();
        ctx
    };

    let jit = run(true);
    let interpreted = run(false);
    assert_eq!(jit.caches().loop_entries(), 1);
    assert_eq!(jit.shellcode_data(), vec![0xfc, 0xe8, 0x82]);
    assert_eq!(jit.shellcode_data(), interpreted.shellcode_data());
}

#[test]
fn context_dependent_calls_fall_back_to_the_interpreter() {
    let mut ctx = Context::default();
    let lp = for_loop(
        "i",
        1,
        Expr::lit(2),
        vec![Stmt::Call(call("Shell", vec![Expr::lit("calc.exe")]))],
    );
    exec_block(&[lp], &mut ctx).unwrap();

    assert_eq!(ctx.caches().loop_entries(), 0);
    let commands: Vec<_> = ctx
        .actions()
        .into_iter()
        .filter(|a| a.kind == "Execute Command")
        .collect();
    assert_eq!(commands.len(), 2);
}
