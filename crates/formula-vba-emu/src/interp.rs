//! Node-by-node evaluation of statements and expressions.
//!
//! Operands go through [`crate::dispatch::eval_arg`] so spreadsheet reads, object text and the
//! constant cache apply everywhere. Loops are offered to [`crate::jit`] before they are
//! interpreted.

use std::rc::Rc;

use crate::ast::{
    BinOp, Expr, LoopConditionKind, OnErrorTarget, Procedure, ProcedureKind, Stmt, VbaType,
};
use crate::context::{Context, ErrorMode, Scope};
use crate::dispatch::{eval_arg, Operand};
use crate::error::EmuError;
use crate::limits::{alloc_len, ensure_sufficient_stack, MAX_ALLOC_LEN};
use crate::names::NameMap;
use crate::ops::{compare, eval_binop, eval_unop};
use crate::value::VbaValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    Continue,
    ExitFor,
    ExitDo,
    ExitSub,
    ExitFunction,
}

impl Expr {
    pub fn eval(&self, ctx: &mut Context) -> Result<VbaValue, EmuError> {
        eval_expr(self, ctx)
    }
}

impl Stmt {
    /// Run one statement. Emulated-language errors are returned, not routed; use
    /// [`exec_block`] to get VBA error semantics.
    pub fn eval(&self, ctx: &mut Context) -> Result<ControlFlow, EmuError> {
        exec_stmt(self, ctx)
    }
}

pub(crate) fn default_for(ty: Option<VbaType>) -> VbaValue {
    match ty {
        Some(VbaType::String) => VbaValue::String(String::new()),
        Some(VbaType::Integer | VbaType::Long | VbaType::Byte) => VbaValue::Integer(0),
        Some(VbaType::Double) => VbaValue::Float(0.0),
        Some(VbaType::Boolean) => VbaValue::Boolean(false),
        Some(VbaType::Variant | VbaType::Object) | None => VbaValue::Null,
    }
}

/// A `Dim`'d array with `dims` elements per dimension. Refused when the element count is over
/// [`MAX_ALLOC_LEN`].
pub(crate) fn new_array(dims: &[i64], ty: Option<VbaType>) -> Result<VbaValue, EmuError> {
    let total = dims
        .iter()
        .try_fold(1usize, |acc, d| acc.checked_mul(alloc_len(*d)?));
    match total {
        Some(n) if n <= MAX_ALLOC_LEN => Ok(build_array(dims, ty)),
        _ => Err(EmuError::out_of_memory(format!(
            "array dimensions {dims:?} are too large"
        ))),
    }
}

fn build_array(dims: &[i64], ty: Option<VbaType>) -> VbaValue {
    let Some((len, rest)) = dims.split_first() else {
        return default_for(ty);
    };
    let items = (0..(*len).max(0)).map(|_| build_array(rest, ty)).collect();
    VbaValue::new_list(items)
}

/// Execute statements in order. Non-fatal errors go through the frame's error state; the block
/// stops at the first statement that leaves an error pending.
pub fn exec_block(body: &[Stmt], ctx: &mut Context) -> Result<ControlFlow, EmuError> {
    for stmt in body {
        ctx.limiter().tick()?;
        match exec_stmt(stmt, ctx) {
            Ok(ControlFlow::Continue) => {}
            Ok(flow) => return Ok(flow),
            Err(e) if e.is_fatal() => return Err(e),
            Err(EmuError::UndefinedVariable(name)) => {
                log::debug!("statement `{stmt}` skipped: {name} is not defined");
            }
            Err(e) => ctx.set_error(&e),
        }
        if ctx.must_handle_error() {
            break;
        }
    }
    Ok(ControlFlow::Continue)
}

fn exec_stmt(stmt: &Stmt, ctx: &mut Context) -> Result<ControlFlow, EmuError> {
    match stmt {
        Stmt::Dim(decls) => {
            let scope = if ctx.in_procedure() {
                Scope::Local
            } else {
                Scope::Global
            };
            for decl in decls {
                let value = if decl.bounds.is_empty() {
                    default_for(decl.ty)
                } else {
                    let mut dims = Vec::with_capacity(decl.bounds.len());
                    for bound in &decl.bounds {
                        let upper = eval_arg(Operand::Expr(bound), ctx, false)?.to_int();
                        dims.push(upper.max(-1) + 1);
                    }
                    new_array(&dims, decl.ty)?
                };
                ctx.set_scoped(&decl.name, value, scope, decl.ty);
            }
        }
        Stmt::Assign { target, value } => {
            let value = eval_arg(Operand::Expr(value), ctx, false)?;
            assign(target, value, ctx)?;
        }
        Stmt::Call(expr) => match expr {
            Expr::Member { .. } => {
                eval_call(expr, expr, &[], ctx)?;
            }
            Expr::Call { callee, args } => {
                eval_call(expr, callee, args, ctx)?;
            }
            other => {
                eval_expr(other, ctx)?;
            }
        },
        Stmt::If { arms, else_body } => {
            for (cond, body) in arms {
                if eval_arg(Operand::Expr(cond), ctx, false)?.is_truthy() {
                    return exec_block(body, ctx);
                }
            }
            return exec_block(else_body, ctx);
        }
        Stmt::For { .. } | Stmt::ForEach { .. } | Stmt::While { .. } | Stmt::DoLoop { .. } => {
            if ctx.policy().jit_enabled && crate::jit::compile(stmt, ctx)? {
                return Ok(ControlFlow::Continue);
            }
            return exec_loop(stmt, ctx);
        }
        Stmt::With { object, body } => {
            ctx.push_with(object.clone());
            let flow = exec_block(body, ctx);
            ctx.pop_with();
            return flow;
        }
        Stmt::OnError(target) => {
            ctx.clear_err_object();
            match target {
                OnErrorTarget::ResumeNext => ctx.set_error_mode(ErrorMode::ResumeNext),
                OnErrorTarget::Disable => ctx.set_error_mode(ErrorMode::Default),
                OnErrorTarget::Label(label) => ctx.on_error_goto(label),
            }
        }
        Stmt::Label(_) => {}
        Stmt::Exit(kind) => {
            return Ok(match kind {
                crate::ast::ExitKind::For => ControlFlow::ExitFor,
                crate::ast::ExitKind::Do => ControlFlow::ExitDo,
                crate::ast::ExitKind::Sub => ControlFlow::ExitSub,
                crate::ast::ExitKind::Function => ControlFlow::ExitFunction,
            });
        }
        Stmt::Open { path, file_number } => {
            let path = eval_arg(Operand::Expr(path), ctx, false)?.to_string_lossy();
            let id = eval_arg(Operand::Expr(file_number), ctx, false)?.to_string_lossy();
            ctx.open_file(&path, Some(&id));
        }
        Stmt::WriteFile { file_number, value } => {
            let id = eval_arg(Operand::Expr(file_number), ctx, false)?.to_string_lossy();
            let value = eval_arg(Operand::Expr(value), ctx, false)?;
            ctx.write_file(&id, &value);
        }
        Stmt::Close(ids) => {
            if ids.is_empty() {
                ctx.dump_all_files();
            }
            for id in ids {
                let id = eval_arg(Operand::Expr(id), ctx, false)?.to_string_lossy();
                ctx.close_file(&id);
            }
        }
    }
    Ok(ControlFlow::Continue)
}

/// `true` once an interpreted loop has used up its iteration allowance.
fn over_budget(iterations: &mut u64, ctx: &Context, stmt: &Stmt) -> bool {
    *iterations += 1;
    if *iterations > ctx.policy().max_loop_iterations {
        log::warn!(
            "abandoning loop after {} iterations: {}",
            ctx.policy().max_loop_iterations,
            stmt.to_string().lines().next().unwrap_or_default()
        );
        return true;
    }
    false
}

enum LoopExit {
    Next,
    Break,
    Return(ControlFlow),
}

fn run_body(body: &[Stmt], ctx: &mut Context, own_exit: ControlFlow) -> Result<LoopExit, EmuError> {
    let flow = exec_block(body, ctx)?;
    if ctx.must_handle_error() {
        return Ok(LoopExit::Break);
    }
    Ok(match flow {
        ControlFlow::Continue => LoopExit::Next,
        flow if flow == own_exit => LoopExit::Break,
        flow => LoopExit::Return(flow),
    })
}

fn loop_condition(
    cond: &Option<(LoopConditionKind, Expr)>,
    ctx: &mut Context,
) -> Result<bool, EmuError> {
    Ok(match cond {
        None => true,
        Some((LoopConditionKind::While, c)) => eval_arg(Operand::Expr(c), ctx, false)?.is_truthy(),
        Some((LoopConditionKind::Until, c)) => !eval_arg(Operand::Expr(c), ctx, false)?.is_truthy(),
    })
}

fn exec_loop(stmt: &Stmt, ctx: &mut Context) -> Result<ControlFlow, EmuError> {
    let mut iterations = 0u64;
    match stmt {
        Stmt::For {
            var,
            start,
            end,
            step,
            body,
        } => {
            let start = eval_arg(Operand::Expr(start), ctx, false)?.to_number();
            let end = eval_arg(Operand::Expr(end), ctx, false)?.to_number();
            let step = match step {
                Some(step) => eval_arg(Operand::Expr(step), ctx, false)?.to_number(),
                None => VbaValue::Integer(1),
            };
            let descending = step.to_f64() < 0.0;
            ctx.set(var, start);
            loop {
                let current = ctx.get(var).unwrap_or_default();
                let past_end = match compare(&current, &end) {
                    Some(std::cmp::Ordering::Greater) => !descending,
                    Some(std::cmp::Ordering::Less) => descending,
                    _ => false,
                };
                if past_end || over_budget(&mut iterations, ctx, stmt) {
                    break;
                }
                match run_body(body, ctx, ControlFlow::ExitFor)? {
                    LoopExit::Next => {}
                    LoopExit::Break => break,
                    LoopExit::Return(flow) => return Ok(flow),
                }
                let current = ctx.get(var).unwrap_or_default();
                ctx.set(var, eval_binop(BinOp::Add, current, step.clone())?);
            }
        }
        Stmt::ForEach {
            var,
            iterable,
            body,
        } => {
            let items: Vec<VbaValue> = match eval_arg(Operand::Expr(iterable), ctx, false)? {
                VbaValue::List(items) => items.borrow().clone(),
                VbaValue::Map(map) => map.borrow().keys().cloned().map(VbaValue::String).collect(),
                VbaValue::Null | VbaValue::Unresolved => Vec::new(),
                other => {
                    return Err(EmuError::Runtime {
                        number: 451,
                        message: format!("cannot iterate over {}", other.type_name()),
                    })
                }
            };
            for item in items {
                if over_budget(&mut iterations, ctx, stmt) {
                    break;
                }
                ctx.set(var, item);
                match run_body(body, ctx, ControlFlow::ExitFor)? {
                    LoopExit::Next => {}
                    LoopExit::Break => break,
                    LoopExit::Return(flow) => return Ok(flow),
                }
            }
        }
        Stmt::While { cond, body } => loop {
            if !eval_arg(Operand::Expr(cond), ctx, false)?.is_truthy()
                || over_budget(&mut iterations, ctx, stmt)
            {
                break;
            }
            match run_body(body, ctx, ControlFlow::ExitDo)? {
                LoopExit::Next => {}
                LoopExit::Break => break,
                LoopExit::Return(flow) => return Ok(flow),
            }
        },
        Stmt::DoLoop {
            cond,
            test_first,
            body,
        } => loop {
            if *test_first && !loop_condition(cond, ctx)? {
                break;
            }
            if over_budget(&mut iterations, ctx, stmt) {
                break;
            }
            match run_body(body, ctx, ControlFlow::ExitDo)? {
                LoopExit::Next => {}
                LoopExit::Break => break,
                LoopExit::Return(flow) => return Ok(flow),
            }
            if !*test_first && !loop_condition(cond, ctx)? {
                break;
            }
        },
        _ => {}
    }
    Ok(ControlFlow::Continue)
}

fn assign(target: &Expr, value: VbaValue, ctx: &mut Context) -> Result<(), EmuError> {
    match target {
        Expr::Var(name) => ctx.set(name, value),
        Expr::Call { callee, args } => {
            if let Expr::Var(name) = callee.as_ref() {
                if name.eq_ignore_ascii_case("mid") || name.eq_ignore_ascii_case("mid$") {
                    return assign_mid(args, value, ctx);
                }
                match ctx.get(name) {
                    Ok(VbaValue::List(list)) => {
                        let indices = eval_args(args, ctx)?;
                        return store_element(&VbaValue::List(list), &indices, value);
                    }
                    Ok(VbaValue::Map(map)) => {
                        let key = eval_args(args, ctx)?
                            .first()
                            .map(VbaValue::to_string_lossy)
                            .unwrap_or_default();
                        map.borrow_mut().insert(key, value);
                        return Ok(());
                    }
                    _ => {}
                }
            }
            ctx.set(&target.to_string(), value);
        }
        Expr::Member { .. } => ctx.set(&target.to_string(), value),
        other => {
            return Err(EmuError::runtime(format!("cannot assign to `{other}`")));
        }
    }
    Ok(())
}

/// `Mid(s, start[, length]) = replacement`
fn assign_mid(args: &[Expr], value: VbaValue, ctx: &mut Context) -> Result<(), EmuError> {
    let [Expr::Var(name), start, rest @ ..] = args else {
        return Err(EmuError::runtime("Mid statement needs a variable and a start"));
    };
    let current = ctx.get(name)?.to_string_lossy();
    let start = eval_arg(Operand::Expr(start), ctx, false)?.to_int();
    let length = match rest.first() {
        Some(len) => Some(eval_arg(Operand::Expr(len), ctx, false)?.to_int()),
        None => None,
    };
    let updated = overwrite_mid(&current, start, length, &value.to_string_lossy())?;
    ctx.set(name, VbaValue::String(updated));
    Ok(())
}

/// Replace characters of `current` from the 1-based `start`, never growing the string.
pub(crate) fn overwrite_mid(
    current: &str,
    start: i64,
    length: Option<i64>,
    replacement: &str,
) -> Result<String, EmuError> {
    if start < 1 {
        return Err(EmuError::runtime("Mid start must be positive"));
    }
    let mut chars: Vec<char> = current.chars().collect();
    let replacement: Vec<char> = replacement.chars().collect();
    let offset = (start - 1) as usize;
    if offset > chars.len() {
        return Err(EmuError::runtime("Mid start is past the end of the string"));
    }
    let mut count = replacement.len().min(chars.len() - offset);
    if let Some(len) = length {
        count = count.min(len.max(0) as usize);
    }
    chars[offset..offset + count].copy_from_slice(&replacement[..count]);
    Ok(chars.into_iter().collect())
}

fn element_index(list: &[VbaValue], index: &VbaValue) -> Result<usize, EmuError> {
    let i = index.to_int();
    usize::try_from(i)
        .ok()
        .filter(|i| *i < list.len())
        .ok_or_else(|| EmuError::subscript_out_of_range(format!("index {i} out of range")))
}

/// `target(i)` / `target(i, j)` read of a list, or `target(key)` read of a dictionary.
pub(crate) fn index_value(target: &VbaValue, indices: &[VbaValue]) -> Result<VbaValue, EmuError> {
    let Some((first, rest)) = indices.split_first() else {
        return Ok(target.clone());
    };
    match target {
        VbaValue::List(items) => {
            let item = {
                let items = items.borrow();
                items[element_index(&items, first)?].clone()
            };
            index_value(&item, rest)
        }
        VbaValue::Map(map) => Ok(map
            .borrow()
            .get(&first.to_string_lossy())
            .cloned()
            .unwrap_or_default()),
        other => Err(EmuError::type_mismatch(format!(
            "{} is not indexable",
            other.type_name()
        ))),
    }
}

fn store_element(target: &VbaValue, indices: &[VbaValue], value: VbaValue) -> Result<(), EmuError> {
    let VbaValue::List(items) = target else {
        return Err(EmuError::type_mismatch(format!(
            "{} is not an array",
            target.type_name()
        )));
    };
    match indices {
        [] => Err(EmuError::subscript_out_of_range("missing index")),
        [index] => {
            let mut items = items.borrow_mut();
            let i = element_index(&items, index)?;
            items[i] = value;
            Ok(())
        }
        [index, rest @ ..] => {
            let inner = {
                let items = items.borrow();
                items[element_index(&items, index)?].clone()
            };
            store_element(&inner, rest, value)
        }
    }
}

fn eval_args(args: &[Expr], ctx: &mut Context) -> Result<Vec<VbaValue>, EmuError> {
    args.iter()
        .map(|a| eval_arg(Operand::Expr(a), ctx, false))
        .collect()
}

/// Evaluate one expression node.
pub fn eval_expr(expr: &Expr, ctx: &mut Context) -> Result<VbaValue, EmuError> {
    ctx.limiter().tick()?;
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Var(name) => eval_var(name, ctx),
        Expr::With => Ok(ctx.with_value()?.unwrap_or_default()),
        Expr::Unary { op, expr } => {
            let v = eval_arg(Operand::Expr(expr), ctx, false)?;
            eval_unop(*op, v)
        }
        Expr::Binary { op, left, right } => {
            let l = eval_arg(Operand::Expr(left), ctx, false)?;
            let r = eval_arg(Operand::Expr(right), ctx, false)?;
            eval_binop(*op, l, r)
        }
        Expr::Member { object, member } => eval_member(expr, object, member, ctx),
        Expr::Call { callee, args } => eval_call(expr, callee, args, ctx),
    }
}

fn eval_var(name: &str, ctx: &mut Context) -> Result<VbaValue, EmuError> {
    if name.eq_ignore_ascii_case("err") {
        return Ok(VbaValue::Integer(i64::from(ctx.last_error().number)));
    }
    if let Ok(v) = ctx.get(name) {
        return Ok(v);
    }
    // Procedures and zero-argument library functions may be called without parentheses.
    if let Some(proc) = ctx.procedure(name) {
        return call_procedure(&proc, Vec::new(), ctx);
    }
    if let Some(f) = ctx.library().get(name) {
        if f.arity.contains(&0) {
            return f.call(ctx, &[]);
        }
    }
    eval_arg(Operand::Name(name), ctx, true)
}

/// Text of a member/call expression with any leading `.` qualified by the active `With`.
fn qualified_text(expr: &Expr, ctx: &Context) -> String {
    let text = expr.to_string();
    match ctx.with_prefix() {
        Some(prefix) if text.starts_with('.') => format!("{prefix}{text}"),
        _ => text,
    }
}

fn eval_member(
    expr: &Expr,
    object: &Expr,
    member: &str,
    ctx: &mut Context,
) -> Result<VbaValue, EmuError> {
    let member_lc = member.to_ascii_lowercase();
    if matches!(object, Expr::Var(root) if root.eq_ignore_ascii_case("err")) {
        let err = ctx.last_error();
        return Ok(match member_lc.as_str() {
            "number" => VbaValue::Integer(i64::from(err.number)),
            "description" => VbaValue::String(err.description),
            _ => VbaValue::String(String::new()),
        });
    }

    let text = qualified_text(expr, ctx);
    if let Ok(v) = ctx.get(&text) {
        return Ok(v);
    }

    let receiver = match object {
        Expr::With => ctx.with_value()?.unwrap_or_default(),
        other => eval_arg(Operand::Expr(other), ctx, false)?,
    };
    match (&receiver, member_lc.as_str()) {
        (VbaValue::Map(map), "count") => return Ok(VbaValue::Integer(map.borrow().len() as i64)),
        (VbaValue::Map(map), "keys") => {
            let keys = map.borrow().keys().cloned().map(VbaValue::String).collect();
            return Ok(VbaValue::new_list(keys));
        }
        (VbaValue::Map(map), "items") => {
            return Ok(VbaValue::new_list(map.borrow().values().cloned().collect()));
        }
        (VbaValue::List(items), "count") => {
            return Ok(VbaValue::Integer(items.borrow().len() as i64));
        }
        (VbaValue::String(s), _) if matches!(object, Expr::With) => {
            if let Ok(v) = ctx.get(&format!("{s}.{member}")) {
                return Ok(v);
            }
        }
        _ => {}
    }
    eval_arg(Operand::Name(&text), ctx, false)
}

fn eval_call(
    expr: &Expr,
    callee: &Expr,
    args: &[Expr],
    ctx: &mut Context,
) -> Result<VbaValue, EmuError> {
    match callee {
        Expr::Var(name) => {
            if let Ok(target @ (VbaValue::List(_) | VbaValue::Map(_))) = ctx.get(name) {
                let indices = eval_args(args, ctx)?;
                return index_value(&target, &indices);
            }
            let values = eval_args(args, ctx)?;
            match call_function(name, &values, ctx)? {
                Some(v) => Ok(v),
                None => {
                    log::warn!("function `{name}` not found");
                    let lower = name.to_ascii_lowercase();
                    if lower == "shapes" || lower == "inlineshapes" {
                        // Placeholder text resolved later through the object text store.
                        return Ok(VbaValue::String(expr.to_string()));
                    }
                    Ok(VbaValue::Null)
                }
            }
        }
        Expr::Member { object, member } => call_method(expr, object, member, args, ctx),
        other => {
            let target = eval_expr(other, ctx)?;
            let indices = eval_args(args, ctx)?;
            index_value(&target, &indices)
        }
    }
}

/// Call a local procedure, a `Declare`d external or a library entry by name. `None` when the
/// name is none of these.
pub(crate) fn call_function(
    name: &str,
    args: &[VbaValue],
    ctx: &mut Context,
) -> Result<Option<VbaValue>, EmuError> {
    if let Some(proc) = ctx.procedure(name) {
        return call_procedure(&proc, args.to_vec(), ctx).map(Some);
    }
    if let Some(external) = ctx.external(name).cloned() {
        let target = external.alias.as_deref().unwrap_or(&external.name);
        let f = ctx
            .library()
            .get(target)
            .or_else(|| ctx.library().get(&external.name));
        return match f {
            Some(f) => f.call(ctx, args).map(Some),
            None => {
                log::info!(
                    "external function {} from {} is not emulated",
                    external.name,
                    external.lib
                );
                Ok(Some(VbaValue::Integer(0)))
            }
        };
    }
    match ctx.library().get(name) {
        Some(f) => f.call(ctx, args).map(Some),
        None => Ok(None),
    }
}

fn call_method(
    expr: &Expr,
    object: &Expr,
    member: &str,
    args: &[Expr],
    ctx: &mut Context,
) -> Result<VbaValue, EmuError> {
    let member_lc = member.to_ascii_lowercase();
    if matches!(object, Expr::Var(root) if root.eq_ignore_ascii_case("err")) {
        let values = eval_args(args, ctx)?;
        return match member_lc.as_str() {
            "raise" => {
                let number = values.first().map(VbaValue::to_int).unwrap_or(5);
                let message = values
                    .get(2)
                    .map(VbaValue::to_string_lossy)
                    .unwrap_or_else(|| "Application-defined or object-defined error".to_string());
                Err(EmuError::Runtime {
                    number: i32::try_from(number).unwrap_or(5),
                    message,
                })
            }
            "clear" => {
                ctx.clear_err_object();
                Ok(VbaValue::Null)
            }
            _ => Ok(VbaValue::Null),
        };
    }

    let receiver = match object {
        Expr::With => ctx.with_value()?.unwrap_or_default(),
        other => eval_arg(Operand::Expr(other), ctx, false)?,
    };
    let values = eval_args(args, ctx)?;

    if let VbaValue::Map(map) = &receiver {
        let key = values.first().map(VbaValue::to_string_lossy).unwrap_or_default();
        let result = match member_lc.as_str() {
            "add" => {
                let value = values.get(1).cloned().unwrap_or_default();
                map.borrow_mut().insert(key, value);
                Some(VbaValue::Null)
            }
            "exists" => Some(VbaValue::Boolean(map.borrow().contains_key(&key))),
            "item" => Some(map.borrow().get(&key).cloned().unwrap_or_default()),
            "remove" => {
                map.borrow_mut().remove(&key);
                Some(VbaValue::Null)
            }
            "removeall" => {
                map.borrow_mut().clear();
                Some(VbaValue::Null)
            }
            _ => None,
        };
        if let Some(result) = result {
            return Ok(result);
        }
    }
    if let (VbaValue::List(_), "item") = (&receiver, member_lc.as_str()) {
        return index_value(&receiver, &values);
    }

    // Methods of emulated objects (`.Run`, `.Open`, `.SaveToFile`) are library entries.
    if let Some(f) = ctx.library().get(member) {
        return f.call(ctx, &values);
    }
    // `Module1.Helper x`
    if let Some(proc) = ctx.procedure(member) {
        return call_procedure(&proc, values, ctx);
    }
    let text = qualified_text(expr, ctx);
    eval_arg(Operand::Name(&text), ctx, false)
}

/// `label:` → the statements following it, used as `On Error GoTo label` targets.
fn tagged_blocks(body: &[Stmt]) -> NameMap<Rc<[Stmt]>> {
    let mut blocks = NameMap::new();
    for (idx, stmt) in body.iter().enumerate() {
        if let Stmt::Label(label) = stmt {
            blocks.insert(label, Rc::from(body[idx + 1..].to_vec()));
        }
    }
    blocks
}

/// Call a Sub or Function in a child frame. Recursion depth is accounted for while the call
/// runs; an error the callee leaves unhandled becomes pending in `ctx`.
pub fn call_procedure(
    proc: &Rc<Procedure>,
    args: Vec<VbaValue>,
    ctx: &mut Context,
) -> Result<VbaValue, EmuError> {
    let _depth = ctx.limiter().enter()?;
    ensure_sufficient_stack(|| run_procedure(proc, args, ctx))
}

fn run_procedure(
    proc: &Procedure,
    args: Vec<VbaValue>,
    ctx: &mut Context,
) -> Result<VbaValue, EmuError> {
    log::debug!("calling {} with {} argument(s)", proc.name, args.len());
    let mut frame = ctx.child();
    frame.set_tagged_blocks(tagged_blocks(&proc.body));
    if proc.kind == ProcedureKind::Function {
        frame.set_scoped(
            &proc.name,
            default_for(proc.return_type),
            Scope::Local,
            proc.return_type,
        );
    }
    let mut args = args.into_iter();
    for param in &proc.params {
        let value = args.next().unwrap_or_default();
        frame.set_scoped(&param.name, value, Scope::Local, param.ty);
    }

    exec_block(&proc.body, &mut frame)?;
    frame.handle_error()?;
    if frame.must_handle_error() {
        ctx.raise_pending();
    }

    Ok(match proc.kind {
        ProcedureKind::Function => frame.get(&proc.name).unwrap_or_default(),
        ProcedureKind::Sub => VbaValue::Null,
    })
}
