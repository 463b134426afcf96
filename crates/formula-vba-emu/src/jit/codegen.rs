//! Lowering of a loop, and the local procedures it can reach, into a self-contained host
//! program.
//!
//! Every input the loop reads is embedded in the program's prologue as a literal, so the
//! rendered program text identifies one loop in one program state and doubles as the cache key.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};

use thiserror::Error;

use crate::analysis::{reachable_procedures, LhsVars, VarsInExpr};
use crate::ast::{
    BinOp, Expr, ExitKind, LoopConditionKind, Node, Procedure, ProcedureKind, Stmt, UnOp, VbaType,
};
use crate::context::Context;
use crate::infer::infer_type;
use crate::interp::default_for;
use crate::library::{Callable, LibraryFunction, PureFn};
use crate::names::normalize;
use crate::value::VbaValue;

/// Why a loop cannot be compiled. The loop is interpreted instead and nothing is cached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum JitAbort {
    #[error("unsupported construct `{0}`")]
    Unsupported(String),
    #[error("`{0}` needs the emulation context")]
    ContextCall(String),
    #[error("`{0}` is not a known function")]
    UnknownCall(String),
    #[error("`{0}` holds an object")]
    ObjectValue(String),
    #[error("non-ASCII string literal {0:?}")]
    NonAsciiLiteral(String),
    #[error("`{0}` runs dynamically generated code")]
    DynamicCode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopKind {
    For,
    Do,
}

#[derive(Debug, Clone)]
pub(crate) enum HExpr {
    Const(VbaValue),
    Var(String),
    Unary(UnOp, Box<HExpr>),
    Binary(BinOp, Box<HExpr>, Box<HExpr>),
    /// Element read of an array or dictionary variable.
    Index(String, Vec<HExpr>),
    Builtin {
        name: String,
        f: PureFn,
        args: Vec<HExpr>,
    },
    /// Call of a lowered local procedure.
    Local(String, Vec<HExpr>),
    /// `RtlMoveMemory` into the program's private memory.
    WriteMemory(Vec<HExpr>),
}

#[derive(Debug, Clone)]
pub(crate) struct HDecl {
    pub name: String,
    pub ty: Option<VbaType>,
    pub bounds: Vec<HExpr>,
}

#[derive(Debug, Clone)]
pub(crate) enum HStmt {
    Dim(Vec<HDecl>),
    Assign(String, HExpr),
    AssignIndex(String, Vec<HExpr>, HExpr),
    AssignMid {
        name: String,
        start: HExpr,
        length: Option<HExpr>,
        value: HExpr,
    },
    Eval(HExpr),
    If {
        arms: Vec<(HExpr, Vec<HStmt>)>,
        else_body: Vec<HStmt>,
    },
    For {
        var: String,
        start: HExpr,
        end: HExpr,
        step: Option<HExpr>,
        body: Vec<HStmt>,
    },
    ForEach {
        var: String,
        iterable: HExpr,
        body: Vec<HStmt>,
    },
    /// `Do`/`While` loops. `While .. Wend` is a test-first `While` loop.
    Loop {
        cond: Option<(LoopConditionKind, HExpr)>,
        test_first: bool,
        body: Vec<HStmt>,
    },
    Break(LoopKind),
    Return,
}

#[derive(Debug, Clone)]
pub(crate) struct HFunction {
    pub name: String,
    pub params: Vec<(String, Option<VbaType>)>,
    pub returns_value: bool,
    pub return_type: Option<VbaType>,
    pub body: Vec<HStmt>,
}

#[derive(Debug, Clone)]
pub(crate) struct HostProgram {
    /// Initial value of every program variable.
    pub prologue: BTreeMap<String, VbaValue>,
    /// Declared types of program variables; assignments coerce to them.
    pub types: BTreeMap<String, VbaType>,
    /// Program variables that local procedures see as module globals.
    pub shared: BTreeSet<String>,
    pub functions: BTreeMap<String, HFunction>,
    pub body: HStmt,
    /// Variables whose final values are merged back into the caller.
    pub captures: BTreeSet<String>,
}

#[derive(Debug)]
pub(crate) struct Lowered {
    pub program: HostProgram,
    /// Types inferred with certainty for variables that had no value yet.
    pub certain: Vec<(String, VbaType)>,
}

fn is_mid(name: &str) -> bool {
    name.eq_ignore_ascii_case("mid") || name.eq_ignore_ascii_case("mid$")
}

fn is_callable(name: &str, ctx: &Context) -> bool {
    ctx.get(name).is_err()
        && (ctx.procedure(name).is_some()
            || ctx.library().get(name).is_some()
            || ctx.external(name).is_some())
}

fn check_ascii(text: &str, permissive: bool) -> Result<(), JitAbort> {
    if !permissive && text.chars().any(|c| ('\u{7f}'..='\u{ff}').contains(&c)) {
        return Err(JitAbort::NonAsciiLiteral(text.to_string()));
    }
    Ok(())
}

/// Validate a value taken from the caller's state for embedding in a prologue.
fn host_value(name: &str, value: VbaValue, permissive: bool) -> Result<VbaValue, JitAbort> {
    match &value {
        VbaValue::Object(_) => return Err(JitAbort::ObjectValue(name.to_string())),
        VbaValue::Unresolved => return Ok(VbaValue::Null),
        VbaValue::String(s) => check_ascii(s, permissive)?,
        VbaValue::List(items) => {
            for item in items.borrow().iter() {
                host_value(name, item.clone(), permissive)?;
            }
        }
        VbaValue::Map(map) => {
            for item in map.borrow().values() {
                host_value(name, item.clone(), permissive)?;
            }
        }
        _ => {}
    }
    Ok(value)
}

/// Names a procedure treats as its own: parameters, its return slot, `Dim`s, and anything it
/// reads or writes that is not a module global.
fn function_locals(
    proc: &Procedure,
    reads: &VarsInExpr,
    writes: &LhsVars,
    ctx: &Context,
) -> BTreeSet<String> {
    let mut locals: BTreeSet<String> = proc.params.iter().map(|p| normalize(&p.name)).collect();
    if proc.kind == ProcedureKind::Function {
        locals.insert(normalize(&proc.name));
    }
    collect_dims(&proc.body, &mut locals);
    for name in reads.vars.iter().chain(&writes.vars) {
        if ctx.get_global(name).is_err() && !is_callable(name, ctx) {
            locals.insert(name.clone());
        }
    }
    locals
}

fn collect_dims(body: &[Stmt], out: &mut BTreeSet<String>) {
    for stmt in body {
        match stmt {
            Stmt::Dim(decls) => out.extend(decls.iter().map(|d| normalize(&d.name))),
            Stmt::If { arms, else_body } => {
                for (_, body) in arms {
                    collect_dims(body, out);
                }
                collect_dims(else_body, out);
            }
            Stmt::For { body, .. }
            | Stmt::ForEach { body, .. }
            | Stmt::While { body, .. }
            | Stmt::DoLoop { body, .. }
            | Stmt::With { body, .. } => collect_dims(body, out),
            _ => {}
        }
    }
}

/// The innermost `With` receiver when it is a plain variable holding a value a program can
/// carry. Member shorthand itself is never lowered.
fn with_target(ctx: &Context) -> Option<String> {
    let prefix = ctx.with_prefix()?;
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    let key = normalize(prefix);
    match ctx.get(&key) {
        Ok(VbaValue::Object(_)) | Err(_) => None,
        Ok(_) => Some(key),
    }
}

/// Lower `loop_stmt` against `ctx`, which should be a private snapshot of the caller.
pub(crate) fn lower(loop_stmt: &Stmt, ctx: &Context) -> Result<Lowered, JitAbort> {
    let region = Node::Stmt(loop_stmt);
    let permissive = ctx.policy().permissive_literals;

    let mut reads = VarsInExpr::default();
    region.accept(&mut reads);
    let mut writes = LhsVars::default();
    region.accept(&mut writes);

    let mut names: BTreeSet<String> = reads
        .vars
        .iter()
        .chain(&writes.vars)
        .filter(|n| !is_callable(n, ctx))
        .cloned()
        .collect();
    names.extend(
        reads
            .callees
            .iter()
            .filter(|n| matches!(ctx.get(n), Ok(VbaValue::List(_) | VbaValue::Map(_))))
            .cloned(),
    );
    let mut captures: BTreeSet<String> = writes
        .vars
        .iter()
        .filter(|n| !is_callable(n, ctx))
        .cloned()
        .collect();

    if let Some(target) = with_target(ctx) {
        names.insert(target.clone());
        captures.insert(target);
    }

    let procedures = reachable_procedures(region, ctx);
    let mut function_scopes = Vec::with_capacity(procedures.len());
    let mut shared = BTreeSet::new();
    for proc in &procedures {
        if super::dynamic_code().is_match(&proc.to_string()) {
            return Err(JitAbort::DynamicCode(proc.name.clone()));
        }
        let mut proc_reads = VarsInExpr::default();
        Node::Procedure(proc).accept(&mut proc_reads);
        let mut proc_writes = LhsVars::default();
        Node::Procedure(proc).accept(&mut proc_writes);
        let locals = function_locals(proc, &proc_reads, &proc_writes, ctx);

        let used = proc_reads
            .vars
            .iter()
            .chain(&proc_reads.callees)
            .chain(&proc_writes.vars);
        for name in used {
            if locals.contains(name) {
                continue;
            }
            let Ok(global) = ctx.get_global(name) else {
                continue;
            };
            if names.contains(name) && ctx.get(name).ok().as_ref() != Some(&global) {
                return Err(JitAbort::Unsupported(format!(
                    "{name} is shadowed by a local of the calling frame"
                )));
            }
            names.insert(name.clone());
            shared.insert(name.clone());
            if proc_writes.vars.contains(name) {
                captures.insert(name.clone());
            }
        }
        function_scopes.push((proc.clone(), locals));
    }

    let mut prologue = BTreeMap::new();
    let mut certain = Vec::new();
    for name in &names {
        let value = match ctx.get(name) {
            Ok(value) => host_value(name, value, permissive)?,
            Err(_) => {
                let (ty, is_certain) = infer_type(name, region, ctx);
                if is_certain {
                    certain.push((name.clone(), ty.as_vba_type()));
                }
                default_for(Some(ty.as_vba_type()))
            }
        };
        if ctx.get_global(name).is_ok() || !ctx.in_procedure() {
            shared.insert(name.clone());
        }
        prologue.insert(name.clone(), value);
    }
    let types = names
        .iter()
        .filter_map(|n| ctx.get_type(n).map(|ty| (n.clone(), ty)))
        .filter(|(_, ty)| !matches!(ty, VbaType::Variant | VbaType::Object))
        .collect();

    let mut lowerer = Lowerer {
        ctx,
        globals: &prologue,
        locals: None,
        current: None,
        loops: Vec::new(),
        permissive,
    };
    let mut functions = BTreeMap::new();
    for (proc, locals) in function_scopes {
        let function = lowerer.lower_function(&proc, locals)?;
        functions.insert(function.name.clone(), function);
    }
    let body = lowerer.lower_stmt(loop_stmt)?;

    Ok(Lowered {
        program: HostProgram {
            prologue,
            types,
            shared,
            functions,
            body,
            captures,
        },
        certain,
    })
}

struct Lowerer<'a> {
    ctx: &'a Context,
    globals: &'a BTreeMap<String, VbaValue>,
    /// Locals of the procedure being lowered; `None` while lowering the loop itself.
    locals: Option<BTreeSet<String>>,
    current: Option<String>,
    loops: Vec<LoopKind>,
    permissive: bool,
}

impl Lowerer<'_> {
    fn lower_function(
        &mut self,
        proc: &Procedure,
        locals: BTreeSet<String>,
    ) -> Result<HFunction, JitAbort> {
        let name = normalize(&proc.name);
        self.locals = Some(locals);
        self.current = Some(name.clone());
        let outer_loops = std::mem::take(&mut self.loops);
        let body = self.lower_block(&proc.body);
        self.loops = outer_loops;
        self.locals = None;
        self.current = None;
        Ok(HFunction {
            name,
            params: proc
                .params
                .iter()
                .map(|p| (normalize(&p.name), p.ty))
                .collect(),
            returns_value: proc.kind == ProcedureKind::Function,
            return_type: proc.return_type,
            body: body?,
        })
    }

    fn is_local(&self, key: &str) -> bool {
        self.locals.as_ref().map_or(false, |l| l.contains(key))
    }

    fn is_variable(&self, key: &str) -> bool {
        self.is_local(key) || self.globals.contains_key(key)
    }

    fn is_indexable(&self, key: &str) -> bool {
        self.is_local(key)
            || matches!(
                self.globals.get(key),
                Some(VbaValue::List(_) | VbaValue::Map(_))
            )
    }

    fn lower_block(&mut self, body: &[Stmt]) -> Result<Vec<HStmt>, JitAbort> {
        body.iter().map(|s| self.lower_stmt(s)).collect()
    }

    fn lower_loop_body(&mut self, kind: LoopKind, body: &[Stmt]) -> Result<Vec<HStmt>, JitAbort> {
        self.loops.push(kind);
        let body = self.lower_block(body);
        self.loops.pop();
        body
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<HStmt, JitAbort> {
        Ok(match stmt {
            Stmt::Dim(decls) => {
                let mut lowered = Vec::with_capacity(decls.len());
                for decl in decls {
                    lowered.push(HDecl {
                        name: normalize(&decl.name),
                        ty: decl.ty,
                        bounds: self.lower_exprs(&decl.bounds)?,
                    });
                }
                HStmt::Dim(lowered)
            }
            Stmt::Assign { target, value } => self.lower_assign(target, value)?,
            Stmt::Call(expr) => match expr {
                Expr::Var(name) => HStmt::Eval(self.lower_var(name)?),
                Expr::Call { .. } => HStmt::Eval(self.lower_expr(expr)?),
                other => return Err(JitAbort::Unsupported(other.to_string())),
            },
            Stmt::If { arms, else_body } => {
                let mut lowered = Vec::with_capacity(arms.len());
                for (cond, body) in arms {
                    lowered.push((self.lower_expr(cond)?, self.lower_block(body)?));
                }
                HStmt::If {
                    arms: lowered,
                    else_body: self.lower_block(else_body)?,
                }
            }
            Stmt::For {
                var,
                start,
                end,
                step,
                body,
            } => HStmt::For {
                var: normalize(var),
                start: self.lower_expr(start)?,
                end: self.lower_expr(end)?,
                step: step.as_ref().map(|s| self.lower_expr(s)).transpose()?,
                body: self.lower_loop_body(LoopKind::For, body)?,
            },
            Stmt::ForEach {
                var,
                iterable,
                body,
            } => HStmt::ForEach {
                var: normalize(var),
                iterable: self.lower_expr(iterable)?,
                body: self.lower_loop_body(LoopKind::For, body)?,
            },
            Stmt::While { cond, body } => HStmt::Loop {
                cond: Some((LoopConditionKind::While, self.lower_expr(cond)?)),
                test_first: true,
                body: self.lower_loop_body(LoopKind::Do, body)?,
            },
            Stmt::DoLoop {
                cond,
                test_first,
                body,
            } => HStmt::Loop {
                cond: match cond {
                    Some((kind, c)) => Some((*kind, self.lower_expr(c)?)),
                    None => None,
                },
                test_first: *test_first,
                body: self.lower_loop_body(LoopKind::Do, body)?,
            },
            Stmt::Exit(kind) => match kind {
                ExitKind::For if self.loops.contains(&LoopKind::For) => {
                    HStmt::Break(LoopKind::For)
                }
                ExitKind::Do if self.loops.contains(&LoopKind::Do) => HStmt::Break(LoopKind::Do),
                ExitKind::Sub | ExitKind::Function if self.locals.is_some() => HStmt::Return,
                _ => return Err(JitAbort::Unsupported(stmt.to_string())),
            },
            Stmt::With { .. }
            | Stmt::OnError(_)
            | Stmt::Label(_)
            | Stmt::Open { .. }
            | Stmt::WriteFile { .. }
            | Stmt::Close(_) => return Err(JitAbort::Unsupported(super::header(stmt))),
        })
    }

    fn lower_assign(&mut self, target: &Expr, value: &Expr) -> Result<HStmt, JitAbort> {
        let value = self.lower_expr(value)?;
        let unsupported = || JitAbort::Unsupported(format!("{target} = ..."));
        match target {
            Expr::Var(name) => Ok(HStmt::Assign(normalize(name), value)),
            Expr::Call { callee, args } => match callee.as_ref() {
                Expr::Var(f) if is_mid(f) => match args.as_slice() {
                    [Expr::Var(name), start, rest @ ..] if rest.len() <= 1 => {
                        Ok(HStmt::AssignMid {
                            name: normalize(name),
                            start: self.lower_expr(start)?,
                            length: rest.first().map(|l| self.lower_expr(l)).transpose()?,
                            value,
                        })
                    }
                    _ => Err(unsupported()),
                },
                Expr::Var(name) if self.is_indexable(&normalize(name)) => Ok(
                    HStmt::AssignIndex(normalize(name), self.lower_exprs(args)?, value),
                ),
                _ => Err(unsupported()),
            },
            _ => Err(unsupported()),
        }
    }

    fn lower_exprs(&self, exprs: &[Expr]) -> Result<Vec<HExpr>, JitAbort> {
        exprs.iter().map(|e| self.lower_expr(e)).collect()
    }

    fn lower_expr(&self, expr: &Expr) -> Result<HExpr, JitAbort> {
        Ok(match expr {
            Expr::Literal(value) => {
                if let VbaValue::String(s) = value {
                    check_ascii(s, self.permissive)?;
                }
                HExpr::Const(value.clone())
            }
            Expr::Var(name) => self.lower_var(name)?,
            Expr::Unary { op, expr } => HExpr::Unary(*op, Box::new(self.lower_expr(expr)?)),
            Expr::Binary { op, left, right } => HExpr::Binary(
                *op,
                Box::new(self.lower_expr(left)?),
                Box::new(self.lower_expr(right)?),
            ),
            Expr::Call { callee, args } => match callee.as_ref() {
                Expr::Var(name) => self.lower_call(name, args)?,
                _ => return Err(JitAbort::Unsupported(expr.to_string())),
            },
            Expr::With | Expr::Member { .. } => {
                return Err(JitAbort::Unsupported(expr.to_string()))
            }
        })
    }

    fn lower_var(&self, name: &str) -> Result<HExpr, JitAbort> {
        let key = normalize(name);
        if key == "err" || key == "me" {
            return Err(JitAbort::Unsupported(name.to_string()));
        }
        if self.is_variable(&key) {
            return Ok(HExpr::Var(key));
        }
        if self.ctx.procedure(name).is_some() {
            return Ok(HExpr::Local(key, Vec::new()));
        }
        if let Some(f) = self.ctx.library().get(name) {
            if f.arity.contains(&0) {
                return self.builtin(&f, Vec::new());
            }
        }
        Ok(HExpr::Var(key))
    }

    fn lower_call(&self, name: &str, args: &[Expr]) -> Result<HExpr, JitAbort> {
        let key = normalize(name);
        let recursive = self.current.as_deref() == Some(key.as_str());
        if !recursive && self.is_indexable(&key) {
            return Ok(HExpr::Index(key, self.lower_exprs(args)?));
        }
        let args = self.lower_exprs(args)?;
        if self.ctx.procedure(name).is_some() {
            return Ok(HExpr::Local(key, args));
        }
        let target = match self.ctx.external(name) {
            Some(ext) => ext.alias.clone().unwrap_or_else(|| ext.name.clone()),
            None => name.to_string(),
        };
        let f = self
            .ctx
            .library()
            .get(&target)
            .or_else(|| self.ctx.library().get(name))
            .ok_or_else(|| JitAbort::UnknownCall(name.to_string()))?;
        if f.name.eq_ignore_ascii_case("rtlmovememory") && args.len() == 3 {
            return Ok(HExpr::WriteMemory(args));
        }
        self.builtin(&f, args)
    }

    fn builtin(&self, f: &LibraryFunction, args: Vec<HExpr>) -> Result<HExpr, JitAbort> {
        match f.callable {
            Callable::Pure(p) if f.arity.contains(&args.len()) => Ok(HExpr::Builtin {
                name: normalize(&f.name),
                f: p,
                args,
            }),
            Callable::Pure(_) => Err(JitAbort::Unsupported(format!(
                "{} with {} argument(s)",
                f.name,
                args.len()
            ))),
            Callable::Contextual(_) => Err(JitAbort::ContextCall(f.name.clone())),
        }
    }
}

// ---- rendering ------------------------------------------------------------------------------

/// Literal rendering that keeps `1` and `1.0` apart.
fn render_value(value: &VbaValue) -> String {
    match value {
        VbaValue::Integer(v) => v.to_string(),
        VbaValue::Float(v) => format!("{v:?}"),
        VbaValue::String(s) => format!("{s:?}"),
        VbaValue::Boolean(b) => b.to_string(),
        VbaValue::List(items) => {
            let items: Vec<String> = items.borrow().iter().map(render_value).collect();
            format!("[{}]", items.join(", "))
        }
        VbaValue::Map(map) => {
            let entries: Vec<String> = map
                .borrow()
                .iter()
                .map(|(k, v)| format!("{k:?}: {}", render_value(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
        VbaValue::Null | VbaValue::Unresolved => "null".to_string(),
        VbaValue::Object(o) => format!("object {}", o.class()),
    }
}

fn join(exprs: &[HExpr]) -> String {
    exprs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for HExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HExpr::Const(v) => write!(f, "{}", render_value(v)),
            HExpr::Var(name) => write!(f, "{name}"),
            HExpr::Unary(UnOp::Neg, e) => write!(f, "(-{e})"),
            HExpr::Unary(UnOp::Not, e) => write!(f, "(not {e})"),
            HExpr::Binary(op, l, r) => write!(f, "({l} {} {r})", op.symbol()),
            HExpr::Index(name, idx) => write!(f, "{name}[{}]", join(idx)),
            HExpr::Builtin { name, args, .. } => write!(f, "builtin {name}({})", join(args)),
            HExpr::Local(name, args) => write!(f, "call {name}({})", join(args)),
            HExpr::WriteMemory(args) => write!(f, "write_memory({})", join(args)),
        }
    }
}

fn render_block(body: &[HStmt], indent: usize, out: &mut String) {
    for stmt in body {
        render_stmt(stmt, indent, out);
    }
}

fn render_stmt(stmt: &HStmt, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    // Writing to a String cannot fail.
    let _ = match stmt {
        HStmt::Dim(decls) => {
            for decl in decls {
                let _ = writeln!(
                    out,
                    "{pad}dim {}[{}]: {:?}",
                    decl.name,
                    join(&decl.bounds),
                    decl.ty
                );
            }
            Ok(())
        }
        HStmt::Assign(name, e) => writeln!(out, "{pad}{name} = {e}"),
        HStmt::AssignIndex(name, idx, e) => writeln!(out, "{pad}{name}[{}] = {e}", join(idx)),
        HStmt::AssignMid {
            name,
            start,
            length,
            value,
        } => match length {
            Some(len) => writeln!(out, "{pad}mid {name}[{start}; {len}] = {value}"),
            None => writeln!(out, "{pad}mid {name}[{start}] = {value}"),
        },
        HStmt::Eval(e) => writeln!(out, "{pad}{e}"),
        HStmt::If { arms, else_body } => {
            for (i, (cond, body)) in arms.iter().enumerate() {
                let kw = if i == 0 { "if" } else { "elif" };
                let _ = writeln!(out, "{pad}{kw} {cond}:");
                render_block(body, indent + 1, out);
            }
            if !else_body.is_empty() {
                let _ = writeln!(out, "{pad}else:");
                render_block(else_body, indent + 1, out);
            }
            Ok(())
        }
        HStmt::For {
            var,
            start,
            end,
            step,
            body,
        } => {
            let _ = match step {
                Some(step) => writeln!(out, "{pad}for {var} = {start} to {end} step {step}:"),
                None => writeln!(out, "{pad}for {var} = {start} to {end}:"),
            };
            render_block(body, indent + 1, out);
            Ok(())
        }
        HStmt::ForEach {
            var,
            iterable,
            body,
        } => {
            let _ = writeln!(out, "{pad}for each {var} in {iterable}:");
            render_block(body, indent + 1, out);
            Ok(())
        }
        HStmt::Loop {
            cond,
            test_first,
            body,
        } => {
            let cond = match cond {
                Some((LoopConditionKind::While, c)) => format!("while {c}"),
                Some((LoopConditionKind::Until, c)) => format!("until {c}"),
                None => "forever".to_string(),
            };
            let when = if *test_first { "before" } else { "after" };
            let _ = writeln!(out, "{pad}loop {cond} tested {when}:");
            render_block(body, indent + 1, out);
            Ok(())
        }
        HStmt::Break(LoopKind::For) => writeln!(out, "{pad}break for"),
        HStmt::Break(LoopKind::Do) => writeln!(out, "{pad}break do"),
        HStmt::Return => writeln!(out, "{pad}return"),
    };
}

impl fmt::Display for HostProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "prologue:")?;
        for (name, value) in &self.prologue {
            writeln!(f, "  {name} = {}", render_value(value))?;
        }
        for (name, ty) in &self.types {
            writeln!(f, "  {name}: {ty:?}")?;
        }
        let shared: Vec<&str> = self.shared.iter().map(String::as_str).collect();
        writeln!(f, "shared: {}", shared.join(", "))?;
        for function in self.functions.values() {
            let params: Vec<String> = function
                .params
                .iter()
                .map(|(name, ty)| format!("{name}: {ty:?}"))
                .collect();
            let returns = if function.returns_value {
                format!(" -> {:?}", function.return_type)
            } else {
                String::new()
            };
            writeln!(f, "fn {}({}){returns}:", function.name, params.join(", "))?;
            let mut body = String::new();
            render_block(&function.body, 1, &mut body);
            f.write_str(&body)?;
        }
        writeln!(f, "main:")?;
        let mut body = String::new();
        render_stmt(&self.body, 1, &mut body);
        f.write_str(&body)?;
        let captures: Vec<&str> = self.captures.iter().map(String::as_str).collect();
        write!(f, "capture: {}", captures.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Stmt};
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    fn abc_loop() -> Stmt {
        Stmt::For {
            var: "i".to_string(),
            start: Expr::lit(1),
            end: Expr::lit(3),
            step: None,
            body: vec![Stmt::assign(
                "buf",
                Expr::binary(
                    BinOp::Concat,
                    Expr::var("buf"),
                    Expr::call(
                        "Chr",
                        vec![Expr::binary(BinOp::Add, Expr::lit(64), Expr::var("i"))],
                    ),
                ),
            )],
        }
    }

    #[test]
    fn prologue_embeds_inputs_and_infers_missing_ones() {
        let mut ctx = Context::default();
        ctx.set("unused", VbaValue::from(7));
        let lowered = lower(&abc_loop(), &ctx).unwrap();
        let program = &lowered.program;
        assert_eq!(
            program.prologue.keys().cloned().collect::<Vec<_>>(),
            vec!["buf", "i"]
        );
        assert_eq!(program.prologue["buf"], VbaValue::from(""));
        assert_eq!(program.prologue["i"], VbaValue::Integer(0));
        assert_eq!(
            lowered.certain,
            vec![("buf".to_string(), VbaType::String)]
        );
        assert!(program.to_string().contains("builtin chr((64 + i))"));
    }

    #[test]
    fn program_text_tracks_input_values() {
        let mut ctx = Context::default();
        ctx.set("buf", VbaValue::from("x"));
        let a = lower(&abc_loop(), &ctx).unwrap().program.to_string();
        ctx.set("buf", VbaValue::from("y"));
        let b = lower(&abc_loop(), &ctx).unwrap().program.to_string();
        assert_ne!(a, b);

        assert_eq!(render_value(&VbaValue::Integer(1)), "1");
        assert_eq!(render_value(&VbaValue::Float(1.0)), "1.0");
    }

    #[test]
    fn context_functions_and_objects_abort() {
        let ctx = Context::default();
        let stmt = Stmt::DoLoop {
            cond: None,
            test_first: true,
            body: vec![Stmt::Call(Expr::call("MsgBox", vec![Expr::lit("hi")]))],
        };
        assert!(matches!(
            lower(&stmt, &ctx),
            Err(JitAbort::ContextCall(_))
        ));

        let mut ctx = Context::default();
        ctx.set(
            "shell",
            VbaValue::Object(crate::value::VbaObjectRef::new("WScript.Shell")),
        );
        let stmt = Stmt::While {
            cond: Expr::lit(false),
            body: vec![Stmt::assign("x", Expr::var("shell"))],
        };
        assert!(matches!(lower(&stmt, &ctx), Err(JitAbort::ObjectValue(_))));
    }

    #[test]
    fn non_ascii_literals_need_permission() {
        let stmt = Stmt::While {
            cond: Expr::lit(false),
            body: vec![Stmt::assign("x", Expr::lit("caf\u{e9}"))],
        };
        let ctx = Context::default();
        assert!(matches!(
            lower(&stmt, &ctx),
            Err(JitAbort::NonAsciiLiteral(_))
        ));

        let policy = crate::policy::EmulationPolicy {
            permissive_literals: true,
            ..Default::default()
        };
        let ctx = Context::new(crate::context::Environment::new(policy));
        assert!(lower(&stmt, &ctx).is_ok());
    }

    #[test]
    fn reachable_functions_are_lowered_with_their_globals() {
        let mut ctx = Context::default();
        ctx.set("key", VbaValue::from(3));
        ctx.set_procedure(Rc::new(Procedure::function(
            "Shift",
            &["c"],
            None,
            vec![Stmt::assign(
                "Shift",
                Expr::binary(BinOp::Add, Expr::var("c"), Expr::var("key")),
            )],
        )));
        let stmt = Stmt::For {
            var: "i".to_string(),
            start: Expr::lit(1),
            end: Expr::lit(2),
            step: None,
            body: vec![Stmt::assign(
                "total",
                Expr::call("Shift", vec![Expr::var("i")]),
            )],
        };
        let program = lower(&stmt, &ctx).unwrap().program;
        assert!(program.functions.contains_key("shift"));
        assert_eq!(program.prologue["key"], VbaValue::from(3));
        assert!(program.shared.contains("key"));
        assert!(!program.captures.contains("key"));
    }

    #[test]
    fn exit_without_enclosing_loop_aborts() {
        let ctx = Context::default();
        let stmt = Stmt::DoLoop {
            cond: None,
            test_first: true,
            body: vec![Stmt::Exit(ExitKind::For)],
        };
        assert!(matches!(lower(&stmt, &ctx), Err(JitAbort::Unsupported(_))));
    }
}
