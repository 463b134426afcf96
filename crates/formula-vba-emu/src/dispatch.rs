//! Operand resolution.
//!
//! VBA surface syntax does not tell a literal, a spreadsheet cell, a shape's text and a plain
//! identifier apart, so [`eval_arg`] tries progressively more speculative strategies in a fixed
//! order. Spreadsheet and object-text reads come before generic evaluation because they share
//! member-access syntax with ordinary object properties.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::ast::{BinOp, Expr, UnOp};
use crate::context::Context;
use crate::document::a1_to_row_col;
use crate::error::EmuError;
use crate::interp::{call_function, eval_expr};
use crate::value::VbaValue;

/// Something to resolve.
#[derive(Debug, Clone, Copy)]
pub enum Operand<'a> {
    /// Already a value.
    Value(&'a VbaValue),
    /// A parsed expression.
    Expr(&'a Expr),
    /// A name or rendered member path such as `UserForm1.TextBox1.Text`.
    Name(&'a str),
}

/// Form-control properties that read as empty text when nothing was extracted for them.
const FORM_FIELD_SUFFIXES: &[&str] = &[
    ".tag",
    ".boundvalue",
    ".column",
    ".caption",
    ".groupname",
    ".seltext",
    ".controltiptext",
    ".passwordchar",
    ".controlsource",
    ".value",
];

/// Resolve one operand to a value.
///
/// Only resource exhaustion is raised as an error from name resolution; names that resolve
/// nowhere come back as [`VbaValue::Unresolved`] when `treat_as_var_name` is set, and as their own
/// text otherwise. Evaluating an expression can still fail with an emulated-language error,
/// which the calling statement routes through the error state.
pub fn eval_arg(
    operand: Operand<'_>,
    ctx: &mut Context,
    treat_as_var_name: bool,
) -> Result<VbaValue, EmuError> {
    ctx.limiter().check()?;
    match operand {
        Operand::Value(v) => Ok(v.clone()),
        Operand::Expr(expr) => eval_operand_expr(expr, ctx),
        Operand::Name(name) => resolve_name(name, ctx, treat_as_var_name),
    }
}

fn eval_operand_expr(expr: &Expr, ctx: &mut Context) -> Result<VbaValue, EmuError> {
    if let Expr::Literal(v) = expr {
        return Ok(v.clone());
    }

    let cache_key = is_constant_numeric(expr).then(|| expr.to_string());
    if let Some(key) = &cache_key {
        if let Some(v) = ctx.caches().constant(key) {
            log::debug!("constant cache hit for {key}");
            return Ok(v);
        }
    }

    if let Some(v) = read_cell(expr, ctx)? {
        return Ok(v);
    }
    if let Some(v) = read_object_text(expr, ctx)? {
        return Ok(v);
    }

    let value = eval_expr(expr, ctx)?;
    if let VbaValue::String(text) = &value {
        if let Some(v) = read_object_text_path(text, ctx) {
            return Ok(v);
        }
    }
    if let Some(key) = cache_key {
        ctx.caches().store_constant(&key, &value);
    }
    Ok(value)
}

/// Numeric literals combined by `+ - * /` and unary minus, with at least one operator.
pub(crate) fn is_constant_numeric(expr: &Expr) -> bool {
    fn pure(expr: &Expr) -> bool {
        match expr {
            Expr::Literal(VbaValue::Integer(_) | VbaValue::Float(_)) => true,
            Expr::Unary {
                op: UnOp::Neg,
                expr,
            } => pure(expr),
            Expr::Binary { op, left, right } => {
                matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
                    && pure(left)
                    && pure(right)
            }
            _ => false,
        }
    }
    matches!(expr, Expr::Binary { .. } | Expr::Unary { .. }) && pure(expr)
}

struct Segment<'a> {
    name: &'a str,
    args: Option<&'a [Expr]>,
}

/// `a.b(1).c` as `[a, b(1), c]`; `None` for anything that is not a member/call chain.
fn segments(expr: &Expr) -> Option<Vec<Segment<'_>>> {
    match expr {
        Expr::Var(name) => Some(vec![Segment { name, args: None }]),
        Expr::With => Some(Vec::new()),
        Expr::Member { object, member } => {
            let mut out = segments(object)?;
            out.push(Segment {
                name: member,
                args: None,
            });
            Some(out)
        }
        Expr::Call { callee, args } => {
            let mut out = segments(callee)?;
            let last = out.last_mut()?;
            if last.args.is_some() {
                return None;
            }
            last.args = Some(args);
            Some(out)
        }
        _ => None,
    }
}

/// `[ThisWorkbook.]Sheets(s).Range("A1")[.Value]` or `Sheets(s).Cells(r, c)[.Value]`.
fn read_cell(expr: &Expr, ctx: &mut Context) -> Result<Option<VbaValue>, EmuError> {
    if ctx.document().is_none() || !matches!(expr, Expr::Member { .. } | Expr::Call { .. }) {
        return Ok(None);
    }
    let Some(chain) = segments(expr) else {
        return Ok(None);
    };
    let Some(pos) = chain.iter().position(|s| {
        (s.name.eq_ignore_ascii_case("sheets") || s.name.eq_ignore_ascii_case("worksheets"))
            && s.args.map_or(false, |a| a.len() == 1)
    }) else {
        return Ok(None);
    };
    let Some(range) = chain.get(pos + 1) else {
        return Ok(None);
    };
    let trailing_ok = match &chain[pos + 2..] {
        [] => true,
        [prop] => {
            prop.args.is_none()
                && ["value", "value2", "text"]
                    .iter()
                    .any(|p| prop.name.eq_ignore_ascii_case(p))
        }
        _ => false,
    };
    let (Some(sheet_args), Some(range_args)) = (chain[pos].args, range.args) else {
        return Ok(None);
    };
    if !trailing_ok {
        return Ok(None);
    }

    let sheet_key = eval_arg(Operand::Expr(&sheet_args[0]), ctx, false)?;
    let cell = if range.name.eq_ignore_ascii_case("range") && range_args.len() == 1 {
        let a1 = eval_arg(Operand::Expr(&range_args[0]), ctx, false)?.to_string_lossy();
        a1_to_row_col(&a1)
    } else if range.name.eq_ignore_ascii_case("cells") && range_args.len() == 2 {
        let row = eval_arg(Operand::Expr(&range_args[0]), ctx, false)?.to_int();
        let col = eval_arg(Operand::Expr(&range_args[1]), ctx, false)?.to_int();
        u32::try_from(row).ok().zip(u32::try_from(col).ok())
    } else {
        None
    };
    let Some((row, col)) = cell else {
        return Ok(None);
    };

    let Some(doc) = ctx.document() else {
        return Ok(None);
    };
    let sheet = match &sheet_key {
        VbaValue::Integer(i) => usize::try_from(*i).ok().and_then(|i| doc.sheet_by_index(i)),
        other => doc.sheet_by_name(&other.to_string_lossy()),
    };
    let read = sheet.and_then(|s| doc.cell(s, row, col));
    match read {
        Some(read) => {
            log::debug!("read cell ({}, {}) for {expr}", read.row, read.col);
            Ok(Some(read.value))
        }
        None => {
            log::debug!("cell ({row}, {col}) for {expr} not found");
            Ok(None)
        }
    }
}

fn object_text_key(collection: &str, id: &str) -> String {
    format!(
        "{}('{}').textframe.textrange.text",
        collection.to_ascii_lowercase(),
        id.trim().to_ascii_lowercase()
    )
}

fn lookup_object_text(collection: &str, id: &str, ctx: &Context) -> Option<VbaValue> {
    ctx.doc_var(&object_text_key(collection, id))
        .or_else(|| ctx.doc_var(&object_text_key(collection, "1")))
        .map(VbaValue::String)
}

/// `[ActiveDocument.]Shapes(id).TextFrame.TextRange.Text` and the `InlineShapes` equivalent.
fn read_object_text(expr: &Expr, ctx: &mut Context) -> Result<Option<VbaValue>, EmuError> {
    if !matches!(expr, Expr::Member { .. }) {
        return Ok(None);
    }
    let Some(chain) = segments(expr) else {
        return Ok(None);
    };
    let Some(shape) = chain.iter().find(|s| {
        (s.name.eq_ignore_ascii_case("shapes") || s.name.eq_ignore_ascii_case("inlineshapes"))
            && s.args.map_or(false, |a| a.len() == 1)
    }) else {
        return Ok(None);
    };
    let Some(args) = shape.args else {
        return Ok(None);
    };
    let id = eval_arg(Operand::Expr(&args[0]), ctx, false)?.to_string_lossy();
    Ok(lookup_object_text(shape.name, &id, ctx))
}

/// A path left unresolved by evaluation, e.g. `Shapes("x").TextFrame.TextRange.Text`.
fn read_object_text_path(text: &str, ctx: &Context) -> Option<VbaValue> {
    let lower = text.trim().to_ascii_lowercase();
    let collection = if lower.starts_with("shapes(") {
        "shapes"
    } else if lower.starts_with("inlineshapes(") {
        "inlineshapes"
    } else {
        return None;
    };
    let open = lower.find('(')?;
    let close = open + lower[open..].find(')')?;
    let id = lower[open + 1..close].trim().trim_matches(|c| c == '\'' || c == '"');
    lookup_object_text(collection, id, ctx)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn resolve_name(
    name: &str,
    ctx: &mut Context,
    treat_as_var_name: bool,
) -> Result<VbaValue, EmuError> {
    let name = name.trim();
    if let Ok(v) = ctx.get(name) {
        return Ok(v);
    }
    let lower = name.to_ascii_lowercase();

    if let Some(v) = rewrite_suffix(&lower, ctx) {
        return Ok(v);
    }
    if let Some(v) = read_object_text_path(name, ctx) {
        return Ok(v);
    }

    if name.contains('.') {
        if let Some(text) = ctx.doc_var(name) {
            return Ok(VbaValue::String(text));
        }
        if let Some(v) = peel_dotted(name, ctx)? {
            return Ok(v);
        }
        if let Some(text) = read_document_property(&lower, ctx) {
            return Ok(VbaValue::String(text));
        }
        if let Some(v) = read_wildcard_field(&lower, ctx) {
            return Ok(v);
        }
        if FORM_FIELD_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
            log::debug!("form field {name} has no extracted value, reading as empty");
            return Ok(VbaValue::String(String::new()));
        }
    }

    if treat_as_var_name && is_identifier(name) {
        log::debug!("cannot resolve {name}");
        return Ok(VbaValue::Unresolved);
    }
    Ok(VbaValue::String(name.to_string()))
}

/// `x.nodeTypedValue` reads the sibling `x.text` (base64-decoded when it decodes) and
/// `x.SelectedItem` reads `x.rapt.Value`.
fn rewrite_suffix(lower: &str, ctx: &Context) -> Option<VbaValue> {
    if let Some(prefix) = lower.strip_suffix(".nodetypedvalue") {
        let text = ctx.get(&format!("{prefix}.text")).ok()?;
        let decoded = BASE64
            .decode(text.to_string_lossy().trim())
            .ok()
            .map(|bytes| VbaValue::String(bytes.iter().map(|b| *b as char).collect()));
        return Some(decoded.unwrap_or(text));
    }
    if let Some(prefix) = lower.strip_suffix(".selecteditem") {
        return ctx.get(&format!("{prefix}.rapt.value")).ok();
    }
    None
}

/// Try `a.b.c`, `b.c`, `c` as variables, then `c` as a function callable without arguments.
fn peel_dotted(name: &str, ctx: &mut Context) -> Result<Option<VbaValue>, EmuError> {
    let mut rest = name;
    while let Some(dot) = rest.find('.') {
        rest = &rest[dot + 1..];
        if let Ok(v) = ctx.get(rest) {
            if v.to_string_lossy() != name {
                return Ok(Some(v));
            }
        }
    }

    let Some(func) = name.rsplit('.').next().filter(|f| is_identifier(f)) else {
        return Ok(None);
    };
    let callable_without_args = ctx.procedure(func).is_some()
        || ctx
            .library()
            .get(func)
            .map_or(false, |f| f.arity.contains(&0));
    if !callable_without_args {
        return Ok(None);
    }
    log::debug!("resolving {name} as a call to {func}");
    call_function(func, &[], ctx)
}

/// The argument of `prefix(arg)` with quotes, parentheses and a trailing `.value` removed. An
/// unquoted argument naming a variable is replaced by the variable's value.
fn property_argument(lower: &str, prefix: &str, ctx: &Context) -> Option<String> {
    let rest = lower.strip_prefix(prefix)?;
    let raw = rest.strip_suffix(".value").unwrap_or(rest);
    let quoted = raw.contains('"') || raw.contains('\'');
    let arg: String = raw
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | '"' | '\''))
        .collect();
    let arg = arg.trim().to_string();
    if !quoted {
        if let Ok(v) = ctx.get(&arg) {
            return Some(v.to_string_lossy());
        }
    }
    Some(arg)
}

fn read_document_property(lower: &str, ctx: &Context) -> Option<String> {
    if let Some(field) = property_argument(lower, "activedocument.item(", ctx) {
        return ctx.read_metadata(&field);
    }
    for prefix in [
        "thisdocument.builtindocumentproperties(",
        "activeworkbook.builtindocumentproperties(",
        "activedocument.builtindocumentproperties(",
    ] {
        if let Some(field) = property_argument(lower, prefix, ctx) {
            return ctx.doc_var(&field).or_else(|| ctx.read_metadata(&field));
        }
    }
    for prefix in [
        "activedocument.variables(",
        "activedocument.customdocumentproperties(",
    ] {
        if let Some(var) = property_argument(lower, prefix, ctx) {
            return ctx.doc_var(&var);
        }
    }
    None
}

/// Form fields extracted with a numeric suffix: `UserForm1.TextBox.Text` may be stored as
/// `userform1*3`.
fn read_wildcard_field(lower: &str, ctx: &Context) -> Option<VbaValue> {
    let (first, _) = lower.split_once('.')?;
    (0..=10).find_map(|i| ctx.get(&format!("{first}*{i}")).ok())
}
