//! Parsed VBA constructs.
//!
//! The parser lives outside this crate; it produces these nodes. Every node category is a
//! variant of a closed enum and exposes the same capability set through [`Node`]: child
//! iteration, visitor dispatch and a loop marker. Evaluation lives in [`crate::interp`] and host
//! code generation in [`crate::jit`].

use std::fmt;

use crate::value::{format_float, VbaValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VbaType {
    Variant,
    Integer,
    Long,
    Byte,
    Double,
    String,
    Boolean,
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::IntDiv => "\\",
            Self::Mod => "Mod",
            Self::Pow => "^",
            Self::Concat => "&",
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "And",
            Self::Or => "Or",
            Self::Xor => "Xor",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            Self::Pow => 9,
            Self::Mul | Self::Div => 8,
            Self::IntDiv => 7,
            Self::Mod => 6,
            Self::Add | Self::Sub => 5,
            Self::Concat => 4,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge => 3,
            Self::And => 2,
            Self::Or | Self::Xor => 1,
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::IntDiv | Self::Mod | Self::Pow
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(VbaValue),
    Var(String),
    /// The implicit receiver inside a `With` block (`.Text` has `object: With`).
    With,
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        member: String,
    },
    /// Function call or array index; VBA syntax does not distinguish the two.
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn lit(value: impl Into<VbaValue>) -> Self {
        Self::Literal(value.into())
    }

    pub fn var(name: &str) -> Self {
        Self::Var(name.to_string())
    }

    pub fn unary(op: UnOp, expr: Expr) -> Self {
        Self::Unary {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn member(object: Expr, member: &str) -> Self {
        Self::Member {
            object: Box::new(object),
            member: member.to_string(),
        }
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Self {
        Self::Call {
            callee: Box::new(Self::var(name)),
            args,
        }
    }

    pub fn method(object: Expr, member: &str, args: Vec<Expr>) -> Self {
        Self::Call {
            callee: Box::new(Self::member(object, member)),
            args,
        }
    }

    /// `a.b.c` for a chain of plain member accesses rooted at a variable or `With`.
    pub fn dotted_name(&self) -> Option<String> {
        match self {
            Self::Var(name) => Some(name.clone()),
            Self::With => Some(String::new()),
            Self::Member { object, member } => {
                let base = object.dotted_name()?;
                Some(format!("{base}.{member}"))
            }
            _ => None,
        }
    }

    /// The name being called when the callee is a plain identifier.
    pub fn call_name(&self) -> Option<&str> {
        match self {
            Self::Call { callee, .. } => match callee.as_ref() {
                Self::Var(name) => Some(name),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub ty: Option<VbaType>,
    /// Upper bounds of a fixed-size array, one per dimension.
    pub bounds: Vec<Expr>,
}

impl VarDecl {
    pub fn new(name: &str, ty: Option<VbaType>) -> Self {
        Self {
            name: name.to_string(),
            ty,
            bounds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopConditionKind {
    While,
    Until,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OnErrorTarget {
    ResumeNext,
    /// `On Error GoTo 0`
    Disable,
    Label(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    For,
    Do,
    Sub,
    Function,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Dim(Vec<VarDecl>),
    Assign {
        target: Expr,
        value: Expr,
    },
    Call(Expr),
    If {
        arms: Vec<(Expr, Vec<Stmt>)>,
        else_body: Vec<Stmt>,
    },
    For {
        var: String,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    ForEach {
        var: String,
        iterable: Expr,
        body: Vec<Stmt>,
    },
    /// `While .. Wend`
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    /// `Do [While|Until cond] .. Loop` or `Do .. Loop [While|Until cond]`.
    DoLoop {
        cond: Option<(LoopConditionKind, Expr)>,
        test_first: bool,
        body: Vec<Stmt>,
    },
    With {
        object: Expr,
        body: Vec<Stmt>,
    },
    OnError(OnErrorTarget),
    Label(String),
    Exit(ExitKind),
    Open {
        path: Expr,
        file_number: Expr,
    },
    /// `Print #n, value` and `Put #n, , value`
    WriteFile {
        file_number: Expr,
        value: Expr,
    },
    Close(Vec<Expr>),
}

impl Stmt {
    pub fn assign(name: &str, value: Expr) -> Self {
        Self::Assign {
            target: Expr::var(name),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
    Sub,
    Function,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Option<VbaType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    pub name: String,
    pub kind: ProcedureKind,
    pub params: Vec<Param>,
    pub return_type: Option<VbaType>,
    pub body: Vec<Stmt>,
}

impl Procedure {
    pub fn sub(name: &str, params: &[&str], body: Vec<Stmt>) -> Self {
        Self {
            name: name.to_string(),
            kind: ProcedureKind::Sub,
            params: params
                .iter()
                .map(|p| Param {
                    name: (*p).to_string(),
                    ty: None,
                })
                .collect(),
            return_type: None,
            body,
        }
    }

    pub fn function(
        name: &str,
        params: &[&str],
        return_type: Option<VbaType>,
        body: Vec<Stmt>,
    ) -> Self {
        Self {
            kind: ProcedureKind::Function,
            return_type,
            ..Self::sub(name, params, body)
        }
    }
}

/// `Declare Function Name Lib "lib" [Alias "alias"] (...)`
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalFunction {
    pub name: String,
    pub lib: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub name: String,
    pub declarations: Vec<VarDecl>,
    pub consts: Vec<(String, Expr)>,
    pub externals: Vec<ExternalFunction>,
    pub procedures: Vec<Procedure>,
}

/// A borrowed view over any node category.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Expr(&'a Expr),
    Stmt(&'a Stmt),
    Procedure(&'a Procedure),
}

/// Visitors return `false` to skip the children of the visited node.
pub trait Visitor {
    fn visit(&mut self, node: Node<'_>) -> bool;
}

impl<'a> Node<'a> {
    pub fn is_loop(&self) -> bool {
        matches!(
            self,
            Node::Stmt(
                Stmt::For { .. } | Stmt::ForEach { .. } | Stmt::While { .. } | Stmt::DoLoop { .. }
            )
        )
    }

    pub fn children(&self) -> Vec<Node<'a>> {
        let mut out = Vec::new();
        match *self {
            Node::Expr(expr) => match expr {
                Expr::Literal(_) | Expr::Var(_) | Expr::With => {}
                Expr::Unary { expr, .. } => out.push(Node::Expr(expr)),
                Expr::Binary { left, right, .. } => {
                    out.push(Node::Expr(left));
                    out.push(Node::Expr(right));
                }
                Expr::Member { object, .. } => out.push(Node::Expr(object)),
                Expr::Call { callee, args } => {
                    out.push(Node::Expr(callee));
                    out.extend(args.iter().map(Node::Expr));
                }
            },
            Node::Stmt(stmt) => match stmt {
                Stmt::Dim(decls) => {
                    for decl in decls {
                        out.extend(decl.bounds.iter().map(Node::Expr));
                    }
                }
                Stmt::Assign { target, value } => {
                    out.push(Node::Expr(target));
                    out.push(Node::Expr(value));
                }
                Stmt::Call(expr) => out.push(Node::Expr(expr)),
                Stmt::If { arms, else_body } => {
                    for (cond, body) in arms {
                        out.push(Node::Expr(cond));
                        out.extend(body.iter().map(Node::Stmt));
                    }
                    out.extend(else_body.iter().map(Node::Stmt));
                }
                Stmt::For {
                    start,
                    end,
                    step,
                    body,
                    ..
                } => {
                    out.push(Node::Expr(start));
                    out.push(Node::Expr(end));
                    if let Some(step) = step {
                        out.push(Node::Expr(step));
                    }
                    out.extend(body.iter().map(Node::Stmt));
                }
                Stmt::ForEach { iterable, body, .. } => {
                    out.push(Node::Expr(iterable));
                    out.extend(body.iter().map(Node::Stmt));
                }
                Stmt::While { cond, body } => {
                    out.push(Node::Expr(cond));
                    out.extend(body.iter().map(Node::Stmt));
                }
                Stmt::DoLoop { cond, body, .. } => {
                    if let Some((_, cond)) = cond {
                        out.push(Node::Expr(cond));
                    }
                    out.extend(body.iter().map(Node::Stmt));
                }
                Stmt::With { object, body } => {
                    out.push(Node::Expr(object));
                    out.extend(body.iter().map(Node::Stmt));
                }
                Stmt::OnError(_) | Stmt::Label(_) | Stmt::Exit(_) => {}
                Stmt::Open { path, file_number } => {
                    out.push(Node::Expr(path));
                    out.push(Node::Expr(file_number));
                }
                Stmt::WriteFile { file_number, value } => {
                    out.push(Node::Expr(file_number));
                    out.push(Node::Expr(value));
                }
                Stmt::Close(ids) => out.extend(ids.iter().map(Node::Expr)),
            },
            Node::Procedure(proc) => out.extend(proc.body.iter().map(Node::Stmt)),
        }
        out
    }

    /// Depth-first, pre-order traversal.
    pub fn accept(&self, visitor: &mut dyn Visitor) {
        if !visitor.visit(*self) {
            return;
        }
        for child in self.children() {
            child.accept(visitor);
        }
    }
}

impl fmt::Display for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Expr(e) => write!(f, "{e}"),
            Node::Stmt(s) => write!(f, "{s}"),
            Node::Procedure(p) => write!(f, "{p}"),
        }
    }
}

pub(crate) fn fmt_literal(value: &VbaValue, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        VbaValue::String(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
        VbaValue::Integer(v) => write!(f, "{v}"),
        VbaValue::Float(v) => write!(f, "{}", format_float(*v)),
        VbaValue::Boolean(v) => write!(f, "{}", if *v { "True" } else { "False" }),
        VbaValue::List(items) => {
            write!(f, "Array(")?;
            for (i, item) in items.borrow().iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                fmt_literal(item, f)?;
            }
            write!(f, ")")
        }
        VbaValue::Null | VbaValue::Unresolved => write!(f, "Null"),
        VbaValue::Map(_) => write!(f, "Nothing"),
        VbaValue::Object(o) => write!(f, "CreateObject(\"{}\")", o.class()),
    }
}

fn fmt_operand(expr: &Expr, parent: BinOp, right: bool, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let needs_parens = match expr {
        Expr::Binary { op, .. } => {
            op.precedence() < parent.precedence()
                || (right && op.precedence() == parent.precedence())
        }
        _ => false,
    };
    if needs_parens {
        write!(f, "({expr})")
    } else {
        write!(f, "{expr}")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => fmt_literal(v, f),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::With => Ok(()),
            Expr::Unary { op: UnOp::Neg, expr } => match expr.as_ref() {
                Expr::Binary { .. } => write!(f, "-({expr})"),
                _ => write!(f, "-{expr}"),
            },
            Expr::Unary { op: UnOp::Not, expr } => write!(f, "Not {expr}"),
            Expr::Binary { op, left, right } => {
                fmt_operand(left, *op, false, f)?;
                write!(f, " {} ", op.symbol())?;
                fmt_operand(right, *op, true, f)
            }
            Expr::Member { object, member } => write!(f, "{object}.{member}"),
            Expr::Call { callee, args } => {
                write!(f, "{callee}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

fn fmt_block(body: &[Stmt], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for stmt in body {
        for line in stmt.to_string().lines() {
            writeln!(f, "  {line}")?;
        }
    }
    Ok(())
}

fn type_name(ty: VbaType) -> &'static str {
    match ty {
        VbaType::Variant => "Variant",
        VbaType::Integer => "Integer",
        VbaType::Long => "Long",
        VbaType::Byte => "Byte",
        VbaType::Double => "Double",
        VbaType::String => "String",
        VbaType::Boolean => "Boolean",
        VbaType::Object => "Object",
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Dim(decls) => {
                write!(f, "Dim ")?;
                for (i, decl) in decls.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", decl.name)?;
                    if !decl.bounds.is_empty() {
                        let bounds: Vec<String> =
                            decl.bounds.iter().map(|b| b.to_string()).collect();
                        write!(f, "({})", bounds.join(", "))?;
                    }
                    if let Some(ty) = decl.ty {
                        write!(f, " As {}", type_name(ty))?;
                    }
                }
                Ok(())
            }
            Stmt::Assign { target, value } => write!(f, "{target} = {value}"),
            Stmt::Call(expr) => write!(f, "{expr}"),
            Stmt::If { arms, else_body } => {
                for (i, (cond, body)) in arms.iter().enumerate() {
                    let kw = if i == 0 { "If" } else { "ElseIf" };
                    writeln!(f, "{kw} {cond} Then")?;
                    fmt_block(body, f)?;
                }
                if !else_body.is_empty() {
                    writeln!(f, "Else")?;
                    fmt_block(else_body, f)?;
                }
                write!(f, "End If")
            }
            Stmt::For {
                var,
                start,
                end,
                step,
                body,
            } => {
                write!(f, "For {var} = {start} To {end}")?;
                if let Some(step) = step {
                    write!(f, " Step {step}")?;
                }
                writeln!(f)?;
                fmt_block(body, f)?;
                write!(f, "Next {var}")
            }
            Stmt::ForEach {
                var,
                iterable,
                body,
            } => {
                writeln!(f, "For Each {var} In {iterable}")?;
                fmt_block(body, f)?;
                write!(f, "Next {var}")
            }
            Stmt::While { cond, body } => {
                writeln!(f, "While {cond}")?;
                fmt_block(body, f)?;
                write!(f, "Wend")
            }
            Stmt::DoLoop {
                cond,
                test_first,
                body,
            } => {
                let cond_text = cond.as_ref().map(|(kind, c)| match kind {
                    LoopConditionKind::While => format!(" While {c}"),
                    LoopConditionKind::Until => format!(" Until {c}"),
                });
                if *test_first {
                    writeln!(f, "Do{}", cond_text.clone().unwrap_or_default())?;
                } else {
                    writeln!(f, "Do")?;
                }
                fmt_block(body, f)?;
                if *test_first {
                    write!(f, "Loop")
                } else {
                    write!(f, "Loop{}", cond_text.unwrap_or_default())
                }
            }
            Stmt::With { object, body } => {
                writeln!(f, "With {object}")?;
                fmt_block(body, f)?;
                write!(f, "End With")
            }
            Stmt::OnError(OnErrorTarget::ResumeNext) => write!(f, "On Error Resume Next"),
            Stmt::OnError(OnErrorTarget::Disable) => write!(f, "On Error GoTo 0"),
            Stmt::OnError(OnErrorTarget::Label(label)) => write!(f, "On Error GoTo {label}"),
            Stmt::Label(label) => write!(f, "{label}:"),
            Stmt::Exit(kind) => match kind {
                ExitKind::For => write!(f, "Exit For"),
                ExitKind::Do => write!(f, "Exit Do"),
                ExitKind::Sub => write!(f, "Exit Sub"),
                ExitKind::Function => write!(f, "Exit Function"),
            },
            Stmt::Open { path, file_number } => {
                write!(f, "Open {path} For Binary As #{file_number}")
            }
            Stmt::WriteFile { file_number, value } => write!(f, "Put #{file_number}, , {value}"),
            Stmt::Close(ids) => {
                write!(f, "Close")?;
                for (i, id) in ids.iter().enumerate() {
                    write!(f, "{}#{id}", if i == 0 { " " } else { ", " })?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kw = match self.kind {
            ProcedureKind::Sub => "Sub",
            ProcedureKind::Function => "Function",
        };
        let params: Vec<&str> = self.params.iter().map(|p| p.name.as_str()).collect();
        write!(f, "{kw} {}({})", self.name, params.join(", "))?;
        if let Some(ty) = self.return_type {
            write!(f, " As {}", type_name(ty))?;
        }
        writeln!(f)?;
        fmt_block(&self.body, f)?;
        write!(f, "End {kw}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_vba_source() {
        let body = vec![Stmt::assign(
            "buf",
            Expr::binary(
                BinOp::Concat,
                Expr::var("buf"),
                Expr::call(
                    "Chr",
                    vec![Expr::binary(BinOp::Add, Expr::lit(64), Expr::var("i"))],
                ),
            ),
        )];
        let stmt = Stmt::For {
            var: "i".to_string(),
            start: Expr::lit(1),
            end: Expr::lit(3),
            step: None,
            body,
        };
        assert_eq!(
            stmt.to_string(),
            "For i = 1 To 3\n  buf = buf & Chr(64 + i)\nNext i"
        );
    }

    #[test]
    fn parenthesizes_by_precedence() {
        let e = Expr::binary(
            BinOp::Mul,
            Expr::binary(BinOp::Add, Expr::lit(1), Expr::lit(2)),
            Expr::lit(3),
        );
        assert_eq!(e.to_string(), "(1 + 2) * 3");
        let e = Expr::binary(
            BinOp::Sub,
            Expr::lit(1),
            Expr::binary(BinOp::Sub, Expr::lit(2), Expr::lit(3)),
        );
        assert_eq!(e.to_string(), "1 - (2 - 3)");
        assert_eq!(Expr::member(Expr::With, "Text").to_string(), ".Text");
    }

    #[test]
    fn loop_marker_and_children() {
        let stmt = Stmt::While {
            cond: Expr::var("x"),
            body: vec![Stmt::Exit(ExitKind::Do)],
        };
        let node = Node::Stmt(&stmt);
        assert!(node.is_loop());
        assert_eq!(node.children().len(), 2);
        assert!(!Node::Expr(&Expr::var("x")).is_loop());
    }
}
