//! `formula-vba-emu` emulates VBA macros pulled out of Office documents, for malware analysis.
//!
//! Nothing is executed for real: the emulator interprets a parsed module inside a sandboxed
//! [`Context`], records what the macro tried to do (run commands, download URLs, drop files,
//! write shellcode) and hands the result back as an [`EmulationReport`].
//!
//! The crate exposes:
//! - The AST the parser produces ([`Module`], [`Procedure`], [`Stmt`], [`Expr`]).
//! - [`Context`], the emulation environment: scopes, error state, action log, open files.
//! - [`eval_arg`], the operand resolver consulted for every expression.
//! - [`infer_type`], heuristic typing of variables that have no value yet.
//! - [`compile`], the loop compiler, and [`EvalCaches`], its memo tables.
//! - [`ResourceLimiter`] and [`EmulationPolicy`], the recursion/deadline budget and its knobs.
//! - [`Emulator`], the run driver over a module's auto-exec entry points.

mod analysis;
mod ast;
mod builtins;
mod cache;
mod context;
mod dispatch;
mod document;
mod emulator;
mod error;
mod files;
mod infer;
mod interp;
mod iocs;
mod jit;
mod library;
mod limits;
mod names;
mod ops;
mod policy;
mod value;

pub use crate::analysis::{
    reachable_procedures, FunctionCalls, LetStatements, LhsVars, VarsInExpr,
};
pub use crate::ast::{
    BinOp, ExitKind, Expr, ExternalFunction, LoopConditionKind, Module, Node, OnErrorTarget,
    Param, Procedure, ProcedureKind, Stmt, UnOp, VarDecl, VbaType, Visitor,
};
pub use crate::cache::{CacheStats, EvalCaches, LoopDelta};
pub use crate::context::{
    Action, ActionSink, Context, Environment, ErrInfo, ErrorMode, ErrorState, Scope,
};
pub use crate::dispatch::{eval_arg, Operand};
pub use crate::document::{a1_to_row_col, CellRead, DocumentModel, DocumentText, InMemoryWorkbook};
pub use crate::emulator::{EmulationReport, Emulator, CALLBACK_SUFFIXES, ENTRY_POINTS};
pub use crate::error::EmuError;
pub use crate::infer::{expr_type, infer_type, InferredType};
pub use crate::interp::{call_procedure, eval_expr, exec_block, ControlFlow};
pub use crate::jit::compile;
pub use crate::library::{Callable, Constants, ContextFn, Library, LibraryFunction, PureFn};
pub use crate::limits::{DepthGuard, ResourceLimiter};
pub use crate::names::{Binding, NameMap};
pub use crate::policy::EmulationPolicy;
pub use crate::value::{VbaListRef, VbaMapRef, VbaObjectRef, VbaValue};
