//! Loop compiler.
//!
//! A loop is lowered, together with every local procedure it can reach, into a self-contained
//! host program whose inputs are embedded as literals. The program runs on an isolated machine
//! and only a completed run is merged back into the calling [`Context`]. Results are memoised
//! by program text in [`crate::EvalCaches`], shared by every run of an emulator.
//!
//! A loop that cannot be lowered (object members, `With` shorthand, file I/O, error handlers,
//! context-dependent library calls) is left to the interpreter.

mod codegen;
mod machine;

use std::rc::Rc;
use std::sync::OnceLock;

use regex::Regex;

use crate::ast::{Stmt, VbaType};
use crate::cache::{CachedLoop, LoopDelta};
use crate::context::Context;
use crate::error::EmuError;
use crate::value::VbaValue;

use machine::{Halt, Machine};

/// Calls that run code generated at emulation time.
pub(crate) fn dynamic_code() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(execute|executeglobal|eval)\s*\(").expect("valid regex")
    })
}

fn header(stmt: &Stmt) -> String {
    stmt.to_string().lines().next().unwrap_or_default().to_string()
}

/// Try to run `loop_stmt` as a compiled loop.
///
/// `Ok(true)` means the loop has been dealt with: its effects are in `ctx`, or it was judged to
/// be an infinite loop and skipped. `Ok(false)` means the caller must interpret it. Only fatal
/// errors are returned.
pub fn compile(loop_stmt: &Stmt, ctx: &mut Context) -> Result<bool, EmuError> {
    let name = header(loop_stmt);
    if dynamic_code().is_match(&loop_stmt.to_string()) {
        log::info!("not compiling loop with dynamic code execution: {name}");
        return Ok(false);
    }

    let scratch = ctx.snapshot();
    let lowered = match codegen::lower(loop_stmt, &scratch) {
        Ok(lowered) => lowered,
        Err(reason) => {
            log::info!("interpreting loop ({reason}): {name}");
            return Ok(false);
        }
    };
    drop(scratch);

    let key = lowered.program.to_string();
    let caches = ctx.caches().clone();
    match caches.compiled_loop(&key) {
        Some(CachedLoop::Done(delta)) => {
            log::debug!("reusing compiled loop result: {name}");
            merge(ctx, &delta, &lowered.certain);
            return Ok(true);
        }
        Some(CachedLoop::Error) => {
            log::debug!("compiled loop failed before, interpreting: {name}");
            return Ok(false);
        }
        None => {}
    }

    log::trace!("compiled loop program:\n{key}");
    let machine = Machine::new(&lowered.program, ctx.policy(), ctx.limiter().clone());
    match machine.run() {
        Ok(outcome) => {
            if outcome.faulted {
                log::debug!("compiled loop cut nested loops short after faults: {name}");
            }
            log::debug!(
                "compiled loop finished after {} iteration(s), merging {} variable(s): {name}",
                outcome.iterations,
                outcome.delta.updates.len()
            );
            let delta = Rc::new(outcome.delta);
            merge(ctx, &delta, &lowered.certain);
            caches.store_loop(key, CachedLoop::Done(delta));
            Ok(true)
        }
        Err(Halt::Fatal(err)) => Err(err),
        Err(Halt::Runaway(reason)) => {
            log::info!("skipping apparent infinite loop ({reason}): {name}");
            caches.store_loop(key, CachedLoop::Error);
            Ok(true)
        }
        Err(Halt::Failed(err)) => {
            log::info!("compiled loop failed ({err}), interpreting: {name}");
            caches.store_loop(key, CachedLoop::Error);
            Ok(false)
        }
    }
}

/// Write a finished run back into `ctx`. Arrays and dictionaries are updated in place so every
/// alias of them observes the result.
fn merge(ctx: &mut Context, delta: &LoopDelta, certain: &[(String, VbaType)]) {
    for (name, value) in &delta.updates {
        let value = value.deep_clone();
        match (ctx.get(name), value) {
            (Ok(VbaValue::List(existing)), VbaValue::List(updated)) => {
                let items = updated.borrow().clone();
                *existing.borrow_mut() = items;
            }
            (Ok(VbaValue::Map(existing)), VbaValue::Map(updated)) => {
                let entries = updated.borrow().clone();
                *existing.borrow_mut() = entries;
            }
            (_, value) => ctx.set(name, value),
        }
    }
    ctx.merge_shellcode(&delta.shellcode);
    for (name, ty) in certain {
        if ctx.get_type(name).is_none() {
            ctx.set_type(name, *ty);
        }
    }
}
