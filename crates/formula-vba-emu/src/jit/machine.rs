//! Isolated execution of a lowered [`HostProgram`].
//!
//! The machine owns private copies of the program variables and a private memory buffer, so a
//! run that is abandoned leaves the caller untouched.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::ast::{BinOp, LoopConditionKind, VbaType};
use crate::builtins::moved_bytes;
use crate::cache::LoopDelta;
use crate::context::coerce_to_type;
use crate::error::EmuError;
use crate::interp::{default_for, index_value, new_array, overwrite_mid};
use crate::limits::{ensure_sufficient_stack, ResourceLimiter, MAX_ALLOC_LEN};
use crate::ops::{compare, eval_binop, eval_unop};
use crate::policy::EmulationPolicy;
use crate::value::VbaValue;

use super::codegen::{HExpr, HFunction, HStmt, HostProgram, LoopKind};

/// Why a run ended without producing a result.
#[derive(Debug)]
pub(crate) enum Halt {
    /// The iteration budget or the fault ceiling was exceeded.
    Runaway(String),
    /// An error outside any guarded statement, such as a bad loop bound.
    Failed(EmuError),
    /// Recursion or deadline exhaustion; aborts the whole emulation.
    Fatal(EmuError),
}

enum Fault {
    Error(EmuError),
    Halt(Halt),
}

impl From<EmuError> for Fault {
    fn from(err: EmuError) -> Self {
        if err.is_fatal() {
            Fault::Halt(Halt::Fatal(err))
        } else {
            Fault::Error(err)
        }
    }
}

impl From<Halt> for Fault {
    fn from(halt: Halt) -> Self {
        Fault::Halt(halt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break(LoopKind),
    Return,
    /// A nested loop body faulted; the loop stops.
    Faulted,
}

/// What a fault inside a block does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    /// Skip the statement and carry on.
    Skip,
    /// Stop the innermost loop.
    BreakLoop,
}

struct Frame {
    /// `None` for the loop itself, which works directly on program variables.
    locals: Option<HashMap<String, VbaValue>>,
    types: HashMap<String, VbaType>,
    loops: usize,
}

impl Frame {
    fn root() -> Self {
        Self {
            locals: None,
            types: HashMap::new(),
            loops: 0,
        }
    }

    fn function() -> Self {
        Self {
            locals: Some(HashMap::new()),
            types: HashMap::new(),
            loops: 0,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Outcome {
    pub delta: LoopDelta,
    /// Some nested loop was cut short by a fault.
    pub faulted: bool,
    pub iterations: u64,
}

pub(crate) struct Machine<'p> {
    program: &'p HostProgram,
    limiter: Rc<ResourceLimiter>,
    vars: HashMap<String, VbaValue>,
    types: HashMap<String, VbaType>,
    memory: BTreeMap<i64, u8>,
    iterations: u64,
    max_iterations: u64,
    faults: u64,
    max_faults: u64,
    faulted: bool,
}

impl<'p> Machine<'p> {
    pub(crate) fn new(
        program: &'p HostProgram,
        policy: &EmulationPolicy,
        limiter: Rc<ResourceLimiter>,
    ) -> Self {
        Self {
            program,
            limiter,
            vars: program
                .prologue
                .iter()
                .map(|(k, v)| (k.clone(), v.deep_clone()))
                .collect(),
            types: program.types.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            memory: BTreeMap::new(),
            iterations: 0,
            max_iterations: policy.jit_max_iterations,
            faults: 0,
            max_faults: policy.max_loop_errors,
            faulted: false,
        }
    }

    pub(crate) fn run(mut self) -> Result<Outcome, Halt> {
        let program = self.program;
        let mut root = Frame::root();
        match self.exec_stmt(&program.body, &mut root, Guard::Skip) {
            Ok(_) => {}
            Err(Fault::Halt(halt)) => return Err(halt),
            Err(Fault::Error(err)) => return Err(Halt::Failed(err)),
        }
        let updates = program
            .captures
            .iter()
            .filter_map(|name| self.vars.remove(name).map(|v| (name.clone(), v)))
            .collect();
        Ok(Outcome {
            delta: LoopDelta {
                updates,
                shellcode: self.memory,
            },
            faulted: self.faulted,
            iterations: self.iterations,
        })
    }

    fn record_fault(&mut self, err: &EmuError) -> Result<(), Halt> {
        self.faults += 1;
        log::trace!("compiled loop fault: {err}");
        if self.faults > self.max_faults {
            return Err(Halt::Runaway(format!("more than {} faults", self.max_faults)));
        }
        Ok(())
    }

    fn count_iteration(&mut self) -> Result<(), Fault> {
        self.iterations += 1;
        if self.iterations > self.max_iterations {
            return Err(Halt::Runaway(format!(
                "more than {} iterations",
                self.max_iterations
            ))
            .into());
        }
        self.limiter.tick()?;
        Ok(())
    }

    // ---- variables -----------------------------------------------------------------------

    fn visible_global(&self, name: &str, frame: &Frame) -> bool {
        frame.locals.is_none() || self.program.shared.contains(name)
    }

    fn load(&self, frame: &Frame, name: &str) -> VbaValue {
        if let Some(v) = frame.locals.as_ref().and_then(|l| l.get(name)) {
            return v.clone();
        }
        if self.visible_global(name, frame) {
            if let Some(v) = self.vars.get(name) {
                return v.clone();
            }
        }
        VbaValue::Null
    }

    fn store(&mut self, frame: &mut Frame, name: &str, value: VbaValue) {
        let global = match &frame.locals {
            None => true,
            Some(locals) => {
                !locals.contains_key(name)
                    && self.visible_global(name, frame)
                    && self.vars.contains_key(name)
            }
        };
        if global {
            let value = match self.types.get(name) {
                Some(ty) => coerce_to_type(value, *ty),
                None => value,
            };
            self.vars.insert(name.to_string(), value);
        } else {
            let value = match frame.types.get(name) {
                Some(ty) => coerce_to_type(value, *ty),
                None => value,
            };
            if let Some(locals) = frame.locals.as_mut() {
                locals.insert(name.to_string(), value);
            }
        }
    }

    /// Bind `name` in the frame itself, shadowing any global.
    fn bind(&mut self, frame: &mut Frame, name: &str, value: VbaValue, ty: Option<VbaType>) {
        match frame.locals.as_mut() {
            Some(locals) => {
                if let Some(ty) = ty {
                    frame.types.insert(name.to_string(), ty);
                }
                locals.insert(name.to_string(), value);
            }
            None => {
                if let Some(ty) = ty {
                    self.types.insert(name.to_string(), ty);
                }
                self.vars.insert(name.to_string(), value);
            }
        }
    }

    fn is_bound(&self, frame: &Frame, name: &str) -> bool {
        match &frame.locals {
            Some(locals) => locals.contains_key(name),
            None => self.vars.contains_key(name),
        }
    }

    // ---- statements ----------------------------------------------------------------------

    fn exec_block(
        &mut self,
        body: &'p [HStmt],
        frame: &mut Frame,
        guard: Guard,
    ) -> Result<Flow, Halt> {
        for stmt in body {
            match self.exec_stmt(stmt, frame, guard) {
                Ok(Flow::Normal) => {}
                Ok(flow) => return Ok(flow),
                Err(Fault::Halt(halt)) => return Err(halt),
                Err(Fault::Error(err)) => {
                    self.record_fault(&err)?;
                    if guard == Guard::BreakLoop {
                        self.faulted = true;
                        return Ok(Flow::Faulted);
                    }
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &'p HStmt, frame: &mut Frame, guard: Guard) -> Result<Flow, Fault> {
        self.limiter.tick()?;
        match stmt {
            HStmt::Dim(decls) => {
                for decl in decls {
                    if self.is_bound(frame, &decl.name) {
                        continue;
                    }
                    let value = if decl.bounds.is_empty() {
                        default_for(decl.ty)
                    } else {
                        let mut dims = Vec::with_capacity(decl.bounds.len());
                        for bound in &decl.bounds {
                            dims.push(self.eval(bound, frame)?.to_int().max(-1) + 1);
                        }
                        new_array(&dims, decl.ty)?
                    };
                    self.bind(frame, &decl.name, value, decl.ty);
                }
            }
            HStmt::Assign(name, expr) => {
                let value = self.eval(expr, frame)?;
                self.store(frame, name, value);
            }
            HStmt::AssignIndex(name, indices, expr) => {
                let value = self.eval(expr, frame)?;
                let indices = self.eval_all(indices, frame)?;
                let target = self.load(frame, name);
                update_array(&target, &indices, value)?;
            }
            HStmt::AssignMid {
                name,
                start,
                length,
                value,
            } => {
                let value = self.eval(value, frame)?.to_string_lossy();
                let start = self.eval(start, frame)?.to_int();
                let length = match length {
                    Some(len) => Some(self.eval(len, frame)?.to_int()),
                    None => None,
                };
                let current = self.load(frame, name).to_string_lossy();
                let updated = overwrite_mid(&current, start, length, &value)?;
                self.store(frame, name, VbaValue::String(updated));
            }
            HStmt::Eval(expr) => {
                self.eval(expr, frame)?;
            }
            HStmt::If { arms, else_body } => {
                for (cond, body) in arms {
                    if self.eval(cond, frame)?.is_truthy() {
                        return Ok(self.exec_block(body, frame, guard)?);
                    }
                }
                return Ok(self.exec_block(else_body, frame, guard)?);
            }
            HStmt::For { .. } | HStmt::ForEach { .. } | HStmt::Loop { .. } => {
                // Only the compiled loop's own body skips faulting statements.
                let body_guard = if frame.locals.is_none() && frame.loops == 0 {
                    Guard::Skip
                } else {
                    Guard::BreakLoop
                };
                frame.loops += 1;
                let flow = self.exec_loop(stmt, frame, body_guard);
                frame.loops -= 1;
                return flow;
            }
            HStmt::Break(kind) => return Ok(Flow::Break(*kind)),
            HStmt::Return => return Ok(Flow::Return),
        }
        Ok(Flow::Normal)
    }

    fn loop_condition(
        &mut self,
        cond: &'p Option<(LoopConditionKind, HExpr)>,
        frame: &mut Frame,
    ) -> Result<bool, Fault> {
        Ok(match cond {
            None => true,
            Some((LoopConditionKind::While, c)) => self.eval(c, frame)?.is_truthy(),
            Some((LoopConditionKind::Until, c)) => !self.eval(c, frame)?.is_truthy(),
        })
    }

    fn exec_loop(&mut self, stmt: &'p HStmt, frame: &mut Frame, guard: Guard) -> Result<Flow, Fault> {
        match stmt {
            HStmt::For {
                var,
                start,
                end,
                step,
                body,
            } => {
                let start = self.eval(start, frame)?.to_number();
                let end = self.eval(end, frame)?.to_number();
                let step = match step {
                    Some(step) => self.eval(step, frame)?.to_number(),
                    None => VbaValue::Integer(1),
                };
                let descending = step.to_f64() < 0.0;
                self.store(frame, var, start);
                loop {
                    let current = self.load(frame, var);
                    let past_end = match compare(&current, &end) {
                        Some(std::cmp::Ordering::Greater) => !descending,
                        Some(std::cmp::Ordering::Less) => descending,
                        _ => false,
                    };
                    if past_end {
                        break;
                    }
                    self.count_iteration()?;
                    match self.exec_block(body, frame, guard)? {
                        Flow::Normal => {}
                        Flow::Break(LoopKind::For) | Flow::Faulted => break,
                        flow => return Ok(flow),
                    }
                    let current = self.load(frame, var);
                    self.store(frame, var, eval_binop(BinOp::Add, current, step.clone())?);
                }
            }
            HStmt::ForEach {
                var,
                iterable,
                body,
            } => {
                let items: Vec<VbaValue> = match self.eval(iterable, frame)? {
                    VbaValue::List(items) => items.borrow().clone(),
                    VbaValue::Map(map) => {
                        map.borrow().keys().cloned().map(VbaValue::String).collect()
                    }
                    VbaValue::Null | VbaValue::Unresolved => Vec::new(),
                    other => {
                        return Err(Fault::Error(EmuError::Runtime {
                            number: 451,
                            message: format!("cannot iterate over {}", other.type_name()),
                        }))
                    }
                };
                for item in items {
                    self.count_iteration()?;
                    self.store(frame, var, item);
                    match self.exec_block(body, frame, guard)? {
                        Flow::Normal => {}
                        Flow::Break(LoopKind::For) | Flow::Faulted => break,
                        flow => return Ok(flow),
                    }
                }
            }
            HStmt::Loop {
                cond,
                test_first,
                body,
            } => loop {
                if *test_first && !self.loop_condition(cond, frame)? {
                    break;
                }
                self.count_iteration()?;
                match self.exec_block(body, frame, guard)? {
                    Flow::Normal => {}
                    Flow::Break(LoopKind::Do) | Flow::Faulted => break,
                    flow => return Ok(flow),
                }
                if !*test_first && !self.loop_condition(cond, frame)? {
                    break;
                }
            },
            _ => {}
        }
        Ok(Flow::Normal)
    }

    // ---- expressions ---------------------------------------------------------------------

    fn eval_all(&mut self, exprs: &'p [HExpr], frame: &mut Frame) -> Result<Vec<VbaValue>, Fault> {
        exprs.iter().map(|e| self.eval(e, frame)).collect()
    }

    fn eval(&mut self, expr: &'p HExpr, frame: &mut Frame) -> Result<VbaValue, Fault> {
        Ok(match expr {
            HExpr::Const(v) => v.deep_clone(),
            HExpr::Var(name) => self.load(frame, name),
            HExpr::Unary(op, e) => {
                let v = self.eval(e, frame)?;
                eval_unop(*op, v)?
            }
            HExpr::Binary(op, l, r) => {
                let l = self.eval(l, frame)?;
                let r = self.eval(r, frame)?;
                eval_binop(*op, l, r)?
            }
            HExpr::Index(name, indices) => {
                let indices = self.eval_all(indices, frame)?;
                let target = self.load(frame, name);
                index_value(&target, &indices)?
            }
            HExpr::Builtin { f, args, .. } => {
                let args = self.eval_all(args, frame)?;
                f(&args)?
            }
            HExpr::Local(name, args) => {
                let args = self.eval_all(args, frame)?;
                self.call_local(name, args)?
            }
            HExpr::WriteMemory(args) => {
                let args = self.eval_all(args, frame)?;
                self.memory.extend(moved_bytes(&args));
                VbaValue::Integer(0)
            }
        })
    }

    fn call_local(&mut self, name: &str, args: Vec<VbaValue>) -> Result<VbaValue, Fault> {
        let program = self.program;
        let Some(function) = program.functions.get(name) else {
            return Err(EmuError::runtime(format!("procedure {name} is not available")).into());
        };
        let _depth = self.limiter.enter()?;
        ensure_sufficient_stack(|| self.run_function(function, args))
    }

    fn run_function(&mut self, function: &'p HFunction, args: Vec<VbaValue>) -> Result<VbaValue, Fault> {
        let mut frame = Frame::function();
        if function.returns_value {
            let value = default_for(function.return_type);
            self.bind(&mut frame, &function.name, value, function.return_type);
        }
        let mut args = args.into_iter();
        for (param, ty) in &function.params {
            let value = args.next().unwrap_or_default();
            let value = match ty {
                Some(ty) => coerce_to_type(value, *ty),
                None => value,
            };
            self.bind(&mut frame, param, value, *ty);
        }
        self.exec_block(&function.body, &mut frame, Guard::Skip)?;
        Ok(if function.returns_value {
            frame
                .locals
                .and_then(|mut l| l.remove(&function.name))
                .unwrap_or_default()
        } else {
            VbaValue::Null
        })
    }
}

fn slot(index: &VbaValue) -> Result<usize, EmuError> {
    let i = index.to_int();
    usize::try_from(i)
        .ok()
        .filter(|i| *i < MAX_ALLOC_LEN)
        .ok_or_else(|| EmuError::subscript_out_of_range(format!("index {i} out of range")))
}

/// Indexed write that zero-extends the array first. Only 1-D and 2-D arrays are supported.
pub(crate) fn update_array(
    target: &VbaValue,
    indices: &[VbaValue],
    value: VbaValue,
) -> Result<(), EmuError> {
    match target {
        VbaValue::Map(map) => {
            let key = indices
                .first()
                .map(VbaValue::to_string_lossy)
                .unwrap_or_default();
            map.borrow_mut().insert(key, value);
            Ok(())
        }
        VbaValue::List(items) => match indices {
            [i] => {
                let i = slot(i)?;
                let mut items = items.borrow_mut();
                if items.len() <= i {
                    items.resize(i + 1, VbaValue::Integer(0));
                }
                items[i] = value;
                Ok(())
            }
            [i, j] => {
                let (i, j) = (slot(i)?, slot(j)?);
                let row = {
                    let mut items = items.borrow_mut();
                    if items.len() <= i {
                        items.resize_with(i + 1, || VbaValue::new_list(Vec::new()));
                    }
                    if !matches!(items[i], VbaValue::List(_)) {
                        items[i] = VbaValue::new_list(Vec::new());
                    }
                    items[i].clone()
                };
                update_array(&row, &[VbaValue::Integer(j as i64)], value)
            }
            _ => Err(EmuError::subscript_out_of_range(format!(
                "{}-D array writes are not supported",
                indices.len()
            ))),
        },
        other => Err(EmuError::type_mismatch(format!(
            "{} is not an array",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::UnOp;
    use crate::jit::codegen::HDecl;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn program(prologue: &[(&str, VbaValue)], body: HStmt, captures: &[&str]) -> HostProgram {
        HostProgram {
            prologue: prologue
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            types: BTreeMap::new(),
            shared: BTreeSet::new(),
            functions: BTreeMap::new(),
            body,
            captures: captures.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn run(program: &HostProgram, policy: &EmulationPolicy) -> Result<Outcome, Halt> {
        let limiter = Rc::new(ResourceLimiter::new(50, Duration::from_secs(30)));
        Machine::new(program, policy, limiter).run()
    }

    fn var(name: &str) -> HExpr {
        HExpr::Var(name.to_string())
    }

    fn int(v: i64) -> HExpr {
        HExpr::Const(VbaValue::Integer(v))
    }

    fn counting_loop(end: i64, body: Vec<HStmt>) -> HStmt {
        HStmt::For {
            var: "i".to_string(),
            start: int(1),
            end: int(end),
            step: None,
            body,
        }
    }

    #[test]
    fn for_index_ends_one_step_past_the_bound() {
        let body = HStmt::Assign(
            "acc".to_string(),
            HExpr::Binary(BinOp::Add, Box::new(var("acc")), Box::new(var("i"))),
        );
        let p = program(
            &[("acc", 0.into()), ("i", 0.into())],
            counting_loop(4, vec![body]),
            &["acc", "i"],
        );
        let out = run(&p, &EmulationPolicy::default()).unwrap();
        assert_eq!(out.delta.updates["acc"], VbaValue::Integer(10));
        assert_eq!(out.delta.updates["i"], VbaValue::Integer(5));
        assert_eq!(out.iterations, 4);
    }

    #[test]
    fn runaway_loops_halt() {
        let p = program(
            &[],
            HStmt::Loop {
                cond: None,
                test_first: true,
                body: vec![],
            },
            &[],
        );
        let policy = EmulationPolicy {
            jit_max_iterations: 100,
            ..Default::default()
        };
        assert!(matches!(run(&p, &policy), Err(Halt::Runaway(_))));
    }

    #[test]
    fn top_level_faults_skip_the_statement() {
        let failing = HStmt::Assign(
            "x".to_string(),
            HExpr::Binary(BinOp::Div, Box::new(int(1)), Box::new(int(0))),
        );
        let counting = HStmt::Assign(
            "n".to_string(),
            HExpr::Binary(BinOp::Add, Box::new(var("n")), Box::new(int(1))),
        );
        let p = program(
            &[("n", 0.into()), ("x", 0.into())],
            counting_loop(3, vec![failing, counting]),
            &["n", "x"],
        );
        let out = run(&p, &EmulationPolicy::default()).unwrap();
        assert_eq!(out.delta.updates["n"], VbaValue::Integer(3));
        assert_eq!(out.delta.updates["x"], VbaValue::Integer(0));
        assert!(!out.faulted);

        let policy = EmulationPolicy {
            max_loop_errors: 2,
            ..Default::default()
        };
        assert!(matches!(run(&p, &policy), Err(Halt::Runaway(_))));
    }

    #[test]
    fn nested_faults_break_the_inner_loop() {
        let inner = HStmt::Loop {
            cond: None,
            test_first: true,
            body: vec![
                HStmt::Assign(
                    "n".to_string(),
                    HExpr::Binary(BinOp::Add, Box::new(var("n")), Box::new(int(1))),
                ),
                HStmt::Eval(HExpr::Unary(
                    UnOp::Neg,
                    Box::new(HExpr::Binary(
                        BinOp::Mod,
                        Box::new(int(1)),
                        Box::new(int(0)),
                    )),
                )),
            ],
        };
        let p = program(&[("n", 0.into())], counting_loop(2, vec![inner]), &["n"]);
        let out = run(&p, &EmulationPolicy::default()).unwrap();
        assert_eq!(out.delta.updates["n"], VbaValue::Integer(2));
        assert!(out.faulted);
    }

    #[test]
    fn oversized_dim_is_a_recoverable_fault() {
        let dim = HStmt::Dim(vec![HDecl {
            name: "buf".to_string(),
            ty: None,
            bounds: vec![int(1_000_000_000_000)],
        }]);
        let counting = HStmt::Assign(
            "n".to_string(),
            HExpr::Binary(BinOp::Add, Box::new(var("n")), Box::new(int(1))),
        );
        let p = program(
            &[("n", 0.into())],
            counting_loop(3, vec![dim, counting]),
            &["n"],
        );
        let out = run(&p, &EmulationPolicy::default()).unwrap();
        assert_eq!(out.delta.updates["n"], VbaValue::Integer(3));
    }

    #[test]
    fn array_writes_zero_extend() {
        let list = VbaValue::new_list(vec![]);
        update_array(&list, &[2.into()], "x".into()).unwrap();
        assert_eq!(
            list,
            VbaValue::new_list(vec![0.into(), 0.into(), "x".into()])
        );

        let grid = VbaValue::new_list(vec![]);
        update_array(&grid, &[1.into(), 1.into()], 7.into()).unwrap();
        assert_eq!(
            index_value(&grid, &[1.into(), 1.into()]).unwrap(),
            VbaValue::Integer(7)
        );
        assert!(update_array(&grid, &[0.into(), 0.into(), 0.into()], 1.into()).is_err());
        assert!(update_array(&VbaValue::Integer(1), &[0.into()], 1.into()).is_err());
    }

    #[test]
    fn memory_writes_stay_private_until_returned() {
        let write = HStmt::Eval(HExpr::WriteMemory(vec![
            HExpr::Binary(BinOp::Add, Box::new(int(100)), Box::new(var("i"))),
            HExpr::Binary(BinOp::Add, Box::new(int(0x40)), Box::new(var("i"))),
            int(1),
        ]));
        let p = program(&[("i", 0.into())], counting_loop(2, vec![write]), &[]);
        let out = run(&p, &EmulationPolicy::default()).unwrap();
        assert_eq!(
            out.delta.shellcode.into_iter().collect::<Vec<_>>(),
            vec![(101, 0x41), (102, 0x42)]
        );
        assert!(out.delta.updates.is_empty());
    }

    #[test]
    fn local_functions_get_their_own_frame() {
        let double = HFunction {
            name: "double".to_string(),
            params: vec![("i".to_string(), None)],
            returns_value: true,
            return_type: None,
            body: vec![
                HStmt::Dim(vec![HDecl {
                    name: "tmp".to_string(),
                    ty: Some(VbaType::Integer),
                    bounds: vec![],
                }]),
                HStmt::Assign(
                    "tmp".to_string(),
                    HExpr::Binary(BinOp::Mul, Box::new(var("i")), Box::new(int(2))),
                ),
                HStmt::Assign("double".to_string(), var("tmp")),
            ],
        };
        let body = HStmt::Assign(
            "acc".to_string(),
            HExpr::Binary(
                BinOp::Add,
                Box::new(var("acc")),
                Box::new(HExpr::Local("double".to_string(), vec![var("i")])),
            ),
        );
        let mut p = program(
            &[("acc", 0.into()), ("i", 0.into())],
            counting_loop(3, vec![body]),
            &["acc", "i"],
        );
        p.functions.insert("double".to_string(), double);
        let out = run(&p, &EmulationPolicy::default()).unwrap();
        assert_eq!(out.delta.updates["acc"], VbaValue::Integer(12));
        assert_eq!(out.delta.updates["i"], VbaValue::Integer(4));
        assert!(!out.delta.updates.contains_key("tmp"));
    }
}
