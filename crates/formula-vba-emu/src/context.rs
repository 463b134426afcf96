//! The emulation environment.
//!
//! A [`Context`] is one frame of a run. Globals, the action log, open files, the shellcode store
//! and the recursion/deadline budget live in run-wide state shared by reference with every child
//! Context; locals, type hints, the with-prefix stack and the error state belong to the frame.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::ast::{Expr, ExternalFunction, Procedure, Stmt, VbaType};
use crate::cache::EvalCaches;
use crate::document::{DocumentModel, DocumentText};
use crate::error::EmuError;
use crate::files::FileTable;
use crate::iocs::IocTracker;
use crate::library::{Constants, Library};
use crate::limits::{ResourceLimiter, MAX_ALLOC_LEN};
use crate::names::{Binding, NameMap};
use crate::policy::EmulationPolicy;
use crate::value::VbaValue;

/// Something the emulated macro did that an analyst cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    pub kind: String,
    pub value: String,
    pub description: String,
}

/// Receives every reported action as it happens.
pub trait ActionSink {
    fn report(&self, action: &Action);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorState {
    Clear,
    /// An error was raised and nobody handled it yet. Statement blocks stop executing.
    Pending,
    Handled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorMode {
    Default,
    ResumeNext,
    GotoLabel(String),
}

/// VBA's `Err` object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrInfo {
    pub number: i32,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Existing local, then existing global, then local inside a procedure or global at module
    /// level.
    Auto,
    Local,
    Global,
}

/// Collaborators and configuration fixed for the lifetime of a run.
pub struct Environment {
    pub policy: EmulationPolicy,
    pub library: Library,
    pub constants: Constants,
    pub document: Option<Rc<dyn DocumentModel>>,
    pub text: DocumentText,
    pub sink: Option<Rc<dyn ActionSink>>,
    pub caches: Rc<EvalCaches>,
    pub externals: NameMap<ExternalFunction>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(EmulationPolicy::default())
    }
}

impl Environment {
    pub fn new(policy: EmulationPolicy) -> Self {
        Self {
            policy,
            library: Library::with_defaults(),
            constants: Constants::with_defaults(),
            document: None,
            text: DocumentText::default(),
            sink: None,
            caches: Rc::new(EvalCaches::default()),
            externals: NameMap::new(),
        }
    }

    pub fn with_library(mut self, library: Library) -> Self {
        self.library = library;
        self
    }

    pub fn with_constants(mut self, constants: Constants) -> Self {
        self.constants = constants;
        self
    }

    pub fn with_document(mut self, document: Rc<dyn DocumentModel>) -> Self {
        self.document = Some(document);
        self
    }

    pub fn with_text(mut self, text: DocumentText) -> Self {
        self.text = text;
        self
    }

    pub fn with_sink(mut self, sink: Rc<dyn ActionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_caches(mut self, caches: Rc<EvalCaches>) -> Self {
        self.caches = caches;
        self
    }
}

struct Shared {
    globals: RefCell<NameMap<Binding>>,
    actions: RefCell<Vec<Action>>,
    files: RefCell<FileTable>,
    shellcode: RefCell<BTreeMap<i64, u8>>,
    iocs: RefCell<IocTracker>,
    err: RefCell<ErrInfo>,
    error_count: Cell<u64>,
    limiter: Rc<ResourceLimiter>,
}

impl Shared {
    fn new(limiter: Rc<ResourceLimiter>) -> Self {
        Self {
            globals: RefCell::new(NameMap::new()),
            actions: RefCell::new(Vec::new()),
            files: RefCell::new(FileTable::default()),
            shellcode: RefCell::new(BTreeMap::new()),
            iocs: RefCell::new(IocTracker::default()),
            err: RefCell::new(ErrInfo::default()),
            error_count: Cell::new(0),
            limiter,
        }
    }
}

#[derive(Debug, Clone)]
struct WithPrefix {
    raw: Expr,
    /// `raw` rendered and qualified by any enclosing prefix.
    name: String,
    cached: Option<VbaValue>,
}

pub struct Context {
    env: Rc<Environment>,
    shared: Rc<Shared>,
    locals: NameMap<Binding>,
    types: NameMap<VbaType>,
    with_stack: Vec<WithPrefix>,
    in_procedure: bool,
    error_state: ErrorState,
    error_mode: ErrorMode,
    error_handler: Option<Rc<[Stmt]>>,
    tagged_blocks: Rc<NameMap<Rc<[Stmt]>>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Environment::default())
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|b| *b as char).collect()
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    let text: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if text.len() % 2 != 0 || !text.is_ascii() {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}

pub(crate) fn coerce_to_type(value: VbaValue, ty: VbaType) -> VbaValue {
    if matches!(
        value,
        VbaValue::List(_) | VbaValue::Map(_) | VbaValue::Object(_)
    ) {
        return value;
    }
    match ty {
        VbaType::String => VbaValue::String(value.to_string_lossy()),
        VbaType::Integer | VbaType::Long | VbaType::Byte => match value {
            VbaValue::Float(f) => VbaValue::Integer(f.round_ties_even() as i64),
            other => VbaValue::Integer(other.to_int()),
        },
        VbaType::Double => VbaValue::Float(value.to_f64()),
        VbaType::Boolean => VbaValue::Boolean(value.is_truthy()),
        VbaType::Variant | VbaType::Object => value,
    }
}

impl Context {
    pub fn new(env: Environment) -> Self {
        let limiter = Rc::new(ResourceLimiter::from_policy(&env.policy));
        Self {
            env: Rc::new(env),
            shared: Rc::new(Shared::new(limiter)),
            locals: NameMap::new(),
            types: NameMap::new(),
            with_stack: Vec::new(),
            in_procedure: false,
            error_state: ErrorState::Clear,
            error_mode: ErrorMode::Default,
            error_handler: None,
            tagged_blocks: Rc::new(NameMap::new()),
        }
    }

    /// A frame for a procedure call: shares run-wide state, starts with empty locals and a copy
    /// of the caller's type hints.
    pub fn child(&self) -> Context {
        Context {
            env: self.env.clone(),
            shared: self.shared.clone(),
            locals: NameMap::new(),
            types: self.types.clone(),
            with_stack: Vec::new(),
            in_procedure: true,
            error_state: ErrorState::Clear,
            error_mode: ErrorMode::Default,
            error_handler: None,
            tagged_blocks: Rc::new(NameMap::new()),
        }
    }

    /// A private copy of this frame whose mutations never reach the original. Only the
    /// recursion/deadline budget stays shared.
    pub(crate) fn snapshot(&self) -> Context {
        let deep = |map: &NameMap<Binding>| -> NameMap<Binding> {
            map.iter()
                .map(|(k, v)| {
                    let v = match v {
                        Binding::Value(v) => Binding::Value(v.deep_clone()),
                        other => other.clone(),
                    };
                    (k.clone(), v)
                })
                .collect()
        };
        let shared = Shared::new(self.shared.limiter.clone());
        *shared.globals.borrow_mut() = deep(&self.shared.globals.borrow());
        *shared.err.borrow_mut() = self.shared.err.borrow().clone();
        Context {
            env: self.env.clone(),
            shared: Rc::new(shared),
            locals: deep(&self.locals),
            types: self.types.clone(),
            with_stack: self.with_stack.clone(),
            in_procedure: self.in_procedure,
            error_state: ErrorState::Clear,
            error_mode: self.error_mode.clone(),
            error_handler: None,
            tagged_blocks: self.tagged_blocks.clone(),
        }
    }

    pub fn env(&self) -> &Rc<Environment> {
        &self.env
    }

    pub fn policy(&self) -> &EmulationPolicy {
        &self.env.policy
    }

    pub fn library(&self) -> &Library {
        &self.env.library
    }

    pub fn constants(&self) -> &Constants {
        &self.env.constants
    }

    pub fn document(&self) -> Option<&Rc<dyn DocumentModel>> {
        self.env.document.as_ref()
    }

    pub fn caches(&self) -> &Rc<EvalCaches> {
        &self.env.caches
    }

    pub fn limiter(&self) -> &Rc<ResourceLimiter> {
        &self.shared.limiter
    }

    pub fn in_procedure(&self) -> bool {
        self.in_procedure
    }

    // ---- variables -------------------------------------------------------------------------

    /// Case-insensitive lookup in locals, then globals, then the constant registry.
    pub fn get(&self, name: &str) -> Result<VbaValue, EmuError> {
        self.lookup_value(name.trim(), false)
    }

    /// Like [`Context::get`] but skips the current frame's locals.
    pub fn get_global(&self, name: &str) -> Result<VbaValue, EmuError> {
        self.lookup_value(name.trim(), true)
    }

    fn lookup_value(&self, name: &str, global_only: bool) -> Result<VbaValue, EmuError> {
        if let Some(qualified) = self.with_qualified(name) {
            if let Ok(v) = self.lookup_value(&qualified, global_only) {
                return Ok(v);
            }
        }
        if !global_only {
            if let Some(Binding::Value(v)) = self.locals.get(name) {
                return Ok(v.clone());
            }
        }
        if let Some(Binding::Value(v)) = self.shared.globals.borrow().get(name) {
            return Ok(v.clone());
        }
        if let Some(v) = self.env.constants.get(name) {
            return Ok(v.clone());
        }
        if let Some(stripped) = name.strip_suffix('$') {
            return self.lookup_value(stripped, global_only);
        }
        Err(EmuError::UndefinedVariable(name.to_string()))
    }

    /// Any binding, including procedures.
    pub fn lookup(&self, name: &str) -> Option<Binding> {
        let name = name.trim();
        if let Some(b) = self.locals.get(name) {
            return Some(b.clone());
        }
        self.shared.globals.borrow().get(name).cloned()
    }

    /// Procedures are module-level only, so a Function's own return slot does not hide it.
    pub fn procedure(&self, name: &str) -> Option<Rc<Procedure>> {
        match self.shared.globals.borrow().get(name.trim())? {
            Binding::Procedure(p) => Some(p.clone()),
            Binding::Value(_) => None,
        }
    }

    pub fn set(&mut self, name: &str, value: VbaValue) {
        self.set_scoped(name, value, Scope::Auto, None);
    }

    /// Last write wins. Lists and maps are stored by reference, so every alias observes later
    /// element writes.
    pub fn set_scoped(
        &mut self,
        name: &str,
        value: VbaValue,
        scope: Scope,
        var_type: Option<VbaType>,
    ) {
        let name = match self.with_qualified(name.trim()) {
            Some(q) => q,
            None => name.trim().to_string(),
        };
        if let Some(ty) = var_type {
            self.types.insert(&name, ty);
        }
        let value = match self.types.get(&name) {
            Some(ty) => coerce_to_type(value, *ty),
            None => value,
        };
        if let VbaValue::String(s) = &value {
            self.shared.iocs.borrow_mut().scan(s);
        }
        self.apply_dom_conversions(&name, &value, scope);
        self.store(&name, Binding::Value(value), scope);
    }

    fn store(&mut self, name: &str, binding: Binding, scope: Scope) {
        let global = match scope {
            Scope::Global => true,
            Scope::Local => false,
            Scope::Auto => {
                if self.locals.contains_key(name) {
                    false
                } else if self.shared.globals.borrow().contains_key(name) {
                    true
                } else {
                    !self.in_procedure
                }
            }
        };
        if global {
            self.shared.globals.borrow_mut().insert(name, binding);
        } else {
            self.locals.insert(name, binding);
        }
    }

    /// XML DOM nodes (`Microsoft.XMLDOM`) convert between `.text` and `.nodeTypedValue`
    /// according to `.dataType`.
    fn apply_dom_conversions(&mut self, name: &str, value: &VbaValue, scope: Scope) {
        let lower = name.to_ascii_lowercase();
        if let Some(prefix) = lower.strip_suffix(".text") {
            let Ok(data_type) = self.get(&format!("{prefix}.datatype")) else {
                return;
            };
            let text = value.to_string_lossy();
            let decoded = match data_type.to_string_lossy().to_ascii_lowercase().as_str() {
                "bin.base64" => BASE64.decode(text.trim()).ok(),
                "bin.hex" => decode_hex(&text),
                _ => None,
            };
            if let Some(bytes) = decoded {
                let target = format!("{prefix}.nodetypedvalue");
                self.store(&target, Binding::Value(VbaValue::String(latin1(&bytes))), scope);
            }
        } else if let Some(prefix) = lower.strip_suffix(".nodetypedvalue") {
            let encoded = BASE64.encode(value.to_bytes());
            self.store(
                &format!("{prefix}.text"),
                Binding::Value(VbaValue::String(encoded)),
                scope,
            );
        }
    }

    pub fn set_procedure(&mut self, procedure: Rc<Procedure>) {
        let name = procedure.name.clone();
        self.shared
            .globals
            .borrow_mut()
            .insert(&name, Binding::Procedure(procedure));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.locals.contains_key(name)
            || self.shared.globals.borrow().contains_key(name)
            || self.types.contains_key(name)
    }

    pub fn delete(&mut self, name: &str) {
        if self.locals.remove(name).is_none() {
            self.shared.globals.borrow_mut().remove(name);
        }
        self.types.remove(name);
    }

    pub fn set_type(&mut self, name: &str, ty: VbaType) {
        self.types.insert(name, ty);
    }

    pub fn get_type(&self, name: &str) -> Option<VbaType> {
        self.types.get(name).copied()
    }

    // ---- with-prefix -----------------------------------------------------------------------

    pub fn push_with(&mut self, raw: Expr) {
        let rendered = raw.to_string();
        let name = match (rendered.starts_with('.'), self.with_stack.last()) {
            (true, Some(outer)) => format!("{}{rendered}", outer.name),
            _ => rendered,
        };
        self.with_stack.push(WithPrefix {
            raw,
            name,
            cached: None,
        });
    }

    pub fn pop_with(&mut self) {
        self.with_stack.pop();
    }

    /// The qualified text of the innermost `With` receiver.
    pub fn with_prefix(&self) -> Option<&str> {
        self.with_stack.last().map(|w| w.name.as_str())
    }

    fn with_qualified(&self, name: &str) -> Option<String> {
        if !name.starts_with('.') {
            return None;
        }
        let prefix = self.with_prefix()?;
        Some(format!("{prefix}{name}"))
    }

    /// The value of the innermost `With` receiver, evaluated on first use.
    pub fn with_value(&mut self) -> Result<Option<VbaValue>, EmuError> {
        let Some(mut top) = self.with_stack.pop() else {
            return Ok(None);
        };
        if top.cached.is_none() {
            let value = match crate::interp::eval_expr(&top.raw, self) {
                Ok(v) => v,
                Err(e) if e.is_fatal() => {
                    self.with_stack.push(top);
                    return Err(e);
                }
                Err(e) => {
                    log::debug!("cannot evaluate With receiver {}: {e}", top.name);
                    VbaValue::Null
                }
            };
            top.cached = Some(value);
        }
        let value = top.cached.clone();
        self.with_stack.push(top);
        Ok(value)
    }

    // ---- actions ---------------------------------------------------------------------------

    pub fn report_action(&self, kind: &str, value: &str, description: &str) {
        let mut value = value.to_string();
        if self.env.policy.strip_null_bytes_in_actions {
            value.retain(|c| c != '\0');
        }
        log::info!("ACTION: {kind} - {value:?} - {description}");
        let action = Action {
            kind: kind.to_string(),
            value,
            description: description.to_string(),
        };
        if let Some(sink) = &self.env.sink {
            sink.report(&action);
        }
        self.shared.actions.borrow_mut().push(action);
    }

    pub fn actions(&self) -> Vec<Action> {
        self.shared.actions.borrow().clone()
    }

    pub fn iocs(&self) -> Vec<String> {
        self.shared.iocs.borrow().all()
    }

    // ---- errors ----------------------------------------------------------------------------

    pub fn error_state(&self) -> ErrorState {
        self.error_state
    }

    pub fn error_mode(&self) -> &ErrorMode {
        &self.error_mode
    }

    pub fn set_error_mode(&mut self, mode: ErrorMode) {
        if !matches!(mode, ErrorMode::GotoLabel(_)) {
            self.error_handler = None;
        }
        self.error_mode = mode;
    }

    /// `On Error GoTo label`: the statements following `label:` become the handler.
    pub fn on_error_goto(&mut self, label: &str) {
        self.error_handler = self.tagged_blocks.get(label).cloned();
        if self.error_handler.is_none() {
            log::warn!("On Error GoTo {label}: label not found");
        }
        self.error_mode = ErrorMode::GotoLabel(label.to_string());
    }

    pub fn register_error_handler(&mut self, handler: Rc<[Stmt]>) {
        self.error_handler = Some(handler);
    }

    pub(crate) fn set_tagged_blocks(&mut self, blocks: NameMap<Rc<[Stmt]>>) {
        self.tagged_blocks = Rc::new(blocks);
    }

    /// Record an emulated-language error. Unless `On Error Resume Next` is active, the frame
    /// enters [`ErrorState::Pending`].
    pub fn set_error(&mut self, err: &EmuError) {
        let count = self.shared.error_count.get() + 1;
        self.shared.error_count.set(count);
        *self.shared.err.borrow_mut() = ErrInfo {
            number: err.number(),
            description: err.to_string(),
        };
        log::warn!("emulation error #{count}: {err}");
        if self.error_mode != ErrorMode::ResumeNext {
            self.error_state = ErrorState::Pending;
        }
    }

    /// A callee returned with an unhandled error: the caller sees it without counting it again.
    pub(crate) fn raise_pending(&mut self) {
        if self.error_mode != ErrorMode::ResumeNext {
            self.error_state = ErrorState::Pending;
        }
    }

    pub fn must_handle_error(&self) -> bool {
        self.error_state == ErrorState::Pending
    }

    pub fn clear_error(&mut self) {
        self.error_state = ErrorState::Clear;
    }

    /// `Err.Clear`
    pub fn clear_err_object(&mut self) {
        *self.shared.err.borrow_mut() = ErrInfo::default();
    }

    /// Transfer a pending error to the registered handler. Without a handler the error stays
    /// pending so the caller sees it.
    pub fn handle_error(&mut self) -> Result<(), EmuError> {
        if self.error_state != ErrorState::Pending {
            return Ok(());
        }
        let Some(handler) = self.error_handler.take() else {
            return Ok(());
        };
        log::debug!("running error handler");
        self.error_state = ErrorState::Handled;
        self.error_mode = ErrorMode::Default;
        crate::interp::exec_block(&handler, self)?;
        Ok(())
    }

    pub fn last_error(&self) -> ErrInfo {
        self.shared.err.borrow().clone()
    }

    /// Errors raised so far in the whole run.
    pub fn error_count(&self) -> u64 {
        self.shared.error_count.get()
    }

    // ---- files -----------------------------------------------------------------------------

    pub fn open_file(&mut self, name: &str, id: Option<&str>) {
        let name = self.shared.files.borrow_mut().open(name, id);
        log::info!("opened file {name:?}");
    }

    pub fn file_is_open(&self, id: &str) -> bool {
        self.shared.files.borrow().is_open(id)
    }

    /// Never fails: unknown ids are opened on first write.
    pub fn write_file(&mut self, id: &str, data: &VbaValue) {
        self.shared.files.borrow_mut().write(id, data);
    }

    pub fn close_file(&mut self, id: &str) {
        let closed = self.shared.files.borrow_mut().close(id);
        match closed {
            Some((name, data)) => {
                let hash = format!("{:x}", Sha256::digest(&data));
                self.report_action(
                    "Dropped File Hash",
                    &hash,
                    &format!("File Name: {name}"),
                );
            }
            None => log::debug!("close of file {id:?} that is not open"),
        }
    }

    /// Close whatever is still open at the end of a run.
    pub fn dump_all_files(&mut self) {
        let names = self.shared.files.borrow().open_names();
        for name in names {
            self.close_file(&name);
        }
    }

    pub fn closed_files(&self) -> BTreeMap<String, Vec<u8>> {
        self.shared.files.borrow().closed().clone()
    }

    // ---- shellcode -------------------------------------------------------------------------

    pub fn set_shellcode_byte(&mut self, index: i64, value: i64) {
        self.shared
            .shellcode
            .borrow_mut()
            .insert(index, (value & 0xFF) as u8);
    }

    pub(crate) fn merge_shellcode(&mut self, bytes: &BTreeMap<i64, u8>) {
        self.shared
            .shellcode
            .borrow_mut()
            .extend(bytes.iter().map(|(k, v)| (*k, *v)));
    }

    /// Bytes ordered by address; unwritten addresses in between read as NOP (`0x90`).
    pub fn shellcode_data(&self) -> Vec<u8> {
        let code = self.shared.shellcode.borrow();
        let (Some(first), Some(last)) = (code.keys().next(), code.keys().next_back()) else {
            return Vec::new();
        };
        let span = i128::from(*last) - i128::from(*first);
        if span >= MAX_ALLOC_LEN as i128 {
            log::warn!("shellcode spans {span} bytes, gaps are left out");
            return code.values().copied().collect();
        }
        (*first..=*last)
            .map(|i| code.get(&i).copied().unwrap_or(0x90))
            .collect()
    }

    // ---- document --------------------------------------------------------------------------

    pub fn doc_var(&self, name: &str) -> Option<String> {
        self.env.text.var(name).map(str::to_string)
    }

    pub fn read_metadata(&self, field: &str) -> Option<String> {
        self.env.text.metadata(field)
    }

    pub fn external(&self, name: &str) -> Option<&ExternalFunction> {
        self.env.externals.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn set_then_get_ignores_case() {
        let mut ctx = Context::default();
        ctx.set("Foo", VbaValue::Integer(1));
        assert_eq!(ctx.get("fOO").unwrap(), VbaValue::Integer(1));
        assert!(matches!(
            ctx.get("bar"),
            Err(EmuError::UndefinedVariable(_))
        ));
    }

    #[test]
    fn procedure_frames_scope_locals() {
        let mut module = Context::default();
        module.set("g", VbaValue::Integer(1));
        let mut frame = module.child();
        frame.set("g", VbaValue::Integer(2));
        frame.set("tmp", VbaValue::Integer(3));
        assert_eq!(module.get("g").unwrap(), VbaValue::Integer(2));
        assert!(module.get("tmp").is_err());
        frame.set_scoped("forced", VbaValue::Integer(4), Scope::Global, None);
        assert_eq!(module.get("forced").unwrap(), VbaValue::Integer(4));
    }

    #[test]
    fn type_hints_coerce_assignments() {
        let mut ctx = Context::default();
        ctx.set_scoped("s", VbaValue::Integer(5), Scope::Auto, Some(VbaType::String));
        assert_eq!(ctx.get("s").unwrap(), VbaValue::from("5"));
        ctx.set_type("n", VbaType::Integer);
        ctx.set("n", VbaValue::from("&H10"));
        assert_eq!(ctx.get("n").unwrap(), VbaValue::Integer(16));
    }

    #[test]
    fn constants_and_dollar_suffix() {
        let mut ctx = Context::default();
        assert_eq!(ctx.get("vbTab").unwrap(), VbaValue::from("\t"));
        ctx.set("name", VbaValue::from("x"));
        assert_eq!(ctx.get("name$").unwrap(), VbaValue::from("x"));
    }

    #[test]
    fn contains_and_delete() {
        let mut ctx = Context::default();
        ctx.set_type("hinted", VbaType::String);
        assert!(ctx.contains("HINTED"));
        ctx.set("v", VbaValue::Integer(1));
        ctx.delete("V");
        assert!(!ctx.contains("v"));
    }

    #[test]
    fn dom_node_base64_round_trip() {
        let mut ctx = Context::default();
        ctx.set("node.dataType", VbaValue::from("bin.base64"));
        ctx.set("node.text", VbaValue::from("TVo="));
        assert_eq!(ctx.get("node.nodeTypedValue").unwrap(), VbaValue::from("MZ"));

        ctx.set("other.nodeTypedValue", VbaValue::from("MZ"));
        assert_eq!(ctx.get("other.text").unwrap(), VbaValue::from("TVo="));
    }

    #[test]
    fn shellcode_gaps_are_nops() {
        let mut ctx = Context::default();
        ctx.set_shellcode_byte(0, 0xfc);
        ctx.set_shellcode_byte(2, -24);
        assert_eq!(ctx.shellcode_data(), vec![0xfc, 0x90, 0xe8]);
    }

    #[test]
    fn distant_shellcode_writes_are_not_padded() {
        let mut ctx = Context::default();
        ctx.set_shellcode_byte(0, 0xfc);
        ctx.set_shellcode_byte(i64::MAX, 0xe8);
        assert_eq!(ctx.shellcode_data(), vec![0xfc, 0xe8]);
    }

    #[test]
    fn resume_next_keeps_state_clear() {
        let mut ctx = Context::default();
        ctx.set_error_mode(ErrorMode::ResumeNext);
        ctx.set_error(&EmuError::division_by_zero());
        assert!(!ctx.must_handle_error());
        assert_eq!(ctx.last_error().number, 11);
        assert_eq!(ctx.error_count(), 1);
    }

    mod coercion {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn integer_hints_round_trip_through_strings(v in any::<i32>()) {
                let text = coerce_to_type(VbaValue::Integer(i64::from(v)), VbaType::String);
                prop_assert_eq!(&text, &VbaValue::String(v.to_string()));
                prop_assert_eq!(coerce_to_type(text, VbaType::Integer), VbaValue::Integer(i64::from(v)));
            }

            #[test]
            fn containers_are_never_coerced(items in proptest::collection::vec(any::<i16>(), 0..8)) {
                let list = VbaValue::new_list(items.iter().map(|i| VbaValue::from(i32::from(*i))).collect());
                let coerced = coerce_to_type(list.clone(), VbaType::String);
                match (&list, &coerced) {
                    (VbaValue::List(a), VbaValue::List(b)) => prop_assert!(Rc::ptr_eq(a, b)),
                    _ => prop_assert!(false, "list was coerced"),
                }
            }
        }
    }
}
