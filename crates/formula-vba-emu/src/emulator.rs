//! Run driver: seeds a [`Context`] from a parsed module and runs its entry points.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::ast::{Expr, Module, Procedure, ProcedureKind, Stmt};
use crate::cache::EvalCaches;
use crate::context::{Action, ActionSink, Context, Environment};
use crate::document::{DocumentModel, DocumentText};
use crate::error::EmuError;
use crate::interp::{call_procedure, eval_expr, exec_block};
use crate::library::{Constants, Library};
use crate::policy::EmulationPolicy;
use crate::value::VbaValue;

/// Procedures Office runs on its own when a document is opened or closed.
pub const ENTRY_POINTS: &[&str] = &[
    "AutoOpen",
    "Document_Open",
    "AutoClose",
    "Document_Close",
    "Auto_Open",
    "AutoExec",
    "AutoExit",
    "Document_BeforeClose",
    "Workbook_Open",
    "Workbook_Activate",
    "Auto_Close",
    "Workbook_Close",
    "Workbook_Deactivate",
    "DocumentOpen",
    "App_DocumentOpen",
    "Main",
];

/// Event handler suffixes of ActiveX controls and forms that fire without user interaction.
pub const CALLBACK_SUFFIXES: &[&str] = &[
    "_Activate",
    "_BeforeNavigate2",
    "_BeforeScriptExecute",
    "_Calculate",
    "_Change",
    "_DocumentComplete",
    "_DownloadBegin",
    "_DownloadComplete",
    "_FileDownload",
    "_GotFocus",
    "_Layout",
    "_LostFocus",
    "_MouseEnter",
    "_MouseHover",
    "_MouseLeave",
    "_MouseMove",
    "_NavigateComplete2",
    "_NavigateError",
    "_Painted",
    "_Painting",
    "_ProgressChange",
    "_PropertyChange",
    "_Resize",
    "_SetSecureLockIcon",
    "_StatusTextChange",
    "_TitleChange",
    "_Initialize",
    "_Click",
    "_OnConnecting",
    "_BeforeClose",
    "_OnDisconnected",
    "_OnEnterFullScreenMode",
    "_Zoom",
    "_Scroll",
    "_BeforeDropOrPaste",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmulationReport {
    /// Procedures that were run, in order.
    pub entry_points: Vec<String>,
    pub actions: Vec<Action>,
    pub iocs: Vec<String>,
    /// Emulated memory writes, ordered by address with gaps filled with NOPs.
    pub shellcode: Vec<u8>,
    /// SHA-256 of every file closed during the run, by file name.
    pub dropped_files: BTreeMap<String, String>,
    /// Emulated-language errors raised during the run.
    pub errors: u64,
}

impl EmulationReport {
    fn collect(ctx: &Context, entry_points: Vec<String>) -> Self {
        let dropped_files = ctx
            .closed_files()
            .into_iter()
            .map(|(name, data)| (name, format!("{:x}", Sha256::digest(&data))))
            .collect();
        Self {
            entry_points,
            actions: ctx.actions(),
            iocs: ctx.iocs(),
            shellcode: ctx.shellcode_data(),
            dropped_files,
            errors: ctx.error_count(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Emulates one module. An `Emulator` can be run repeatedly; runs share its evaluation caches
/// but nothing else.
pub struct Emulator {
    module: Module,
    policy: EmulationPolicy,
    library: Library,
    constants: Constants,
    document: Option<Rc<dyn DocumentModel>>,
    text: DocumentText,
    sink: Option<Rc<dyn ActionSink>>,
    caches: Rc<EvalCaches>,
}

impl Emulator {
    pub fn new(module: Module) -> Self {
        Self {
            module,
            policy: EmulationPolicy::default(),
            library: Library::with_defaults(),
            constants: Constants::with_defaults(),
            document: None,
            text: DocumentText::default(),
            sink: None,
            caches: Rc::new(EvalCaches::default()),
        }
    }

    pub fn with_policy(mut self, policy: EmulationPolicy) -> Self {
        self.policy = policy;
        self
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

    pub fn caches(&self) -> &Rc<EvalCaches> {
        &self.caches
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    fn environment(&self) -> Environment {
        let mut env = Environment::new(self.policy.clone())
            .with_library(self.library.clone())
            .with_constants(self.constants.clone())
            .with_text(self.text.clone())
            .with_caches(self.caches.clone());
        if let Some(document) = &self.document {
            env = env.with_document(document.clone());
        }
        if let Some(sink) = &self.sink {
            env = env.with_sink(sink.clone());
        }
        for external in &self.module.externals {
            env.externals.insert(&external.name, external.clone());
        }
        env
    }

    /// A fresh module-level Context with the module's declarations, constants and procedures in
    /// place.
    pub fn context(&self) -> Result<Context, EmuError> {
        let mut ctx = Context::new(self.environment());
        for proc in &self.module.procedures {
            ctx.set_procedure(Rc::new(proc.clone()));
        }
        if !self.module.declarations.is_empty() {
            exec_block(&[Stmt::Dim(self.module.declarations.clone())], &mut ctx)?;
        }
        for (name, expr) in &self.module.consts {
            match eval_expr(expr, &mut ctx) {
                Ok(value) => ctx.set(name, value),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => log::warn!("constant {name} could not be evaluated: {e}"),
            }
        }
        ctx.clear_error();
        Ok(ctx)
    }

    /// Run every auto-exec entry point and event callback the module defines. Without any, every
    /// parameterless `Sub` is tried instead.
    pub fn run(&self) -> Result<EmulationReport, EmuError> {
        let mut ctx = self.context()?;
        let mut ran = Vec::new();

        for entry in ENTRY_POINTS {
            if let Some(proc) = self.find(entry) {
                ctx.report_action("Found Entry Point", &proc.name, "");
                self.run_entry(&proc, Vec::new(), &mut ctx)?;
                ran.push(proc.name.clone());
            }
        }
        let mut callbacks: Vec<&Procedure> = self
            .module
            .procedures
            .iter()
            .filter(|p| {
                let lower = p.name.to_ascii_lowercase();
                !ran.iter().any(|r: &String| r.eq_ignore_ascii_case(&p.name))
                    && CALLBACK_SUFFIXES
                        .iter()
                        .any(|s| lower.ends_with(&s.to_ascii_lowercase()))
            })
            .collect();
        callbacks.sort_by_key(|p| p.name.to_ascii_lowercase());
        for proc in callbacks {
            ctx.report_action("Found Entry Point", &proc.name, "");
            self.run_entry(&Rc::new(proc.clone()), Vec::new(), &mut ctx)?;
            ran.push(proc.name.clone());
        }

        if ran.is_empty() {
            log::warn!("no entry points found, trying every parameterless Sub");
            let candidates: Vec<&Procedure> = self
                .module
                .procedures
                .iter()
                .filter(|p| p.kind == ProcedureKind::Sub && p.params.is_empty())
                .collect();
            for proc in candidates {
                ctx.report_action("Found Heuristic Entry Point", &proc.name, "");
                self.run_entry(&Rc::new(proc.clone()), Vec::new(), &mut ctx)?;
                ran.push(proc.name.clone());
            }
        }
        Ok(EmulationReport::collect(&ctx, ran))
    }

    /// Run one named procedure.
    pub fn run_procedure(
        &self,
        name: &str,
        args: Vec<VbaValue>,
    ) -> Result<EmulationReport, EmuError> {
        let proc = self
            .find(name)
            .ok_or_else(|| EmuError::runtime(format!("Unknown procedure `{name}`")))?;
        let mut ctx = self.context()?;
        self.run_entry(&proc, args, &mut ctx)?;
        Ok(EmulationReport::collect(&ctx, vec![proc.name.clone()]))
    }

    /// Evaluate one expression against a freshly seeded Context.
    pub fn evaluate(&self, expr: &Expr) -> Result<VbaValue, EmuError> {
        let mut ctx = self.context()?;
        eval_expr(expr, &mut ctx)
    }

    fn find(&self, name: &str) -> Option<Rc<Procedure>> {
        self.module
            .procedures
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| Rc::new(p.clone()))
    }

    fn run_entry(
        &self,
        proc: &Rc<Procedure>,
        args: Vec<VbaValue>,
        ctx: &mut Context,
    ) -> Result<(), EmuError> {
        log::info!("emulating {}", proc.name);
        match call_procedure(proc, args, ctx) {
            Ok(_) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => log::warn!("{} stopped: {e}", proc.name),
        }
        if ctx.must_handle_error() {
            log::warn!("{} ended with an unhandled error", proc.name);
            ctx.clear_error();
        }
        ctx.dump_all_files();
        Ok(())
    }
}
