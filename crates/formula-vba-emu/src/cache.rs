use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::value::VbaValue;

/// What a compiled loop did: the final value of every variable it may have written, plus the
/// bytes it wrote to emulated memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopDelta {
    pub updates: BTreeMap<String, VbaValue>,
    pub shellcode: BTreeMap<i64, u8>,
}

#[derive(Debug, Clone)]
pub(crate) enum CachedLoop {
    Done(Rc<LoopDelta>),
    /// Compiling or running this exact program failed before; do not try again.
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub constant_hits: u64,
    pub constant_misses: u64,
    pub loop_hits: u64,
    pub loop_misses: u64,
}

/// Memo tables shared by every Context an [`crate::Emulator`] creates.
///
/// Entries are never invalidated. Constant expressions are keyed by their source text and
/// compiled loops by their generated program text, which embeds every input value, so distinct
/// program states cannot share a key.
#[derive(Debug, Default)]
pub struct EvalCaches {
    constants: RefCell<HashMap<String, VbaValue>>,
    loops: RefCell<HashMap<String, CachedLoop>>,
    stats: Cell<CacheStats>,
}

impl EvalCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.get()
    }

    fn bump(&self, f: impl FnOnce(&mut CacheStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    pub(crate) fn constant(&self, source: &str) -> Option<VbaValue> {
        let hit = self.constants.borrow().get(source).cloned();
        match &hit {
            Some(_) => self.bump(|s| s.constant_hits += 1),
            None => self.bump(|s| s.constant_misses += 1),
        }
        hit
    }

    /// Only numeric results are kept.
    pub(crate) fn store_constant(&self, source: &str, value: &VbaValue) {
        if value.is_numeric() {
            self.constants
                .borrow_mut()
                .entry(source.to_string())
                .or_insert_with(|| value.clone());
        }
    }

    pub(crate) fn compiled_loop(&self, program: &str) -> Option<CachedLoop> {
        let hit = self.loops.borrow().get(program).cloned();
        match &hit {
            Some(_) => self.bump(|s| s.loop_hits += 1),
            None => self.bump(|s| s.loop_misses += 1),
        }
        hit
    }

    pub(crate) fn store_loop(&self, program: String, entry: CachedLoop) {
        self.loops.borrow_mut().insert(program, entry);
    }

    pub fn constant_entries(&self) -> usize {
        self.constants.borrow().len()
    }

    pub fn loop_entries(&self) -> usize {
        self.loops.borrow().len()
    }
}
