//! Pluggable name → entry registries for emulated library functions and named constants.
//!
//! Both are built explicitly and handed to the [`crate::Environment`]; nothing is registered as a
//! side effect of loading a module.

use std::ops::RangeInclusive;
use std::rc::Rc;

use crate::ast::VbaType;
use crate::context::Context;
use crate::error::EmuError;
use crate::names::NameMap;
use crate::value::VbaValue;

/// A function that only looks at its arguments. Compiled loops may call these.
pub type PureFn = fn(&[VbaValue]) -> Result<VbaValue, EmuError>;
/// A function with access to the emulation state (reporting actions, files, memory).
pub type ContextFn = fn(&mut Context, &[VbaValue]) -> Result<VbaValue, EmuError>;

#[derive(Clone, Copy)]
pub enum Callable {
    Pure(PureFn),
    Contextual(ContextFn),
}

#[derive(Clone)]
pub struct LibraryFunction {
    pub name: String,
    pub arity: RangeInclusive<usize>,
    pub return_type: Option<VbaType>,
    pub callable: Callable,
}

impl std::fmt::Debug for LibraryFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("return_type", &self.return_type)
            .finish()
    }
}

impl LibraryFunction {
    pub fn pure(
        name: &str,
        arity: RangeInclusive<usize>,
        return_type: Option<VbaType>,
        f: PureFn,
    ) -> Self {
        Self {
            name: name.to_string(),
            arity,
            return_type,
            callable: Callable::Pure(f),
        }
    }

    pub fn contextual(
        name: &str,
        arity: RangeInclusive<usize>,
        return_type: Option<VbaType>,
        f: ContextFn,
    ) -> Self {
        Self {
            name: name.to_string(),
            arity,
            return_type,
            callable: Callable::Contextual(f),
        }
    }

    pub fn is_pure(&self) -> bool {
        matches!(self.callable, Callable::Pure(_))
    }

    pub fn check_arity(&self, got: usize) -> Result<(), EmuError> {
        if self.arity.contains(&got) {
            return Ok(());
        }
        Err(EmuError::Runtime {
            number: 450,
            message: format!(
                "Wrong number of arguments to {}: expected {:?}, got {got}",
                self.name, self.arity
            ),
        })
    }

    pub fn call(&self, ctx: &mut Context, args: &[VbaValue]) -> Result<VbaValue, EmuError> {
        self.check_arity(args.len())?;
        match self.callable {
            Callable::Pure(f) => f(args),
            Callable::Contextual(f) => f(ctx, args),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Library {
    functions: NameMap<Rc<LibraryFunction>>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog shipped with the crate, see [`crate::builtins`].
    pub fn with_defaults() -> Self {
        let mut lib = Self::new();
        crate::builtins::register_defaults(&mut lib);
        lib
    }

    pub fn register(&mut self, function: LibraryFunction) {
        let name = function.name.clone();
        self.functions.insert(&name, Rc::new(function));
    }

    /// Case-insensitive; a trailing `$` (`Chr$`) resolves to the plain entry.
    pub fn get(&self, name: &str) -> Option<Rc<LibraryFunction>> {
        self.functions
            .get(name)
            .or_else(|| self.functions.get(name.strip_suffix('$')?))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Constants {
    values: NameMap<VbaValue>,
}

impl Constants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut c = Self::new();
        let table: &[(&str, VbaValue)] = &[
            ("vbCrLf", "\r\n".into()),
            ("vbNewLine", "\r\n".into()),
            ("vbCr", "\r".into()),
            ("vbLf", "\n".into()),
            ("vbTab", "\t".into()),
            ("vbBack", "\u{8}".into()),
            ("vbNullString", "".into()),
            ("vbNullChar", "\0".into()),
            ("vbTrue", VbaValue::Integer(-1)),
            ("vbFalse", VbaValue::Integer(0)),
            ("vbHide", VbaValue::Integer(0)),
            ("vbNormalFocus", VbaValue::Integer(1)),
            ("vbMinimizedFocus", VbaValue::Integer(2)),
            ("vbMaximizedFocus", VbaValue::Integer(3)),
            ("vbNormalNoFocus", VbaValue::Integer(4)),
            ("vbBinaryCompare", VbaValue::Integer(0)),
            ("vbTextCompare", VbaValue::Integer(1)),
            ("vbObjectError", VbaValue::Integer(-2147221504)),
            ("vbInteger", VbaValue::Integer(2)),
            ("vbString", VbaValue::Integer(8)),
            ("vbOKOnly", VbaValue::Integer(0)),
            ("vbCritical", VbaValue::Integer(16)),
            ("vbInformation", VbaValue::Integer(64)),
        ];
        for (name, value) in table {
            c.insert(name, value.clone());
        }
        c
    }

    pub fn insert(&mut self, name: &str, value: VbaValue) {
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&VbaValue> {
        self.values.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lookups_are_case_insensitive_and_accept_dollar_suffix() {
        let lib = Library::with_defaults();
        assert!(lib.get("CHR").is_some());
        assert!(lib.get("chr$").is_some());
        assert!(lib.get("NoSuchFunction").is_none());

        let consts = Constants::with_defaults();
        assert_eq!(consts.get("VBCRLF"), Some(&VbaValue::from("\r\n")));
    }

    #[test]
    fn arity_is_enforced() {
        let lib = Library::with_defaults();
        let chr = lib.get("Chr").unwrap();
        assert!(chr.check_arity(1).is_ok());
        assert!(matches!(
            chr.check_arity(0),
            Err(EmuError::Runtime { number: 450, .. })
        ));
    }
}
