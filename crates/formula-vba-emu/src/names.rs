use std::collections::hash_map::{self, HashMap};
use std::rc::Rc;

use crate::ast::Procedure;
use crate::value::VbaValue;

/// What a scope entry holds. Procedures are stored as callables so lookups never have to guess
/// whether a name is a variable or something to invoke.
#[derive(Debug, Clone)]
pub enum Binding {
    Value(VbaValue),
    Procedure(Rc<Procedure>),
}

impl Binding {
    pub fn as_value(&self) -> Option<&VbaValue> {
        match self {
            Self::Value(v) => Some(v),
            Self::Procedure(_) => None,
        }
    }
}

impl From<VbaValue> for Binding {
    fn from(value: VbaValue) -> Self {
        Self::Value(value)
    }
}

/// A map keyed by ASCII-case-insensitive names.
#[derive(Debug, Clone)]
pub struct NameMap<V> {
    entries: HashMap<String, V>,
}

impl<V> Default for NameMap<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

pub(crate) fn normalize(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl<V> NameMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&V> {
        self.entries.get(&normalize(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut V> {
        self.entries.get_mut(&normalize(name))
    }

    pub fn insert(&mut self, name: &str, value: V) -> Option<V> {
        self.entries.insert(normalize(name), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<V> {
        self.entries.remove(&normalize(name))
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.contains_key(&normalize(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(normalized name, value)` pairs.
    pub fn iter(&self) -> hash_map::Iter<'_, String, V> {
        self.entries.iter()
    }
}

impl<V> FromIterator<(String, V)> for NameMap<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(&k, v);
        }
        map
    }
}
