use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

pub type VbaListRef = Rc<RefCell<Vec<VbaValue>>>;
pub type VbaMapRef = Rc<RefCell<BTreeMap<String, VbaValue>>>;

/// An opaque handle to an emulated COM object (`CreateObject("WScript.Shell")` and friends).
#[derive(Clone)]
pub struct VbaObjectRef(Rc<VbaObject>);

#[derive(Debug)]
pub struct VbaObject {
    pub class: String,
}

impl VbaObjectRef {
    pub fn new(class: impl Into<String>) -> Self {
        Self(Rc::new(VbaObject {
            class: class.into(),
        }))
    }

    pub fn class(&self) -> &str {
        &self.0.class
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for VbaObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VbaObjectRef({})", self.0.class)
    }
}

/// A dynamically typed emulator value.
///
/// Lists and maps are reference-shared: cloning a `VbaValue::List` aliases the same backing
/// vector, which is how VBA object references behave.
#[derive(Clone, Default)]
pub enum VbaValue {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    List(VbaListRef),
    Map(VbaMapRef),
    #[default]
    Null,
    Object(VbaObjectRef),
    /// A name that could not be resolved by any lookup strategy.
    Unresolved,
}

impl fmt::Debug for VbaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "Integer({v})"),
            Self::Float(v) => write!(f, "Float({v})"),
            Self::String(v) => write!(f, "String({v:?})"),
            Self::Boolean(v) => write!(f, "Boolean({v})"),
            Self::List(v) => write!(f, "List({:?})", v.borrow()),
            Self::Map(v) => write!(f, "Map({:?})", v.borrow()),
            Self::Null => write!(f, "Null"),
            Self::Object(o) => write!(f, "Object({})", o.class()),
            Self::Unresolved => write!(f, "Unresolved"),
        }
    }
}

impl PartialEq for VbaValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Integer(a), Self::Float(b)) | (Self::Float(b), Self::Integer(a)) => {
                *a as f64 == *b
            }
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Self::Map(a), Self::Map(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Self::Null, Self::Null) => true,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Unresolved, Self::Unresolved) => true,
            _ => false,
        }
    }
}

impl VbaValue {
    pub fn new_list(items: Vec<VbaValue>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    pub fn new_map() -> Self {
        Self::Map(Rc::new(RefCell::new(BTreeMap::new())))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "Integer",
            Self::Float(_) => "Float",
            Self::String(_) => "String",
            Self::Boolean(_) => "Boolean",
            Self::List(_) => "List",
            Self::Map(_) => "Map",
            Self::Null => "Null",
            Self::Object(_) => "Object",
            Self::Unresolved => "Unresolved",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Float(_))
    }

    /// Null and Unresolved both behave like VBA's `Empty` in expressions.
    pub fn is_empty_like(&self) -> bool {
        matches!(self, Self::Null | Self::Unresolved)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Integer(v) => *v != 0,
            Self::Float(v) => *v != 0.0,
            Self::String(v) => {
                !(v.is_empty() || v.eq_ignore_ascii_case("false") || v.trim() == "0")
            }
            Self::Boolean(v) => *v,
            Self::List(v) => !v.borrow().is_empty(),
            Self::Map(v) => !v.borrow().is_empty(),
            Self::Null | Self::Unresolved => false,
            Self::Object(_) => true,
        }
    }

    /// Best-effort integer coercion. Anything that cannot be read as a number becomes 0.
    pub fn to_int(&self) -> i64 {
        match self {
            Self::Integer(v) => *v,
            Self::Float(v) => {
                if v.is_finite() {
                    *v as i64
                } else {
                    0
                }
            }
            Self::Boolean(v) => {
                if *v {
                    -1
                } else {
                    0
                }
            }
            Self::String(s) => parse_int_text(s).unwrap_or_else(|| {
                log::warn!("cannot convert {s:?} to an integer, using 0");
                0
            }),
            Self::List(_) | Self::Map(_) | Self::Object(_) => {
                log::warn!("cannot convert {} to an integer, using 0", self.type_name());
                0
            }
            Self::Null | Self::Unresolved => 0,
        }
    }

    pub fn to_f64(&self) -> f64 {
        match self {
            Self::Float(v) => *v,
            Self::String(s) => {
                let t = s.trim();
                match t.parse::<f64>() {
                    Ok(v) => v,
                    Err(_) => parse_int_text(s).unwrap_or(0) as f64,
                }
            }
            other => other.to_int() as f64,
        }
    }

    /// Coerce to a numeric value, keeping integers integral.
    pub fn to_number(&self) -> VbaValue {
        match self {
            Self::Integer(_) | Self::Float(_) => self.clone(),
            Self::String(s) => {
                let t = s.trim();
                if let Some(v) = parse_int_text(t).filter(|_| !t.contains('.')) {
                    return Self::Integer(v);
                }
                match t.parse::<f64>() {
                    Ok(v) => Self::Float(v),
                    Err(_) => Self::Integer(self.to_int()),
                }
            }
            other => Self::Integer(other.to_int()),
        }
    }

    pub fn to_string_lossy(&self) -> String {
        match self {
            Self::Integer(v) => v.to_string(),
            Self::Float(v) => format_float(*v),
            Self::String(v) => v.clone(),
            Self::Boolean(v) => {
                if *v {
                    "True".to_string()
                } else {
                    "False".to_string()
                }
            }
            Self::List(v) => v.borrow().iter().map(|v| v.to_string_lossy()).collect(),
            Self::Map(_) => String::new(),
            Self::Null | Self::Unresolved => String::new(),
            Self::Object(o) => o.class().to_string(),
        }
    }

    pub fn as_list(&self) -> Option<VbaListRef> {
        match self {
            Self::List(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<VbaMapRef> {
        match self {
            Self::Map(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Copy nested lists and maps so the result shares no storage with `self`.
    pub fn deep_clone(&self) -> VbaValue {
        match self {
            Self::List(v) => {
                Self::new_list(v.borrow().iter().map(VbaValue::deep_clone).collect())
            }
            Self::Map(v) => {
                let copy = v
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_clone()))
                    .collect();
                Self::Map(Rc::new(RefCell::new(copy)))
            }
            other => other.clone(),
        }
    }

    /// Byte view used by file writes and memory-write emulation.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::List(v) => v.borrow().iter().map(|b| b.to_int() as u8).collect(),
            other => other.to_string_lossy().chars().map(|c| c as u32 as u8).collect(),
        }
    }
}

fn parse_int_text(s: &str) -> Option<i64> {
    let t = s.trim();
    if t.is_empty() || t.chars().all(|c| c == '\0') {
        return Some(0);
    }
    let lower = t.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("&h") {
        return i64::from_str_radix(hex, 16).ok();
    }
    if let Some(oct) = lower.strip_prefix("&o") {
        return i64::from_str_radix(oct, 8).ok();
    }
    if let Ok(v) = t.parse::<i64>() {
        return Some(v);
    }
    t.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v as i64)
}

pub(crate) fn format_float(v: f64) -> String {
    let mut s = format!("{v}");
    if s.ends_with(".0") {
        s.truncate(s.len() - 2);
    }
    s
}

impl From<&str> for VbaValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for VbaValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for VbaValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<f64> for VbaValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for VbaValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for VbaValue {
    fn from(value: i32) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<Vec<VbaValue>> for VbaValue {
    fn from(value: Vec<VbaValue>) -> Self {
        Self::new_list(value)
    }
}
