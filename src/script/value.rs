use crate::error::{ScriptError, Span};
use crate::script::ast::Stmt;
use crate::script::evaluator::{Environment, Evaluator};
use crate::script::lexer::parse_number;
use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Rendering stops descending into containers past this depth, so cyclic
/// structures always terminate.
const MAX_RENDER_DEPTH: usize = 4;

/// Structural serialization gives up past this depth; the caller falls back
/// to the display form.
pub const MAX_JSON_DEPTH: usize = 16;

pub type NativeFn = fn(&mut Evaluator, &[Value], Span) -> Result<Value, ScriptError>;

#[derive(Clone, Copy)]
pub struct NativeFunction {
    pub name: &'static str,
    pub func: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// User-defined function together with its captured environment.
pub struct FunctionData {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub closure: Rc<RefCell<Environment>>,
}

impl fmt::Debug for FunctionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The closure chain can point back at this function
        f.debug_struct("FunctionData")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Insertion-ordered property storage for objects.
#[derive(Debug, Default)]
pub struct ObjectData {
    pub entries: Vec<(String, Value)>,
}

impl ObjectData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn set(&mut self, key: &str, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<ObjectData>>),
    Function(Rc<FunctionData>),
    Native(NativeFunction),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(data: ObjectData) -> Value {
        Value::Object(Rc::new(RefCell::new(data)))
    }

    pub fn native(name: &'static str, func: NativeFn) -> Value {
        Value::Native(NativeFunction { name, func })
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// The `typeof` operator's answer.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) | Value::Object(_) => "object",
            Value::Function(_) | Value::Native(_) => "function",
        }
    }

    /// Finer-grained name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) | Value::Native(_) => "function",
        }
    }

    /// String conversion used by concatenation, templates, and `String()`.
    pub fn to_js_string(&self) -> String {
        self.js_string_at(0)
    }

    fn js_string_at(&self, depth: usize) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.clone(),
            Value::Array(items) => {
                if depth >= MAX_RENDER_DEPTH {
                    return String::new();
                }
                items
                    .borrow()
                    .iter()
                    .map(|v| match v {
                        // Holes render empty in joins
                        Value::Undefined | Value::Null => String::new(),
                        other => other.js_string_at(depth + 1),
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            }
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(func) => function_label(func.name.as_deref()),
            Value::Native(native) => function_label(Some(native.name)),
        }
    }

    /// Numeric coercion used by arithmetic and `Number()`.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(true) => 1.0,
            Value::Bool(false) => 0.0,
            Value::Number(n) => *n,
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    parse_number(trimmed).unwrap_or(f64::NAN)
                }
            }
            Value::Array(_) => {
                let text = self.to_js_string();
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    parse_number(trimmed).unwrap_or(f64::NAN)
                }
            }
            Value::Object(_) | Value::Function(_) | Value::Native(_) => f64::NAN,
        }
    }

    /// Display form with quotes around the value when it is a string.
    pub fn inspect(&self) -> String {
        match self {
            Value::Str(s) => quote(s),
            other => other.render(0),
        }
    }

    fn render(&self, depth: usize) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => {
                if depth == 0 {
                    s.clone()
                } else {
                    quote(s)
                }
            }
            Value::Array(items) => {
                if depth >= MAX_RENDER_DEPTH {
                    return "[Array]".to_string();
                }
                let inner = items
                    .borrow()
                    .iter()
                    .map(|v| v.render(depth + 1))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("[{}]", inner)
            }
            Value::Object(data) => {
                if depth >= MAX_RENDER_DEPTH {
                    return "[Object]".to_string();
                }
                let data = data.borrow();
                if data.entries.is_empty() {
                    return "{}".to_string();
                }
                let inner = data
                    .entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.render(depth + 1)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{ {} }}", inner)
            }
            Value::Function(func) => function_label(func.name.as_deref()),
            Value::Native(native) => function_label(Some(native.name)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(0))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inspect())
    }
}

impl PartialEq for Value {
    /// Strict equality: no coercion, reference identity for containers and
    /// functions, IEEE comparison for numbers (so NaN is unequal to itself).
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => a.name == b.name,
            _ => false,
        }
    }
}

/// Number rendering: integral values drop the decimal point, negative zero
/// renders as plain zero.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{}", n)
    }
}

fn function_label(name: Option<&str>) -> String {
    format!("[Function: {}]", name.unwrap_or("anonymous"))
}

fn quote(s: &str) -> String {
    let escaped = s
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{}\"", escaped)
}

/// Streaming structural view of a value for `serde_json`. Serialization
/// fails past [`MAX_JSON_DEPTH`] so cyclic values cannot loop; callers catch
/// the error and fall back to the display form.
pub struct JsonView<'a> {
    value: &'a Value,
    depth: usize,
}

impl<'a> JsonView<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self { value, depth: 0 }
    }
}

impl Serialize for JsonView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.depth > MAX_JSON_DEPTH {
            return Err(S::Error::custom("value nesting exceeds serialization depth"));
        }

        match self.value {
            Value::Undefined | Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => {
                if !n.is_finite() {
                    serializer.serialize_unit()
                } else if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Value::Str(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let items = items.borrow();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(&JsonView {
                        value: item,
                        depth: self.depth + 1,
                    })?;
                }
                seq.end()
            }
            Value::Object(data) => {
                let data = data.borrow();
                let mut map = serializer.serialize_map(Some(data.entries.len()))?;
                for (key, value) in &data.entries {
                    map.serialize_entry(
                        key,
                        &JsonView {
                            value,
                            depth: self.depth + 1,
                        },
                    )?;
                }
                map.end()
            }
            Value::Function(func) => serializer.serialize_str(&function_label(func.name.as_deref())),
            Value::Native(native) => serializer.serialize_str(&function_label(Some(native.name))),
        }
    }
}
