//! Value representation
//!
//! Every slot of a VM stack, every table field and every registry entry holds
//! a [`Value`]. Scalars are stored inline; strings, tables, functions,
//! userdata and threads are reference-counted handles, so cloning a value is
//! always cheap and never deep-copies.
//!
//! # Equality
//!
//! `Value` deliberately does not implement `PartialEq`. Script-level equality
//! has two flavours:
//!
//! - **raw equality** ([`Value::raw_equal`]): scalars and strings compare by
//!   content (integers and floats compare mathematically), everything else by
//!   identity
//! - **metamethod equality** (`State::compare`): raw equality first, then the
//!   `__eq` handler for pairs of tables or pairs of userdata

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::function::FunctionRef;
use crate::state::State;
use crate::table::TableRef;
use crate::userdata::UserdataRef;

// ============================================================================
// Type tags
// ============================================================================

/// Basic type of a value or stack slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// An index past the top of the stack
    None,
    /// `nil`
    Nil,
    /// `true` / `false`
    Boolean,
    /// Opaque address without a metatable
    LightUserdata,
    /// Integer or float
    Number,
    /// Immutable byte string
    String,
    /// Table
    Table,
    /// Native function
    Function,
    /// Full userdata block
    Userdata,
    /// Coroutine thread
    Thread,
}

impl Type {
    /// Script-visible name of the type
    pub fn name(self) -> &'static str {
        match self {
            Type::None => "no value",
            Type::Nil => "nil",
            Type::Boolean => "boolean",
            Type::LightUserdata | Type::Userdata => "userdata",
            Type::Number => "number",
            Type::String => "string",
            Type::Table => "table",
            Type::Function => "function",
            Type::Thread => "thread",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Strings
// ============================================================================

/// Immutable, reference-counted byte string
///
/// Strings are byte sequences, not necessarily UTF-8. Cloning shares the
/// buffer; [`VmString::as_bytes`] hands out a view whose lifetime is tied to
/// the handle.
#[derive(Clone)]
pub struct VmString(Rc<[u8]>);

impl VmString {
    /// Create a string from raw bytes
    pub fn new(bytes: &[u8]) -> Self {
        VmString(Rc::from(bytes))
    }

    /// Raw bytes of the string
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The string as UTF-8, if it is valid UTF-8
    pub fn to_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Lossy UTF-8 conversion
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    /// Length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the string is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether two handles share the same buffer
    pub fn ptr_eq(&self, other: &VmString) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for VmString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for VmString {}

impl Hash for VmString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl From<&str> for VmString {
    fn from(s: &str) -> Self {
        VmString::new(s.as_bytes())
    }
}

impl From<String> for VmString {
    fn from(s: String) -> Self {
        VmString(Rc::from(s.into_bytes().into_boxed_slice()))
    }
}

impl From<&[u8]> for VmString {
    fn from(b: &[u8]) -> Self {
        VmString::new(b)
    }
}

impl fmt::Debug for VmString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for VmString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

// ============================================================================
// Values
// ============================================================================

/// A VM value
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a value
    #[default]
    Nil,
    /// Boolean
    Boolean(bool),
    /// 64-bit integer subtype of number
    Integer(i64),
    /// Float subtype of number
    Number(f64),
    /// Byte string
    String(VmString),
    /// Table
    Table(TableRef),
    /// Native function
    Function(FunctionRef),
    /// Full userdata
    Userdata(UserdataRef),
    /// Opaque address
    LightUserdata(usize),
    /// Coroutine thread
    Thread(State),
}

impl Value {
    /// Create a string value
    pub fn string(s: impl Into<VmString>) -> Self {
        Value::String(s.into())
    }

    /// Basic type of the value
    pub fn type_of(&self) -> Type {
        match self {
            Value::Nil => Type::Nil,
            Value::Boolean(_) => Type::Boolean,
            Value::Integer(_) | Value::Number(_) => Type::Number,
            Value::String(_) => Type::String,
            Value::Table(_) => Type::Table,
            Value::Function(_) => Type::Function,
            Value::Userdata(_) => Type::Userdata,
            Value::LightUserdata(_) => Type::LightUserdata,
            Value::Thread(_) => Type::Thread,
        }
    }

    /// Script-visible type name
    pub fn type_name(&self) -> &'static str {
        self.type_of().name()
    }

    /// Whether the value is `nil`
    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Truthiness: only `nil` and `false` are falsy
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// Convert to an integer, accepting integral floats and numeric strings
    pub fn to_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Number(n) => float_to_integer(*n),
            Value::String(s) => match parse_number(s.as_bytes())? {
                Value::Integer(i) => Some(i),
                Value::Number(n) => float_to_integer(n),
                _ => None,
            },
            _ => None,
        }
    }

    /// Convert to a float, accepting numeric strings
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            Value::String(s) => match parse_number(s.as_bytes())? {
                Value::Integer(i) => Some(i as f64),
                Value::Number(n) => Some(n),
                _ => None,
            },
            _ => None,
        }
    }

    /// Borrow the string payload, without number coercion
    pub fn as_string(&self) -> Option<&VmString> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Raw (metamethod-free) equality
    pub fn raw_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Integer(i), Value::Number(n)) | (Value::Number(n), Value::Integer(i)) => {
                float_to_integer(*n) == Some(*i)
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Userdata(a), Value::Userdata(b)) => a.ptr_eq(b),
            (Value::LightUserdata(a), Value::LightUserdata(b)) => a == b,
            (Value::Thread(a), Value::Thread(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Identity address of a reference value, used for display and hashing
    pub fn address(&self) -> Option<usize> {
        match self {
            Value::Table(t) => Some(t.address()),
            Value::Function(f) => Some(f.address()),
            Value::Userdata(u) => Some(u.address()),
            Value::LightUserdata(p) => Some(*p),
            Value::Thread(s) => Some(s.address()),
            _ => None,
        }
    }

    /// Plain string conversion (no metamethods): strings and numbers only
    pub fn coerce_string(&self) -> Option<VmString> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(VmString::from(i.to_string())),
            Value::Number(n) => Some(VmString::from(format_number(*n))),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{:?}", s),
            other => write!(
                f,
                "{}: {:#x}",
                other.type_name(),
                other.address().unwrap_or_default()
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<TableRef> for Value {
    fn from(t: TableRef) -> Self {
        Value::Table(t)
    }
}

impl From<FunctionRef> for Value {
    fn from(f: FunctionRef) -> Self {
        Value::Function(f)
    }
}

impl From<UserdataRef> for Value {
    fn from(u: UserdataRef) -> Self {
        Value::Userdata(u)
    }
}

// ============================================================================
// Number helpers
// ============================================================================

/// Exact float to integer conversion
pub fn float_to_integer(n: f64) -> Option<i64> {
    // 2^63 is exactly representable; anything at or above it overflows i64.
    if n.fract() == 0.0 && n >= -9_223_372_036_854_775_808.0 && n < 9_223_372_036_854_775_808.0 {
        Some(n as i64)
    } else {
        None
    }
}

/// Format a float the way scripts print it: integral floats keep a `.0`
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        if n.is_sign_negative() { "-nan" } else { "nan" }.to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

/// Parse a numeric string (decimal or `0x` hexadecimal integers, decimal floats)
pub fn parse_number(bytes: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    let (negative, digits) = match text.as_bytes()[0] {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        // Hex integers wrap around, as in the reference VM.
        let mut acc: i64 = 0;
        if hex.is_empty() {
            return None;
        }
        for c in hex.chars() {
            let d = c.to_digit(16)? as i64;
            acc = acc.wrapping_mul(16).wrapping_add(d);
        }
        return Some(Value::Integer(if negative { acc.wrapping_neg() } else { acc }));
    }
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    // Rust accepts "inf"/"nan" spellings; scripts do not.
    if digits.bytes().any(|b| b.is_ascii_alphabetic() && b != b'e' && b != b'E') {
        return None;
    }
    text.parse::<f64>().ok().map(Value::Number)
}
