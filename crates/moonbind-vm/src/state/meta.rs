//! Metamethod-aware operations
//!
//! Every operation first tries the primitive behaviour for the operand types
//! and falls back to the handler stored in the operand's metatable under the
//! event name (`__index`, `__add`, `__eq`, ...).

use super::State;
use crate::value::{parse_number, Value, VmString};
use crate::{VmError, VmResult};

/// Longest `__index` / `__newindex` chain followed before giving up
const MAX_META_CHAIN: usize = 2000;

/// Arithmetic and bitwise operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `^`
    Pow,
    /// `//`
    IDiv,
    /// `&`
    BAnd,
    /// `|`
    BOr,
    /// `~`
    BXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// unary `-`
    Unm,
    /// unary `~`
    BNot,
}

impl ArithOp {
    /// Metamethod event name
    pub fn event(self) -> &'static str {
        match self {
            ArithOp::Add => "__add",
            ArithOp::Sub => "__sub",
            ArithOp::Mul => "__mul",
            ArithOp::Div => "__div",
            ArithOp::Mod => "__mod",
            ArithOp::Pow => "__pow",
            ArithOp::IDiv => "__idiv",
            ArithOp::BAnd => "__band",
            ArithOp::BOr => "__bor",
            ArithOp::BXor => "__bxor",
            ArithOp::Shl => "__shl",
            ArithOp::Shr => "__shr",
            ArithOp::Unm => "__unm",
            ArithOp::BNot => "__bnot",
        }
    }

    /// Whether the operator takes one operand
    pub fn is_unary(self) -> bool {
        matches!(self, ArithOp::Unm | ArithOp::BNot)
    }

    fn is_bitwise(self) -> bool {
        matches!(
            self,
            ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr | ArithOp::BNot
        )
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `<`
    Lt,
    /// `<=`
    Le,
}

impl State {
    /// Raw field `name` of the metatable of `value` (`nil` if absent)
    pub fn metafield(&self, value: &Value, name: &str) -> Value {
        match self.metatable_of(value) {
            Some(mt) => mt.get_str(name),
            None => Value::Nil,
        }
    }

    // ========================================================================
    // Indexing
    // ========================================================================

    /// `target[key]` following `__index`
    pub fn index_value(&self, target: &Value, key: &Value) -> VmResult<Value> {
        let mut current = target.clone();
        for _ in 0..MAX_META_CHAIN {
            let handler = match &current {
                Value::Table(t) => {
                    let raw = t.get(key);
                    if !raw.is_nil() {
                        return Ok(raw);
                    }
                    match t.metatable() {
                        Some(mt) => mt.get_str("__index"),
                        None => return Ok(Value::Nil),
                    }
                }
                other => {
                    let h = self.metafield(other, "__index");
                    if h.is_nil() {
                        return Err(index_error(other, key));
                    }
                    h
                }
            };
            match handler {
                Value::Nil => return Ok(Value::Nil),
                Value::Function(_) => {
                    return self.call_value(&handler, &[current, key.clone()]);
                }
                next => current = next,
            }
        }
        Err(VmError::runtime("'__index' chain too long; possible loop"))
    }

    /// `target[key] = value` following `__newindex`
    pub fn new_index_value(&self, target: &Value, key: Value, value: Value) -> VmResult<()> {
        let mut current = target.clone();
        for _ in 0..MAX_META_CHAIN {
            let handler = match &current {
                Value::Table(t) => {
                    let handler = if t.get(&key).is_nil() {
                        t.metatable().map(|mt| mt.get_str("__newindex"))
                    } else {
                        None
                    };
                    match handler {
                        Some(h) if !h.is_nil() => h,
                        _ => return t.set(key, value),
                    }
                }
                other => {
                    let h = self.metafield(other, "__newindex");
                    if h.is_nil() {
                        return Err(index_error(other, &key));
                    }
                    h
                }
            };
            match handler {
                Value::Function(_) => {
                    self.call_values(&handler, &[current, key, value])?;
                    return Ok(());
                }
                next => current = next,
            }
        }
        Err(VmError::runtime("'__newindex' chain too long; possible loop"))
    }

    // ========================================================================
    // Arithmetic
    // ========================================================================

    /// Apply an operator to the top one (unary) or two values, replacing them
    /// with the result
    pub fn arith(&self, op: ArithOp) -> VmResult<()> {
        let b = self.pop_value();
        let a = if op.is_unary() {
            b.clone()
        } else {
            self.pop_value()
        };
        let result = self.arith_values(op, &a, &b)?;
        self.push_value(result);
        Ok(())
    }

    /// Apply an operator to two values
    pub fn arith_values(&self, op: ArithOp, a: &Value, b: &Value) -> VmResult<Value> {
        if let Some(v) = primitive_arith(op, a, b)? {
            return Ok(v);
        }
        let mut handler = self.metafield(a, op.event());
        if handler.is_nil() {
            handler = self.metafield(b, op.event());
        }
        if handler.is_nil() {
            let culprit = if numeric(a).is_some() { b } else { a };
            return Err(if op.is_bitwise() {
                if numeric(a).is_some() && numeric(b).is_some() {
                    VmError::runtime("number has no integer representation")
                } else {
                    VmError::runtime(format!(
                        "attempt to perform bitwise operation on a {} value",
                        culprit.type_name()
                    ))
                }
            } else {
                VmError::runtime(format!(
                    "attempt to perform arithmetic on a {} value",
                    culprit.type_name()
                ))
            });
        }
        self.call_value(&handler, &[a.clone(), b.clone()])
    }

    // ========================================================================
    // Comparison
    // ========================================================================

    /// Compare the values at two stack indices
    pub fn compare(&self, idx1: i32, idx2: i32, op: CompareOp) -> VmResult<bool> {
        if self.is_none(idx1) || self.is_none(idx2) {
            return Ok(false);
        }
        self.compare_values(&self.value_at(idx1), &self.value_at(idx2), op)
    }

    /// Compare two values
    pub fn compare_values(&self, a: &Value, b: &Value, op: CompareOp) -> VmResult<bool> {
        match op {
            CompareOp::Eq => {
                if a.raw_equal(b) {
                    return Ok(true);
                }
                let same_kind = matches!(
                    (a, b),
                    (Value::Table(_), Value::Table(_)) | (Value::Userdata(_), Value::Userdata(_))
                );
                if !same_kind {
                    return Ok(false);
                }
                let mut handler = self.metafield(a, "__eq");
                if handler.is_nil() {
                    handler = self.metafield(b, "__eq");
                }
                if handler.is_nil() {
                    return Ok(false);
                }
                Ok(self.call_value(&handler, &[a.clone(), b.clone()])?.is_truthy())
            }
            CompareOp::Lt | CompareOp::Le => {
                let strict = op == CompareOp::Lt;
                match (a, b) {
                    (Value::Integer(x), Value::Integer(y)) => {
                        return Ok(if strict { x < y } else { x <= y })
                    }
                    (Value::Integer(_) | Value::Number(_), Value::Integer(_) | Value::Number(_)) => {
                        let (x, y) = (numeric(a).unwrap_or(f64::NAN), numeric(b).unwrap_or(f64::NAN));
                        return Ok(if strict { x < y } else { x <= y });
                    }
                    (Value::String(x), Value::String(y)) => {
                        let (x, y) = (x.as_bytes(), y.as_bytes());
                        return Ok(if strict { x < y } else { x <= y });
                    }
                    _ => {}
                }
                let event = if strict { "__lt" } else { "__le" };
                let mut handler = self.metafield(a, event);
                if handler.is_nil() {
                    handler = self.metafield(b, event);
                }
                if handler.is_nil() {
                    return Err(if a.type_of() == b.type_of() {
                        VmError::runtime(format!("attempt to compare two {} values", a.type_name()))
                    } else {
                        VmError::runtime(format!(
                            "attempt to compare {} with {}",
                            a.type_name(),
                            b.type_name()
                        ))
                    });
                }
                Ok(self.call_value(&handler, &[a.clone(), b.clone()])?.is_truthy())
            }
        }
    }

    // ========================================================================
    // Concatenation, length, display
    // ========================================================================

    /// Concatenate the top `n` values, replacing them with the result
    pub fn concat(&self, n: usize) -> VmResult<()> {
        let values = {
            let mut stack = self.0.stack.borrow_mut();
            let at = stack.len().saturating_sub(n).max(self.base());
            stack.split_off(at)
        };
        let result = self.concat_values(values)?;
        self.push_value(result);
        Ok(())
    }

    /// Concatenate values right to left
    pub fn concat_values(&self, values: Vec<Value>) -> VmResult<Value> {
        let mut iter = values.into_iter().rev();
        let Some(mut acc) = iter.next() else {
            return Ok(Value::from(""));
        };
        for left in iter {
            acc = match (left.coerce_string(), acc.coerce_string()) {
                (Some(l), Some(r)) => {
                    let mut bytes = Vec::with_capacity(l.len() + r.len());
                    bytes.extend_from_slice(l.as_bytes());
                    bytes.extend_from_slice(r.as_bytes());
                    Value::String(VmString::new(&bytes))
                }
                _ => {
                    let mut handler = self.metafield(&left, "__concat");
                    if handler.is_nil() {
                        handler = self.metafield(&acc, "__concat");
                    }
                    if handler.is_nil() {
                        let culprit = if left.coerce_string().is_some() { &acc } else { &left };
                        return Err(VmError::runtime(format!(
                            "attempt to concatenate a {} value",
                            culprit.type_name()
                        )));
                    }
                    self.call_value(&handler, &[left, acc])?
                }
            };
        }
        Ok(acc)
    }

    /// Push the length of the value at `idx` (honouring `__len`)
    pub fn len(&self, idx: i32) -> VmResult<()> {
        let v = self.len_value(&self.value_at(idx))?;
        self.push_value(v);
        Ok(())
    }

    /// Length of a value (honouring `__len`)
    pub fn len_value(&self, value: &Value) -> VmResult<Value> {
        if let Value::String(s) = value {
            return Ok(Value::Integer(s.len() as i64));
        }
        let handler = self.metafield(value, "__len");
        if !handler.is_nil() {
            return self.call_value(&handler, &[value.clone()]);
        }
        match value {
            Value::Table(t) => Ok(Value::Integer(t.borrow().len())),
            other => Err(VmError::runtime(format!(
                "attempt to get length of a {} value",
                other.type_name()
            ))),
        }
    }

    /// Display string of a value (honouring `__tostring` and `__name`)
    pub fn to_display_string(&self, value: &Value) -> VmResult<VmString> {
        let handler = self.metafield(value, "__tostring");
        if !handler.is_nil() {
            return match self.call_value(&handler, &[value.clone()])? {
                Value::String(s) => Ok(s),
                _ => Err(VmError::runtime("'__tostring' must return a string")),
            };
        }
        if let Some(s) = value.coerce_string() {
            return Ok(s);
        }
        let text = match value {
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            other => {
                let name = match self.metafield(other, "__name") {
                    Value::String(s) => s.to_string_lossy(),
                    _ => other.type_name().to_string(),
                };
                format!("{}: {:#x}", name, other.address().unwrap_or_default())
            }
        };
        Ok(VmString::from(text))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn index_error(target: &Value, key: &Value) -> VmError {
    match key {
        Value::String(s) => VmError::runtime(format!(
            "attempt to index a {} value (field '{}')",
            target.type_name(),
            s
        )),
        _ => VmError::runtime(format!("attempt to index a {} value", target.type_name())),
    }
}

/// Numeric view of a number or numeric string
fn numeric(v: &Value) -> Option<f64> {
    v.to_number()
}

/// Number operand after string coercion
fn arith_operand(v: &Value) -> Option<Value> {
    match v {
        Value::Integer(_) | Value::Number(_) => Some(v.clone()),
        Value::String(s) => parse_number(s.as_bytes()),
        _ => None,
    }
}

fn primitive_arith(op: ArithOp, a: &Value, b: &Value) -> VmResult<Option<Value>> {
    let (Some(a), Some(b)) = (arith_operand(a), arith_operand(b)) else {
        return Ok(None);
    };
    if op.is_bitwise() {
        let (Some(x), Some(y)) = (a.to_integer(), b.to_integer()) else {
            return Ok(None);
        };
        return Ok(Some(Value::Integer(match op {
            ArithOp::BAnd => x & y,
            ArithOp::BOr => x | y,
            ArithOp::BXor => x ^ y,
            ArithOp::Shl => shift_left(x, y),
            ArithOp::Shr => shift_left(x, y.wrapping_neg()),
            _ => !x,
        })));
    }
    if let (Value::Integer(x), Value::Integer(y)) = (&a, &b) {
        let (x, y) = (*x, *y);
        let v = match op {
            ArithOp::Add => Some(x.wrapping_add(y)),
            ArithOp::Sub => Some(x.wrapping_sub(y)),
            ArithOp::Mul => Some(x.wrapping_mul(y)),
            ArithOp::Unm => Some(x.wrapping_neg()),
            ArithOp::Mod => {
                if y == 0 {
                    return Err(VmError::runtime("attempt to perform 'n%0'"));
                }
                let r = x.wrapping_rem(y);
                Some(if r != 0 && (r ^ y) < 0 { r + y } else { r })
            }
            ArithOp::IDiv => {
                if y == 0 {
                    return Err(VmError::runtime("attempt to perform 'n//0'"));
                }
                let q = x.wrapping_div(y);
                Some(if x.wrapping_rem(y) != 0 && (x ^ y) < 0 { q - 1 } else { q })
            }
            _ => None,
        };
        if let Some(v) = v {
            return Ok(Some(Value::Integer(v)));
        }
    }
    let (Some(x), Some(y)) = (a.to_number(), b.to_number()) else {
        return Ok(None);
    };
    Ok(Some(Value::Number(match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Pow => x.powf(y),
        ArithOp::Unm => -x,
        ArithOp::IDiv => (x / y).floor(),
        ArithOp::Mod => {
            let r = x % y;
            if r != 0.0 && (r < 0.0) != (y < 0.0) {
                r + y
            } else {
                r
            }
        }
        _ => return Ok(None),
    })))
}

fn shift_left(x: i64, n: i64) -> i64 {
    if n <= -64 || n >= 64 {
        0
    } else if n >= 0 {
        ((x as u64) << n) as i64
    } else {
        ((x as u64) >> (-n)) as i64
    }
}
