//! Tables
//!
//! A table is an associative array from non-nil keys to non-nil values with
//! an optional metatable. Storage is a single insertion-ordered hash map:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ IndexMap<Key, Value>                         │
//! │   [0] "x"  → 1.0                             │
//! │   [1] 1    → "first"                         │
//! │   [2] "y"  → nil      (tombstone)            │
//! │   [3] 2    → "second"                        │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Assigning `nil` leaves a tombstone instead of removing the entry, so a
//! traversal with [`Table::next`] stays valid while fields are cleared.
//! Tombstones are purged when a new key is inserted and they make up more
//! than half of the map.

use std::cell::{Ref, RefCell, RefMut};
use std::hash::{BuildHasherDefault, Hash, Hasher};
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHasher;

use crate::value::{float_to_integer, Value};
use crate::{VmError, VmResult};

type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

// ============================================================================
// Keys
// ============================================================================

/// A normalized table key
///
/// Floats with an integral value are stored as integers so that `t[1]` and
/// `t[1.0]` address the same field. Reference types hash by identity.
#[derive(Clone, Debug)]
pub struct Key(Value);

impl Key {
    /// Normalize a value into a key, rejecting `nil` and NaN
    pub fn new(value: Value) -> VmResult<Key> {
        match value {
            Value::Nil => Err(VmError::runtime("table index is nil")),
            Value::Number(n) if n.is_nan() => Err(VmError::runtime("table index is NaN")),
            Value::Number(n) => Ok(Key(match float_to_integer(n) {
                Some(i) => Value::Integer(i),
                None => Value::Number(n),
            })),
            other => Ok(Key(other)),
        }
    }

    /// Normalize for lookup; keys that can never be stored yield `None`
    fn lookup(value: &Value) -> Option<Key> {
        match value {
            Value::Nil => None,
            Value::Number(n) if n.is_nan() => None,
            other => Key::new(other.clone()).ok(),
        }
    }

    /// The key as a value
    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        // Keys are normalized, so an integer never equals a float here.
        match (&self.0, &other.0) {
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::Integer(_), Value::Number(_)) | (Value::Number(_), Value::Integer(_)) => false,
            (a, b) => a.raw_equal(b),
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.0).hash(state);
        match &self.0 {
            Value::Nil => {}
            Value::Boolean(b) => b.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Number(n) => n.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            other => other.address().hash(state),
        }
    }
}

// ============================================================================
// Table
// ============================================================================

/// Table storage
#[derive(Default)]
pub struct Table {
    entries: FxIndexMap<Key, Value>,
    tombstones: usize,
    metatable: Option<TableRef>,
}

impl Table {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with preallocated room for `capacity` fields
    pub fn with_capacity(capacity: usize) -> Self {
        Table {
            entries: FxIndexMap::with_capacity_and_hasher(capacity, Default::default()),
            tombstones: 0,
            metatable: None,
        }
    }

    /// Raw read; missing fields read as `nil`
    pub fn get(&self, key: &Value) -> Value {
        match Key::lookup(key) {
            Some(k) => self.entries.get(&k).cloned().unwrap_or_default(),
            None => Value::Nil,
        }
    }

    /// Raw read by string key
    pub fn get_str(&self, key: &str) -> Value {
        self.get(&Value::from(key))
    }

    /// Raw read by integer key
    pub fn get_int(&self, key: i64) -> Value {
        self.entries
            .get(&Key(Value::Integer(key)))
            .cloned()
            .unwrap_or_default()
    }

    /// Raw write; assigning `nil` clears the field
    pub fn set(&mut self, key: Value, value: Value) -> VmResult<()> {
        let key = Key::new(key)?;
        match self.entries.get_mut(&key) {
            Some(slot) => {
                match (slot.is_nil(), value.is_nil()) {
                    (false, true) => self.tombstones += 1,
                    (true, false) => self.tombstones -= 1,
                    _ => {}
                }
                *slot = value;
            }
            None => {
                if value.is_nil() {
                    return Ok(());
                }
                if self.tombstones > 8 && self.tombstones * 2 > self.entries.len() {
                    self.purge();
                }
                self.entries.insert(key, value);
            }
        }
        Ok(())
    }

    /// Raw write by string key
    pub fn set_str(&mut self, key: &str, value: Value) {
        // String keys are always valid.
        let _ = self.set(Value::from(key), value);
    }

    /// Raw write by integer key
    pub fn set_int(&mut self, key: i64, value: Value) {
        let _ = self.set(Value::Integer(key), value);
    }

    /// Border length: the largest `n` such that `t[1]..t[n]` are all non-nil
    pub fn len(&self) -> i64 {
        let mut n = 0;
        while !self.get_int(n + 1).is_nil() {
            n += 1;
        }
        n
    }

    /// Whether the table has no live fields
    pub fn is_empty(&self) -> bool {
        self.entries.len() == self.tombstones
    }

    /// Traversal step: the live field following `key` (`nil` starts the walk)
    pub fn next(&self, key: &Value) -> VmResult<Option<(Value, Value)>> {
        let start = if key.is_nil() {
            0
        } else {
            match Key::lookup(key).and_then(|k| self.entries.get_index_of(&k)) {
                Some(i) => i + 1,
                None => return Err(VmError::runtime("invalid key to 'next'")),
            }
        };
        Ok(self
            .entries
            .iter()
            .skip(start)
            .find(|(_, v)| !v.is_nil())
            .map(|(k, v)| (k.0.clone(), v.clone())))
    }

    /// Iterate over live fields in insertion order
    pub fn pairs(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries
            .iter()
            .filter(|(_, v)| !v.is_nil())
            .map(|(k, v)| (&k.0, v))
    }

    /// Remove every field, keeping the metatable
    pub fn clear(&mut self) {
        self.entries.clear();
        self.tombstones = 0;
    }

    /// The metatable, if any
    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.clone()
    }

    /// Replace the metatable
    pub fn set_metatable(&mut self, metatable: Option<TableRef>) {
        self.metatable = metatable;
    }

    fn purge(&mut self) {
        self.entries.retain(|_, v| !v.is_nil());
        self.tombstones = 0;
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Shared handle to a table
#[derive(Clone, Default)]
pub struct TableRef(Rc<RefCell<Table>>);

impl TableRef {
    /// Allocate a new empty table
    pub fn new() -> Self {
        TableRef(Rc::new(RefCell::new(Table::new())))
    }

    /// Wrap existing storage
    pub fn from_table(table: Table) -> Self {
        TableRef(Rc::new(RefCell::new(table)))
    }

    /// Immutable access to the storage
    pub fn borrow(&self) -> Ref<'_, Table> {
        self.0.borrow()
    }

    /// Mutable access to the storage
    pub fn borrow_mut(&self) -> RefMut<'_, Table> {
        self.0.borrow_mut()
    }

    /// Raw read
    pub fn get(&self, key: &Value) -> Value {
        self.0.borrow().get(key)
    }

    /// Raw read by string key
    pub fn get_str(&self, key: &str) -> Value {
        self.0.borrow().get_str(key)
    }

    /// Raw write
    pub fn set(&self, key: Value, value: Value) -> VmResult<()> {
        self.0.borrow_mut().set(key, value)
    }

    /// Raw write by string key
    pub fn set_str(&self, key: &str, value: Value) {
        self.0.borrow_mut().set_str(key, value)
    }

    /// The metatable, if any
    pub fn metatable(&self) -> Option<TableRef> {
        self.0.borrow().metatable()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &TableRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Identity address
    pub fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const u8 as usize
    }
}

impl std::fmt::Debug for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "table: {:#x}", self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_keys_normalize() {
        let mut t = Table::new();
        t.set(Value::Number(1.0), Value::from("one")).unwrap();
        assert!(t.get(&Value::Integer(1)).raw_equal(&Value::from("one")));
        t.set(Value::Number(1.5), Value::from("half")).unwrap();
        assert!(t.get(&Value::Number(1.5)).raw_equal(&Value::from("half")));
    }

    #[test]
    fn test_invalid_keys() {
        let mut t = Table::new();
        assert!(t.set(Value::Nil, Value::Integer(1)).is_err());
        assert!(t.set(Value::Number(f64::NAN), Value::Integer(1)).is_err());
        assert!(t.get(&Value::Nil).is_nil());
    }

    #[test]
    fn test_border_length() {
        let mut t = Table::new();
        for i in 1..=5 {
            t.set_int(i, Value::Integer(i * 10));
        }
        assert_eq!(t.len(), 5);
        t.set_int(5, Value::Nil);
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn test_next_survives_clearing() {
        let mut t = Table::new();
        t.set_str("a", Value::Integer(1));
        t.set_str("b", Value::Integer(2));
        t.set_str("c", Value::Integer(3));

        let mut seen = Vec::new();
        let mut key = Value::Nil;
        while let Some((k, v)) = t.next(&key).unwrap() {
            seen.push(v.to_integer().unwrap());
            t.set(k.clone(), Value::Nil).unwrap();
            key = k;
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(t.is_empty());
    }

    #[test]
    fn test_next_rejects_unknown_key() {
        let t = Table::new();
        assert!(t.next(&Value::from("missing")).is_err());
    }

    #[test]
    fn test_tombstones_purged() {
        let mut t = Table::new();
        for i in 0..32 {
            t.set_int(i, Value::Boolean(true));
        }
        for i in 0..30 {
            t.set_int(i, Value::Nil);
        }
        t.set_str("fresh", Value::Boolean(true));
        assert_eq!(t.pairs().count(), 3);
        assert_eq!(t.entries.len(), 3);
    }

    #[test]
    fn test_reference_keys_by_identity() {
        let mut t = Table::new();
        let a = TableRef::new();
        let b = TableRef::new();
        t.set(Value::Table(a.clone()), Value::Integer(1)).unwrap();
        assert!(t.get(&Value::Table(a)).raw_equal(&Value::Integer(1)));
        assert!(t.get(&Value::Table(b)).is_nil());
    }
}
