//! Containers and optionals
//!
//! Containers are copied in full across the boundary: a `Vec` becomes a
//! fresh sequence table on push, and a table is walked element by element on
//! read. `check` only validates the outer table; element types are verified
//! during `get`.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

use moonbind_vm::{State, TableRef, Type, Value};

use super::{element_from_value, from_value, to_value, FromStack, Mismatch, Record, ToStack};
use crate::classify::{Classify, ValueKind};
use crate::error::{Error, Result};

fn check_table(
    state: &State,
    index: i32,
    expected: Cow<'static, str>,
    handler: &mut dyn FnMut(Mismatch),
    record: &mut Record,
) -> bool {
    record.consume(1);
    if state.type_of(index) == Type::Table {
        return true;
    }
    handler(Mismatch::at(state, index, expected));
    false
}

fn table_at(state: &State, index: i32, expected: Cow<'static, str>) -> Result<TableRef> {
    state
        .to_table(index)
        .ok_or_else(|| Mismatch::at(state, index, expected).into())
}

fn snapshot(table: &TableRef) -> Vec<(Value, Value)> {
    table
        .borrow()
        .pairs()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

// ============================================================================
// Sequences
// ============================================================================

impl<T: Classify> Classify for Vec<T> {
    const KIND: ValueKind = ValueKind::Table;

    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("table of {}", T::type_name()))
    }
}

impl<T: ToStack> ToStack for Vec<T> {
    fn push_to(self, state: &State) -> Result<usize> {
        let table = TableRef::new();
        for (i, item) in self.into_iter().enumerate() {
            let value = to_value(state, item)?;
            table.borrow_mut().set_int(i as i64 + 1, value);
        }
        state.push_value(Value::Table(table));
        Ok(1)
    }
}

impl<T: FromStack> FromStack for Vec<T> {
    fn check(
        state: &State,
        index: i32,
        handler: &mut dyn FnMut(Mismatch),
        record: &mut Record,
    ) -> bool {
        check_table(state, index, Self::type_name(), handler, record)
    }

    /// Reads `t[1]` through the table's border
    fn get(state: &State, index: i32, record: &mut Record) -> Result<Self> {
        record.consume(1);
        let table = table_at(state, index, Self::type_name())?;
        let len = table.borrow().len();
        let mut items = Vec::with_capacity(len.max(0) as usize);
        for i in 1..=len {
            let element = table.borrow().get_int(i);
            items.push(element_from_value(state, index, i, element)?);
        }
        Ok(items)
    }
}

// ============================================================================
// Maps
// ============================================================================

impl<K: Classify, V: Classify, S> Classify for HashMap<K, V, S> {
    const KIND: ValueKind = ValueKind::Table;

    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("table of {} to {}", K::type_name(), V::type_name()))
    }
}

impl<K: ToStack, V: ToStack, S> ToStack for HashMap<K, V, S> {
    fn push_to(self, state: &State) -> Result<usize> {
        push_pairs(state, self)
    }
}

impl<K, V, S> FromStack for HashMap<K, V, S>
where
    K: FromStack + Eq + Hash,
    V: FromStack,
    S: BuildHasher + Default,
{
    fn check(
        state: &State,
        index: i32,
        handler: &mut dyn FnMut(Mismatch),
        record: &mut Record,
    ) -> bool {
        check_table(state, index, Self::type_name(), handler, record)
    }

    fn get(state: &State, index: i32, record: &mut Record) -> Result<Self> {
        record.consume(1);
        let table = table_at(state, index, Self::type_name())?;
        read_pairs(state, index, &table)
    }
}

impl<K: Classify, V: Classify> Classify for BTreeMap<K, V> {
    const KIND: ValueKind = ValueKind::Table;

    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("table of {} to {}", K::type_name(), V::type_name()))
    }
}

impl<K: ToStack, V: ToStack> ToStack for BTreeMap<K, V> {
    fn push_to(self, state: &State) -> Result<usize> {
        push_pairs(state, self)
    }
}

impl<K: FromStack + Ord, V: FromStack> FromStack for BTreeMap<K, V> {
    fn check(
        state: &State,
        index: i32,
        handler: &mut dyn FnMut(Mismatch),
        record: &mut Record,
    ) -> bool {
        check_table(state, index, Self::type_name(), handler, record)
    }

    fn get(state: &State, index: i32, record: &mut Record) -> Result<Self> {
        record.consume(1);
        let table = table_at(state, index, Self::type_name())?;
        read_pairs(state, index, &table)
    }
}

fn push_pairs<K: ToStack, V: ToStack>(
    state: &State,
    pairs: impl IntoIterator<Item = (K, V)>,
) -> Result<usize> {
    let table = TableRef::new();
    for (k, v) in pairs {
        let key = to_value(state, k)?;
        let value = to_value(state, v)?;
        table.borrow_mut().set(key, value)?;
    }
    state.push_value(Value::Table(table));
    Ok(1)
}

fn read_pairs<K: FromStack, V: FromStack, C: FromIterator<(K, V)>>(
    state: &State,
    index: i32,
    table: &TableRef,
) -> Result<C> {
    snapshot(table)
        .into_iter()
        .map(|(k, v)| {
            let position = k
                .coerce_string()
                .map(|s| s.to_string_lossy())
                .unwrap_or_else(|| k.type_name().to_string());
            let key = from_value::<K>(state, k).map_err(|e| blame_key(e, index))?;
            let value = element_from_value::<V>(state, index, position, v)?;
            Ok((key, value))
        })
        .collect()
}

fn blame_key(e: Error, index: i32) -> Error {
    match e {
        Error::TypeMismatch {
            expected, actual, ..
        } => Error::TypeMismatch {
            index,
            expected: format!("key of type {}", expected),
            actual: format!("key of type {}", actual),
        },
        other => other,
    }
}

// ============================================================================
// Fixed-size arrays
// ============================================================================

impl<T: Classify, const N: usize> Classify for [T; N] {
    const KIND: ValueKind = T::ARRAY_KIND;

    fn type_name() -> Cow<'static, str> {
        match T::ARRAY_KIND {
            ValueKind::String => Cow::Borrowed("string"),
            _ => Cow::Owned(format!("table of {}", T::type_name())),
        }
    }
}

impl<T: ToStack, const N: usize> ToStack for [T; N] {
    fn push_to(self, state: &State) -> Result<usize> {
        T::push_array(self, state)
    }
}

impl<T: FromStack, const N: usize> FromStack for [T; N] {
    fn check(
        state: &State,
        index: i32,
        handler: &mut dyn FnMut(Mismatch),
        record: &mut Record,
    ) -> bool {
        T::check_array::<N>(state, index, handler, record)
    }

    fn get(state: &State, index: i32, record: &mut Record) -> Result<Self> {
        T::get_array::<N>(state, index, record)
    }
}

// ============================================================================
// Optionals
// ============================================================================

impl<T: Classify> Classify for Option<T> {
    const KIND: ValueKind = T::KIND;
    const MIN_SLOTS: usize = 0;
    const MAX_SLOTS: Option<usize> = T::MAX_SLOTS;

    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("{} or nil", T::type_name()))
    }
}

impl<T: ToStack> ToStack for Option<T> {
    fn push_to(self, state: &State) -> Result<usize> {
        match self {
            Some(v) => v.push_to(state),
            None => {
                state.push_nil();
                Ok(1)
            }
        }
    }
}

/// An absent slot consumes nothing; an explicit `nil` consumes its slot.
impl<T: FromStack> FromStack for Option<T> {
    fn check(
        state: &State,
        index: i32,
        handler: &mut dyn FnMut(Mismatch),
        record: &mut Record,
    ) -> bool {
        match state.type_of(index) {
            Type::None => {
                record.consume(0);
                true
            }
            Type::Nil => {
                record.consume(1);
                true
            }
            _ => T::check(state, index, handler, record),
        }
    }

    fn get(state: &State, index: i32, record: &mut Record) -> Result<Self> {
        match state.type_of(index) {
            Type::None => {
                record.consume(0);
                Ok(None)
            }
            Type::Nil => {
                record.consume(1);
                Ok(None)
            }
            _ => T::get(state, index, record).map(Some),
        }
    }
}
