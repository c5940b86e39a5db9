//! Stack marshalling
//!
//! Values move between Rust and the VM through three operations:
//!
//! - [`ToStack::push_to`] writes a value and reports how many slots it used
//! - [`FromStack::check`] validates slots without constructing anything
//! - [`FromStack::get`] constructs a value from slots
//!
//! # Tracking
//!
//! Every `check` and `get` carries a [`Record`] that accumulates the slots
//! consumed. Tuples, variadics and absent optionals do not occupy a fixed
//! number of slots, so the position of the next argument is always computed
//! from the running total:
//!
//! ```text
//!   index:   1        2        3        4
//!          ┌────────┬────────┬────────┬────────┐
//!          │ number │ number │ string │  nil   │
//!          └────────┴────────┴────────┴────────┘
//!   (f64, f64) ─────────────►│ used = 2
//!                            String ──►│ used = 3
//!                                      Option<i32> ──► used = 4
//! ```
//!
//! Multi-slot reads take absolute (positive) indices; the free functions in
//! this module normalize top-relative indices before delegating.

mod container;
mod multi;
mod primitive;

pub use multi::{Nil, ThisState, Variadic};

use std::borrow::Cow;

use moonbind_vm::{State, TableRef, Type, Value};

use crate::classify::Classify;
use crate::error::{Error, Result};

// ============================================================================
// Tracking record
// ============================================================================

/// Slots consumed by a sequence of reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Record {
    /// Slots consumed by the most recent read
    pub last: usize,
    /// Slots consumed in total
    pub used: usize,
}

impl Record {
    /// Fresh record
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for a read that consumed `n` slots
    pub fn consume(&mut self, n: usize) {
        self.last = n;
        self.used += n;
    }
}

// ============================================================================
// Check failures
// ============================================================================

/// A failed check, reported to the check handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Frame-relative index of the offending slot
    pub index: i32,
    /// Expected type name
    pub expected: Cow<'static, str>,
    /// Type name found in the slot
    pub actual: Cow<'static, str>,
}

impl Mismatch {
    /// Mismatch against whatever currently sits at `index`
    pub fn at(state: &State, index: i32, expected: Cow<'static, str>) -> Self {
        Mismatch {
            index,
            expected,
            actual: actual_type_name(state, index),
        }
    }
}

impl From<Mismatch> for Error {
    fn from(m: Mismatch) -> Self {
        Error::TypeMismatch {
            index: m.index,
            expected: m.expected.into_owned(),
            actual: m.actual.into_owned(),
        }
    }
}

/// Check handler that ignores failures
pub fn no_panic(_: Mismatch) {}

/// Type name of the value at `index`, preferring a userdata's `__name`
pub fn actual_type_name(state: &State, index: i32) -> Cow<'static, str> {
    let value = state.value_at(index);
    if let Value::Userdata(_) = value {
        if let Some(name) = state
            .metatable_of(&value)
            .and_then(|mt| mt.get_str("__name").as_string().map(|s| s.to_string_lossy()))
        {
            return Cow::Owned(name);
        }
    }
    Cow::Borrowed(state.type_of(index).name())
}

// ============================================================================
// Traits
// ============================================================================

/// Types that can be pushed onto the stack
pub trait ToStack: Classify + Sized {
    /// Push `self`, returning the number of slots written
    fn push_to(self, state: &State) -> Result<usize>;

    /// Push a fixed-size array of `Self`
    ///
    /// Arrays become sequence tables unless the element type overrides this.
    fn push_array<const N: usize>(items: [Self; N], state: &State) -> Result<usize> {
        let table = TableRef::new();
        for (i, item) in items.into_iter().enumerate() {
            let value = to_value(state, item)?;
            table.borrow_mut().set_int(i as i64 + 1, value);
        }
        state.push_value(Value::Table(table));
        Ok(1)
    }
}

/// Types that can be read from the stack
pub trait FromStack: Classify + Sized {
    /// Validate the slots at `index` without constructing a value
    ///
    /// Reports the first failure to `handler`. The record advances by the
    /// slots examined whether or not the check succeeds.
    fn check(
        state: &State,
        index: i32,
        handler: &mut dyn FnMut(Mismatch),
        record: &mut Record,
    ) -> bool;

    /// Construct a value from the slots at `index`
    fn get(state: &State, index: i32, record: &mut Record) -> Result<Self>;

    /// Check, then get
    fn check_get(
        state: &State,
        index: i32,
        handler: &mut dyn FnMut(Mismatch),
        record: &mut Record,
    ) -> Option<Self> {
        let mut trial = Record::new();
        if !Self::check(state, index, handler, &mut trial) {
            record.consume(trial.used);
            return None;
        }
        match Self::get(state, index, record) {
            Ok(v) => Some(v),
            Err(_) => {
                handler(Mismatch::at(state, index, Self::type_name()));
                None
            }
        }
    }

    /// Validate a fixed-size array of `Self`
    fn check_array<const N: usize>(
        state: &State,
        index: i32,
        handler: &mut dyn FnMut(Mismatch),
        record: &mut Record,
    ) -> bool {
        record.consume(1);
        if state.type_of(index) == Type::Table {
            return true;
        }
        handler(Mismatch::at(state, index, Cow::Borrowed("table")));
        false
    }

    /// Read a fixed-size array of `Self`
    fn get_array<const N: usize>(state: &State, index: i32, record: &mut Record) -> Result<[Self; N]> {
        record.consume(1);
        let table = state.to_table(index).ok_or_else(|| {
            Error::from(Mismatch::at(state, index, Cow::Borrowed("table")))
        })?;
        let mut items = Vec::with_capacity(N);
        for i in 1..=N {
            let element = table.borrow().get_int(i as i64);
            items.push(element_from_value(state, index, i, element)?);
        }
        items.try_into().map_err(|items: Vec<Self>| Error::TypeMismatch {
            index,
            expected: format!("table of {} elements", N),
            actual: format!("table of {} elements", items.len()),
        })
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Push `value`, returning the number of slots written
pub fn push<T: ToStack>(state: &State, value: T) -> Result<usize> {
    state.check_stack(T::MAX_SLOTS.unwrap_or(1))?;
    value.push_to(state)
}

/// Read a `T` at `index` without validating first
pub fn get<T: FromStack>(state: &State, index: i32) -> Result<T> {
    get_with(state, index, &mut Record::new())
}

/// Read a `T` at `index`, accumulating consumed slots into `record`
pub fn get_with<T: FromStack>(state: &State, index: i32, record: &mut Record) -> Result<T> {
    T::get(state, state.abs_index(index), record)
}

/// Whether the slots at `index` hold a `T`
pub fn check<T: FromStack>(state: &State, index: i32) -> bool {
    check_with::<T>(state, index, &mut no_panic)
}

/// Whether the slots at `index` hold a `T`, reporting failures to `handler`
pub fn check_with<T: FromStack>(
    state: &State,
    index: i32,
    handler: &mut dyn FnMut(Mismatch),
) -> bool {
    T::check(state, state.abs_index(index), handler, &mut Record::new())
}

/// Read a `T` at `index` if it validates
pub fn check_get<T: FromStack>(state: &State, index: i32) -> Option<T> {
    T::check_get(
        state,
        state.abs_index(index),
        &mut no_panic,
        &mut Record::new(),
    )
}

/// Validate then read a `T` at `index`, turning the first failure into an error
pub fn checked_get<T: FromStack>(state: &State, index: i32) -> Result<T> {
    let index = state.abs_index(index);
    let mut failure = None;
    if !T::check(state, index, &mut |m| {
        failure.get_or_insert(m);
    }, &mut Record::new())
    {
        return Err(failure
            .map(Error::from)
            .unwrap_or_else(|| Mismatch::at(state, index, T::type_name()).into()));
    }
    T::get(state, index, &mut Record::new())
}

/// Read a `T` from the top of the stack and pop the slots it used
pub fn pop<T: FromStack>(state: &State) -> Result<T> {
    let top = state.top();
    let slots = T::MAX_SLOTS.map_or(top, |n| n as i32).min(top);
    let index = top - slots + 1;
    let result = T::get(state, index, &mut Record::new());
    state.set_top(index - 1);
    result
}

// ============================================================================
// Value conversion helpers
// ============================================================================

/// Convert a Rust value into a single VM value
///
/// Multi-slot values keep their first slot; zero-slot values become `nil`.
pub fn to_value<T: ToStack>(state: &State, value: T) -> Result<Value> {
    let top = state.top();
    let pushed = value.push_to(state);
    let first = match pushed {
        Ok(0) => Ok(Value::Nil),
        Ok(_) => Ok(state.value_at(top + 1)),
        Err(e) => Err(e),
    };
    state.set_top(top);
    first
}

/// Convert a VM value into a Rust value
pub fn from_value<T: FromStack>(state: &State, value: Value) -> Result<T> {
    state.push_value(value);
    let index = state.top();
    let result = T::get(state, index, &mut Record::new());
    state.set_top(index - 1);
    result
}

/// Whether a VM value validates as a `T`
pub fn value_is<T: FromStack>(state: &State, value: Value) -> bool {
    state.push_value(value);
    let index = state.top();
    let ok = T::check(state, index, &mut no_panic, &mut Record::new());
    state.set_top(index - 1);
    ok
}

/// Convert one element of a container table, blaming the container's slot
pub(crate) fn element_from_value<T: FromStack>(
    state: &State,
    container: i32,
    position: impl std::fmt::Display,
    value: Value,
) -> Result<T> {
    let actual = value.type_name();
    from_value(state, value).map_err(|e| match e {
        Error::TypeMismatch { expected, .. } => Error::TypeMismatch {
            index: container,
            expected: format!("{} at [{}]", expected, position),
            actual: format!("{} at [{}]", actual, position),
        },
        other => other,
    })
}
