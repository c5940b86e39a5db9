//! Registry-anchored references
//!
//! A [`Reference`] keeps a VM value alive from Rust by holding a registry
//! slot. The slot is released when the reference is dropped; dropping after
//! the VM has closed does nothing. References hold the VM weakly, so they
//! never keep a closed instance's memory around.

use std::fmt;

use moonbind_vm::{State, Type, Value, WeakState, REF_NIL};

use crate::error::{Error, Result};

/// A VM value anchored in the registry
pub struct Reference {
    state: WeakState,
    slot: i64,
}

impl Reference {
    /// Anchor `value` in the registry of the VM `state` belongs to
    pub fn new(state: &State, value: Value) -> Self {
        let main = state.main_thread().unwrap_or_else(|| state.clone());
        main.push_value(value);
        let slot = main.reference();
        Reference {
            state: main.downgrade(),
            slot,
        }
    }

    /// Anchor the value at `index`
    pub fn from_stack(state: &State, index: i32) -> Self {
        Reference::new(state, state.value_at(index))
    }

    /// Registry slot, [`REF_NIL`] for `nil`
    pub fn slot(&self) -> i64 {
        self.slot
    }

    /// Main thread of the owning VM, unless it has closed
    pub fn state(&self) -> Result<State> {
        match self.state.upgrade() {
            Some(state) if !state.is_closed() => Ok(state),
            _ => Err(Error::runtime("the VM instance has been closed")),
        }
    }

    /// Whether the owning VM is still open
    pub fn is_valid(&self) -> bool {
        self.state().is_ok()
    }

    /// The referenced value
    pub fn value(&self) -> Result<Value> {
        Ok(self.state()?.dereference(self.slot))
    }

    /// Push the referenced value onto `state`
    pub fn push(&self, state: &State) -> Result<usize> {
        state.push_value(self.value()?);
        Ok(1)
    }

    /// Type of the referenced value
    pub fn type_of(&self) -> Type {
        self.value().map_or(Type::None, |v| v.type_of())
    }
}

impl Clone for Reference {
    fn clone(&self) -> Self {
        match self.state() {
            Ok(state) => Reference::new(&state, state.dereference(self.slot)),
            Err(_) => Reference {
                state: self.state.clone(),
                slot: REF_NIL,
            },
        }
    }
}

impl Drop for Reference {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.unreference(self.slot);
        }
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("slot", &self.slot)
            .field("type", &self.type_of().name())
            .finish()
    }
}

/// Display form of an error object surfaced to Rust
pub(crate) fn describe(state: &State, value: &Value) -> String {
    match state.to_display_string(value) {
        Ok(s) => s.to_string_lossy(),
        Err(_) => value.type_name().to_string(),
    }
}

/// Implements the stack traits for a reference-backed handle
///
/// `$accepts` decides which values the handle can be read from.
macro_rules! impl_handle {
    ($handle:ident, $kind:ident, $name:expr, $accepts:expr) => {
        impl $crate::classify::Classify for $handle {
            const KIND: $crate::classify::ValueKind = $crate::classify::ValueKind::$kind;

            fn type_name() -> ::std::borrow::Cow<'static, str> {
                ::std::borrow::Cow::Borrowed($name)
            }
        }

        impl $crate::stack::ToStack for $handle {
            fn push_to(self, state: &::moonbind_vm::State) -> $crate::error::Result<usize> {
                self.reference().push(state)
            }
        }

        impl $crate::stack::FromStack for $handle {
            fn check(
                state: &::moonbind_vm::State,
                index: i32,
                handler: &mut dyn FnMut($crate::stack::Mismatch),
                record: &mut $crate::stack::Record,
            ) -> bool {
                record.consume(1);
                let accepts: fn(&::moonbind_vm::Value) -> bool = $accepts;
                if accepts(&state.value_at(index)) {
                    return true;
                }
                let expected = <Self as $crate::classify::Classify>::type_name();
                handler($crate::stack::Mismatch::at(state, index, expected));
                false
            }

            fn get(
                state: &::moonbind_vm::State,
                index: i32,
                record: &mut $crate::stack::Record,
            ) -> $crate::error::Result<Self> {
                record.consume(1);
                let value = state.value_at(index);
                let accepts: fn(&::moonbind_vm::Value) -> bool = $accepts;
                if !accepts(&value) {
                    let expected = <Self as $crate::classify::Classify>::type_name();
                    return Err($crate::stack::Mismatch::at(state, index, expected).into());
                }
                Ok(Self::from_reference(state, $crate::reference::Reference::new(state, value)))
            }
        }
    };
}

pub(crate) use impl_handle;

// ============================================================================
// Object
// ============================================================================

/// Any VM value held from Rust
#[derive(Debug, Clone)]
pub struct Object(Reference);

impl Object {
    pub(crate) fn from_reference(_: &State, reference: Reference) -> Self {
        Object(reference)
    }

    /// Anchor `value`
    pub fn new(state: &State, value: Value) -> Self {
        Object(Reference::new(state, value))
    }

    /// The underlying reference
    pub fn reference(&self) -> &Reference {
        &self.0
    }

    /// The value
    pub fn value(&self) -> Result<Value> {
        self.0.value()
    }

    /// Type of the value
    pub fn type_of(&self) -> Type {
        self.0.type_of()
    }

    /// Convert the value into a Rust value
    pub fn get<T: crate::stack::FromStack>(&self) -> Result<T> {
        let state = self.0.state()?;
        crate::stack::from_value(&state, self.0.value()?)
    }

    /// Whether the value validates as a `T`
    pub fn is<T: crate::stack::FromStack>(&self) -> bool {
        match (self.0.state(), self.0.value()) {
            (Ok(state), Ok(value)) => crate::stack::value_is::<T>(&state, value),
            _ => false,
        }
    }
}

impl_handle!(Object, Primitive, "any", |_| true);

#[cfg(test)]
mod tests {
    use super::*;
    use moonbind_vm::Vm;

    #[test]
    fn test_reference_keeps_value() {
        let vm = Vm::new();
        let r = Reference::new(&vm, Value::from("kept"));
        assert!(r.slot() > 0);
        assert_eq!(r.type_of(), Type::String);
        assert_eq!(vm.top(), 0);
        let copy = r.clone();
        assert_ne!(copy.slot(), r.slot());
        drop(r);
        assert_eq!(copy.value().unwrap().as_string().unwrap().to_str(), Some("kept"));
    }

    #[test]
    fn test_nil_takes_no_slot() {
        let vm = Vm::new();
        let r = Reference::new(&vm, Value::Nil);
        assert_eq!(r.slot(), REF_NIL);
        assert!(r.value().unwrap().is_nil());
    }

    #[test]
    fn test_release_after_close() {
        let vm = Vm::new();
        let r = Reference::new(&vm, Value::Integer(1));
        drop(vm);
        assert!(!r.is_valid());
        assert!(r.value().is_err());
        drop(r);
    }

    #[test]
    fn test_object_conversions() {
        let vm = Vm::new();
        let o = Object::new(&vm, Value::Integer(5));
        assert_eq!(o.get::<i32>().unwrap(), 5);
        assert!(o.is::<f64>());
        assert!(!o.is::<String>());
    }
}
