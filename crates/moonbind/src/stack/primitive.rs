//! Scalars and strings

use std::borrow::Cow;

use moonbind_vm::value::float_to_integer;
use moonbind_vm::{State, Type, Value, VmString};

use super::{FromStack, Mismatch, Record, ToStack};
use crate::classify::{Classify, ValueKind};
use crate::error::{Error, Result};
use crate::options;

// ============================================================================
// Booleans
// ============================================================================

impl Classify for bool {
    const KIND: ValueKind = ValueKind::Boolean;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("boolean")
    }
}

impl ToStack for bool {
    fn push_to(self, state: &State) -> Result<usize> {
        state.push_boolean(self);
        Ok(1)
    }
}

impl FromStack for bool {
    fn check(
        state: &State,
        index: i32,
        handler: &mut dyn FnMut(Mismatch),
        record: &mut Record,
    ) -> bool {
        record.consume(1);
        if state.type_of(index) == Type::Boolean {
            return true;
        }
        handler(Mismatch::at(state, index, Self::type_name()));
        false
    }

    /// Truthiness: everything but `nil` and `false` reads as `true`
    fn get(state: &State, index: i32, record: &mut Record) -> Result<Self> {
        record.consume(1);
        Ok(state.to_boolean(index))
    }
}

// ============================================================================
// Integers
// ============================================================================

/// Exact integer view of a number slot, if it has one
fn exact_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Number(n) => float_to_integer(*n),
        _ => None,
    }
}

macro_rules! push_integer {
    (exact, $state:expr, $v:expr) => {
        $state.push_integer($v as i64)
    };
    (wide, $state:expr, $v:expr) => {
        // Values past i64::MAX degrade to floats.
        match i64::try_from($v) {
            Ok(i) => $state.push_integer(i),
            Err(_) => $state.push_number($v as f64),
        }
    };
}

macro_rules! impl_integer {
    ($($ty:ty => $width:ident),*) => {$(
        impl Classify for $ty {
            const KIND: ValueKind = ValueKind::Primitive;

            fn type_name() -> Cow<'static, str> {
                Cow::Borrowed("integer")
            }
        }

        impl ToStack for $ty {
            fn push_to(self, state: &State) -> Result<usize> {
                push_integer!($width, state, self);
                Ok(1)
            }
        }

        impl FromStack for $ty {
            fn check(
                state: &State,
                index: i32,
                handler: &mut dyn FnMut(Mismatch),
                record: &mut Record,
            ) -> bool {
                record.consume(1);
                let value = state.value_at(index);
                let ok = if options::current(state).safe_numerics {
                    exact_integer(&value).is_some_and(|i| <$ty>::try_from(i).is_ok())
                } else {
                    value.type_of() == Type::Number
                };
                if !ok {
                    handler(Mismatch::at(state, index, Self::type_name()));
                }
                ok
            }

            fn get(state: &State, index: i32, record: &mut Record) -> Result<Self> {
                record.consume(1);
                let value = state.value_at(index);
                if options::current(state).safe_numerics {
                    let converted = exact_integer(&value)
                        .or_else(|| match &value {
                            Value::String(_) => value.to_integer(),
                            _ => None,
                        })
                        .and_then(|i| <$ty>::try_from(i).ok());
                    return converted.ok_or_else(|| {
                        Mismatch::at(state, index, Self::type_name()).into()
                    });
                }
                match value {
                    Value::Integer(i) => Ok(i as $ty),
                    Value::Number(n) => Ok(n as $ty),
                    other => other
                        .to_number()
                        .map(|n| n as $ty)
                        .ok_or_else(|| Mismatch::at(state, index, Self::type_name()).into()),
                }
            }
        }
    )*};
}

impl_integer!(
    i8 => exact,
    i16 => exact,
    i32 => exact,
    i64 => exact,
    isize => exact,
    u8 => exact,
    u16 => exact,
    u32 => exact,
    u64 => wide,
    usize => wide
);

// ============================================================================
// Floats
// ============================================================================

macro_rules! impl_float {
    ($($ty:ty),*) => {$(
        impl Classify for $ty {
            const KIND: ValueKind = ValueKind::Primitive;

            fn type_name() -> Cow<'static, str> {
                Cow::Borrowed("number")
            }
        }

        impl ToStack for $ty {
            fn push_to(self, state: &State) -> Result<usize> {
                state.push_number(self as f64);
                Ok(1)
            }
        }

        impl FromStack for $ty {
            fn check(
                state: &State,
                index: i32,
                handler: &mut dyn FnMut(Mismatch),
                record: &mut Record,
            ) -> bool {
                record.consume(1);
                if state.type_of(index) == Type::Number {
                    return true;
                }
                handler(Mismatch::at(state, index, Self::type_name()));
                false
            }

            fn get(state: &State, index: i32, record: &mut Record) -> Result<Self> {
                record.consume(1);
                state
                    .to_number(index)
                    .map(|n| n as $ty)
                    .ok_or_else(|| Mismatch::at(state, index, Self::type_name()).into())
            }
        }
    )*};
}

impl_float!(f32, f64);

// ============================================================================
// Strings
// ============================================================================

fn check_string(
    state: &State,
    index: i32,
    handler: &mut dyn FnMut(Mismatch),
    record: &mut Record,
) -> bool {
    record.consume(1);
    if state.type_of(index) == Type::String {
        return true;
    }
    handler(Mismatch::at(state, index, Cow::Borrowed("string")));
    false
}

impl Classify for String {
    const KIND: ValueKind = ValueKind::String;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("string")
    }
}

impl ToStack for String {
    fn push_to(self, state: &State) -> Result<usize> {
        state.push_string(self);
        Ok(1)
    }
}

impl FromStack for String {
    fn check(
        state: &State,
        index: i32,
        handler: &mut dyn FnMut(Mismatch),
        record: &mut Record,
    ) -> bool {
        check_string(state, index, handler, record)
    }

    /// Copies the VM buffer; numbers are converted to their string form
    fn get(state: &State, index: i32, record: &mut Record) -> Result<Self> {
        record.consume(1);
        state
            .to_string(index)
            .map(|s| s.to_string_lossy())
            .ok_or_else(|| Mismatch::at(state, index, Self::type_name()).into())
    }
}

impl Classify for &str {
    const KIND: ValueKind = ValueKind::String;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("string")
    }
}

impl ToStack for &str {
    fn push_to(self, state: &State) -> Result<usize> {
        state.push_string(self);
        Ok(1)
    }
}

impl Classify for VmString {
    const KIND: ValueKind = ValueKind::String;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("string")
    }
}

impl ToStack for VmString {
    fn push_to(self, state: &State) -> Result<usize> {
        state.push_value(Value::String(self));
        Ok(1)
    }
}

impl FromStack for VmString {
    fn check(
        state: &State,
        index: i32,
        handler: &mut dyn FnMut(Mismatch),
        record: &mut Record,
    ) -> bool {
        check_string(state, index, handler, record)
    }

    /// Shares the VM buffer instead of copying it
    fn get(state: &State, index: i32, record: &mut Record) -> Result<Self> {
        record.consume(1);
        state
            .to_string(index)
            .ok_or_else(|| Mismatch::at(state, index, Self::type_name()).into())
    }
}

// ============================================================================
// Characters
// ============================================================================

fn single_char(value: &Value) -> Option<char> {
    let s = value.as_string()?.to_str()?;
    let mut chars = s.chars();
    let c = chars.next()?;
    chars.next().is_none().then_some(c)
}

impl Classify for char {
    const KIND: ValueKind = ValueKind::String;
    const ARRAY_KIND: ValueKind = ValueKind::String;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("character")
    }
}

impl ToStack for char {
    fn push_to(self, state: &State) -> Result<usize> {
        state.push_string(self.to_string());
        Ok(1)
    }

    /// Character arrays travel as a single string
    fn push_array<const N: usize>(items: [Self; N], state: &State) -> Result<usize> {
        state.push_string(items.iter().collect::<String>());
        Ok(1)
    }
}

impl FromStack for char {
    fn check(
        state: &State,
        index: i32,
        handler: &mut dyn FnMut(Mismatch),
        record: &mut Record,
    ) -> bool {
        record.consume(1);
        if single_char(&state.value_at(index)).is_some() {
            return true;
        }
        handler(Mismatch::at(state, index, Self::type_name()));
        false
    }

    fn get(state: &State, index: i32, record: &mut Record) -> Result<Self> {
        record.consume(1);
        single_char(&state.value_at(index))
            .ok_or_else(|| Mismatch::at(state, index, Self::type_name()).into())
    }

    fn check_array<const N: usize>(
        state: &State,
        index: i32,
        handler: &mut dyn FnMut(Mismatch),
        record: &mut Record,
    ) -> bool {
        record.consume(1);
        let fits = state
            .value_at(index)
            .as_string()
            .and_then(|s| s.to_str().map(|s| s.chars().count() == N))
            .unwrap_or(false);
        if !fits {
            handler(Mismatch::at(
                state,
                index,
                Cow::Owned(format!("string of {} characters", N)),
            ));
        }
        fits
    }

    fn get_array<const N: usize>(state: &State, index: i32, record: &mut Record) -> Result<[Self; N]> {
        record.consume(1);
        let mismatch = || -> Error {
            Mismatch::at(state, index, Cow::Owned(format!("string of {} characters", N))).into()
        };
        let value = state.value_at(index);
        let text = value.as_string().and_then(|s| s.to_str()).ok_or_else(mismatch)?;
        let chars: Vec<char> = text.chars().collect();
        chars.try_into().map_err(|_| mismatch())
    }
}

// ============================================================================
// Raw values
// ============================================================================

impl Classify for Value {
    const KIND: ValueKind = ValueKind::Primitive;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("any")
    }
}

impl ToStack for Value {
    fn push_to(self, state: &State) -> Result<usize> {
        state.push_value(self);
        Ok(1)
    }
}

impl FromStack for Value {
    fn check(_: &State, _: i32, _: &mut dyn FnMut(Mismatch), record: &mut Record) -> bool {
        record.consume(1);
        true
    }

    fn get(state: &State, index: i32, record: &mut Record) -> Result<Self> {
        record.consume(1);
        Ok(state.value_at(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{install, Options};
    use crate::stack::{check, check_get, get, push};
    use moonbind_vm::Vm;

    #[test]
    fn test_integer_exactness() {
        let vm = Vm::new();
        vm.push_number(3.0);
        vm.push_number(3.5);
        vm.push_integer(300);
        assert!(check::<i32>(&vm, 1));
        assert_eq!(get::<i32>(&vm, 1).unwrap(), 3);
        assert!(!check::<i32>(&vm, 2));
        assert!(get::<i32>(&vm, 2).is_err());
        assert!(!check::<u8>(&vm, 3));
        assert!(check::<u16>(&vm, 3));
    }

    #[test]
    fn test_unchecked_numerics_truncate() {
        let vm = Vm::new();
        install(&vm, Options::unchecked());
        vm.push_number(3.75);
        vm.push_integer(300);
        assert!(check::<i32>(&vm, 1));
        assert_eq!(get::<i32>(&vm, 1).unwrap(), 3);
        assert_eq!(get::<u8>(&vm, 2).unwrap(), 44);
    }

    #[test]
    fn test_large_unsigned_pushes_float() {
        let vm = Vm::new();
        push(&vm, u64::MAX).unwrap();
        assert!(matches!(vm.value_at(1), Value::Number(_)));
        push(&vm, 5u64).unwrap();
        assert!(matches!(vm.value_at(2), Value::Integer(5)));
        push(&vm, usize::MAX).unwrap();
        assert!(matches!(vm.value_at(3), Value::Number(_)));
    }

    #[test]
    fn test_narrow_integers_push_exactly() {
        let vm = Vm::new();
        push(&vm, i8::MIN).unwrap();
        push(&vm, u32::MAX).unwrap();
        push(&vm, i64::MIN).unwrap();
        push(&vm, -1isize).unwrap();
        assert!(matches!(vm.value_at(1), Value::Integer(-128)));
        assert!(matches!(vm.value_at(2), Value::Integer(i) if i == u32::MAX as i64));
        assert!(matches!(vm.value_at(3), Value::Integer(i64::MIN)));
        assert!(matches!(vm.value_at(4), Value::Integer(-1)));
    }

    #[test]
    fn test_strings_are_strict_on_check() {
        let vm = Vm::new();
        vm.push_integer(12);
        vm.push_string("hi");
        assert!(!check::<String>(&vm, 1));
        assert_eq!(get::<String>(&vm, 1).unwrap(), "12");
        assert_eq!(get::<String>(&vm, 2).unwrap(), "hi");
        let view: VmString = get(&vm, 2).unwrap();
        assert!(view.ptr_eq(vm.value_at(2).as_string().unwrap()));
    }

    #[test]
    fn test_char_and_char_arrays() {
        let vm = Vm::new();
        push(&vm, 'x').unwrap();
        push(&vm, ['a', 'b', 'c']).unwrap();
        assert_eq!(vm.type_of(2), Type::String);
        assert_eq!(get::<char>(&vm, 1).unwrap(), 'x');
        assert_eq!(get::<[char; 3]>(&vm, 2).unwrap(), ['a', 'b', 'c']);
        assert!(!check::<[char; 2]>(&vm, 2));
        assert!(!check::<char>(&vm, 2));
    }

    #[test]
    fn test_bool_check_vs_get() {
        let vm = Vm::new();
        vm.push_integer(0);
        assert!(!check::<bool>(&vm, 1));
        assert!(get::<bool>(&vm, 1).unwrap());
        assert_eq!(check_get::<bool>(&vm, 1), None);
    }
}
