//! Multi-slot and zero-slot types

use std::borrow::Cow;
use std::ops::{Deref, DerefMut};

use moonbind_vm::{State, Type};

use super::{FromStack, Mismatch, Record, ToStack};
use crate::classify::{add_slots, Classify, ValueKind};
use crate::error::Result;

// ============================================================================
// Unit and nil
// ============================================================================

/// Nothing at all: pushes no values and reads none
impl Classify for () {
    const KIND: ValueKind = ValueKind::Nil;
    const MIN_SLOTS: usize = 0;
    const MAX_SLOTS: Option<usize> = Some(0);

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("nothing")
    }
}

impl ToStack for () {
    fn push_to(self, _: &State) -> Result<usize> {
        Ok(0)
    }
}

impl FromStack for () {
    fn check(_: &State, _: i32, _: &mut dyn FnMut(Mismatch), record: &mut Record) -> bool {
        record.consume(0);
        true
    }

    fn get(_: &State, _: i32, record: &mut Record) -> Result<Self> {
        record.consume(0);
        Ok(())
    }
}

/// An explicit `nil` occupying one slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Nil;

impl Classify for Nil {
    const KIND: ValueKind = ValueKind::Nil;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("nil")
    }
}

impl ToStack for Nil {
    fn push_to(self, state: &State) -> Result<usize> {
        state.push_nil();
        Ok(1)
    }
}

impl FromStack for Nil {
    fn check(
        state: &State,
        index: i32,
        handler: &mut dyn FnMut(Mismatch),
        record: &mut Record,
    ) -> bool {
        record.consume(1);
        if state.is_none_or_nil(index) {
            return true;
        }
        handler(Mismatch::at(state, index, Self::type_name()));
        false
    }

    fn get(_: &State, _: i32, record: &mut Record) -> Result<Self> {
        record.consume(1);
        Ok(Nil)
    }
}

// ============================================================================
// Calling thread
// ============================================================================

/// The thread a bound function runs on
///
/// Occupies no stack slots; as a parameter it receives the running state.
#[derive(Clone)]
pub struct ThisState(pub State);

impl Deref for ThisState {
    type Target = State;

    fn deref(&self) -> &State {
        &self.0
    }
}

impl Classify for ThisState {
    const KIND: ValueKind = ValueKind::MultiValue;
    const MIN_SLOTS: usize = 0;
    const MAX_SLOTS: Option<usize> = Some(0);

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("state")
    }
}

impl FromStack for ThisState {
    fn check(_: &State, _: i32, _: &mut dyn FnMut(Mismatch), record: &mut Record) -> bool {
        record.consume(0);
        true
    }

    fn get(state: &State, _: i32, record: &mut Record) -> Result<Self> {
        record.consume(0);
        Ok(ThisState(state.clone()))
    }
}

// ============================================================================
// Variadics
// ============================================================================

/// Every remaining slot, each read as a `T`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variadic<T>(pub Vec<T>);

impl<T> Variadic<T> {
    /// Empty variadic
    pub fn new() -> Self {
        Variadic(Vec::new())
    }
}

impl<T> Deref for Variadic<T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Vec<T> {
        &self.0
    }
}

impl<T> DerefMut for Variadic<T> {
    fn deref_mut(&mut self) -> &mut Vec<T> {
        &mut self.0
    }
}

impl<T> FromIterator<T> for Variadic<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Variadic(iter.into_iter().collect())
    }
}

impl<T: Classify> Classify for Variadic<T> {
    const KIND: ValueKind = ValueKind::MultiValue;
    const MIN_SLOTS: usize = 0;
    const MAX_SLOTS: Option<usize> = None;

    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("{}...", T::type_name()))
    }
}

impl<T: ToStack> ToStack for Variadic<T> {
    fn push_to(self, state: &State) -> Result<usize> {
        state.check_stack(self.0.len())?;
        let mut n = 0;
        for item in self.0 {
            n += item.push_to(state)?;
        }
        Ok(n)
    }
}

impl<T: FromStack> FromStack for Variadic<T> {
    fn check(
        state: &State,
        index: i32,
        handler: &mut dyn FnMut(Mismatch),
        record: &mut Record,
    ) -> bool {
        let mut local = Record::new();
        let mut ok = true;
        while state.type_of(index + local.used as i32) != Type::None {
            let before = local.used;
            if !T::check(state, index + local.used as i32, handler, &mut local) {
                ok = false;
                break;
            }
            if local.used == before {
                break;
            }
        }
        record.consume(local.used);
        ok
    }

    fn get(state: &State, index: i32, record: &mut Record) -> Result<Self> {
        let mut local = Record::new();
        let mut items = Vec::new();
        while state.type_of(index + local.used as i32) != Type::None {
            let before = local.used;
            items.push(T::get(state, index + local.used as i32, &mut local)?);
            if local.used == before {
                break;
            }
        }
        record.consume(local.used);
        Ok(Variadic(items))
    }
}

// ============================================================================
// Tuples
// ============================================================================

macro_rules! impl_tuple {
    ($($name:ident)+) => {
        impl<$($name: Classify),+> Classify for ($($name,)+) {
            const KIND: ValueKind = ValueKind::MultiValue;
            const MIN_SLOTS: usize = 0 $(+ $name::MIN_SLOTS)+;
            const MAX_SLOTS: Option<usize> = {
                let mut slots = Some(0);
                $(slots = add_slots(slots, $name::MAX_SLOTS);)+
                slots
            };

            fn type_name() -> Cow<'static, str> {
                let names = [$($name::type_name()),+];
                Cow::Owned(format!("({})", names.join(", ")))
            }
        }

        impl<$($name: ToStack),+> ToStack for ($($name,)+) {
            #[allow(non_snake_case)]
            fn push_to(self, state: &State) -> Result<usize> {
                let ($($name,)+) = self;
                let mut n = 0;
                $(n += $name.push_to(state)?;)+
                Ok(n)
            }
        }

        impl<$($name: FromStack),+> FromStack for ($($name,)+) {
            fn check(
                state: &State,
                index: i32,
                handler: &mut dyn FnMut(Mismatch),
                record: &mut Record,
            ) -> bool {
                let mut local = Record::new();
                $(
                    if !$name::check(state, index + local.used as i32, handler, &mut local) {
                        record.consume(local.used);
                        return false;
                    }
                )+
                record.consume(local.used);
                true
            }

            #[allow(non_snake_case)]
            fn get(state: &State, index: i32, record: &mut Record) -> Result<Self> {
                let mut local = Record::new();
                $(let $name = $name::get(state, index + local.used as i32, &mut local)?;)+
                record.consume(local.used);
                Ok(($($name,)+))
            }
        }
    };
}

impl_tuple!(A);
impl_tuple!(A B);
impl_tuple!(A B C);
impl_tuple!(A B C D);
impl_tuple!(A B C D E);
impl_tuple!(A B C D E F);
impl_tuple!(A B C D E F G);
impl_tuple!(A B C D E F G H);
impl_tuple!(A B C D E F G H I);
impl_tuple!(A B C D E F G H I J);
impl_tuple!(A B C D E F G H I J K);
impl_tuple!(A B C D E F G H I J K L);
