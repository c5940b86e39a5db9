//! Stack conversions for bound objects
//!
//! | Rust type        | Kind            | Push                     | Read                 |
//! |------------------|-----------------|--------------------------|----------------------|
//! | `T: Usertype`    | ValueUserdata   | moves into a new block   | clones (`T: Clone`)  |
//! | `Ptr<T>`         | PointerRef      | stores the pointer only  | address of the object|
//! | `Unique<T>`      | OwningPointer   | moves the box in         | not readable         |
//! | `Shared<T>`      | OwningPointer   | shares the cell          | the same cell        |
//! | `UserRef<T>`     | PointerRef      | the same block           | borrow handle        |
//!
//! Reads of `T`, `Ptr<T>` and `UserRef<T>` accept any object whose dynamic
//! type is `T` or derives from it; `Shared<T>` requires the exact cell type.

use std::any::TypeId;
use std::borrow::Cow;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::rc::Rc;

use moonbind_vm::{State, Value};

use super::core::View;
use super::registry::{core_for, registered_name, TypeRegistry};
use super::userbox::{
    is_destroyed_object, user_box, PtrHolder, SharedHolder, UniqueHolder, UserBox, ValueHolder,
};
use super::{short_type_name, Usertype};
use crate::classify::{Classify, ValueKind};
use crate::error::{Error, Result};
use crate::inheritance::CastPath;
use crate::stack::{FromStack, Mismatch, Record, ToStack};

// ============================================================================
// Resolution
// ============================================================================

fn expected_name<T: 'static>(state: &State) -> Cow<'static, str> {
    match registered_name::<T>(state) {
        Some(name) => Cow::Owned(name.to_string()),
        None => Cow::Borrowed(short_type_name::<T>()),
    }
}

fn lookup<T: 'static>(state: &State, value: &Value) -> Option<(Rc<UserBox>, CastPath)> {
    let boxed = user_box(value)?;
    let path = TypeRegistry::of(state).cast_path(boxed.dynamic_type(), TypeId::of::<T>())?;
    Some((boxed, path))
}

/// Whether the slot at `index` holds an object viewable as a `T`
pub(crate) fn check_object<T: 'static>(
    state: &State,
    index: i32,
    handler: &mut dyn FnMut(Mismatch),
) -> bool {
    let value = state.value_at(index);
    if lookup::<T>(state, &value).is_some() {
        return true;
    }
    let mut mismatch = Mismatch::at(state, index, expected_name::<T>(state));
    if is_destroyed_object(&value) {
        mismatch.actual = Cow::Owned(format!("destroyed {}", mismatch.actual));
    }
    handler(mismatch);
    false
}

/// The box of the object at `index` and the cast to reach its `T` part
pub(crate) fn resolve<T: 'static>(state: &State, index: i32) -> Result<(Rc<UserBox>, CastPath)> {
    let value = state.value_at(index);
    if let Some(found) = lookup::<T>(state, &value) {
        return Ok(found);
    }
    if is_destroyed_object(&value) {
        return Err(Error::runtime(format!(
            "stack index {}: '{}' object has been destroyed",
            index,
            expected_name::<T>(state)
        )));
    }
    Err(Mismatch::at(state, index, expected_name::<T>(state)).into())
}

fn check_slot<T: 'static>(
    state: &State,
    index: i32,
    handler: &mut dyn FnMut(Mismatch),
    record: &mut Record,
) -> bool {
    record.consume(1);
    check_object::<T>(state, index, handler)
}

fn push_boxed<T: Usertype>(state: &State, holder: Box<dyn super::userbox::Holder>, view: View) -> Result<usize> {
    let core = core_for::<T>(state)?;
    let kind = match view {
        View::Value => ValueKind::ValueUserdata,
        View::Pointer => ValueKind::PointerRef,
        View::Unique | View::Shared => ValueKind::OwningPointer,
    };
    let boxed = UserBox::new::<T>(holder, kind, core.name.clone());
    core.push_object(state, boxed, view)
}

// ============================================================================
// By value
// ============================================================================

impl<T: Usertype> Classify for T {
    const KIND: ValueKind = ValueKind::ValueUserdata;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed(T::default_name())
    }
}

impl<T: Usertype> ToStack for T {
    fn push_to(self, state: &State) -> Result<usize> {
        push_boxed::<T>(state, Box::new(ValueHolder(RefCell::new(self))), View::Value)
    }
}

/// Reads copy the object out of its block
impl<T: Usertype + Clone> FromStack for T {
    fn check(
        state: &State,
        index: i32,
        handler: &mut dyn FnMut(Mismatch),
        record: &mut Record,
    ) -> bool {
        check_slot::<T>(state, index, handler, record)
    }

    fn get(state: &State, index: i32, record: &mut Record) -> Result<Self> {
        record.consume(1);
        let (boxed, path) = resolve::<T>(state, index)?;
        let value = boxed.borrow_as::<T>(&path)?.clone();
        Ok(value)
    }
}

// ============================================================================
// Non-owning pointers
// ============================================================================

/// Non-owning pointer to an object that lives outside the VM
///
/// Pushing a `Ptr` never moves or copies the object; the block only records
/// the address and runs no destructor.
pub struct Ptr<T>(NonNull<T>);

impl<T> Ptr<T> {
    /// Wrap a raw pointer; `None` if it is null
    ///
    /// # Safety
    ///
    /// The pointee must stay valid, and must not be accessed by other means,
    /// for as long as the VM can reach it.
    pub unsafe fn new(ptr: *mut T) -> Option<Self> {
        NonNull::new(ptr).map(Ptr)
    }

    /// Wrap a mutable reference
    ///
    /// # Safety
    ///
    /// As for [`Ptr::new`].
    pub unsafe fn from_mut(obj: &mut T) -> Self {
        Ptr(NonNull::from(obj))
    }

    /// The address
    pub fn as_ptr(&self) -> *mut T {
        self.0.as_ptr()
    }

    /// Borrow the pointee
    ///
    /// # Safety
    ///
    /// The pointee must still be alive and not mutably aliased.
    pub unsafe fn as_ref<'a>(&self) -> &'a T {
        &*self.0.as_ptr()
    }
}

impl<T> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Ptr<T> {}

impl<T> PartialEq for Ptr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T> fmt::Debug for Ptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ptr({:p})", self.0)
    }
}

impl<T: Usertype> Classify for Ptr<T> {
    const KIND: ValueKind = ValueKind::PointerRef;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed(T::default_name())
    }
}

impl<T: Usertype> ToStack for Ptr<T> {
    fn push_to(self, state: &State) -> Result<usize> {
        let holder = PtrHolder {
            ptr: self.0,
            guard: RefCell::new(()),
        };
        push_boxed::<T>(state, Box::new(holder), View::Pointer)
    }
}

/// Reads yield the address of the `T` part of any compatible object
impl<T: Usertype> FromStack for Ptr<T> {
    fn check(
        state: &State,
        index: i32,
        handler: &mut dyn FnMut(Mismatch),
        record: &mut Record,
    ) -> bool {
        check_slot::<T>(state, index, handler, record)
    }

    fn get(state: &State, index: i32, record: &mut Record) -> Result<Self> {
        record.consume(1);
        let (boxed, path) = resolve::<T>(state, index)?;
        let mut obj = boxed.borrow_mut_as::<T>(&path)?;
        Ok(Ptr(NonNull::from(&mut *obj)))
    }
}

// ============================================================================
// Owning pointers
// ============================================================================

/// Boxed object handed over to the VM
///
/// The block takes ownership of the box; the destructor runs when the block
/// is collected.
pub struct Unique<T>(pub Box<T>);

impl<T> Unique<T> {
    /// Box `value`
    pub fn new(value: T) -> Self {
        Unique(Box::new(value))
    }
}

impl<T: Usertype> Classify for Unique<T> {
    const KIND: ValueKind = ValueKind::OwningPointer;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed(T::default_name())
    }
}

impl<T: Usertype> ToStack for Unique<T> {
    fn push_to(self, state: &State) -> Result<usize> {
        push_boxed::<T>(state, Box::new(UniqueHolder(RefCell::new(self.0))), View::Unique)
    }
}

/// Object shared between Rust and the VM
pub type Shared<T> = Rc<RefCell<T>>;

impl<T: Usertype> Classify for Rc<RefCell<T>> {
    const KIND: ValueKind = ValueKind::OwningPointer;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed(T::default_name())
    }
}

impl<T: Usertype> ToStack for Rc<RefCell<T>> {
    fn push_to(self, state: &State) -> Result<usize> {
        push_boxed::<T>(state, Box::new(SharedHolder(self)), View::Shared)
    }
}

impl<T: Usertype> FromStack for Rc<RefCell<T>> {
    fn check(
        state: &State,
        index: i32,
        handler: &mut dyn FnMut(Mismatch),
        record: &mut Record,
    ) -> bool {
        record.consume(1);
        if user_box(&state.value_at(index)).is_some_and(|b| b.shared::<T>().is_some()) {
            return true;
        }
        handler(Mismatch::at(state, index, Self::type_name()));
        false
    }

    fn get(state: &State, index: i32, record: &mut Record) -> Result<Self> {
        record.consume(1);
        user_box(&state.value_at(index))
            .and_then(|b| b.shared::<T>())
            .ok_or_else(|| Mismatch::at(state, index, Self::type_name()).into())
    }
}

// ============================================================================
// Borrow handles
// ============================================================================

/// Shared access to a bound object argument
///
/// Holds the object alive; borrows are taken on demand and checked at
/// runtime.
pub struct UserRef<T> {
    value: Value,
    boxed: Rc<UserBox>,
    path: CastPath,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> UserRef<T> {
    /// Borrow the `T` part of the object
    pub fn borrow(&self) -> Result<Ref<'_, T>> {
        self.boxed.borrow_as::<T>(&self.path)
    }

    /// Dynamic type name of the object
    pub fn type_name(&self) -> &str {
        self.boxed.name()
    }

    /// The object as a VM value
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// `value` as a `T` object, or `None` when it is anything else
    pub(crate) fn from_value(state: &State, value: &Value) -> Option<Self> {
        let (boxed, path) = lookup::<T>(state, value)?;
        Some(UserRef {
            value: value.clone(),
            boxed,
            path,
            _marker: PhantomData,
        })
    }

    fn read(state: &State, index: i32) -> Result<Self> {
        let (boxed, path) = resolve::<T>(state, index)?;
        Ok(UserRef {
            value: state.value_at(index),
            boxed,
            path,
            _marker: PhantomData,
        })
    }
}

impl<T> Clone for UserRef<T> {
    fn clone(&self) -> Self {
        UserRef {
            value: self.value.clone(),
            boxed: self.boxed.clone(),
            path: self.path.clone(),
            _marker: PhantomData,
        }
    }
}

/// Exclusive access to a bound object argument
pub struct UserRefMut<T>(UserRef<T>);

impl<T: 'static> UserRefMut<T> {
    /// Borrow the `T` part of the object
    pub fn borrow(&self) -> Result<Ref<'_, T>> {
        self.0.borrow()
    }

    /// Mutably borrow the `T` part of the object
    pub fn borrow_mut(&self) -> Result<RefMut<'_, T>> {
        self.0.boxed.borrow_mut_as::<T>(&self.0.path)
    }

    /// The object as a VM value
    pub fn value(&self) -> &Value {
        &self.0.value
    }
}

macro_rules! impl_user_ref {
    ($($ty:ident => $wrap:expr),*) => {$(
        impl<T: 'static> Classify for $ty<T> {
            const KIND: ValueKind = ValueKind::PointerRef;

            fn type_name() -> Cow<'static, str> {
                Cow::Borrowed(short_type_name::<T>())
            }
        }

        impl<T: 'static> ToStack for $ty<T> {
            fn push_to(self, state: &State) -> Result<usize> {
                Value::push_to(self.value().clone(), state)
            }
        }

        impl<T: 'static> FromStack for $ty<T> {
            fn check(
                state: &State,
                index: i32,
                handler: &mut dyn FnMut(Mismatch),
                record: &mut Record,
            ) -> bool {
                check_slot::<T>(state, index, handler, record)
            }

            fn get(state: &State, index: i32, record: &mut Record) -> Result<Self> {
                record.consume(1);
                UserRef::read(state, index).map($wrap)
            }
        }
    )*};
}

impl_user_ref!(UserRef => |r| r, UserRefMut => UserRefMut);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{check, get, push};
    use moonbind_vm::Vm;

    #[derive(Debug, Clone, PartialEq)]
    struct Gauge {
        level: i32,
    }

    impl Usertype for Gauge {}

    #[test]
    fn test_value_round_trip() {
        let vm = Vm::new();
        push(&vm, Gauge { level: 3 }).unwrap();
        assert!(check::<Gauge>(&vm, -1));
        assert!(!check::<Gauge>(&vm, 5));
        let back: Gauge = get(&vm, -1).unwrap();
        assert_eq!(back, Gauge { level: 3 });
        assert_eq!(crate::stack::actual_type_name(&vm, -1), "Gauge");
    }

    #[test]
    fn test_pointer_aliases_object() {
        let vm = Vm::new();
        let mut gauge = Gauge { level: 1 };
        push(&vm, unsafe { Ptr::from_mut(&mut gauge) }).unwrap();
        {
            let r: UserRefMut<Gauge> = get(&vm, -1).unwrap();
            r.borrow_mut().unwrap().level = 9;
        }
        vm.pop(1);
        vm.collect_garbage();
        assert_eq!(gauge.level, 9);
    }

    #[test]
    fn test_shared_cell_identity() {
        let vm = Vm::new();
        let cell: Shared<Gauge> = Rc::new(RefCell::new(Gauge { level: 4 }));
        push(&vm, cell.clone()).unwrap();
        let back: Shared<Gauge> = get(&vm, -1).unwrap();
        assert!(Rc::ptr_eq(&cell, &back));

        push(&vm, Gauge { level: 4 }).unwrap();
        assert!(!check::<Shared<Gauge>>(&vm, -1));
        assert!(check::<Gauge>(&vm, -2));
    }

    #[test]
    fn test_unique_reads_as_value() {
        let vm = Vm::new();
        push(&vm, Unique::new(Gauge { level: 7 })).unwrap();
        let copy: Gauge = get(&vm, -1).unwrap();
        assert_eq!(copy.level, 7);
        let r: UserRef<Gauge> = get(&vm, -1).unwrap();
        assert_eq!(r.borrow().unwrap().level, 7);
        assert_eq!(r.type_name(), "Gauge");
    }

    #[test]
    fn test_borrow_conflict_is_an_error() {
        let vm = Vm::new();
        push(&vm, Gauge { level: 0 }).unwrap();
        let a: UserRefMut<Gauge> = get(&vm, -1).unwrap();
        let b: UserRefMut<Gauge> = get(&vm, -1).unwrap();
        let _held = a.borrow_mut().unwrap();
        assert!(matches!(b.borrow_mut(), Err(Error::BorrowConflict { .. })));
    }

    #[test]
    fn test_wrong_object_type_mismatch() {
        #[derive(Clone)]
        struct Other;
        impl Usertype for Other {}

        let vm = Vm::new();
        push(&vm, Other).unwrap();
        let err = get::<Gauge>(&vm, -1).err().map(|e| e.to_string()).unwrap_or_default();
        assert_eq!(err, "stack index 1, expected Gauge, received Other");
    }
}
