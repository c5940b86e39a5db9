//! Native object storage inside userdata blocks
//!
//! Every bound object lives behind a [`UserBox`], the payload of its VM
//! userdata block. The box records the dynamic type and hides how the object
//! is owned:
//!
//! ```text
//!   UserBox
//!   ├── holder ──► ValueHolder   RefCell<T>          (copied in)
//!   │              UniqueHolder  RefCell<Box<T>>     (Unique<T>)
//!   │              SharedHolder  Rc<RefCell<T>>      (Shared<T>)
//!   │              PtrHolder     NonNull<T> + guard  (Ptr<T>)
//!   ├── kind       ValueUserdata / OwningPointer / PointerRef
//!   ├── type_id    dynamic type, the start of every cast
//!   └── name       registered usertype name
//! ```
//!
//! All holders hand out `RefCell`-style guards, so aliasing is checked at
//! runtime no matter how the object is owned.

use std::any::{Any, TypeId};
use std::cell::{BorrowError, BorrowMutError, Ref, RefCell, RefMut};
use std::ptr::NonNull;
use std::rc::Rc;

use moonbind_vm::{TypeTag, Value};
use tracing::warn;

use super::core::Destructor;
use crate::classify::ValueKind;
use crate::error::{Error, Result};
use crate::inheritance::CastPath;

/// Ownership strategy of a boxed object
pub(crate) trait Holder: 'static {
    fn get(&self) -> std::result::Result<Ref<'_, dyn Any>, BorrowError>;

    fn get_mut(&self) -> std::result::Result<RefMut<'_, dyn Any>, BorrowMutError>;

    /// The shared cell, for holders that have one
    fn shared(&self) -> Option<Rc<dyn Any>> {
        None
    }
}

pub(crate) struct ValueHolder<T>(pub(crate) RefCell<T>);

impl<T: 'static> Holder for ValueHolder<T> {
    fn get(&self) -> std::result::Result<Ref<'_, dyn Any>, BorrowError> {
        self.0.try_borrow().map(|r| Ref::map(r, |v| v as &dyn Any))
    }

    fn get_mut(&self) -> std::result::Result<RefMut<'_, dyn Any>, BorrowMutError> {
        self.0.try_borrow_mut().map(|r| RefMut::map(r, |v| v as &mut dyn Any))
    }
}

pub(crate) struct UniqueHolder<T>(pub(crate) RefCell<Box<T>>);

impl<T: 'static> Holder for UniqueHolder<T> {
    fn get(&self) -> std::result::Result<Ref<'_, dyn Any>, BorrowError> {
        self.0.try_borrow().map(|r| Ref::map(r, |b| &**b as &dyn Any))
    }

    fn get_mut(&self) -> std::result::Result<RefMut<'_, dyn Any>, BorrowMutError> {
        self.0
            .try_borrow_mut()
            .map(|r| RefMut::map(r, |b| &mut **b as &mut dyn Any))
    }
}

pub(crate) struct SharedHolder<T>(pub(crate) Rc<RefCell<T>>);

impl<T: 'static> Holder for SharedHolder<T> {
    fn get(&self) -> std::result::Result<Ref<'_, dyn Any>, BorrowError> {
        self.0.try_borrow().map(|r| Ref::map(r, |v| v as &dyn Any))
    }

    fn get_mut(&self) -> std::result::Result<RefMut<'_, dyn Any>, BorrowMutError> {
        self.0.try_borrow_mut().map(|r| RefMut::map(r, |v| v as &mut dyn Any))
    }

    fn shared(&self) -> Option<Rc<dyn Any>> {
        Some(self.0.clone())
    }
}

/// Non-owning holder; `guard` provides the borrow flag the pointee lacks
pub(crate) struct PtrHolder<T> {
    pub(crate) ptr: NonNull<T>,
    pub(crate) guard: RefCell<()>,
}

impl<T: 'static> Holder for PtrHolder<T> {
    fn get(&self) -> std::result::Result<Ref<'_, dyn Any>, BorrowError> {
        let ptr = self.ptr;
        // SAFETY: `Ptr::new` requires the pointee to outlive every use
        // through the VM; the guard serializes access through this block.
        self.guard
            .try_borrow()
            .map(|g| {
                Ref::map(g, |_| {
                    let obj: &dyn Any = unsafe { &*ptr.as_ptr() };
                    obj
                })
            })
    }

    fn get_mut(&self) -> std::result::Result<RefMut<'_, dyn Any>, BorrowMutError> {
        let ptr = self.ptr;
        // SAFETY: as in `get`; the mutable guard excludes other borrows
        // through this block.
        self.guard
            .try_borrow_mut()
            .map(|g| {
                RefMut::map(g, |_| {
                    let obj: &mut dyn Any = unsafe { &mut *ptr.as_ptr() };
                    obj
                })
            })
    }
}

// ============================================================================
// The box
// ============================================================================

/// Payload of a bound object's userdata block
pub struct UserBox {
    holder: Box<dyn Holder>,
    kind: ValueKind,
    type_id: TypeId,
    name: Rc<str>,
    deferred: RefCell<Option<Destructor>>,
}

impl UserBox {
    pub(crate) fn new<T: 'static>(holder: Box<dyn Holder>, kind: ValueKind, name: Rc<str>) -> Self {
        UserBox {
            holder,
            kind,
            type_id: TypeId::of::<T>(),
            name,
            deferred: RefCell::new(None),
        }
    }

    /// Tag every bound object's userdata carries
    pub fn tag() -> TypeTag {
        TypeTag::of::<UserBox>()
    }

    /// Dynamic type of the object
    pub fn dynamic_type(&self) -> TypeId {
        self.type_id
    }

    /// Registered name of the dynamic type
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How the object is owned
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Whether any borrow of the object is outstanding
    pub(crate) fn is_borrowed(&self) -> bool {
        self.holder.get_mut().is_err()
    }

    /// Run `destructor` now, or when the box is dropped if the object is
    /// borrowed
    pub(crate) fn run_destructor(&self, destructor: Destructor) {
        match self.holder.get_mut() {
            Ok(mut obj) => destructor(&mut *obj),
            Err(_) => *self.deferred.borrow_mut() = Some(destructor),
        }
    }

    fn conflict(&self) -> Error {
        Error::BorrowConflict {
            type_name: self.name.to_string(),
        }
    }

    /// Borrow the object as a `T` reached through `path`
    pub fn borrow_as<T: 'static>(&self, path: &CastPath) -> Result<Ref<'_, T>> {
        let whole = self.holder.get().map_err(|_| self.conflict())?;
        Ref::filter_map(whole, |any| path.apply(any).and_then(|a| a.downcast_ref::<T>()))
            .map_err(|_| self.bad_cast::<T>())
    }

    /// Mutably borrow the object as a `T` reached through `path`
    pub fn borrow_mut_as<T: 'static>(&self, path: &CastPath) -> Result<RefMut<'_, T>> {
        let whole = self.holder.get_mut().map_err(|_| self.conflict())?;
        RefMut::filter_map(whole, |any| {
            path.apply_mut(any).and_then(|a| a.downcast_mut::<T>())
        })
        .map_err(|_| self.bad_cast::<T>())
    }

    fn bad_cast<T>(&self) -> Error {
        Error::runtime(format!(
            "cannot view '{}' as '{}'",
            self.name,
            std::any::type_name::<T>()
        ))
    }

    /// The shared cell of a `Shared<T>` object of exactly type `T`
    pub fn shared<T: 'static>(&self) -> Option<Rc<RefCell<T>>> {
        self.holder.shared()?.downcast::<RefCell<T>>().ok()
    }
}

impl Drop for UserBox {
    fn drop(&mut self) {
        let Some(destructor) = self.deferred.get_mut().take() else {
            return;
        };
        match self.holder.get_mut() {
            Ok(mut obj) => destructor(&mut *obj),
            Err(_) => warn!(type_name = %self.name, "object still borrowed when dropped; destructor skipped"),
        }
    }
}

/// The box of a live bound object, if `value` is one
pub fn user_box(value: &Value) -> Option<Rc<UserBox>> {
    match value {
        Value::Userdata(ud) if ud.tag() == Some(UserBox::tag()) => ud.downcast::<UserBox>(),
        _ => None,
    }
}

/// Whether `value` is a bound object whose payload was destroyed
pub(crate) fn is_destroyed_object(value: &Value) -> bool {
    matches!(value, Value::Userdata(ud) if ud.tag() == Some(UserBox::tag()) && !ud.is_alive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Counter {
        n: i32,
    }

    fn boxed(holder: Box<dyn Holder>, kind: ValueKind) -> UserBox {
        UserBox::new::<Counter>(holder, kind, Rc::from("Counter"))
    }

    #[test]
    fn test_value_holder_borrows() {
        let b = boxed(
            Box::new(ValueHolder(RefCell::new(Counter { n: 1 }))),
            ValueKind::ValueUserdata,
        );
        let id = CastPath::identity();
        {
            let mut c = b.borrow_mut_as::<Counter>(&id).unwrap();
            c.n += 1;
        }
        assert_eq!(b.borrow_as::<Counter>(&id).unwrap().n, 2);

        let shared = b.borrow_as::<Counter>(&id).unwrap();
        let err = b.borrow_mut_as::<Counter>(&id).unwrap_err();
        assert!(matches!(err, Error::BorrowConflict { ref type_name } if type_name == "Counter"));
        drop(shared);
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let b = boxed(
            Box::new(UniqueHolder(RefCell::new(Box::new(Counter { n: 3 })))),
            ValueKind::OwningPointer,
        );
        assert!(b.borrow_as::<String>(&CastPath::identity()).is_err());
        assert_eq!(b.borrow_as::<Counter>(&CastPath::identity()).unwrap().n, 3);
        assert!(b.shared::<Counter>().is_none());
    }

    #[test]
    fn test_shared_holder_exposes_cell() {
        let cell = Rc::new(RefCell::new(Counter { n: 5 }));
        let b = boxed(Box::new(SharedHolder(cell.clone())), ValueKind::OwningPointer);
        let back = b.shared::<Counter>().unwrap();
        assert!(Rc::ptr_eq(&cell, &back));
        back.borrow_mut().n = 6;
        assert_eq!(b.borrow_as::<Counter>(&CastPath::identity()).unwrap().n, 6);
    }

    #[test]
    fn test_ptr_holder_aliases_pointee() {
        let mut target = Counter { n: 10 };
        let b = boxed(
            Box::new(PtrHolder {
                ptr: NonNull::from(&mut target),
                guard: RefCell::new(()),
            }),
            ValueKind::PointerRef,
        );
        b.borrow_mut_as::<Counter>(&CastPath::identity()).unwrap().n = 11;
        drop(b);
        assert_eq!(target.n, 11);
    }
}
