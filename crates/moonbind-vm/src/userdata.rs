//! Userdata blocks
//!
//! A userdata block carries a native payload inside the VM heap:
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ Userdata                             │
//! │   tag        Option<TypeTag>         │  exact native type, for checked downcasts
//! │   deleter    Option<FnOnce>          │  runs at most once
//! │   payload    Option<Rc<dyn Any>>     │  None once destroyed
//! │   metatable  Option<TableRef>        │
//! │   user_value Value                   │  per-instance side slot
//! └──────────────────────────────────────┘
//! ```
//!
//! Destruction is explicit ([`Userdata::destroy`]) or implicit (the last
//! handle is dropped). Either way the deleter runs exactly once and the
//! block lets go of the payload; a destroyed block stays a valid value whose
//! payload reads as `None`. Payload handles taken out earlier with
//! [`Userdata::payload`] keep the native object alive until they are dropped.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::table::TableRef;
use crate::value::Value;

/// Deleter invoked on the payload right before it is dropped
pub type Deleter = Box<dyn FnOnce(&dyn Any)>;

/// Exact native type identity of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeTag {
    /// Rust type identity
    pub id: TypeId,
    /// Human-readable type name
    pub name: &'static str,
}

impl TypeTag {
    /// Tag for `T`
    pub fn of<T: Any>() -> Self {
        TypeTag {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }
}

/// A userdata block
pub struct Userdata {
    payload: RefCell<Option<Rc<dyn Any>>>,
    deleter: RefCell<Option<Deleter>>,
    tag: Option<TypeTag>,
    metatable: RefCell<Option<TableRef>>,
    user_value: RefCell<Value>,
    finalizable: Cell<bool>,
}

impl Userdata {
    /// Shared handle to the payload; `None` once destroyed
    pub fn payload(&self) -> Option<Rc<dyn Any>> {
        self.payload.borrow().clone()
    }

    /// Payload downcast to `T`; `None` if destroyed or of another type
    pub fn downcast<T: Any>(&self) -> Option<Rc<T>> {
        Rc::downcast::<T>(self.payload()?).ok()
    }

    /// Whether the payload is still attached
    pub fn is_alive(&self) -> bool {
        self.payload.borrow().is_some()
    }

    /// Exact type tag given at creation
    pub fn tag(&self) -> Option<TypeTag> {
        self.tag
    }

    /// Install (or replace) the deleter
    pub fn set_deleter(&self, deleter: Deleter) {
        *self.deleter.borrow_mut() = Some(deleter);
    }

    /// Whether a deleter is still pending
    pub fn has_deleter(&self) -> bool {
        self.deleter.borrow().is_some()
    }

    /// Run the deleter and release the payload
    ///
    /// Idempotent: returns `false` when the block was already destroyed.
    pub fn destroy(&self) -> bool {
        let Some(payload) = self.payload.borrow_mut().take() else {
            return false;
        };
        let deleter = self.deleter.borrow_mut().take();
        if let Some(deleter) = deleter {
            deleter(payload.as_ref());
        }
        true
    }

    /// The metatable, if any
    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.borrow().clone()
    }

    pub(crate) fn set_metatable(&self, metatable: Option<TableRef>) {
        *self.metatable.borrow_mut() = metatable;
    }

    /// Mark for finalization; returns `false` if already marked
    pub(crate) fn mark_finalizable(&self) -> bool {
        !self.finalizable.replace(true)
    }

    /// The per-instance user value
    pub fn user_value(&self) -> Value {
        self.user_value.borrow().clone()
    }

    /// Replace the per-instance user value
    pub fn set_user_value(&self, value: Value) {
        *self.user_value.borrow_mut() = value;
    }
}

impl Drop for Userdata {
    fn drop(&mut self) {
        let payload = self.payload.get_mut().take();
        if let Some(payload) = payload {
            if let Some(deleter) = self.deleter.get_mut().take() {
                deleter(payload.as_ref());
            }
        }
    }
}

/// Shared handle to a userdata block
#[derive(Clone)]
pub struct UserdataRef(Rc<Userdata>);

impl UserdataRef {
    /// Allocate a block around `payload`
    pub fn new(payload: Rc<dyn Any>, tag: Option<TypeTag>) -> Self {
        UserdataRef(Rc::new(Userdata {
            payload: RefCell::new(Some(payload)),
            deleter: RefCell::new(None),
            tag,
            metatable: RefCell::new(None),
            user_value: RefCell::new(Value::Nil),
            finalizable: Cell::new(false),
        }))
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &UserdataRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Identity address
    pub fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const u8 as usize
    }

    /// Number of live handles to the block
    pub fn handle_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

impl std::ops::Deref for UserdataRef {
    type Target = Userdata;

    fn deref(&self) -> &Userdata {
        &self.0
    }
}

impl fmt::Debug for UserdataRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "userdata: {:#x}", self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast() {
        let ud = UserdataRef::new(Rc::new(42i32), Some(TypeTag::of::<i32>()));
        assert_eq!(*ud.downcast::<i32>().unwrap(), 42);
        assert!(ud.downcast::<u8>().is_none());
        assert_eq!(ud.tag().unwrap().id, TypeId::of::<i32>());
    }

    #[test]
    fn test_destroy_runs_deleter_once() {
        let count = Rc::new(Cell::new(0));
        let ud = UserdataRef::new(Rc::new(String::from("x")), None);
        let c = count.clone();
        ud.set_deleter(Box::new(move |_| c.set(c.get() + 1)));

        assert!(ud.destroy());
        assert!(!ud.destroy());
        assert!(!ud.is_alive());
        assert!(ud.downcast::<String>().is_none());
        drop(ud);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_drop_runs_deleter() {
        let count = Rc::new(Cell::new(0));
        let ud = UserdataRef::new(Rc::new(1u8), None);
        let c = count.clone();
        ud.set_deleter(Box::new(move |payload| {
            assert_eq!(payload.downcast_ref::<u8>(), Some(&1));
            c.set(c.get() + 1)
        }));
        let other = ud.clone();
        drop(ud);
        assert_eq!(count.get(), 0);
        drop(other);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_payload_outlives_destroy() {
        let ud = UserdataRef::new(Rc::new(7u32), None);
        let held = ud.downcast::<u32>().unwrap();
        assert!(ud.destroy());
        assert!(ud.payload().is_none());
        assert_eq!(*held, 7);
    }

    #[test]
    fn test_user_value() {
        let ud = UserdataRef::new(Rc::new(()), None);
        assert!(ud.user_value().is_nil());
        ud.set_user_value(Value::Integer(3));
        assert_eq!(ud.user_value().to_integer(), Some(3));
    }
}
