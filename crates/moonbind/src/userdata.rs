//! Untyped handles to bound objects

use std::any::TypeId;
use std::cell::{Ref, RefMut};
use std::fmt;
use std::rc::Rc;

use moonbind_vm::{State, UserdataRef, Value};

use crate::error::{Error, Result};
use crate::inheritance::CastPath;
use crate::reference::{impl_handle, Reference};
use crate::stack::{from_value, to_value, FromStack, ToStack};
use crate::usertype::{user_box, TypeRegistry, UserBox};

/// Any userdata value held from Rust
///
/// For bound objects the typed accessors resolve the dynamic type through
/// the VM's usertype registry, so a handle to a derived object can be
/// borrowed as any of its bases.
#[derive(Clone)]
pub struct AnyUserdata {
    reference: Reference,
    ud: Option<UserdataRef>,
    boxed: Option<Rc<UserBox>>,
}

impl AnyUserdata {
    pub(crate) fn from_reference(_: &State, reference: Reference) -> Self {
        let value = reference.value().unwrap_or_default();
        let boxed = user_box(&value);
        let ud = match value {
            Value::Userdata(ud) => Some(ud),
            _ => None,
        };
        AnyUserdata { reference, ud, boxed }
    }

    /// The underlying reference
    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    fn block(&self) -> Result<&UserdataRef> {
        self.ud
            .as_ref()
            .ok_or_else(|| Error::runtime("expected a userdata reference"))
    }

    /// The live object box and the cast to its `T` part
    fn view<T: 'static>(&self) -> Result<(&UserBox, CastPath)> {
        let state = self.reference.state()?;
        let boxed = match (&self.boxed, &self.ud) {
            (Some(boxed), Some(ud)) if ud.is_alive() => boxed,
            (Some(boxed), Some(_)) => {
                return Err(Error::runtime(format!(
                    "'{}' object has been destroyed",
                    boxed.name()
                )))
            }
            _ => return Err(Error::runtime("userdata is not a bound object")),
        };
        let path = TypeRegistry::of(&state)
            .cast_path(boxed.dynamic_type(), TypeId::of::<T>())
            .ok_or_else(|| {
                Error::runtime(format!(
                    "cannot view '{}' as '{}'",
                    boxed.name(),
                    std::any::type_name::<T>()
                ))
            })?;
        Ok((boxed.as_ref(), path))
    }

    /// Borrow the object as a `T`
    pub fn borrow<T: 'static>(&self) -> Result<Ref<'_, T>> {
        let (boxed, path) = self.view::<T>()?;
        boxed.borrow_as(&path)
    }

    /// Mutably borrow the object as a `T`
    pub fn borrow_mut<T: 'static>(&self) -> Result<RefMut<'_, T>> {
        let (boxed, path) = self.view::<T>()?;
        boxed.borrow_mut_as(&path)
    }

    /// Whether the object is alive and viewable as a `T`
    pub fn is<T: 'static>(&self) -> bool {
        self.view::<T>().is_ok()
    }

    /// Registered name of the object's dynamic type
    pub fn type_name(&self) -> Option<&str> {
        self.boxed.as_deref().map(UserBox::name)
    }

    /// Whether the payload is still alive
    pub fn is_alive(&self) -> bool {
        self.ud.as_ref().is_some_and(|ud| ud.is_alive())
    }

    /// Destroy the payload now, running its destructor
    ///
    /// Returns `false` if it was already destroyed. The block stays valid
    /// as a value; later accesses fail cleanly. Fails with
    /// [`Error::BorrowConflict`] while the object is borrowed, leaving it
    /// untouched.
    pub fn destroy(&self) -> Result<bool> {
        let block = self.block()?;
        if let Some(boxed) = &self.boxed {
            if block.is_alive() && boxed.is_borrowed() {
                return Err(Error::BorrowConflict {
                    type_name: boxed.name().to_string(),
                });
            }
        }
        Ok(block.destroy())
    }

    /// The per-instance user value
    pub fn user_value<V: FromStack>(&self) -> Result<V> {
        let state = self.reference.state()?;
        from_value(&state, self.block()?.user_value())
    }

    /// Replace the per-instance user value
    pub fn set_user_value<V: ToStack>(&self, value: V) -> Result<()> {
        let state = self.reference.state()?;
        let value = to_value(&state, value)?;
        self.block()?.set_user_value(value);
        Ok(())
    }
}

impl fmt::Debug for AnyUserdata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyUserdata")
            .field("type", &self.type_name())
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl_handle!(AnyUserdata, ValueUserdata, "userdata", |v| {
    matches!(v, Value::Userdata(_))
});
