//! Per-VM table of bound types

use std::any::TypeId;
use std::cell::RefCell;
use std::rc::Rc;

use moonbind_vm::State;
use rustc_hash::FxHashMap;

use super::builder::UsertypeBuilder;
use super::core::UsertypeCore;
use super::Usertype;
use crate::error::Result;
use crate::inheritance::{CastPath, InheritanceTable, TableLookup};

/// Every usertype bound in one VM instance, keyed by Rust type
#[derive(Default)]
pub(crate) struct TypeRegistry {
    types: RefCell<FxHashMap<TypeId, Rc<UsertypeCore>>>,
}

impl TypeRegistry {
    /// The registry of the VM `state` belongs to
    pub(crate) fn of(state: &State) -> Rc<TypeRegistry> {
        state.app_data_or_init(TypeRegistry::default)
    }

    pub(crate) fn get(&self, id: TypeId) -> Option<Rc<UsertypeCore>> {
        self.types.borrow().get(&id).cloned()
    }

    /// Record `core`, replacing an earlier registration of the same type
    pub(crate) fn insert(&self, core: Rc<UsertypeCore>) -> Option<Rc<UsertypeCore>> {
        self.types.borrow_mut().insert(core.type_id, core)
    }

    /// Upcast chain from the dynamic type `from` to `to`
    pub(crate) fn cast_path(&self, from: TypeId, to: TypeId) -> Option<CastPath> {
        if from == to {
            return Some(CastPath::identity());
        }
        let table = self.table(from)?;
        table.cast_path(to, self)
    }
}

impl TableLookup for TypeRegistry {
    fn table(&self, id: TypeId) -> Option<Rc<InheritanceTable>> {
        self.types.borrow().get(&id).map(|core| core.inheritance.clone())
    }
}

/// Core of `T`, binding it implicitly under its default name on first use
///
/// Implicit bindings carry the members declared by [`Usertype::bind_fields`]
/// but publish no global.
pub(crate) fn core_for<T: Usertype>(state: &State) -> Result<Rc<UsertypeCore>> {
    let registry = TypeRegistry::of(state);
    if let Some(core) = registry.get(TypeId::of::<T>()) {
        return Ok(core);
    }
    let builder = T::bind_fields(UsertypeBuilder::<T>::new(state, T::default_name()));
    let core = builder.install()?;
    registry.insert(core.clone());
    Ok(core)
}

/// Name `T` is bound under in `state`, if it is bound
pub(crate) fn registered_name<T: 'static>(state: &State) -> Option<Rc<str>> {
    TypeRegistry::of(state)
        .get(TypeId::of::<T>())
        .map(|core| core.name.clone())
}
