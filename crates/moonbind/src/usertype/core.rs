//! Per-type usertype data and member dispatch
//!
//! A [`UsertypeCore`] is created once per bound type per VM instance. It owns
//! the member table consulted by the `__index` / `__newindex` handlers of the
//! type's three metatables, one per view of an object:
//!
//! ```text
//!   registry["moonbind.Point"]         value view    (copied-in objects)
//!   registry["moonbind.Point*"]        pointer view  (Ptr<Point>, no __gc)
//!   registry["moonbind.unique.Point"]  unique view   (Unique / Shared)
//!   registry["moonbind.Point.user"]    metatable of the global `Point`
//! ```
//!
//! # Member lookup
//!
//! Reads try, in order: the type's own members, each base's members
//! (declaration order, depth first), the instance's side table, the read
//! fallback. A miss reads as `nil`.
//!
//! Writes try: own members, base members, the instance's side table when the
//! type is runtime-extensible, the write fallback. A miss is an error.
//!
//! When a type has no properties, bases, extensibility or fallbacks, reads
//! take the fast path: `__index` is the metatable itself and every member
//! value is stored in it directly.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use moonbind_vm::{FunctionRef, State, TableRef, UserdataRef, Value};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use super::registry::TypeRegistry;
use super::userbox::{is_destroyed_object, user_box, UserBox};
use crate::call::protect;
use crate::error::{Error, Result};
use crate::inheritance::InheritanceTable;

/// Reads a property of a boxed object, pushing the value
pub(crate) type Getter = Rc<dyn Fn(&State, &UserBox) -> Result<usize>>;

/// Writes a property of a boxed object from a stack slot
pub(crate) type Setter = Rc<dyn Fn(&State, &UserBox, i32) -> Result<()>>;

/// Custom destructor, run right before an owned object is dropped
pub(crate) type Destructor = Rc<dyn Fn(&mut dyn Any)>;

/// A named member of a usertype
#[derive(Clone)]
pub(crate) enum Member {
    /// Read-only value: a method, a static function or a static variable
    Value(Value),
    /// Accessor pair; a missing half makes the property read- or write-only
    Property {
        get: Option<Getter>,
        set: Option<Setter>,
    },
    /// Slot in the type-wide runtime table
    Runtime(usize),
}

impl Member {
    pub(crate) fn is_property(&self) -> bool {
        matches!(self, Member::Property { .. })
    }
}

/// View of an object, selecting its metatable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum View {
    Value,
    Pointer,
    Unique,
    Shared,
}

impl View {
    /// Whether the block owns its object and runs the destructor
    fn owns(self) -> bool {
        matches!(self, View::Value | View::Unique)
    }
}

pub(crate) struct Metatables {
    pub(crate) value: TableRef,
    pub(crate) pointer: TableRef,
    pub(crate) unique: TableRef,
}

impl Metatables {
    fn new() -> Self {
        Metatables {
            value: TableRef::new(),
            pointer: TableRef::new(),
            unique: TableRef::new(),
        }
    }

    pub(crate) fn all(&self) -> [&TableRef; 3] {
        [&self.value, &self.pointer, &self.unique]
    }

    pub(crate) fn for_view(&self, view: View) -> &TableRef {
        match view {
            View::Value => &self.value,
            View::Pointer => &self.pointer,
            View::Unique | View::Shared => &self.unique,
        }
    }
}

/// Registry key of the value metatable
pub(crate) fn value_key(name: &str) -> String {
    format!("moonbind.{}", name)
}

/// Registry key of the pointer metatable
pub(crate) fn pointer_key(name: &str) -> String {
    format!("moonbind.{}*", name)
}

/// Registry key of the unique metatable
pub(crate) fn unique_key(name: &str) -> String {
    format!("moonbind.unique.{}", name)
}

/// Registry key of the type handle's metatable
pub(crate) fn user_key(name: &str) -> String {
    format!("moonbind.{}.user", name)
}

// ============================================================================
// Core
// ============================================================================

/// Everything the builder hands over to create a core
pub(crate) struct CoreSpec {
    pub(crate) name: Rc<str>,
    pub(crate) type_id: TypeId,
    pub(crate) inheritance: InheritanceTable,
    pub(crate) members: Vec<(String, Member)>,
    pub(crate) metamethods: Vec<(&'static str, Value)>,
    pub(crate) constructor: Option<Value>,
    pub(crate) call_constructor: bool,
    pub(crate) extensible: bool,
    pub(crate) index_fallback: Option<Value>,
    pub(crate) new_index_fallback: Option<Value>,
    pub(crate) destructor: Option<Destructor>,
}

/// Runtime data of one bound type in one VM instance
pub(crate) struct UsertypeCore {
    pub(crate) name: Rc<str>,
    pub(crate) type_id: TypeId,
    pub(crate) inheritance: Rc<InheritanceTable>,
    members: RefCell<FxHashMap<String, Member>>,
    runtime: RefCell<Vec<Value>>,
    pub(crate) fast_path: bool,
    pub(crate) extensible: bool,
    index_fallback: Option<Value>,
    new_index_fallback: Option<Value>,
    pub(crate) metatables: Metatables,
    pub(crate) user_table: TableRef,
    destructor: Option<Destructor>,
}

impl UsertypeCore {
    /// Create the core and wire its metatables
    pub(crate) fn install(state: &State, spec: CoreSpec) -> Rc<UsertypeCore> {
        let fast_path = !spec.members.iter().any(|(_, m)| m.is_property())
            && spec.inheritance.bases().is_empty()
            && !spec.extensible
            && spec.index_fallback.is_none()
            && spec.new_index_fallback.is_none();

        let mut members: FxHashMap<String, Member> = spec.members.into_iter().collect();
        if let Some(ctor) = &spec.constructor {
            members.insert("new".to_string(), Member::Value(ctor.clone()));
        }

        let call = if spec.call_constructor {
            spec.constructor.clone()
        } else {
            None
        };
        let core = Rc::new_cyclic(|weak: &Weak<UsertypeCore>| UsertypeCore {
            name: spec.name.clone(),
            type_id: spec.type_id,
            inheritance: Rc::new(spec.inheritance),
            members: RefCell::new(members),
            runtime: RefCell::new(Vec::new()),
            fast_path,
            extensible: spec.extensible,
            index_fallback: spec.index_fallback,
            new_index_fallback: spec.new_index_fallback,
            metatables: Metatables::new(),
            user_table: user_table(weak, &spec.name, call),
            destructor: spec.destructor,
        });
        core.wire_metatables(&spec.metamethods);

        let registry = state.registry();
        let name = &core.name;
        registry.set_str(&value_key(name), Value::Table(core.metatables.value.clone()));
        registry.set_str(&pointer_key(name), Value::Table(core.metatables.pointer.clone()));
        registry.set_str(&unique_key(name), Value::Table(core.metatables.unique.clone()));
        if let Some(mt) = core.user_table.metatable() {
            registry.set_str(&user_key(name), Value::Table(mt));
        }
        core
    }

    fn wire_metatables(self: &Rc<Self>, metamethods: &[(&'static str, Value)]) {
        let weak = Rc::downgrade(self);
        let index = handler(&self.name, "__index", weak.clone(), |core, state| core.index(state));
        let new_index = handler(&self.name, "__newindex", weak, |core, state| {
            core.new_index(state)
        });
        let gc = Value::Function(FunctionRef::named("__gc", |state| {
            if let Some(ud) = state.to_userdata(1) {
                ud.destroy();
            }
            Ok(0)
        }));
        let type_info = type_info(&self.name, self.type_id);

        for (i, mt) in self.metatables.all().into_iter().enumerate() {
            mt.set_str("__name", Value::from(&*self.name));
            mt.set_str("__type", Value::Table(type_info.clone()));
            mt.set_str("__newindex", new_index.clone());
            if self.fast_path {
                mt.set_str("__index", Value::Table(mt.clone()));
                for (name, member) in self.members.borrow().iter() {
                    if let Member::Value(v) = member {
                        mt.set_str(name, v.clone());
                    }
                }
            } else {
                mt.set_str("__index", index.clone());
            }
            // The pointer view (index 1) never owns its object.
            if i != 1 {
                mt.set_str("__gc", gc.clone());
            }
            for (event, f) in metamethods {
                mt.set_str(event, f.clone());
            }
        }
    }

    /// Member `name` on this type or one of its bases, with the type that
    /// declares it
    fn find(self: &Rc<Self>, registry: &TypeRegistry, name: &str) -> Option<(Rc<Self>, Member)> {
        let mut visited = FxHashSet::default();
        self.find_in(registry, name, &mut visited)
    }

    fn find_in(
        self: &Rc<Self>,
        registry: &TypeRegistry,
        name: &str,
        visited: &mut FxHashSet<TypeId>,
    ) -> Option<(Rc<Self>, Member)> {
        if !visited.insert(self.type_id) {
            return None;
        }
        let own = self.members.borrow().get(name).cloned();
        if let Some(member) = own {
            return Some((self.clone(), member));
        }
        for link in self.inheritance.bases() {
            let found = registry
                .get(link.type_id)
                .and_then(|base| base.find_in(registry, name, visited));
            if found.is_some() {
                return found;
            }
        }
        None
    }

    // ========================================================================
    // Instance access
    // ========================================================================

    /// `__index(object, key)`
    fn index(self: &Rc<Self>, state: &State) -> Result<usize> {
        let target = state.value_at(1);
        let key = state.value_at(2);
        let registry = TypeRegistry::of(state);

        if let Some(name) = key_name(&key) {
            if let Some((owner, member)) = self.find(&registry, &name) {
                return owner.read(state, &target, &name, member);
            }
        }
        if let Some(side) = side_table(&target) {
            let v = side.get(&key);
            if !v.is_nil() {
                state.push_value(v);
                return Ok(1);
            }
        }
        if let Some(fallback) = &self.index_fallback {
            let v = state.call_value(fallback, &[target, key])?;
            state.push_value(v);
            return Ok(1);
        }
        state.push_nil();
        Ok(1)
    }

    /// `__newindex(object, key, value)`
    fn new_index(self: &Rc<Self>, state: &State) -> Result<usize> {
        let target = state.value_at(1);
        let key = state.value_at(2);
        let registry = TypeRegistry::of(state);

        if let Some(name) = key_name(&key) {
            if let Some((owner, member)) = self.find(&registry, &name) {
                owner.write(state, &target, &name, member)?;
                return Ok(0);
            }
        }
        if self.extensible {
            if let Value::Userdata(ud) = &target {
                let side = match side_table(&target) {
                    Some(side) => side,
                    None => {
                        let side = TableRef::new();
                        ud.set_user_value(Value::Table(side.clone()));
                        side
                    }
                };
                side.set(key, state.value_at(3))?;
                return Ok(0);
            }
        }
        if let Some(fallback) = &self.new_index_fallback {
            state.call_values(fallback, &[target, key, state.value_at(3)])?;
            return Ok(0);
        }
        Err(Error::UnregisteredAccess {
            type_name: self.name.to_string(),
            name: describe_key(&key),
        })
    }

    fn read(&self, state: &State, target: &Value, name: &str, member: Member) -> Result<usize> {
        match member {
            Member::Value(v) => {
                state.push_value(v);
                Ok(1)
            }
            Member::Property { get: Some(get), .. } => {
                let boxed = receiver(target, &self.name)?;
                get(state, &boxed)
            }
            Member::Property { get: None, .. } => Err(Error::WriteOnlyPropertyRead {
                name: name.to_string(),
            }),
            Member::Runtime(slot) => {
                state.push_value(self.runtime_value(slot));
                Ok(1)
            }
        }
    }

    fn write(&self, state: &State, target: &Value, name: &str, member: Member) -> Result<()> {
        match member {
            Member::Property { set: Some(set), .. } => {
                let boxed = receiver(target, &self.name)?;
                set(state, &boxed, 3)
            }
            Member::Property { set: None, .. } | Member::Value(_) => {
                Err(Error::ImmutablePropertyWrite {
                    name: name.to_string(),
                })
            }
            Member::Runtime(slot) => {
                self.set_runtime(name, slot, state.value_at(3));
                Ok(())
            }
        }
    }

    // ========================================================================
    // Type-wide runtime members
    // ========================================================================

    fn runtime_value(&self, slot: usize) -> Value {
        self.runtime.borrow().get(slot).cloned().unwrap_or_default()
    }

    fn set_runtime(&self, name: &str, slot: usize, value: Value) {
        if let Some(cell) = self.runtime.borrow_mut().get_mut(slot) {
            *cell = value.clone();
        }
        if self.fast_path {
            for mt in self.metatables.all() {
                mt.set_str(name, value.clone());
            }
        }
    }

    /// Add or replace a type-wide member
    pub(crate) fn set_type_member(&self, name: &str, value: Value) {
        let existing = self.members.borrow().get(name).cloned();
        match existing {
            Some(Member::Runtime(slot)) => self.set_runtime(name, slot, value),
            _ => {
                let slot = {
                    let mut runtime = self.runtime.borrow_mut();
                    runtime.push(Value::Nil);
                    runtime.len() - 1
                };
                self.members
                    .borrow_mut()
                    .insert(name.to_string(), Member::Runtime(slot));
                self.set_runtime(name, slot, value);
            }
        }
    }

    /// Value of a member readable without an instance
    fn type_member(self: &Rc<Self>, registry: &TypeRegistry, name: &str) -> Value {
        match self.find(registry, name) {
            Some((_, Member::Value(v))) => v,
            Some((owner, Member::Runtime(slot))) => owner.runtime_value(slot),
            _ => Value::Nil,
        }
    }

    /// Number of members, for logging
    pub(crate) fn member_count(&self) -> usize {
        self.members.borrow().len()
    }

    // ========================================================================
    // Pushing objects
    // ========================================================================

    /// Push a boxed object with the metatable of `view`
    pub(crate) fn push_object(&self, state: &State, boxed: UserBox, view: View) -> Result<usize> {
        let ud = UserdataRef::new(Rc::new(boxed), Some(UserBox::tag()));
        if view.owns() {
            if let Some(destructor) = &self.destructor {
                ud.set_deleter(deleter(destructor.clone(), self.name.clone()));
            }
        }
        let value = Value::Userdata(ud);
        let mt = self.metatables.for_view(view).clone();
        state.set_metatable_of(&value, Some(mt))?;
        state.push_value(value);
        Ok(1)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn handler<F>(type_name: &str, event: &str, core: Weak<UsertypeCore>, body: F) -> Value
where
    F: Fn(&Rc<UsertypeCore>, &State) -> Result<usize> + 'static,
{
    let name = format!("{}.{}", type_name, event);
    Value::Function(FunctionRef::named(name, move |state| {
        protect(state, |state| match core.upgrade() {
            Some(core) => body(&core, state),
            None => Err(Error::runtime("usertype has been unregistered")),
        })
    }))
}

/// The global handle of a type: an empty table whose metatable resolves
/// type-wide members and records new ones
fn user_table(core: &Weak<UsertypeCore>, name: &str, call: Option<Value>) -> TableRef {
    let table = TableRef::new();
    let mt = TableRef::new();
    mt.set_str("__name", Value::from(name));

    let weak = core.clone();
    mt.set_str(
        "__index",
        handler(name, "type.__index", weak, |core, state| {
            let value = match key_name(&state.value_at(2)) {
                Some(key) => core.type_member(&TypeRegistry::of(state), &key),
                None => Value::Nil,
            };
            state.push_value(value);
            Ok(1)
        }),
    );
    let weak = core.clone();
    mt.set_str(
        "__newindex",
        handler(name, "type.__newindex", weak, |core, state| {
            let key = state.value_at(2);
            let value = state.value_at(3);
            match key_name(&key) {
                Some(name) => core.set_type_member(&name, value),
                None => {
                    if let Some(t) = state.to_table(1) {
                        t.set(key, value)?;
                    }
                }
            }
            Ok(0)
        }),
    );
    if let Some(ctor) = call {
        mt.set_str("__call", ctor);
    }
    table.borrow_mut().set_metatable(Some(mt));
    table
}

/// `__type = { name = ..., is = function(v) }`
fn type_info(name: &str, type_id: TypeId) -> TableRef {
    let info = TableRef::new();
    info.set_str("name", Value::from(name));
    info.set_str(
        "is",
        Value::Function(FunctionRef::named("is", move |state| {
            let registry = TypeRegistry::of(state);
            let is = user_box(&state.value_at(1))
                .is_some_and(|b| registry.cast_path(b.dynamic_type(), type_id).is_some());
            state.push_boolean(is);
            Ok(1)
        })),
    );
    info
}

fn deleter(destructor: Destructor, name: Rc<str>) -> moonbind_vm::Deleter {
    Box::new(move |payload: &dyn Any| {
        let Some(boxed) = payload.downcast_ref::<UserBox>() else {
            return;
        };
        if boxed.is_borrowed() {
            debug!(type_name = %name, "object borrowed at destruction; destructor deferred");
        }
        boxed.run_destructor(destructor);
    })
}

fn key_name(key: &Value) -> Option<String> {
    key.as_string().and_then(|s| s.to_str()).map(str::to_string)
}

fn describe_key(key: &Value) -> String {
    key.coerce_string()
        .map(|s| s.to_string_lossy())
        .unwrap_or_else(|| key.type_name().to_string())
}

fn side_table(target: &Value) -> Option<TableRef> {
    match target {
        Value::Userdata(ud) => match ud.user_value() {
            Value::Table(t) => Some(t),
            _ => None,
        },
        _ => None,
    }
}

/// The box of the object an accessor runs against
fn receiver(target: &Value, type_name: &str) -> Result<Rc<UserBox>> {
    user_box(target).ok_or_else(|| {
        if is_destroyed_object(target) {
            Error::runtime(format!("attempt to use a destroyed '{}' object", type_name))
        } else {
            Error::NullReceiver {
                type_name: type_name.to_string(),
            }
        }
    })
}
