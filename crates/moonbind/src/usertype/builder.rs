//! Usertype registration
//!
//! [`UsertypeBuilder`] collects the bindings of one type and turns them into
//! metatables on [`UsertypeBuilder::register`]. Every binding is classified
//! as it is added:
//!
//! ```text
//!   method / function / var ──► plain member (read-only value)
//!   property*               ──► accessor pair (either half optional)
//!   constructor(s)          ──► "new" on the type handle (and __call)
//!   destructor              ──► deleter of owned objects
//!   *_operator / meta_*     ──► metatable events
//!   base                    ──► inheritance link, member lookup falls back
//! ```
//!
//! Mistakes that can only be detected while building (two constructor sets,
//! two destructors, binding `__gc`) are collected and reported by
//! `register`.

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::fmt::Display;
use std::marker::PhantomData;
use std::rc::Rc;

use indexmap::IndexMap;
use moonbind_vm::{FunctionRef, State, TableRef, Value};
use tracing::debug;

use super::core::{CoreSpec, Destructor, Getter, Member, Setter, UsertypeCore};
use super::meta::MetaFunction;
use super::pointer::UserRef;
use super::registry::TypeRegistry;
use super::userbox::UserBox;
use super::{user_key, Usertype};
use crate::call::{self, make_function, protect, Candidate, IntoFunction, IntoMethod};
use crate::error::{Error, Result};
use crate::inheritance::{BaseLink, CastPath, InheritanceTable};
use crate::options;
use crate::stack::{checked_get, get, push, to_value, FromStack, ThisState, ToStack};
use crate::table::Table;

const NON_CONSTRUCTIBLE: &str = "cannot call this constructor (tagged as non-constructible)";

enum Construction {
    Default,
    Candidates(Vec<Candidate>),
    Disabled,
}

/// Collects the bindings of a usertype
pub struct UsertypeBuilder<'a, T> {
    state: &'a State,
    name: Rc<str>,
    inheritance: InheritanceTable,
    members: IndexMap<String, Member>,
    metamethods: Vec<(&'static str, Value)>,
    construction: Construction,
    call_constructor: bool,
    extensible: bool,
    index_fallback: Option<Value>,
    new_index_fallback: Option<Value>,
    destructor: Option<Destructor>,
    errors: Vec<String>,
    _marker: PhantomData<fn() -> T>,
}

fn view_path<T: 'static>(state: &State, boxed: &UserBox) -> Result<CastPath> {
    TypeRegistry::of(state)
        .cast_path(boxed.dynamic_type(), TypeId::of::<T>())
        .ok_or_else(|| {
            Error::runtime(format!(
                "'{}' has no '{}' part",
                boxed.name(),
                super::short_type_name::<T>()
            ))
        })
}

impl<'a, T: Usertype> UsertypeBuilder<'a, T> {
    pub(crate) fn new(state: &'a State, name: &str) -> Self {
        UsertypeBuilder {
            state,
            name: Rc::from(name),
            inheritance: InheritanceTable::new(TypeId::of::<T>()),
            members: IndexMap::new(),
            metamethods: Vec::new(),
            construction: Construction::Default,
            call_constructor: false,
            extensible: false,
            index_fallback: None,
            new_index_fallback: None,
            destructor: None,
            errors: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Name the type is registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    fn qualified(&self, member: &str) -> String {
        format!("{}.{}", self.name, member)
    }

    fn add(mut self, name: &str, member: Member) -> Self {
        self.members.insert(name.to_string(), member);
        self
    }

    // ========================================================================
    // Members
    // ========================================================================

    /// Member function, called as `obj:name(...)`
    pub fn method<M, F: IntoMethod<T, M>>(self, name: &str, f: F) -> Self {
        let func = make_function(self.qualified(name), f.into_method_candidates());
        self.add(name, Member::Value(Value::Function(func)))
    }

    /// Static function, called as `Type.name(...)`
    pub fn function<M, F: IntoFunction<M>>(self, name: &str, f: F) -> Self {
        let func = make_function(self.qualified(name), f.into_candidates());
        self.add(name, Member::Value(Value::Function(func)))
    }

    /// Static value, read through the type handle or any instance
    pub fn var<V: ToStack>(mut self, name: &str, value: V) -> Self {
        match to_value(self.state, value) {
            Ok(v) => self.add(name, Member::Value(v)),
            Err(e) => {
                self.errors.push(format!("var '{}': {}", name, e));
                self
            }
        }
    }

    fn getter<V, G>(get: G) -> Getter
    where
        V: ToStack + 'static,
        G: Fn(&T) -> V + 'static,
    {
        Rc::new(move |state: &State, boxed: &UserBox| {
            let path = view_path::<T>(state, boxed)?;
            let value = {
                let this = boxed.borrow_as::<T>(&path)?;
                get(&*this)
            };
            push(state, value)
        })
    }

    fn setter<V, S>(set: S) -> Setter
    where
        V: FromStack + 'static,
        S: Fn(&mut T, V) + 'static,
    {
        Rc::new(move |state: &State, boxed: &UserBox, index: i32| {
            let value: V = if options::current(state).safe_function_calls {
                checked_get(state, index)?
            } else {
                get(state, index)?
            };
            let path = view_path::<T>(state, boxed)?;
            let mut this = boxed.borrow_mut_as::<T>(&path)?;
            set(&mut *this, value);
            Ok(())
        })
    }

    /// Read-write property
    pub fn property<V, G, S>(self, name: &str, get: G, set: S) -> Self
    where
        V: ToStack + FromStack + 'static,
        G: Fn(&T) -> V + 'static,
        S: Fn(&mut T, V) + 'static,
    {
        let member = Member::Property {
            get: Some(Self::getter(get)),
            set: Some(Self::setter(set)),
        };
        self.add(name, member)
    }

    /// Property that rejects writes
    pub fn property_readonly<V, G>(self, name: &str, get: G) -> Self
    where
        V: ToStack + 'static,
        G: Fn(&T) -> V + 'static,
    {
        let member = Member::Property {
            get: Some(Self::getter(get)),
            set: None,
        };
        self.add(name, member)
    }

    /// Property that rejects reads
    pub fn property_writeonly<V, S>(self, name: &str, set: S) -> Self
    where
        V: FromStack + 'static,
        S: Fn(&mut T, V) + 'static,
    {
        let member = Member::Property {
            get: None,
            set: Some(Self::setter(set)),
        };
        self.add(name, member)
    }

    /// Declare `B` as a base reached through the given accessors
    ///
    /// Members of `B` become visible on `T`, and `T` objects are accepted
    /// wherever a `B` is expected. Bases are searched in declaration order.
    pub fn base<B, U, W>(mut self, up: U, up_mut: W) -> Self
    where
        B: 'static,
        U: Fn(&T) -> &B + 'static,
        W: Fn(&mut T) -> &mut B + 'static,
    {
        self.inheritance.add_base(BaseLink::new::<T, B, U, W>(up, up_mut));
        self
    }

    // ========================================================================
    // Construction and destruction
    // ========================================================================

    fn set_construction(mut self, construction: Construction) -> Self {
        if matches!(self.construction, Construction::Default) {
            self.construction = construction;
        } else {
            self.errors
                .push("constructors declared more than once".to_string());
        }
        self
    }

    /// Constructor bound as `Type.new(...)`
    ///
    /// Takes a single function or an [`crate::Overload`] set. `Type:new(...)`
    /// works as well; the type handle passed as the first argument is
    /// dropped.
    pub fn constructor<M, F: IntoFunction<M>>(self, f: F) -> Self {
        self.set_construction(Construction::Candidates(f.into_candidates()))
    }

    /// Constructor creating `T::default()`
    pub fn default_constructor(self) -> Self
    where
        T: Default,
    {
        self.constructor(T::default)
    }

    /// Make `new` raise instead of constructing
    pub fn no_constructor(self) -> Self {
        self.set_construction(Construction::Disabled)
    }

    /// Make the type handle callable: `Type(...)` constructs
    pub fn call_constructor(mut self, enabled: bool) -> Self {
        self.call_constructor = enabled;
        self
    }

    /// Run `f` on owned objects right before they are dropped
    ///
    /// Not called for objects pushed through [`super::Ptr`] or
    /// [`super::Shared`], which the VM does not own.
    pub fn destructor<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut T) + 'static,
    {
        if self.destructor.is_some() {
            self.errors.push("destructor declared more than once".to_string());
            return self;
        }
        self.destructor = Some(Rc::new(move |obj: &mut dyn Any| {
            if let Some(this) = obj.downcast_mut::<T>() {
                f(this);
            }
        }));
        self
    }

    // ========================================================================
    // Dynamic members
    // ========================================================================

    /// Let scripts store unknown members on individual objects
    pub fn runtime_extensible(mut self, enabled: bool) -> Self {
        self.extensible = enabled;
        self
    }

    /// Called as `f(object, key)` when a read finds nothing
    pub fn index_fallback<M, F: IntoFunction<M>>(mut self, f: F) -> Self {
        let func = make_function(self.qualified("__index"), f.into_candidates());
        self.index_fallback = Some(Value::Function(func));
        self
    }

    /// Called as `f(object, key, value)` when a write finds nothing
    pub fn new_index_fallback<M, F: IntoFunction<M>>(mut self, f: F) -> Self {
        let func = make_function(self.qualified("__newindex"), f.into_candidates());
        self.new_index_fallback = Some(Value::Function(func));
        self
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn meta(mut self, event: MetaFunction, func: FunctionRef) -> Self {
        let value = Value::Function(func);
        match event {
            MetaFunction::Index => self.index_fallback = Some(value),
            MetaFunction::NewIndex => self.new_index_fallback = Some(value),
            MetaFunction::Gc => self
                .errors
                .push("'__gc' is reserved; use destructor()".to_string()),
            other => {
                self.metamethods.retain(|(name, _)| *name != other.name());
                self.metamethods.push((other.name(), value));
            }
        }
        self
    }

    /// Bind a free function to a metatable event
    ///
    /// Use this for operators whose left operand may not be a `T`.
    pub fn meta_function<M, F: IntoFunction<M>>(self, event: MetaFunction, f: F) -> Self {
        let func = make_function(self.qualified(event.name()), f.into_candidates());
        self.meta(event, func)
    }

    /// Bind a member function to a metatable event
    pub fn meta_method<M, F: IntoMethod<T, M>>(self, event: MetaFunction, f: F) -> Self {
        let func = make_function(self.qualified(event.name()), f.into_method_candidates());
        self.meta(event, func)
    }

    /// `==` through `PartialEq`; without it objects compare by identity
    ///
    /// Comparing with anything that is not a `T` yields false.
    pub fn eq_operator(self) -> Self
    where
        T: PartialEq,
    {
        self.meta_function(
            MetaFunction::Eq,
            |state: ThisState, a: Value, b: Value| -> Result<bool> {
                compare_objects::<T>(&state, &a, &b, true, |a, b| a == b)
            },
        )
    }

    /// `<` and `<=` through `PartialOrd`
    pub fn ord_operators(self) -> Self
    where
        T: PartialOrd,
    {
        self.meta_function(
            MetaFunction::Lt,
            |state: ThisState, a: Value, b: Value| -> Result<bool> {
                compare_objects::<T>(&state, &a, &b, false, |a, b| a < b)
            },
        )
        .meta_function(
            MetaFunction::Le,
            |state: ThisState, a: Value, b: Value| -> Result<bool> {
                compare_objects::<T>(&state, &a, &b, true, |a, b| {
                    matches!(a.partial_cmp(b), Some(Ordering::Less | Ordering::Equal))
                })
            },
        )
    }

    /// `tostring` through `Display`
    pub fn to_string_operator(self) -> Self
    where
        T: Display,
    {
        self.meta_method(MetaFunction::ToString, |a: &T| a.to_string())
    }

    /// `#obj`
    pub fn len_operator<M, F: IntoMethod<T, M>>(self, f: F) -> Self {
        self.meta_method(MetaFunction::Len, f)
    }

    /// `obj(...)`
    pub fn call_operator<M, F: IntoMethod<T, M>>(self, f: F) -> Self {
        self.meta_method(MetaFunction::Call, f)
    }

    /// `pairs(obj)` over a snapshot of the entries `f` produces
    pub fn pairs_operator<K, V, F>(self, f: F) -> Self
    where
        K: ToStack + 'static,
        V: ToStack + 'static,
        F: Fn(&T) -> Vec<(K, V)> + 'static,
    {
        let next = Value::Function(FunctionRef::named("next", |state| {
            protect(state, |state| {
                let table = state
                    .to_table(1)
                    .ok_or_else(|| Error::runtime("pairs state is not a table"))?;
                let entry = table.borrow().next(&state.value_at(2))?;
                match entry {
                    Some((k, v)) => {
                        state.push_value(k);
                        state.push_value(v);
                        Ok(2)
                    }
                    None => {
                        state.push_nil();
                        Ok(1)
                    }
                }
            })
        }));
        self.meta_method(
            MetaFunction::Pairs,
            move |this: &T, state: ThisState| -> Result<(Value, Value, Value)> {
                let snapshot = TableRef::new();
                for (k, v) in f(this) {
                    snapshot.set(to_value(&state, k)?, to_value(&state, v)?)?;
                }
                Ok((next.clone(), Value::Table(snapshot), Value::Nil))
            },
        )
    }

    // ========================================================================
    // Registration
    // ========================================================================

    fn constructor_value(&self) -> Option<Value> {
        let type_name = self.name.to_string();
        match &self.construction {
            Construction::Default => None,
            Construction::Disabled => Some(Value::Function(FunctionRef::named(
                self.qualified("new"),
                move |state| {
                    protect(state, |_| {
                        Err(Error::ConstructionFailure {
                            type_name: type_name.clone(),
                            reason: NON_CONSTRUCTIBLE.to_string(),
                        })
                    })
                },
            ))),
            Construction::Candidates(candidates) => {
                let candidates: Rc<[Candidate]> = Rc::from(candidates.clone());
                let handle_key = user_key(&self.name);
                Some(Value::Function(FunctionRef::named(
                    self.qualified("new"),
                    move |state| {
                        protect(state, |state| {
                            drop_type_handle(state, &handle_key)?;
                            call::dispatch(state, "new", &candidates).map_err(|e| match e {
                                Error::Native(reason) => Error::ConstructionFailure {
                                    type_name: type_name.clone(),
                                    reason,
                                },
                                other => other,
                            })
                        })
                    },
                )))
            }
        }
    }

    /// Build the core without publishing anything
    pub(crate) fn install(self) -> Result<Rc<UsertypeCore>> {
        if !self.errors.is_empty() {
            return Err(Error::runtime(format!(
                "invalid usertype '{}': {}",
                self.name,
                self.errors.join("; ")
            )));
        }
        let constructor = self.constructor_value();
        let spec = CoreSpec {
            name: self.name,
            type_id: TypeId::of::<T>(),
            inheritance: self.inheritance,
            members: self.members.into_iter().collect(),
            metamethods: self.metamethods,
            constructor,
            call_constructor: self.call_constructor,
            extensible: self.extensible,
            index_fallback: self.index_fallback,
            new_index_fallback: self.new_index_fallback,
            destructor: self.destructor,
        };
        Ok(UsertypeCore::install(self.state, spec))
    }

    /// Register the type and publish its handle as the global `name`
    ///
    /// Registering a type again replaces the earlier binding for objects
    /// pushed from then on.
    pub fn register(self) -> Result<Table> {
        let state = self.state;
        let bases = self.inheritance.bases().len();
        let core = self.install()?;
        TypeRegistry::of(state).insert(core.clone());

        debug!(
            name = %core.name,
            members = core.member_count(),
            bases,
            fast_path = core.fast_path,
            extensible = core.extensible,
            "registered usertype"
        );

        let handle = core.user_table.clone();
        state
            .globals()
            .set_str(&core.name, Value::Table(handle.clone()));
        Ok(Table::from_ref(state, handle))
    }
}

/// Remove the type handle `Type:new(...)` passes as the first argument
fn drop_type_handle(state: &State, handle_key: &str) -> Result<()> {
    let Some(first) = state.to_table(1) else {
        return Ok(());
    };
    let is_handle = match (first.metatable(), state.registry().get_str(handle_key)) {
        (Some(mt), Value::Table(expected)) => mt.ptr_eq(&expected),
        _ => false,
    };
    if is_handle {
        state.remove(1)?;
    }
    Ok(())
}

/// Apply `op` when both operands are `T` objects
///
/// Anything else compares false. The same object on both sides yields
/// `identical` without calling `op`.
fn compare_objects<T: 'static>(
    state: &State,
    a: &Value,
    b: &Value,
    identical: bool,
    op: fn(&T, &T) -> bool,
) -> Result<bool> {
    let (Some(a), Some(b)) = (
        UserRef::<T>::from_value(state, a),
        UserRef::<T>::from_value(state, b),
    ) else {
        return Ok(false);
    };
    let (a, b) = (a.borrow()?, b.borrow()?);
    if std::ptr::eq(&*a, &*b) {
        return Ok(identical);
    }
    Ok(op(&*a, &*b))
}
