//! VM state and value stacks
//!
//! A [`State`] is a handle to one thread of a VM instance. Every thread owns a
//! value stack and a list of call frames; all threads of an instance share one
//! global state holding the registry, the globals table, application data
//! and the finalizer list.
//!
//! # Stack indexing
//!
//! ```text
//!               ┌───────────────┐
//!   index -1 →  │ value₄        │  ← top
//!   index -2 →  │ value₃        │
//!   index  2 →  │ arg₂          │
//!   index  1 →  │ arg₁          │  ← frame base
//!               ├───────────────┤
//!               │ function      │
//!               │ caller frame  │
//!               │ ...           │
//!               └───────────────┘
//! ```
//!
//! Positive indices are relative to the running function's frame base,
//! negative indices to the top. [`REGISTRY_INDEX`] is a pseudo-index naming
//! the registry table. Reading an index past the top yields `nil` and
//! [`Type::None`].
//!
//! # Submodules
//!
//! - `call`: unprotected and protected calls
//! - `meta`: metamethod-aware operations
//! - `thread`: coroutines
//! - `gc`: finalizers and shutdown

mod call;
mod gc;
mod meta;
mod thread;

pub use meta::{ArithOp, CompareOp};
pub use thread::{ResumeStatus, ThreadStatus};

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use once_cell::unsync::OnceCell;
use rustc_hash::FxHashMap;

use crate::function::{Continuation, FunctionRef};
use crate::table::TableRef;
use crate::userdata::{TypeTag, UserdataRef};
use crate::value::{Type, Value, VmString};
use crate::{VmError, VmResult};

/// Pseudo-index of the registry table
pub const REGISTRY_INDEX: i32 = -1_001_000;

/// Registry slot holding the globals table
pub const RIDX_GLOBALS: i64 = 2;

/// Reference returned for `nil` values
pub const REF_NIL: i64 = -1;

/// First registry slot handed out by [`State::reference`]
const FIRST_REF: i64 = 3;

/// Default maximum stack size (in slots)
const DEFAULT_MAX_STACK_SIZE: usize = 1024 * 64;

/// Default maximum nesting of native calls
const DEFAULT_MAX_CALL_DEPTH: usize = 200;

/// Status of a protected call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Completed without error
    Ok,
    /// The callee raised an error; the error object is on the stack
    RuntimeError,
    /// The message handler itself failed
    HandlerError,
}

/// VM instance options
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Maximum number of slots a thread stack may grow to
    pub max_stack_size: usize,
    /// Maximum nesting of native calls (across all threads)
    pub max_call_depth: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

// ============================================================================
// Shared and per-thread state
// ============================================================================

/// State shared by every thread of a VM instance
pub(crate) struct GlobalState {
    registry: TableRef,
    globals: TableRef,
    free_refs: RefCell<Vec<i64>>,
    next_ref: Cell<i64>,
    app_data: RefCell<FxHashMap<TypeId, Rc<dyn Any>>>,
    finalizers: RefCell<Vec<UserdataRef>>,
    threads: RefCell<Vec<Weak<ThreadState>>>,
    main: OnceCell<Weak<ThreadState>>,
    native_calls: Cell<usize>,
    closed: Cell<bool>,
    options: VmOptions,
}

#[derive(Debug, Clone, Copy)]
struct CallFrame {
    /// Stack position of the first argument
    base: usize,
}

/// A thread: value stack plus call frames
pub(crate) struct ThreadState {
    global: Rc<GlobalState>,
    stack: RefCell<Vec<Value>>,
    frames: RefCell<Vec<CallFrame>>,
    is_main: bool,
    status: Cell<ThreadStatus>,
    started: Cell<bool>,
    /// Native calls currently running on this thread
    depth: Cell<usize>,
    /// Stack position yielded values are moved down to
    yield_base: Cell<usize>,
    pending_yield: Cell<Option<usize>>,
    continuation: RefCell<Option<Continuation>>,
}

/// Handle to a VM thread
#[derive(Clone)]
pub struct State(Rc<ThreadState>);

/// Non-owning handle to a VM thread
#[derive(Clone)]
pub struct WeakState(Weak<ThreadState>);

impl WeakState {
    /// Recover the thread if it is still alive
    pub fn upgrade(&self) -> Option<State> {
        self.0.upgrade().map(State)
    }
}

impl State {
    /// Create a fresh VM instance and return its main thread
    ///
    /// The instance's reference cycles are only broken by [`State::close`];
    /// prefer [`Vm`], which closes on drop.
    pub fn new(options: VmOptions) -> State {
        let registry = TableRef::new();
        let globals = TableRef::new();
        registry
            .borrow_mut()
            .set_int(RIDX_GLOBALS, Value::Table(globals.clone()));
        let global = Rc::new(GlobalState {
            registry,
            globals,
            free_refs: RefCell::new(Vec::new()),
            next_ref: Cell::new(FIRST_REF),
            app_data: RefCell::new(FxHashMap::default()),
            finalizers: RefCell::new(Vec::new()),
            threads: RefCell::new(Vec::new()),
            main: OnceCell::new(),
            native_calls: Cell::new(0),
            closed: Cell::new(false),
            options,
        });
        let main = State::spawn(global.clone(), true);
        let _ = global.main.set(Rc::downgrade(&main.0));
        main
    }

    fn spawn(global: Rc<GlobalState>, is_main: bool) -> State {
        let thread = Rc::new(ThreadState {
            global: global.clone(),
            stack: RefCell::new(Vec::with_capacity(64)),
            frames: RefCell::new(vec![CallFrame { base: 0 }]),
            is_main,
            status: Cell::new(if is_main {
                ThreadStatus::Running
            } else {
                ThreadStatus::Suspended
            }),
            started: Cell::new(is_main),
            depth: Cell::new(0),
            yield_base: Cell::new(0),
            pending_yield: Cell::new(None),
            continuation: RefCell::new(None),
        });
        global.threads.borrow_mut().push(Rc::downgrade(&thread));
        State(thread)
    }

    /// The main thread of this instance, if it is still alive
    pub fn main_thread(&self) -> Option<State> {
        self.0.global.main.get().and_then(Weak::upgrade).map(State)
    }

    /// Whether this is the main thread
    pub fn is_main_thread(&self) -> bool {
        self.0.is_main
    }

    /// Non-owning handle to this thread
    pub fn downgrade(&self) -> WeakState {
        WeakState(Rc::downgrade(&self.0))
    }

    /// Whether two handles name the same thread
    pub fn ptr_eq(&self, other: &State) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Whether two threads belong to the same VM instance
    pub fn same_vm(&self, other: &State) -> bool {
        Rc::ptr_eq(&self.0.global, &other.0.global)
    }

    /// Identity address
    pub fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const u8 as usize
    }

    /// Instance options
    pub fn options(&self) -> &VmOptions {
        &self.0.global.options
    }

    /// Whether the instance has been closed
    pub fn is_closed(&self) -> bool {
        self.0.global.closed.get()
    }

    // ========================================================================
    // Index resolution
    // ========================================================================

    fn base(&self) -> usize {
        self.0.frames.borrow().last().map(|f| f.base).unwrap_or(0)
    }

    pub(crate) fn stack_len(&self) -> usize {
        self.0.stack.borrow().len()
    }

    /// Absolute stack position of a valid (non-pseudo) index
    fn position(&self, idx: i32) -> Option<usize> {
        let base = self.base();
        let len = self.stack_len();
        if idx > 0 {
            let pos = base + idx as usize - 1;
            (pos < len).then_some(pos)
        } else if idx < 0 && idx > REGISTRY_INDEX {
            let pos = len as i64 + idx as i64;
            (pos >= base as i64).then_some(pos as usize)
        } else {
            None
        }
    }

    fn position_or_err(&self, idx: i32) -> VmResult<usize> {
        self.position(idx)
            .ok_or_else(|| VmError::runtime(format!("invalid stack index {}", idx)))
    }

    /// Number of values in the current frame
    pub fn top(&self) -> i32 {
        (self.stack_len() - self.base()) as i32
    }

    /// Convert a top-relative index into a frame-relative one
    pub fn abs_index(&self, idx: i32) -> i32 {
        if idx > 0 || idx <= REGISTRY_INDEX {
            idx
        } else {
            self.top() + idx + 1
        }
    }

    /// Value at `idx`, or `nil` past the top
    pub fn value_at(&self, idx: i32) -> Value {
        if idx == REGISTRY_INDEX {
            return Value::Table(self.0.global.registry.clone());
        }
        match self.position(idx) {
            Some(pos) => self.0.stack.borrow()[pos].clone(),
            None => Value::Nil,
        }
    }

    /// Type of the slot at `idx`
    pub fn type_of(&self, idx: i32) -> Type {
        if idx == REGISTRY_INDEX {
            return Type::Table;
        }
        match self.position(idx) {
            Some(pos) => self.0.stack.borrow()[pos].type_of(),
            None => Type::None,
        }
    }

    /// Whether `idx` is past the top
    pub fn is_none(&self, idx: i32) -> bool {
        self.type_of(idx) == Type::None
    }

    /// Whether `idx` is past the top or holds `nil`
    pub fn is_none_or_nil(&self, idx: i32) -> bool {
        matches!(self.type_of(idx), Type::None | Type::Nil)
    }

    // ========================================================================
    // Stack manipulation
    // ========================================================================

    /// Ensure room for `extra` more slots
    pub fn check_stack(&self, extra: usize) -> VmResult<()> {
        if self.stack_len() + extra > self.0.global.options.max_stack_size {
            Err(VmError::StackOverflow)
        } else {
            Ok(())
        }
    }

    /// Push any value
    pub fn push_value(&self, value: Value) {
        self.0.stack.borrow_mut().push(value);
    }

    /// Push `nil`
    pub fn push_nil(&self) {
        self.push_value(Value::Nil);
    }

    /// Push a boolean
    pub fn push_boolean(&self, b: bool) {
        self.push_value(Value::Boolean(b));
    }

    /// Push an integer
    pub fn push_integer(&self, i: i64) {
        self.push_value(Value::Integer(i));
    }

    /// Push a float
    pub fn push_number(&self, n: f64) {
        self.push_value(Value::Number(n));
    }

    /// Push a string
    pub fn push_string(&self, s: impl Into<VmString>) {
        self.push_value(Value::String(s.into()));
    }

    /// Push a native function
    pub fn push_function<F>(&self, f: F)
    where
        F: Fn(&State) -> VmResult<usize> + 'static,
    {
        self.push_value(Value::Function(FunctionRef::new(f)));
    }

    /// Push an opaque address
    pub fn push_light_userdata(&self, p: usize) {
        self.push_value(Value::LightUserdata(p));
    }

    /// Push this thread
    pub fn push_thread(&self) {
        self.push_value(Value::Thread(self.clone()));
    }

    /// Push a copy of the value at `idx`
    pub fn push_copy(&self, idx: i32) {
        let v = self.value_at(idx);
        self.push_value(v);
    }

    /// Create and push a table
    pub fn new_table(&self) -> TableRef {
        let t = TableRef::new();
        self.push_value(Value::Table(t.clone()));
        t
    }

    /// Allocate and push a userdata block
    pub fn new_userdata(&self, payload: Rc<dyn Any>, tag: Option<TypeTag>) -> UserdataRef {
        let ud = UserdataRef::new(payload, tag);
        self.push_value(Value::Userdata(ud.clone()));
        ud
    }

    /// Pop `n` values
    pub fn pop(&self, n: usize) {
        let base = self.base();
        let mut stack = self.0.stack.borrow_mut();
        let keep = stack.len().saturating_sub(n).max(base);
        stack.truncate(keep);
    }

    /// Pop and return the top value (`nil` on an empty frame)
    pub fn pop_value(&self) -> Value {
        let base = self.base();
        let mut stack = self.0.stack.borrow_mut();
        if stack.len() > base {
            stack.pop().unwrap_or_default()
        } else {
            Value::Nil
        }
    }

    /// Set the top: non-negative values are frame-relative sizes, negative
    /// values are top-relative indices
    pub fn set_top(&self, idx: i32) {
        let base = self.base();
        let mut stack = self.0.stack.borrow_mut();
        let new_len = if idx >= 0 {
            base + idx as usize
        } else {
            (stack.len() as i64 + idx as i64 + 1).max(base as i64) as usize
        };
        stack.resize(new_len, Value::Nil);
    }

    /// Move the top value into position `idx`, shifting values up
    pub fn insert(&self, idx: i32) -> VmResult<()> {
        let pos = self.position_or_err(idx)?;
        let mut stack = self.0.stack.borrow_mut();
        if let Some(v) = stack.pop() {
            stack.insert(pos, v);
        }
        Ok(())
    }

    /// Remove the value at `idx`, shifting values down
    pub fn remove(&self, idx: i32) -> VmResult<Value> {
        let pos = self.position_or_err(idx)?;
        Ok(self.0.stack.borrow_mut().remove(pos))
    }

    /// Pop the top value into position `idx`
    pub fn replace(&self, idx: i32) -> VmResult<()> {
        let pos = self.position_or_err(idx)?;
        let mut stack = self.0.stack.borrow_mut();
        if let Some(v) = stack.pop() {
            if pos < stack.len() {
                stack[pos] = v;
            } else {
                stack.push(v);
            }
        }
        Ok(())
    }

    /// Move the top `n` values of this thread onto `to`
    pub fn xmove(&self, to: &State, n: usize) {
        if self.ptr_eq(to) || n == 0 {
            return;
        }
        let moved = {
            let mut stack = self.0.stack.borrow_mut();
            let at = stack.len().saturating_sub(n);
            stack.split_off(at)
        };
        to.0.stack.borrow_mut().extend(moved);
    }

    /// The top `n` values, bottom first, without popping
    pub fn peek_values(&self, n: usize) -> Vec<Value> {
        let stack = self.0.stack.borrow();
        let at = stack.len().saturating_sub(n).max(self.base());
        stack[at..].to_vec()
    }

    // ========================================================================
    // Typed reads
    // ========================================================================

    /// Truthiness of `idx`
    pub fn to_boolean(&self, idx: i32) -> bool {
        self.value_at(idx).is_truthy()
    }

    /// Integer at `idx`, with float and string coercion
    pub fn to_integer(&self, idx: i32) -> Option<i64> {
        self.value_at(idx).to_integer()
    }

    /// Float at `idx`, with string coercion
    pub fn to_number(&self, idx: i32) -> Option<f64> {
        self.value_at(idx).to_number()
    }

    /// String at `idx`, converting numbers
    pub fn to_string(&self, idx: i32) -> Option<VmString> {
        self.value_at(idx).coerce_string()
    }

    /// Table at `idx`
    pub fn to_table(&self, idx: i32) -> Option<TableRef> {
        match self.value_at(idx) {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Function at `idx`
    pub fn to_function(&self, idx: i32) -> Option<FunctionRef> {
        match self.value_at(idx) {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Userdata at `idx`
    pub fn to_userdata(&self, idx: i32) -> Option<UserdataRef> {
        match self.value_at(idx) {
            Value::Userdata(u) => Some(u),
            _ => None,
        }
    }

    /// Thread at `idx`
    pub fn to_thread(&self, idx: i32) -> Option<State> {
        match self.value_at(idx) {
            Value::Thread(s) => Some(s),
            _ => None,
        }
    }

    // ========================================================================
    // Tables
    // ========================================================================

    fn table_at(&self, idx: i32) -> VmResult<TableRef> {
        match self.value_at(idx) {
            Value::Table(t) => Ok(t),
            other => Err(VmError::runtime(format!(
                "table expected, got {}",
                other.type_name()
            ))),
        }
    }

    /// Push `t[name]` (with metamethods) where `t` is at `idx`
    pub fn get_field(&self, idx: i32, name: &str) -> VmResult<Type> {
        let target = self.value_at(idx);
        let v = self.index_value(&target, &Value::from(name))?;
        let ty = v.type_of();
        self.push_value(v);
        Ok(ty)
    }

    /// Pop a value and assign it to `t[name]` (with metamethods)
    pub fn set_field(&self, idx: i32, name: &str) -> VmResult<()> {
        let target = self.value_at(self.abs_index(idx));
        let v = self.pop_value();
        self.new_index_value(&target, Value::from(name), v)
    }

    /// Pop a key and push `t[key]` (with metamethods)
    pub fn get_table(&self, idx: i32) -> VmResult<Type> {
        let target = self.value_at(self.abs_index(idx));
        let key = self.pop_value();
        let v = self.index_value(&target, &key)?;
        let ty = v.type_of();
        self.push_value(v);
        Ok(ty)
    }

    /// Pop a value and a key, then assign `t[key] = value` (with metamethods)
    pub fn set_table(&self, idx: i32) -> VmResult<()> {
        let target = self.value_at(self.abs_index(idx));
        let value = self.pop_value();
        let key = self.pop_value();
        self.new_index_value(&target, key, value)
    }

    /// Pop a key and push the raw field
    pub fn raw_get(&self, idx: i32) -> VmResult<Type> {
        let t = self.table_at(self.abs_index(idx))?;
        let key = self.pop_value();
        let v = t.get(&key);
        let ty = v.type_of();
        self.push_value(v);
        Ok(ty)
    }

    /// Pop a value and a key, then assign the raw field
    pub fn raw_set(&self, idx: i32) -> VmResult<()> {
        let t = self.table_at(self.abs_index(idx))?;
        let value = self.pop_value();
        let key = self.pop_value();
        t.set(key, value)
    }

    /// Push the raw field `t[n]`
    pub fn raw_get_index(&self, idx: i32, n: i64) -> VmResult<Type> {
        let t = self.table_at(idx)?;
        let v = t.borrow().get_int(n);
        let ty = v.type_of();
        self.push_value(v);
        Ok(ty)
    }

    /// Pop a value into the raw field `t[n]`
    pub fn raw_set_index(&self, idx: i32, n: i64) -> VmResult<()> {
        let t = self.table_at(self.abs_index(idx))?;
        let value = self.pop_value();
        t.borrow_mut().set_int(n, value);
        Ok(())
    }

    /// Raw length of the value at `idx` (strings, tables; 0 otherwise)
    pub fn raw_len(&self, idx: i32) -> usize {
        match self.value_at(idx) {
            Value::String(s) => s.len(),
            Value::Table(t) => t.borrow().len() as usize,
            _ => 0,
        }
    }

    /// Pop a key and push the next key/value pair of the table at `idx`
    ///
    /// Returns `false` (pushing nothing) when the traversal is complete.
    pub fn next(&self, idx: i32) -> VmResult<bool> {
        let t = self.table_at(self.abs_index(idx))?;
        let key = self.pop_value();
        let step = t.borrow().next(&key)?;
        match step {
            Some((k, v)) => {
                self.push_value(k);
                self.push_value(v);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ========================================================================
    // Metatables
    // ========================================================================

    /// Metatable of a value (tables and userdata only)
    pub fn metatable_of(&self, value: &Value) -> Option<TableRef> {
        match value {
            Value::Table(t) => t.metatable(),
            Value::Userdata(u) => u.metatable(),
            _ => None,
        }
    }

    /// Push the metatable of the value at `idx`; `false` if it has none
    pub fn get_metatable(&self, idx: i32) -> bool {
        match self.metatable_of(&self.value_at(idx)) {
            Some(mt) => {
                self.push_value(Value::Table(mt));
                true
            }
            None => false,
        }
    }

    /// Pop a table (or `nil`) and install it as the metatable of `idx`
    pub fn set_metatable(&self, idx: i32) -> VmResult<()> {
        let target = self.value_at(self.abs_index(idx));
        let mt = match self.pop_value() {
            Value::Table(t) => Some(t),
            Value::Nil => None,
            other => {
                return Err(VmError::runtime(format!(
                    "metatable must be a table or nil, got {}",
                    other.type_name()
                )))
            }
        };
        self.set_metatable_of(&target, mt)
    }

    /// Install the metatable of a table or userdata value
    pub fn set_metatable_of(&self, target: &Value, mt: Option<TableRef>) -> VmResult<()> {
        match target {
            Value::Table(t) => {
                t.borrow_mut().set_metatable(mt);
                Ok(())
            }
            Value::Userdata(u) => {
                let finalizable = mt.as_ref().is_some_and(|m| !m.get_str("__gc").is_nil());
                u.set_metatable(mt);
                if finalizable {
                    self.register_finalizer(u);
                }
                Ok(())
            }
            other => Err(VmError::runtime(format!(
                "cannot set the metatable of a {} value",
                other.type_name()
            ))),
        }
    }

    /// Find or create the registry metatable named `name` and push it
    ///
    /// Returns `true` when the table was created by this call. New tables
    /// get a `__name` field.
    pub fn new_metatable(&self, name: &str) -> bool {
        let registry = &self.0.global.registry;
        if let Value::Table(existing) = registry.get_str(name) {
            self.push_value(Value::Table(existing));
            return false;
        }
        let mt = TableRef::new();
        mt.set_str("__name", Value::from(name));
        registry.set_str(name, Value::Table(mt.clone()));
        self.push_value(Value::Table(mt));
        true
    }

    /// Registry metatable named `name`, if any
    pub fn registry_metatable(&self, name: &str) -> Option<TableRef> {
        match self.0.global.registry.get_str(name) {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    // ========================================================================
    // Registry and globals
    // ========================================================================

    /// The registry table
    pub fn registry(&self) -> TableRef {
        self.0.global.registry.clone()
    }

    /// The globals table
    pub fn globals(&self) -> TableRef {
        self.0.global.globals.clone()
    }

    /// Push the global `name`
    pub fn get_global(&self, name: &str) -> VmResult<Type> {
        let g = Value::Table(self.globals());
        let v = self.index_value(&g, &Value::from(name))?;
        let ty = v.type_of();
        self.push_value(v);
        Ok(ty)
    }

    /// Pop a value into the global `name`
    pub fn set_global(&self, name: &str) -> VmResult<()> {
        let v = self.pop_value();
        self.new_index_value(&Value::Table(self.globals()), Value::from(name), v)
    }

    /// Pop a value and anchor it in the registry, returning its slot
    pub fn reference(&self) -> i64 {
        let v = self.pop_value();
        if v.is_nil() {
            return REF_NIL;
        }
        let global = &self.0.global;
        let slot = global.free_refs.borrow_mut().pop().unwrap_or_else(|| {
            let next = global.next_ref.get();
            global.next_ref.set(next + 1);
            next
        });
        global.registry.borrow_mut().set_int(slot, v);
        slot
    }

    /// Release a registry slot
    pub fn unreference(&self, slot: i64) {
        let global = &self.0.global;
        if slot < FIRST_REF || global.closed.get() {
            return;
        }
        global.registry.borrow_mut().set_int(slot, Value::Nil);
        global.free_refs.borrow_mut().push(slot);
    }

    /// Value anchored at a registry slot
    pub fn dereference(&self, slot: i64) -> Value {
        if slot == REF_NIL {
            return Value::Nil;
        }
        self.0.global.registry.borrow().get_int(slot)
    }

    /// Push the value anchored at a registry slot
    pub fn push_reference(&self, slot: i64) {
        let v = self.dereference(slot);
        self.push_value(v);
    }

    // ========================================================================
    // Application data
    // ========================================================================

    /// Application data of type `T`
    pub fn app_data<T: Any>(&self) -> Option<Rc<T>> {
        let data = self.0.global.app_data.borrow();
        let entry = data.get(&TypeId::of::<T>())?.clone();
        Rc::downcast::<T>(entry).ok()
    }

    /// Store application data of type `T`, replacing any previous value
    pub fn set_app_data<T: Any>(&self, value: Rc<T>) {
        self.0
            .global
            .app_data
            .borrow_mut()
            .insert(TypeId::of::<T>(), value);
    }

    /// Application data of type `T`, created on first use
    pub fn app_data_or_init<T: Any>(&self, init: impl FnOnce() -> T) -> Rc<T> {
        if let Some(existing) = self.app_data::<T>() {
            return existing;
        }
        let created = Rc::new(init());
        self.set_app_data(created.clone());
        created
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread: {:#x}", self.address())
    }
}

// ============================================================================
// Owning handle
// ============================================================================

/// Owning handle to a VM instance; closes the instance on drop
pub struct Vm {
    main: State,
}

impl Vm {
    /// Create a VM with default options
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// Create a VM with specific options
    pub fn with_options(options: VmOptions) -> Self {
        Vm {
            main: State::new(options),
        }
    }

    /// The main thread
    pub fn state(&self) -> &State {
        &self.main
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for Vm {
    type Target = State;

    fn deref(&self) -> &State {
        &self.main
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        self.main.close();
    }
}
