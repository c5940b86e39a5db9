//! Native functions
//!
//! The VM has a single calling convention: a function receives the state of
//! the thread it runs on, finds its arguments at stack indices `1..=top`, and
//! returns how many results it left on top of the stack.

use std::fmt;
use std::rc::Rc;

use crate::state::State;
use crate::VmResult;

/// The native entry-point signature
pub type NativeFn = dyn Fn(&State) -> VmResult<usize>;

/// Work resumed after a yield
///
/// Invoked like a native function whose arguments are the values passed to
/// the resume that woke the coroutine.
pub type Continuation = Box<dyn FnOnce(&State) -> VmResult<usize>>;

/// A callable VM function
pub struct Function {
    name: Option<String>,
    body: Rc<NativeFn>,
}

impl Function {
    /// Invoke the body against `state`
    #[inline]
    pub fn invoke(&self, state: &State) -> VmResult<usize> {
        (self.body)(state)
    }

    /// Debug name given at creation
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Shared handle to a function
#[derive(Clone)]
pub struct FunctionRef(Rc<Function>);

impl FunctionRef {
    /// Wrap a closure
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&State) -> VmResult<usize> + 'static,
    {
        FunctionRef(Rc::new(Function {
            name: None,
            body: Rc::new(body),
        }))
    }

    /// Wrap a closure with a debug name
    pub fn named<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&State) -> VmResult<usize> + 'static,
    {
        FunctionRef(Rc::new(Function {
            name: Some(name.into()),
            body: Rc::new(body),
        }))
    }

    /// Wrap an already type-erased body
    pub fn from_rc(name: Option<String>, body: Rc<NativeFn>) -> Self {
        FunctionRef(Rc::new(Function { name, body }))
    }

    /// Debug name
    pub fn name(&self) -> Option<&str> {
        self.0.name()
    }

    /// Invoke the body directly, without a call frame
    ///
    /// Callers normally go through `State::call`, which sets up the frame
    /// the body's stack indices are relative to. Continuations use this to
    /// run a function in the frame the coroutine resumes into.
    pub fn invoke(&self, state: &State) -> VmResult<usize> {
        self.0.invoke(state)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &FunctionRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Identity address
    pub fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const u8 as usize
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "function '{}': {:#x}", name, self.address()),
            None => write!(f, "function: {:#x}", self.address()),
        }
    }
}
