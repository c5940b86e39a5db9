//! Call dispatch
//!
//! Native callables become VM functions in two steps. First each callable is
//! turned into one or more [`Candidate`]s: a static [`Signature`] plus a
//! `check` closure (validates the stack without reading it) and an `invoke`
//! closure (reads the arguments, calls, pushes the results). Then
//! [`make_function`] wraps the candidates in a single entry point:
//!
//! ```text
//!   one candidate                      several candidates (overload set)
//!   ─────────────                      ─────────────────────────────────
//!   receiver nil?  ──► NullReceiver    for each, in declaration order:
//!   arity ok?      ──► ArityMismatch     arity ok? ──no──► next
//!   types ok?      ──► TypeMismatch      types ok? ──no──► next
//!   invoke                               invoke ◄── first match wins
//!                                      none matched ──► NoMatchingOverload
//! ```
//!
//! For a single candidate the checks run only when the corresponding safety
//! option is on. Overload resolution always checks; it has no other way of
//! choosing.

mod callable;
mod trampoline;

pub use callable::{ExclusiveRecv, IntoFunction, IntoMethod, IntoResults, SharedRecv, Yield};
pub use trampoline::{clear_exception_handler, set_exception_handler, ExceptionHandler};

pub(crate) use trampoline::protect;

use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

use moonbind_vm::{FunctionRef, State};
use tracing::trace;

use crate::classify::{add_slots, TypeDescriptor};
use crate::error::{Error, Result};
use crate::options;
use crate::stack::{no_panic, Mismatch};

// ============================================================================
// Signatures
// ============================================================================

/// Static shape of a callable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Declared parameters, excluding the receiver
    pub params: Vec<TypeDescriptor>,
    /// Fewest stack arguments accepted, receiver included
    pub min_args: usize,
    /// Most stack arguments accepted; `None` for variadic callables
    pub max_args: Option<usize>,
    /// Receiver type name, for member functions
    pub receiver: Option<Cow<'static, str>>,
}

impl Signature {
    /// Signature from parameter descriptors
    pub fn new(params: Vec<TypeDescriptor>, receiver: Option<Cow<'static, str>>) -> Self {
        let own = usize::from(receiver.is_some());
        let min_args = own + params.iter().map(|p| p.min_slots).sum::<usize>();
        let max_args = params
            .iter()
            .fold(Some(own), |acc, p| add_slots(acc, p.max_slots));
        Signature {
            params,
            min_args,
            max_args,
            receiver,
        }
    }

    /// Whether `n` stack arguments fit
    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min_args && self.max_args.map_or(true, |max| n <= max)
    }

    /// Whether the callable absorbs any number of trailing arguments
    pub fn is_variadic(&self) -> bool {
        self.max_args.is_none()
    }

    /// Accepted argument count, for messages
    pub fn arity(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => max.to_string(),
            Some(max) => format!("{} to {}", self.min_args, max),
            None => format!("at least {}", self.min_args),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        let mut first = true;
        if let Some(recv) = &self.receiver {
            write!(f, "self: {}", recv)?;
            first = false;
        }
        for p in &self.params {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}", p.name)?;
            first = false;
        }
        write!(f, ")")
    }
}

// ============================================================================
// Candidates
// ============================================================================

type CheckFn = dyn Fn(&State, &mut dyn FnMut(Mismatch)) -> bool;
type InvokeFn = dyn Fn(&State) -> Result<usize>;

/// One native callable ready for dispatch
#[derive(Clone)]
pub struct Candidate {
    signature: Signature,
    check: Rc<CheckFn>,
    invoke: Rc<InvokeFn>,
}

impl Candidate {
    pub(crate) fn new<C, I>(signature: Signature, check: C, invoke: I) -> Self
    where
        C: Fn(&State, &mut dyn FnMut(Mismatch)) -> bool + 'static,
        I: Fn(&State) -> Result<usize> + 'static,
    {
        Candidate {
            signature,
            check: Rc::new(check),
            invoke: Rc::new(invoke),
        }
    }

    /// Static shape of the callable
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Validate the current frame's arguments
    pub(crate) fn check(&self, state: &State, handler: &mut dyn FnMut(Mismatch)) -> bool {
        (self.check)(state, handler)
    }

    /// Read the arguments, call, push the results
    pub(crate) fn invoke(&self, state: &State) -> Result<usize> {
        (self.invoke)(state)
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("signature", &self.signature.to_string())
            .finish()
    }
}

/// An ordered overload set under construction
///
/// ```ignore
/// let moves = Overload::new()
///     .method(|p: &mut Point, dx: f64| p.x += dx)
///     .method(|p: &mut Point, dx: f64, dy: f64| { p.x += dx; p.y += dy; });
/// ```
#[derive(Debug, Clone, Default)]
pub struct Overload {
    candidates: Vec<Candidate>,
}

impl Overload {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a free function
    pub fn function<M, F: IntoFunction<M>>(mut self, f: F) -> Self {
        self.candidates.extend(f.into_candidates());
        self
    }

    /// Append a member function of `T`
    pub fn method<T, M, F: IntoMethod<T, M>>(mut self, f: F) -> Self {
        self.candidates.extend(f.into_method_candidates());
        self
    }

    /// Number of candidates
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether the set has no candidates
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl IntoFunction<Overload> for Overload {
    fn into_candidates(self) -> Vec<Candidate> {
        self.candidates
    }
}

impl<T> IntoMethod<T, Overload> for Overload {
    fn into_method_candidates(self) -> Vec<Candidate> {
        self.candidates
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Call the single candidate with the current frame's arguments
fn call_single(state: &State, name: &str, candidate: &Candidate) -> Result<usize> {
    let options = options::current(state);
    let signature = &candidate.signature;
    if let Some(recv) = &signature.receiver {
        if options.safe_usertype && state.is_none_or_nil(1) {
            return Err(Error::NullReceiver {
                type_name: recv.to_string(),
            });
        }
    }
    if options.safe_function_calls {
        let nargs = state.top() as usize;
        if !signature.accepts(nargs) {
            return Err(Error::ArityMismatch {
                name: name.to_string(),
                expected: signature.arity(),
                actual: nargs,
            });
        }
        let mut failure = None;
        if !candidate.check(state, &mut |m| {
            failure.get_or_insert(m);
        }) {
            return Err(match failure {
                Some(m) => m.into(),
                None => Error::runtime(format!("invalid arguments to '{}'", name)),
            });
        }
    }
    candidate.invoke(state)
}

/// Pick the first candidate whose arity and types fit, and call it
fn call_overloaded(state: &State, name: &str, candidates: &[Candidate]) -> Result<usize> {
    let nargs = state.top() as usize;
    for (i, candidate) in candidates.iter().enumerate() {
        if !candidate.signature.accepts(nargs) {
            trace!(name, candidate = i, nargs, "overload rejected by arity");
            continue;
        }
        if !candidate.check(state, &mut no_panic) {
            trace!(name, candidate = i, nargs, "overload rejected by type");
            continue;
        }
        trace!(name, candidate = i, nargs, "overload selected");
        return candidate.invoke(state);
    }
    if let Some(recv) = candidates.iter().find_map(|c| c.signature.receiver.as_ref()) {
        if state.is_none_or_nil(1) && options::current(state).safe_usertype {
            return Err(Error::NullReceiver {
                type_name: recv.to_string(),
            });
        }
    }
    Err(Error::NoMatchingOverload {
        name: name.to_string(),
        arguments: nargs,
    })
}

/// Dispatch the current frame to `candidates`
pub(crate) fn dispatch(state: &State, name: &str, candidates: &[Candidate]) -> Result<usize> {
    match candidates {
        [] => Err(Error::runtime(format!("'{}' has no callable bound", name))),
        [single] => call_single(state, name, single),
        many => call_overloaded(state, name, many),
    }
}

/// A VM function dispatching to `candidates` behind the boundary
pub(crate) fn make_function(name: impl Into<String>, candidates: Vec<Candidate>) -> FunctionRef {
    let name: String = name.into();
    let label: Rc<str> = Rc::from(name.as_str());
    let candidates: Rc<[Candidate]> = Rc::from(candidates);
    FunctionRef::named(name, move |state| {
        protect(state, |state| dispatch(state, &label, &candidates))
    })
}

/// Bind a free function or overload set as a VM function
pub fn function<M, F: IntoFunction<M>>(name: impl Into<String>, f: F) -> FunctionRef {
    make_function(name, f.into_candidates())
}
