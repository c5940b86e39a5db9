//! Coroutine handles
//!
//! ```text
//!   create ──► Suspended ──resume──► Yielded(values) ──resume──► ...
//!                                 └─► Finished(values)   (dead afterwards)
//!                                 └─► Err(..)            (dead afterwards)
//! ```
//!
//! Bodies are ordinary bound functions. A body suspends by returning
//! [`Yield`](crate::Yield); the values it carries become the output of the
//! pending `resume`, and the arguments of the next `resume` go to its
//! continuation (or become the final results when it has none).

use moonbind_vm::{ResumeStatus, State, ThreadStatus, Value};
use tracing::trace;

use crate::error::{Error, Result};
use crate::function::Function;
use crate::reference::{describe, impl_handle, Reference};
use crate::stack::{get, FromStack, ToStack};

/// Output of one resume
#[derive(Debug, Clone, PartialEq)]
pub enum CoroutineResult<R> {
    /// The body yielded these values and can be resumed again
    Yielded(R),
    /// The body returned these values
    Finished(R),
}

impl<R> CoroutineResult<R> {
    /// The values, however they were produced
    pub fn into_inner(self) -> R {
        match self {
            CoroutineResult::Yielded(v) | CoroutineResult::Finished(v) => v,
        }
    }

    /// Whether the coroutine finished
    pub fn is_finished(&self) -> bool {
        matches!(self, CoroutineResult::Finished(_))
    }
}

/// A VM thread held from Rust
#[derive(Debug, Clone)]
pub struct Coroutine(Reference);

impl Coroutine {
    pub(crate) fn from_reference(_: &State, reference: Reference) -> Self {
        Coroutine(reference)
    }

    /// A suspended coroutine that will run `body` on its first resume
    pub fn new(body: &Function) -> Result<Self> {
        let state = body.reference().state()?;
        let thread = state.new_thread();
        let value = state.pop_value();
        body.reference().push(&thread)?;
        trace!(thread = thread.address(), "coroutine created");
        Ok(Coroutine(Reference::new(&state, value)))
    }

    /// The underlying reference
    pub fn reference(&self) -> &Reference {
        &self.0
    }

    fn thread(&self) -> Result<State> {
        match self.0.value()? {
            Value::Thread(thread) => Ok(thread),
            other => Err(Error::runtime(format!(
                "expected a thread reference, found {}",
                other.type_name()
            ))),
        }
    }

    /// Resume with `args`, reading the yielded or returned values as `R`
    ///
    /// Errors raised by the body end the coroutine and are returned as
    /// [`Error::Runtime`].
    pub fn resume<A: ToStack, R: FromStack>(&self, args: A) -> Result<CoroutineResult<R>> {
        let thread = self.thread()?;
        if !thread.is_resumable() {
            let reason = match thread.status() {
                ThreadStatus::Dead => "cannot resume dead coroutine",
                _ => "cannot resume non-suspended coroutine",
            };
            return Err(Error::runtime(reason));
        }
        let base = thread.top();
        let nargs = match args.push_to(&thread) {
            Ok(n) => n,
            Err(e) => {
                thread.set_top(base);
                return Err(e);
            }
        };
        let (n, finished) = match thread.resume(None, nargs) {
            Ok(ResumeStatus::Yield(n)) => (n, false),
            Ok(ResumeStatus::Finished(n)) => (n, true),
            Err(e) => {
                let message = describe(&thread, &e.into_value());
                trace!(thread = thread.address(), %message, "coroutine failed");
                return Err(Error::Runtime(message));
            }
        };
        trace!(thread = thread.address(), results = n, finished, "coroutine resumed");
        let first = thread.top() - n as i32 + 1;
        let values = get::<R>(&thread, first);
        thread.set_top(first - 1);
        let values = values?;
        Ok(if finished {
            CoroutineResult::Finished(values)
        } else {
            CoroutineResult::Yielded(values)
        })
    }

    /// Current status; a handle whose VM has closed reads as dead
    pub fn status(&self) -> ThreadStatus {
        self.thread()
            .map_or(ThreadStatus::Dead, |thread| thread.status())
    }

    /// Whether `resume` can be called
    pub fn is_resumable(&self) -> bool {
        self.thread().is_ok_and(|thread| thread.is_resumable())
    }
}

impl_handle!(Coroutine, Primitive, "thread", |v| matches!(v, Value::Thread(_)));

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{function, Yield};
    use moonbind_vm::Vm;

    fn coroutine<M>(vm: &Vm, body: impl crate::call::IntoFunction<M>) -> Coroutine {
        let f = Function::from_ref(vm, function("body", body));
        Coroutine::new(&f).unwrap()
    }

    #[test]
    fn test_finishes_without_yield() {
        let vm = Vm::new();
        let co = coroutine(&vm, |a: i64, b: i64| a * b);
        assert_eq!(co.status(), ThreadStatus::Suspended);
        let out = co.resume::<_, i64>((6, 7)).unwrap();
        assert_eq!(out, CoroutineResult::Finished(42));
        assert_eq!(co.status(), ThreadStatus::Dead);
        assert!(!co.is_resumable());
        assert!(co.resume::<_, ()>(()).is_err());
    }

    #[test]
    fn test_yield_then_continue() {
        let vm = Vm::new();
        let co = coroutine(&vm, |start: i64| {
            Yield::then(start, move |step: i64| start + step)
        });
        assert_eq!(co.resume::<_, i64>(10).unwrap(), CoroutineResult::Yielded(10));
        assert!(co.is_resumable());
        assert_eq!(co.resume::<_, i64>(5).unwrap(), CoroutineResult::Finished(15));
    }

    #[test]
    fn test_yield_without_continuation_returns_resume_args() {
        let vm = Vm::new();
        let co = coroutine(&vm, || Yield::new("paused"));
        let first = co.resume::<_, String>(()).unwrap();
        assert_eq!(first, CoroutineResult::Yielded("paused".to_string()));
        let last = co.resume::<_, (i32, i32)>((1, 2)).unwrap();
        assert_eq!(last, CoroutineResult::Finished((1, 2)));
    }

    #[test]
    fn test_error_kills_coroutine() {
        let vm = Vm::new();
        let co = coroutine(&vm, || -> Result<()> { Err(Error::external("no more")) });
        let err = co.resume::<_, ()>(()).unwrap_err();
        assert!(matches!(err, Error::Runtime(ref m) if m == "no more"));
        assert_eq!(co.status(), ThreadStatus::Dead);
    }
}
