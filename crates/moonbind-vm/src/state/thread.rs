//! Coroutine threads
//!
//! A coroutine is a secondary thread sharing the registry and globals of its
//! parent. Its life cycle:
//!
//! ```text
//!   new_thread ──► Suspended ──resume──► Running ──return──► Dead
//!                     ▲                     │
//!                     └────── yield ────────┘
//!                                           └──error───► Dead
//! ```
//!
//! Native functions cannot be suspended mid-body, so a yield ends the
//! yielding function. If it registered a continuation, the next resume runs
//! the continuation with the resume arguments; otherwise the coroutine
//! finishes and the resume arguments become its results. Only the function
//! directly running on the coroutine (not one it called) may yield.

use tracing::trace;

use super::State;
use crate::function::Continuation;
use crate::value::Value;
use crate::{VmError, VmResult};

/// Status of a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Not started, or suspended in a yield
    Suspended,
    /// Currently executing
    Running,
    /// Resumed another coroutine and is waiting for it
    Normal,
    /// Finished or failed
    Dead,
}

/// Outcome of a resume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeStatus {
    /// The coroutine yielded this many values
    Yield(usize),
    /// The coroutine returned this many values
    Finished(usize),
}

impl State {
    /// Create a coroutine thread, push it, and return its handle
    pub fn new_thread(&self) -> State {
        let thread = State::spawn(self.0.global.clone(), false);
        self.push_value(Value::Thread(thread.clone()));
        thread
    }

    /// Current status of this thread
    pub fn status(&self) -> ThreadStatus {
        self.0.status.get()
    }

    /// Resume this coroutine with the top `nargs` values of its own stack
    ///
    /// On the first resume the function below the arguments is the body. On
    /// success the yielded or returned values are on top of this thread's
    /// stack. `from` is the resuming thread, marked `Normal` meanwhile.
    pub fn resume(&self, from: Option<&State>, nargs: usize) -> VmResult<ResumeStatus> {
        if self.0.is_main {
            return Err(VmError::runtime("cannot resume the main thread"));
        }
        match self.status() {
            ThreadStatus::Suspended => {}
            ThreadStatus::Dead => return Err(VmError::runtime("cannot resume dead coroutine")),
            _ => return Err(VmError::runtime("cannot resume non-suspended coroutine")),
        }
        let from_status = from.map(|f| f.0.status.replace(ThreadStatus::Normal));
        self.0.status.set(ThreadStatus::Running);
        trace!(thread = self.address(), nargs, "resume");

        let outcome = if self.0.started.replace(true) {
            self.resume_continuation(nargs)
        } else {
            self.start(nargs)
        };

        if let (Some(f), Some(s)) = (from, from_status) {
            f.0.status.set(s);
        }

        match outcome {
            Ok(n) => {
                self.0.status.set(ThreadStatus::Dead);
                self.0.continuation.borrow_mut().take();
                Ok(ResumeStatus::Finished(n))
            }
            Err(VmError::Yield) if self.0.pending_yield.get().is_some() => {
                let n = self.0.pending_yield.take().unwrap_or(0);
                let base = self.0.yield_base.get();
                let mut stack = self.0.stack.borrow_mut();
                let at = stack.len() - n;
                let yielded = stack.split_off(at);
                stack.truncate(base);
                stack.extend(yielded);
                drop(stack);
                self.0.status.set(ThreadStatus::Suspended);
                trace!(yielded = n, "coroutine suspended");
                Ok(ResumeStatus::Yield(n))
            }
            Err(e) => {
                // A stray suspension signal means a nested call tried to yield.
                self.0.status.set(ThreadStatus::Dead);
                self.0.continuation.borrow_mut().take();
                Err(match e {
                    VmError::Yield => {
                        VmError::runtime("attempt to yield across a native call boundary")
                    }
                    other => other,
                })
            }
        }
    }

    fn start(&self, nargs: usize) -> VmResult<usize> {
        let func_pos = self.function_position(nargs)?;
        let f = self.resolve_callable(func_pos)?;
        self.0.yield_base.set(func_pos);
        let n = self.run_frame(func_pos + 1, |s| f.invoke(s))?;
        self.settle_results(func_pos, n, None);
        Ok(n)
    }

    fn resume_continuation(&self, nargs: usize) -> VmResult<usize> {
        let base = self.0.yield_base.get();
        {
            let mut stack = self.0.stack.borrow_mut();
            let at = stack.len().saturating_sub(nargs).max(base);
            let args = stack.split_off(at);
            stack.truncate(base);
            stack.extend(args);
        }
        let k = self.0.continuation.borrow_mut().take();
        match k {
            Some(k) => {
                let n = self.run_frame(base, k)?;
                self.settle_results(base, n, None);
                Ok(n)
            }
            None => Ok(self.stack_len() - base),
        }
    }

    /// Yield the top `nresults` values to the resumer
    ///
    /// Must be the tail of a native function running directly on a
    /// coroutine: `return state.yield_with(n, k)`. The returned error is the
    /// suspension signal and must be propagated unchanged.
    pub fn yield_with(&self, nresults: usize, continuation: Option<Continuation>) -> VmResult<usize> {
        if self.0.is_main {
            return Err(VmError::runtime("attempt to yield from outside a coroutine"));
        }
        if self.0.depth.get() != 1 {
            return Err(VmError::Yield);
        }
        if nresults as i32 > self.top() {
            return Err(VmError::runtime("not enough values on the stack to yield"));
        }
        *self.0.continuation.borrow_mut() = continuation;
        self.0.pending_yield.set(Some(nresults));
        Err(VmError::Yield)
    }

    /// Whether this thread can be resumed
    pub fn is_resumable(&self) -> bool {
        !self.0.is_main && self.status() == ThreadStatus::Suspended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Status, Vm};

    fn counter_body(s: &State) -> VmResult<usize> {
        let start = s.to_integer(1).unwrap_or(0);
        s.push_integer(start);
        s.yield_with(
            1,
            Some(Box::new(move |s: &State| {
                let step = s.to_integer(1).unwrap_or(1);
                s.push_integer(start + step);
                Ok(1)
            })),
        )
    }

    #[test]
    fn test_yield_and_continue() {
        let vm = Vm::new();
        let co = vm.new_thread();
        assert_eq!(co.status(), ThreadStatus::Suspended);

        co.push_function(counter_body);
        co.push_integer(10);
        assert_eq!(co.resume(Some(vm.state()), 1).unwrap(), ResumeStatus::Yield(1));
        assert_eq!(co.to_integer(-1), Some(10));
        assert_eq!(co.status(), ThreadStatus::Suspended);
        assert_eq!(vm.status(), ThreadStatus::Running);

        co.pop(1);
        co.push_integer(5);
        assert_eq!(co.resume(Some(vm.state()), 1).unwrap(), ResumeStatus::Finished(1));
        assert_eq!(co.to_integer(-1), Some(15));
        assert_eq!(co.status(), ThreadStatus::Dead);
        assert!(!co.is_resumable());
        assert_eq!(
            co.resume(None, 0).unwrap_err().to_string(),
            "cannot resume dead coroutine"
        );
    }

    #[test]
    fn test_yield_without_continuation_finishes() {
        let vm = Vm::new();
        let co = vm.new_thread();
        co.push_function(|s| s.yield_with(0, None));
        assert_eq!(co.resume(None, 0).unwrap(), ResumeStatus::Yield(0));
        co.push_string("a");
        co.push_string("b");
        assert_eq!(co.resume(None, 2).unwrap(), ResumeStatus::Finished(2));
        assert_eq!(co.to_string(-2).unwrap().as_bytes(), b"a");
    }

    #[test]
    fn test_yield_across_call_boundary() {
        let vm = Vm::new();
        let co = vm.new_thread();
        co.push_function(|s| {
            s.push_function(|inner| inner.yield_with(0, None));
            let status = s.pcall(0, Some(0), 0);
            assert_eq!(status, Status::RuntimeError);
            let msg = s.to_string(-1).map(|m| m.to_string_lossy()).unwrap_or_default();
            s.push_string(msg);
            Ok(1)
        });
        assert_eq!(co.resume(None, 0).unwrap(), ResumeStatus::Finished(1));
        assert_eq!(
            co.to_string(-1).unwrap().as_bytes(),
            b"attempt to yield across a native call boundary"
        );
    }

    #[test]
    fn test_nested_yield_is_an_error() {
        let vm = Vm::new();
        let co = vm.new_thread();
        co.push_function(|s| {
            s.push_function(|inner| inner.yield_with(0, None));
            s.call(0, None)?;
            Ok(0)
        });
        let err = co.resume(None, 0).unwrap_err();
        assert_eq!(err.to_string(), "attempt to yield across a native call boundary");
        assert_eq!(co.status(), ThreadStatus::Dead);
    }

    #[test]
    fn test_yield_on_main_thread() {
        let vm = Vm::new();
        let err = vm.yield_with(0, None).unwrap_err();
        assert_eq!(err.to_string(), "attempt to yield from outside a coroutine");
    }

    #[test]
    fn test_error_kills_coroutine() {
        let vm = Vm::new();
        let co = vm.new_thread();
        co.push_function(|_| Err(VmError::runtime("inside")));
        assert_eq!(co.resume(None, 0).unwrap_err().to_string(), "inside");
        assert_eq!(co.status(), ThreadStatus::Dead);
    }

    #[test]
    fn test_threads_share_globals() {
        let vm = Vm::new();
        vm.push_integer(3);
        vm.set_global("shared").unwrap();
        let co = vm.new_thread();
        co.push_function(|s| {
            s.get_global("shared")?;
            Ok(1)
        });
        co.resume(None, 0).unwrap();
        assert_eq!(co.to_integer(-1), Some(3));
    }
}
