//! Function handles
//!
//! [`Function::call`] is the unprotected convention: an error raised by the
//! callee comes back unchanged as [`Error::Vm`], so a native function that
//! calls back into the VM can simply `?` it and let the error keep
//! travelling. [`ProtectedFunction::call`] stops errors at the call and
//! reports them as [`Error::Runtime`] with the error object's display text,
//! after routing the object through an optional message handler.

use moonbind_vm::{FunctionRef, State, Status, Value};

use crate::error::{Error, Result};
use crate::reference::{describe, impl_handle, Reference};
use crate::stack::{get, FromStack, ToStack};

/// A callable VM value held from Rust
#[derive(Debug, Clone)]
pub struct Function(Reference);

impl Function {
    pub(crate) fn from_reference(_: &State, reference: Reference) -> Self {
        Function(reference)
    }

    pub(crate) fn from_ref(state: &State, function: FunctionRef) -> Self {
        Function(Reference::new(state, Value::Function(function)))
    }

    /// The underlying reference
    pub fn reference(&self) -> &Reference {
        &self.0
    }

    /// Call with `args`, reading the results as `R`
    ///
    /// The stack is restored whether or not the call succeeds.
    pub fn call<A: ToStack, R: FromStack>(&self, args: A) -> Result<R> {
        let state = self.0.state()?;
        let base = state.top();
        let result = self.0.push(&state).and_then(|_| {
            let nargs = args.push_to(&state)?;
            state.call(nargs, None)?;
            get::<R>(&state, base + 1)
        });
        state.set_top(base);
        result
    }

    /// Protected view of this function without a message handler
    pub fn protected(self) -> ProtectedFunction {
        ProtectedFunction {
            function: self,
            handler: None,
        }
    }

    /// Protected view routing error objects through `handler`
    pub fn with_handler(self, handler: Function) -> ProtectedFunction {
        ProtectedFunction {
            function: self,
            handler: Some(handler),
        }
    }
}

impl_handle!(Function, Function, "function", |v| {
    matches!(v, Value::Function(_))
});

/// A function called under protection
#[derive(Debug, Clone)]
pub struct ProtectedFunction {
    function: Function,
    handler: Option<Function>,
}

impl ProtectedFunction {
    /// The wrapped function
    pub fn function(&self) -> &Function {
        &self.function
    }

    /// Replace the message handler
    pub fn set_handler(&mut self, handler: Option<Function>) {
        self.handler = handler;
    }

    /// Call with `args`
    ///
    /// A raised error, after the handler (if any) has transformed it, is
    /// returned as [`Error::Runtime`]. The stack is restored either way.
    pub fn call<A: ToStack, R: FromStack>(&self, args: A) -> Result<R> {
        let state = self.function.reference().state()?;
        let base = state.top();
        let result = self.invoke(&state, base, args);
        state.set_top(base);
        result
    }

    fn invoke<A: ToStack, R: FromStack>(&self, state: &State, base: i32, args: A) -> Result<R> {
        let handler_index = match &self.handler {
            Some(h) => {
                h.reference().push(state)?;
                base + 1
            }
            None => 0,
        };
        let func_index = state.top() + 1;
        self.function.reference().push(state)?;
        let nargs = args.push_to(state)?;
        match state.pcall(nargs, None, handler_index) {
            Status::Ok => get::<R>(state, func_index),
            _ => Err(Error::Runtime(describe(state, &state.value_at(-1)))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moonbind_vm::{Vm, VmError};

    fn native(vm: &Vm, f: impl Fn(&State) -> moonbind_vm::VmResult<usize> + 'static) -> Function {
        Function::from_ref(vm, FunctionRef::new(f))
    }

    fn adder(vm: &Vm) -> Function {
        native(vm, |s| {
            let a = s.to_integer(1).unwrap_or(0);
            let b = s.to_integer(2).unwrap_or(0);
            s.push_integer(a + b);
            Ok(1)
        })
    }

    fn failing(vm: &Vm) -> Function {
        native(vm, |_| Err(VmError::runtime("bad thing")))
    }

    #[test]
    fn test_call_returns_results() {
        let vm = Vm::new();
        let sum: i64 = adder(&vm).call((2, 3)).unwrap();
        assert_eq!(sum, 5);
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn test_call_multiple_results() {
        let vm = Vm::new();
        let f = native(&vm, |s| {
            s.push_integer(1);
            s.push_string("two");
            Ok(2)
        });
        let (a, b): (i32, String) = f.call(()).unwrap();
        assert_eq!((a, b.as_str()), (1, "two"));
    }

    #[test]
    fn test_call_error_is_vm_error() {
        let vm = Vm::new();
        let err = failing(&vm).call::<_, ()>(()).unwrap_err();
        assert!(matches!(err, Error::Vm(VmError::Runtime(_))));
        assert_eq!(err.to_string(), "bad thing");
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn test_protected_call() {
        let vm = Vm::new();
        let err = failing(&vm).protected().call::<_, ()>(()).unwrap_err();
        assert!(matches!(err, Error::Runtime(ref m) if m == "bad thing"));
        let ok: i64 = adder(&vm).protected().call((4, 4)).unwrap();
        assert_eq!(ok, 8);
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn test_protected_call_with_handler() {
        let vm = Vm::new();
        let handler = native(&vm, |s| {
            let msg = s.to_string(1).map(|m| m.to_string_lossy()).unwrap_or_default();
            s.push_string(format!("handled: {}", msg));
            Ok(1)
        });
        let err = failing(&vm)
            .with_handler(handler)
            .call::<_, ()>(())
            .unwrap_err();
        assert_eq!(err.to_string(), "handled: bad thing");
        assert_eq!(vm.top(), 0);
    }
}
