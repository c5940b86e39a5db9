//! Calls
//!
//! `call` runs a function and lets errors propagate as `Err`; `pcall` stops
//! them at its boundary, restores the stack and leaves the error object on
//! top. Both expect the function followed by its arguments on top of the
//! stack and replace them with the results.

use super::{CallFrame, State, Status};
use crate::function::FunctionRef;
use crate::value::Value;
use crate::{VmError, VmResult};

/// Longest `__call` chain followed before giving up
const MAX_CALL_CHAIN: usize = 100;

impl State {
    /// Call the function below the top `nargs` values
    ///
    /// `nresults` of `None` keeps every result; `Some(n)` pads with `nil` or
    /// truncates to exactly `n`.
    pub fn call(&self, nargs: usize, nresults: Option<usize>) -> VmResult<()> {
        let func_pos = self.function_position(nargs)?;
        let f = self.resolve_callable(func_pos)?;
        let n = self.run_frame(func_pos + 1, |s| f.invoke(s))?;
        self.settle_results(func_pos, n, nresults);
        Ok(())
    }

    /// Protected call: errors are caught and reported as a status
    ///
    /// `handler` is a stack index of a message handler (0 for none). The
    /// handler receives the error object and its first result replaces it.
    pub fn pcall(&self, nargs: usize, nresults: Option<usize>, handler: i32) -> Status {
        let handler = (handler != 0).then(|| self.value_at(handler));
        let func_pos = match self.function_position(nargs) {
            Ok(pos) => pos,
            Err(e) => {
                self.push_value(e.into_value());
                return Status::RuntimeError;
            }
        };
        let frames = self.0.frames.borrow().len();
        match self.call(nargs, nresults) {
            Ok(()) => Status::Ok,
            Err(e) => {
                self.0.frames.borrow_mut().truncate(frames);
                let err = match e {
                    VmError::Yield => Value::from(VmError::Yield.to_string()),
                    other => other.into_value(),
                };
                self.0.stack.borrow_mut().truncate(func_pos);
                let (status, err) = match handler {
                    None => (Status::RuntimeError, err),
                    Some(h) => match self.call_values(&h, &[err]) {
                        Ok(results) => (
                            Status::RuntimeError,
                            results.into_iter().next().unwrap_or_default(),
                        ),
                        Err(_) => (
                            Status::HandlerError,
                            Value::from(VmError::ErrorHandling.to_string()),
                        ),
                    },
                };
                self.push_value(err);
                status
            }
        }
    }

    /// Call `f` with `args`, returning every result
    ///
    /// The stack is left as it was found, whether or not the call fails.
    pub fn call_values(&self, f: &Value, args: &[Value]) -> VmResult<Vec<Value>> {
        self.check_stack(args.len() + 1)?;
        let func_pos = self.stack_len();
        {
            let mut stack = self.0.stack.borrow_mut();
            stack.push(f.clone());
            stack.extend(args.iter().cloned());
        }
        match self.call(args.len(), None) {
            Ok(()) => Ok(self.0.stack.borrow_mut().split_off(func_pos)),
            Err(e) => {
                self.0.stack.borrow_mut().truncate(func_pos);
                Err(e)
            }
        }
    }

    /// Call `f` with `args`, returning the first result (or `nil`)
    pub fn call_value(&self, f: &Value, args: &[Value]) -> VmResult<Value> {
        Ok(self.call_values(f, args)?.into_iter().next().unwrap_or_default())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    pub(super) fn function_position(&self, nargs: usize) -> VmResult<usize> {
        let len = self.stack_len();
        match len.checked_sub(nargs + 1) {
            Some(pos) if pos >= self.base() => Ok(pos),
            _ => Err(VmError::runtime("not enough values on the stack for call")),
        }
    }

    /// Replace a non-function at `func_pos` with its `__call` handler,
    /// shifting the original value into the first argument position
    pub(super) fn resolve_callable(&self, func_pos: usize) -> VmResult<FunctionRef> {
        for _ in 0..MAX_CALL_CHAIN {
            let v = self.0.stack.borrow()[func_pos].clone();
            if let Value::Function(f) = v {
                return Ok(f);
            }
            let handler = self.metafield(&v, "__call");
            if handler.is_nil() {
                return Err(VmError::runtime(format!(
                    "attempt to call a {} value",
                    v.type_name()
                )));
            }
            self.0.stack.borrow_mut().insert(func_pos, handler);
        }
        Err(VmError::runtime("'__call' chain too long; possible loop"))
    }

    /// Run `body` in a frame based at `base`, returning its result count
    pub(super) fn run_frame<F>(&self, base: usize, body: F) -> VmResult<usize>
    where
        F: FnOnce(&State) -> VmResult<usize>,
    {
        let global = &self.0.global;
        if global.native_calls.get() >= global.options.max_call_depth
            || self.stack_len() > global.options.max_stack_size
        {
            return Err(VmError::StackOverflow);
        }
        global.native_calls.set(global.native_calls.get() + 1);
        self.0.depth.set(self.0.depth.get() + 1);
        self.0.frames.borrow_mut().push(CallFrame { base });

        let result = body(self);

        self.0.frames.borrow_mut().pop();
        self.0.depth.set(self.0.depth.get() - 1);
        global.native_calls.set(global.native_calls.get() - 1);

        let n = result?;
        let available = self.stack_len().saturating_sub(base);
        if n > available {
            return Err(VmError::runtime(format!(
                "native function returned {} results but pushed only {}",
                n, available
            )));
        }
        Ok(n)
    }

    /// Move the top `n` values down to `func_pos`, adjusted to `nresults`
    pub(super) fn settle_results(&self, func_pos: usize, n: usize, nresults: Option<usize>) {
        let mut stack = self.0.stack.borrow_mut();
        let len = stack.len();
        let results = stack.split_off(len - n);
        stack.truncate(func_pos);
        match nresults {
            None => stack.extend(results),
            Some(want) => stack.extend(
                results
                    .into_iter()
                    .chain(std::iter::repeat(Value::Nil))
                    .take(want),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Vm;
    use crate::VmOptions;

    fn add(state: &State) -> VmResult<usize> {
        let a = state.to_integer(1).unwrap_or(0);
        let b = state.to_integer(2).unwrap_or(0);
        state.push_integer(a + b);
        Ok(1)
    }

    #[test]
    fn test_call_adjusts_results() {
        let vm = Vm::new();
        vm.push_function(add);
        vm.push_integer(2);
        vm.push_integer(3);
        vm.call(2, Some(3)).unwrap();
        assert_eq!(vm.top(), 3);
        assert_eq!(vm.to_integer(1), Some(5));
        assert!(vm.value_at(3).is_nil());
    }

    #[test]
    fn test_frames_are_relative() {
        let vm = Vm::new();
        vm.push_string("below");
        vm.push_function(|s| {
            assert_eq!(s.top(), 1);
            assert_eq!(s.to_integer(1), Some(7));
            Ok(0)
        });
        vm.push_integer(7);
        vm.call(1, None).unwrap();
        assert_eq!(vm.top(), 1);
    }

    #[test]
    fn test_call_metamethod() {
        let vm = Vm::new();
        let callable = vm.new_table();
        let mt = crate::TableRef::new();
        mt.set_str(
            "__call",
            Value::Function(FunctionRef::new(|s| {
                // self is argument 1
                assert_eq!(s.type_of(1), crate::Type::Table);
                s.push_integer(s.top() as i64);
                Ok(1)
            })),
        );
        callable.borrow_mut().set_metatable(Some(mt));
        vm.push_integer(10);
        vm.call(1, Some(1)).unwrap();
        assert_eq!(vm.to_integer(-1), Some(2));
    }

    #[test]
    fn test_call_non_function() {
        let vm = Vm::new();
        vm.push_integer(1);
        let err = vm.call(0, None).unwrap_err();
        assert_eq!(err.to_string(), "attempt to call a number value");
    }

    #[test]
    fn test_pcall_restores_stack() {
        let vm = Vm::new();
        vm.push_string("keep");
        vm.push_function(|s| {
            s.push_integer(1);
            s.push_integer(2);
            Err(VmError::runtime("boom"))
        });
        let status = vm.pcall(0, None, 0);
        assert_eq!(status, Status::RuntimeError);
        assert_eq!(vm.top(), 2);
        assert_eq!(vm.to_string(-1).unwrap().as_bytes(), b"boom");
    }

    #[test]
    fn test_pcall_message_handler() {
        let vm = Vm::new();
        vm.push_function(|s| {
            let msg = s.to_string(1).map(|m| m.to_string_lossy()).unwrap_or_default();
            s.push_string(format!("handled: {}", msg));
            Ok(1)
        });
        vm.push_function(|_| Err(VmError::runtime("bad")));
        assert_eq!(vm.pcall(0, Some(1), 1), Status::RuntimeError);
        assert_eq!(vm.to_string(-1).unwrap().as_bytes(), b"handled: bad");
    }

    #[test]
    fn test_pcall_failing_handler() {
        let vm = Vm::new();
        vm.push_function(|_| Err(VmError::runtime("again")));
        vm.push_function(|_| Err(VmError::runtime("bad")));
        assert_eq!(vm.pcall(0, Some(1), 1), Status::HandlerError);
        assert_eq!(
            vm.to_string(-1).unwrap().as_bytes(),
            b"error in error handling"
        );
    }

    #[test]
    fn test_call_depth_limit() {
        fn recurse(s: &State) -> VmResult<usize> {
            s.push_function(recurse);
            s.call(0, Some(0))?;
            Ok(0)
        }
        let vm = Vm::with_options(VmOptions {
            max_call_depth: 16,
            ..VmOptions::default()
        });
        vm.push_function(recurse);
        assert_eq!(vm.pcall(0, Some(0), 0), Status::RuntimeError);
        assert_eq!(vm.to_string(-1).unwrap().as_bytes(), b"stack overflow");
        // Depth counters unwind with the error.
        vm.push_function(add);
        vm.call(0, Some(1)).unwrap();
    }

    #[test]
    fn test_call_values_leaves_stack() {
        let vm = Vm::new();
        vm.push_integer(99);
        let f = Value::Function(FunctionRef::new(add));
        let results = vm
            .call_values(&f, &[Value::Integer(1), Value::Integer(2)])
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].to_integer(), Some(3));
        assert_eq!(vm.top(), 1);
        assert!(vm.call_values(&Value::Nil, &[]).is_err());
        assert_eq!(vm.top(), 1);
    }
}
