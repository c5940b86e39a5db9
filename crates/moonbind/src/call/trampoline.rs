//! The native/VM boundary
//!
//! Every bound function runs inside [`protect`]. Whatever goes wrong in the
//! body, an `Err` result or a panic, is turned into a VM error object here
//! and never unwinds into the VM:
//!
//! ```text
//!   VM ──call──► protect ──► body ──► Ok(n)            ──► n results
//!                   │                 Err(Error::Vm)    ──► passed through
//!                   │                 Err(other)        ──► handler(err, msg)
//!                   └─ catch_unwind ─ panic             ──► handler(Panic, msg)
//! ```
//!
//! VM errors pass through untouched so that error objects raised by nested
//! calls, and the suspension signal of a yield, reach their destination.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use moonbind_vm::{State, Value, VmError, VmResult};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Builds the error object raised for a failure caught at the boundary
///
/// Receives the failure (`None` for a panic with an unrecognized payload)
/// and its message.
pub type ExceptionHandler = dyn Fn(&State, Option<&Error>, &str) -> Value;

#[derive(Default)]
struct HandlerSlot(RefCell<Option<Rc<ExceptionHandler>>>);

/// Replace the exception handler of the VM `state` belongs to
pub fn set_exception_handler<F>(state: &State, handler: F)
where
    F: Fn(&State, Option<&Error>, &str) -> Value + 'static,
{
    *state.app_data_or_init(HandlerSlot::default).0.borrow_mut() = Some(Rc::new(handler));
}

/// Restore the default exception handler
pub fn clear_exception_handler(state: &State) {
    if let Some(slot) = state.app_data::<HandlerSlot>() {
        slot.0.borrow_mut().take();
    }
}

fn default_handler(_: &State, err: Option<&Error>, msg: &str) -> Value {
    debug!(error = ?err, "native failure caught at call boundary: {}", msg);
    Value::from(msg)
}

fn error_object(state: &State, err: Option<&Error>, msg: &str) -> Value {
    let handler = state
        .app_data::<HandlerSlot>()
        .and_then(|slot| slot.0.borrow().clone());
    match handler {
        Some(h) => h(state, err, msg),
        None => default_handler(state, err, msg),
    }
}

/// Message carried by a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> Option<String> {
    if let Some(s) = payload.downcast_ref::<&str>() {
        Some(s.to_string())
    } else {
        payload.downcast_ref::<String>().cloned()
    }
}

/// Run a bound function body, converting failures into VM errors
pub(crate) fn protect<F>(state: &State, body: F) -> VmResult<usize>
where
    F: FnOnce(&State) -> Result<usize>,
{
    match catch_unwind(AssertUnwindSafe(|| body(state))) {
        Ok(Ok(n)) => Ok(n),
        Ok(Err(Error::Vm(e))) => Err(e),
        Ok(Err(err)) => {
            let msg = err.to_string();
            Err(VmError::Runtime(error_object(state, Some(&err), &msg)))
        }
        Err(payload) => match panic_message(payload.as_ref()) {
            Some(msg) => {
                warn!("bound function panicked: {}", msg);
                let err = Error::Panic(msg);
                let msg = err.to_string();
                Err(VmError::Runtime(error_object(state, Some(&err), &msg)))
            }
            None => {
                warn!("bound function panicked with a non-string payload");
                Err(VmError::Runtime(error_object(state, None, "Unknown panic")))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moonbind_vm::Vm;

    #[test]
    fn test_ok_passes_through() {
        let vm = Vm::new();
        assert_eq!(protect(&vm, |_| Ok(3)).unwrap(), 3);
    }

    #[test]
    fn test_error_becomes_message() {
        let vm = Vm::new();
        let err = protect(&vm, |_| Err(Error::from("boom"))).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_vm_errors_are_untouched() {
        let vm = Vm::new();
        let err = protect(&vm, |_| Err(Error::Vm(VmError::Yield))).unwrap_err();
        assert!(matches!(err, VmError::Yield));
    }

    #[test]
    fn test_panic_is_caught() {
        let vm = Vm::new();
        let err = protect(&vm, |_| -> Result<usize> { panic!("kaput") }).unwrap_err();
        assert_eq!(err.to_string(), "Function panicked: kaput");

        let err = protect(&vm, |_| -> Result<usize> { std::panic::panic_any(7u8) }).unwrap_err();
        assert_eq!(err.to_string(), "Unknown panic");
    }

    #[test]
    fn test_custom_handler() {
        let vm = Vm::new();
        set_exception_handler(&vm, |_, err, msg| {
            let kind = match err {
                Some(Error::Native(_)) => "native",
                Some(_) => "other",
                None => "unknown",
            };
            Value::from(format!("[{}] {}", kind, msg))
        });
        let err = protect(&vm, |_| Err(Error::from("bad input"))).unwrap_err();
        assert_eq!(err.to_string(), "[native] bad input");

        clear_exception_handler(&vm);
        let err = protect(&vm, |_| Err(Error::from("bad input"))).unwrap_err();
        assert_eq!(err.to_string(), "bad input");
    }
}
