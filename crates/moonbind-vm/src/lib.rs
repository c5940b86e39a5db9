//! moonbind VM substrate
//!
//! This crate provides the embeddable stack VM that the binding layer talks to:
//! - Tagged values with reference-counted strings, tables, functions and userdata
//! - Per-thread value stacks with frame-relative indexing
//! - A registry table for anchoring long-lived references
//! - Metatables and the metamethod protocol (`__index`, `__call`, `__gc`, ...)
//! - Protected calls with message handlers
//! - Coroutine threads with continuation-based yields
//!
//! There is no script compiler or interpreter loop: every function is native.
//! Tests and embedders drive the VM through the same stack API a script
//! interpreter would use.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod function;
pub mod state;
pub mod table;
pub mod userdata;
pub mod value;

pub use function::{Continuation, FunctionRef, NativeFn};
pub use state::{
    ArithOp, CompareOp, ResumeStatus, State, Status, ThreadStatus, Vm, VmOptions, WeakState,
    REF_NIL, REGISTRY_INDEX, RIDX_GLOBALS,
};
pub use table::{Table, TableRef};
pub use userdata::{Deleter, TypeTag, Userdata, UserdataRef};
pub use value::{Type, Value, VmString};

/// VM errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum VmError {
    /// A raised error object
    #[error("{}", describe_error_value(.0))]
    Runtime(Value),

    /// Value stack or native call depth exhausted
    #[error("stack overflow")]
    StackOverflow,

    /// The message handler of a protected call failed
    #[error("error in error handling")]
    ErrorHandling,

    /// Suspension signal travelling from a yielding function to `resume`
    #[error("attempt to yield across a native call boundary")]
    Yield,
}

impl VmError {
    /// Runtime error carrying a message string
    pub fn runtime(msg: impl Into<String>) -> Self {
        VmError::Runtime(Value::from(msg.into()))
    }

    /// The error object scripts observe
    pub fn into_value(self) -> Value {
        match self {
            VmError::Runtime(v) => v,
            other => Value::from(other.to_string()),
        }
    }
}

fn describe_error_value(v: &Value) -> String {
    match v.coerce_string() {
        Some(s) => s.to_string_lossy(),
        None => format!("(error object is a {} value)", v.type_name()),
    }
}

/// VM operation result
pub type VmResult<T> = Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(VmError::runtime("boom").to_string(), "boom");
        assert_eq!(VmError::Runtime(Value::Integer(3)).to_string(), "3");
        assert_eq!(
            VmError::Runtime(Value::Boolean(true)).to_string(),
            "(error object is a boolean value)"
        );
        assert_eq!(VmError::StackOverflow.to_string(), "stack overflow");
    }

    #[test]
    fn test_error_into_value() {
        let v = VmError::StackOverflow.into_value();
        assert_eq!(v.as_string().unwrap().as_bytes(), b"stack overflow");
        let v = VmError::Runtime(Value::Integer(9)).into_value();
        assert_eq!(v.to_integer(), Some(9));
    }
}
