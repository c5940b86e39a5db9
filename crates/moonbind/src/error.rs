//! Error types for the binding layer

use moonbind_vm::{Value, VmError};

/// Result type for binding operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Binding errors
///
/// Every variant except [`Error::Vm`] is raised into the VM as a string
/// error object when it crosses a native call boundary; `Vm` errors travel
/// unchanged so that error objects and yields survive nested calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A stack slot does not hold the expected type
    #[error("stack index {index}, expected {expected}, received {actual}")]
    TypeMismatch {
        /// Frame-relative stack index
        index: i32,
        /// Expected type name
        expected: String,
        /// Type name found in the slot
        actual: String,
    },

    /// Wrong number of arguments for a single callable
    #[error("Function '{name}' expects {expected} arguments, got {actual}")]
    ArityMismatch {
        /// Callable name
        name: String,
        /// Accepted argument count, e.g. `2` or `1 to 3`
        expected: String,
        /// Number of arguments received
        actual: usize,
    },

    /// No candidate of an overload set accepts the arguments
    #[error("no matching function call takes this number of arguments and the specified types ('{name}' called with {arguments} argument(s))")]
    NoMatchingOverload {
        /// Overload set name
        name: String,
        /// Number of arguments received
        arguments: usize,
    },

    /// A member function was called with a nil receiver
    #[error("received nil for 'self' argument of '{type_name}' (use ':' for accessing member functions, make sure member variables are preceded by the actual object with '.' syntax)")]
    NullReceiver {
        /// Receiver type name
        type_name: String,
    },

    /// A constructor could not produce an instance
    #[error("cannot construct '{type_name}': {reason}")]
    ConstructionFailure {
        /// Type being constructed
        type_name: String,
        /// What went wrong
        reason: String,
    },

    /// Assignment to a read-only property or member
    #[error("cannot write to readonly property '{name}'")]
    ImmutablePropertyWrite {
        /// Property name
        name: String,
    },

    /// Read of a write-only property
    #[error("cannot read from writeonly property '{name}'")]
    WriteOnlyPropertyRead {
        /// Property name
        name: String,
    },

    /// Assignment to a member the usertype does not know
    #[error("attempt to index (set) nil value '{name}' on userdata '{type_name}' (bad (misspelled?) key name or does not exist)")]
    UnregisteredAccess {
        /// Usertype name
        type_name: String,
        /// Member name
        name: String,
    },

    /// The native object is already borrowed incompatibly
    #[error("'{type_name}' is already borrowed")]
    BorrowConflict {
        /// Type name of the borrowed object
        type_name: String,
    },

    /// Error reported by a bound native function
    #[error("{0}")]
    Native(String),

    /// A bound native function panicked
    #[error("Function panicked: {0}")]
    Panic(String),

    /// Error raised by the binding layer itself
    #[error("{0}")]
    Runtime(String),

    /// Error coming out of the VM
    #[error(transparent)]
    Vm(#[from] VmError),
}

impl Error {
    /// Runtime error carrying a message
    pub fn runtime(msg: impl Into<String>) -> Self {
        Error::Runtime(msg.into())
    }

    /// Wrap any displayable error as a native error
    pub fn external(err: impl std::fmt::Display) -> Self {
        Error::Native(err.to_string())
    }

    /// Whether this is the suspension signal of a yielding coroutine
    pub fn is_yield(&self) -> bool {
        matches!(self, Error::Vm(VmError::Yield))
    }

    /// The error object a script would observe
    pub fn to_value(&self) -> Value {
        match self {
            Error::Vm(e) => e.clone().into_value(),
            other => Value::from(other.to_string()),
        }
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Native(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Native(msg.to_string())
    }
}

impl From<Error> for VmError {
    fn from(e: Error) -> Self {
        match e {
            Error::Vm(inner) => inner,
            other => VmError::runtime(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_message() {
        let e = Error::TypeMismatch {
            index: 2,
            expected: "number".into(),
            actual: "string".into(),
        };
        assert_eq!(e.to_string(), "stack index 2, expected number, received string");
    }

    #[test]
    fn test_vm_errors_pass_through() {
        let e: VmError = Error::Vm(VmError::Runtime(Value::Integer(3))).into();
        assert!(matches!(e, VmError::Runtime(Value::Integer(3))));

        let e: VmError = Error::runtime("boom").into();
        assert_eq!(e.to_string(), "boom");
        assert!(Error::Vm(VmError::Yield).is_yield());
    }

    #[test]
    fn test_native_conversions() {
        let e: Error = "bad input".into();
        assert!(matches!(e, Error::Native(ref m) if m == "bad input"));
        assert_eq!(Error::Panic("oops".into()).to_string(), "Function panicked: oops");
        assert_eq!(
            Error::from(String::from("x")).to_value().as_string().unwrap().as_bytes(),
            b"x"
        );
    }
}
