//! Runtime safety switches
//!
//! The binding layer can validate everything it reads from the stack or trust
//! the caller. Defaults follow the `safe` cargo feature (on by default); each
//! VM instance keeps its own copy, adjustable at runtime through
//! [`crate::Lua::set_options`].

use std::cell::Cell;

use moonbind_vm::State;

/// Safety options of one VM instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Check argument counts and types before calling bound functions
    pub safe_function_calls: bool,
    /// Reject numbers that do not fit the target integer type exactly
    pub safe_numerics: bool,
    /// Validate member-function receivers (nil and type checks)
    pub safe_usertype: bool,
}

impl Options {
    /// Every check enabled
    pub const fn checked() -> Self {
        Options {
            safe_function_calls: true,
            safe_numerics: true,
            safe_usertype: true,
        }
    }

    /// Every check disabled
    ///
    /// Reads still fail cleanly on a type mismatch; what is skipped is the
    /// validation done up front, along with integer range checks.
    pub const fn unchecked() -> Self {
        Options {
            safe_function_calls: false,
            safe_numerics: false,
            safe_usertype: false,
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        if cfg!(feature = "safe") {
            Options::checked()
        } else {
            Options::unchecked()
        }
    }
}

#[derive(Default)]
struct OptionsSlot(Cell<Option<Options>>);

/// Options in effect for the VM `state` belongs to
pub(crate) fn current(state: &State) -> Options {
    state
        .app_data::<OptionsSlot>()
        .and_then(|slot| slot.0.get())
        .unwrap_or_default()
}

/// Replace the options of the VM `state` belongs to
pub(crate) fn install(state: &State, options: Options) {
    state.app_data_or_init(OptionsSlot::default).0.set(Some(options));
}
