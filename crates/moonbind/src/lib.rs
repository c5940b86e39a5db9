//! moonbind: typed bindings between Rust and the moonbind VM
//!
//! This crate provides the layer between native Rust code and the stack VM:
//! - Type classification of every Rust type that crosses the boundary
//! - Stack marshalling (`push` / `get` / `check`) with slot accounting
//! - Usertypes: Rust structs exposed as VM objects with methods, properties,
//!   constructors, operators and single or multiple inheritance
//! - Call dispatch with overload resolution and a panic-safe trampoline
//! - RAII handles (`Table`, `Function`, `AnyUserdata`, `Coroutine`) and the
//!   [`Lua`] facade that owns a VM instance
//!
//! ```text
//!   Rust value ──ToStack──► ┌───────────┐ ──FromStack──► Rust value
//!                           │ VM stack  │
//!   Rust fn ──IntoFunction─►│  slots    │◄── trampoline ── VM call
//!                           └───────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use moonbind::{Lua, Usertype};
//!
//! #[derive(Clone, Usertype)]
//! struct Point { x: f64, y: f64 }
//!
//! let lua = Lua::new();
//! lua.new_usertype::<Point>("Point")
//!     .constructor(|x: f64, y: f64| Point { x, y })
//!     .method("length", |p: &Point| p.x.hypot(p.y))
//!     .register()?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate self as moonbind;

pub mod call;
pub mod classify;
pub mod coroutine;
pub mod error;
pub mod function;
pub mod inheritance;
pub mod lua;
pub mod options;
pub mod reference;
pub mod stack;
pub mod table;
pub mod userdata;
pub mod usertype;

pub use call::{IntoFunction, IntoMethod, IntoResults, Overload, Signature, Yield};
pub use classify::{Classify, TypeDescriptor, ValueKind};
pub use coroutine::{Coroutine, CoroutineResult};
pub use error::{Error, Result};
pub use function::{Function, ProtectedFunction};
pub use lua::Lua;
pub use options::Options;
pub use reference::{Object, Reference};
pub use stack::{FromStack, Nil, ThisState, ToStack, Variadic};
pub use table::Table;
pub use userdata::AnyUserdata;
pub use usertype::{
    MetaFunction, Ptr, Shared, Unique, UserRef, UserRefMut, Usertype, UsertypeBuilder,
};

/// `#[derive(Usertype)]`
pub use moonbind_macros::Usertype;

/// The VM substrate this crate binds to
pub use moonbind_vm as vm;

/// Common imports for binding code
pub mod prelude {
    pub use crate::{
        AnyUserdata, Coroutine, CoroutineResult, Error, Function, Lua, Nil, Object, Options,
        Overload, Ptr, Result, Shared, Table, ThisState, Unique, UserRef, UserRefMut, Usertype,
        Variadic, Yield,
    };
}
