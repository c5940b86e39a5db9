//! Usertypes: Rust types bound as VM objects
//!
//! A type opts in by implementing [`Usertype`] (usually through
//! `#[derive(Usertype)]`). Values of the type then cross the boundary as
//! userdata; registering it with [`UsertypeBuilder`] adds methods,
//! properties, constructors, bases and operators, and publishes the type
//! handle as a global.
//!
//! ```text
//!   lua.new_usertype::<Point>("Point")
//!       .constructor(|x: f64, y: f64| Point { x, y })
//!       .property("x", |p: &Point| p.x, |p: &mut Point, v: f64| p.x = v)
//!       .method("length", |p: &Point| p.x.hypot(p.y))
//!       .register()?;
//! ```
//!
//! Types pushed before being registered are bound implicitly under their
//! default name with the members from [`Usertype::bind_fields`].

mod builder;
mod core;
mod meta;
mod pointer;
mod registry;
mod userbox;

pub use builder::UsertypeBuilder;
pub use meta::MetaFunction;
pub use pointer::{Ptr, Shared, Unique, UserRef, UserRefMut};
pub use userbox::{user_box, UserBox};

pub(crate) use self::core::user_key;
pub(crate) use pointer::{check_object, resolve};
pub(crate) use registry::TypeRegistry;

/// A Rust type that can live in a userdata block
pub trait Usertype: Sized + 'static {
    /// Name the type is bound under when pushed before registration
    fn default_name() -> &'static str {
        short_type_name::<Self>()
    }

    /// Members every binding of the type carries
    ///
    /// Called for both implicit and explicit registrations, before the
    /// members added by the registering code.
    fn bind_fields<'a>(builder: UsertypeBuilder<'a, Self>) -> UsertypeBuilder<'a, Self> {
        builder
    }
}

/// Last path segment of a type name, without generic arguments
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
