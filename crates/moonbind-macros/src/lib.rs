// moonbind-macros: derive support for moonbind usertypes
//
// Provides:
// - #[derive(Usertype)] - Binds a struct as a VM object with one property
//   per named field
//
// Example:
// ```
// use moonbind::Usertype;
//
// #[derive(Clone, Usertype)]
// #[usertype(name = "Vec2")]
// struct Vector {
//     x: f64,
//     y: f64,
//     #[usertype(readonly)]
//     id: u32,
//     #[usertype(skip)]
//     cache: Vec<f64>,
// }
// ```

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod usertype;

/// Implements `moonbind::Usertype` for a struct.
///
/// The type is bound under its own name unless the struct carries
/// `#[usertype(name = "...")]`. Every named field becomes a read-write
/// property; field types must convert both ways and be `Clone`.
///
/// Field attributes:
/// - `#[usertype(skip)]` - not exposed
/// - `#[usertype(readonly)]` - writes raise an error
/// - `#[usertype(name = "...")]` - exposed under another name
///
/// Tuple and unit structs get the name but no properties.
#[proc_macro_derive(Usertype, attributes(usertype))]
pub fn derive_usertype(item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    usertype::expand_usertype(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
