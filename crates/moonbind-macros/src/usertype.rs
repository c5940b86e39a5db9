// #[derive(Usertype)] implementation
//
// Generates the `Usertype` impl: the registration name plus a
// `bind_fields` chaining one property per exposed field.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, LitStr, Result};

/// Options collected from `#[usertype(...)]` attributes
#[derive(Default)]
struct Attrs {
    name: Option<LitStr>,
    skip: bool,
    readonly: bool,
}

fn parse_attrs(attrs: &[Attribute], on_field: bool) -> Result<Attrs> {
    let mut out = Attrs::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("usertype")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                out.name = Some(meta.value()?.parse()?);
                Ok(())
            } else if on_field && meta.path.is_ident("skip") {
                out.skip = true;
                Ok(())
            } else if on_field && meta.path.is_ident("readonly") {
                out.readonly = true;
                Ok(())
            } else {
                Err(meta.error("unsupported usertype attribute"))
            }
        })?;
    }
    Ok(out)
}

/// Expands #[derive(Usertype)].
///
/// Example expansion:
/// ```ignore
/// // Input:
/// #[derive(Usertype)]
/// struct Point { x: f64, #[usertype(readonly)] id: u32 }
///
/// // Output:
/// impl ::moonbind::Usertype for Point {
///     fn default_name() -> &'static str { "Point" }
///     fn bind_fields<'a>(builder: UsertypeBuilder<'a, Self>) -> UsertypeBuilder<'a, Self> {
///         builder
///             .property("x", |this: &Self| this.x.clone(), |this: &mut Self, value| this.x = value)
///             .property_readonly("id", |this: &Self| this.id.clone())
///     }
/// }
/// ```
pub fn expand_usertype(input: DeriveInput) -> Result<TokenStream> {
    let ident = &input.ident;
    let fields = match &input.data {
        Data::Struct(data) => &data.fields,
        Data::Enum(_) | Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "Usertype can only be derived for structs",
            ))
        }
    };

    let type_attrs = parse_attrs(&input.attrs, false)?;
    let type_name = type_attrs
        .name
        .map(|lit| lit.value())
        .unwrap_or_else(|| ident.to_string());

    let mut bindings = Vec::new();
    if let Fields::Named(named) = fields {
        for field in &named.named {
            let attrs = parse_attrs(&field.attrs, true)?;
            if attrs.skip {
                continue;
            }
            let Some(field_ident) = field.ident.as_ref() else {
                continue;
            };
            let ty = &field.ty;
            let exposed = attrs
                .name
                .map(|lit| lit.value())
                .unwrap_or_else(|| field_ident.to_string());

            let binding = if attrs.readonly {
                quote! {
                    .property_readonly(#exposed, |this: &Self| -> #ty {
                        ::std::clone::Clone::clone(&this.#field_ident)
                    })
                }
            } else {
                quote! {
                    .property(
                        #exposed,
                        |this: &Self| -> #ty { ::std::clone::Clone::clone(&this.#field_ident) },
                        |this: &mut Self, value: #ty| { this.#field_ident = value; },
                    )
                }
            };
            bindings.push(binding);
        }
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::moonbind::Usertype for #ident #ty_generics #where_clause {
            fn default_name() -> &'static str {
                #type_name
            }

            fn bind_fields<'moonbind>(
                builder: ::moonbind::UsertypeBuilder<'moonbind, Self>,
            ) -> ::moonbind::UsertypeBuilder<'moonbind, Self> {
                builder #(#bindings)*
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(src: &str) -> Result<String> {
        let input: DeriveInput = syn::parse_str(src)?;
        expand_usertype(input).map(|ts| ts.to_string())
    }

    #[test]
    fn test_expand_named_fields() {
        let out = expand("struct Point { x: f64, #[usertype(readonly)] id: u32 }").unwrap();
        assert!(out.contains("\"Point\""));
        assert!(out.contains(". property (\"x\""));
        assert!(out.contains(". property_readonly (\"id\""));
    }

    #[test]
    fn test_expand_renames_and_skips() {
        let out = expand(
            "#[usertype(name = \"Vec2\")] struct V { #[usertype(name = \"ex\")] x: f64, #[usertype(skip)] cache: Vec<f64> }",
        )
        .unwrap();
        assert!(out.contains("\"Vec2\""));
        assert!(out.contains("\"ex\""));
        assert!(!out.contains("cache"));
    }

    #[test]
    fn test_rejects_enums() {
        let err = expand("enum E { A }").unwrap_err();
        assert!(err.to_string().contains("only be derived for structs"));
    }

    #[test]
    fn test_rejects_unknown_attribute() {
        assert!(expand("struct S { #[usertype(hidden)] x: i32 }").is_err());
        assert!(expand("#[usertype(skip)] struct S { x: i32 }").is_err());
    }
}
