//! Derive macro for the `AsRemoteObject` trait.
//!
//! Wrappers around remote objects usually embed a `RemoteObject` (or another
//! wrapper) and want to be usable wherever a remote handle is expected. This
//! crate provides `#[derive(AsRemoteObject)]`, which delegates to the one
//! field marked `#[remote(handle)]`.
//!
//! # Usage
//!
//! ```ignore
//! use vmbridge::{AsRemoteObject, RemoteObject};
//!
//! #[derive(AsRemoteObject)]
//! struct Activity {
//!     #[remote(handle)]
//!     inner: RemoteObject,
//!     title: String,
//! }
//! ```
//!
//! # Crate path
//!
//! Generated code refers to `vmbridge`. Re-exporting crates can override it
//! with `#[remote(crate_path = "...")]`:
//!
//! ```ignore
//! #[derive(AsRemoteObject)]
//! #[remote(crate_path = "my_sdk::bridge")]
//! struct Window(#[remote(handle)] RemoteObject);
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// Derive macro for implementing `AsRemoteObject`.
///
/// # Attributes
///
/// - `#[remote(handle)]` - The field whose remote object this type exposes
/// - `#[remote(crate_path = "path")]` - Override the crate path (default: `vmbridge`)
#[proc_macro_derive(AsRemoteObject, attributes(remote))]
pub fn derive_as_remote_object(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let generics = &input.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let crate_path = match get_crate_path(&input) {
        Ok(path) => path,
        Err(e) => return e.to_compile_error().into(),
    };

    let accessor = match &input.data {
        Data::Struct(data) => handle_accessor(&input, &data.fields),
        Data::Enum(_) => Err(syn::Error::new_spanned(
            &input,
            "AsRemoteObject cannot be derived for enums",
        )),
        Data::Union(_) => Err(syn::Error::new_spanned(
            &input,
            "AsRemoteObject cannot be derived for unions",
        )),
    };

    let accessor = match accessor {
        Ok(accessor) => accessor,
        Err(e) => return e.to_compile_error().into(),
    };

    let expanded = quote! {
        impl #impl_generics #crate_path::AsRemoteObject for #name #ty_generics #where_clause {
            fn as_remote_object(&self) -> #crate_path::Result<#crate_path::RemoteObject> {
                #crate_path::AsRemoteObject::as_remote_object(&self.#accessor)
            }
        }
    };

    TokenStream::from(expanded)
}

fn get_crate_path(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    for attr in &input.attrs {
        if !attr.path().is_ident("remote") {
            continue;
        }

        let mut crate_path = None;

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate_path") {
                let value: syn::LitStr = meta.value()?.parse()?;
                let path: syn::Path = value.parse()?;
                crate_path = Some(quote! { #path });
                Ok(())
            } else {
                Err(meta.error("expected `crate_path = \"...\"`"))
            }
        })?;

        if let Some(path) = crate_path {
            return Ok(path);
        }
    }

    Ok(quote! { vmbridge })
}

/// `self.<accessor>` for the single field marked `#[remote(handle)]`.
fn handle_accessor(input: &DeriveInput, fields: &Fields) -> syn::Result<proc_macro2::TokenStream> {
    let mut marked = Vec::new();

    for (index, field) in fields.iter().enumerate() {
        if has_handle_attr(field)? {
            let accessor = match &field.ident {
                Some(ident) => quote! { #ident },
                None => {
                    let index = syn::Index::from(index);
                    quote! { #index }
                }
            };
            marked.push((field, accessor));
        }
    }

    match marked.len() {
        1 => Ok(marked.remove(0).1),
        0 => Err(syn::Error::new_spanned(
            input,
            "AsRemoteObject requires one field marked `#[remote(handle)]`",
        )),
        _ => Err(syn::Error::new_spanned(
            marked[1].0,
            "only one field may be marked `#[remote(handle)]`",
        )),
    }
}

fn has_handle_attr(field: &syn::Field) -> syn::Result<bool> {
    let mut found = false;

    for attr in &field.attrs {
        if !attr.path().is_ident("remote") {
            continue;
        }

        // Parse #[remote(handle)]
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("handle") {
                found = true;
                Ok(())
            } else {
                Err(meta.error("expected `handle`"))
            }
        })?;
    }

    Ok(found)
}
