//! Derive macros for `ecs_core` components and messages.
//!
//! Mirrors the teacher's `#[derive(Component)]` attribute shape
//! (`#[component(HashMapStorage)]`) but rebuilt against `syn` 2 / `quote` 1
//! instead of the long-deprecated `syn` 0.11 macros the original crate used.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, Ident, Meta, Token};

/// Derives the `Component` trait.
///
/// By default components are stored in a `VecPool`. Use `#[component(storage
/// = "HashMapPool")]` to pick a different pool type, and `#[component(singleton)]`
/// to mark the type as a singleton (see `World::set_singleton`).
///
/// ```ignore
/// #[derive(Component)]
/// struct Position { x: f32, y: f32 }
///
/// #[derive(Component)]
/// #[component(singleton)]
/// struct Gravity(f32);
///
/// #[derive(Component)]
/// #[component(storage = "HashMapPool")]
/// struct RareTag;
/// ```
#[proc_macro_derive(Component, attributes(component))]
pub fn derive_component(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let mut storage: Ident = Ident::new("VecPool", name.span());
    let mut singleton = false;

    for attr in &input.attrs {
        if !attr.path().is_ident("component") {
            continue;
        }
        let parsed = attr.parse_args_with(
            syn::punctuated::Punctuated::<Meta, Token![,]>::parse_terminated,
        );
        let metas = match parsed {
            Ok(metas) => metas,
            Err(err) => return err.to_compile_error().into(),
        };
        for meta in metas {
            match meta {
                Meta::Path(path) if path.is_ident("singleton") => singleton = true,
                Meta::NameValue(nv) if nv.path.is_ident("storage") => {
                    if let syn::Expr::Lit(syn::ExprLit {
                        lit: syn::Lit::Str(lit),
                        ..
                    }) = &nv.value
                    {
                        storage = Ident::new(&lit.value(), lit.span());
                    }
                }
                other => {
                    return syn::Error::new_spanned(other, "unrecognized `#[component(..)]` argument")
                        .to_compile_error()
                        .into();
                }
            }
        }
    }

    let expanded = quote! {
        impl #impl_generics ::ecs_core::component::Component for #name #ty_generics #where_clause {
            type Storage = ::ecs_core::storage::#storage<#name #ty_generics>;

            const IS_SINGLETON: bool = #singleton;
        }
    };

    expanded.into()
}

/// Derives the `Message` marker trait for a plain value type.
#[proc_macro_derive(Message)]
pub fn derive_message(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics ::ecs_core::messages::Message for #name #ty_generics #where_clause {}
    };

    expanded.into()
}
