//! `#[derive(BusMessage)]` implementation.
//!
//! | Key | Example | Required | Description |
//! |-----|---------|----------|-------------|
//! | `kind` | `"command"` | **Yes** | One of `command`, `query`, `event` |
//! | `type_key` | `"orders.GetOrder"` | No | Handler binding tag; defaults to `module_path!()::Name` |
//! | `response` | `"Vec<String>"` | No | Response type (commands and queries only) |
//! | `crate` | `"splitr::core"` | No | Path to the core crate |

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Attribute, DeriveInput, Path, Type, spanned::Spanned};

enum Kind {
    Command,
    Query,
    Event,
}

struct MessageAttrs {
    kind: Kind,
    type_key: Option<String>,
    response: Option<Type>,
    krate: Path,
}

pub fn derive_bus_message(input: &DeriveInput) -> syn::Result<TokenStream> {
    if let syn::Data::Union(_) = input.data {
        return Err(syn::Error::new(
            input.span(),
            "BusMessage cannot be derived for unions",
        ));
    }

    let attrs = parse_attrs(&input.attrs, input.ident.span())?;
    let name = &input.ident;
    let krate = &attrs.krate;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let type_key = match &attrs.type_key {
        Some(key) => quote! { #key },
        None => quote! { concat!(module_path!(), "::", stringify!(#name)) },
    };

    let kind_variant = match attrs.kind {
        Kind::Command => quote! { #krate::MessageKind::Command },
        Kind::Query => quote! { #krate::MessageKind::Query },
        Kind::Event => quote! { #krate::MessageKind::Event },
    };

    let response = attrs
        .response
        .as_ref()
        .map(|ty| quote! { #ty })
        .unwrap_or_else(|| quote! { () });

    let family_impl = match attrs.kind {
        Kind::Command => quote! {
            impl #impl_generics #krate::Command for #name #ty_generics #where_clause {
                type Response = #response;
            }
        },
        Kind::Query => quote! {
            impl #impl_generics #krate::Query for #name #ty_generics #where_clause {
                type Response = #response;
            }
        },
        Kind::Event => {
            if attrs.response.is_some() {
                return Err(syn::Error::new(
                    name.span(),
                    "events do not have a response; remove `response = ...`",
                ));
            }
            quote! {
                impl #impl_generics #krate::Event for #name #ty_generics #where_clause {}
            }
        }
    };

    Ok(quote! {
        impl #impl_generics #krate::BusMessage for #name #ty_generics #where_clause {
            const TYPE_KEY: &'static str = #type_key;
            const KIND: #krate::MessageKind = #kind_variant;
        }

        #family_impl
    })
}

fn parse_attrs(attrs: &[Attribute], span: proc_macro2::Span) -> syn::Result<MessageAttrs> {
    let mut kind: Option<Kind> = None;
    let mut type_key: Option<String> = None;
    let mut response: Option<Type> = None;
    let mut krate: Option<Path> = None;

    for attr in attrs {
        if !attr.path().is_ident("message") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("kind") {
                let lit = meta.value()?.parse::<syn::LitStr>()?;
                kind = Some(match lit.value().as_str() {
                    "command" => Kind::Command,
                    "query" => Kind::Query,
                    "event" => Kind::Event,
                    other => {
                        return Err(syn::Error::new(
                            lit.span(),
                            format!("unknown message kind `{other}`, expected command, query or event"),
                        ));
                    }
                });
            } else if meta.path.is_ident("type_key") {
                let lit = meta.value()?.parse::<syn::LitStr>()?;
                if lit.value().is_empty() {
                    return Err(syn::Error::new(lit.span(), "type_key must not be empty"));
                }
                type_key = Some(lit.value());
            } else if meta.path.is_ident("response") {
                let lit = meta.value()?.parse::<syn::LitStr>()?;
                response = Some(syn::parse_str(&lit.value())?);
            } else if meta.path.is_ident("crate") {
                let lit = meta.value()?.parse::<syn::LitStr>()?;
                krate = Some(syn::parse_str(&lit.value())?);
            } else {
                return Err(meta.error("unsupported message attribute"));
            }
            Ok(())
        })?;
    }

    let kind = kind.ok_or_else(|| {
        syn::Error::new(span, "BusMessage requires #[message(kind = \"…\")]")
    })?;

    Ok(MessageAttrs {
        kind,
        type_key,
        response,
        krate: krate.unwrap_or_else(|| syn::parse_quote!(::splitr_core)),
    })
}
