//! Procedural macros for flux-dispatch

use darling::{FromDeriveInput, FromMeta, FromVariant};
use proc_macro::TokenStream;
use proc_macro2::{Ident, TokenStream as TokenStream2};
use quote::quote;
use std::collections::HashMap;
use syn::{parse_macro_input, DeriveInput};

/// Container-level attributes for #[derive(ActionType)]
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(action_type), supports(enum_unit))]
struct ActionTypeOpts {
    ident: Ident,
    generics: syn::Generics,
    data: darling::ast::Data<ActionTypeVariant, ()>,

    /// Case convention applied to variant names without an explicit rename
    #[darling(default)]
    rename_all: Option<RenameRule>,
}

/// Variant-level attributes
#[derive(Debug, FromVariant)]
#[darling(attributes(action_type))]
struct ActionTypeVariant {
    ident: Ident,

    /// Explicit action type string
    #[darling(default)]
    rename: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum RenameRule {
    ScreamingSnake,
    Snake,
    Kebab,
}

impl FromMeta for RenameRule {
    fn from_string(value: &str) -> darling::Result<Self> {
        match value {
            "SCREAMING_SNAKE_CASE" => Ok(RenameRule::ScreamingSnake),
            "snake_case" => Ok(RenameRule::Snake),
            "kebab-case" => Ok(RenameRule::Kebab),
            other => Err(darling::Error::unknown_value(other)),
        }
    }
}

impl RenameRule {
    fn apply(self, name: &str) -> String {
        let parts = split_pascal_case(name);
        match self {
            RenameRule::ScreamingSnake => parts
                .iter()
                .map(|p| p.to_uppercase())
                .collect::<Vec<_>>()
                .join("_"),
            RenameRule::Snake => parts
                .iter()
                .map(|p| p.to_lowercase())
                .collect::<Vec<_>>()
                .join("_"),
            RenameRule::Kebab => parts
                .iter()
                .map(|p| p.to_lowercase())
                .collect::<Vec<_>>()
                .join("-"),
        }
    }
}

/// Split a PascalCase string into parts
///
/// Consecutive capitals stay together until the last one that starts a new
/// word, so `HTTPRequest` splits into `HTTP` and `Request`.
fn split_pascal_case(s: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();

    for (i, &ch) in chars.iter().enumerate() {
        let starts_word = ch.is_uppercase()
            && !current.is_empty()
            && (chars[i - 1].is_lowercase()
                || chars[i - 1].is_ascii_digit()
                || chars.get(i + 1).is_some_and(|next| next.is_lowercase()));
        if starts_word {
            parts.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Derive macro for the ActionType trait
///
/// Generates `as_str()` returning the variant's action type string, plus
/// `AsRef<str>` and `Display`, so variants can be passed to
/// `Action::dispatch` and `Listeners::on` directly.
///
/// The action type defaults to the variant name. Use
/// `#[action_type(rename_all = "SCREAMING_SNAKE_CASE")]` (or `"snake_case"`,
/// `"kebab-case"`) on the enum, or `#[action_type(rename = "...")]` on a
/// variant, to change it.
///
/// # Example
/// ```ignore
/// #[derive(ActionType, Clone, Copy, Debug)]
/// #[action_type(rename_all = "SCREAMING_SNAKE_CASE")]
/// enum LoaderAction {
///     Load,
///     LoadFailed,
///     #[action_type(rename = "loader/reset")]
///     Reset,
/// }
///
/// assert_eq!(LoaderAction::LoadFailed.as_str(), "LOAD_FAILED");
/// assert_eq!(LoaderAction::Reset.as_str(), "loader/reset");
/// ```
#[proc_macro_derive(ActionType, attributes(action_type))]
pub fn derive_action_type(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let opts = match ActionTypeOpts::from_derive_input(&input) {
        Ok(opts) => opts,
        Err(e) => return e.write_errors().into(),
    };

    let name = &opts.ident;
    let variants = match &opts.data {
        darling::ast::Data::Enum(variants) => variants,
        _ => {
            return syn::Error::new_spanned(&input, "ActionType can only be derived for enums")
                .to_compile_error()
                .into();
        }
    };

    let mut seen: HashMap<String, &Ident> = HashMap::new();
    let mut arms: Vec<TokenStream2> = Vec::with_capacity(variants.len());
    for v in variants {
        let variant_name = &v.ident;
        let action_type = match (&v.rename, opts.rename_all) {
            (Some(explicit), _) => explicit.clone(),
            (None, Some(rule)) => rule.apply(&variant_name.to_string()),
            (None, None) => variant_name.to_string(),
        };

        if action_type.is_empty() {
            return syn::Error::new_spanned(variant_name, "action type must not be empty")
                .to_compile_error()
                .into();
        }
        if let Some(previous) = seen.insert(action_type.clone(), variant_name) {
            let message = format!(
                "action type `{}` is used by both `{}` and `{}`",
                action_type, previous, variant_name
            );
            return syn::Error::new_spanned(variant_name, message)
                .to_compile_error()
                .into();
        }

        arms.push(quote! { #name::#variant_name => #action_type });
    }

    let (impl_generics, ty_generics, where_clause) = opts.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics flux_dispatch::ActionType for #name #ty_generics #where_clause {
            fn as_str(&self) -> &'static str {
                match self {
                    #(#arms),*
                }
            }
        }

        impl #impl_generics ::core::convert::AsRef<str> for #name #ty_generics #where_clause {
            fn as_ref(&self) -> &str {
                flux_dispatch::ActionType::as_str(self)
            }
        }

        impl #impl_generics ::core::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(flux_dispatch::ActionType::as_str(self))
            }
        }
    };

    expanded.into()
}
