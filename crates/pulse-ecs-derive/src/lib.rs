//! Derive macros for Pulse ECS components.
//!
//! This crate provides `#[derive(Component)]`, re-exported by `pulse-ecs`.
//!
//! Stored component instances are shared behind `Arc` and treated as
//! immutable: the world detects changes by comparing allocations, never by
//! looking inside a value. A field that can be mutated through a shared
//! reference would let a component change without the world noticing, so
//! the derive rejects such fields.
//!
//! ```ignore
//! #[derive(Component)]
//! struct Health(u32);
//!
//! #[derive(Component)]
//! #[component(name = "Poisoned")]
//! struct Poison { damage_per_tick: u32 }
//! ```
//!
//! # Opaque Components
//!
//! Runtime handles that need interior mutability can opt out of the check
//! with `#[component(opaque)]`. Changes made through such a handle are not
//! seen by change tracking.
//!
//! ```ignore
//! #[derive(Component)]
//! #[component(opaque)]
//! struct Outbox { queue: Mutex<Vec<Packet>> }
//! ```
//!
//! # Forbidden Types (for non-opaque)
//!
//! - `Cell<T>`, `RefCell<T>`, `OnceCell<T>`, `UnsafeCell<T>`
//! - `Mutex<T>`, `RwLock<T>`, `OnceLock<T>`
//! - `AtomicBool`, `AtomicU32`, and the other atomics
//! - references, raw pointers and trait objects

use proc_macro::TokenStream;
use quote::{quote, quote_spanned};
use syn::{
    Attribute, Data, DeriveInput, Fields, GenericArgument, LitStr, Path, PathArguments, Type,
    spanned::Spanned,
};

const SHARED_MUTATION: &str = "Components are shared behind `Arc` and must not change after \
     construction; store a new value with `world.insert` instead.\n\
     Or mark this component as #[component(opaque)] if it's a runtime-only handle.";

/// Forbidden type names and what to do instead.
const FORBIDDEN_TYPES: &[(&str, &str)] = &[
    ("Cell", "Cell<T> allows mutation through a shared reference."),
    ("RefCell", "RefCell<T> allows mutation through a shared reference."),
    ("OnceCell", "OnceCell<T> can be filled through a shared reference."),
    ("UnsafeCell", "UnsafeCell<T> allows mutation through a shared reference."),
    ("Mutex", "Mutex<T> allows mutation through a shared reference."),
    ("RwLock", "RwLock<T> allows mutation through a shared reference."),
    ("OnceLock", "OnceLock<T> can be filled through a shared reference."),
];

#[derive(Default)]
struct ComponentArgs {
    opaque: bool,
    name: Option<LitStr>,
}

fn parse_args(attrs: &[Attribute]) -> syn::Result<ComponentArgs> {
    let mut args = ComponentArgs::default();
    for attr in attrs {
        if !attr.path().is_ident("component") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("opaque") {
                args.opaque = true;
                Ok(())
            } else if meta.path.is_ident("name") {
                args.name = Some(meta.value()?.parse()?);
                Ok(())
            } else {
                Err(meta.error("expected `opaque` or `name = \"...\"`"))
            }
        })?;
    }
    Ok(args)
}

/// Derive macro for ECS components.
///
/// Implements `pulse_ecs::Component`. Rejects fields with interior
/// mutability unless the type is marked `#[component(opaque)]`;
/// `#[component(name = "...")]` overrides the debug name.
#[proc_macro_derive(Component, attributes(component))]
pub fn derive_component(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let args = match parse_args(&input.attrs) {
        Ok(args) => args,
        Err(error) => return error.to_compile_error().into(),
    };

    let mut errors = Vec::new();

    match &input.data {
        Data::Struct(data) if !args.opaque => check_fields(&data.fields, &mut errors),
        Data::Enum(data) if !args.opaque => {
            for variant in &data.variants {
                check_fields(&variant.fields, &mut errors);
            }
        }
        Data::Union(_) => {
            errors.push(quote_spanned! {
                input.span() =>
                compile_error!("Unions cannot derive Component. Use a struct or enum instead.");
            });
        }
        _ => {}
    }

    if !errors.is_empty() {
        let error_tokens = errors.into_iter().collect::<proc_macro2::TokenStream>();
        return TokenStream::from(error_tokens);
    }

    let name_fn = args.name.map(|debug_name| {
        quote! {
            fn name() -> &'static str {
                #debug_name
            }
        }
    });

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics ::pulse_ecs::Component for #name #ty_generics #where_clause {
            #name_fn
        }
    };

    TokenStream::from(expanded)
}

fn check_fields(fields: &Fields, errors: &mut Vec<proc_macro2::TokenStream>) {
    for field in fields {
        check_type(&field.ty, errors);
    }
}

fn check_type(ty: &Type, errors: &mut Vec<proc_macro2::TokenStream>) {
    let rejected = match ty {
        Type::Path(type_path) => {
            check_type_path(&type_path.path, ty.span(), errors);
            return;
        }
        Type::Array(array) => {
            check_type(&array.elem, errors);
            return;
        }
        Type::Slice(slice) => {
            check_type(&slice.elem, errors);
            return;
        }
        Type::Tuple(tuple) => {
            for elem in &tuple.elems {
                check_type(elem, errors);
            }
            return;
        }
        Type::Paren(paren) => {
            check_type(&paren.elem, errors);
            return;
        }
        Type::Group(group) => {
            check_type(&group.elem, errors);
            return;
        }
        Type::Reference(_) => "References are not allowed in components. Store owned values.",
        Type::Ptr(_) => "Raw pointers are not allowed in components.",
        Type::TraitObject(_) => {
            "Trait objects (dyn Trait) are not allowed in components; their contents cannot be checked."
        }
        Type::ImplTrait(_) => "impl Trait is not allowed in component fields. Use concrete types.",
        _ => return,
    };

    let message = format!("{rejected}\n{SHARED_MUTATION}");
    errors.push(quote_spanned! {
        ty.span() =>
        compile_error!(#message);
    });
}

fn check_type_path(
    path: &Path,
    span: proc_macro2::Span,
    errors: &mut Vec<proc_macro2::TokenStream>,
) {
    let Some(segment) = path.segments.last() else {
        return;
    };
    let type_name = segment.ident.to_string();

    let forbidden = FORBIDDEN_TYPES
        .iter()
        .find(|(forbidden, _)| type_name == *forbidden)
        .map(|(_, reason)| (*reason).to_owned())
        .or_else(|| {
            type_name
                .starts_with("Atomic")
                .then(|| format!("{type_name} allows mutation through a shared reference."))
        });

    if let Some(reason) = forbidden {
        let message =
            format!("Component field uses forbidden type `{type_name}`.\n\n{reason}\n{SHARED_MUTATION}");
        errors.push(quote_spanned! {
            span =>
            compile_error!(#message);
        });
        return;
    }

    // Check generic arguments recursively: Arc<Mutex<T>> is as mutable as Mutex<T>.
    if let PathArguments::AngleBracketed(args) = &segment.arguments {
        for arg in &args.args {
            if let GenericArgument::Type(inner_ty) = arg {
                check_type(inner_ty, errors);
            }
        }
    }
}
