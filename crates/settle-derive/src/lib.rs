//! Provides derive macros for `settle::HasChanges`.
use quote::quote;
use syn::{Data, DataStruct, DeriveInput, Fields, FieldsNamed};

/// How a field takes part in change detection.
enum FieldKind {
    /// A change can be applied in place.
    Update,
    /// A change requires the remote resource to be replaced.
    ForceNew,
    /// Changes are not tracked, ie `timeouts`.
    Ignore,
}

fn get_field_kind(field: &syn::Field) -> syn::Result<FieldKind> {
    let mut kind = FieldKind::Update;
    for att in field.attrs.iter() {
        if att.path().is_ident("settle") {
            att.parse_nested_meta(|meta| {
                if meta.path.is_ident("ignore") {
                    kind = FieldKind::Ignore;
                    Ok(())
                } else if meta.path.is_ident("force_new") {
                    kind = FieldKind::ForceNew;
                    Ok(())
                } else {
                    Err(meta.error(format!(
                        "unsupported field attribute {:?} - must be one of \
                         'ignore' or 'force_new'",
                        meta.path
                            .get_ident()
                            .map(|id| id.to_string())
                            .unwrap_or("unknown".to_string())
                    )))
                }
            })?;
        }
    }
    Ok(kind)
}

fn get_change_checks(input: &DeriveInput) -> syn::Result<Vec<proc_macro2::TokenStream>> {
    let fields = match &input.data {
        Data::Struct(DataStruct {
            fields: Fields::Named(FieldsNamed { named, .. }),
            ..
        }) => named,
        _ => {
            return Err(syn::Error::new(
                input.ident.span(),
                "deriving HasChanges only supports structs with named fields".to_string(),
            ));
        }
    };

    let mut checks = vec![];
    for field in fields.iter() {
        // UNWRAP: safe because we only support structs with named fields
        let ident = field.ident.clone().unwrap();
        let force_new = match get_field_kind(field)? {
            FieldKind::Ignore => continue,
            FieldKind::Update => false,
            FieldKind::ForceNew => true,
        };
        checks.push(quote! {
            if self.#ident != previous.#ident {
                changes.push(stringify!(#ident), #force_new);
            }
        });
    }
    Ok(checks)
}

#[proc_macro_derive(HasChanges, attributes(settle))]
pub fn derive_has_changes(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input: DeriveInput = syn::parse_macro_input!(input);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let checks = match get_change_checks(&input) {
        Ok(checks) => checks,
        Err(e) => return e.into_compile_error().into(),
    };

    let output = quote! {
        impl #impl_generics settle::HasChanges for #name #ty_generics #where_clause {
            fn changes(&self, previous: &Self) -> settle::Changes {
                let mut changes = settle::Changes::default();
                #(#checks)*
                changes
            }
        }
    };
    output.into()
}
