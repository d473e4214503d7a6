extern crate proc_macro;
extern crate syn;
#[macro_use]
extern crate quote;

use proc_macro::TokenStream;
use syn::{parse_macro_input, spanned::Spanned};

/// Derives `Logging` and a CSV `Display` for a struct with named fields.
///
/// The header is the comma separated field names, the row is the comma
/// separated `Display` of every field, both terminated by a newline. Every
/// field type therefore has to implement `Display`.
#[proc_macro_derive(Logging)]
pub fn logging_derive(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as syn::DeriveInput);
    match impl_logging(&ast) {
        Ok(expanded) => expanded.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn impl_logging(
    ast: &syn::DeriveInput,
) -> syn::Result<proc_macro2::TokenStream> {
    let name = &ast.ident;
    let (impl_generics, ty_generics, where_clause) =
        ast.generics.split_for_impl();
    let fields = match &ast.data {
        syn::Data::Struct(syn::DataStruct {
            fields: syn::Fields::Named(syn::FieldsNamed { ref named, .. }),
            ..
        }) => named,
        _ => {
            return Err(syn::Error::new(
                ast.span(),
                "Logging can only be derived for structs with named fields",
            ))
        }
    };
    let field_names = fields
        .iter()
        .filter_map(|field| field.ident.as_ref())
        .collect::<Vec<_>>();

    let log_format = field_names
        .iter()
        .map(|_| "{}".to_string())
        .collect::<Vec<_>>()
        .join(",");
    let header_format = field_names
        .iter()
        .map(|field_name| field_name.to_string())
        .collect::<Vec<_>>()
        .join(",");

    Ok(quote! {
        impl #impl_generics Logging for #name #ty_generics #where_clause {
            fn header(&self) -> String {
                concat!(#header_format, "\n").to_string()
            }
        }

        impl #impl_generics std::fmt::Display
            for #name #ty_generics #where_clause
        {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(#log_format, "\n"), #(self.#field_names),*)
            }
        }
    })
}
