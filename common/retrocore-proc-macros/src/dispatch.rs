use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Field, Fields, parse_quote};

enum PartialCloneAttr {
    Clone,
    Partial,
    Default,
}

fn parse_partial_clone_attr(field: &Field) -> PartialCloneAttr {
    let Some(attr) = field.attrs.iter().find(|attr| attr.path().is_ident("partial_clone")) else {
        return PartialCloneAttr::Clone;
    };

    let mut result = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("partial") {
            result = Some(PartialCloneAttr::Partial);
            Ok(())
        } else if meta.path.is_ident("default") {
            result = Some(PartialCloneAttr::Default);
            Ok(())
        } else {
            Err(meta.error("nested partial_clone attribute must be 'partial' or 'default'"))
        }
    })
    .expect("partial_clone attribute requires a nested attribute of 'partial' or 'default'");

    result.expect("partial_clone attribute requires a nested attribute of 'partial' or 'default'")
}

fn field_constructor(field: &Field, access: proc_macro2::TokenStream) -> proc_macro2::TokenStream {
    match parse_partial_clone_attr(field) {
        PartialCloneAttr::Clone => quote! { ::std::clone::Clone::clone(#access) },
        PartialCloneAttr::Partial => {
            quote! { ::retrocore_common::frontend::PartialClone::partial_clone(#access) }
        }
        PartialCloneAttr::Default => quote! { ::std::default::Default::default() },
    }
}

pub fn partial_clone(input: TokenStream) -> TokenStream {
    let input: DeriveInput = syn::parse(input).expect("Unable to parse input");
    let type_ident = &input.ident;

    let body = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Unit => quote! { Self },
            Fields::Unnamed(fields) => {
                let constructors: Vec<_> = fields
                    .unnamed
                    .iter()
                    .enumerate()
                    .map(|(i, field)| {
                        let idx = syn::Index::from(i);
                        field_constructor(field, quote! { &self.#idx })
                    })
                    .collect();
                quote! { Self(#(#constructors,)*) }
            }
            Fields::Named(fields) => {
                let constructors: Vec<_> = fields
                    .named
                    .iter()
                    .map(|field| {
                        let ident = field.ident.as_ref().expect("named field");
                        let value = field_constructor(field, quote! { &self.#ident });
                        quote! { #ident: #value }
                    })
                    .collect();
                quote! { Self { #(#constructors,)* } }
            }
        },
        Data::Enum(data) => {
            let match_arms: Vec<_> = data
                .variants
                .iter()
                .map(|variant| {
                    let variant_ident = &variant.ident;
                    match &variant.fields {
                        Fields::Unit => quote! { Self::#variant_ident => Self::#variant_ident },
                        Fields::Unnamed(fields) => {
                            let bindings: Vec<_> = (0..fields.unnamed.len())
                                .map(|i| format_ident!("f{i}"))
                                .collect();
                            let constructors: Vec<_> = fields
                                .unnamed
                                .iter()
                                .zip(&bindings)
                                .map(|(field, binding)| field_constructor(field, quote! { #binding }))
                                .collect();
                            quote! {
                                Self::#variant_ident(#(#bindings,)*) => Self::#variant_ident(#(#constructors,)*)
                            }
                        }
                        Fields::Named(fields) => {
                            let bindings: Vec<_> = fields
                                .named
                                .iter()
                                .map(|field| field.ident.as_ref().expect("named field"))
                                .collect();
                            let constructors: Vec<_> = fields
                                .named
                                .iter()
                                .map(|field| {
                                    let ident = field.ident.as_ref().expect("named field");
                                    let value = field_constructor(field, quote! { #ident });
                                    quote! { #ident: #value }
                                })
                                .collect();
                            quote! {
                                Self::#variant_ident { #(#bindings,)* } => Self::#variant_ident { #(#constructors,)* }
                            }
                        }
                    }
                })
                .collect();
            quote! {
                match self {
                    #(#match_arms,)*
                }
            }
        }
        Data::Union(_) => panic!("PartialClone does not support unions; {type_ident} is a union"),
    };

    let mut generics = input.generics.clone();
    for type_param in generics.type_params_mut() {
        type_param.bounds.push(parse_quote!(::retrocore_common::frontend::PartialClone));
    }
    let (impl_generics, type_generics, where_clause) = generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics ::retrocore_common::frontend::PartialClone for #type_ident #type_generics #where_clause {
            fn partial_clone(&self) -> Self {
                #body
            }
        }
    };

    expanded.into()
}

pub fn match_each_variant_macro(input: TokenStream) -> TokenStream {
    let input: DeriveInput = syn::parse(input).expect("Unable to parse input");
    let ident = &input.ident;

    let Data::Enum(data) = &input.data else {
        panic!("{ident} is not an enum");
    };

    for variant in &data.variants {
        let variant_ident = &variant.ident;
        let Fields::Unnamed(fields) = &variant.fields else {
            panic!("{ident}::{variant_ident} should have unnamed fields");
        };
        assert_eq!(
            fields.unnamed.len(),
            1,
            "{ident}::{variant_ident} has {} unnamed fields, expected 1",
            fields.unnamed.len()
        );
    }

    let variant_idents: Vec<_> = data.variants.iter().map(|variant| &variant.ident).collect();

    let expanded = quote! {
        macro_rules! match_each_variant {
            ($value:expr, $field:ident => $match_arm:expr) => {
                match $value {
                    #(#ident::#variant_idents($field) => $match_arm,)*
                }
            };
            ($value:expr, $field:ident => :variant($match_arm:expr)) => {
                match $value {
                    #(#ident::#variant_idents($field) => #ident::#variant_idents($match_arm),)*
                }
            };
        }
    };

    expanded.into()
}

pub fn enum_display(input: TokenStream) -> TokenStream {
    let input: DeriveInput = syn::parse(input).expect("Unable to parse input");
    let ident = &input.ident;

    let Data::Enum(data) = &input.data else {
        panic!("EnumDisplay only supports enums; {ident} is not an enum");
    };

    let match_arms: Vec<_> = data
        .variants
        .iter()
        .map(|variant| {
            let variant_ident = &variant.ident;
            assert!(
                variant.fields.is_empty(),
                "EnumDisplay only supports fieldless variants; {ident}::{variant_ident} has fields"
            );
            let name = variant_ident.to_string();
            quote! { Self::#variant_ident => #name }
        })
        .collect();

    let expanded = quote! {
        impl #ident {
            #[must_use]
            pub fn to_str(&self) -> &'static str {
                match self {
                    #(#match_arms,)*
                }
            }
        }

        impl ::std::fmt::Display for #ident {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                ::std::write!(f, "{}", self.to_str())
            }
        }
    };

    expanded.into()
}
