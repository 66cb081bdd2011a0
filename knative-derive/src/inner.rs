use crate::{
    REQUIRED_VARIANTS,
    error::VerificationError
};
use proc_macro::TokenStream;
use quote::quote;
use syn::{
    spanned::Spanned,
    punctuated::Punctuated,
    token::Comma,
    Variant,
    Error,
    Fields,
    Result,
    Data::Enum,
    DeriveInput,
    Ident
};

fn is_dependent(variant: &Variant) -> bool {
    variant.attrs
        .iter()
        .any(|a| a.path.is_ident("dependent"))
}

fn is_happy(variant: &Variant) -> bool {
    REQUIRED_VARIANTS.contains(&variant.ident.to_string().as_str())
}

fn verify_variants(variants: &Punctuated<Variant, Comma>) -> Result<()> {
    let mut one_required = false;

    for v in variants {
        if !matches!(v.fields, Fields::Unit) {
            return Err(VerificationError::UnitVariantsOnly(v.ident.to_string()).spanned(v.span()));
        }
        if is_happy(v) {
            // Ensure top level conditions are not dependents
            if is_dependent(v) {
                return Err(VerificationError::NotDependent(v.ident.to_string()).spanned(v.span()));
            }
            // Ensure only one top level condition exists
            if one_required {
                return Err(VerificationError::OneRequiredVariant.spanned(v.span()));
            }
            one_required = true;
        }
    }

    if !one_required {
        return Err(VerificationError::OneRequiredVariant.into());
    }

    Ok(())
}

pub fn inner_derive(ast: DeriveInput) -> Result<TokenStream> {
    let name = &ast.ident;

    let variants = match ast.data {
        Enum(syn::DataEnum { ref variants, .. }) => variants,
        _ => return Err(Error::new(
            ast.span(),
            "ConditionType may only be derived on enums"
        ))
    };

    verify_variants(variants)?;

    let happy = match variants.iter().find(|v| is_happy(v)) {
        Some(v) => &v.ident,
        None => return Err(VerificationError::OneRequiredVariant.into()),
    };
    let dependents = variants.iter()
        .filter(|v| is_dependent(v))
        .map(|v| &v.ident);

    let capitalized = variants.iter()
        .filter(|v| !is_happy(v))
        .map(|v| v.ident.clone())
        .collect::<Vec<_>>();
    let lower_case = capitalized.iter()
        .map(|v| Ident::new(&v.to_string().to_lowercase(), v.span()))
        .collect::<Vec<_>>();
    let lower_case_doc = capitalized.iter()
        .map(|c| format!("Returns the `{c}` variant of the [`ConditionType`]"));
    let names = variants.iter().map(|v| &v.ident);
    let names_str = variants.iter().map(|v| v.ident.to_string());

    let condition_type_name = Ident::new(&format!("{name}Type"), name.span());
    let condition_type_doc = format!("A [`ConditionType`] that implement this trait duck types to [`{name}`].");

    Ok(quote! {
        #[doc = #condition_type_doc]
        pub trait #condition_type_name: ::knative_conditions::ConditionType {
            #(
                #[doc = #lower_case_doc]
                fn #lower_case() -> Self;
            )*
        }

        #[automatically_derived]
        impl #condition_type_name for #name {
            #(
                #[inline]
                fn #lower_case() -> Self {
                    #name::#capitalized
                }
            )*
        }

        #[automatically_derived]
        impl ::knative_conditions::ConditionType for #name {
            #[inline]
            fn happy() -> Self {
                #name::#happy
            }

            #[inline]
            fn dependents() -> ::std::vec::Vec<Self> {
                ::std::vec![#(#name::#dependents),*]
            }
        }

        #[automatically_derived]
        impl ::std::default::Default for #name {
            fn default() -> Self {
                #name::#happy
            }
        }

        #[automatically_derived]
        impl ::std::fmt::Display for #name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(match self {
                    #( #name::#names => #names_str, )*
                })
            }
        }
    }.into())
}
