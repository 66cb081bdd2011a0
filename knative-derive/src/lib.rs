//! Derive [`ConditionType`] on your own types to adhere to the Knative Source schema and condition
//! management.
//!
//! Exactly one of the [`REQUIRED_VARIANTS`] names the happy condition. Variants tagged
//! `#[dependent]` make up the default [`ConditionSet`] of the type.
//!
//! [`ConditionSet`]: ../knative_conditions/struct.ConditionSet.html
mod error;
mod inner;

use syn::{parse_macro_input, DeriveInput};

pub(crate) const REQUIRED_VARIANTS: [&str; 2] = ["Ready", "Succeeded"];

#[proc_macro_derive(ConditionType, attributes(dependent))]
pub fn derive_condition_type(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    match inner::inner_derive(ast) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error().into(),
    }
}
