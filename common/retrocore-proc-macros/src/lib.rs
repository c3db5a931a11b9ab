mod dispatch;
mod serialization;

use proc_macro::TokenStream;

/// Implement `bincode::Encode` as a no-op for the given type.
///
/// Used for fields that hold read-only data (ROMs, firmware) which should not be part of save
/// states. Pair with [`FakeDecode`] and restore the real data after deserialization.
#[proc_macro_derive(FakeEncode)]
pub fn fake_encode(input: TokenStream) -> TokenStream {
    serialization::fake_encode(input)
}

/// Implement `bincode::Decode` and `bincode::BorrowDecode` for the given type by returning
/// `Self::default()` without reading from the decoder.
///
/// The type must implement `Default`. See [`FakeEncode`].
#[proc_macro_derive(FakeDecode)]
pub fn fake_decode(input: TokenStream) -> TokenStream {
    serialization::fake_decode(input)
}

/// Implement the `retrocore_common::frontend::PartialClone` trait.
///
/// By default all fields are cloned with `Clone::clone`. Fields annotated with
/// `#[partial_clone(default)]` are replaced with `Default::default()` (used for ROM data), and
/// fields annotated with `#[partial_clone(partial)]` are cloned with `PartialClone::partial_clone`.
///
/// # Panics
///
/// Panics if applied to a union or if a `partial_clone` attribute has an unknown nested value.
#[proc_macro_derive(PartialClone, attributes(partial_clone))]
pub fn partial_clone(input: TokenStream) -> TokenStream {
    dispatch::partial_clone(input)
}

/// On an enum in which every variant has exactly one unnamed field, define a local
/// `match_each_variant!` macro that matches on every variant and binds the single field:
///
/// ```ignore
/// match_each_variant!(self, mapper => mapper.read_register(address))
/// ```
///
/// The `:variant(...)` form rewraps the result in the same variant.
///
/// # Panics
///
/// Panics if applied to anything other than an enum of single-field tuple variants.
#[proc_macro_derive(MatchEachVariantMacro)]
pub fn match_each_variant_macro(input: TokenStream) -> TokenStream {
    dispatch::match_each_variant_macro(input)
}

/// Implement `std::fmt::Display` for a fieldless enum using the variant names, along with a
/// `to_str(&self) -> &'static str` method.
///
/// # Panics
///
/// Panics if applied to a struct, a union, or an enum with non-fieldless variants.
#[proc_macro_derive(EnumDisplay)]
pub fn enum_display(input: TokenStream) -> TokenStream {
    dispatch::enum_display(input)
}
