mod schema;

use proc_macro::TokenStream;

// ============================================================================
// #[derive(Schema)] derive macro
// ============================================================================

/// Derive macro for the `Schema` trait.
///
/// # Usage
///
/// ```ignore
/// #[derive(Clone, Schema)]
/// #[schema(singular = "comment", plural = "comments")]
/// struct Comment {
///     #[schema(required)]
///     pub title: String,
///     pub votes: i64,
///     #[schema(enumerable("draft", "published"))]
///     pub status: String,
///     #[schema(reference)]
///     pub author_id: String,
///     pub note: Option<String>,
/// }
/// ```
///
/// - `#[schema(singular = "...", plural = "...")]` names the class. The
///   singular name defaults to the snake_case struct name.
/// - Property types follow the field types: `String` is `string`, numeric
///   primitives are `number`, `bool` is `boolean`, `DateTime` is `date`,
///   `Vec` is `array`, `Record`/`BTreeMap` is `hash` and `Value` is
///   `untyped`. `Option<_>` fields are optional properties.
/// - `#[schema(type = "...")]` names a registered type explicitly.
/// - `#[schema(enumerable("a", "b"))]` declares an enumerable; the field
///   holds the label.
/// - `#[schema(reference)]` on a field named `<name>_id` declares the
///   reference `<name>`; the field holds the referenced key.
/// - `#[schema(required)]` adds the property to the required list.
/// - `#[schema(skip)]` leaves the field out; it is filled with `Default`.
#[proc_macro_derive(Schema, attributes(schema))]
pub fn derive_schema(input: TokenStream) -> TokenStream {
    schema::derive_schema(input)
}
