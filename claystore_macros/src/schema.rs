use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::punctuated::Punctuated;
use syn::{Data, DeriveInput, Field, Fields, GenericArgument, LitStr, PathArguments, Token, Type};

pub fn derive_schema(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

enum Role {
    Typed(String),
    Optional,
    Enumerable(Vec<LitStr>),
    Reference(String),
    Skip,
}

struct SchemaField {
    ident: syn::Ident,
    name: String,
    role: Role,
    required: bool,
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (singular, plural) = class_names(input)?;
    let fields = schema_fields(input)?;

    let declarations = fields.iter().map(|field| {
        let prop = &field.name;
        match &field.role {
            Role::Typed(type_name) => quote! { .property(#prop, #type_name) },
            Role::Optional => quote! { .optional(#prop) },
            Role::Enumerable(labels) => quote! { .enumerable(#prop, [#(#labels),*]) },
            Role::Reference(reference) => quote! { .reference(#reference) },
            Role::Skip => quote! {},
        }
    });
    let required = fields
        .iter()
        .filter(|field| field.required)
        .map(|field| {
            let prop = &field.name;
            quote! { .required(#prop) }
        });
    let plural = plural.map(|plural| quote! { .plural(#plural) });

    let reads = fields.iter().map(|field| {
        let ident = &field.ident;
        let prop = &field.name;
        match field.role {
            Role::Skip => quote! { #ident: ::core::default::Default::default() },
            _ => quote! { #ident: ::claystore::read_field(model, #prop)? },
        }
    });
    let writes = fields
        .iter()
        .filter(|field| !matches!(field.role, Role::Skip))
        .map(|field| {
            let ident = &field.ident;
            let prop = &field.name;
            quote! {
                model.set(#prop, ::claystore::Value::from(::core::clone::Clone::clone(&self.#ident)))?;
            }
        });

    Ok(quote! {
        impl ::claystore::schema::Schema for #name {
            fn definition() -> ::claystore::ModelDefinition {
                ::claystore::ModelDefinition::new()
                    .singular(#singular)
                    #plural
                    #(#declarations)*
                    #(#required)*
            }

            fn from_model(model: &::claystore::Model) -> ::claystore::Result<Self> {
                ::core::result::Result::Ok(Self {
                    #(#reads,)*
                })
            }

            fn write_to(&self, model: &mut ::claystore::Model) -> ::claystore::Result<()> {
                #(#writes)*
                ::core::result::Result::Ok(())
            }
        }
    })
}

/// `#[schema(singular = "...", plural = "...")]` on the struct. The
/// singular name defaults to the snake_case struct name.
fn class_names(input: &DeriveInput) -> syn::Result<(String, Option<String>)> {
    let mut singular = None;
    let mut plural = None;
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("schema")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("singular") {
                singular = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("plural") {
                plural = Some(meta.value()?.parse::<LitStr>()?.value());
            } else {
                return Err(meta.error("expected `singular` or `plural`"));
            }
            Ok(())
        })?;
    }
    let singular = singular.unwrap_or_else(|| to_snake_case(&input.ident.to_string()));
    Ok((singular, plural))
}

fn schema_fields(input: &DeriveInput) -> syn::Result<Vec<SchemaField>> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Schema can only be derived for structs",
        ));
    };
    let Fields::Named(named) = &data.fields else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Schema needs a struct with named fields",
        ));
    };
    named.named.iter().map(schema_field).collect()
}

fn schema_field(field: &Field) -> syn::Result<SchemaField> {
    let Some(ident) = field.ident.clone() else {
        return Err(syn::Error::new_spanned(field, "unnamed field"));
    };
    let name = ident.to_string().trim_start_matches("r#").to_string();

    let mut required = false;
    let mut skip = false;
    let mut optional = false;
    let mut reference = false;
    let mut labels = None;
    let mut explicit_type = None;

    for attr in field.attrs.iter().filter(|a| a.path().is_ident("schema")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("required") {
                required = true;
            } else if meta.path.is_ident("skip") {
                skip = true;
            } else if meta.path.is_ident("optional") {
                optional = true;
            } else if meta.path.is_ident("reference") {
                reference = true;
            } else if meta.path.is_ident("type") {
                explicit_type = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("enumerable") {
                let content;
                syn::parenthesized!(content in meta.input);
                let parsed: Punctuated<LitStr, Token![,]> =
                    content.parse_terminated(|input| input.parse::<LitStr>(), Token![,])?;
                labels = Some(parsed.into_iter().collect::<Vec<_>>());
            } else {
                return Err(meta.error(
                    "expected one of `required`, `optional`, `enumerable(..)`, `reference`, `type`, `skip`",
                ));
            }
            Ok(())
        })?;
    }

    let role = if skip {
        Role::Skip
    } else if reference {
        let Some(target) = name.strip_suffix("_id") else {
            return Err(syn::Error::new_spanned(
                &ident,
                "reference fields are named `<reference>_id`",
            ));
        };
        Role::Reference(target.to_string())
    } else if let Some(labels) = labels {
        if labels.is_empty() {
            return Err(syn::Error::new_spanned(&ident, "enumerable needs at least one label"));
        }
        Role::Enumerable(labels)
    } else if let Some(type_name) = explicit_type {
        Role::Typed(type_name)
    } else if optional || is_option(&field.ty) {
        Role::Optional
    } else {
        match infer_type(&field.ty) {
            Some(type_name) => Role::Typed(type_name.to_string()),
            None => {
                return Err(syn::Error::new_spanned(
                    &field.ty,
                    "cannot infer a property type; add #[schema(type = \"...\")]",
                ))
            }
        }
    };

    Ok(SchemaField {
        ident,
        name,
        role,
        required,
    })
}

fn last_segment(ty: &Type) -> Option<&syn::PathSegment> {
    match ty {
        Type::Path(path) => path.path.segments.last(),
        _ => None,
    }
}

fn is_option(ty: &Type) -> bool {
    last_segment(ty).is_some_and(|segment| {
        segment.ident == "Option"
            && matches!(
                &segment.arguments,
                PathArguments::AngleBracketed(args)
                    if matches!(args.args.first(), Some(GenericArgument::Type(_)))
            )
    })
}

/// Registered type name for a field's Rust type.
fn infer_type(ty: &Type) -> Option<&'static str> {
    let ident = last_segment(ty)?.ident.to_string();
    let type_name = match ident.as_str() {
        "String" => "string",
        "f64" | "f32" | "i64" | "i32" | "i16" | "i8" | "u64" | "u32" | "u16" | "u8" | "usize"
        | "isize" => "number",
        "bool" => "boolean",
        "DateTime" => "date",
        "Vec" => "array",
        "Record" | "BTreeMap" => "hash",
        "Value" => "untyped",
        _ => return None,
    };
    Some(type_name)
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(ch.to_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}
