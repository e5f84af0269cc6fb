use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::{
    parse_macro_input, spanned::Spanned, Attribute, Data, DeriveInput, Fields, Ident, LitStr, Path,
    Type,
};

#[proc_macro_derive(ClosureTreeModel, attributes(closure_tree))]
pub fn derive_closure_tree_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match impl_closure_tree_model(&input) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct Options {
    id_field: Option<String>,
    id_type: Option<Type>,
    parent_field: Option<String>,
    name_field: Option<String>,
    order_field: Option<String>,
    type_tag_field: Option<String>,
    hierarchy_module: Option<Path>,
    hierarchy_table: Option<String>,
    entity_name: Option<String>,
    hierarchy_name: Option<String>,
    ancestor_field: Option<String>,
    descendant_field: Option<String>,
    generations_field: Option<String>,
    dependent: Option<Ident>,
}

fn impl_closure_tree_model(input: &DeriveInput) -> syn::Result<TokenStream> {
    let struct_ident = &input.ident;
    let span = struct_ident.span();

    let data_struct = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "ClosureTreeModel can only be derived for structs",
            ))
        }
    };

    let mut options = Options::default();
    let mut table_name: Option<String> = None;

    for attr in &input.attrs {
        if attr.path().is_ident("closure_tree") {
            parse_closure_tree_attr(attr, &mut options)?;
        }

        if attr.path().is_ident("sea_orm") {
            if let Some(name) = parse_sea_orm_table_name(attr)? {
                table_name = Some(name);
            }
        }
    }

    let field = |value: Option<String>, default: &str| value.unwrap_or_else(|| default.to_string());
    let id_field_name = field(options.id_field, "id");
    let parent_field_name = field(options.parent_field, "parent_id");
    let name_field_name = field(options.name_field, "name");
    let order_field_name = field(options.order_field, "order_value");
    let type_tag_field_name = field(options.type_tag_field, "type_tag");
    let ancestor_field_name = field(options.ancestor_field, "ancestor_id");
    let descendant_field_name = field(options.descendant_field, "descendant_id");
    let generations_field_name = field(options.generations_field, "generations");

    let id_field_ident = Ident::new(&id_field_name, span);
    let parent_field_ident = Ident::new(&parent_field_name, span);
    let name_field_ident = Ident::new(&name_field_name, span);
    let order_field_ident = Ident::new(&order_field_name, span);
    let type_tag_field_ident = Ident::new(&type_tag_field_name, span);
    let ancestor_field_ident = Ident::new(&ancestor_field_name, span);
    let descendant_field_ident = Ident::new(&descendant_field_name, span);
    let generations_field_ident = Ident::new(&generations_field_name, span);

    let mut id_field_type: Option<Type> = options.id_type.clone();
    let mut type_tag_type: Option<Type> = None;

    if let Fields::Named(ref fields) = data_struct.fields {
        for field in &fields.named {
            if let Some(ident) = &field.ident {
                if ident == &id_field_ident && id_field_type.is_none() {
                    id_field_type = Some(field.ty.clone());
                }
                if ident == &type_tag_field_ident {
                    type_tag_type = Some(field.ty.clone());
                }
            }
        }
    } else {
        return Err(syn::Error::new(
            data_struct.fields.span(),
            "ClosureTreeModel requires named fields",
        ));
    }

    let id_type = id_field_type.ok_or_else(|| {
        syn::Error::new(
            span,
            "Unable to determine id field type; specify `id_type = ...` in #[closure_tree]",
        )
    })?;

    let type_tag_type = type_tag_type.ok_or_else(|| {
        syn::Error::new(
            span,
            format!("No `{type_tag_field_name}` field; set `type_tag_field = ...` in #[closure_tree]"),
        )
    })?;

    let hierarchy_module_path = options
        .hierarchy_module
        .ok_or_else(|| syn::Error::new(span, "`hierarchy_module` must be set"))?;

    // SeaORM models are all named `Model`; the table tells trees apart.
    let entity_name = options
        .entity_name
        .or_else(|| table_name.clone())
        .unwrap_or_else(|| struct_ident.unraw().to_string());
    let hierarchy_name = options.hierarchy_name.unwrap_or_else(|| {
        if entity_name.ends_with("Hierarchy") {
            entity_name.clone()
        } else {
            format!("{}Hierarchy", entity_name)
        }
    });

    let base_table = table_name.unwrap_or_else(|| struct_ident.unraw().to_string());
    let hierarchy_table = options
        .hierarchy_table
        .unwrap_or_else(|| format!("{}_hierarchies", base_table));

    let variant = |name: &str| format_ident!("{}", to_pascal_case(name));
    let id_column_variant = variant(&id_field_name);
    let parent_column_variant = variant(&parent_field_name);
    let name_column_variant = variant(&name_field_name);
    let order_column_variant = variant(&order_field_name);
    let type_tag_column_variant = variant(&type_tag_field_name);
    let ancestor_column_variant = variant(&ancestor_field_name);
    let descendant_column_variant = variant(&descendant_field_name);
    let generations_column_variant = variant(&generations_field_name);

    let literal = |value: &str| LitStr::new(value, span);
    let table_literal = literal(&base_table);
    let id_column_literal = literal(&id_field_name);
    let parent_column_literal = literal(&parent_field_name);
    let order_column_literal = literal(&order_field_name);
    let type_tag_column_literal = literal(&type_tag_field_name);
    let hierarchy_table_literal = literal(&hierarchy_table);
    let ancestor_column_literal = literal(&ancestor_field_name);
    let descendant_column_literal = literal(&descendant_field_name);
    let generations_column_literal = literal(&generations_field_name);
    let entity_name_literal = literal(&entity_name);
    let hierarchy_name_literal = literal(&hierarchy_name);

    let dependent = options.dependent.map(|behavior| {
        quote! { .dependent_behavior(::ordered_closure_tree::DependentBehavior::#behavior) }
    });

    let generated = quote! {
        impl ::ordered_closure_tree::ClosureTreeModel for #struct_ident {
            type Entity = Entity;
            type ActiveModel = ActiveModel;
            type Id = #id_type;
            type TypeTag = #type_tag_type;

            type HierarchyEntity = #hierarchy_module_path::Entity;
            type HierarchyModel = #hierarchy_module_path::Model;
            type HierarchyActiveModel = #hierarchy_module_path::ActiveModel;

            fn closure_tree_config() -> &'static ::ordered_closure_tree::ClosureTreeConfig {
                static CONFIG: ::once_cell::sync::Lazy<::ordered_closure_tree::ClosureTreeConfig> =
                    ::once_cell::sync::Lazy::new(|| {
                        let base = ::ordered_closure_tree::ClosureTreeConfig::new(
                            #entity_name_literal,
                            #hierarchy_name_literal,
                        );
                        ::ordered_closure_tree::ClosureTreeOptions::default()
                            .table_name(#table_literal)
                            .id_column(#id_column_literal)
                            .parent_column(#parent_column_literal)
                            .order_column(#order_column_literal)
                            .type_tag_column(#type_tag_column_literal)
                            .hierarchy_table(#hierarchy_table_literal)
                            .ancestor_column(#ancestor_column_literal)
                            .descendant_column(#descendant_column_literal)
                            .generations_column(#generations_column_literal)
                            #dependent
                            .apply(base)
                    });
                &CONFIG
            }

            fn id(&self) -> Self::Id {
                self.#id_field_ident.clone()
            }

            fn parent_id(&self) -> Option<Self::Id> {
                self.#parent_field_ident.clone()
            }

            fn set_parent(active: &mut Self::ActiveModel, parent: Option<Self::Id>) {
                active.#parent_field_ident = ::sea_orm::ActiveValue::Set(parent);
            }

            fn id_to_value(id: &Self::Id) -> ::sea_orm::Value {
                ::sea_orm::Value::from(id.clone())
            }

            fn name(&self) -> &str {
                self.#name_field_ident.as_str()
            }

            fn set_name(active: &mut Self::ActiveModel, name: &str) {
                active.#name_field_ident = ::sea_orm::ActiveValue::Set(name.to_owned());
            }

            fn order_value(&self) -> i32 {
                self.#order_field_ident
            }

            fn set_order_value(active: &mut Self::ActiveModel, order: i32) {
                active.#order_field_ident = ::sea_orm::ActiveValue::Set(order);
            }

            fn type_tag(&self) -> Self::TypeTag {
                self.#type_tag_field_ident.clone()
            }

            fn set_type_tag(active: &mut Self::ActiveModel, tag: Self::TypeTag) {
                active.#type_tag_field_ident = ::sea_orm::ActiveValue::Set(tag);
            }

            fn type_tag_to_value(tag: &Self::TypeTag) -> ::sea_orm::Value {
                ::core::convert::Into::into(tag.clone())
            }

            fn parent_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#parent_column_variant
            }

            fn id_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#id_column_variant
            }

            fn name_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#name_column_variant
            }

            fn order_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#order_column_variant
            }

            fn type_tag_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#type_tag_column_variant
            }

            fn hierarchy_ancestor_column() -> <Self::HierarchyEntity as ::sea_orm::EntityTrait>::Column {
                #hierarchy_module_path::Column::#ancestor_column_variant
            }

            fn hierarchy_descendant_column() -> <Self::HierarchyEntity as ::sea_orm::EntityTrait>::Column {
                #hierarchy_module_path::Column::#descendant_column_variant
            }

            fn hierarchy_generations_column() -> <Self::HierarchyEntity as ::sea_orm::EntityTrait>::Column {
                #hierarchy_module_path::Column::#generations_column_variant
            }

            fn hierarchy_id_to_value(id: &Self::Id) -> ::sea_orm::Value {
                ::sea_orm::Value::from(id.clone())
            }

            fn hierarchy_model_ancestor(model: &Self::HierarchyModel) -> Self::Id {
                model.#ancestor_field_ident.clone()
            }

            fn hierarchy_model_descendant(model: &Self::HierarchyModel) -> Self::Id {
                model.#descendant_field_ident.clone()
            }

            fn hierarchy_model_generations(model: &Self::HierarchyModel) -> i32 {
                model.#generations_field_ident
            }

            fn hierarchy_build_row(
                ancestor: Self::Id,
                descendant: Self::Id,
                generations: i32,
            ) -> Self::HierarchyActiveModel {
                #[allow(clippy::needless_update)]
                {
                    #hierarchy_module_path::ActiveModel {
                        #ancestor_field_ident: ::sea_orm::ActiveValue::Set(ancestor),
                        #descendant_field_ident: ::sea_orm::ActiveValue::Set(descendant),
                        #generations_field_ident: ::sea_orm::ActiveValue::Set(generations),
                        ..::core::default::Default::default()
                    }
                }
            }
        }
    };

    Ok(generated.into())
}

fn parse_closure_tree_attr(attr: &Attribute, options: &mut Options) -> syn::Result<()> {
    attr.parse_nested_meta(|meta| {
        let ident = meta
            .path
            .get_ident()
            .ok_or_else(|| syn::Error::new(meta.path.span(), "Invalid option key"))?
            .to_string();

        if ident == "id_type" {
            let ty: Type = meta.value()?.parse()?;
            options.id_type = Some(ty);
            return Ok(());
        }

        let value: LitStr = meta.value()?.parse()?;
        match ident.as_str() {
            "id_field" => options.id_field = Some(value.value()),
            "parent_field" => options.parent_field = Some(value.value()),
            "name_field" => options.name_field = Some(value.value()),
            "order_field" => options.order_field = Some(value.value()),
            "type_tag_field" => options.type_tag_field = Some(value.value()),
            "hierarchy_module" => {
                options.hierarchy_module = Some(parse_path(&value.value(), value.span())?);
            }
            "hierarchy_table" => options.hierarchy_table = Some(value.value()),
            "entity_name" => options.entity_name = Some(value.value()),
            "hierarchy_name" => options.hierarchy_name = Some(value.value()),
            "ancestor_field" => options.ancestor_field = Some(value.value()),
            "descendant_field" => options.descendant_field = Some(value.value()),
            "generations_field" => options.generations_field = Some(value.value()),
            "dependent" => {
                options.dependent = Some(parse_dependent(&value)?);
            }
            other => {
                return Err(syn::Error::new(
                    meta.path.span(),
                    format!("Unsupported closure_tree option `{other}`"),
                ));
            }
        }

        Ok(())
    })
}

fn parse_dependent(value: &LitStr) -> syn::Result<Ident> {
    let variant = match value.value().as_str() {
        "destroy" => "Destroy",
        "nullify" => "Nullify",
        "adopt" => "Adopt",
        other => {
            return Err(syn::Error::new(
                value.span(),
                format!("Unknown dependent behavior `{other}`; expected destroy, nullify or adopt"),
            ))
        }
    };
    Ok(Ident::new(variant, value.span()))
}

fn parse_sea_orm_table_name(attr: &Attribute) -> syn::Result<Option<String>> {
    let mut table_name: Option<String> = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("table_name") {
            let value: LitStr = meta.value()?.parse()?;
            table_name = Some(value.value());
        } else if meta.input.peek(syn::Token![=]) {
            // Skip other `key = value` options such as `schema_name`.
            let _: syn::Expr = meta.value()?.parse()?;
        }
        Ok(())
    })?;
    Ok(table_name)
}

fn parse_path(value: &str, span: proc_macro2::Span) -> syn::Result<Path> {
    syn::parse_str::<Path>(value).map_err(|_| syn::Error::new(span, "Invalid path"))
}

fn to_pascal_case(value: &str) -> String {
    value
        .split('_')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
