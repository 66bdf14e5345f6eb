use std::collections::BTreeSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;

use crate::ast;
use crate::error::CacheError;
use crate::keys::KeyConfig;
use crate::plan::ConnectionMeta;
use crate::plan::Plan;
use crate::plan::PlanField;
use crate::plan::PlanKind;
use crate::plan::VarMask;
use crate::plan::WINDOW_ARGS;

/// A selection still carrying its inherited directives/type-condition, not
/// yet merged with its siblings. Fragment spreads and inline fragments are
/// flattened into these before dedupe runs; children are flattened eagerly
/// too, so by the time dedupe sees a `RawField` tree it contains only field
/// selections.
struct RawField {
    response_key: String,
    field_name: String,
    type_condition: Option<String>,
    arguments: Vec<(String, ast::Value)>,
    directives: Vec<ast::Directive>,
    children: Vec<RawField>,
}

pub fn compile(document: &ast::Document, operation_name: Option<&str>, keys: &KeyConfig) -> Result<Plan, CacheError> {
    if document.operations.is_empty() {
        let name = operation_name.ok_or_else(|| CacheError::Internal("fragment name required".into()))?;
        let fragment = document
            .fragments
            .get(name)
            .ok_or_else(|| CacheError::Document(ast::DocumentError::UnknownFragment(name.to_owned())))?;
        return compile_selection(
            document,
            keys,
            PlanKind::Fragment,
            fragment.type_condition.clone(),
            &fragment.selection_set,
            None,
        );
    }
    let operation = document.get_operation(operation_name)?;
    let (kind, root_typename) = match operation.operation_type {
        ast::OperationType::Query => (PlanKind::Query, "Query"),
        ast::OperationType::Mutation => (PlanKind::Mutation, "Mutation"),
        ast::OperationType::Subscription => (PlanKind::Subscription, "Subscription"),
    };
    compile_selection(document, keys, kind, root_typename.to_owned(), &operation.selection_set, Some(operation))
}

fn compile_selection(
    document: &ast::Document,
    keys: &KeyConfig,
    kind: PlanKind,
    root_typename: String,
    selection_set: &[ast::Selection],
    operation: Option<&ast::OperationDefinition>,
) -> Result<Plan, CacheError> {
    let raw = flatten_selection_set(document, selection_set, None, &[])?;
    let root = dedupe_and_build(raw, keys)?;

    let mut strict_vars = BTreeSet::new();
    let mut non_window_vars = BTreeSet::new();
    let mut window_args = BTreeSet::new();
    collect_var_masks(&root, &mut strict_vars, &mut non_window_vars, &mut window_args);

    let mut hasher = DefaultHasher::new();
    kind_tag(kind).hash(&mut hasher);
    root_typename.hash(&mut hasher);
    let mut child_ids: Vec<u64> = root.iter().map(|f| f.sel_id).collect();
    child_ids.sort_unstable();
    child_ids.hash(&mut hasher);
    let id = hasher.finish();

    let network_query = print_network_query(kind, operation.and_then(|op| op.name.as_deref()), &root);

    Ok(Plan {
        id,
        kind,
        root_typename,
        root,
        var_mask: VarMask { strict: strict_vars, canonical: non_window_vars },
        window_args,
        network_query,
    })
}

fn kind_tag(kind: PlanKind) -> &'static str {
    match kind {
        PlanKind::Query => "query",
        PlanKind::Mutation => "mutation",
        PlanKind::Subscription => "subscription",
        PlanKind::Fragment => "fragment",
    }
}

/// Flattens fragment spreads and inline fragments into a list of
/// field-shaped [`RawField`]s, threading directives from wrapping spreads
/// down onto the leaves so `@skip`/`@include` still gate them correctly.
/// Recurses fully: the returned `RawField`s' own `children` are already
/// flattened too.
fn flatten_selection_set(
    document: &ast::Document,
    selection_set: &[ast::Selection],
    type_condition: Option<&str>,
    inherited_directives: &[ast::Directive],
) -> Result<Vec<RawField>, CacheError> {
    let mut out = Vec::new();
    for selection in selection_set {
        match selection {
            ast::Selection::Field(field) => {
                let mut directives = inherited_directives.to_vec();
                directives.extend(field.directives.iter().cloned());
                let children = flatten_selection_set(document, &field.selection_set, None, &[])?;
                out.push(RawField {
                    response_key: field.response_key().to_owned(),
                    field_name: field.name.clone(),
                    type_condition: type_condition.map(str::to_owned),
                    arguments: field.arguments.clone(),
                    directives,
                    children,
                });
            }
            ast::Selection::InlineFragment(inline) => {
                let mut directives = inherited_directives.to_vec();
                directives.extend(inline.directives.iter().cloned());
                let nested_condition = inline.type_condition.as_deref().or(type_condition);
                out.extend(flatten_selection_set(document, &inline.selection_set, nested_condition, &directives)?);
            }
            ast::Selection::FragmentSpread(spread) => {
                let fragment = document
                    .fragments
                    .get(&spread.name)
                    .ok_or_else(|| CacheError::Document(ast::DocumentError::UnknownFragment(spread.name.clone())))?;
                let mut directives = inherited_directives.to_vec();
                directives.extend(spread.directives.iter().cloned());
                let nested_condition = Some(fragment.type_condition.as_str());
                out.extend(flatten_selection_set(document, &fragment.selection_set, nested_condition, &directives)?);
            }
        }
    }
    Ok(out)
}

/// Merges sibling raw fields sharing response-key, argument vector,
/// directive set and type-condition, then recurses into their (concatenated)
/// children. This implements the document dedupe rule from the planner spec.
fn dedupe_and_build(raw: Vec<RawField>, keys: &KeyConfig) -> Result<Vec<PlanField>, CacheError> {
    let mut merged: Vec<(RawField, Vec<RawField>)> = Vec::new();
    'outer: for mut field in raw {
        let children = std::mem::take(&mut field.children);
        for (existing, existing_children) in merged.iter_mut() {
            if existing.response_key == field.response_key
                && existing.field_name == field.field_name
                && existing.type_condition == field.type_condition
                && args_equal(&existing.arguments, &field.arguments)
                && directives_equal(&existing.directives, &field.directives)
            {
                existing_children.extend(children);
                continue 'outer;
            }
        }
        merged.push((field, children));
    }
    build_plan_fields(merged, keys)
}

fn build_plan_fields(merged: Vec<(RawField, Vec<RawField>)>, keys: &KeyConfig) -> Result<Vec<PlanField>, CacheError> {
    let mut out = Vec::with_capacity(merged.len());
    for (field, children) in merged {
        let connection = connection_meta(&field);
        let selection_set = dedupe_and_build(children, keys)?;

        let mut expected_arg_names = Vec::new();
        for (name, _) in &field.arguments {
            if !expected_arg_names.contains(name) {
                expected_arg_names.push(name.clone());
            }
        }

        let mut hasher = DefaultHasher::new();
        field.field_name.hash(&mut hasher);
        field.type_condition.hash(&mut hasher);
        expected_arg_names.hash(&mut hasher);
        for directive in &field.directives {
            directive.name.hash(&mut hasher);
        }
        let mut child_ids: Vec<u64> = selection_set.iter().map(|f| f.sel_id).collect();
        child_ids.sort_unstable();
        child_ids.hash(&mut hasher);
        let sel_id = hasher.finish();

        out.push(PlanField {
            response_key: field.response_key,
            field_name: field.field_name,
            type_condition: field.type_condition,
            selection_set,
            expected_arg_names,
            raw_args: field.arguments,
            directives: field.directives,
            sel_id,
            connection,
        });
    }
    Ok(out)
}

fn args_equal(a: &[(String, ast::Value)], b: &[(String, ast::Value)]) -> bool {
    a.len() == b.len() && a.iter().all(|(name, value)| b.iter().any(|(n2, v2)| n2 == name && v2 == value))
}

fn directives_equal(a: &[ast::Directive], b: &[ast::Directive]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

fn connection_meta(field: &RawField) -> Option<ConnectionMeta> {
    let directive = field.directives.iter().find(|d| d.name == "connection")?;
    let connection_key = directive
        .arguments
        .iter()
        .find(|(name, _)| name == "key")
        .and_then(|(_, v)| match v {
            ast::Value::String(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_else(|| field.field_name.clone());
    let filters = directive.arguments.iter().find(|(name, _)| name == "filters").and_then(|(_, v)| match v {
        ast::Value::List(items) => Some(
            items
                .iter()
                .filter_map(|i| match i {
                    ast::Value::String(s) => Some(s.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        ),
        _ => None,
    });
    let page_args = field
        .arguments
        .iter()
        .filter_map(|(name, _)| WINDOW_ARGS.contains(&name.as_str()).then(|| name.clone()))
        .collect();
    Some(ConnectionMeta { connection_key, filters, page_args })
}

fn collect_var_masks(
    fields: &[PlanField],
    strict: &mut BTreeSet<String>,
    non_window: &mut BTreeSet<String>,
    window_args: &mut BTreeSet<String>,
) {
    for field in fields {
        for (name, value) in &field.raw_args {
            let mut vars = Vec::new();
            value.collect_variables(&mut vars);
            let is_window_slot = field.is_connection() && WINDOW_ARGS.contains(&name.as_str());
            for v in vars {
                strict.insert(v.clone());
                if !is_window_slot {
                    non_window.insert(v);
                }
            }
            if is_window_slot {
                window_args.insert(name.clone());
            }
        }
        for directive in &field.directives {
            for (_, value) in &directive.arguments {
                let mut vars = Vec::new();
                value.collect_variables(&mut vars);
                for v in vars {
                    strict.insert(v.clone());
                    non_window.insert(v);
                }
            }
        }
        collect_var_masks(&field.selection_set, strict, non_window, window_args);
    }
}

/// Renders the compiled field tree back into GraphQL text for the
/// transport, injecting `__typename` into every selection set and dropping
/// the `@connection` directive (a cache-only annotation with no meaning to
/// a server). Standard `@include`/`@skip` directives are preserved. Named
/// fragment spreads are not reconstructed: the network query is printed
/// directly from the already-flattened plan tree.
fn print_network_query(kind: PlanKind, name: Option<&str>, fields: &[PlanField]) -> String {
    let mut out = String::new();
    match kind {
        PlanKind::Fragment => out.push_str("query"),
        _ => out.push_str(kind_tag(kind)),
    }
    if let Some(name) = name {
        out.push(' ');
        out.push_str(name);
    }
    out.push(' ');
    print_selection_set(fields, &mut out);
    out
}

fn print_selection_set(fields: &[PlanField], out: &mut String) {
    out.push('{');
    out.push_str(" __typename ");
    for field in fields {
        print_field(field, out);
    }
    out.push('}');
}

fn print_field(field: &PlanField, out: &mut String) {
    if field.response_key != field.field_name {
        out.push_str(&field.response_key);
        out.push(':');
    }
    out.push_str(&field.field_name);
    if !field.raw_args.is_empty() {
        out.push('(');
        for (i, (name, value)) in field.raw_args.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(name);
            out.push(':');
            print_value(value, out);
        }
        out.push(')');
    }
    for directive in &field.directives {
        if directive.name != "connection" {
            out.push('@');
            out.push_str(&directive.name);
            if !directive.arguments.is_empty() {
                out.push('(');
                for (i, (name, value)) in directive.arguments.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(name);
                    out.push(':');
                    print_value(value, out);
                }
                out.push(')');
            }
        }
    }
    out.push(' ');
    if !field.selection_set.is_empty() {
        print_selection_set(&field.selection_set, out);
    }
    out.push(' ');
}

fn print_value(value: &ast::Value, out: &mut String) {
    match value {
        ast::Value::Null => out.push_str("null"),
        ast::Value::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        ast::Value::Int(i) => out.push_str(&i.to_string()),
        ast::Value::Float(f) => out.push_str(&f.to_string()),
        ast::Value::String(s) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
        ast::Value::Enum(e) => out.push_str(e),
        ast::Value::Variable(v) => {
            out.push('$');
            out.push_str(v);
        }
        ast::Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                print_value(item, out);
            }
            out.push(']');
        }
        ast::Value::Object(fields) => {
            out.push('{');
            for (i, (name, value)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(name);
                out.push(':');
                print_value(value, out);
            }
            out.push('}');
        }
    }
}
