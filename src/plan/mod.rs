//! The compiled, immutable execution plan: per-field
//! metadata, variable masks, stable identity hashes, and dependency
//! extraction. Plans are pure data -- no closures, no borrowed document --
//! so they can be hashed, cached by id, and shared (`Rc`) across every
//! watcher that happens to compile the same document.

mod build;

use std::collections::BTreeSet;
use std::collections::HashSet;
use std::hash::Hash;
use std::hash::Hasher;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::ast;
use crate::ast::Variables;
use crate::error::CacheError;
use crate::graph::RecordId;
use crate::graph::ROOT_ID;
use crate::keys::KeyConfig;

pub use build::compile;

/// Pagination-window argument names recognized on connection fields.
pub const WINDOW_ARGS: [&str; 4] = ["first", "after", "last", "before"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    Query,
    Mutation,
    Subscription,
    Fragment,
}

/// The variables actually reachable from a plan, split into the strict mask
/// (every variable used anywhere) and the canonical mask (variables used
/// outside pagination-window argument slots). Two variable vectors that
/// agree on the canonical mask address the same canonical connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarMask {
    pub strict: BTreeSet<String>,
    pub canonical: BTreeSet<String>,
}

/// Connection-specific metadata attached to a [`PlanField`] marked by the
/// connection directive.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionMeta {
    /// Defaults to the field name; overridable via `@connection(key: ...)`.
    pub connection_key: String,
    /// Explicit filter argument names from `@connection(filters: [...])`.
    /// `None` means "every non-window argument is a filter".
    pub filters: Option<Vec<String>>,
    /// Window argument names actually present on this field's arguments.
    pub page_args: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanField {
    pub response_key: String,
    pub field_name: String,
    pub type_condition: Option<String>,
    pub selection_set: Vec<PlanField>,
    pub expected_arg_names: Vec<String>,
    pub raw_args: Vec<(String, ast::Value)>,
    pub directives: Vec<ast::Directive>,
    pub sel_id: u64,
    pub connection: Option<ConnectionMeta>,
}

impl PlanField {
    pub fn is_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Whether `@skip`/`@include` directives on this field evaluate to
    /// "selected" for `vars`. Fields that resolve to "not selected" are
    /// dropped during normalize/materialize as if absent from the document.
    pub fn is_selected(&self, vars: &Variables) -> bool {
        for directive in &self.directives {
            let truthy = directive
                .arguments
                .iter()
                .find(|(name, _)| name == "if")
                .and_then(|(_, value)| value.resolve(vars))
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            match directive.name.as_str() {
                "skip" if truthy => return false,
                "include" if !truthy => return false,
                _ => {}
            }
        }
        true
    }

    /// Resolves this field's arguments against `vars`, in
    /// `expected_arg_names` order, dropping undefined variables.
    pub fn build_args(&self, vars: &Variables) -> IndexMap<String, Json> {
        let mut out = IndexMap::new();
        for name in &self.expected_arg_names {
            if let Some((_, expr)) = self.raw_args.iter().find(|(n, _)| n == name) {
                if let Some(value) = expr.resolve(vars) {
                    out.insert(name.clone(), value);
                }
            }
        }
        out
    }

    /// Stable `JSON.stringify`-equivalent of [`Self::build_args`], or `None`
    /// when every argument is undefined.
    pub fn stringify_args(&self, vars: &Variables) -> Option<String> {
        let args = self.build_args(vars);
        if args.is_empty() {
            return None;
        }
        Some(serde_json::to_string(&Json::Object(args.into_iter().collect())).expect("map serializes"))
    }

    /// The record field-key this selection writes/reads under its parent:
    /// `fieldName` or `fieldName({...})`.
    pub fn field_key(&self, vars: &Variables) -> String {
        match self.stringify_args(vars) {
            Some(json) => format!("{}({json})", self.field_name),
            None => self.field_name.clone(),
        }
    }

    /// The subset of this field's arguments used as canonical-connection
    /// filters: every non-window argument, or the explicit filter set minus
    /// window args if declared.
    fn canonical_filter_args(&self, vars: &Variables) -> IndexMap<String, Json> {
        let meta = self.connection.as_ref().expect("connection field");
        let all = self.build_args(vars);
        match &meta.filters {
            Some(names) => all
                .into_iter()
                .filter(|(k, _)| names.contains(k) && !WINDOW_ARGS.contains(&k.as_str()))
                .collect(),
            None => all.into_iter().filter(|(k, _)| !WINDOW_ARGS.contains(&k.as_str())).collect(),
        }
    }

    fn filters_json(&self, vars: &Variables) -> String {
        let filters = self.canonical_filter_args(vars);
        serde_json::to_string(&Json::Object(filters.into_iter().collect())).expect("map serializes")
    }
}

/// Builds the strict-page connection id: `@.{parent}.{fieldKey}`.
pub fn strict_page_id(parent: &RecordId, field: &PlanField, vars: &Variables) -> RecordId {
    RecordId::new(format!("@.{parent}.{}", field.field_key(vars)))
}

/// Builds the canonical connection id: `@connection.{parent}.{connectionKey}({filtersJSON})`.
pub fn canonical_id(parent: &RecordId, field: &PlanField, vars: &Variables) -> RecordId {
    let meta = field.connection.as_ref().expect("connection field");
    RecordId::new(format!(
        "@connection.{parent}.{}({})",
        meta.connection_key,
        field.filters_json(vars)
    ))
}

/// Chooses the strict-page or canonical id for a connection field depending
/// on the read mode.
pub fn connection_record_id(parent: &RecordId, field: &PlanField, vars: &Variables, canonical: bool) -> RecordId {
    if canonical { canonical_id(parent, field, vars) } else { strict_page_id(parent, field, vars) }
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub id: u64,
    pub kind: PlanKind,
    pub root_typename: String,
    pub root: Vec<PlanField>,
    pub var_mask: VarMask,
    pub window_args: BTreeSet<String>,
    pub network_query: String,
}

impl Plan {
    pub fn compile(document: &ast::Document, operation_name: Option<&str>, keys: &KeyConfig) -> Result<Rc<Plan>, CacheError> {
        build::compile(document, operation_name, keys).map(Rc::new)
    }

    fn mask_for(&self, canonical: bool) -> &BTreeSet<String> {
        if canonical { &self.var_mask.canonical } else { &self.var_mask.strict }
    }

    /// Stable key for `vars` restricted to the relevant mask: sorted
    /// `name=json` pairs joined by `&`. Two variable vectors agreeing on
    /// every masked name produce the same key even if they differ outside
    /// the mask (the whole point of the canonical mask).
    pub fn make_vars_key(&self, canonical: bool, vars: &Variables) -> String {
        let mask = self.mask_for(canonical);
        let mut parts: Vec<String> = mask
            .iter()
            .map(|name| {
                let value = vars.get(name).cloned().unwrap_or(Json::Null);
                format!("{name}={value}")
            })
            .collect();
        parts.sort();
        parts.join("&")
    }

    pub fn make_signature(&self, canonical: bool, vars: &Variables) -> String {
        let scope = if canonical { "canonical" } else { "strict" };
        format!("{}|{scope}|{}", self.id, self.make_vars_key(canonical, vars))
    }

    /// The statically-known subset of records any materialization rooted at
    /// this plan reads: the root record itself, plus the chosen connection
    /// record for every top-level connection field. The full, graph-aware
    /// read-set tracked per materialization (see `documents::materialize`)
    /// is always a superset of this.
    pub fn get_dependencies(&self, canonical: bool, vars: &Variables) -> HashSet<RecordId> {
        let root = RecordId::new(ROOT_ID);
        let mut deps = HashSet::new();
        deps.insert(root.clone());
        for field in &self.root {
            if field.is_connection() {
                deps.insert(connection_record_id(&root, field, vars, canonical));
            }
        }
        deps
    }
}

impl PartialEq for Plan {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Plan {}

impl Hash for Plan {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
