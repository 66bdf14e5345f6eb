//! Entity key derivation and the interface->implementors map used for
//! type-guarded selection matching (config options `keys` and `interfaces`).

use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value as Json;

/// Derives the key portion of an entity id from a normalized JSON object.
/// Returns `None` when the object has no usable key, in which case the
/// value becomes an embedded sub-record rather than a deduplicated entity.
pub type KeyFn = Rc<dyn Fn(&serde_json::Map<String, Json>) -> Option<String>>;

fn default_key_fn(obj: &serde_json::Map<String, Json>) -> Option<String> {
    match obj.get("id")? {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Per-typename key functions, plus the interface -> implementors map used
/// to match `... on SomeInterface` type conditions during normalization.
#[derive(Clone)]
pub struct KeyConfig {
    per_typename: HashMap<String, KeyFn>,
    default: KeyFn,
    interfaces: HashMap<String, Vec<String>>,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self { per_typename: HashMap::new(), default: Rc::new(default_key_fn), interfaces: HashMap::new() }
    }
}

impl KeyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_fn(mut self, typename: impl Into<String>, key_fn: KeyFn) -> Self {
        self.per_typename.insert(typename.into(), key_fn);
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>, implementors: Vec<String>) -> Self {
        self.interfaces.insert(interface.into(), implementors);
        self
    }

    /// Derives an entity id for `typename` from `obj`, or `None` if the
    /// object should be embedded rather than deduplicated.
    pub fn entity_id(&self, typename: &str, obj: &serde_json::Map<String, Json>) -> Option<String> {
        let key_fn = self.per_typename.get(typename).unwrap_or(&self.default);
        let key = key_fn(obj)?;
        Some(format!("{typename}:{key}"))
    }

    /// True when a selection guarded by `condition` applies to a concrete
    /// `typename`, accounting for declared interfaces.
    pub fn type_condition_matches(&self, condition: &str, typename: &str) -> bool {
        if condition == typename {
            return true;
        }
        self.interfaces.get(condition).is_some_and(|impls| impls.iter().any(|t| t == typename))
    }
}
