use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::graph::EntityId;
use crate::transaction::Transaction;

pub const DEFAULT_ROOT_ID: &str = "ROOT_QUERY";
pub const DEFAULT_ROOT_TYPENAME: &str = "Query";

/// Computes the identity id of an object from its typename and raw fields.
/// `None` means the object is not normalized and is stored inline.
pub type EntityIdFn = Arc<dyn Fn(Option<&str>, &Map<String, Value>) -> Option<String> + Send + Sync>;

/// Called after a write with the next and previous data of a changed node of
/// one type. `next` is `None` when the node was orphaned or removed,
/// `previous` is `None` when it is new.
pub type EntityUpdater =
    Arc<dyn Fn(&mut Transaction<'_>, Option<&Value>, Option<&Value>) -> Result<()> + Send + Sync>;

/// Maps the resolved arguments of a parameterized field to the entity it
/// stands for, so the field can be read before it was ever written.
pub type RedirectFn = Arc<dyn Fn(&Value) -> Option<EntityId> + Send + Sync>;

/// How a list read treats an element whose entity no longer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListPolicy {
    /// Keep the position and read `null` there.
    #[default]
    PreserveNull,
    /// Leave the element out and shift the rest.
    Shrink,
}

/// Default identity: the object's scalar `id` field, prefixed with its
/// typename when it has one (`User:1`).
pub fn default_entity_id(typename: Option<&str>, object: &Map<String, Value>) -> Option<String> {
    let id = match object.get("id")? {
        Value::String(id) => id.clone(),
        Value::Number(id) => id.to_string(),
        _ => return None,
    };
    Some(match typename {
        Some(typename) => format!("{}:{}", typename, id),
        None => id,
    })
}

/// Cache behaviour that is fixed for the lifetime of a store.
#[derive(Clone)]
pub struct CacheConfig {
    pub root_id: EntityId,
    pub root_typename: String,
    pub entity_id: EntityIdFn,
    pub entity_updaters: HashMap<String, EntityUpdater>,
    pub list_policies: HashMap<String, ListPolicy>,
    pub redirects: HashMap<String, RedirectFn>,
    /// Reject payloads that lack a selected field instead of skipping it.
    pub strict: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        CacheConfig {
            root_id: EntityId::new(DEFAULT_ROOT_ID),
            root_typename: DEFAULT_ROOT_TYPENAME.to_string(),
            entity_id: Arc::new(default_entity_id),
            entity_updaters: HashMap::new(),
            list_policies: HashMap::new(),
            redirects: HashMap::new(),
            strict: false,
        }
    }

    pub fn with_root(mut self, root_id: impl Into<EntityId>, typename: impl Into<String>) -> Self {
        self.root_id = root_id.into();
        self.root_typename = typename.into();
        self
    }

    pub fn with_entity_id<F>(mut self, entity_id: F) -> Self
    where
        F: Fn(Option<&str>, &Map<String, Value>) -> Option<String> + Send + Sync + 'static,
    {
        self.entity_id = Arc::new(entity_id);
        self
    }

    pub fn with_updater<F>(mut self, typename: impl Into<String>, updater: F) -> Self
    where
        F: Fn(&mut Transaction<'_>, Option<&Value>, Option<&Value>) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.entity_updaters.insert(typename.into(), Arc::new(updater));
        self
    }

    /// Set the dangling-element policy of `typename.field`.
    pub fn with_list_policy(mut self, typename: &str, field: &str, policy: ListPolicy) -> Self {
        self.list_policies.insert(field_key(typename, field), policy);
        self
    }

    pub fn with_redirect<F>(mut self, typename: &str, field: &str, redirect: F) -> Self
    where
        F: Fn(&Value) -> Option<EntityId> + Send + Sync + 'static,
    {
        self.redirects.insert(field_key(typename, field), Arc::new(redirect));
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub(crate) fn identify(&self, typename: Option<&str>, object: &Map<String, Value>) -> Option<EntityId> {
        (self.entity_id)(typename, object).map(EntityId::from)
    }

    pub(crate) fn list_policy(&self, typename: Option<&str>, field: &str) -> ListPolicy {
        typename
            .and_then(|typename| self.list_policies.get(&field_key(typename, field)))
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn redirect(&self, typename: Option<&str>, field: &str) -> Option<&RedirectFn> {
        typename.and_then(|typename| self.redirects.get(&field_key(typename, field)))
    }

    pub(crate) fn updater(&self, typename: &str) -> Option<&EntityUpdater> {
        self.entity_updaters.get(typename)
    }
}

fn field_key(typename: &str, field: &str) -> String {
    format!("{}.{}", typename, field)
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut updaters: Vec<&String> = self.entity_updaters.keys().collect();
        updaters.sort();
        let mut redirects: Vec<&String> = self.redirects.keys().collect();
        redirects.sort();
        f.debug_struct("CacheConfig")
            .field("root_id", &self.root_id)
            .field("root_typename", &self.root_typename)
            .field("entity_updaters", &updaters)
            .field("list_policies", &self.list_policies)
            .field("redirects", &redirects)
            .field("strict", &self.strict)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn default_identity_uses_scalar_id() {
        assert_eq!(
            default_entity_id(Some("User"), &object(json!({"id": 1}))),
            Some("User:1".to_string())
        );
        assert_eq!(
            default_entity_id(None, &object(json!({"id": "a"}))),
            Some("a".to_string())
        );
        assert_eq!(default_entity_id(None, &object(json!({"id": {"nested": 1}}))), None);
        assert_eq!(default_entity_id(Some("User"), &object(json!({"name": "x"}))), None);
    }

    #[test]
    fn list_policy_defaults_to_preserving_nulls() {
        let config = CacheConfig::new().with_list_policy("Query", "feed", ListPolicy::Shrink);

        assert_eq!(config.list_policy(Some("Query"), "feed"), ListPolicy::Shrink);
        assert_eq!(config.list_policy(Some("Query"), "other"), ListPolicy::PreserveNull);
        assert_eq!(config.list_policy(None, "feed"), ListPolicy::PreserveNull);
    }
}
