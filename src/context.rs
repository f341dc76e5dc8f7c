use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use crate::record::Fields;

/// Field carrying the optional tag added by [`LogTagging`].
pub const LOG_TYPE: &str = "log_type";

/// Persistent fields carried by a [`Logger`](crate::logger::Logger).
///
/// Binding operations never mutate in place: `bind` and `unbind` return a
/// new set, so handles derived from the same parent share nothing mutable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingSet {
    fields: Fields,
}

impl BindingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: Fields) -> Self {
        Self { fields }
    }

    /// Union with `fields`; new values win. Existing keys keep their position.
    pub fn bind(&self, fields: Fields) -> Self {
        let mut next = self.fields.clone();
        for (key, value) in fields {
            next.insert(key, value);
        }
        Self { fields: next }
    }

    /// Drop the named keys. Keys that are not bound are ignored.
    pub fn unbind<I, K>(&self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut next = self.fields.clone();
        for key in keys {
            next.shift_remove(key.as_ref());
        }
        Self { fields: next }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn as_fields(&self) -> &Fields {
        &self.fields
    }

    /// Bound fields overlaid with the fields of a single call.
    pub(crate) fn merged_with(&self, call: Fields) -> Fields {
        if call.is_empty() {
            return self.fields.clone();
        }
        let mut out = self.fields.clone();
        for (key, value) in call {
            out.insert(key, value);
        }
        out
    }
}

/// Process-wide extra fields merged into every event of a dispatcher.
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct AmbientContext {
    inner: Arc<RwLock<Fields>>,
}

impl AmbientContext {
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(key)
    }

    pub fn clear(&self) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn snapshot(&self) -> Fields {
        self.read().clone()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Fields> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builds per-call fields from a fixed base plus an optional `log_type` tag.
#[derive(Debug, Clone, Default)]
pub struct LogTagging {
    base: Fields,
}

impl LogTagging {
    pub fn new(base: Fields) -> Self {
        Self { base }
    }

    /// `log_type` comes first; a `log_type` in the base fields takes precedence.
    pub fn fields(&self, log_type: Option<&str>) -> Fields {
        let Some(log_type) = log_type else {
            return self.base.clone();
        };
        let mut out = Fields::new();
        out.insert(LOG_TYPE.to_string(), Value::String(log_type.to_string()));
        for (key, value) in &self.base {
            out.insert(key.clone(), value.clone());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;

    #[test]
    fn bind_overwrites_and_keeps_position() {
        let set = BindingSet::new().bind(fields! {"a" => 1, "b" => 2}).bind(fields! {"a" => 3});
        let keys: Vec<&str> = set.as_fields().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(set.get("a"), Some(&Value::from(3)));
    }

    #[test]
    fn unbind_missing_key_is_noop() {
        let set = BindingSet::new().bind(fields! {"a" => 1});
        let same = set.unbind(["missing"]);
        assert_eq!(same, set);
        assert!(set.unbind(["a"]).is_empty());
    }

    #[test]
    fn derived_sets_share_nothing() {
        let parent = BindingSet::new().bind(fields! {"session" => "abc"});
        let child = parent.bind(fields! {"user" => 7});
        assert!(!parent.contains_key("user"));
        assert_eq!(child.len(), 2);
    }

    #[test]
    fn call_fields_take_precedence() {
        let set = BindingSet::new().bind(fields! {"user" => "bound", "x" => 1});
        let merged = set.merged_with(fields! {"user" => "call"});
        assert_eq!(merged["user"], "call");
        assert_eq!(merged["x"], 1);
    }

    #[test]
    fn tagging_prefixes_log_type() {
        let tagging = LogTagging::new(fields! {"strategy" => "arb"});
        let tagged = tagging.fields(Some("trade"));
        let keys: Vec<&str> = tagged.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["log_type", "strategy"]);
        assert_eq!(tagging.fields(None), fields! {"strategy" => "arb"});
    }

    #[test]
    fn ambient_clones_share_state() {
        let ambient = AmbientContext::default();
        let other = ambient.clone();
        other.insert("host", "node-1");
        assert_eq!(ambient.snapshot()["host"], "node-1");
        assert_eq!(ambient.remove("host"), Some(Value::from("node-1")));
        assert!(other.snapshot().is_empty());
    }
}
