use std::sync::{Arc, PoisonError, RwLock};

use super::value::release;
use super::{read_lock, write_lock, Value};

/// Insertion-ordered, shared `name -> value` mapping.
///
/// Module globals, class attributes, instance attributes and frame locals all
/// live in a `Namespace`. Clones share the same storage, so a clone handed to
/// the agent observes (and, for `exec`, performs) mutations of the host's view.
#[derive(Clone, Default)]
pub struct Namespace {
    entries: Arc<RwLock<Vec<(String, Value)>>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let ns = Self::new();
        for (name, value) in pairs {
            ns.set(name, value);
        }
        ns
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        read_lock(&self.entries)
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        read_lock(&self.entries).iter().any(|(k, _)| k == name)
    }

    /// Insert or replace. Replacing keeps the original insertion position.
    pub fn set(&self, name: impl Into<String>, value: Value) {
        let name = name.into();
        let replaced = {
            let mut entries = write_lock(&self.entries);
            match entries.iter_mut().find(|(k, _)| *k == name) {
                Some(slot) => Some(std::mem::replace(&mut slot.1, value)),
                None => {
                    entries.push((name, value));
                    None
                }
            }
        };
        if let Some(old) = replaced {
            release(old);
        }
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        let mut entries = write_lock(&self.entries);
        let pos = entries.iter().position(|(k, _)| k == name)?;
        Some(entries.remove(pos).1)
    }

    /// Point-in-time copy of the entries, in insertion order.
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        read_lock(&self.entries).clone()
    }

    pub fn names(&self) -> Vec<String> {
        read_lock(&self.entries).iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.entries) as *const () as usize
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        if let Some(lock) = Arc::get_mut(&mut self.entries) {
            let entries = std::mem::take(lock.get_mut().unwrap_or_else(PoisonError::into_inner));
            for (_, value) in entries {
                release(value);
            }
        }
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_preserves_insertion_order() {
        let ns = Namespace::new();
        ns.set("b", Value::Int(1));
        ns.set("a", Value::Int(2));
        ns.set("b", Value::Int(3));

        assert_eq!(ns.names(), vec!["b", "a"]);
        assert!(matches!(ns.get("b"), Some(Value::Int(3))));
    }

    #[test]
    fn test_deep_values_are_replaced_and_dropped() {
        let ns = Namespace::new();
        let mut chain = Value::list(vec![]);
        for _ in 0..100_000 {
            chain = Value::list(vec![chain]);
        }
        ns.set("x", chain);
        ns.set("x", Value::Int(0));

        let mut chain = Value::dict::<&str>(vec![]);
        for _ in 0..100_000 {
            chain = Value::dict(vec![("next", chain)]);
        }
        ns.set("y", chain);
        drop(ns);
    }

    #[test]
    fn test_clones_share_storage() {
        let ns = Namespace::new();
        let alias = ns.clone();
        alias.set("x", Value::Bool(true));

        assert!(ns.contains("x"));
        assert_eq!(ns.identity(), alias.identity());
        assert!(ns.remove("x").is_some());
        assert!(alias.is_empty());
    }
}
