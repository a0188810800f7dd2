//! Process-wide kind registry.
//!
//! Kinds are registered by name so that serialized trees can be turned back
//! into definitions and so that `is(node, "name")` type tests work without a
//! handle on the kind itself. The registry is initialised once on first
//! access, seeded with the built-in kinds, and can be reset for test
//! isolation (built-ins survive a reset).

use std::sync::OnceLock;

use dashmap::DashMap;

use super::define::NodeKind;
use crate::node::{sentinel, NodeDefinition};

static REGISTRY: OnceLock<DashMap<String, NodeKind>> = OnceLock::new();

fn builtins() -> Vec<NodeKind> {
    let mut kinds = sentinel::kinds();
    kinds.push(crate::scope::scope_kind().clone());
    kinds.push(crate::graph::provide_kind().clone());
    kinds
}

fn get_registry() -> &'static DashMap<String, NodeKind> {
    REGISTRY.get_or_init(|| {
        let map = DashMap::new();
        for kind in builtins() {
            map.insert(kind.name().to_string(), kind);
        }
        map
    })
}

/// Register `kind`, replacing any kind previously registered under its name.
pub fn register(kind: NodeKind) {
    let name = kind.name().to_string();
    if get_registry().insert(name.clone(), kind).is_some() {
        tracing::debug!(kind = %name, "replaced registered node kind");
    } else {
        tracing::debug!(kind = %name, "registered node kind");
    }
}

/// Look up a kind by name.
pub fn lookup(name: &str) -> Option<NodeKind> {
    get_registry().get(name).map(|entry| entry.value().clone())
}

/// Name-based type test.
pub fn is(node: &NodeDefinition, name: &str) -> bool {
    node.kind_name() == name && lookup(name).is_some()
}

/// All registered kind names, sorted.
pub fn names() -> Vec<String> {
    let mut names: Vec<String> = get_registry().iter().map(|e| e.key().clone()).collect();
    names.sort();
    names
}

/// Drop every user-registered kind, keeping the built-ins.
pub fn reset() {
    let registry = get_registry();
    registry.clear();
    for kind in builtins() {
        registry.insert(kind.name().to_string(), kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered_on_first_access() {
        for name in ["pending", "error", "ok", "done", "nil", "value", "scope", "provide"] {
            assert!(lookup(name).is_some(), "missing built-in {name}");
        }
    }

    #[test]
    fn registered_kinds_can_be_looked_up_by_name() {
        let kind = NodeKind::builder("registry_test_lookup").define();
        assert_eq!(lookup("registry_test_lookup"), Some(kind));
        assert!(names().contains(&"registry_test_lookup".to_string()));
    }

    #[test]
    fn is_checks_kind_by_name() {
        let node = sentinel::value(1);
        assert!(is(&node, "value"));
        assert!(!is(&node, "error"));
    }
}
