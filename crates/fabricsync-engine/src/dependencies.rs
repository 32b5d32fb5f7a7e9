//! Dependency extraction from spec references
//!
//! A field such as `vpc: vpc-1` or `vpcs: [a, b]` names another resource in the same
//! namespace. The mapping from field name to referenced kind comes from the policy.

use serde_json::Value;
use std::collections::BTreeSet;

use fabricsync_core::{ReconcilePolicy, Resource, ResourceKey};

/// Keys of the resources this resource references, sorted and without itself
pub fn extract_dependency_keys(resource: &Resource, policy: &ReconcilePolicy) -> Vec<ResourceKey> {
    let mut keys = BTreeSet::new();
    if let Some(spec) = resource.desired_spec.as_ref().or(resource.actual_spec.as_ref()) {
        collect(spec, resource, policy, &mut keys);
    }
    keys.remove(&resource.key);
    keys.into_iter().collect()
}

fn collect(
    value: &Value,
    resource: &Resource,
    policy: &ReconcilePolicy,
    keys: &mut BTreeSet<ResourceKey>,
) {
    match value {
        Value::Object(map) => {
            for (field, child) in map {
                if policy.ignored_fields.contains(field) {
                    continue;
                }
                if let Some(kind) = policy.reference_fields.get(field) {
                    for name in referenced_names(child) {
                        keys.insert(ResourceKey::new(&resource.key.namespace, kind, name));
                    }
                } else {
                    collect(child, resource, policy, keys);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, resource, policy, keys);
            }
        }
        _ => {}
    }
}

fn referenced_names(value: &Value) -> Vec<&str> {
    match value {
        Value::String(name) if !name.is_empty() => vec![name.as_str()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|name| !name.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
