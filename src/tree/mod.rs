//! Diff and merge over nested value maps
//!
//! The override record persisted at install time is `diff(defaults, final)`:
//! the sparse subset of leaves whose value differs from the compiled defaults.
//! `merge` is its inverse; `merge(defaults, diff(defaults, final))` reproduces
//! every leaf of `final` that differs from `defaults`.

use serde_json::{Map, Value};

/// Top-level branches injected by the renderer for its own bookkeeping.
///
/// They are not configuration and never appear in an override record.
pub const BOOKKEEPING_KEYS: [&str; 2] = ["configs", "partials"];

/// Compute the sparse set of leaves in `current` that differ from `defaults`.
///
/// - A leaf is kept iff its value differs (or it does not exist in `defaults`).
/// - A nested group is kept, with only its differing leaves, iff any
///   descendant differs. Groups identical in their entirety are omitted.
/// - [`BOOKKEEPING_KEYS`] are stripped from `current` before comparison.
///
/// Non-object inputs are compared as a single leaf; the result is always an
/// object so it can be serialized as a values document.
pub fn diff(defaults: &Value, current: &Value) -> Value {
    let current = without_bookkeeping(current);
    match (defaults, &current) {
        (Value::Object(d), Value::Object(c)) => Value::Object(diff_maps(d, c)),
        (_, Value::Object(c)) => Value::Object(c.clone()),
        _ => Value::Object(Map::new()),
    }
}

fn diff_maps(defaults: &Map<String, Value>, current: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in current {
        match (defaults.get(key), value) {
            (Some(Value::Object(d)), Value::Object(c)) => {
                let nested = diff_maps(d, c);
                if !nested.is_empty() {
                    out.insert(key.clone(), Value::Object(nested));
                }
            }
            (Some(d), c) if d == c => {}
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    out
}

/// Deep-merge `overlay` onto `base`; leaves in `overlay` win.
pub fn merge(base: &Value, overlay: &Value) -> Value {
    let mut merged = base.clone();
    merge_into(&mut merged, overlay);
    merged
}

/// In-place form of [`merge`].
pub fn merge_into(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(b), Value::Object(o)) => {
            for (key, value) in o {
                let nested = value.is_object() && b.get(key).is_some_and(Value::is_object);
                match b.get_mut(key) {
                    Some(existing) if nested => merge_into(existing, value),
                    _ => {
                        b.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (b, o) => *b = o.clone(),
    }
}

/// Return a copy of `value` with the bookkeeping branches removed.
pub fn without_bookkeeping(value: &Value) -> Value {
    let mut stripped = value.clone();
    if let Value::Object(map) = &mut stripped {
        for key in BOOKKEEPING_KEYS {
            map.remove(key);
        }
    }
    stripped
}

/// Set a leaf addressed by a dotted path, creating intermediate groups.
///
/// An intermediate that exists but is not a group is replaced by one.
pub fn set_path(root: &mut Value, path: &str, leaf: Value) {
    let mut node = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), leaf);
            return;
        }
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Look up a leaf addressed by a dotted path.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |node, segment| node.get(segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defaults() -> Value {
        json!({
            "clusterDomain": "cluster.local",
            "controllerReplicas": 1,
            "proxy": {
                "logLevel": "warn",
                "resources": {
                    "cpu": {"request": "", "limit": ""},
                    "memory": {"request": "", "limit": ""}
                }
            },
            "identity": {"issuer": {"scheme": "meshplane.io/tls"}}
        })
    }

    // =========================================================================
    // Story: The override record only carries what the user changed
    // =========================================================================

    #[test]
    fn diff_of_defaults_with_itself_is_empty() {
        assert_eq!(diff(&defaults(), &defaults()), json!({}));
    }

    #[test]
    fn diff_keeps_only_differing_leaves() {
        let mut current = defaults();
        current["clusterDomain"] = json!("foo.local");
        current["proxy"]["resources"]["cpu"]["request"] = json!("100m");

        assert_eq!(
            diff(&defaults(), &current),
            json!({
                "clusterDomain": "foo.local",
                "proxy": {"resources": {"cpu": {"request": "100m"}}}
            })
        );
    }

    #[test]
    fn diff_keeps_keys_missing_from_defaults() {
        let mut current = defaults();
        current["podLabels"] = json!({"team": "mesh"});
        assert_eq!(diff(&defaults(), &current), json!({"podLabels": {"team": "mesh"}}));
    }

    #[test]
    fn diff_keeps_type_changes_as_leaves() {
        let mut current = defaults();
        current["identity"] = json!("replaced");
        assert_eq!(diff(&defaults(), &current), json!({"identity": "replaced"}));
    }

    #[test]
    fn bookkeeping_branches_never_reach_the_record() {
        let mut current = defaults();
        current["configs"] = json!({"anything": true});
        current["partials"] = json!(["_helpers.tpl"]);
        current["controllerReplicas"] = json!(3);

        let record = diff(&defaults(), &current);
        assert_eq!(record, json!({"controllerReplicas": 3}));
        assert!(record.get("configs").is_none());
        assert!(record.get("partials").is_none());
    }

    // =========================================================================
    // Story: Re-applying the record reproduces the install-time tree
    // =========================================================================

    #[test]
    fn merge_of_diff_round_trips() {
        let mut current = defaults();
        current["clusterDomain"] = json!("foo.local");
        current["proxy"]["logLevel"] = json!("debug");
        current["proxy"]["resources"]["memory"]["limit"] = json!("250Mi");
        current["extra"] = json!({"nested": {"leaf": 1}});

        let record = diff(&defaults(), &current);
        assert_eq!(merge(&defaults(), &record), current);
    }

    #[test]
    fn merge_overlay_leaves_win_and_groups_combine() {
        let base = json!({"a": {"x": 1, "y": 2}, "b": 1});
        let overlay = json!({"a": {"y": 3, "z": 4}, "c": 5});
        assert_eq!(
            merge(&base, &overlay),
            json!({"a": {"x": 1, "y": 3, "z": 4}, "b": 1, "c": 5})
        );
    }

    #[test]
    fn merge_replaces_scalar_with_group() {
        let base = json!({"a": "scalar"});
        let overlay = json!({"a": {"b": 1}});
        assert_eq!(merge(&base, &overlay), json!({"a": {"b": 1}}));
    }

    #[test]
    fn set_and_get_path() {
        let mut root = json!({"proxy": {"image": "x"}});
        set_path(&mut root, "proxy.image.version", json!("v1"));
        set_path(&mut root, "fresh.leaf", json!(true));
        assert_eq!(get_path(&root, "proxy.image.version"), Some(&json!("v1")));
        assert_eq!(get_path(&root, "fresh.leaf"), Some(&json!(true)));
        assert_eq!(get_path(&root, "missing.leaf"), None);
    }
}
