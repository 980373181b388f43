//! JSON merge patch (RFC 7386) computation
//!
//! [`diff`] produces the patch turning one document into another; applying it
//! with [`json_patch::merge`] to `before` yields `after`.

use serde_json::{Map, Value};

/// Merge patch transforming `before` into `after`
pub fn diff(before: &Value, after: &Value) -> Value {
    match (before, after) {
        (Value::Object(before), Value::Object(after)) => {
            let mut patch = Map::new();
            for (key, old) in before {
                match after.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(new) if new != old => {
                        patch.insert(key.clone(), diff(old, new));
                    }
                    Some(_) => {}
                }
            }
            for (key, new) in after {
                if !before.contains_key(key) {
                    patch.insert(key.clone(), new.clone());
                }
            }
            Value::Object(patch)
        }
        // arrays and scalars are replaced wholesale
        (_, after) => after.clone(),
    }
}

/// Whether applying `patch` is a no-op
pub fn is_empty(patch: &Value) -> bool {
    matches!(patch, Value::Object(map) if map.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_of_equal_documents_is_empty() {
        let doc = json!({"spec": {"type": "local"}, "metadata": {"name": "a"}});
        assert!(is_empty(&diff(&doc, &doc)));
    }

    #[test]
    fn test_diff_nested_changes_and_removals() {
        let before = json!({
            "metadata": {"annotations": {"a": "1", "b": "2"}},
            "spec": {"type": "old", "providerConfig": {"x": 1}}
        });
        let after = json!({
            "metadata": {"annotations": {"a": "1", "c": "3"}},
            "spec": {"type": "new"}
        });

        let patch = diff(&before, &after);
        assert_eq!(
            patch,
            json!({
                "metadata": {"annotations": {"b": null, "c": "3"}},
                "spec": {"type": "new", "providerConfig": null}
            })
        );

        let mut applied = before.clone();
        json_patch::merge(&mut applied, &patch);
        assert_eq!(applied, after);
    }

    #[test]
    fn test_arrays_are_replaced() {
        let before = json!({"finalizers": ["a"]});
        let after = json!({"finalizers": ["a", "b"]});
        assert_eq!(diff(&before, &after), json!({"finalizers": ["a", "b"]}));
    }
}
