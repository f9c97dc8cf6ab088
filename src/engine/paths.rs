// Dot-path expansion for mapping results

//! Mapping names may contain dots: `{"user.name": .., "user.id": ..}`
//! produces `{"user": {"name": .., "id": ..}}`. Keys are applied in order,
//! so a later key wins when two paths collide.

use serde_json::{Map, Value};

/// Expand dotted keys into nested objects.
///
/// An intermediate segment that already holds a non-object value is
/// replaced by an object. Keys without dots are inserted unchanged, so
/// expanding an already expanded map is a no-op.
pub fn expand<I, K>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: AsRef<str>,
{
    let mut expanded = Map::new();
    for (key, value) in pairs {
        insert_path(&mut expanded, key.as_ref(), value);
    }
    expanded
}

/// Insert `value` at a dotted `path` inside `target`.
pub fn insert_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = target;

    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }

        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_expand_siblings() {
        let expanded = expand(vec![("a.b", json!(1)), ("a.c", json!(2))]);
        assert_eq!(Value::Object(expanded), json!({"a": {"b": 1, "c": 2}}));
    }

    #[test]
    fn test_expand_is_idempotent() {
        let once = expand(vec![("a.b", json!(1)), ("a.c", json!(2)), ("d", json!("x"))]);
        let twice = expand(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_later_key_wins_on_collision() {
        let expanded = expand(vec![("a", json!(5)), ("a.b", json!(1))]);
        assert_eq!(Value::Object(expanded), json!({"a": {"b": 1}}));

        let expanded = expand(vec![("a.b", json!(1)), ("a", json!(5))]);
        assert_eq!(Value::Object(expanded), json!({"a": 5}));
    }

    #[test]
    fn test_insert_into_existing_object() {
        let mut target = object(json!({"user": {"id": 7}}));
        insert_path(&mut target, "user.name", json!("ada"));
        insert_path(&mut target, "deep.er.still", json!(true));
        assert_eq!(
            Value::Object(target),
            json!({"user": {"id": 7, "name": "ada"}, "deep": {"er": {"still": true}}})
        );
    }
}
