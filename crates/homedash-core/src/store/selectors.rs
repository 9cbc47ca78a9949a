// ── Derived-value selectors ──
//
// A selector is a pure function of the whole document. The store
// recomputes it on every `select`; nothing is cached.

use std::sync::Arc;

use serde_json::Value;

use super::path;

/// A registered selector.
pub type Selector = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Keys of the object at `path` whose entry has `field == expected`,
/// e.g. the lights that are currently on. Yields an array of strings.
pub fn keys_where(
    path: impl Into<String>,
    field: impl Into<String>,
    expected: Value,
) -> impl Fn(&Value) -> Value + Send + Sync + 'static {
    let path = path.into();
    let field = field.into();
    move |doc| {
        let Some(Value::Object(entries)) = path::get(doc, &path) else {
            return Value::Array(Vec::new());
        };
        entries
            .iter()
            .filter(|(_, entry)| entry.get(&field) == Some(&expected))
            .map(|(key, _)| Value::String(key.clone()))
            .collect()
    }
}

/// Mean of the numeric `field` across `keys` of the object at `path`,
/// e.g. average temperature over a set of rooms. An empty `keys` means
/// every entry. Entries without a numeric `field` are ignored; with none
/// left the result is `null`.
pub fn average(
    path: impl Into<String>,
    keys: Vec<String>,
    field: impl Into<String>,
) -> impl Fn(&Value) -> Value + Send + Sync + 'static {
    let path = path.into();
    let field = field.into();
    move |doc| {
        let Some(Value::Object(entries)) = path::get(doc, &path) else {
            return Value::Null;
        };
        let samples: Vec<f64> = entries
            .iter()
            .filter(|(key, _)| keys.is_empty() || keys.contains(key))
            .filter_map(|(_, entry)| entry.get(&field).and_then(Value::as_f64))
            .collect();
        if samples.is_empty() {
            return Value::Null;
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        serde_json::Number::from_f64(mean).map_or(Value::Null, Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn home() -> Value {
        json!({
            "lights": {
                "kitchen": {"on": true},
                "hall": {"on": false},
                "porch": {"on": true}
            },
            "rooms": {
                "office": {"temperature": 20.0},
                "bedroom": {"temperature": 18.0},
                "garage": {"temperature": 8.0},
                "attic": {}
            }
        })
    }

    #[test]
    fn keys_where_lists_matching_entries() {
        let lights_on = keys_where("lights", "on", json!(true));
        assert_eq!(lights_on(&home()), json!(["kitchen", "porch"]));
        assert_eq!(lights_on(&json!({})), json!([]));
    }

    #[test]
    fn average_over_subset_and_all() {
        let living = average("rooms", vec!["office".into(), "bedroom".into()], "temperature");
        assert_eq!(living(&home()), json!(19.0));

        let all = average("rooms", Vec::new(), "temperature");
        assert_eq!(all(&home()), json!(15.333_333_333_333_334));

        let none = average("rooms", vec!["attic".into()], "temperature");
        assert_eq!(none(&home()), Value::Null);
    }
}
