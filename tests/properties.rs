use apcore::observability::MetricsCollector;
use apcore::pattern::match_pattern;
use apcore::redact::redact_sensitive;
use proptest::prelude::*;
use serde_json::{Value, json};

fn module_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_.]{0,20}").unwrap()
}

proptest! {
    #[test]
    fn lone_star_matches_everything(id in module_id_strategy()) {
        prop_assert!(match_pattern("*", &id));
    }

    #[test]
    fn starless_pattern_is_equality(pattern in module_id_strategy(), id in module_id_strategy()) {
        prop_assert_eq!(match_pattern(&pattern, &id), pattern == id);
    }

    #[test]
    fn prefix_and_suffix_stars_anchor(head in module_id_strategy(), tail in module_id_strategy()) {
        let id = format!("{head}{tail}");
        let head_star = format!("{head}*");
        let star_tail = format!("*{tail}");
        let head_star_tail = format!("{head}*{tail}");
        prop_assert!(match_pattern(&head_star, &id));
        prop_assert!(match_pattern(&star_tail, &id));
        prop_assert!(match_pattern(&head_star_tail, &id));
    }

    #[test]
    fn redaction_is_idempotent_and_pure(
        keys in prop::collection::btree_set("[a-z]{1,6}", 1..6),
        secret in prop::bool::ANY,
    ) {
        let mut data = serde_json::Map::new();
        let mut properties = serde_json::Map::new();
        for (index, key) in keys.iter().enumerate() {
            let key = if secret && index == 0 {
                format!("_secret_{key}")
            } else {
                key.clone()
            };
            data.insert(key.clone(), json!(index));
            if index % 2 == 0 {
                properties.insert(key, json!({ "x-sensitive": true }));
            }
        }
        let schema = Value::Object(
            [("properties".to_string(), Value::Object(properties))]
                .into_iter()
                .collect(),
        );

        let before = data.clone();
        let once = redact_sensitive(&data, &schema);
        let twice = redact_sensitive(&once, &schema);
        prop_assert_eq!(&once, &twice);
        // input untouched
        prop_assert_eq!(&data, &before);
    }

    #[test]
    fn metrics_keys_ignore_label_order(
        a in "[a-z]{1,5}",
        b in "[a-z]{1,5}",
        hits in 1usize..5,
    ) {
        prop_assume!(a != b);
        let metrics = MetricsCollector::new();
        for i in 0..hits {
            if i % 2 == 0 {
                metrics.increment("series", &[("a", a.as_str()), ("b", b.as_str())], 1.0);
            } else {
                metrics.increment("series", &[("b", b.as_str()), ("a", a.as_str())], 1.0);
            }
        }
        let value = metrics.counter_value("series", &[("a", a.as_str()), ("b", b.as_str())]);
        prop_assert_eq!(value, hits as f64);
    }
}
