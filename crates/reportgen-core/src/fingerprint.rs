//! Deterministic fetch fingerprints.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::data_model::SourceConfig;

/// `blake3:<hex>` key over everything that affects what a fetch returns.
///
/// The logical name, the required flag and cache settings are excluded, so
/// two requests naming the same query differently share one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(config: &SourceConfig) -> Self {
        let canonical = serde_json::to_value(&config.kind)
            .map(sorted)
            .and_then(|v| serde_json::to_vec(&v))
            .unwrap_or_default();
        Self(format!("blake3:{}", blake3::hash(&canonical)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Maps keep insertion order, so keys are sorted at every depth before hashing.
fn sorted(value: Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut entries: Vec<(String, Value)> = obj.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sorted(v))).collect::<Map<_, _>>())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::{DatabaseConfig, SourceKind};
    use serde_json::json;

    fn db(name: &str, region: &str) -> SourceConfig {
        SourceConfig::new(
            name,
            SourceKind::Database(DatabaseConfig {
                connection_string: "sqlite://orders.db".into(),
                query: "SELECT * FROM orders WHERE region = ?".into(),
                params: vec![json!(region)],
            }),
        )
    }

    #[test]
    fn test_name_and_flags_do_not_affect_fingerprint() {
        let a = db("orders", "EU");
        let b = db("eu_orders", "EU").optional().with_cache_ttl(5);
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn test_key_order_in_params_does_not_affect_fingerprint() {
        let mut a = db("o", "EU");
        let mut b = db("o", "EU");
        if let (SourceKind::Database(x), SourceKind::Database(y)) = (&mut a.kind, &mut b.kind) {
            x.params = vec![serde_json::from_str(r#"{"from": 1, "to": 2}"#).unwrap()];
            y.params = vec![serde_json::from_str(r#"{"to": 2, "from": 1}"#).unwrap()];
        }
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn test_bound_params_affect_fingerprint() {
        assert_ne!(Fingerprint::of(&db("o", "EU")), Fingerprint::of(&db("o", "US")));
    }
}
