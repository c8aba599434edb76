use serde_json::Value;
use std::collections::HashMap;

/// Rewrite the top-level `model` field of a JSON request body to the
/// backend-native name, when an alias map applies to the chosen endpoint
/// (spec §4.3). Returns `None` (no-op) when any precondition fails;
/// `Some(new_body)` otherwise. Relies on `serde_json`'s `preserve_order`
/// feature so key order and therefore formatting intent survives the
/// round-trip.
pub fn rewrite_model_alias(
    body: &[u8],
    alias_map: Option<&HashMap<String, String>>,
    endpoint_key: &str,
) -> Option<Vec<u8>> {
    let alias_map = alias_map?;
    let mapped_model = alias_map.get(endpoint_key)?;

    if body.is_empty() {
        return None;
    }

    let mut value: Value = serde_json::from_slice(body).ok()?;
    let obj = value.as_object_mut()?;

    if !obj.contains_key("model") {
        return None;
    }

    obj.insert("model".to_string(), Value::String(mapped_model.clone()));

    serde_json::to_vec(&value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_scenario_7_alias_rewrite() {
        let mut map = HashMap::new();
        map.insert("http://ollama:11434".to_string(), "gpt-oss:120b".to_string());
        let body = br#"{"model":"gpt-oss-120b","messages":[1,2,3]}"#;

        let rewritten = rewrite_model_alias(body, Some(&map), "http://ollama:11434").unwrap();
        let parsed: Value = serde_json::from_slice(&rewritten).unwrap();
        assert_eq!(parsed["model"], "gpt-oss:120b");
        assert_eq!(parsed["messages"], serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn test_noop_when_no_alias_map() {
        let body = br#"{"model":"x"}"#;
        assert!(rewrite_model_alias(body, None, "http://ollama:11434").is_none());
    }

    #[test]
    fn test_noop_when_endpoint_not_in_map() {
        let mut map = HashMap::new();
        map.insert("http://other:1234".to_string(), "foo".to_string());
        let body = br#"{"model":"x"}"#;
        assert!(rewrite_model_alias(body, Some(&map), "http://ollama:11434").is_none());
    }

    #[test]
    fn test_noop_when_body_empty() {
        let mut map = HashMap::new();
        map.insert("http://ollama:11434".to_string(), "foo".to_string());
        assert!(rewrite_model_alias(b"", Some(&map), "http://ollama:11434").is_none());
    }

    #[test]
    fn test_noop_when_not_json_object() {
        let mut map = HashMap::new();
        map.insert("http://ollama:11434".to_string(), "foo".to_string());
        assert!(rewrite_model_alias(b"[1,2,3]", Some(&map), "http://ollama:11434").is_none());
    }

    #[test]
    fn test_noop_when_no_model_field() {
        let mut map = HashMap::new();
        map.insert("http://ollama:11434".to_string(), "foo".to_string());
        let body = br#"{"messages":[]}"#;
        assert!(rewrite_model_alias(body, Some(&map), "http://ollama:11434").is_none());
    }

    #[test]
    fn test_idempotent_when_mapped_model_equals_existing() {
        let mut map = HashMap::new();
        map.insert("http://ollama:11434".to_string(), "same".to_string());
        let body = br#"{"model":"same","x":1}"#;
        let rewritten = rewrite_model_alias(body, Some(&map), "http://ollama:11434").unwrap();
        let parsed: Value = serde_json::from_slice(&rewritten).unwrap();
        assert_eq!(parsed["model"], "same");
        assert_eq!(parsed["x"], 1);
    }
}
