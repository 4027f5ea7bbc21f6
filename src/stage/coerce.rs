//! Field-level coercion for untrusted model responses.
//!
//! Wire structs capture loosely-typed JSON; these functions turn individual
//! fields into validated values, substituting a documented default when the
//! model sent the wrong type.

use serde::Deserialize;
use serde_json::Value;

use crate::stage::models::Utterance;
use crate::stage::ParseFailure;

/// Lenient wire form of one utterance.
#[derive(Debug, Deserialize)]
pub(crate) struct UtteranceWire {
    pub speaker: Value,
    pub text: Value,
    #[serde(default)]
    pub confidence: Option<Value>,
}

/// Converts a wire utterance. Scalar speaker/text values are stringified;
/// non-scalar ones make the whole response unparseable.
pub(crate) fn utterance(
    wire: &UtteranceWire,
    index: usize,
) -> std::result::Result<Utterance, ParseFailure> {
    let speaker = string_scalar(&wire.speaker).ok_or_else(|| {
        ParseFailure::new(format!("utterance {} has a non-scalar speaker", index))
    })?;
    let text = string_scalar(&wire.text)
        .ok_or_else(|| ParseFailure::new(format!("utterance {} has a non-scalar text", index)))?;

    Ok(Utterance {
        speaker,
        text,
        confidence: confidence(wire.confidence.as_ref()),
    })
}

/// Stringifies a JSON scalar; arrays, objects, and null are rejected.
pub fn string_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Attribution confidence clamped to [0.0, 1.0]; non-numeric values become 0.8.
pub fn confidence(value: Option<&Value>) -> f64 {
    match value.and_then(Value::as_f64) {
        Some(v) => v.clamp(0.0, 1.0),
        None => 0.8,
    }
}

/// Importance score clamped to [0.1, 1.0]; non-numeric values become 0.5.
pub fn importance(value: Option<&Value>) -> f64 {
    match value.and_then(Value::as_f64) {
        Some(v) => v.clamp(0.1, 1.0),
        None => 0.5,
    }
}

/// Non-negative count, or the caller's default when missing or not an integer.
pub fn count_or(value: Option<&Value>, default: usize) -> usize {
    value
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(default)
}

/// Section order; anything unusable becomes 0, which output validation rejects.
pub fn section_order(value: Option<&Value>) -> u32 {
    value
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

/// String list; scalar entries are stringified, non-scalar entries dropped.
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    match value.and_then(Value::as_array) {
        Some(items) => items.iter().filter_map(string_scalar).collect(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_scalar() {
        assert_eq!(string_scalar(&json!("a")), Some("a".to_string()));
        assert_eq!(string_scalar(&json!(3)), Some("3".to_string()));
        assert_eq!(string_scalar(&json!(true)), Some("true".to_string()));
        assert_eq!(string_scalar(&json!(null)), None);
        assert_eq!(string_scalar(&json!(["a"])), None);
        assert_eq!(string_scalar(&json!({"a": 1})), None);
    }

    #[test]
    fn test_confidence_clamp_and_default() {
        assert_eq!(confidence(Some(&json!(0.9))), 0.9);
        assert_eq!(confidence(Some(&json!(1.5))), 1.0);
        assert_eq!(confidence(Some(&json!(-0.2))), 0.0);
        // Non-numeric inputs all land on exactly 0.8.
        assert_eq!(confidence(Some(&json!("0.9"))), 0.8);
        assert_eq!(confidence(Some(&json!(true))), 0.8);
        assert_eq!(confidence(Some(&json!(null))), 0.8);
        assert_eq!(confidence(None), 0.8);
    }

    #[test]
    fn test_importance_clamp_and_default() {
        assert_eq!(importance(Some(&json!(0.7))), 0.7);
        assert_eq!(importance(Some(&json!(0.01))), 0.1);
        assert_eq!(importance(Some(&json!(7))), 1.0);
        assert_eq!(importance(Some(&json!("high"))), 0.5);
        assert_eq!(importance(None), 0.5);
    }

    #[test]
    fn test_count_or() {
        assert_eq!(count_or(Some(&json!(4)), 9), 4);
        assert_eq!(count_or(Some(&json!(-4)), 9), 9);
        assert_eq!(count_or(Some(&json!(3.7)), 9), 9);
        assert_eq!(count_or(Some(&json!("4")), 9), 9);
        assert_eq!(count_or(None, 9), 9);
    }

    #[test]
    fn test_section_order() {
        assert_eq!(section_order(Some(&json!(2))), 2);
        assert_eq!(section_order(Some(&json!("2"))), 0);
        assert_eq!(section_order(Some(&json!(-1))), 0);
        assert_eq!(section_order(None), 0);
    }

    #[test]
    fn test_string_list() {
        assert_eq!(
            string_list(Some(&json!(["a", 1, true, [], {"k": 1}, null]))),
            vec!["a".to_string(), "1".to_string(), "true".to_string()]
        );
        assert!(string_list(Some(&json!("not a list"))).is_empty());
        assert!(string_list(None).is_empty());
    }

    #[test]
    fn test_utterance_coercion() {
        let wire: UtteranceWire =
            serde_json::from_value(json!({"speaker": "Speaker A", "text": "안녕", "confidence": "high"}))
                .unwrap();
        let parsed = utterance(&wire, 0).unwrap();
        assert_eq!(parsed.speaker, "Speaker A");
        assert_eq!(parsed.text, "안녕");
        assert_eq!(parsed.confidence, 0.8);

        let wire: UtteranceWire =
            serde_json::from_value(json!({"speaker": 2, "text": "둘째 화자"})).unwrap();
        let parsed = utterance(&wire, 1).unwrap();
        assert_eq!(parsed.speaker, "2");
        assert_eq!(parsed.confidence, 0.8);

        let wire: UtteranceWire =
            serde_json::from_value(json!({"speaker": ["A"], "text": "x"})).unwrap();
        assert!(utterance(&wire, 2).is_err());
    }
}
