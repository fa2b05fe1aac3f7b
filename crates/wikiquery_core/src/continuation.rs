use serde_json::{Map, Value};

use crate::error::{Result, WikiError};
use crate::params::{ParamValue, QueryParameters, parse_timestamp, to_wire_value};

const CONTINUE_KEY: &str = "continue";
const LEGACY_CONTINUE_KEY: &str = "query-continue";

/// Opaque continuation parameters echoed back on the next request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContinuationState {
    entries: Vec<(String, Value)>,
}

impl ContinuationState {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    /// Overwrite (or add) every continuation key in the working parameters.
    pub fn apply_to(&self, params: &mut QueryParameters) {
        for (key, value) in &self.entries {
            params.set(key.clone(), ParamValue::from_continuation(value));
        }
    }

    fn push(&mut self, key: &str, value: &Value) {
        match self.entries.iter_mut().find(|(existing, _)| existing == key) {
            Some((_, slot)) => *slot = value.clone(),
            None => self.entries.push((key.to_string(), value.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContinuationStep {
    /// No continuation, or an empty one.
    Done,
    /// At least one value moved forward.
    Advance(ContinuationState),
    /// Every value equals what was just sent.
    Loop(ContinuationState),
}

/// Read the continuation marker of `response` and compare it with `sent`,
/// the exact parameters of the request that produced it.
///
/// Both the flat `continue` object and the legacy `query-continue` object
/// (per-module objects unwrapped one level) are understood.
pub fn parse_continuation(response: &Value, sent: &QueryParameters) -> Result<ContinuationStep> {
    let state = extract_state(response)?;
    if state.is_empty() {
        return Ok(ContinuationStep::Done);
    }
    let progressed = state
        .entries
        .iter()
        .any(|(key, value)| !same_value(sent.get(key), value));
    if progressed {
        Ok(ContinuationStep::Advance(state))
    } else {
        Ok(ContinuationStep::Loop(state))
    }
}

fn extract_state(response: &Value) -> Result<ContinuationState> {
    let mut state = ContinuationState::default();
    if let Some(node) = response.get(CONTINUE_KEY) {
        let object = expect_object(node, CONTINUE_KEY)?;
        for (key, value) in object {
            state.push(key, value);
        }
    }
    if let Some(node) = response.get(LEGACY_CONTINUE_KEY) {
        let modules = expect_object(node, LEGACY_CONTINUE_KEY)?;
        for (module, inner) in modules {
            let inner = expect_object(inner, &format!("{LEGACY_CONTINUE_KEY}.{module}"))?;
            for (key, value) in inner {
                state.push(key, value);
            }
        }
    }
    Ok(state)
}

fn expect_object<'a>(node: &'a Value, path: &str) -> Result<&'a Map<String, Value>> {
    node.as_object().ok_or_else(|| {
        WikiError::unexpected(format!("continuation node `{path}` is not an object: {node}"))
    })
}

fn same_value(sent: Option<&ParamValue>, received: &Value) -> bool {
    let Some(sent) = sent else {
        return false;
    };
    let received_text = match received {
        Value::String(text) => text.clone(),
        Value::Bool(true) => String::new(),
        other => other.to_string(),
    };
    if let ParamValue::DateTime(instant) = sent {
        return parse_timestamp(&received_text).is_some_and(|parsed| parsed == *instant);
    }
    let Ok(Some(sent_text)) = to_wire_value(sent) else {
        return false;
    };
    if sent_text == received_text {
        return true;
    }
    match (parse_timestamp(&sent_text), parse_timestamp(&received_text)) {
        (Some(left), Some(right)) => left == right,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;

    fn sent() -> QueryParameters {
        QueryParameters::query()
            .with("list", "allpages")
            .with("apcontinue", "Beta")
            .with("continue", "-||")
    }

    #[test]
    fn absent_or_empty_continuation_is_done() {
        let params = sent();
        assert_eq!(
            parse_continuation(&json!({"query": {}}), &params).expect("parse"),
            ContinuationStep::Done
        );
        assert_eq!(
            parse_continuation(&json!({"continue": {}}), &params).expect("parse"),
            ContinuationStep::Done
        );
        assert_eq!(
            parse_continuation(&json!({"query-continue": {}}), &params).expect("parse"),
            ContinuationStep::Done
        );
    }

    #[test]
    fn changed_value_advances() {
        let response = json!({"continue": {"apcontinue": "Gamma", "continue": "-||"}});
        let step = parse_continuation(&response, &sent()).expect("parse");
        let ContinuationStep::Advance(state) = step else {
            panic!("expected advance, got {step:?}");
        };
        assert_eq!(state.keys(), vec!["apcontinue", "continue"]);

        let mut next = sent();
        state.apply_to(&mut next);
        assert_eq!(next.wire_value("apcontinue").expect("wire").as_deref(), Some("Gamma"));
        assert_eq!(next.wire_value("list").expect("wire").as_deref(), Some("allpages"));
        assert_eq!(next.len(), sent().len());
    }

    #[test]
    fn identical_values_are_a_loop() {
        let response = json!({"continue": {"apcontinue": "Beta", "continue": "-||"}});
        let step = parse_continuation(&response, &sent()).expect("parse");
        assert!(matches!(step, ContinuationStep::Loop(_)));
    }

    #[test]
    fn new_key_counts_as_progress() {
        let response = json!({"continue": {"apcontinue": "Beta", "rvcontinue": "12|34"}});
        let step = parse_continuation(&response, &sent()).expect("parse");
        assert!(matches!(step, ContinuationStep::Advance(_)));
    }

    #[test]
    fn legacy_shape_is_unwrapped() {
        let response = json!({
            "query-continue": {"allpages": {"apcontinue": "Gamma"}}
        });
        let ContinuationStep::Advance(state) = parse_continuation(&response, &sent()).expect("parse")
        else {
            panic!("expected advance");
        };
        assert_eq!(state.get("apcontinue"), Some(&json!("Gamma")));

        let looping = json!({"query-continue": {"allpages": {"apcontinue": "Beta"}}});
        assert!(matches!(
            parse_continuation(&looping, &sent()).expect("parse"),
            ContinuationStep::Loop(_)
        ));
    }

    #[test]
    fn timestamps_compare_as_instants() {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
            .single()
            .expect("timestamp");
        let params = QueryParameters::query()
            .with("list", "recentchanges")
            .with("rcstart", start);
        let echoed = json!({"continue": {"rcstart": "2024-01-02T03:04:05.000+00:00"}});
        assert!(matches!(
            parse_continuation(&echoed, &params).expect("parse"),
            ContinuationStep::Loop(_)
        ));

        let textual = QueryParameters::query().with("rcstart", "2024-01-02T03:04:05Z");
        assert!(matches!(
            parse_continuation(&echoed, &textual).expect("parse"),
            ContinuationStep::Loop(_)
        ));

        let moved = json!({"continue": {"rcstart": "2024-01-02T03:04:06Z"}});
        assert!(matches!(
            parse_continuation(&moved, &params).expect("parse"),
            ContinuationStep::Advance(_)
        ));
    }

    #[test]
    fn numeric_continuation_matches_integer_parameter() {
        let params = QueryParameters::query().with("sroffset", 20i64);
        assert!(matches!(
            parse_continuation(&json!({"continue": {"sroffset": 20}}), &params).expect("parse"),
            ContinuationStep::Loop(_)
        ));
        assert!(matches!(
            parse_continuation(&json!({"continue": {"sroffset": 40}}), &params).expect("parse"),
            ContinuationStep::Advance(_)
        ));
    }

    #[test]
    fn malformed_continuation_is_unexpected_data() {
        let error = parse_continuation(&json!({"continue": "oops"}), &sent())
            .expect_err("must fail");
        assert!(matches!(error, WikiError::UnexpectedData { .. }));
    }
}
