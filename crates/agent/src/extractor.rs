//! Capability calls written as prose, for providers without native tool calling.
//!
//! The grammar is `name(key="value", key2='value', key3=123)`. Quoted values keep
//! their text without the quotes (no escapes), bare values become integers when
//! they parse as one and strings otherwise. Anything that does not fit is skipped.

use std::collections::HashSet;

use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExtractOutcome {
    Calls(Vec<ParsedCall>),
    NoCall,
}

/// Every well-formed envelope in `text`, in order of appearance.
pub fn extract_calls(text: &str) -> Vec<ParsedCall> {
    let bytes = text.as_bytes();
    let mut calls = Vec::new();
    let mut position = 0;

    while position < bytes.len() {
        let starts_identifier = is_identifier_start(bytes[position])
            && (position == 0 || !is_identifier_byte(bytes[position - 1]) && bytes[position - 1] != b'.');
        if !starts_identifier {
            position += 1;
            continue;
        }

        let name_end = scan_identifier(bytes, position);
        if bytes.get(name_end) == Some(&b'(') {
            if let Some((arguments, end)) = parse_arguments(text, name_end + 1) {
                calls.push(ParsedCall {
                    name: text[position..name_end].to_string(),
                    arguments: Value::Object(arguments),
                });
                position = end;
                continue;
            }
        }
        position = name_end;
    }

    calls
}

/// Filters envelopes down to the capabilities the runtime is willing to run from prose.
pub struct CallExtractor {
    known: HashSet<String>,
}

impl CallExtractor {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { known: names.into_iter().map(Into::into).collect() }
    }

    pub fn extract(&self, text: &str) -> ExtractOutcome {
        let calls: Vec<ParsedCall> =
            extract_calls(text).into_iter().filter(|call| self.known.contains(&call.name)).collect();
        if calls.is_empty() {
            ExtractOutcome::NoCall
        } else {
            ExtractOutcome::Calls(calls)
        }
    }
}

const COMMIT_PHRASES: [&str; 8] = [
    "book the appointment now",
    "booking the appointment",
    "go ahead and book",
    "i'll book",
    "i will book",
    "let me book",
    "confirm the booking",
    "booking it now",
];

/// Approximates "the assistant means to book now" by phrase matching.
pub fn detect_commit_intent(text: &str) -> bool {
    let normalized = text.to_lowercase().replace('\u{2019}', "'");
    COMMIT_PHRASES.iter().any(|phrase| normalized.contains(phrase))
}

fn is_identifier_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

fn is_identifier_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

fn scan_identifier(bytes: &[u8], start: usize) -> usize {
    let mut end = start;
    while end < bytes.len() && is_identifier_byte(bytes[end]) {
        end += 1;
    }
    end
}

fn skip_whitespace(bytes: &[u8], mut position: usize) -> usize {
    while position < bytes.len() && bytes[position].is_ascii_whitespace() {
        position += 1;
    }
    position
}

/// Parses from just after `(` through the closing `)`, returning the index after it.
fn parse_arguments(text: &str, start: usize) -> Option<(Map<String, Value>, usize)> {
    let bytes = text.as_bytes();
    let mut arguments = Map::new();
    let mut position = skip_whitespace(bytes, start);

    if bytes.get(position) == Some(&b')') {
        return Some((arguments, position + 1));
    }

    loop {
        position = skip_whitespace(bytes, position);
        if !bytes.get(position).copied().is_some_and(is_identifier_start) {
            return None;
        }
        let key_end = scan_identifier(bytes, position);
        let key = &text[position..key_end];

        position = skip_whitespace(bytes, key_end);
        if bytes.get(position) != Some(&b'=') {
            return None;
        }
        position = skip_whitespace(bytes, position + 1);

        let (value, value_end) = parse_value(text, position)?;
        arguments.insert(key.to_string(), value);

        position = skip_whitespace(bytes, value_end);
        match bytes.get(position) {
            Some(b',') => position += 1,
            Some(b')') => return Some((arguments, position + 1)),
            _ => return None,
        }
    }
}

fn parse_value(text: &str, start: usize) -> Option<(Value, usize)> {
    let bytes = text.as_bytes();
    let quote = *bytes.get(start)?;

    if quote == b'"' || quote == b'\'' {
        let close = bytes[start + 1..].iter().position(|byte| *byte == quote)? + start + 1;
        return Some((Value::String(text[start + 1..close].to_string()), close + 1));
    }

    let mut end = start;
    while end < bytes.len() && !matches!(bytes[end], b',' | b')' | b'(' | b'\n') {
        end += 1;
    }
    let token = text[start..end].trim();
    if token.is_empty() {
        return None;
    }

    let value = match token.parse::<i64>() {
        Ok(number) => Value::from(number),
        Err(_) => Value::String(token.to_string()),
    };
    Some((value, end))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{detect_commit_intent, extract_calls, CallExtractor, ExtractOutcome, ParsedCall};

    #[test]
    fn parses_quoted_and_bare_values() {
        let calls = extract_calls(
            r#"Let me check. get_available_times(provider_id=2, department_id = 3, start_date="2030-01-07", note='early')"#,
        );

        assert_eq!(
            calls,
            vec![ParsedCall {
                name: "get_available_times".to_string(),
                arguments: json!({
                    "provider_id": 2,
                    "department_id": 3,
                    "start_date": "2030-01-07",
                    "note": "early",
                }),
            }]
        );
    }

    #[test]
    fn bare_tokens_that_are_not_integers_stay_strings() {
        let calls = extract_calls("get_self_pay_rate(specialty=Orthopedics)");
        assert_eq!(calls[0].arguments, json!({"specialty": "Orthopedics"}));
    }

    #[test]
    fn finds_several_envelopes_in_order() {
        let calls = extract_calls(
            r#"first get_providers_by_specialty(specialty="Surgery") then get_self_pay_rate(specialty="Surgery")"#,
        );
        let names: Vec<&str> = calls.iter().map(|call| call.name.as_str()).collect();
        assert_eq!(names, vec!["get_providers_by_specialty", "get_self_pay_rate"]);
    }

    #[test]
    fn malformed_envelopes_are_skipped_not_fatal() {
        assert!(extract_calls(r#"select_provider(provider_id="2""#).is_empty());
        assert!(extract_calls("select_provider(2)").is_empty());
        assert!(extract_calls("select_provider(provider_id=)").is_empty());

        let calls = extract_calls(r#"oops(=1) select_provider(provider_id=4)"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({"provider_id": 4}));
    }

    #[test]
    fn empty_argument_lists_are_calls() {
        assert_eq!(extract_calls("refresh( )")[0].arguments, json!({}));
    }

    #[test]
    fn extractor_ignores_unknown_identifiers_in_prose() {
        let extractor = CallExtractor::new(["get_provider_locations"]);

        assert_eq!(
            extractor.extract("Surgery is e.g(pricey) and costs(a=1) more."),
            ExtractOutcome::NoCall
        );
        assert!(matches!(
            extractor.extract("get_provider_locations(provider_id=2)"),
            ExtractOutcome::Calls(calls) if calls.len() == 1
        ));
    }

    #[test]
    fn detects_commit_phrasing() {
        assert!(detect_commit_intent("Great, I'll book that for you now."));
        assert!(detect_commit_intent("Booking the appointment with Dr. House."));
        assert!(detect_commit_intent("I\u{2019}ll book it."));
        assert!(!detect_commit_intent("Would you like me to book it?"));
    }
}
