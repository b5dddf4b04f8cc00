use serde_json::{Map, Value};

use super::types::{ParseFailure, ProposedChange, Verdict};

/// Validate a raw model reply into a [`Verdict`].
///
/// The first well-formed `{...}` is taken as the payload, so prose around it
/// is tolerated. Every field is type-checked; the first violation rejects the whole
/// reply. A `shouldApply: false` verdict never carries changes.
pub fn parse_verdict(raw: &str) -> Result<Verdict, ParseFailure> {
    let fail = |field: &str, reason: &str| ParseFailure {
        field: field.to_string(),
        reason: reason.to_string(),
        raw: raw.to_string(),
    };

    let json = extract_json_object(raw).ok_or_else(|| fail("$", "no JSON object found in reply"))?;
    let value: Value = serde_json::from_str(json).map_err(|e| fail("$", &format!("invalid JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| fail("$", "expected a JSON object"))?;

    let should_apply = object
        .get("shouldApply")
        .and_then(Value::as_bool)
        .ok_or_else(|| fail("shouldApply", "expected a boolean"))?;

    let confidence = object
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or_else(|| fail("confidence", "expected a number"))?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(fail("confidence", &format!("{confidence} is outside [0, 1]")));
    }

    let reasoning = object
        .get("reasoning")
        .and_then(Value::as_str)
        .ok_or_else(|| fail("reasoning", "expected a string"))?
        .to_string();

    let raw_changes = object
        .get("changes")
        .and_then(Value::as_array)
        .ok_or_else(|| fail("changes", "expected an array"))?;

    let mut changes = Vec::with_capacity(raw_changes.len());
    for (i, entry) in raw_changes.iter().enumerate() {
        let path = format!("changes[{i}]");
        let entry = entry
            .as_object()
            .ok_or_else(|| fail(&path, "expected an object"))?;
        changes.push(parse_change(entry, &path).map_err(|(field, reason)| fail(&field, &reason))?);
    }

    if !should_apply {
        return Ok(Verdict {
            should_apply,
            changes: Vec::new(),
            reasoning,
            confidence,
        });
    }

    if changes.is_empty() {
        return Err(fail("changes", "shouldApply is true but no changes were given"));
    }

    Ok(Verdict {
        should_apply,
        changes,
        reasoning,
        confidence,
    })
}

fn parse_change(entry: &Map<String, Value>, path: &str) -> Result<ProposedChange, (String, String)> {
    let string_field = |name: &str| {
        entry
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| (format!("{path}.{name}"), "expected a string".to_string()))
    };

    let filename = string_field("filename")?;
    if filename.trim().is_empty() {
        return Err((format!("{path}.filename"), "must not be empty".to_string()));
    }
    let content = string_field("content")?;
    let description = string_field("description")?;

    let line_number = match entry.get("lineNumber") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_u64().ok_or_else(|| {
            (
                format!("{path}.lineNumber"),
                "expected a non-negative integer".to_string(),
            )
        })?),
    };

    Ok(ProposedChange {
        filename,
        content,
        line_number,
        description,
    })
}

/// Slice out the first JSON object in `text`. Each `{` is tried in turn, so a
/// stray brace in surrounding prose does not hide the real payload.
pub fn extract_json_object(text: &str) -> Option<&str> {
    text.match_indices('{').find_map(|(start, _)| {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(_))) => Some(&text[start..start + stream.byte_offset()]),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const APPLY: &str = r#"{
        "shouldApply": true,
        "confidence": 0.95,
        "reasoning": "Spelling error in a comment",
        "changes": [
            {"filename": "src/net.rs", "content": "// receive {\n", "description": "Fix typo", "lineNumber": 3}
        ]
    }"#;

    fn rejected_field(raw: &str) -> String {
        parse_verdict(raw).unwrap_err().field
    }

    #[test]
    fn test_parse_apply_verdict() {
        let verdict = parse_verdict(APPLY).unwrap();
        assert!(verdict.should_apply);
        assert_eq!(verdict.confidence, 0.95);
        assert_eq!(verdict.changes.len(), 1);
        assert_eq!(verdict.changes[0].filename, "src/net.rs");
        assert_eq!(verdict.changes[0].content, "// receive {\n");
        assert_eq!(verdict.changes[0].line_number, Some(3));
    }

    #[test]
    fn test_json_wrapped_in_prose_and_fences() {
        let raw = format!("Sure! Here is my analysis:\n```json\n{APPLY}\n```\nLet me know {{if}} needed.");
        let verdict = parse_verdict(&raw).unwrap();
        assert!(verdict.should_apply);
    }

    #[test]
    fn test_declined_verdict_drops_changes() {
        let raw = r#"{"shouldApply": false, "confidence": 0.2, "reasoning": "Subjective naming preference",
            "changes": [{"filename": "a.rs", "content": "x", "description": "rename"}]}"#;
        let verdict = parse_verdict(raw).unwrap();
        assert!(!verdict.should_apply);
        assert!(verdict.changes.is_empty());
        assert_eq!(verdict.reasoning, "Subjective naming preference");
    }

    #[test]
    fn test_line_number_optional_or_null() {
        let raw = r#"{"shouldApply": true, "confidence": 1, "reasoning": "r",
            "changes": [{"filename": "a.rs", "content": "x", "description": "d", "lineNumber": null}]}"#;
        assert_eq!(parse_verdict(raw).unwrap().changes[0].line_number, None);
    }

    #[test]
    fn test_malformed_replies_name_the_field() {
        assert_eq!(rejected_field("I cannot help with that."), "$");
        assert_eq!(rejected_field("{\"shouldApply\": tru"), "$");
        assert_eq!(rejected_field("{shouldApply: true}"), "$");
        assert_eq!(
            rejected_field(r#"{"shouldApply": "yes", "confidence": 0.5, "reasoning": "r", "changes": []}"#),
            "shouldApply"
        );
        assert_eq!(
            rejected_field(r#"{"shouldApply": false, "reasoning": "r", "changes": []}"#),
            "confidence"
        );
        assert_eq!(
            rejected_field(r#"{"shouldApply": false, "confidence": 1.5, "reasoning": "r", "changes": []}"#),
            "confidence"
        );
        assert_eq!(
            rejected_field(r#"{"shouldApply": false, "confidence": -0.1, "reasoning": "r", "changes": []}"#),
            "confidence"
        );
        assert_eq!(
            rejected_field(r#"{"shouldApply": false, "confidence": 0.5, "reasoning": 3, "changes": []}"#),
            "reasoning"
        );
        assert_eq!(
            rejected_field(r#"{"shouldApply": false, "confidence": 0.5, "reasoning": "r"}"#),
            "changes"
        );
        assert_eq!(
            rejected_field(r#"{"shouldApply": true, "confidence": 0.5, "reasoning": "r", "changes": ["a.rs"]}"#),
            "changes[0]"
        );
        assert_eq!(
            rejected_field(r#"{"shouldApply": true, "confidence": 0.5, "reasoning": "r", "changes": [{"filename": "a.rs", "description": "d"}]}"#),
            "changes[0].content"
        );
        assert_eq!(
            rejected_field(r#"{"shouldApply": true, "confidence": 0.5, "reasoning": "r", "changes": [{"filename": " ", "content": "", "description": "d"}]}"#),
            "changes[0].filename"
        );
        assert_eq!(
            rejected_field(r#"{"shouldApply": true, "confidence": 0.5, "reasoning": "r", "changes": [{"filename": "a", "content": "", "description": "d", "lineNumber": "3"}]}"#),
            "changes[0].lineNumber"
        );
    }

    #[test]
    fn test_apply_without_changes_is_rejected() {
        let raw = r#"{"shouldApply": true, "confidence": 0.9, "reasoning": "r", "changes": []}"#;
        assert_eq!(rejected_field(raw), "changes");
    }

    #[test]
    fn test_failure_keeps_raw_reply() {
        let failure = parse_verdict("nope").unwrap_err();
        assert_eq!(failure.raw, "nope");
        assert!(failure.to_string().contains("no JSON object"));
    }

    #[test]
    fn test_extract_json_object_handles_nested_and_quoted_braces() {
        let text = r#"before {"a": {"b": "}{"}, "c": "\"}"} after {"d": 1}"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"a": {"b": "}{"}, "c": "\"}"}"#)
        );
        assert_eq!(extract_json_object("{ unbalanced"), None);
        assert_eq!(extract_json_object("no braces"), None);
    }

    #[test]
    fn test_stray_brace_in_prose_is_skipped() {
        let text = r#"The loop in `if x {` was fine. {"shouldApply": false, "confidence": 0.4, "reasoning": "style only", "changes": []} Thanks!"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"shouldApply": false, "confidence": 0.4, "reasoning": "style only", "changes": []}"#)
        );
        let verdict = parse_verdict(text).unwrap();
        assert!(!verdict.should_apply);
        assert_eq!(verdict.reasoning, "style only");

        let broken_first = r#"{"oops": } then {"shouldApply": false, "confidence": 0.1, "reasoning": "r", "changes": []}"#;
        assert!(parse_verdict(broken_first).is_ok());
    }
}
