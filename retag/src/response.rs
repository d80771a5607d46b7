//! Decoding of the model's relocation answer.

use serde_json::{Map, Value};

use crate::error::{RetagError, Result};

/// Where the model says the segment now lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationAnswer {
    /// Relocated text as it appears in the current document.
    pub text: String,
    /// 1-indexed first line of the search range.
    pub start_line: usize,
    /// 1-indexed last line of the search range, inclusive.
    pub end_line: usize,
    /// 1-indexed occurrence of `text` within the range.
    pub occurrence: usize,
}

/// Parse and validate a raw model response against a document of
/// `line_count` lines.
pub fn decode(raw: &str, line_count: usize) -> Result<RelocationAnswer> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body).map_err(|e| RetagError::JsonParse {
        message: e.to_string(),
        response: raw.to_string(),
    })?;

    let invalid = |message: String| RetagError::JsonValidation {
        message,
        response: raw.to_string(),
    };

    let Some(object) = value.as_object() else {
        return Err(invalid("expected a JSON object".to_string()));
    };

    let text = match object.get("1") {
        Some(Value::String(text)) if !text.is_empty() => text.clone(),
        Some(_) => return Err(invalid("field 1 must be a non-empty string".to_string())),
        None => return Err(invalid("missing field 1".to_string())),
    };
    let start_line = positive(object, "2").map_err(invalid)?;
    let end_line = positive(object, "3").map_err(invalid)?;
    let occurrence = positive(object, "4").map_err(invalid)?;

    if end_line < start_line || end_line > line_count {
        return Err(invalid(format!(
            "invalid line numbers [{start_line}, {end_line}], document has {line_count} lines"
        )));
    }

    Ok(RelocationAnswer {
        text,
        start_line,
        end_line,
        occurrence,
    })
}

fn positive(object: &Map<String, Value>, key: &str) -> std::result::Result<usize, String> {
    let value = object.get(key).ok_or_else(|| format!("missing field {key}"))?;
    let number = value
        .as_u64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u32::MAX as f64)
                .map(|f| f as u64)
        })
        .filter(|n| *n > 0)
        .ok_or_else(|| format!("field {key} must be a positive integer, got {value}"))?;
    usize::try_from(number).map_err(|_| format!("field {key} is out of range"))
}

/// Drop a surrounding markdown code fence, if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // The fence line may carry a language tag such as ```json.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
