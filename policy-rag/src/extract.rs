//! Turning raw model output into a [`StructuredAnswer`].
//!
//! Models are asked for a single JSON object but routinely wrap it in code
//! fences or prose, leave trailing commas, use typographic quotes, or stop
//! mid-object. [`AnswerExtractor`] runs a fixed chain over the raw text:
//!
//! 1. strip code fences and locate the first balanced `{...}` object,
//! 2. parse it strictly,
//! 3. apply bounded textual repairs and parse again,
//! 4. decode into [`StructuredAnswer`], strictly first and then by coercing
//!    each field,
//! 5. ground the sources in what retrieval actually returned.
//!
//! When every step fails the fallback answer from
//! [`StructuredAnswer::unparseable`] is returned, so extraction never fails.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::answer::{DEFAULT_SNIPPET_CHARS, Source, Steps, StructuredAnswer, sources_from_chunks};
use crate::document::RetrievedChunk;

/// Most cut-back attempts made on a truncated object.
const MAX_CUTBACKS: usize = 16;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("fence pattern is valid")
});

/// How an answer was obtained from the raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    /// The object parsed and decoded without any changes.
    Strict,
    /// Textual repairs or field coercion were needed.
    Repaired,
    /// Nothing usable was found; the fallback answer was synthesized.
    Fallback,
}

/// An extracted answer together with how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    /// The answer.
    pub answer: StructuredAnswer,
    /// Which path produced it.
    pub outcome: Extraction,
}

/// Extract an answer with the default snippet length.
pub fn extract_answer(raw: &str, chunks: &[RetrievedChunk]) -> StructuredAnswer {
    AnswerExtractor::default().extract(raw, chunks).answer
}

/// The parse, repair, and coerce chain.
#[derive(Debug, Clone, Copy)]
pub struct AnswerExtractor {
    snippet_chars: usize,
}

impl Default for AnswerExtractor {
    fn default() -> Self {
        Self { snippet_chars: DEFAULT_SNIPPET_CHARS }
    }
}

impl AnswerExtractor {
    /// Create an extractor whose retrieval sources carry snippets of at most
    /// `snippet_chars` characters.
    pub fn new(snippet_chars: usize) -> Self {
        Self { snippet_chars }
    }

    /// Extract an answer from `raw`. Never fails.
    pub fn extract(&self, raw: &str, chunks: &[RetrievedChunk]) -> Extracted {
        let retrieved = sources_from_chunks(chunks, self.snippet_chars);

        let Some((value, repaired)) = parse_object(raw) else {
            warn!(raw_len = raw.len(), "model output contains no parseable JSON object");
            return fallback(retrieved);
        };

        let Some((answer, coerced)) = decode(value) else {
            warn!("model output lacks a usable summary");
            return fallback(retrieved);
        };

        let answer = StructuredAnswer { sources: ground_sources(answer.sources, &retrieved), ..answer }.normalize();
        let outcome = if repaired || coerced { Extraction::Repaired } else { Extraction::Strict };
        debug!(?outcome, sources = answer.sources.len(), "extracted answer");
        Extracted { answer, outcome }
    }
}

fn fallback(retrieved: Vec<Source>) -> Extracted {
    Extracted { answer: StructuredAnswer::unparseable(retrieved), outcome: Extraction::Fallback }
}

/// Locate and parse the JSON object in `raw`.
///
/// Returns the object and whether textual repairs were needed.
fn parse_object(raw: &str) -> Option<(Value, bool)> {
    let text = strip_fences(raw);
    let candidate = find_object(text)?;

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(candidate) {
        return Some((value, false));
    }
    repair(candidate).map(|value| (value, true))
}

/// The contents of the first fenced block holding an object, or the text
/// after an unterminated opening fence, or `raw` itself.
fn strip_fences(raw: &str) -> &str {
    if let Some(body) = FENCED_BLOCK
        .captures_iter(raw)
        .filter_map(|caps| caps.get(1))
        .find(|body| body.as_str().contains('{'))
    {
        return body.as_str();
    }

    let trimmed = raw.trim_start();
    if let Some(rest) = trimmed.strip_prefix("```") {
        return rest.split_once('\n').map_or("", |(_, body)| body);
    }
    raw
}

/// The first `{` up to its matching `}`, ignoring braces inside string
/// literals. An object that never closes runs to the end of the text.
fn find_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    Some(&text[start..])
}

/// Apply the textual repairs, cutting back truncated members a bounded
/// number of times.
fn repair(candidate: &str) -> Option<Value> {
    let normalized = normalize_quotes(candidate);
    let cleaned = remove_trailing_commas(&normalized);

    let attempt = |text: &str| match serde_json::from_str::<Value>(&close_open_structures(text)) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    };

    if let Some(value) = attempt(&cleaned) {
        return Some(value);
    }

    let mut end = cleaned.len();
    for _ in 0..MAX_CUTBACKS {
        let cut = last_member_boundary(&cleaned[..end])?;
        if let Some(value) = attempt(&cleaned[..cut]) {
            debug!(dropped = cleaned.len() - cut, "recovered truncated object");
            return Some(value);
        }
        end = cut;
    }
    None
}

/// Turn typographic double quotes used as string delimiters into `"`.
///
/// Quotes inside a string opened with a plain `"` are content and stay as
/// they are. A string opened with a typographic quote ends at the next
/// typographic or plain closing quote.
fn normalize_quotes(text: &str) -> String {
    let is_smart = |c: char| matches!(c, '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}');
    let mut out = String::with_capacity(text.len());
    let mut open: Option<char> = None;
    let mut escaped = false;

    for c in text.chars() {
        match open {
            Some(opener) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    open = None;
                } else if opener != '"' && is_smart(c) {
                    open = None;
                    out.push('"');
                    continue;
                }
                out.push(c);
            }
            None if c == '"' => {
                open = Some('"');
                out.push(c);
            }
            None if is_smart(c) => {
                open = Some(c);
                out.push('"');
            }
            None => out.push(match c {
                '\u{2018}' | '\u{2019}' => '\'',
                other => other,
            }),
        }
    }
    out
}

/// Drop commas that directly precede `}` or `]`, outside string literals.
fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(c);
            continue;
        }
        if c == ',' {
            let next = chars[i + 1..].iter().copied().find(|c| !c.is_whitespace());
            if matches!(next, Some('}' | ']')) {
                continue;
            }
        }
        if c == '"' {
            in_string = true;
        }
        out.push(c);
    }
    out
}

/// Close an unterminated string and every open object or array.
///
/// An escape sequence cut off at the end of an open string is dropped.
fn close_open_structures(text: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escape_start: Option<usize> = None;
    let mut unicode_digits = 0usize;

    for (i, c) in text.char_indices() {
        if in_string {
            if let Some(start) = escape_start {
                if unicode_digits > 0 {
                    unicode_digits = if c.is_ascii_hexdigit() { unicode_digits - 1 } else { 0 };
                } else if c == 'u' && i == start + 1 {
                    unicode_digits = 4;
                }
                if unicode_digits == 0 {
                    escape_start = None;
                }
                continue;
            }
            match c {
                '\\' => escape_start = Some(i),
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut closed = text.to_string();
    if in_string {
        if let Some(start) = escape_start {
            closed.truncate(start);
        }
        closed.push('"');
    }
    let trimmed_len = closed.trim_end().trim_end_matches(',').trim_end().len();
    closed.truncate(trimmed_len);
    closed.extend(stack.into_iter().rev());
    closed
}

/// Byte offset of the last comma outside string literals, where the member
/// list can be cut back to its last complete member.
fn last_member_boundary(text: &str) -> Option<usize> {
    let mut boundary = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            ',' => boundary = Some(i),
            _ => {}
        }
    }
    boundary
}

/// Decode an object into an answer.
///
/// Returns the answer and whether any field had to be coerced, or `None` when
/// no non-empty `summary` is present.
fn decode(value: Value) -> Option<(StructuredAnswer, bool)> {
    if let Ok(answer) = serde_json::from_value::<StructuredAnswer>(value.clone()) {
        if !answer.summary.trim().is_empty() {
            return Some((answer, false));
        }
    }

    let Value::Object(object) = value else { return None };
    let summary = object.get("summary").and_then(text_of).filter(|s| !s.trim().is_empty())?;

    let steps = match object.get("steps") {
        Some(Value::Array(items)) => Steps::from_list(items.iter().filter_map(text_of).collect()),
        Some(Value::Null) | None => Steps::NotMentioned,
        Some(other) => text_of(other).map_or(Steps::NotMentioned, |text| Steps::from_text(&text)),
    };

    let sources = match object.get("sources") {
        Some(Value::Array(items)) => items.iter().filter_map(source_of).collect(),
        Some(item @ Value::Object(_)) => source_of(item).into_iter().collect(),
        _ => Vec::new(),
    };

    let general_tips = object
        .get("general_tips")
        .or_else(|| object.get("cost_saving_tips"))
        .and_then(text_of)
        .unwrap_or_default();

    Some((StructuredAnswer { summary, steps, sources, general_tips }, true))
}

/// Render a JSON value as text: strings as-is, numbers and booleans
/// stringified, arrays joined line by line.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(text_of).collect();
            Some(parts.join("\n"))
        }
        Value::Object(_) => Some(value.to_string()),
    }
}

fn source_of(value: &Value) -> Option<Source> {
    let object: &Map<String, Value> = value.as_object()?;
    let field = |names: &[&str]| {
        names.iter().find_map(|name| object.get(*name)).and_then(text_of).unwrap_or_default()
    };
    Some(Source {
        bank: field(&["bank"]),
        document: field(&["document", "document_name"]),
        snippet: field(&["snippet"]),
    })
}

/// Keep only sources whose bank was actually retrieved.
///
/// Banks are rewritten to the retrieved collection id. When nothing survives
/// the retrieval sources are used instead, and the result never lists more
/// sources than there were distinct retrieved documents.
fn ground_sources(parsed: Vec<Source>, retrieved: &[Source]) -> Vec<Source> {
    let mut grounded: Vec<Source> = parsed
        .into_iter()
        .filter_map(|mut source| {
            let bank = retrieved
                .iter()
                .find(|r| r.bank.eq_ignore_ascii_case(source.bank.trim()))
                .map(|r| r.bank.clone())?;
            source.bank = bank;
            Some(source)
        })
        .collect();

    if grounded.is_empty() {
        return retrieved.to_vec();
    }
    grounded.truncate(retrieved.len());
    grounded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::DISCLAIMER;

    fn chunks() -> Vec<RetrievedChunk> {
        vec![
            RetrievedChunk {
                collection: "sbi".into(),
                source_document: "savings.pdf".into(),
                text: "Minimum balance is Rs 3000 in metro branches.".into(),
                score: 0.9,
                sequence: 3,
            },
            RetrievedChunk {
                collection: "common".into(),
                source_document: "rbi.pdf".into(),
                text: "Banks must disclose charges.".into(),
                score: 0.7,
                sequence: 0,
            },
        ]
    }

    fn extract(raw: &str) -> Extracted {
        AnswerExtractor::default().extract(raw, &chunks())
    }

    #[test]
    fn clean_json_is_strict() {
        let raw = r#"{"summary": "Keep Rs 3000.", "steps": ["Deposit funds"], "sources": [{"bank": "sbi", "document": "savings.pdf", "snippet": "Minimum balance"}], "general_tips": "Use UPI."}"#;
        let extracted = extract(raw);
        assert_eq!(extracted.outcome, Extraction::Strict);
        assert_eq!(extracted.answer.summary, "Keep Rs 3000.");
        assert_eq!(extracted.answer.steps, Steps::Listed(vec!["Deposit funds".into()]));
        assert!(extracted.answer.general_tips.ends_with(DISCLAIMER));
    }

    #[test]
    fn fenced_json_inside_prose_is_found() {
        let raw = "Sure! Here is the answer:\n```json\n{\"summary\": \"Keep {min} balance.\", \"steps\": \"not mentioned\"}\n```\nHope this helps.";
        let extracted = extract(raw);
        assert_eq!(extracted.outcome, Extraction::Strict);
        assert_eq!(extracted.answer.summary, "Keep {min} balance.");
        assert_eq!(extracted.answer.steps, Steps::NotMentioned);
    }

    #[test]
    fn unterminated_fence_is_stripped() {
        let extracted = extract("```json\n{\"summary\": \"Done\"}");
        assert_eq!(extracted.answer.summary, "Done");
    }

    #[test]
    fn trailing_commas_are_repaired() {
        let raw = r#"{"summary": "Fees apply, see list.", "steps": ["One", "Two",], "sources": [],}"#;
        let extracted = extract(raw);
        assert_eq!(extracted.outcome, Extraction::Repaired);
        assert_eq!(extracted.answer.summary, "Fees apply, see list.");
        assert_eq!(extracted.answer.steps.as_slice().len(), 2);
    }

    #[test]
    fn smart_quotes_are_normalized() {
        let raw = "{\u{201C}summary\u{201D}: \u{201C}Carry ID proof.\u{201D}}";
        assert_eq!(extract(raw).answer.summary, "Carry ID proof.");
    }

    #[test]
    fn truncated_value_is_closed() {
        let raw = r#"{"summary": "Open an account online", "steps": ["Fill the form", "Upload KY"#;
        let extracted = extract(raw);
        assert_eq!(extracted.outcome, Extraction::Repaired);
        assert_eq!(extracted.answer.summary, "Open an account online");
        assert_eq!(extracted.answer.steps.as_slice(), ["Fill the form", "Upload KY"]);
    }

    #[test]
    fn truncated_key_is_cut_back() {
        let raw = r#"{"summary": "Interest is paid quarterly.", "steps": ["Ask"], "sour"#;
        let extracted = extract(raw);
        assert_eq!(extracted.answer.summary, "Interest is paid quarterly.");
        assert_eq!(extracted.answer.steps.as_slice(), ["Ask"]);
    }

    #[test]
    fn garbage_falls_back_to_retrieval_sources() {
        let extracted = extract("I'm sorry, I cannot help with that.");
        assert_eq!(extracted.outcome, Extraction::Fallback);
        assert!(extracted.answer.summary.contains("could not be generated in the expected format"));
        assert_eq!(extracted.answer.sources.len(), 2);
        assert_eq!(extracted.answer.sources[0].bank, "sbi");
        assert_eq!(extracted.answer.general_tips, DISCLAIMER);
    }

    #[test]
    fn missing_summary_falls_back() {
        let extracted = extract(r#"{"steps": ["Visit branch"], "general_tips": "Save"}"#);
        assert_eq!(extracted.outcome, Extraction::Fallback);
    }

    #[test]
    fn wrong_shapes_are_coerced() {
        let raw = r#"{
            "summary": ["Rate is", 7.5],
            "steps": "Visit the branch with PAN",
            "sources": {"bank": "SBI", "document_name": "savings.pdf", "snippet": 42},
            "cost_saving_tips": 100
        }"#;
        let extracted = extract(raw);
        assert_eq!(extracted.outcome, Extraction::Repaired);
        let answer = extracted.answer;
        assert_eq!(answer.summary, "Rate is\n7.5");
        assert_eq!(answer.steps, Steps::Listed(vec!["Visit the branch with PAN".into()]));
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].bank, "sbi");
        assert_eq!(answer.sources[0].snippet, "42");
        assert!(answer.general_tips.starts_with("100"));
    }

    #[test]
    fn ungrounded_sources_are_replaced() {
        let raw = r#"{"summary": "ok", "sources": [{"bank": "hdfc", "document": "made-up.pdf", "snippet": ""}]}"#;
        let answer = extract(raw).answer;
        assert_eq!(answer.sources.len(), 2);
        assert!(answer.sources.iter().all(|s| s.bank == "sbi" || s.bank == "common"));
    }

    #[test]
    fn sources_never_outnumber_retrieved_documents() {
        let raw = r#"{"summary": "ok", "sources": [
            {"bank": "sbi", "document": "a.pdf"},
            {"bank": "sbi", "document": "b.pdf"},
            {"bank": "common", "document": "c.pdf"}
        ]}"#;
        assert_eq!(extract(raw).answer.sources.len(), 2);
    }

    #[test]
    fn only_delimiting_typographic_quotes_are_normalized() {
        let inner = "{\"a\": \"the \u{201C}Basic\u{201D} plan\"}";
        assert_eq!(normalize_quotes(inner), inner);
        assert_eq!(normalize_quotes("{\u{201C}a\u{201D}: \u{201C}b\u{201D}}"), r#"{"a": "b"}"#);
    }

    #[test]
    fn partial_escapes_are_dropped_when_closing() {
        assert_eq!(close_open_structures(r#"{"a": "x \u00"#), r#"{"a": "x "}"#);
        assert_eq!(close_open_structures(r#"{"a": "x \"#), r#"{"a": "x "}"#);
        assert_eq!(close_open_structures(r#"{"a": "\u0041"#), r#"{"a": "\u0041"}"#);
        assert_eq!(close_open_structures(r#"{"a": "\\u12"#), r#"{"a": "\\u12"}"#);
    }

    #[test]
    fn braces_inside_strings_do_not_end_the_object() {
        assert_eq!(find_object(r#"pre {"a": "}"} post"#), Some(r#"{"a": "}"}"#));
        assert_eq!(find_object("no object"), None);
    }
}
