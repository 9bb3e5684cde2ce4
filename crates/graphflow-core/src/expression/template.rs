//! `{{ … }}` span scanning.

use serde_json::Value;

const OPEN: &str = "{{";

/// A piece of a configuration string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
    Text(&'a str),
    /// `raw` includes the delimiters, `body` is what sits between them.
    Expr { raw: &'a str, body: &'a str },
}

/// Split a string into literal text and expression spans, left to right.
///
/// Inside a span, quoted strings and single braces are skipped over so that
/// object literals and `"}}"` inside string literals do not close the span.
/// An opening `{{` without a matching close is kept as text.
pub(crate) fn segments(s: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = s;

    while let Some(start) = rest.find(OPEN) {
        let body_start = start + OPEN.len();
        let Some(body_len) = scan_body(&rest[body_start..]) else {
            break;
        };
        if start > 0 {
            out.push(Segment::Text(&rest[..start]));
        }
        let end = body_start + body_len + 2;
        out.push(Segment::Expr {
            raw: &rest[start..end],
            body: &rest[body_start..body_start + body_len],
        });
        rest = &rest[end..];
    }

    if !rest.is_empty() {
        out.push(Segment::Text(rest));
    }
    out
}

/// Length of the body up to the closing `}}`, if there is one.
fn scan_body(src: &str) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' | b'`' => quote = Some(b),
            b'{' => depth += 1,
            b'}' if depth > 0 => depth -= 1,
            b'}' if bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Whether `value` is a string holding at least one `{{ … }}` span.
pub fn is_expression(value: &Value) -> bool {
    match value {
        Value::String(s) => segments(s)
            .iter()
            .any(|seg| matches!(seg, Segment::Expr { .. })),
        _ => false,
    }
}

/// Every span in `s`, delimiters included.
pub fn extract_expressions(s: &str) -> Vec<String> {
    segments(s)
        .into_iter()
        .filter_map(|seg| match seg {
            Segment::Expr { raw, .. } => Some(raw.to_string()),
            Segment::Text(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_left_to_right() {
        assert_eq!(
            extract_expressions("Hi {{ input.name }}, you owe {{ $sum(x) }}!"),
            vec!["{{ input.name }}", "{{ $sum(x) }}"]
        );
        assert!(extract_expressions("no spans here").is_empty());
    }

    #[test]
    fn test_nested_braces_and_quotes() {
        assert_eq!(
            extract_expressions("{{ {'a': {'b': 1}} }}"),
            vec!["{{ {'a': {'b': 1}} }}"]
        );
        assert_eq!(
            extract_expressions("{{ 'x}}y' & \"}}\" }} tail"),
            vec!["{{ 'x}}y' & \"}}\" }}"]
        );
    }

    #[test]
    fn test_segments_split_text() {
        let segs = segments("a {{ b }} c");
        assert_eq!(
            segs,
            vec![
                Segment::Text("a "),
                Segment::Expr {
                    raw: "{{ b }}",
                    body: " b "
                },
                Segment::Text(" c"),
            ]
        );
        assert_eq!(segments("{{x}}"), vec![Segment::Expr { raw: "{{x}}", body: "x" }]);
    }

    #[test]
    fn test_unterminated_span_is_text() {
        assert_eq!(segments("{{ open"), vec![Segment::Text("{{ open")]);
        assert!(!is_expression(&json!("{{ open")));
    }

    #[test]
    fn test_is_expression() {
        assert!(is_expression(&json!("{{ 1 }}")));
        assert!(is_expression(&json!("x {{ 1 }} y")));
        assert!(!is_expression(&json!("plain")));
        assert!(!is_expression(&json!(42)));
        assert!(!is_expression(&json!({ "a": "{{ 1 }}" })));
    }
}
