use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::models::{BodyContentType, Note, RawMessage};

pub const UNTITLED_NOTE: &str = "Untitled Note";

// Applied in order to markup bodies
const MARKUP_STRIP_PATTERNS: &[&str] = &[
    r"(?is)<script[^>]*>.*?</script>",
    r"(?is)<style[^>]*>.*?</style>",
    r"(?i)</?html[^>]*>",
    r"(?is)<head[^>]*>.*?</head>",
    r"(?i)</?body[^>]*>",
    r"(?i)<!DOCTYPE[^>]*>",
];

static MARKUP_STRIP_RE: OnceLock<Vec<Regex>> = OnceLock::new();

fn markup_strip_patterns() -> &'static [Regex] {
    MARKUP_STRIP_RE.get_or_init(|| {
        MARKUP_STRIP_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("static markup pattern"))
            .collect()
    })
}

/// Turns fetched messages into notes.
#[derive(Debug, Clone)]
pub struct NoteTransformer {
    subject_pattern: String,
}

impl NoteTransformer {
    pub fn new(subject_pattern: impl Into<String>) -> Self {
        Self {
            subject_pattern: subject_pattern.into(),
        }
    }

    pub fn process(&self, message: &RawMessage) -> Note {
        let title = extract_title(&message.subject, &self.subject_pattern);
        let body = sanitize_body(&message.body, message.content_type);
        let footer = build_footer(message.received_at);

        Note {
            message_id: message.id.clone(),
            title,
            html_content: format!("{}\n{}", body, footer),
            received_at: message.received_at,
        }
    }
}

/// Strip `prefix` (compared case-insensitively) from the front of `subject`
/// and trim. Falls back to [`UNTITLED_NOTE`] when nothing is left.
pub fn extract_title(subject: &str, prefix: &str) -> String {
    let prefix_chars = prefix.chars().count();
    let split_at = subject
        .char_indices()
        .nth(prefix_chars)
        .map(|(idx, _)| idx)
        .or_else(|| (subject.chars().count() == prefix_chars).then_some(subject.len()));

    let title = match split_at {
        Some(idx) if subject[..idx].to_lowercase() == prefix.to_lowercase() => {
            subject[idx..].trim()
        }
        _ => subject.trim(),
    };

    if title.is_empty() {
        UNTITLED_NOTE.to_string()
    } else {
        title.to_string()
    }
}

pub fn sanitize_body(content: &str, content_type: BodyContentType) -> String {
    match content_type {
        BodyContentType::Text => {
            let escaped = htmlescape::encode_minimal(content);
            format!("<div>{}</div>", escaped.replace('\n', "<br>\n"))
        }
        BodyContentType::Html => {
            let cleaned = markup_strip_patterns()
                .iter()
                .fold(content.to_string(), |acc, re| {
                    re.replace_all(&acc, "").into_owned()
                });
            cleaned.trim().to_string()
        }
    }
}

pub fn build_footer(received_at: DateTime<Utc>) -> String {
    let received = received_at.format("%Y-%m-%d %H:%M:%S UTC");
    format!(
        r#"
<hr>
<div style="color: #666; font-size: 0.9em;">
    <p><strong>Note captured from email</strong></p>
    <p>Received: {}</p>
</div>
"#,
        received
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_message() -> RawMessage {
        RawMessage {
            id: "test-email-id-123".to_string(),
            subject: "[Note] Test Note Title".to_string(),
            body: "This is the body content.".to_string(),
            content_type: BodyContentType::Text,
            received_at: Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap(),
            sender: "user@example.com".to_string(),
            is_read: false,
        }
    }

    #[test]
    fn title_strips_prefix() {
        assert_eq!(extract_title("[Note] My Title", "[Note]"), "My Title");
    }

    #[test]
    fn title_prefix_is_case_insensitive() {
        assert_eq!(extract_title("[note] Lowercase Prefix", "[Note]"), "Lowercase Prefix");
        assert_eq!(extract_title("[NOTE] Uppercase Prefix", "[Note]"), "Uppercase Prefix");
        assert_eq!(extract_title("[NoTe] Mixed Case", "[Note]"), "Mixed Case");
    }

    #[test]
    fn title_trims_whitespace() {
        assert_eq!(extract_title("[Note]   Extra Spaces   ", "[Note]"), "Extra Spaces");
        assert_eq!(extract_title("[Note]\tTabbed Title", "[Note]"), "Tabbed Title");
    }

    #[test]
    fn empty_title_becomes_placeholder() {
        assert_eq!(extract_title("[Note]", "[Note]"), UNTITLED_NOTE);
        assert_eq!(extract_title("[Note]   ", "[Note]"), UNTITLED_NOTE);
        assert_eq!(extract_title(" \t ", "[Note]"), UNTITLED_NOTE);
    }

    #[test]
    fn subject_without_prefix_is_kept() {
        assert_eq!(extract_title("Regular Subject", "[Note]"), "Regular Subject");
        assert_eq!(extract_title("  [Note] Leading", "[Note]"), "[Note] Leading");
        assert_eq!(extract_title("[No", "[Note]"), "[No");
    }

    #[test]
    fn title_uses_configured_prefix() {
        assert_eq!(extract_title("[Task] Do Something", "[Task]"), "Do Something");
        assert_eq!(
            extract_title("[Note] Different Pattern", "[Task]"),
            "[Note] Different Pattern"
        );
    }

    #[test]
    fn title_handles_multibyte_subjects() {
        assert_eq!(extract_title("[Note] Café résumé", "[Note]"), "Café résumé");
        assert_eq!(extract_title("Ünïcødé", "[Note]"), "Ünïcødé");
    }

    #[test]
    fn plain_text_becomes_markup() {
        let result = sanitize_body("Line 1\nLine 2", BodyContentType::Text);
        assert_eq!(result, "<div>Line 1<br>\nLine 2</div>");
    }

    #[test]
    fn plain_text_is_escaped() {
        let result = sanitize_body("Use <tag> & symbol", BodyContentType::Text);
        assert!(result.contains("&lt;tag&gt;"));
        assert!(result.contains("&amp;"));
        assert!(!result.contains("<tag>"));
    }

    #[test]
    fn markup_drops_scripts() {
        let html = "<div>Content</div><script>alert('x')</script><p>More</p>";
        let result = sanitize_body(html, BodyContentType::Html);
        assert!(!result.contains("<script>"));
        assert!(!result.contains("alert"));
        assert_eq!(result, "<div>Content</div><p>More</p>");
    }

    #[test]
    fn markup_drops_styles_across_lines() {
        let html = "<style type=\"text/css\">\n.class { color: red; }\n</style>\n<div>Content</div>";
        let result = sanitize_body(html, BodyContentType::Html);
        assert!(!result.contains("<style"));
        assert!(!result.contains(".class"));
        assert_eq!(result, "<div>Content</div>");
    }

    #[test]
    fn markup_drops_document_wrappers() {
        let html = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Ignored</title></head>
<body class="x">
<div>Content</div>
</body>
</html>"#;
        let result = sanitize_body(html, BodyContentType::Html);
        for tag in ["<!DOCTYPE", "<html", "</html>", "<head>", "</head>", "<body", "</body>", "Ignored"] {
            assert!(!result.contains(tag), "{} survived", tag);
        }
        assert_eq!(result, "<div>Content</div>");
    }

    #[test]
    fn markup_stripping_ignores_case() {
        let html = "<HTML><BODY><SCRIPT>bad()</SCRIPT><STYLE>p{}</STYLE><p>Keep</p></BODY></HTML>";
        let result = sanitize_body(html, BodyContentType::Html);
        assert_eq!(result, "<p>Keep</p>");
    }

    #[test]
    fn markup_keeps_other_tags_in_order() {
        let html = "<h1>A</h1><script>x</script><ul><li>B</li></ul><p>C</p>";
        let result = sanitize_body(html, BodyContentType::Html);
        assert_eq!(result, "<h1>A</h1><ul><li>B</li></ul><p>C</p>");
    }

    #[test]
    fn footer_has_rule_label_and_timestamp() {
        let footer = build_footer(sample_message().received_at);
        assert!(footer.contains("<hr>"));
        assert!(footer.contains("<strong>Note captured from email</strong>"));
        assert!(footer.contains("2024-01-15 10:30:00 UTC"));
    }

    #[test]
    fn process_builds_complete_note() {
        let message = sample_message();
        let note = NoteTransformer::new("[Note]").process(&message);

        assert_eq!(note.message_id, "test-email-id-123");
        assert_eq!(note.title, "Test Note Title");
        assert_eq!(note.received_at, message.received_at);
        assert!(note.html_content.starts_with("<div>This is the body content.</div>\n"));
        assert!(note.html_content.contains("<hr>"));
        assert!(note.html_content.contains("2024-01-15 10:30:00 UTC"));
    }

    #[test]
    fn process_keeps_markup_body() {
        let message = RawMessage {
            subject: "[Note] HTML Email".to_string(),
            body: "<html><body><p>Formatted <strong>content</strong></p></body></html>".to_string(),
            content_type: BodyContentType::Html,
            ..sample_message()
        };
        let note = NoteTransformer::new("[Note]").process(&message);

        assert_eq!(note.title, "HTML Email");
        assert!(note
            .html_content
            .contains("<p>Formatted <strong>content</strong></p>"));
    }
}
