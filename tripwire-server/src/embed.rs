//! Webhook embed payloads and markup escaping

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// Discord limit for an embed field value
pub const MAX_FIELD_VALUE: usize = 1024;

/// Discord limit for an embed field name
pub const MAX_FIELD_NAME: usize = 256;

/// A single rich message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    /// RFC 3339, UTC
    pub timestamp: String,
}

/// One named section of an [`Embed`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Body of a webhook execution request
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub embeds: [&'a Embed; 1],
}

impl Embed {
    pub fn new(title: impl Into<String>, color: u32, at: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            color,
            fields: Vec::new(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    /// Append a section. `value` must already be escaped.
    pub fn field(mut self, name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        let value = if value.is_empty() { "none".to_string() } else { value };
        self.fields.push(EmbedField {
            name: truncate(name, MAX_FIELD_NAME),
            value: truncate(&value, MAX_FIELD_VALUE),
            inline: false,
        });
        self
    }

    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    pub fn payload(&self) -> WebhookPayload<'_> {
        WebhookPayload { embeds: [self] }
    }
}

/// Neutralize markdown, mentions and control characters in untrusted text
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' | '*' | '_' | '~' | '`' | '|' | '>' | '#' | '[' | ']' | '(' | ')' | '-'
            | '<' | ':' => {
                out.push('\\');
                out.push(c);
            }
            '@' => {
                out.push('@');
                out.push('\u{200b}');
            }
            c if c.is_control() => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// Cut `s` to at most `max` characters, marking the cut with an ellipsis
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut cut: String = s.chars().take(max.saturating_sub(1)).collect();
    // a dangling escape would swallow the ellipsis
    if cut.ends_with('\\') && !cut.ends_with("\\\\") {
        cut.pop();
    }
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_escape_neutralizes_markup() {
        assert_eq!(escape("**bold**"), "\\*\\*bold\\*\\*");
        assert_eq!(escape("`rm -rf`"), "\\`rm \\-rf\\`");
        assert_eq!(escape("@everyone"), "@\u{200b}everyone");
        assert_eq!(escape("[x](http://evil)"), "\\[x\\]\\(http\\://evil\\)");
        assert_eq!(escape("a\nb\tc"), "a b c");
        assert_eq!(escape("/index.php"), "/index.php");
    }

    #[test]
    fn test_truncate_respects_char_limit() {
        assert_eq!(truncate("short", 10), "short");

        let long = "é".repeat(2000);
        let cut = truncate(&long, MAX_FIELD_VALUE);
        assert_eq!(cut.chars().count(), MAX_FIELD_VALUE);
        assert!(cut.ends_with('…'));

        assert_eq!(truncate("abc\\*def", 5), "abc…");
    }

    #[test]
    fn test_embed_serializes_as_webhook_payload() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let embed = Embed::new("Honeypot Stats", 0x3498db, at)
            .field("Total Requests", "4")
            .field("Top Paths", "");

        let json = serde_json::to_value(embed.payload()).unwrap();
        let first = &json["embeds"][0];
        assert_eq!(first["title"], "Honeypot Stats");
        assert_eq!(first["color"], 0x3498db);
        assert_eq!(first["timestamp"], "2024-01-01T01:00:00Z");
        assert_eq!(first["fields"][0]["name"], "Total Requests");
        assert_eq!(first["fields"][1]["value"], "none");
        assert_eq!(first["fields"][1]["inline"], false);
    }
}
