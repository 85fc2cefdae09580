// Inbound message validation and XSS sanitization.
//
// Stateless helpers used by the message pipeline: JSON shape, type
// whitelist, serialized length, and a sanitizer that escapes HTML and then
// strips a fixed set of dangerous patterns. Stripping is logged at WARN for
// downstream audit; the sanitized message is still delivered (deliberate
// sanitize-and-continue policy, flagged for product sign-off before any
// change to reject-on-violation).

use std::sync::LazyLock;

use crewline_common::protocol::ws::{is_allowed_message_type, MAX_MESSAGE_BYTES};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

/// Validate the `type` discriminator against the fixed whitelist.
pub fn validate_message_type(message_type: &str) -> Result<(), String> {
    if message_type.is_empty() {
        return Err("Message type is required".to_string());
    }
    if !is_allowed_message_type(message_type) {
        return Err(format!("Message type '{message_type}' is not allowed"));
    }
    Ok(())
}

/// Validate serialized payload size. Objects are measured in their JSON wire
/// form; strings are measured as-is.
pub fn validate_message_length(payload: &Value) -> Result<(), String> {
    let length = match payload {
        Value::String(text) => text.len(),
        other => serde_json::to_string(other).map(|raw| raw.len()).unwrap_or(0),
    };

    if length > MAX_MESSAGE_BYTES {
        return Err(format!(
            "Message too long: {length} bytes (maximum {MAX_MESSAGE_BYTES})"
        ));
    }
    Ok(())
}

/// Parse raw frame text into a JSON object.
pub fn validate_json(raw: &str) -> Result<Map<String, Value>, String> {
    if raw.is_empty() {
        return Err("Empty data".to_string());
    }

    let parsed: Value =
        serde_json::from_str(raw).map_err(|error| format!("Invalid JSON: {error}"))?;

    match parsed {
        Value::Object(map) => Ok(map),
        _ => Err("Data must be a JSON object".to_string()),
    }
}

// Dangerous patterns are matched against the escaped text, so tag patterns
// target the entity-encoded forms.
static DANGEROUS_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    vec![
        (
            "script_block",
            Regex::new(r"(?is)&lt;script.*?&gt;.*?&lt;/script&gt;")
                .expect("script block pattern should compile"),
        ),
        (
            "javascript_uri",
            Regex::new(r"(?i)javascript\s*:").expect("javascript uri pattern should compile"),
        ),
        (
            "event_handler",
            Regex::new(r"(?i)\bon\w+\s*=").expect("event handler pattern should compile"),
        ),
        ("iframe_tag", Regex::new(r"(?i)&lt;iframe").expect("iframe pattern should compile")),
        ("object_tag", Regex::new(r"(?i)&lt;object").expect("object pattern should compile")),
        ("embed_tag", Regex::new(r"(?i)&lt;embed").expect("embed pattern should compile")),
        (
            "alert_call",
            Regex::new(r"(?i)alert\s*\([^)]*\)").expect("alert call pattern should compile"),
        ),
    ]
});

static HTML_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^&(?:[a-zA-Z][a-zA-Z0-9]*|#\d+|#x[0-9a-fA-F]+);")
        .expect("html entity pattern should compile")
});

/// HTML-escape message text and strip dangerous patterns.
///
/// Escaping preserves already-encoded entities, which makes the whole
/// function idempotent: re-sanitizing sanitized text is a no-op. Every
/// stripped pattern is logged as a security warning before removal.
pub fn sanitize_message(text: &str) -> String {
    let mut sanitized = escape_html(text);

    // Sweep until no pattern matches: removing one fragment can splice the
    // surrounding text into a new dangerous fragment. Each sweep shortens
    // the string, so this terminates.
    loop {
        let mut stripped_any = false;
        for (pattern_name, pattern) in DANGEROUS_PATTERNS.iter() {
            let match_count = pattern.find_iter(&sanitized).count();
            if match_count > 0 {
                warn!(
                    pattern = pattern_name,
                    matches = match_count,
                    "dangerous content stripped from message"
                );
                sanitized = pattern.replace_all(&sanitized, "").into_owned();
                stripped_any = true;
            }
        }
        if !stripped_any {
            break;
        }
    }

    sanitized
}

/// Escape `& < > " '`, leaving existing entities intact so a second pass
/// does not double-encode.
fn escape_html(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(ch) = rest.chars().next() {
        match ch {
            '&' => {
                if HTML_ENTITY.is_match(rest) {
                    output.push('&');
                } else {
                    output.push_str("&amp;");
                }
            }
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            '"' => output.push_str("&quot;"),
            '\'' => output.push_str("&#x27;"),
            other => output.push(other),
        }
        rest = &rest[ch.len_utf8()..];
    }

    output
}
