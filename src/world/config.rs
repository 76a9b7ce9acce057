//! World variable parsing and system-prompt template substitution (orchestrator
//! PREPARE step 1).
//!
//! No file-parsing dependency is introduced here, matching the grounding repo's stance
//! that configuration is a plain in-memory struct, not a TOML/YAML layer.

use std::collections::HashMap;

/// Parse `world.variables` text as `.env`-style `KEY=value` lines.
///
/// Rules: blank lines and `#`-prefixed comments are ignored; each remaining line is
/// split on the first `=`; surrounding whitespace and a single matching pair of `'` or
/// `"` quotes are trimmed from the value; a later occurrence of the same key overwrites
/// an earlier one; lines with no `=` are dropped silently rather than erroring.
pub fn parse_dotenv_like(text: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(eq_idx) = line.find('=') else {
            continue;
        };
        let key = line[..eq_idx].trim();
        if key.is_empty() {
            continue;
        }
        let value = unquote(line[eq_idx + 1..].trim());
        vars.insert(key.to_string(), value);
    }
    vars
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

/// Substitute `{{ key }}` (optional inner whitespace) occurrences in `template` using
/// `vars`. Undefined keys expand to the empty string. Never mutates `template` itself —
/// callers pass the agent's stored prompt by reference and use the returned `String`.
pub fn substitute_template(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(close) = template[i + 2..].find("}}") {
                let key = template[i + 2..i + 2 + close].trim();
                out.push_str(vars.get(key).map(|s| s.as_str()).unwrap_or(""));
                i += 2 + close + 2;
                continue;
            }
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}
