//! Heuristic token extraction from loosely formatted credential uploads.
//!
//! Accepted shapes, tried in order:
//! - JSON object carrying one of [`JSON_FIELDS`]
//! - cookie style `sessionid=...; other=...`, also inside a pasted `Cookie:` header
//! - a bare token on its own (short content, at most a couple of lines, no `;`)
//!
//! Every strategy is total and returns `None` when it does not apply.

use std::{fs, path::Path};

use serde_json::Value;

use crate::error::StartError;

const JSON_FIELDS: [&str; 5] = ["sessionid", "session", "cookie", "token", "access_token"];
const COOKIE_KEYS: [&str; 4] = ["sessionid", "session", "token", "access_token"];
const RAW_MIN_LEN: usize = 10;
const RAW_MAX_LINE_BREAKS: usize = 2;

/// Extracts a single token from `content`.
pub fn resolve_token(content: &str) -> Option<String> {
    let content = content.trim();
    if content.is_empty() {
        return None;
    }
    if let Ok(value @ (Value::Object(_) | Value::Array(_))) = serde_json::from_str::<Value>(content) {
        return token_from_value(&value);
    }
    from_cookie(content).or_else(|| from_raw(content))
}

/// Extracts every token from `content`, keeping file order and dropping repeats.
///
/// A JSON array yields one token per element. Otherwise, when several lines each
/// carry a credential of their own, every such line is one; failing that the
/// whole content is treated as one credential (a cookie jar split over lines).
pub fn resolve_credential_set(content: &str) -> Vec<String> {
    let content = content.trim();
    if content.is_empty() {
        return Vec::new();
    }

    let tokens = match serde_json::from_str::<Value>(content) {
        Ok(Value::Array(items)) => items.iter().filter_map(token_from_value).collect(),
        Ok(value @ Value::Object(_)) => token_from_value(&value).into_iter().collect(),
        _ => {
            let lines: Vec<&str> = content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect();
            let per_line: Vec<String> = if lines.len() > 1 {
                lines.iter().filter_map(|line| resolve_line(line)).collect()
            } else {
                Vec::new()
            };
            if per_line.len() > 1 {
                per_line
            } else {
                resolve_token(content).into_iter().collect()
            }
        }
    };

    let mut unique = Vec::with_capacity(tokens.len());
    for token in tokens {
        if !unique.contains(&token) {
            unique.push(token);
        }
    }
    unique
}

/// Reads a credentials file (lossily, invalid UTF-8 is replaced) and resolves it.
pub fn load_credentials(path: &Path) -> Result<Vec<String>, StartError> {
    let bytes = fs::read(path).map_err(|source| StartError::UnreadableCredentials {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(resolve_credential_set(&String::from_utf8_lossy(&bytes)))
}

fn token_from_value(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => JSON_FIELDS.iter().find_map(|field| {
            let raw = match map.get(*field)? {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            if raw.is_empty() {
                None
            } else if raw.contains('=') {
                from_cookie(&raw).or(Some(raw))
            } else {
                Some(raw)
            }
        }),
        Value::String(s) => resolve_token(s),
        _ => None,
    }
}

/// One line of a multi-credential upload. Stricter than [`resolve_token`]: an
/// unrelated `name=value` cookie line is not a bare token.
fn resolve_line(line: &str) -> Option<String> {
    if let Ok(value @ (Value::Object(_) | Value::Array(_))) = serde_json::from_str::<Value>(line) {
        return token_from_value(&value);
    }
    from_cookie(line).or_else(|| {
        if line.contains('=') {
            None
        } else {
            from_raw(line)
        }
    })
}

fn from_cookie(content: &str) -> Option<String> {
    let pairs: Vec<(&str, &str)> = content
        .split(|c| c == ';' || c == '\n')
        .filter_map(|fragment| fragment.split_once('='))
        .map(|(name, value)| (cookie_name(name), value.trim().trim_matches('"')))
        .collect();
    COOKIE_KEYS.iter().find_map(|key| {
        pairs
            .iter()
            .find(|(name, value)| name == key && !value.is_empty())
            .map(|(_, value)| value.to_string())
    })
}

// `Cookie: sessionid` and `Set-Cookie: sessionid` name the cookie after the header label.
fn cookie_name(raw: &str) -> &str {
    let raw = raw.trim();
    raw.rsplit(|c: char| c.is_whitespace() || c == ':')
        .next()
        .unwrap_or(raw)
}

// Cookie jars without a known key end up here; `;` rules them out.
fn from_raw(content: &str) -> Option<String> {
    let breaks = content.matches('\n').count();
    (content.len() > RAW_MIN_LEN && breaks <= RAW_MAX_LINE_BREAKS && !content.contains(';'))
        .then(|| content.to_string())
}
