//! Subscription and manual node parser.
//!
//! Accepts the payload shapes airports actually serve: Clash YAML
//! (`proxies:` list), Surge-style `name = type, server, port, k=v` lines
//! (optionally inside a `[Proxy]` section), and either of those wrapped in
//! base64. Malformed entries are skipped and reported, never fatal.

use std::borrow::Cow;

use base64::Engine;

use super::error::ParseError;
use super::node::{yaml_str, Node, Origin, ProtocolFields};

/// Line prefixes treated as comments in line-oriented payloads.
const COMMENT_PREFIXES: &[&str] = &["#", "//", ";"];

/// Payloads shorter than this are never treated as base64.
const MIN_BASE64_LEN: usize = 10;

/// Identity of the subscription a payload came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef<'a> {
    pub name: &'a str,
    /// Display prefix prepended to node names; may be empty.
    pub prefix: &'a str,
    /// Declaration order of the source.
    pub index: usize,
}

/// Nodes parsed from one payload plus the entries that were skipped.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub nodes: Vec<Node>,
    pub errors: Vec<ParseError>,
}

/// Undo a base64 wrapping if the payload looks like one.
///
/// Line breaks inside the payload are ignored, so column-wrapped base64
/// decodes too. Only accepted when the decoded text is UTF-8 and
/// multi-line; anything else is returned untouched.
pub fn decode_payload(text: &str) -> Cow<'_, str> {
    let trimmed = text.trim();
    if trimmed.contains(' ') {
        return Cow::Borrowed(text);
    }
    let mut padded: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n' | '\t'))
        .collect();
    if padded.len() <= MIN_BASE64_LEN {
        return Cow::Borrowed(text);
    }

    let missing = padded.len() % 4;
    if missing != 0 {
        padded.push_str(&"=".repeat(4 - missing));
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(&padded)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(&padded));

    match decoded.ok().and_then(|bytes| String::from_utf8(bytes).ok()) {
        Some(s) if s.contains('\n') || s.contains('\r') => Cow::Owned(s),
        _ => Cow::Borrowed(text),
    }
}

/// Parse one subscription payload into fetched nodes with raw names.
pub fn parse_subscription(text: &str, source: &SourceRef<'_>) -> ParseOutcome {
    let text = decode_payload(text);

    let mut outcome = match parse_clash_yaml(&text, source.name) {
        Some(outcome) => outcome,
        None => parse_lines(&text, source.name, Origin::Fetched, true),
    };

    for node in &mut outcome.nodes {
        node.source_tag = source.prefix.to_string();
        node.source_index = source.index;
    }
    outcome
}

/// Parse a manual node list (Surge line syntax, `[...]` lines ignored).
pub fn parse_manual(text: &str) -> ParseOutcome {
    parse_lines(text, "manual", Origin::Manual, false)
}

/// Try to read the payload as a Clash document.
///
/// Returns `None` when it is not one, so the caller can fall back to the
/// line format.
fn parse_clash_yaml(text: &str, source_name: &str) -> Option<ParseOutcome> {
    if !text.contains("proxies:") && !text.contains("Proxy:") {
        return None;
    }
    let doc: serde_yaml::Value = serde_yaml::from_str(text).ok()?;
    let proxies = doc
        .get("proxies")
        .or_else(|| doc.get("Proxy"))?
        .as_sequence()?;

    let mut outcome = ParseOutcome::default();
    for (idx, entry) in proxies.iter().enumerate() {
        match clash_entry_to_node(entry) {
            Ok(node) => outcome.nodes.push(node),
            Err(reason) => outcome.errors.push(ParseError {
                source_name: source_name.to_string(),
                entry: idx,
                reason,
            }),
        }
    }
    Some(outcome)
}

fn clash_entry_to_node(entry: &serde_yaml::Value) -> Result<Node, String> {
    let map = entry
        .as_mapping()
        .ok_or_else(|| "entry is not a mapping".to_string())?;

    let name = yaml_str(map, "name")
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| "missing name".to_string())?;
    for key in ["type", "server", "port"] {
        if yaml_str(map, key).map_or(true, |v| v.trim().is_empty()) {
            return Err(format!("'{name}' is missing {key}"));
        }
    }

    // Rebuilt rather than removed in place so key order survives.
    let fields: serde_yaml::Mapping = map
        .iter()
        .filter(|(k, _)| k.as_str() != Some("name"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Ok(Node::new(name, Origin::Fetched, ProtocolFields::Clash(fields)))
}

/// Parse `name = type, server, port, ...` lines.
///
/// With `honour_section`, a payload that contains a `[Proxy]` header only
/// contributes lines from inside that section.
fn parse_lines(text: &str, source_name: &str, origin: Origin, honour_section: bool) -> ParseOutcome {
    let has_proxy_section =
        honour_section && text.lines().any(|l| l.trim().eq_ignore_ascii_case("[proxy]"));
    let mut in_proxy_section = false;
    let mut outcome = ParseOutcome::default();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || COMMENT_PREFIXES.iter().any(|p| line.starts_with(p)) {
            continue;
        }
        if line.starts_with('[') {
            in_proxy_section = line.eq_ignore_ascii_case("[proxy]");
            continue;
        }
        if has_proxy_section && !in_proxy_section {
            continue;
        }
        if !line.contains('=') {
            continue;
        }

        match parse_surge_line(line) {
            Ok((name, fields)) => outcome.nodes.push(Node::new(name, origin, fields)),
            Err(reason) => outcome.errors.push(ParseError {
                source_name: source_name.to_string(),
                entry: idx + 1,
                reason,
            }),
        }
    }
    outcome
}

/// Split one Surge proxy line into its name and fields.
pub fn parse_surge_line(line: &str) -> Result<(String, ProtocolFields), String> {
    let (name, detail) = line
        .split_once('=')
        .ok_or_else(|| "expected 'name = type, server, port'".to_string())?;
    let name = name.trim();
    let detail = detail.trim();

    if name.contains("://") {
        return Err("share links are not supported".into());
    }
    if name.is_empty() {
        return Err("missing name".into());
    }

    let parts: Vec<&str> = detail.split(',').map(str::trim).collect();
    if parts.len() < 3 || parts[..3].iter().any(|p| p.is_empty()) {
        return Err(format!("'{name}' needs at least type, server and port"));
    }

    let params = parts[3..]
        .iter()
        .filter_map(|item| item.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    Ok((
        name.to_string(),
        ProtocolFields::Surge {
            kind: parts[0].to_ascii_lowercase(),
            server: parts[1].to_string(),
            port: parts[2].to_string(),
            params,
            detail: detail.to_string(),
        },
    ))
}
