//! Policy-group declarations and their resolution against the node set.
//!
//! A declaration reads like a Surge policy group:
//!
//! ```text
//! Proxy = select, {all}, DIRECT
//! Asia  = url-test, {all filter=HK,JP exclude=Chain}, url=http://cp.cloudflare.com, interval=300
//! ```
//!
//! Items are split on commas outside braces. `{all ...}` expands to node
//! names in canonical order, `key=value` items are group options, anything
//! else is a literal member (a node, another group, `DIRECT`).

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{SyncError, Warning};
use super::node::Node;
use super::render::Target;

/// Policy group type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Select,
    UrlTest,
    Fallback,
    LoadBalance,
}

impl GroupKind {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "select" => Some(Self::Select),
            "url-test" => Some(Self::UrlTest),
            "fallback" => Some(Self::Fallback),
            "load-balance" => Some(Self::LoadBalance),
            _ => None,
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select => write!(f, "select"),
            Self::UrlTest => write!(f, "url-test"),
            Self::Fallback => write!(f, "fallback"),
            Self::LoadBalance => write!(f, "load-balance"),
        }
    }
}

/// A raw group declaration as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDecl {
    pub name: String,
    pub rule: String,
}

/// One member reference of a parsed rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
    Literal(String),
    /// `{all}` with optional keyword filters, stored lowercased.
    All {
        include: Vec<String>,
        exclude: Vec<String>,
    },
}

impl Member {
    fn accepts(include: &[String], exclude: &[String], name: &str) -> bool {
        let name = name.to_lowercase();
        let included = include.is_empty() || include.iter().any(|k| name.contains(k.as_str()));
        included && !exclude.iter().any(|k| name.contains(k.as_str()))
    }
}

/// A parsed group declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRule {
    pub name: String,
    pub kind: GroupKind,
    pub members: Vec<Member>,
    pub options: Vec<(String, String)>,
}

/// A group with its members resolved to names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub kind: GroupKind,
    pub members: Vec<String>,
    pub options: Vec<(String, String)>,
}

/// Split on commas that are not inside `{...}`.
fn split_items(rule: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, ch) in rule.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(rule[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(rule[start..].trim());
    items.into_iter().filter(|s| !s.is_empty()).collect()
}

fn keywords(list: &str) -> impl Iterator<Item = String> + '_ {
    list.split(',')
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
}

/// Parse a `{all ...}` expression, `None` if it is not one.
fn parse_expression(expr: &str) -> Option<Member> {
    let inner = expr.strip_prefix('{')?.strip_suffix('}')?.trim();
    let rest = inner.strip_prefix("all")?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let mut include = Vec::new();
    let mut exclude = Vec::new();
    // Bare words continue the previous list: `filter=HK, JP`.
    let mut into_include: Option<bool> = None;
    for part in rest.split_whitespace() {
        let (is_include, words) = if let Some(words) = part.strip_prefix("filter=") {
            (true, words)
        } else if let Some(words) = part.strip_prefix("exclude=") {
            (false, words)
        } else if part.contains('=') {
            return None;
        } else {
            (into_include?, part)
        };
        let list = if is_include { &mut include } else { &mut exclude };
        let before = list.len();
        list.extend(keywords(words));
        if list.len() == before && part.contains('=') {
            // `filter=` with nothing after it.
            return None;
        }
        into_include = Some(is_include);
    }
    Some(Member::All { include, exclude })
}

/// Parse one declaration.
///
/// The leading item is the group type; when it is omitted (the rule starts
/// with `{all ...}`) the group is a `select`.
pub fn parse_rule(decl: &GroupDecl) -> Result<GroupRule, SyncError> {
    let unknown = |expression: &str| SyncError::UnknownGroupSyntax {
        group: decl.name.clone(),
        expression: expression.to_string(),
    };

    let items = split_items(&decl.rule);
    let (kind, rest) = match items.split_first() {
        None => (GroupKind::Select, &items[..]),
        Some((first, rest)) => match GroupKind::parse(first) {
            Some(kind) => (kind, rest),
            None if first.starts_with('{') => (GroupKind::Select, &items[..]),
            None => return Err(unknown(*first)),
        },
    };

    let mut members = Vec::new();
    let mut options = Vec::new();
    for item in rest {
        if item.contains('{') || item.contains('}') {
            members.push(parse_expression(item).ok_or_else(|| unknown(*item))?);
        } else if let Some((key, value)) = item.split_once('=') {
            options.push((key.trim().to_string(), value.trim().to_string()));
        } else {
            members.push(Member::Literal((*item).to_string()));
        }
    }

    Ok(GroupRule {
        name: decl.name.clone(),
        kind,
        members,
        options,
    })
}

/// Parse every declaration, failing on the first malformed one.
pub fn parse_rules(decls: &[GroupDecl]) -> Result<Vec<GroupRule>, SyncError> {
    decls.iter().map(parse_rule).collect()
}

/// Apply per-target overrides.
///
/// `Auto_surge` replaces `Auto` (in place) when rendering Surge, and is
/// dropped when rendering Clash; likewise for `_clash`.
pub fn select_for_target(decls: &[GroupDecl], target: Target) -> Vec<GroupDecl> {
    let own = format!("_{target}");
    let other = format!("_{}", target.other());
    let strip = |name: &str, suffix: &str| -> Option<String> {
        let start = name.len().checked_sub(suffix.len())?;
        let tail = name.get(start..)?;
        tail.eq_ignore_ascii_case(suffix)
            .then(|| name[..start].to_string())
    };

    let mut selected: Vec<GroupDecl> = decls
        .iter()
        .filter(|d| strip(&d.name, &own).is_none() && strip(&d.name, &other).is_none())
        .cloned()
        .collect();

    for decl in decls {
        let Some(real) = strip(&decl.name, &own) else {
            continue;
        };
        let replacement = GroupDecl {
            name: real,
            rule: decl.rule.clone(),
        };
        match selected.iter_mut().find(|d| d.name == replacement.name) {
            Some(existing) => *existing = replacement,
            None => selected.push(replacement),
        }
    }
    selected
}

/// Resolve parsed rules against the final node set, in declaration order.
pub fn resolve(rules: &[GroupRule], nodes: &[Node]) -> (Vec<Group>, Vec<Warning>) {
    let mut groups = Vec::with_capacity(rules.len());
    let mut warnings = Vec::new();

    for rule in rules {
        let mut seen = HashSet::new();
        let mut members = Vec::new();
        for member in &rule.members {
            match member {
                Member::Literal(name) => {
                    if seen.insert(name.clone()) {
                        members.push(name.clone());
                    }
                }
                Member::All { include, exclude } => {
                    for node in nodes {
                        if Member::accepts(include, exclude, &node.name)
                            && seen.insert(node.name.clone())
                        {
                            members.push(node.name.clone());
                        }
                    }
                }
            }
        }

        if members.is_empty() {
            tracing::warn!("group '{}' resolved to no members", rule.name);
            warnings.push(Warning::EmptyGroup {
                group: rule.name.clone(),
            });
        }
        groups.push(Group {
            name: rule.name.clone(),
            kind: rule.kind,
            members,
            options: rule.options.clone(),
        });
    }

    (groups, warnings)
}
