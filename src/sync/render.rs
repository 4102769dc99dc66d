//! Surge and Clash document rendering.
//!
//! Both renderers walk the snapshot in its canonical order and splice the
//! result into an operator-supplied template:
//!
//! - Surge: node lines go right after the `[Proxy]` line, group lines right
//!   after `[Proxy Group]`.
//! - Clash: the template's top-level `proxies` and `proxy-groups` keys are
//!   replaced in place.
//!
//! Nodes are translated between the two syntaxes when their fields came
//! from the other format.

use std::fmt;

use chrono::{DateTime, Utc};
use chrono_tz::Asia::Shanghai;
use serde_yaml::{Mapping, Value};

use super::error::{SyncError, Warning};
use super::group::Group;
use super::node::{yaml_str, Node, ProtocolFields};
use super::pipeline::SyncSnapshot;

/// Surge insertion points.
const SURGE_PROXY_SECTION: &str = "[Proxy]";
const SURGE_GROUP_SECTION: &str = "[Proxy Group]";

/// Clash insertion points.
const CLASH_PROXIES_KEY: &str = "proxies";
const CLASH_GROUPS_KEY: &str = "proxy-groups";

/// Member written into groups that resolved to nothing; clients reject
/// empty groups.
const EMPTY_GROUP_FALLBACK: &str = "DIRECT";

/// Default `#!MANAGED-CONFIG` refresh interval in seconds.
pub const DEFAULT_MANAGED_INTERVAL: u64 = 28_800;

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Surge,
    Clash,
}

impl Target {
    pub fn other(self) -> Self {
        match self {
            Self::Surge => Self::Clash,
            Self::Clash => Self::Surge,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Surge => write!(f, "surge"),
            Self::Clash => write!(f, "clash"),
        }
    }
}

impl std::str::FromStr for Target {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "surge" => Ok(Self::Surge),
            "clash" => Ok(Self::Clash),
            other => anyhow::bail!("unknown target '{other}', expected 'surge' or 'clash'"),
        }
    }
}

/// Template documents, one per format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Templates {
    pub surge: String,
    pub clash: String,
}

impl Templates {
    pub fn for_target(&self, target: Target) -> &str {
        match target {
            Target::Surge => &self.surge,
            Target::Clash => &self.clash,
        }
    }
}

/// Header settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    /// Base URL for Surge's `#!MANAGED-CONFIG` line; no line when unset.
    pub managed_url: Option<String>,
    pub managed_interval: u64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            managed_url: None,
            managed_interval: DEFAULT_MANAGED_INTERVAL,
        }
    }
}

/// `2026-10-19 08:00:00` in UTC+8.
pub fn beijing_timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Shanghai)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Render the snapshot for `target` into `template`.
pub fn render(
    snapshot: &SyncSnapshot,
    target: Target,
    template: &str,
    options: &RenderOptions,
) -> Result<(String, Vec<Warning>), SyncError> {
    match target {
        Target::Surge => render_surge(snapshot, template, options),
        Target::Clash => render_clash(snapshot, template),
    }
}

fn missing_point(target: Target, point: &str) -> SyncError {
    SyncError::Render {
        target: target.to_string(),
        point: point.to_string(),
    }
}

fn is_truthy(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn group_members(group: &Group) -> Vec<&str> {
    if group.members.is_empty() {
        vec![EMPTY_GROUP_FALLBACK]
    } else {
        group.members.iter().map(String::as_str).collect()
    }
}

// ── Surge ───────────────────────────────────────────────────────────

fn render_surge(
    snapshot: &SyncSnapshot,
    template: &str,
    options: &RenderOptions,
) -> Result<(String, Vec<Warning>), SyncError> {
    let is_section = |line: &str, section: &str| line.trim().eq_ignore_ascii_case(section);
    if !template.lines().any(|l| is_section(l, SURGE_PROXY_SECTION)) {
        return Err(missing_point(Target::Surge, SURGE_PROXY_SECTION));
    }
    if !template.lines().any(|l| is_section(l, SURGE_GROUP_SECTION)) {
        return Err(missing_point(Target::Surge, SURGE_GROUP_SECTION));
    }

    let mut warnings = Vec::new();
    let mut proxy_lines = Vec::with_capacity(snapshot.nodes.len());
    for node in &snapshot.nodes {
        match surge_proxy_line(node) {
            Some(line) => proxy_lines.push(line),
            None => {
                let kind = node.fields.kind();
                tracing::warn!("node '{}' of type '{kind}' has no Surge form, skipped", node.name);
                warnings.push(Warning::Unrenderable {
                    node: node.name.clone(),
                    kind,
                });
            }
        }
    }
    let group_lines: Vec<String> = snapshot.groups.iter().map(surge_group_line).collect();

    let mut out = String::with_capacity(template.len() + 128 * proxy_lines.len());
    if let Some(url) = &options.managed_url {
        let sep = if url.contains('?') { '&' } else { '?' };
        out.push_str(&format!(
            "#!MANAGED-CONFIG {url}{sep}target=surge interval={} strict=true\n",
            options.managed_interval
        ));
    }
    out.push_str(&format!(
        "# Last Updated: {} (UTC+8)\n",
        beijing_timestamp(snapshot.generated_at)
    ));

    for line in template.lines() {
        out.push_str(line);
        out.push('\n');
        let block = if is_section(line, SURGE_PROXY_SECTION) {
            &proxy_lines
        } else if is_section(line, SURGE_GROUP_SECTION) {
            &group_lines
        } else {
            continue;
        };
        for entry in block {
            out.push_str(entry);
            out.push('\n');
        }
    }

    Ok((out, warnings))
}

/// Whether Surge has a proxy-line form for these fields.
pub fn renders_in_surge(fields: &ProtocolFields) -> bool {
    match fields {
        ProtocolFields::Surge { .. } => true,
        ProtocolFields::Clash(map) => clash_to_surge_detail(map).is_some(),
    }
}

/// `name = type, server, port, ...`; `None` for types Surge cannot express.
fn surge_proxy_line(node: &Node) -> Option<String> {
    let detail = match &node.fields {
        ProtocolFields::Surge { detail, .. } => detail.clone(),
        ProtocolFields::Clash(map) => clash_to_surge_detail(map)?,
    };
    Some(match &node.via {
        Some(via) => format!(
            "{} = {}, underlying-proxy={via}",
            node.name,
            without_underlying_proxy(&detail)
        ),
        None => format!("{} = {detail}", node.name),
    })
}

/// Drop any `underlying-proxy=` item so a chain carries exactly one.
fn without_underlying_proxy(detail: &str) -> String {
    if !detail.to_ascii_lowercase().contains("underlying-proxy") {
        return detail.to_string();
    }
    detail
        .split(',')
        .map(str::trim)
        .filter(|item| {
            !item
                .split_once('=')
                .is_some_and(|(k, _)| k.trim().eq_ignore_ascii_case("underlying-proxy"))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn clash_to_surge_detail(map: &Mapping) -> Option<String> {
    let get = |key: &str| yaml_str(map, key).unwrap_or_default();
    let kind = get("type").to_ascii_lowercase();
    let head = format!("{kind}, {}, {}", get("server"), get("port"));

    let tail = match kind.as_str() {
        "ss" => format!(
            "encrypt-method={}, password={}",
            get("cipher"),
            get("password")
        ),
        "vmess" => format!(
            "username={}, tls={}",
            get("uuid"),
            is_truthy(yaml_str(map, "tls").as_deref())
        ),
        "trojan" => {
            let mut s = format!(
                "password={}, skip-cert-verify={}",
                get("password"),
                is_truthy(yaml_str(map, "skip-cert-verify").as_deref())
            );
            if let Some(sni) = yaml_str(map, "sni").filter(|s| !s.is_empty()) {
                s.push_str(&format!(", sni={sni}"));
            }
            s
        }
        "http" | "socks5" => format!(
            "username={}, password={}",
            get("username"),
            get("password")
        ),
        "snell" => format!(
            "psk={}, version={}",
            get("psk"),
            yaml_str(map, "version").unwrap_or_else(|| "2".into())
        ),
        "hysteria2" => {
            let mut s = format!("password={}", get("password"));
            if let Some(sni) = yaml_str(map, "sni").filter(|s| !s.is_empty()) {
                s.push_str(&format!(", sni={sni}"));
            }
            if is_truthy(yaml_str(map, "skip-cert-verify").as_deref()) {
                s.push_str(", skip-cert-verify=true");
            }
            if let Some(down) = yaml_str(map, "down") {
                s.push_str(&format!(", download-bandwidth={down}"));
            }
            s
        }
        _ => return None,
    };
    Some(format!("{head}, {tail}"))
}

fn surge_group_line(group: &Group) -> String {
    let mut items: Vec<String> = vec![group.kind.to_string()];
    items.extend(group_members(group).into_iter().map(str::to_string));
    items.extend(group.options.iter().map(|(k, v)| format!("{k}={v}")));
    format!("{} = {}", group.name, items.join(", "))
}

// ── Clash ───────────────────────────────────────────────────────────

fn render_clash(
    snapshot: &SyncSnapshot,
    template: &str,
) -> Result<(String, Vec<Warning>), SyncError> {
    let doc: Value = serde_yaml::from_str(template).map_err(|e| SyncError::Template {
        target: Target::Clash.to_string(),
        reason: e.to_string(),
    })?;
    let Value::Mapping(mut doc) = doc else {
        return Err(missing_point(Target::Clash, CLASH_PROXIES_KEY));
    };
    for key in [CLASH_PROXIES_KEY, CLASH_GROUPS_KEY] {
        if !doc.contains_key(key) {
            return Err(missing_point(Target::Clash, key));
        }
    }

    let proxies: Vec<Value> = snapshot
        .nodes
        .iter()
        .map(|n| Value::Mapping(clash_proxy(n)))
        .collect();
    let groups: Vec<Value> = snapshot
        .groups
        .iter()
        .map(|g| Value::Mapping(clash_group(g)))
        .collect();

    // Existing keys keep their position on insert.
    doc.insert(CLASH_PROXIES_KEY.into(), Value::Sequence(proxies));
    doc.insert(CLASH_GROUPS_KEY.into(), Value::Sequence(groups));

    let body = serde_yaml::to_string(&Value::Mapping(doc)).map_err(|e| SyncError::Template {
        target: Target::Clash.to_string(),
        reason: e.to_string(),
    })?;
    let header = format!(
        "# Last Updated: {} (UTC+8)\n",
        beijing_timestamp(snapshot.generated_at)
    );
    Ok((header + &body, Vec::new()))
}

fn port_value(port: &str) -> Value {
    port.parse::<u16>()
        .map(|p| Value::Number(p.into()))
        .unwrap_or_else(|_| Value::String(port.to_string()))
}

fn int_or_string(value: &str) -> Value {
    value
        .parse::<i64>()
        .map(|n| Value::Number(n.into()))
        .unwrap_or_else(|_| Value::String(value.to_string()))
}

fn clash_proxy(node: &Node) -> Mapping {
    let mut out = Mapping::new();
    out.insert("name".into(), node.name.clone().into());
    match &node.fields {
        ProtocolFields::Clash(map) => {
            for (k, v) in map {
                out.insert(k.clone(), v.clone());
            }
        }
        fields @ ProtocolFields::Surge { .. } => surge_to_clash(fields, &mut out),
    }
    if let Some(via) = &node.via {
        out.insert("dialer-proxy".into(), via.clone().into());
    }
    out
}

/// Best-effort translation of a Surge line into Clash keys.
fn surge_to_clash(fields: &ProtocolFields, out: &mut Mapping) {
    let ProtocolFields::Surge {
        kind, server, port, ..
    } = fields
    else {
        return;
    };
    let param = |key: &str| fields.param(key).unwrap_or_default().to_string();

    out.insert("type".into(), kind.clone().into());
    out.insert("server".into(), server.clone().into());
    out.insert("port".into(), port_value(port));

    match kind.as_str() {
        "ss" => {
            out.insert("cipher".into(), param("encrypt-method").into());
            out.insert("password".into(), param("password").into());
        }
        "vmess" => {
            out.insert("uuid".into(), param("username").into());
            out.insert("cipher".into(), "auto".into());
            out.insert("tls".into(), is_truthy(fields.param("tls")).into());
        }
        "trojan" => {
            out.insert("password".into(), param("password").into());
            if let Some(sni) = fields.param("sni") {
                out.insert("sni".into(), sni.into());
            }
            if is_truthy(fields.param("skip-cert-verify")) {
                out.insert("skip-cert-verify".into(), true.into());
            }
        }
        "http" | "socks5" => {
            out.insert("username".into(), param("username").into());
            out.insert("password".into(), param("password").into());
            if let Some(via) = fields.param("underlying-proxy") {
                out.insert("dialer-proxy".into(), via.into());
            }
        }
        "snell" => {
            out.insert("psk".into(), param("psk").into());
            let version = fields.param("version").unwrap_or("2");
            out.insert("version".into(), int_or_string(version));
        }
        "hysteria2" => {
            out.insert("password".into(), param("password").into());
            if let Some(sni) = fields.param("sni") {
                out.insert("sni".into(), sni.into());
            }
            if is_truthy(fields.param("skip-cert-verify")) {
                out.insert("skip-cert-verify".into(), true.into());
            }
            if let Some(alpn) = fields.param("alpn") {
                let list: Vec<Value> = alpn.split('|').map(|a| a.trim().into()).collect();
                out.insert("alpn".into(), Value::Sequence(list));
            }
            for (surge_key, clash_key) in [("obfs", "obfs"), ("obfs-password", "obfs-password")] {
                if let Some(v) = fields.param(surge_key) {
                    out.insert(clash_key.into(), v.into());
                }
            }
            for (surge_key, clash_key) in [("download-bandwidth", "down"), ("upload-bandwidth", "up")] {
                if let Some(n) = fields.param(surge_key).and_then(|v| v.parse::<i64>().ok()) {
                    out.insert(clash_key.into(), n.into());
                }
            }
            if is_truthy(fields.param("udp-relay")) {
                out.insert("udp".into(), true.into());
            }
            if is_truthy(fields.param("tfo")) {
                out.insert("fast-open".into(), true.into());
            }
        }
        _ => {}
    }
}

fn clash_group(group: &Group) -> Mapping {
    let mut out = Mapping::new();
    out.insert("name".into(), group.name.clone().into());
    out.insert("type".into(), group.kind.to_string().into());
    let members: Vec<Value> = group_members(group).into_iter().map(Value::from).collect();
    out.insert("proxies".into(), Value::Sequence(members));

    for (key, value) in &group.options {
        let value = match key.as_str() {
            "url" | "strategy" => Value::String(value.clone()),
            "interval" | "tolerance" | "timeout" => int_or_string(value),
            "lazy" => Value::Bool(is_truthy(Some(value))),
            _ => continue,
        };
        out.insert(key.as_str().into(), value);
    }
    out
}
