//! Canonical node model shared by every pipeline stage.
//!
//! A [`Node`] carries its protocol description opaquely in
//! [`ProtocolFields`]: Surge lines keep their original `detail` text and
//! Clash entries keep their full YAML mapping, so renderers can reproduce
//! fields they do not understand.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved name of the manual exit node used as the last hop of chains.
pub const EXIT_NODE_NAME: &str = "EXIT";

/// Region inferred from a node name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    HK,
    TW,
    JP,
    KR,
    US,
    SG,
    Other,
    Unknown,
}

impl Region {
    /// Short code used in generated names (`JP 01`, `other 03`).
    pub fn code(self) -> &'static str {
        match self {
            Self::HK => "HK",
            Self::TW => "TW",
            Self::JP => "JP",
            Self::KR => "KR",
            Self::US => "US",
            Self::SG => "SG",
            Self::Other => "OTHER",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for Region {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HK" => Ok(Self::HK),
            "TW" => Ok(Self::TW),
            "JP" => Ok(Self::JP),
            "KR" => Ok(Self::KR),
            "US" => Ok(Self::US),
            "SG" => Ok(Self::SG),
            "OTHER" => Ok(Self::Other),
            "UNKNOWN" => Ok(Self::Unknown),
            other => anyhow::bail!("unknown region '{other}'"),
        }
    }
}

/// Where a node came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Fetched,
    Manual,
}

/// Protocol description of a node, kept in the shape it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolFields {
    /// A Surge `name = detail` line.
    Surge {
        kind: String,
        server: String,
        port: String,
        /// `key=value` parameters after the positional fields, in order.
        params: Vec<(String, String)>,
        /// Everything right of `=`, verbatim.
        detail: String,
    },
    /// A Clash proxy mapping without its `name` key.
    Clash(serde_yaml::Mapping),
}

impl ProtocolFields {
    /// Lowercased protocol type (`ss`, `vmess`, ...).
    pub fn kind(&self) -> String {
        match self {
            Self::Surge { kind, .. } => kind.to_ascii_lowercase(),
            Self::Clash(map) => yaml_str(map, "type").unwrap_or_default().to_ascii_lowercase(),
        }
    }

    pub fn server(&self) -> Option<String> {
        match self {
            Self::Surge { server, .. } => Some(server.clone()).filter(|s| !s.is_empty()),
            Self::Clash(map) => yaml_str(map, "server").filter(|s| !s.is_empty()),
        }
    }

    pub fn port(&self) -> Option<String> {
        match self {
            Self::Surge { port, .. } => Some(port.clone()).filter(|s| !s.is_empty()),
            Self::Clash(map) => yaml_str(map, "port").filter(|s| !s.is_empty()),
        }
    }

    /// Endpoint identity `type|server|port`, when all three are known.
    pub fn fingerprint(&self) -> Option<String> {
        let kind = self.kind();
        if kind.is_empty() {
            return None;
        }
        Some(format!("{kind}|{}|{}", self.server()?, self.port()?))
    }

    /// Look up a Surge parameter by key.
    pub fn param(&self, key: &str) -> Option<&str> {
        match self {
            Self::Surge { params, .. } => params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            Self::Clash(_) => None,
        }
    }
}

/// Read a scalar from a YAML mapping as a string.
pub(crate) fn yaml_str(map: &serde_yaml::Mapping, key: &str) -> Option<String> {
    match map.get(key)? {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A normalized proxy node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub region: Region,
    pub origin: Origin,
    pub is_chain: bool,
    pub fields: ProtocolFields,
    /// Display prefix of the originating subscription; empty for manual nodes.
    pub source_tag: String,
    /// Declaration index of the originating subscription.
    pub source_index: usize,
    /// Entry hop for chain nodes.
    pub via: Option<String>,
}

impl Node {
    /// A freshly parsed node whose region is not yet known.
    pub fn new(name: impl Into<String>, origin: Origin, fields: ProtocolFields) -> Self {
        Self {
            name: name.into(),
            region: Region::Unknown,
            origin,
            is_chain: false,
            fields,
            source_tag: String::new(),
            source_index: 0,
            via: None,
        }
    }

    pub fn is_exit(&self) -> bool {
        self.origin == Origin::Manual && self.name == EXIT_NODE_NAME
    }
}
