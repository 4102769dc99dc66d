use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::sync::render::DEFAULT_MANAGED_INTERVAL;
use crate::sync::{GroupDecl, DEFAULT_CHAIN_SUFFIX};

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;
const DEFAULT_CACHE_TTL_SECS: u64 = 180;
const DEFAULT_SURGE_USER_AGENT: &str = "Surge/5";
const DEFAULT_CLASH_USER_AGENT: &str = "Clash/1.0";

/// Top-level `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub settings: Settings,
    pub sources: Vec<SourceConfig>,
    pub chain: ChainConfig,
    pub groups: Vec<GroupDecl>,
    pub paths: PathsConfig,
    /// Directory relative paths resolve against; set by the loader.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Names containing any of these are subscription boilerplate.
    pub exclude_keywords: Vec<String>,
    /// Fallback User-Agent for both targets.
    pub user_agent: Option<String>,
    pub user_agent_surge: Option<String>,
    pub user_agent_clash: Option<String>,
    pub fetch_timeout_secs: u64,
    /// Zero disables the fetch cache.
    pub cache_ttl_secs: u64,
    pub managed_url: Option<String>,
    pub managed_interval: u64,
    pub rename_by_region: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            exclude_keywords: ["剩余", "到期", "expire", "traffic", "官网"]
                .map(String::from)
                .to_vec(),
            user_agent: None,
            user_agent_surge: None,
            user_agent_clash: None,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            managed_url: None,
            managed_interval: DEFAULT_MANAGED_INTERVAL,
            rename_by_region: false,
        }
    }
}

impl Settings {
    pub(crate) fn default_surge_user_agent() -> &'static str {
        DEFAULT_SURGE_USER_AGENT
    }

    pub(crate) fn default_clash_user_agent() -> &'static str {
        DEFAULT_CLASH_USER_AGENT
    }
}

/// One `[[sources]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    /// Prepended to every node name from this source.
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub regions: Vec<String>,
    pub suffix: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            regions: ["JP", "KR", "TW"].map(String::from).to_vec(),
            suffix: DEFAULT_CHAIN_SUFFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Manual node list in Surge line syntax.
    pub manual: Option<PathBuf>,
    pub surge_template: Option<PathBuf>,
    pub clash_template: Option<PathBuf>,
}
