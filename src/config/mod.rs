//! `config.toml` loading and conversion into pipeline inputs.

mod schema;

pub use schema::{ChainConfig, Config, PathsConfig, Settings, SourceConfig};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::sync::{
    parse_manual, parse_rules, ChainSpec, Node, Region, RenderOptions, RuleSet, SourceSpec,
    Target, Templates, Warning,
};

/// `<config dir>/subsync/config.toml`, or `./config.toml` without a home.
pub fn default_config_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.config_dir().join("subsync").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

/// Read and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let mut config = Config::from_toml(&content)
        .with_context(|| format!("invalid config {}", path.display()))?;
    config.base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    tracing::debug!(
        "loaded config {}: {} source(s), {} group(s)",
        path.display(),
        config.sources.len(),
        config.groups.len()
    );
    Ok(config)
}

impl Config {
    /// Parse TOML content; relative paths resolve against the working
    /// directory until `base_dir` is set.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| anyhow::anyhow!("invalid config.toml: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                bail!("source name must not be empty");
            }
            if !names.insert(source.name.as_str()) {
                bail!("duplicate source name '{}'", source.name);
            }
            if !source.url.starts_with("http://") && !source.url.starts_with("https://") {
                bail!("source '{}': url must be http(s), got '{}'", source.name, source.url);
            }
        }

        let mut groups = HashSet::new();
        for group in &self.groups {
            if group.name.trim().is_empty() {
                bail!("group name must not be empty");
            }
            if !groups.insert(group.name.as_str()) {
                bail!("duplicate group '{}'", group.name);
            }
        }

        if self.settings.fetch_timeout_secs == 0 {
            bail!("fetch_timeout_secs must be greater than zero");
        }
        self.chain_spec()?;
        Ok(())
    }

    /// Check every group declaration against the rule grammar.
    pub fn check_groups(&self) -> Result<()> {
        parse_rules(&self.groups)?;
        Ok(())
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn chain_spec(&self) -> Result<ChainSpec> {
        let regions = self
            .chain
            .regions
            .iter()
            .map(|r| r.parse::<Region>())
            .collect::<Result<_>>()
            .context("invalid [chain] regions")?;
        Ok(ChainSpec {
            regions,
            suffix: self.chain.suffix.clone(),
        })
    }

    pub fn rule_set(&self) -> RuleSet {
        RuleSet {
            groups: self.groups.clone(),
            exclude_keywords: self.settings.exclude_keywords.clone(),
            rename_by_region: self.settings.rename_by_region,
        }
    }

    pub fn source_specs(&self) -> Vec<SourceSpec> {
        self.sources
            .iter()
            .map(|s| SourceSpec {
                name: s.name.clone(),
                url: s.url.clone(),
                prefix: s.prefix.clone(),
            })
            .collect()
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            managed_url: self.settings.managed_url.clone(),
            managed_interval: self.settings.managed_interval,
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.fetch_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.settings.cache_ttl_secs)
    }

    /// User-Agent sent to subscriptions; airports pick the payload format
    /// from it.
    pub fn user_agent(&self, target: Target) -> &str {
        let specific = match target {
            Target::Surge => &self.settings.user_agent_surge,
            Target::Clash => &self.settings.user_agent_clash,
        };
        specific
            .as_deref()
            .or(self.settings.user_agent.as_deref())
            .unwrap_or(match target {
                Target::Surge => Settings::default_surge_user_agent(),
                Target::Clash => Settings::default_clash_user_agent(),
            })
    }

    /// Manual nodes plus the entries that failed to parse. A configured
    /// but missing file yields no nodes.
    pub fn load_manual(&self) -> Result<(Vec<Node>, Vec<Warning>)> {
        let Some(path) = &self.paths.manual else {
            return Ok((Vec::new(), Vec::new()));
        };
        let path = self.resolve_path(path);
        if !path.exists() {
            tracing::warn!("manual node file {} not found, skipping", path.display());
            return Ok((Vec::new(), Vec::new()));
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read manual nodes {}", path.display()))?;
        let outcome = parse_manual(&content);
        let warnings = outcome
            .errors
            .into_iter()
            .inspect(|e| tracing::warn!("skipped manual entry: {e}"))
            .map(Warning::from)
            .collect();
        Ok((outcome.nodes, warnings))
    }

    pub fn load_template(&self, target: Target) -> Result<String> {
        let configured = match target {
            Target::Surge => &self.paths.surge_template,
            Target::Clash => &self.paths.clash_template,
        };
        let Some(path) = configured else {
            bail!("no {target}_template configured in [paths]");
        };
        let path = self.resolve_path(path);
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {target} template {}", path.display()))
    }

    /// Templates with only `target` loaded.
    pub fn templates_for(&self, target: Target) -> Result<Templates> {
        let mut templates = Templates::default();
        let body = self.load_template(target)?;
        match target {
            Target::Surge => templates.surge = body,
            Target::Clash => templates.clash = body,
        }
        Ok(templates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[settings]
exclude_keywords = ["expire"]
user_agent = "subsync"
user_agent_clash = "clash.meta"
managed_url = "https://sub.example.com/surge"

[[sources]]
name = "Airport_A"
url = "https://a.example.com/sub"
prefix = "[A]"

[[sources]]
name = "Airport_B"
url = "https://b.example.com/sub"

[chain]
regions = ["JP", "us"]

[[groups]]
name = "Proxy"
rule = "select, {all}"

[[groups]]
name = "Chain_Group"
rule = "select, {all filter=Chain}"

[paths]
manual = "manual.txt"
surge_template = "surge.conf"
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[1].prefix, "");
        assert_eq!(config.settings.fetch_timeout_secs, 15);
        assert_eq!(config.settings.managed_interval, 28_800);
        assert_eq!(config.chain.suffix, " Chain");

        let spec = config.chain_spec().unwrap();
        assert!(spec.regions.contains(&Region::US));
        assert!(!spec.regions.contains(&Region::KR));

        let rules = config.rule_set();
        assert_eq!(rules.groups[1].name, "Chain_Group");
        assert_eq!(rules.exclude_keywords, ["expire"]);
    }

    #[test]
    fn empty_config_is_valid() {
        let config = Config::from_toml("").unwrap();
        assert!(config.sources.is_empty());
        assert_eq!(config.chain_spec().unwrap(), ChainSpec::default());
    }

    #[test]
    fn user_agent_falls_back() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.user_agent(Target::Clash), "clash.meta");
        assert_eq!(config.user_agent(Target::Surge), "subsync");
        assert_eq!(Config::default().user_agent(Target::Surge), "Surge/5");
    }

    #[test]
    fn rejects_duplicate_sources_and_bad_urls() {
        let dup = "[[sources]]\nname = \"a\"\nurl = \"https://x\"\n[[sources]]\nname = \"a\"\nurl = \"https://y\"\n";
        assert!(Config::from_toml(dup).is_err());

        let bad = "[[sources]]\nname = \"a\"\nurl = \"ftp://x\"\n";
        let err = Config::from_toml(bad).unwrap_err();
        assert!(err.to_string().contains("http"), "{err}");
    }

    #[test]
    fn rejects_unknown_chain_region() {
        assert!(Config::from_toml("[chain]\nregions = [\"MARS\"]\n").is_err());
    }

    #[test]
    fn check_groups_reports_bad_syntax() {
        let config =
            Config::from_toml("[[groups]]\nname = \"X\"\nrule = \"select, {any}\"\n").unwrap();
        assert!(config.check_groups().is_err());
    }

    #[test]
    fn paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, SAMPLE).unwrap();

        let mut manual = std::fs::File::create(dir.path().join("manual.txt")).unwrap();
        writeln!(manual, "[Proxy]").unwrap();
        writeln!(manual, "EXIT = socks5, exit.example.com, 1080").unwrap();
        writeln!(manual, "broken line = ss").unwrap();
        std::fs::write(dir.path().join("surge.conf"), "[Proxy]\n[Proxy Group]\n").unwrap();

        let config = load_config(&config_path).unwrap();
        let (nodes, warnings) = config.load_manual().unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].is_exit());
        assert_eq!(warnings.len(), 1);

        let templates = config.templates_for(Target::Surge).unwrap();
        assert!(templates.surge.contains("[Proxy Group]"));
        assert!(config.load_template(Target::Clash).is_err());
    }

    #[test]
    fn missing_manual_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[paths]\nmanual = \"nope.txt\"\n").unwrap();
        let config = load_config(&config_path).unwrap();
        let (nodes, warnings) = config.load_manual().unwrap();
        assert!(nodes.is_empty() && warnings.is_empty());
    }
}
