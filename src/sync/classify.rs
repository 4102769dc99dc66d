//! Region detection and display-name normalization.
//!
//! Regions come from an ordered signature table: the first signature with a
//! matching keyword wins. ASCII keywords match case-insensitively on word
//! boundaries (`HK-01` matches `HK`, `HKT` does not); other keywords match
//! as plain substrings.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::node::Region;

/// One row of the signature table.
struct RegionSignature {
    region: Region,
    /// Code used when renaming (`UK 01` is still `Region::Other`).
    code: &'static str,
    keywords: &'static [&'static str],
}

const SIGNATURES: &[RegionSignature] = &[
    RegionSignature { region: Region::HK, code: "HK", keywords: &["Hong Kong", "HK", "HongKong", "香港"] },
    RegionSignature { region: Region::TW, code: "TW", keywords: &["Taiwan", "TW", "Taipei", "台湾"] },
    RegionSignature { region: Region::JP, code: "JP", keywords: &["Japan", "JP", "Tokyo", "Osaka", "日本"] },
    RegionSignature { region: Region::SG, code: "SG", keywords: &["Singapore", "SG", "新加坡"] },
    RegionSignature { region: Region::US, code: "US", keywords: &["United States", "US", "America", "USA", "美国"] },
    RegionSignature { region: Region::KR, code: "KR", keywords: &["Korea", "KR", "Seoul", "韩国"] },
    RegionSignature { region: Region::Other, code: "UK", keywords: &["United Kingdom", "UK", "London", "英国"] },
    RegionSignature { region: Region::Other, code: "DE", keywords: &["Germany", "DE", "Berlin", "德国"] },
    RegionSignature { region: Region::Other, code: "FR", keywords: &["France", "FR", "Paris", "法国"] },
    RegionSignature { region: Region::Other, code: "CA", keywords: &["Canada", "CA", "Montreal", "Toronto", "加拿大"] },
    RegionSignature { region: Region::Other, code: "AU", keywords: &["Australia", "AU", "Sydney", "Melbourne", "澳大利亚"] },
    RegionSignature { region: Region::Other, code: "NL", keywords: &["Netherlands", "NL", "Amsterdam", "荷兰"] },
    RegionSignature { region: Region::Other, code: "IN", keywords: &["India", "IN", "Mumbai", "New Delhi", "印度"] },
    RegionSignature { region: Region::Other, code: "RU", keywords: &["Russia", "RU", "Moscow", "俄罗斯"] },
    RegionSignature { region: Region::Other, code: "TR", keywords: &["Turkey", "TR", "Istanbul", "土耳其"] },
];

enum Matcher {
    Word(Regex),
    Substring(&'static str),
}

impl Matcher {
    fn matches(&self, name: &str) -> bool {
        match self {
            Self::Word(re) => re.is_match(name),
            Self::Substring(kw) => name.contains(kw),
        }
    }
}

static MATCHERS: LazyLock<Vec<(usize, Matcher)>> = LazyLock::new(|| {
    SIGNATURES
        .iter()
        .enumerate()
        .flat_map(|(idx, sig)| sig.keywords.iter().map(move |kw| (idx, *kw)))
        .filter_map(|(idx, kw)| {
            let matcher = if kw.is_ascii() {
                match Regex::new(&format!(r"(?i)\b{}\b", regex::escape(kw))) {
                    Ok(re) => Matcher::Word(re),
                    Err(e) => {
                        tracing::error!("invalid region keyword '{kw}': {e}");
                        return None;
                    }
                }
            } else {
                Matcher::Substring(kw)
            };
            Some((idx, matcher))
        })
        .collect()
});

/// Result of matching a name against the signature table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub region: Region,
    /// Code for renaming; `None` when nothing matched.
    pub code: Option<&'static str>,
}

/// Classify a raw node name. A leading `[tag]` is ignored.
pub fn classify(raw_name: &str) -> Classification {
    let (_, bare) = split_tag(raw_name);
    MATCHERS
        .iter()
        .find(|(_, m)| m.matches(bare))
        .map(|(idx, _)| Classification {
            region: SIGNATURES[*idx].region,
            code: Some(SIGNATURES[*idx].code),
        })
        .unwrap_or(Classification {
            region: Region::Unknown,
            code: None,
        })
}

/// Split `"[FP] Japan 01"` into `("[FP]", "Japan 01")`.
fn split_tag(name: &str) -> (&str, &str) {
    let name = name.trim();
    if name.starts_with('[') {
        if let Some(end) = name.find(']') {
            return (&name[..=end], name[end + 1..].trim());
        }
    }
    ("", name)
}

/// Per-run name normalizer.
///
/// Holds the exclude keywords and, when renaming by region, the counters
/// that number nodes `JP 01`, `JP 02`, ... in encounter order. Create one
/// per sync run.
pub struct Namer {
    exclude: Vec<String>,
    rename_by_region: bool,
    counters: HashMap<(String, &'static str), usize>,
}

impl Namer {
    pub fn new(exclude_keywords: &[String], rename_by_region: bool) -> Self {
        Self {
            exclude: exclude_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            rename_by_region,
            counters: HashMap::new(),
        }
    }

    /// Whether the name is subscription boilerplate (traffic left, expiry).
    pub fn is_noise(&self, raw_name: &str) -> bool {
        let lower = raw_name.to_lowercase();
        self.exclude.iter().any(|k| lower.contains(k.as_str()))
    }

    /// Region and final display name for a fetched node, or `None` if the
    /// entry is noise. `prefix` is the source's display prefix.
    pub fn normalize(&mut self, raw_name: &str, prefix: &str) -> Option<(Region, String)> {
        if self.is_noise(raw_name) {
            return None;
        }
        let class = classify(raw_name);

        let base = if self.rename_by_region {
            let (tag, _) = split_tag(raw_name);
            let code = class.code.unwrap_or("other");
            let counter = self.counters.entry((tag.to_string(), code)).or_insert(0);
            *counter += 1;
            if tag.is_empty() {
                format!("{code} {counter:02}")
            } else {
                format!("{tag} {code} {counter:02}")
            }
        } else {
            raw_name.trim().to_string()
        };

        let prefix = prefix.trim();
        let name = if prefix.is_empty() {
            base
        } else {
            format!("{prefix} {base}")
        };
        Some((class.region, name))
    }
}
