//! End-to-end runs of the sync pipeline.

use std::time::Duration;

use base64::Engine;
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use subsync::sync::{
    fetch_all, parse_manual, synchronize, ChainSpec, GroupDecl, HttpFetcher, Region,
    RenderOptions, RuleSet, SourcePayload, SourceSpec, SyncRequest, Target, Templates, Warning,
};

const SURGE_TEMPLATE: &str = "[General]\nloglevel = notify\n\n[Proxy]\n\n[Proxy Group]\n\n[Rule]\nFINAL,Proxy\n";
const CLASH_TEMPLATE: &str = "port: 7890\nproxies: []\nproxy-groups: []\nrules:\n  - MATCH,Proxy\n";

const AIRPORT_A: &str = r#"
proxies:
  - name: HK-01
    type: ss
    server: hk.example.com
    port: 8388
    cipher: aes-256-gcm
    password: pw-hk
  - name: JP-02
    type: trojan
    server: jp.example.com
    port: 443
    password: pw-jp
    sni: jp.example.com
"#;

const EXIT_LINE: &str = "EXIT = socks5, exit.example.com, 1080, username=u, password=p";

fn decl(name: &str, rule: &str) -> GroupDecl {
    GroupDecl {
        name: name.into(),
        rule: rule.into(),
    }
}

fn source(index: usize, name: &str, body: &str) -> SourcePayload {
    SourcePayload {
        name: name.into(),
        prefix: String::new(),
        index,
        body: Ok(body.into()),
    }
}

fn request(sources: Vec<SourcePayload>, manual: &str, groups: Vec<GroupDecl>) -> SyncRequest {
    SyncRequest {
        sources,
        manual: parse_manual(manual).nodes,
        rules: RuleSet {
            groups,
            exclude_keywords: vec!["expire".into(), "traffic".into()],
            rename_by_region: false,
        },
        chain: ChainSpec::default(),
        templates: Templates {
            surge: SURGE_TEMPLATE.into(),
            clash: CLASH_TEMPLATE.into(),
        },
        render: RenderOptions {
            managed_url: Some("https://sub.example.com/config".into()),
            ..Default::default()
        },
        generated_at: Utc.with_ymd_and_hms(2026, 10, 19, 4, 0, 0).unwrap(),
    }
}

fn scenario_groups() -> Vec<GroupDecl> {
    vec![
        decl("Proxy", "select, {all}"),
        decl("Chain_Group", "select, {all filter=Chain}"),
    ]
}

fn names(out: &subsync::SyncOutput) -> Vec<&str> {
    out.snapshot.nodes.iter().map(|n| n.name.as_str()).collect()
}

fn group<'a>(out: &'a subsync::SyncOutput, name: &str) -> Vec<&'a str> {
    out.snapshot
        .groups
        .iter()
        .find(|g| g.name == name)
        .map(|g| g.members.iter().map(String::as_str).collect())
        .unwrap_or_default()
}

/// Three sources with overlapping, noisy and multi-region content.
fn busy_sources() -> Vec<SourcePayload> {
    vec![
        source(0, "A", AIRPORT_A),
        source(
            1,
            "B",
            "[Proxy]\nTraffic: 10GB left = ss, info.example.com, 1, password=x\n\
             KR Seoul = vmess, kr.example.com, 443, username=id\n\
             TW-01 = ss, tw.example.com, 443, password=x\n\
             HK-01 = ss, hk-b.example.com, 443, password=x\n",
        ),
        source(2, "C", "US West = http, us.example.com, 80\nTokyo 3 = ss, tokyo.example.com, 443, password=y\n"),
    ]
}

// ── Scenarios ───────────────────────────────────────────────────────

#[test]
fn exit_present_synthesizes_chain_and_groups() {
    let req = request(vec![source(0, "Airport_A", AIRPORT_A)], EXIT_LINE, scenario_groups());
    let out = synchronize(&req, Target::Surge).unwrap();

    assert_eq!(names(&out), ["HK-01", "JP-02", "JP-02 Chain"]);
    assert_eq!(group(&out, "Proxy"), ["HK-01", "JP-02", "JP-02 Chain"]);
    assert_eq!(group(&out, "Chain_Group"), ["JP-02 Chain"]);
    assert!(out.warnings.is_empty(), "{:?}", out.warnings);

    assert!(out.document.contains(
        "JP-02 Chain = socks5, exit.example.com, 1080, username=u, password=p, underlying-proxy=JP-02\n"
    ));
    assert!(out.document.contains("Proxy = select, HK-01, JP-02, JP-02 Chain\n"));
    assert!(!out.document.contains("EXIT ="));
}

#[test]
fn exit_absent_leaves_chain_group_empty() {
    let req = request(vec![source(0, "Airport_A", AIRPORT_A)], "", scenario_groups());
    let out = synchronize(&req, Target::Surge).unwrap();

    assert_eq!(names(&out), ["HK-01", "JP-02"]);
    assert!(out.snapshot.nodes.iter().all(|n| !n.is_chain));
    assert!(group(&out, "Chain_Group").is_empty());
    assert_eq!(
        out.warnings,
        vec![Warning::EmptyGroup {
            group: "Chain_Group".into()
        }]
    );
    assert!(out.document.contains("Chain_Group = select, DIRECT\n"));
}

#[test]
fn same_name_across_sources_collapses() {
    let first = source(0, "A", "HK-01 = ss, a.example.com, 443, password=x");
    let differing = source(1, "B", "HK-01 = ss, b.example.com, 443, password=x");
    let out = synchronize(
        &request(vec![first.clone(), differing], "", scenario_groups()),
        Target::Clash,
    )
    .unwrap();
    assert_eq!(names(&out), ["HK-01"]);
    assert_eq!(
        out.snapshot.nodes[0].fields.server().as_deref(),
        Some("a.example.com")
    );
    assert!(out.warnings.contains(&Warning::DuplicateName {
        name: "HK-01".into()
    }));

    let identical = source(1, "B", "HK-01 = ss, a.example.com, 443, password=x");
    let out = synchronize(
        &request(vec![first, identical], "", vec![decl("Proxy", "select, {all}")]),
        Target::Clash,
    )
    .unwrap();
    assert_eq!(names(&out), ["HK-01"]);
    assert!(out.warnings.is_empty(), "{:?}", out.warnings);
}

// ── Properties ──────────────────────────────────────────────────────

#[test]
fn repeated_runs_are_byte_identical() {
    for target in [Target::Surge, Target::Clash] {
        let req = request(busy_sources(), EXIT_LINE, scenario_groups());
        let first = synchronize(&req, target).unwrap();
        let second = synchronize(&req, target).unwrap();
        assert_eq!(first.document, second.document, "{target}");
        assert_eq!(first.warnings, second.warnings);
    }
}

#[test]
fn fetch_completion_order_does_not_matter() {
    let forward = request(busy_sources(), EXIT_LINE, scenario_groups());
    let mut reversed = forward.clone();
    reversed.sources.reverse();
    let mut rotated = forward.clone();
    rotated.sources.rotate_left(1);

    for target in [Target::Surge, Target::Clash] {
        let expected = synchronize(&forward, target).unwrap().document;
        assert_eq!(synchronize(&reversed, target).unwrap().document, expected);
        assert_eq!(synchronize(&rotated, target).unwrap().document, expected);
    }
}

#[test]
fn every_eligible_node_has_a_chain() {
    let req = request(busy_sources(), EXIT_LINE, scenario_groups());
    let out = synchronize(&req, Target::Surge).unwrap();
    let eligible = [Region::JP, Region::KR, Region::TW];

    let bases: Vec<_> = out
        .snapshot
        .nodes
        .iter()
        .filter(|n| !n.is_chain && eligible.contains(&n.region))
        .collect();
    assert!(bases.len() >= 4, "{:?}", names(&out));
    for node in bases {
        let chain_name = format!("{} Chain", node.name);
        let chain = out
            .snapshot
            .nodes
            .iter()
            .find(|n| n.name == chain_name)
            .unwrap_or_else(|| panic!("missing {chain_name}"));
        assert!(chain.is_chain);
        assert_eq!(chain.via.as_deref(), Some(node.name.as_str()));
    }

    let without_exit = request(busy_sources(), "", scenario_groups());
    let out = synchronize(&without_exit, Target::Surge).unwrap();
    assert!(out.snapshot.nodes.iter().all(|n| !n.is_chain));
}

#[test]
fn filter_and_exclude_match_substrings() {
    let keywords = ["hk", "Chain", "0", "seoul", "zz"];
    let mut groups = Vec::new();
    for (i, k) in keywords.iter().enumerate() {
        groups.push(decl(&format!("F{i}"), &format!("select, {{all filter={k}}}")));
        groups.push(decl(&format!("X{i}"), &format!("select, {{all exclude={k}}}")));
    }
    let out = synchronize(&request(busy_sources(), EXIT_LINE, groups), Target::Surge).unwrap();

    for (i, k) in keywords.iter().enumerate() {
        let k = k.to_lowercase();
        let filtered = group(&out, &format!("F{i}"));
        let excluded = group(&out, &format!("X{i}"));
        for node in &out.snapshot.nodes {
            let hit = node.name.to_lowercase().contains(&k);
            assert_eq!(filtered.contains(&node.name.as_str()), hit, "filter={k} {}", node.name);
            assert_eq!(excluded.contains(&node.name.as_str()), !hit, "exclude={k} {}", node.name);
        }
    }
}

#[test]
fn final_names_are_unique() {
    let mut sources = busy_sources();
    sources.push(source(3, "D", AIRPORT_A));
    let out = synchronize(
        &request(sources, &format!("{EXIT_LINE}\nHK-01 = ss, manual.example.com, 1, password=m"), scenario_groups()),
        Target::Clash,
    )
    .unwrap();

    let mut seen = std::collections::HashSet::new();
    for node in &out.snapshot.nodes {
        assert!(seen.insert(node.name.as_str()), "duplicate {}", node.name);
    }
    // Noise entries never reach the node set.
    assert!(!names(&out).iter().any(|n| n.to_lowercase().contains("traffic")));
}

#[test]
fn clash_document_carries_dialer_proxy() {
    let req = request(vec![source(0, "Airport_A", AIRPORT_A)], EXIT_LINE, scenario_groups());
    let out = synchronize(&req, Target::Clash).unwrap();

    let body = out
        .document
        .split_once('\n')
        .map(|(header, rest)| {
            assert_eq!(header, "# Last Updated: 2026-10-19 12:00:00 (UTC+8)");
            rest
        })
        .unwrap();
    let doc: serde_yaml::Value = serde_yaml::from_str(body).unwrap();
    let proxies = doc["proxies"].as_sequence().unwrap();
    assert_eq!(proxies.len(), 3);
    assert_eq!(proxies[2]["name"].as_str(), Some("JP-02 Chain"));
    assert_eq!(proxies[2]["type"].as_str(), Some("socks5"));
    assert_eq!(proxies[2]["dialer-proxy"].as_str(), Some("JP-02"));
    assert_eq!(doc["rules"][0].as_str(), Some("MATCH,Proxy"));
}

#[test]
fn target_specific_groups_override() {
    let groups = vec![
        decl("Proxy", "select, {all}"),
        decl("Proxy_clash", "url-test, {all exclude=Chain}, url=http://cp.cloudflare.com, interval=300"),
    ];
    let req = request(vec![source(0, "Airport_A", AIRPORT_A)], EXIT_LINE, groups);

    let surge = synchronize(&req, Target::Surge).unwrap();
    assert_eq!(group(&surge, "Proxy"), ["HK-01", "JP-02", "JP-02 Chain"]);

    let clash = synchronize(&req, Target::Clash).unwrap();
    assert_eq!(clash.snapshot.groups.len(), 1);
    assert_eq!(group(&clash, "Proxy"), ["HK-01", "JP-02"]);
    assert!(clash.document.contains("interval: 300"));
}

// ── Fetch + sync ────────────────────────────────────────────────────

#[tokio::test]
async fn fetched_base64_subscription_renders() {
    let server = MockServer::start().await;
    let payload = base64::engine::general_purpose::STANDARD.encode(
        "HK-01 = ss, hk.example.com, 443, password=x\nJP-02 = ss, jp.example.com, 443, password=y\n",
    );
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(payload))
        .mount(&server)
        .await;

    let sources = vec![
        SourceSpec {
            name: "Airport_A".into(),
            url: format!("{}/sub", server.uri()),
            prefix: String::new(),
        },
        SourceSpec {
            name: "Dead".into(),
            url: "http://127.0.0.1:9/sub".into(),
            prefix: String::new(),
        },
    ];
    let fetcher = HttpFetcher::new("Surge/5", Duration::from_secs(5), Duration::ZERO).unwrap();
    let payloads = fetch_all(&sources, &fetcher, Duration::from_secs(5), &CancellationToken::new()).await;

    let out = synchronize(&request(payloads, EXIT_LINE, scenario_groups()), Target::Surge).unwrap();
    assert_eq!(names(&out), ["HK-01", "JP-02", "JP-02 Chain"]);
    assert!(out
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::Fetch { source_name, .. } if source_name == "Dead")));
}
