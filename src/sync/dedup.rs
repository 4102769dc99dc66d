//! Canonical ordering and duplicate collapsing.

use std::collections::HashMap;

use super::error::Warning;
use super::node::{Node, Origin};

/// Sort tier: fetched, then manual, then chain-derived.
fn tier(node: &Node) -> u8 {
    match (node.is_chain, node.origin) {
        (true, _) => 2,
        (false, Origin::Fetched) => 0,
        (false, Origin::Manual) => 1,
    }
}

/// Order nodes canonically: fetched by source declaration order then name,
/// manual by name, chains by name. Stable, so equal keys keep input order.
pub fn canonical_sort(nodes: &mut [Node]) {
    nodes.sort_by(|a, b| {
        tier(a)
            .cmp(&tier(b))
            .then_with(|| source_key(a).cmp(&source_key(b)))
            .then_with(|| a.name.cmp(&b.name))
    });
}

fn source_key(node: &Node) -> usize {
    if tier(node) == 0 {
        node.source_index
    } else {
        0
    }
}

/// Collapse nodes sharing a name or an endpoint; the first one wins.
///
/// Expects canonically sorted input. Name clashes with different fields and
/// every endpoint clash are reported; identical repeats are dropped quietly.
pub fn dedup(nodes: Vec<Node>) -> (Vec<Node>, Vec<Warning>) {
    let mut kept: Vec<Node> = Vec::with_capacity(nodes.len());
    let mut by_name: HashMap<String, usize> = HashMap::new();
    let mut by_endpoint: HashMap<String, usize> = HashMap::new();
    let mut warnings = Vec::new();

    for node in nodes {
        if let Some(&idx) = by_name.get(&node.name) {
            if kept[idx].fields != node.fields {
                tracing::warn!("duplicate node '{}' with different fields, keeping first", node.name);
                warnings.push(Warning::DuplicateName { name: node.name });
            }
            continue;
        }

        let fingerprint = node.fields.fingerprint();
        if let Some(idx) = fingerprint.as_ref().and_then(|fp| by_endpoint.get(fp)) {
            let kept_name = kept[*idx].name.clone();
            tracing::warn!("'{}' shares an endpoint with '{kept_name}', dropping", node.name);
            warnings.push(Warning::DuplicateEndpoint {
                kept: kept_name,
                dropped: node.name,
            });
            continue;
        }

        let idx = kept.len();
        by_name.insert(node.name.clone(), idx);
        if let Some(fp) = fingerprint {
            by_endpoint.insert(fp, idx);
        }
        kept.push(node);
    }

    (kept, warnings)
}
