//! Chain node synthesis.
//!
//! A chain node enters through an ordinary node and egresses through the
//! manual `EXIT` node. It reuses the exit's protocol fields and records the
//! entry hop in [`Node::via`]; renderers turn that into `underlying-proxy`
//! (Surge) or `dialer-proxy` (Clash).

use std::collections::{BTreeSet, HashSet};

use super::error::SynthesisCollision;
use super::node::{Node, Region};

/// Default naming suffix for chain nodes.
pub const DEFAULT_CHAIN_SUFFIX: &str = " Chain";

/// Which nodes get a chain variant and how it is named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSpec {
    pub regions: BTreeSet<Region>,
    pub suffix: String,
}

impl Default for ChainSpec {
    fn default() -> Self {
        Self {
            regions: [Region::JP, Region::KR, Region::TW].into_iter().collect(),
            suffix: DEFAULT_CHAIN_SUFFIX.to_string(),
        }
    }
}

impl ChainSpec {
    pub fn chain_name(&self, node_name: &str) -> String {
        format!("{node_name}{}", self.suffix)
    }

    fn is_eligible(&self, node: &Node) -> bool {
        !node.is_chain && !node.is_exit() && self.regions.contains(&node.region)
    }
}

/// Append chain nodes for every eligible node.
///
/// Without an exit node the input comes back unchanged. A derived name that
/// is already taken skips that one chain and is reported; the rest of the
/// batch proceeds. Chains are appended sorted by name.
pub fn synthesize(
    nodes: Vec<Node>,
    spec: &ChainSpec,
    exit: Option<&Node>,
) -> (Vec<Node>, Vec<SynthesisCollision>) {
    let Some(exit) = exit else {
        tracing::debug!("no exit node, skipping chain synthesis");
        return (nodes, Vec::new());
    };

    let mut taken: HashSet<String> = nodes.iter().map(|n| n.name.clone()).collect();
    let mut chains = Vec::new();
    let mut collisions = Vec::new();

    for node in nodes.iter().filter(|n| spec.is_eligible(n)) {
        let chain_name = spec.chain_name(&node.name);
        if !taken.insert(chain_name.clone()) {
            tracing::warn!("chain '{chain_name}' collides with an existing node, skipped");
            collisions.push(SynthesisCollision {
                node: node.name.clone(),
                chain_name,
            });
            continue;
        }
        chains.push(Node {
            name: chain_name,
            region: node.region,
            origin: node.origin,
            is_chain: true,
            fields: exit.fields.clone(),
            source_tag: node.source_tag.clone(),
            source_index: node.source_index,
            via: Some(node.name.clone()),
        });
    }

    chains.sort_by(|a, b| a.name.cmp(&b.name));
    tracing::debug!("synthesized {} chain node(s)", chains.len());

    let mut out = nodes;
    out.extend(chains);
    (out, collisions)
}
