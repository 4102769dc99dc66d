//! One sync cycle: payloads in, rendered document out.
//!
//! Every stage after fetching is a synchronous transform over owned values.
//! Sources are handled in declaration order regardless of when their fetch
//! completed, so the output only depends on the payload contents.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::chain::{synthesize, ChainSpec};
use super::classify::{classify, Namer};
use super::dedup::{canonical_sort, dedup};
use super::error::{SyncError, Warning};
use super::group::{parse_rules, resolve, select_for_target, Group, GroupDecl};
use super::node::Node;
use super::parser::{parse_subscription, SourceRef};
use super::render::{render, renders_in_surge, RenderOptions, Target, Templates};

/// The fetched body of one subscription, or the reason it has none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePayload {
    pub name: String,
    pub prefix: String,
    /// Declaration order.
    pub index: usize,
    pub body: Result<String, String>,
}

/// Naming and grouping rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    pub groups: Vec<GroupDecl>,
    pub exclude_keywords: Vec<String>,
    pub rename_by_region: bool,
}

/// Everything one run needs.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub sources: Vec<SourcePayload>,
    /// Manual nodes, `EXIT` included.
    pub manual: Vec<Node>,
    pub rules: RuleSet,
    pub chain: ChainSpec,
    pub templates: Templates,
    pub render: RenderOptions,
    pub generated_at: DateTime<Utc>,
}

/// The final normalized state handed to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    pub nodes: Vec<Node>,
    pub exit: Option<Node>,
    pub groups: Vec<Group>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SyncOutput {
    pub document: String,
    pub warnings: Vec<Warning>,
    pub snapshot: SyncSnapshot,
}

/// Run the full pipeline for one target.
///
/// Malformed group declarations and templates without insertion points
/// abort the run; everything else is reported in `warnings`.
pub fn synchronize(request: &SyncRequest, target: Target) -> Result<SyncOutput, SyncError> {
    let decls = select_for_target(&request.rules.groups, target);
    let rules = parse_rules(&decls)?;

    let mut warnings = Vec::new();
    let mut nodes = collect_fetched(&request.sources, &request.rules, target, &mut warnings);
    let (manual, exit) = split_exit(&request.manual, &mut warnings);
    nodes.extend(manual);

    canonical_sort(&mut nodes);
    let (nodes, dup_warnings) = dedup(nodes);
    warnings.extend(dup_warnings);

    let (nodes, collisions) = synthesize(nodes, &request.chain, exit.as_ref());
    warnings.extend(collisions.into_iter().map(Warning::from));

    let (groups, group_warnings) = resolve(&rules, &nodes);
    warnings.extend(group_warnings);

    let snapshot = SyncSnapshot {
        nodes,
        exit,
        groups,
        generated_at: request.generated_at,
    };
    let (document, render_warnings) = render(
        &snapshot,
        target,
        request.templates.for_target(target),
        &request.render,
    )?;
    warnings.extend(render_warnings);

    tracing::info!(
        "{target}: {} node(s), {} group(s), {} warning(s), sha256 {}",
        snapshot.nodes.len(),
        snapshot.groups.len(),
        warnings.len(),
        short_digest(&document)
    );

    Ok(SyncOutput {
        document,
        warnings,
        snapshot,
    })
}

/// Parse and name every fetched node, sources in declaration order.
///
/// Nodes the target cannot express are dropped here, so no group or chain
/// ever refers to them.
fn collect_fetched(
    sources: &[SourcePayload],
    rules: &RuleSet,
    target: Target,
    warnings: &mut Vec<Warning>,
) -> Vec<Node> {
    let mut ordered: Vec<&SourcePayload> = sources.iter().collect();
    ordered.sort_by_key(|s| s.index);

    let mut namer = Namer::new(&rules.exclude_keywords, rules.rename_by_region);
    let mut nodes = Vec::new();

    for source in ordered {
        let body = match &source.body {
            Ok(body) => body,
            Err(reason) => {
                tracing::warn!("source '{}' yielded no nodes: {reason}", source.name);
                warnings.push(Warning::Fetch {
                    source_name: source.name.clone(),
                    reason: reason.clone(),
                });
                continue;
            }
        };

        let outcome = parse_subscription(
            body,
            &SourceRef {
                name: &source.name,
                prefix: &source.prefix,
                index: source.index,
            },
        );
        if outcome.nodes.is_empty() && outcome.errors.is_empty() && !body.trim().is_empty() {
            tracing::warn!("source '{}' returned content with no recognizable nodes", source.name);
            warnings.push(Warning::NoNodes {
                source_name: source.name.clone(),
            });
        }
        for e in outcome.errors {
            tracing::warn!("skipped entry: {e}");
            warnings.push(e.into());
        }

        let before = nodes.len();
        for mut node in outcome.nodes {
            let Some((region, name)) = namer.normalize(&node.name, &source.prefix) else {
                tracing::debug!("dropping noise entry '{}'", node.name);
                continue;
            };
            node.region = region;
            node.name = name;
            if target == Target::Surge && !renders_in_surge(&node.fields) {
                let kind = node.fields.kind();
                tracing::warn!("node '{}' of type '{kind}' has no Surge form, skipped", node.name);
                warnings.push(Warning::Unrenderable {
                    node: node.name,
                    kind,
                });
                continue;
            }
            nodes.push(node);
        }
        tracing::debug!("source '{}': {} node(s)", source.name, nodes.len() - before);
    }
    nodes
}

/// Separate the exit node from the other manual nodes and classify the rest.
fn split_exit(manual: &[Node], warnings: &mut Vec<Warning>) -> (Vec<Node>, Option<Node>) {
    let mut exit = None;
    let mut rest = Vec::with_capacity(manual.len());

    for node in manual {
        if node.is_exit() {
            if exit.is_some() {
                tracing::warn!("more than one EXIT node defined, keeping first");
                warnings.push(Warning::DuplicateExit);
            } else {
                exit = Some(node.clone());
            }
            continue;
        }
        let mut node = node.clone();
        node.region = classify(&node.name).region;
        rest.push(node);
    }
    (rest, exit)
}

fn short_digest(document: &str) -> String {
    let digest = hex::encode(Sha256::digest(document.as_bytes()));
    digest[..12].to_string()
}
