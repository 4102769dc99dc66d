//! Subscription sync pipeline.
//!
//! Fetched payloads are parsed, named, deduplicated, extended with chain
//! nodes, grouped and rendered as a Surge or Clash document. See
//! [`synchronize`] for the entry point.

pub mod chain;
pub mod classify;
pub mod dedup;
pub mod error;
pub mod fetch;
pub mod group;
pub mod node;
pub mod parser;
pub mod pipeline;
pub mod render;

pub use chain::{synthesize, ChainSpec, DEFAULT_CHAIN_SUFFIX};
pub use classify::{classify, Classification, Namer};
pub use dedup::{canonical_sort, dedup};
pub use error::{ParseError, SyncError, SynthesisCollision, Warning};
pub use fetch::{fetch_all, HttpFetcher, SourceFetcher, SourceSpec};
pub use group::{parse_rule, parse_rules, resolve, select_for_target, Group, GroupDecl, GroupKind, GroupRule, Member};
pub use node::{Node, Origin, ProtocolFields, Region, EXIT_NODE_NAME};
pub use parser::{decode_payload, parse_manual, parse_subscription, ParseOutcome, SourceRef};
pub use pipeline::{synchronize, RuleSet, SourcePayload, SyncOutput, SyncRequest, SyncSnapshot};
pub use render::{render, RenderOptions, Target, Templates};
