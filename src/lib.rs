//! Merge proxy subscriptions into Surge and Clash configuration documents.

pub mod config;
pub mod sync;

pub use config::Config;
pub use sync::{synchronize, SyncError, SyncOutput, SyncRequest, Target, Warning};
