//! Read interface consumed by UIs.
//!
//! The core never pushes rendering concerns outward; a UI polls
//! these snapshot types (or serializes them to JSON) and draws
//! whatever it wants. Everything here is a deep copy, detached from
//! the live chain.

use {
  crate::{consensus::Block, network::PeerState},
  serde::Serialize,
  std::collections::BTreeMap,
};

/// Point-in-time copy of the whole chain.
#[derive(Debug, Clone, Serialize)]
pub struct ChainSnapshot {
  pub height: usize,
  pub blocks: Vec<Block>,
}

/// Everything a UI needs to render one node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
  pub endpoint: String,
  pub state: PeerState,
  pub peers: Vec<String>,
  pub height: usize,
  pub tally: BTreeMap<String, u64>,
}
