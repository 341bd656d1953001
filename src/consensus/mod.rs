//! Chain state of a voting peer: vote transactions, proof-of-work
//! blocks and the longest-valid-chain rules that keep independently
//! mined histories convergent.

mod block;
mod chain;
mod genesis;
mod transaction;

pub use {
  block::{Block, MALICIOUS_PREVIOUS_HASH},
  chain::{Candidate, Chain, DEFAULT_DIFFICULTY},
  genesis::{genesis, GENESIS_TIMESTAMP},
  transaction::{timestamp_now, Transaction, TIMESTAMP_FORMAT},
};
