//! Voting chain state.
//!
//! Every peer owns exactly one [`Chain`]: the totally-ordered list of
//! blocks rooted at the canonical genesis, plus a scratch pool of
//! unconfirmed transactions awaiting mining. Peers never exchange
//! chain references, only snapshots, so all mutation happens through
//! the handful of operations defined here.
//!
//! Convergence between peers relies on two rules:
//!
//! 1. Proof of work: a block is only admissible when its declared
//!    hash matches its contents and carries the required number of
//!    leading zero hex digits. Rewriting history means redoing the
//!    work for every descendant block.
//!
//! 2. Longest valid chain: when histories diverge (two miners extend
//!    the same height at once), each peer keeps its own version until
//!    a strictly longer valid chain shows up, at which point the
//!    local one is discarded wholesale.
//!
//! The tally is a pure read over the chain: first vote per voter id
//! in chain order wins, later votes by the same voter are discounted.
//! Deduplication is deliberately not applied at admission time, so a
//! chain may carry redundant votes.

use {
  super::{
    block::{Block, MALICIOUS_PREVIOUS_HASH},
    genesis::genesis,
    transaction::{timestamp_now, Transaction},
  },
  std::collections::{BTreeMap, HashSet},
  tracing::{debug, warn},
};

/// Leading zero hex digits required of block hashes unless the
/// operator tunes it. Two keeps demo mining instant; production
/// tests run at four.
pub const DEFAULT_DIFFICULTY: usize = 2;

/// A block under construction, detached from the chain so the nonce
/// search can run without holding the chain lock. Sealing happens on
/// a worker; the result is handed back to [`Chain::commit`], which
/// re-checks the parent under the lock.
#[derive(Debug, Clone)]
pub struct Candidate {
  block: Block,
}

impl Candidate {
  /// Grinds the nonce until the block satisfies the difficulty
  /// target. CPU-bound by design.
  pub fn seal(mut self, difficulty: usize) -> Block {
    self.block.seal(difficulty);
    self.block
  }
}

/// The append-only ledger of vote transactions plus the unconfirmed
/// pool. See the module docs for the consensus rules it enforces.
#[derive(Debug, Clone)]
pub struct Chain {
  blocks: Vec<Block>,
  pending: Vec<Transaction>,
  difficulty: usize,
}

impl Default for Chain {
  fn default() -> Self {
    Self::new(DEFAULT_DIFFICULTY)
  }
}

impl Chain {
  /// A fresh chain containing only the canonical genesis block.
  pub fn new(difficulty: usize) -> Self {
    Self {
      blocks: vec![genesis()],
      pending: Vec::new(),
      difficulty,
    }
  }

  pub fn difficulty(&self) -> usize {
    self.difficulty
  }

  /// Number of blocks, genesis included. Never zero.
  pub fn len(&self) -> usize {
    self.blocks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blocks.is_empty()
  }

  /// The current tail. The chain always contains at least genesis.
  pub fn last(&self) -> &Block {
    self.blocks.last().expect("chain always contains genesis")
  }

  pub fn block_at(&self, index: usize) -> Option<&Block> {
    self.blocks.get(index)
  }

  /// Unconfirmed transactions awaiting mining. Not observable in the
  /// chain and never counted by [`Chain::tally`].
  pub fn pending(&self) -> &[Transaction] {
    &self.pending
  }

  /// Appends a transaction to the unconfirmed pool. No validation
  /// beyond its type; double votes are tolerated here and resolved
  /// at tally time.
  pub fn add_pending(&mut self, tx: Transaction) {
    self.pending.push(tx);
  }

  /// Prepares a block candidate carrying the current pool on top of
  /// the current tail, or `None` when there is nothing to mine. The
  /// pool is left untouched until the sealed block commits.
  pub fn candidate(&self) -> Option<Candidate> {
    if self.pending.is_empty() {
      return None;
    }
    let last = self.last();
    Some(Candidate {
      block: Block::new(
        last.index + 1,
        self.pending.clone(),
        timestamp_now(),
        last.hash.clone(),
      ),
    })
  }

  /// Re-bases a sealed block whose parent got superseded while it
  /// was being mined: same transactions, fresh header on the current
  /// tail.
  pub fn rebase(&self, sealed: Block) -> Candidate {
    let last = self.last();
    Candidate {
      block: Block::new(
        last.index + 1,
        sealed.transactions,
        timestamp_now(),
        last.hash.clone(),
      ),
    }
  }

  /// Commits a locally sealed block. Fails by handing the block back
  /// when the tail moved while it was being sealed; the caller
  /// re-bases and seals again. On success the included transactions
  /// leave the pool and a clone of the appended block is returned
  /// for broadcast.
  pub fn commit(&mut self, sealed: Block) -> Result<Block, Block> {
    let last = self.last();
    if sealed.previous_hash != last.hash || sealed.index != last.index + 1 {
      return Err(sealed);
    }
    self
      .pending
      .retain(|tx| !sealed.transactions.contains(tx));
    self.blocks.push(sealed);
    Ok(self.last().clone())
  }

  /// Mines the unconfirmed pool into a new tail block. Returns false
  /// when the pool is empty. This is the synchronous composition of
  /// [`Chain::candidate`], [`Candidate::seal`] and [`Chain::commit`];
  /// peers run the same three steps with the seal on a worker.
  pub fn mine(&mut self) -> bool {
    let candidate = match self.candidate() {
      Some(candidate) => candidate,
      None => return false,
    };
    let sealed = candidate.seal(self.difficulty);
    // the tail cannot have moved, nothing else holds this chain
    self.commit(sealed).is_ok()
  }

  /// Mines like [`Chain::mine`], then corrupts the fresh tail's
  /// parent link with a fixed sentinel. The resulting chain
  /// self-describes as invalid; receivers must reject the broadcast
  /// block and refuse the chain during sync. Reachable only through
  /// the peer binary's explicit adversarial flag.
  pub fn mine_malicious(&mut self) -> bool {
    if !self.mine() {
      return false;
    }
    let last = self
      .blocks
      .last_mut()
      .expect("chain always contains genesis");
    last.previous_hash = MALICIOUS_PREVIOUS_HASH.to_owned();
    true
  }

  /// Attempts to append an externally supplied block. Succeeds iff it
  /// links to the current tail, advances the index by one and its
  /// declared hash is a valid proof. On failure the chain is left
  /// unchanged. Genesis blocks are never accepted through this path.
  pub fn add_block(&mut self, block: Block) -> bool {
    if block.index == 0 {
      warn!("rejecting genesis {block} received over the network");
      return false;
    }
    let last = self.last();
    if block.previous_hash != last.hash {
      debug!("{block} does not link to local tail {last}");
      return false;
    }
    if block.index != last.index + 1 {
      debug!("{block} does not advance local height {}", last.index);
      return false;
    }
    if !block.is_valid_proof(self.difficulty) {
      warn!("invalid proof for {block}");
      return false;
    }
    self.blocks.push(block);
    true
  }

  /// Validates a full externally supplied chain: empty is valid, a
  /// non-empty chain must start at the canonical genesis, and every
  /// subsequent block must link to its predecessor, advance the index
  /// by one and carry a valid proof. Declared hashes are checked as
  /// declared, so any mutation of block contents is caught here.
  pub fn is_valid_chain(&self, chain: &[Block]) -> bool {
    let first = match chain.first() {
      Some(first) => first,
      None => return true,
    };
    if *first != genesis() {
      debug!("candidate chain is not rooted at genesis");
      return false;
    }
    chain.windows(2).all(|pair| {
      let (prev, block) = (&pair[0], &pair[1]);
      if block.previous_hash != prev.hash {
        debug!("{block} breaks the parent link at height {}", block.index);
        return false;
      }
      if block.index != prev.index + 1 {
        debug!("{block} does not follow height {}", prev.index);
        return false;
      }
      if !block.is_valid_proof(self.difficulty) {
        debug!("{block} carries an invalid proof");
        return false;
      }
      true
    })
  }

  /// Replaces the local chain iff the candidate is strictly longer
  /// and valid. Returns whether the replacement happened. The pool
  /// is intentionally left alone: unconfirmed votes survive a sync.
  pub fn replace_if_better(&mut self, candidate: Vec<Block>) -> bool {
    if candidate.len() <= self.blocks.len() {
      debug!(
        "candidate chain of {} blocks does not beat local {}",
        candidate.len(),
        self.blocks.len()
      );
      return false;
    }
    if !self.is_valid_chain(&candidate) {
      warn!("rejecting invalid candidate chain of {} blocks", candidate.len());
      return false;
    }
    self.blocks = candidate;
    true
  }

  /// Vote totals per candidate. Skips genesis; the first vote
  /// observed for a voter id in chain order counts, later votes by
  /// the same voter are discounted.
  pub fn tally(&self) -> BTreeMap<String, u64> {
    let mut tally = BTreeMap::new();
    let mut voters = HashSet::new();
    for block in self.blocks.iter().skip(1) {
      for tx in &block.transactions {
        if !voters.insert(tx.voter_id.clone()) {
          continue;
        }
        *tally.entry(tx.candidate_id.clone()).or_insert(0) += 1;
      }
    }
    tally
  }

  /// A deep, immutable copy of the chain for UIs and for answering
  /// chain sync requests.
  pub fn snapshot(&self) -> Vec<Block> {
    self.blocks.clone()
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn vote(voter: &str, candidate: &str) -> Transaction {
    Transaction::new(voter, candidate)
  }

  #[test]
  fn new_chain_is_just_genesis() {
    let chain = Chain::new(2);
    assert_eq!(chain.len(), 1);
    assert_eq!(*chain.last(), genesis());
    assert!(chain.is_valid_chain(&chain.snapshot()));
  }

  #[test]
  fn mining_an_empty_pool_is_a_no_op() {
    let mut chain = Chain::new(2);
    assert!(!chain.mine());
    assert_eq!(chain.len(), 1);
  }

  #[test]
  fn single_node_mining_deduplicates_the_tally() {
    let mut chain = Chain::new(2);
    chain.add_pending(vote("v1", "A"));
    chain.add_pending(vote("v2", "B"));
    chain.add_pending(vote("v1", "A"));
    assert!(chain.mine());

    assert_eq!(chain.len(), 2);
    assert!(chain.pending().is_empty());
    // the chain keeps the redundant v1 vote, the tally discounts it
    assert_eq!(chain.last().transactions.len(), 3);

    let tally = chain.tally();
    assert_eq!(tally.get("A"), Some(&1));
    assert_eq!(tally.get("B"), Some(&1));
    assert_eq!(tally.len(), 2);
  }

  #[test]
  fn first_vote_in_chain_order_wins() {
    let mut chain = Chain::new(2);
    chain.add_pending(vote("v1", "A"));
    assert!(chain.mine());
    chain.add_pending(vote("v1", "B"));
    assert!(chain.mine());

    assert_eq!(chain.len(), 3);
    let tally = chain.tally();
    assert_eq!(tally.get("A"), Some(&1));
    assert_eq!(tally.get("B"), None);
  }

  #[test]
  fn mined_blocks_satisfy_the_chain_invariants() {
    let mut chain = Chain::new(2);
    for i in 0..3 {
      chain.add_pending(vote(&format!("v{i}"), "A"));
      assert!(chain.mine());
    }
    let blocks = chain.snapshot();
    for (i, pair) in blocks.windows(2).enumerate() {
      assert_eq!(pair[1].previous_hash, pair[0].hash);
      assert_eq!(pair[1].index as usize, i + 1);
      assert!(pair[1].is_valid_proof(chain.difficulty()));
    }
  }

  #[test]
  fn add_block_accepts_a_remote_extension() {
    let mut miner = Chain::new(2);
    let mut receiver = Chain::new(2);
    miner.add_pending(vote("v1", "A"));
    assert!(miner.mine());

    let block = miner.last().clone();
    assert!(receiver.add_block(block));
    assert_eq!(receiver.len(), 2);
    assert_eq!(receiver.last().hash, miner.last().hash);
  }

  #[test]
  fn add_block_rejects_broken_links_and_bad_proofs() {
    let mut miner = Chain::new(2);
    let mut receiver = Chain::new(2);
    miner.add_pending(vote("v1", "A"));
    assert!(miner.mine());
    let good = miner.last().clone();

    // genesis never comes in through this path
    assert!(!receiver.add_block(genesis()));

    let mut broken_link = good.clone();
    broken_link.previous_hash = "f".repeat(64);
    assert!(!receiver.add_block(broken_link));

    let mut wrong_index = good.clone();
    wrong_index.index = 5;
    assert!(!receiver.add_block(wrong_index));

    let mut tampered = good.clone();
    tampered.transactions[0].candidate_id = "B".into();
    assert!(!receiver.add_block(tampered));

    assert_eq!(receiver.len(), 1);
    assert!(receiver.add_block(good));
  }

  #[test]
  fn malicious_mining_poisons_the_chain() {
    let mut attacker = Chain::new(2);
    let mut receiver = Chain::new(2);
    attacker.add_pending(vote("v1", "A"));
    assert!(attacker.mine_malicious());

    let block = attacker.last().clone();
    assert_eq!(block.previous_hash, MALICIOUS_PREVIOUS_HASH);
    assert!(!receiver.add_block(block));
    assert_eq!(receiver.len(), 1);
    assert!(!receiver.is_valid_chain(&attacker.snapshot()));
  }

  #[test]
  fn tampering_with_a_committed_vote_is_detected() {
    let mut chain = Chain::new(2);
    chain.add_pending(vote("v1", "A"));
    chain.add_pending(vote("v2", "B"));
    assert!(chain.mine());
    assert!(chain.is_valid_chain(&chain.snapshot()));

    chain.blocks[1].transactions[0].candidate_id = "C".into();
    let snapshot = chain.snapshot();
    assert!(!chain.is_valid_chain(&snapshot));
  }

  #[test]
  fn replace_if_better_requires_strictly_longer_and_valid() {
    let mut local = Chain::new(2);
    local.add_pending(vote("v1", "A"));
    assert!(local.mine());

    let mut remote = Chain::new(2);
    remote.add_pending(vote("v2", "B"));
    assert!(remote.mine());

    // same length, different history: keep ours
    assert!(!local.replace_if_better(remote.snapshot()));

    remote.add_pending(vote("v3", "C"));
    assert!(remote.mine());

    // longer but corrupted: keep ours
    let mut corrupted = remote.snapshot();
    corrupted[1].transactions[0].voter_id = "vX".into();
    assert!(!local.replace_if_better(corrupted));
    assert_eq!(local.len(), 2);

    // strictly longer and valid: adopt
    assert!(local.replace_if_better(remote.snapshot()));
    assert_eq!(local.len(), 3);
    assert_eq!(local.last().hash, remote.last().hash);
  }

  #[test]
  fn longest_chain_consensus_converges_three_nodes() {
    let mut n1 = Chain::new(2);
    let mut n2 = Chain::new(2);
    let mut n3 = Chain::new(2);

    n1.add_pending(vote("d1_v1", "A"));
    n1.add_pending(vote("d1_v2", "B"));
    assert!(n1.mine());

    n2.add_pending(vote("d2_v1", "C"));
    assert!(n2.mine());
    n2.add_pending(vote("d2_v2", "A"));
    assert!(n2.mine());

    n3.add_pending(vote("d3_v1", "B"));
    assert!(n3.mine());

    let (c1, c2, c3) = (n1.snapshot(), n2.snapshot(), n3.snapshot());
    n1.replace_if_better(c2.clone());
    n1.replace_if_better(c3.clone());
    n2.replace_if_better(c1.clone());
    n2.replace_if_better(c3);
    n3.replace_if_better(c1);
    n3.replace_if_better(c2);

    assert_eq!(n1.len(), 3);
    assert_eq!(n2.len(), 3);
    assert_eq!(n3.len(), 3);
    assert_eq!(n1.last().hash, n2.last().hash);
    assert_eq!(n2.last().hash, n3.last().hash);
    assert_eq!(n1.tally(), n2.tally());
    assert_eq!(n2.tally(), n3.tally());
  }

  #[test]
  fn commit_hands_back_a_stale_block_for_rebase() {
    let mut chain = Chain::new(2);
    chain.add_pending(vote("v1", "A"));
    let candidate = chain.candidate().unwrap();
    let sealed = candidate.seal(chain.difficulty());

    // a remote block lands while we were sealing
    let mut remote = Chain::new(2);
    remote.add_pending(vote("v2", "B"));
    assert!(remote.mine());
    assert!(chain.add_block(remote.last().clone()));

    let stale = chain.commit(sealed).unwrap_err();
    let rebased = chain.rebase(stale).seal(chain.difficulty());
    let committed = chain.commit(rebased).unwrap();

    assert_eq!(chain.len(), 3);
    assert_eq!(committed.index, 2);
    assert!(chain.pending().is_empty());
    assert!(chain.is_valid_chain(&chain.snapshot()));
  }

  #[test]
  fn serialized_chain_reconstructs_identically() {
    let mut chain = Chain::new(2);
    chain.add_pending(vote("v1", "A"));
    assert!(chain.mine());
    chain.add_pending(vote("v2", "B"));
    assert!(chain.mine());

    let encoded = serde_json::to_string(&chain.snapshot()).unwrap();
    let decoded: Vec<Block> = serde_json::from_str(&encoded).unwrap();

    let mut other = Chain::new(2);
    assert!(other.is_valid_chain(&decoded));
    assert!(other.replace_if_better(decoded));
    assert_eq!(other.tally(), chain.tally());
    assert_eq!(other.last().hash, chain.last().hash);
  }
}
