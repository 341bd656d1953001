use {
  super::transaction::Transaction,
  serde::{Deserialize, Serialize},
  serde_json::json,
  sha2::{Digest, Sha256},
};

/// Parent link written into a block by an adversarial miner. A chain
/// carrying this sentinel self-describes as invalid, which is exactly
/// what receivers are expected to detect and reject.
pub const MALICIOUS_PREVIOUS_HASH: &str = "malicious_previous_hash";

/// One unit of the chain: a small set of vote transactions plus the
/// proof-of-work header.
///
/// The `hash` field is the declared hash the block was mined (or
/// received) with. Validation always recomputes the canonical hash
/// and compares it against the declared one, so mutating any other
/// field after sealing invalidates the block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
  pub index: u64,
  pub timestamp: String,
  pub previous_hash: String,
  pub nonce: u64,
  pub hash: String,
  pub transactions: Vec<Transaction>,
}

impl Block {
  /// Builds an unsealed block (nonce 0) on top of the given parent
  /// hash. The declared hash is initialized to the canonical hash of
  /// the fresh contents; [`Block::seal`] grinds it down to the
  /// difficulty target.
  pub fn new(
    index: u64,
    transactions: Vec<Transaction>,
    timestamp: String,
    previous_hash: String,
  ) -> Self {
    let mut block = Self {
      index,
      timestamp,
      previous_hash,
      nonce: 0,
      hash: String::new(),
      transactions,
    };
    block.hash = block.compute_hash();
    block
  }

  /// Canonical SHA-256 of the header fields and transactions.
  ///
  /// The preimage is the compact JSON object
  /// `{index, nonce, previous_hash, timestamp, transactions}` with
  /// keys sorted lexicographically (transaction objects likewise).
  /// The declared `hash` is not part of the preimage. serde_json
  /// object maps are BTree-backed, which yields the sorted key order
  /// without a custom writer.
  pub fn compute_hash(&self) -> String {
    let canonical = json!({
      "index": self.index,
      "transactions": self.transactions,
      "timestamp": self.timestamp,
      "previous_hash": self.previous_hash,
      "nonce": self.nonce,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }

  /// A hash is valid at difficulty `d` when its first `d` hex
  /// characters are zeros.
  pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty
      && hash.bytes().take(difficulty).all(|b| b == b'0')
  }

  /// Checks the declared hash: it must satisfy the difficulty target
  /// and match the recomputed canonical hash. The declared hash is
  /// never silently replaced by the recomputed one.
  pub fn is_valid_proof(&self, difficulty: usize) -> bool {
    Self::meets_difficulty(&self.hash, difficulty)
      && self.hash == self.compute_hash()
  }

  /// Increments the nonce until the declared hash satisfies the
  /// difficulty target. CPU-bound; callers must not hold any lock
  /// while sealing.
  pub fn seal(&mut self, difficulty: usize) {
    while !Self::meets_difficulty(&self.hash, difficulty) {
      self.nonce += 1;
      self.hash = self.compute_hash();
    }
  }
}

impl std::fmt::Display for Block {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let short = self.hash.get(..10).unwrap_or(&self.hash);
    write!(f, "block {} [{}]", self.index, short)
  }
}
