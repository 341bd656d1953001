//! Offline walkthrough of the chain rules: mining, tamper detection
//! and longest-chain fork resolution, all in one process without any
//! networking. Useful as a demo and as a quick sanity check of the
//! consensus layer.

use {
  clap::Parser,
  suffrage::consensus::{Chain, Transaction},
};

#[derive(Debug, Parser)]
#[clap(name = "sim", version, about = "suffrage consensus walkthrough")]
struct SimOpts {
  #[clap(
    long,
    default_value_t = suffrage::consensus::DEFAULT_DIFFICULTY,
    help = "leading zero hex digits required of block hashes"
  )]
  difficulty: usize,
}

fn print_chain(chain: &Chain) {
  println!("==== CHAIN ({} blocks) ====", chain.len());
  for block in chain.snapshot() {
    println!(
      "  #{} hash={} prev={} nonce={} txs={}",
      block.index,
      block.hash.get(..15).unwrap_or(&block.hash),
      block.previous_hash.get(..15).unwrap_or(&block.previous_hash),
      block.nonce,
      block.transactions.len()
    );
    for tx in &block.transactions {
      println!("      {tx}");
    }
  }
}

fn print_tally(chain: &Chain) {
  let tally = chain.tally();
  if tally.is_empty() {
    println!("no votes recorded yet");
    return;
  }
  let total: u64 = tally.values().sum();
  println!("==== TALLY ({total} votes) ====");
  for (candidate, votes) in tally {
    let share = (votes as f64 * 100.0) / total as f64;
    println!("  {candidate}: {votes} ({share:.1}%)");
  }
}

fn single_node(difficulty: usize) -> Chain {
  println!("--- single node mining ---");
  let mut chain = Chain::new(difficulty);
  chain.add_pending(Transaction::new("voter123", "candidateA"));
  chain.add_pending(Transaction::new("voter456", "candidateB"));
  chain.add_pending(Transaction::new("voter789", "candidateA"));
  println!("unconfirmed votes: {}", chain.pending().len());

  assert!(chain.mine());
  assert!(chain.is_valid_chain(&chain.snapshot()));
  print_chain(&chain);
  print_tally(&chain);
  chain
}

fn tamper_detection(difficulty: usize) {
  println!("--- tamper detection ---");
  let mut chain = Chain::new(difficulty);
  chain.add_pending(Transaction::new("voter1", "candidateA"));
  chain.add_pending(Transaction::new("voter2", "candidateB"));
  assert!(chain.mine());

  let mut tampered = chain.snapshot();
  tampered[1].transactions[0].candidate_id = "candidateC".into();
  println!(
    "validation after flipping a committed vote: {}",
    chain.is_valid_chain(&tampered)
  );
  assert!(!chain.is_valid_chain(&tampered));
}

fn fork_resolution(difficulty: usize) {
  println!("--- fork resolution ---");
  let mut node1 = Chain::new(difficulty);
  let mut node2 = Chain::new(difficulty);
  let mut node3 = Chain::new(difficulty);

  node1.add_pending(Transaction::new("d1_voter1", "candidateA"));
  node1.add_pending(Transaction::new("d1_voter2", "candidateB"));
  assert!(node1.mine());

  node2.add_pending(Transaction::new("d2_voter1", "candidateC"));
  assert!(node2.mine());
  node2.add_pending(Transaction::new("d2_voter2", "candidateA"));
  assert!(node2.mine());

  node3.add_pending(Transaction::new("d3_voter1", "candidateB"));
  assert!(node3.mine());

  println!(
    "before consensus: node1={} node2={} node3={}",
    node1.len(),
    node2.len(),
    node3.len()
  );

  let (c1, c2, c3) = (node1.snapshot(), node2.snapshot(), node3.snapshot());
  node1.replace_if_better(c2.clone());
  node1.replace_if_better(c3.clone());
  node2.replace_if_better(c1.clone());
  node2.replace_if_better(c3);
  node3.replace_if_better(c1);
  node3.replace_if_better(c2);

  assert_eq!(node1.len(), node2.len());
  assert_eq!(node2.len(), node3.len());
  assert_eq!(node1.last().hash, node2.last().hash);
  assert_eq!(node2.last().hash, node3.last().hash);
  println!("after consensus: every node is at height {}", node1.len());
  print_tally(&node1);
}

fn main() {
  let opts = SimOpts::parse();
  single_node(opts.difficulty);
  tamper_detection(opts.difficulty);
  fork_resolution(opts.difficulty);
  println!("walkthrough completed");
}
