//! Reassembly of block-by-block chain transfers.
//!
//! A chain that no longer fits one datagram arrives as a stream of
//! `CHAIN_BLOCK {index, total_blocks, block}` messages. Datagrams may
//! be lost, duplicated or reordered; the buffer keeps whatever has
//! arrived, keyed by index, until all pieces of one transfer are
//! present. A transfer announcing a different total supersedes any
//! partial one.

use {crate::consensus::Block, std::collections::BTreeMap, tracing::debug};

/// Buffer for at most one in-flight chain transfer.
#[derive(Debug, Default)]
pub struct ChainAssembler {
  total_blocks: u64,
  buffer: BTreeMap<u64, Block>,
}

impl ChainAssembler {
  pub fn new() -> Self {
    Self::default()
  }

  /// Feeds one `CHAIN_BLOCK` datagram. Returns the fully assembled
  /// candidate chain once `total_blocks` distinct indices are
  /// buffered; `None` while the transfer is still incomplete.
  pub fn accept(
    &mut self,
    index: u64,
    total_blocks: u64,
    block: Block,
  ) -> Option<Vec<Block>> {
    if total_blocks == 0 || index >= total_blocks {
      debug!("dropping chain piece {index}/{total_blocks}");
      return None;
    }
    if total_blocks != self.total_blocks {
      if !self.buffer.is_empty() {
        debug!(
          "discarding partial transfer of {} blocks for a new one of {}",
          self.total_blocks, total_blocks
        );
      }
      self.buffer.clear();
      self.total_blocks = total_blocks;
    }
    self.buffer.insert(index, block);
    if self.buffer.len() as u64 == self.total_blocks {
      self.total_blocks = 0;
      return Some(std::mem::take(&mut self.buffer).into_values().collect());
    }
    None
  }
}

#[cfg(test)]
mod test {
  use {super::*, crate::consensus::Chain, crate::consensus::Transaction};

  fn blocks(n: usize) -> Vec<Block> {
    let mut chain = Chain::new(2);
    for i in 1..n {
      chain.add_pending(Transaction::new(format!("v{i}"), "A"));
      assert!(chain.mine());
    }
    chain.snapshot()
  }

  #[test]
  fn reassembles_out_of_order_pieces() {
    let chain = blocks(3);
    let total = chain.len() as u64;
    let mut assembler = ChainAssembler::new();

    assert!(assembler.accept(2, total, chain[2].clone()).is_none());
    assert!(assembler.accept(0, total, chain[0].clone()).is_none());
    let assembled = assembler.accept(1, total, chain[1].clone()).unwrap();
    assert_eq!(assembled, chain);
  }

  #[test]
  fn duplicates_do_not_complete_a_transfer() {
    let chain = blocks(3);
    let total = chain.len() as u64;
    let mut assembler = ChainAssembler::new();

    assert!(assembler.accept(0, total, chain[0].clone()).is_none());
    assert!(assembler.accept(0, total, chain[0].clone()).is_none());
    assert!(assembler.accept(1, total, chain[1].clone()).is_none());
    assert!(assembler.accept(2, total, chain[2].clone()).is_some());
  }

  #[test]
  fn a_new_transfer_discards_the_stale_partial_buffer() {
    let short = blocks(2);
    let long = blocks(4);
    let mut assembler = ChainAssembler::new();

    assert!(assembler.accept(0, 2, short[0].clone()).is_none());

    // a longer transfer starts before the short one completes
    for (i, block) in long.iter().take(3).enumerate() {
      assert!(assembler.accept(i as u64, 4, block.clone()).is_none());
    }
    let assembled = assembler.accept(3, 4, long[3].clone()).unwrap();
    assert_eq!(assembled, long);
  }

  #[test]
  fn nonsense_coordinates_are_dropped() {
    let chain = blocks(2);
    let mut assembler = ChainAssembler::new();
    assert!(assembler.accept(0, 0, chain[0].clone()).is_none());
    assert!(assembler.accept(5, 2, chain[0].clone()).is_none());
    // the buffer is still empty, a clean transfer completes normally
    assert!(assembler.accept(0, 2, chain[0].clone()).is_none());
    assert!(assembler.accept(1, 2, chain[1].clone()).is_some());
  }

  #[test]
  fn assembler_resets_after_completion() {
    let chain = blocks(2);
    let mut assembler = ChainAssembler::new();
    assert!(assembler.accept(0, 2, chain[0].clone()).is_none());
    assert!(assembler.accept(1, 2, chain[1].clone()).is_some());
    // the next transfer starts from scratch
    assert!(assembler.accept(0, 2, chain[0].clone()).is_none());
    assert!(assembler.accept(1, 2, chain[1].clone()).is_some());
  }
}
