use {super::block::Block, once_cell::sync::Lazy};

/// Timestamp of the genesis block. The literal is part of the
/// protocol: every peer must derive bit-identical genesis contents,
/// otherwise no two chains would ever link up.
pub const GENESIS_TIMESTAMP: &str = "2000-01-01 00:00:00";

static GENESIS: Lazy<Block> = Lazy::new(|| {
  Block::new(0, vec![], GENESIS_TIMESTAMP.to_owned(), "0".to_owned())
});

/// The canonical first block of every chain.
///
/// Genesis carries no transactions, links to the placeholder parent
/// `"0"` and is exempt from the proof-of-work predicate. Its hash is
/// the canonical hash of its fixed contents.
pub fn genesis() -> Block {
  GENESIS.clone()
}
