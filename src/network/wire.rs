//! Self-describing message envelopes exchanged over UDP.
//!
//! Each datagram carries exactly one JSON object tagged by its
//! `"type"` field. Instead of poking at untyped JSON maps, the whole
//! protocol is a sum type: unknown tags and malformed payloads fail
//! to decode and the datagram is dropped by the caller.

use {
  crate::consensus::Block,
  serde::{Deserialize, Serialize},
  std::net::SocketAddr,
  thiserror::Error,
};

/// Largest datagram the protocol produces or accepts.
pub const MAX_DATAGRAM: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
  #[error("datagram is not a known message: {0}")]
  Malformed(#[from] serde_json::Error),

  #[error("encoded message exceeds the {MAX_DATAGRAM} byte datagram limit")]
  Oversize,
}

/// Everything that travels between peers and the tracker.
///
/// Peer lists render endpoints as `"ip:port"` strings. A block on the
/// wire is the block's own serde form, declared hash included, so a
/// receiver reconstructs exactly what the sender mined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
  #[serde(rename = "REGISTER_PEER")]
  RegisterPeer,

  #[serde(rename = "REGISTER_ACK")]
  RegisterAck { peer_list: Vec<String> },

  #[serde(rename = "LEAVE_PEER")]
  LeavePeer,

  #[serde(rename = "REQUEST_BALLOT")]
  RequestBallot,

  #[serde(rename = "BALLOT_OPTIONS")]
  BallotOptions { voting_options: Vec<String> },

  #[serde(rename = "UPDATE_PEERS")]
  UpdatePeers { peer_list: Vec<String> },

  #[serde(rename = "POKE")]
  Poke,

  #[serde(rename = "POKE-ACK")]
  PokeAck,

  #[serde(rename = "NEW_BLOCK")]
  NewBlock { block: Block },

  #[serde(rename = "REQUEST_CHAIN")]
  RequestChain,

  #[serde(rename = "CHAIN_RESPONSE")]
  ChainResponse { chain: Vec<Block> },

  #[serde(rename = "CHAIN_BLOCK")]
  ChainBlock {
    index: u64,
    total_blocks: u64,
    block: Block,
  },
}

impl Message {
  /// Serializes into one datagram payload, refusing anything that
  /// would not fit on the wire.
  pub fn encode(&self) -> Result<Vec<u8>, WireError> {
    let bytes = serde_json::to_vec(self)?;
    if bytes.len() > MAX_DATAGRAM {
      return Err(WireError::Oversize);
    }
    Ok(bytes)
  }

  pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
    Ok(serde_json::from_slice(bytes)?)
  }
}

/// Parses the `"ip:port"` rendition used in peer lists. Anything
/// unparseable is dropped by the caller.
pub fn parse_endpoint(s: &str) -> Option<SocketAddr> {
  s.parse().ok()
}

#[cfg(test)]
mod test {
  use {super::*, crate::consensus::genesis};

  #[test]
  fn tags_match_the_protocol_strings() {
    let cases = [
      (Message::RegisterPeer, r#"{"type":"REGISTER_PEER"}"#),
      (Message::LeavePeer, r#"{"type":"LEAVE_PEER"}"#),
      (Message::RequestBallot, r#"{"type":"REQUEST_BALLOT"}"#),
      (Message::Poke, r#"{"type":"POKE"}"#),
      (Message::PokeAck, r#"{"type":"POKE-ACK"}"#),
      (Message::RequestChain, r#"{"type":"REQUEST_CHAIN"}"#),
    ];
    for (message, expected) in cases {
      let encoded = String::from_utf8(message.encode().unwrap()).unwrap();
      assert_eq!(encoded, expected);
      assert_eq!(Message::decode(expected.as_bytes()).unwrap(), message);
    }
  }

  #[test]
  fn payload_fields_round_trip() {
    let message = Message::RegisterAck {
      peer_list: vec!["127.0.0.1:9001".into(), "127.0.0.1:9002".into()],
    };
    let bytes = message.encode().unwrap();
    assert_eq!(Message::decode(&bytes).unwrap(), message);

    let message = Message::ChainBlock {
      index: 0,
      total_blocks: 1,
      block: genesis(),
    };
    let bytes = message.encode().unwrap();
    assert_eq!(Message::decode(&bytes).unwrap(), message);
  }

  #[test]
  fn block_payload_keeps_the_declared_hash() {
    let block = genesis();
    let bytes = Message::NewBlock {
      block: block.clone(),
    }
    .encode()
    .unwrap();
    match Message::decode(&bytes).unwrap() {
      Message::NewBlock { block: decoded } => {
        assert_eq!(decoded.hash, block.hash);
      }
      other => panic!("decoded as {other:?}"),
    }
  }

  #[test]
  fn unknown_or_malformed_datagrams_fail_to_decode() {
    assert!(Message::decode(b"{\"type\":\"GOSSIP\"}").is_err());
    assert!(Message::decode(b"{\"no_type\":1}").is_err());
    assert!(Message::decode(b"not json at all").is_err());
    // missing payload field
    assert!(Message::decode(b"{\"type\":\"REGISTER_ACK\"}").is_err());
  }

  #[test]
  fn endpoint_strings_parse_or_drop() {
    assert_eq!(
      parse_endpoint("127.0.0.1:9001"),
      Some("127.0.0.1:9001".parse().unwrap())
    );
    assert_eq!(parse_endpoint("localhost:9001"), None);
    assert_eq!(parse_endpoint(""), None);
  }
}
