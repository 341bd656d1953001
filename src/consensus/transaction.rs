use {
  chrono::Utc,
  serde::{Deserialize, Serialize},
};

/// Timestamp rendition used in transactions, block headers and
/// everything that crosses the wire. Seconds precision, always UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The current UTC wall clock in the protocol format.
pub fn timestamp_now() -> String {
  Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// A single vote cast by a voter for one of the ballot candidates.
///
/// There is no cryptographic identity behind a voter, the id is an
/// opaque string chosen by the application layer. Transactions are
/// immutable once created; a transaction observed in the chain is
/// exactly the transaction its miner recorded.
///
/// Double votes by the same voter are not rejected here or anywhere
/// in block admission. They may sit in the chain and are discounted
/// only when the tally is computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
  pub voter_id: String,
  pub candidate_id: String,
  pub timestamp: String,
}

impl Transaction {
  /// Creates a vote stamped with the current UTC time.
  pub fn new(
    voter_id: impl Into<String>,
    candidate_id: impl Into<String>,
  ) -> Self {
    Self {
      voter_id: voter_id.into(),
      candidate_id: candidate_id.into(),
      timestamp: timestamp_now(),
    }
  }
}

impl std::fmt::Display for Transaction {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "{} -> {} @ {}",
      self.voter_id, self.candidate_id, self.timestamp
    )
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn stamps_current_time_in_protocol_format() {
    let tx = Transaction::new("voter1", "A");
    assert_eq!(tx.timestamp.len(), 19);
    assert_eq!(&tx.timestamp[4..5], "-");
    assert_eq!(&tx.timestamp[10..11], " ");
    assert_eq!(&tx.timestamp[13..14], ":");
  }

  #[test]
  fn wire_fields_round_trip() {
    let tx = Transaction {
      voter_id: "voter1".into(),
      candidate_id: "A".into(),
      timestamp: "2024-05-01 10:00:00".into(),
    };
    let encoded = serde_json::to_string(&tx).unwrap();
    assert!(encoded.contains("\"voter_id\":\"voter1\""));
    assert!(encoded.contains("\"candidate_id\":\"A\""));
    let decoded: Transaction = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, tx);
  }
}
