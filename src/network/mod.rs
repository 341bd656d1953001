//! Peer networking and coordination: the UDP wire protocol, the peer
//! node actor, the tracker rendezvous service and chain transfer
//! reassembly.

mod peer;
mod sync;
mod tracker;
mod wire;

pub use {
  peer::{
    NodeError,
    NodeEvent,
    NodeEvents,
    Peer,
    PeerConfig,
    PeerState,
    RETRY_INTERVAL,
  },
  sync::ChainAssembler,
  tracker::{
    BallotProvider,
    Tracker,
    TrackerConfig,
    HEARTBEAT_INTERVAL,
    HEARTBEAT_TIMEOUT_COUNT,
  },
  wire::{parse_endpoint, Message, WireError, MAX_DATAGRAM},
};
