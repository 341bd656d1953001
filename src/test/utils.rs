//! Shared helpers for multi-node scenario tests. Everything runs on
//! loopback with OS-assigned ports so tests never collide.

use {
  crate::network::{
    NodeEvents,
    Peer,
    PeerConfig,
    Tracker,
    TrackerConfig,
  },
  std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
  },
  tokio::time,
};

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

pub async fn spawn_tracker(ballot: &[&str]) -> Tracker {
  let options: Vec<String> =
    ballot.iter().map(|option| option.to_string()).collect();
  Tracker::bind(
    TrackerConfig {
      bind_addr: LOCALHOST,
      port: 0,
    },
    Box::new(move || options.clone()),
  )
  .await
  .expect("failed to bind tracker")
}

pub async fn spawn_peer(tracker: SocketAddr) -> (Peer, NodeEvents) {
  spawn_peer_with(tracker, false).await
}

pub async fn spawn_peer_with(
  tracker: SocketAddr,
  malicious: bool,
) -> (Peer, NodeEvents) {
  Peer::bind(PeerConfig {
    local_addr: LOCALHOST,
    local_port: 0,
    tracker,
    difficulty: 2,
    malicious,
  })
  .await
  .expect("failed to bind peer")
}

/// Polls a condition until it holds or the deadline passes. Returns
/// whether the condition held.
pub async fn wait_until(
  deadline: Duration,
  mut condition: impl FnMut() -> bool,
) -> bool {
  let started = time::Instant::now();
  while started.elapsed() < deadline {
    if condition() {
      return true;
    }
    time::sleep(Duration::from_millis(50)).await;
  }
  condition()
}
