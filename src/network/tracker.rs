//! The rendezvous service.
//!
//! The tracker keeps the network's membership: peers register with
//! it, fetch the ballot from it and learn about each other through
//! its `UPDATE_PEERS` fan-outs. A heartbeat loop pokes every
//! registered peer once a second and evicts whoever misses three
//! probes in a row. The tracker never touches chain state or vote
//! logic.

use {
  super::wire::{Message, MAX_DATAGRAM},
  std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
  },
  tokio::{net::UdpSocket, task::JoinHandle, time},
  tracing::{debug, info, warn},
};

/// Cadence of the liveness probes.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Missed probes after which a peer is evicted.
pub const HEARTBEAT_TIMEOUT_COUNT: u32 = 3;

/// Supplies the ordered list of candidate identifiers. Pluggable so
/// the embedding application decides where the ballot comes from.
pub type BallotProvider = Box<dyn Fn() -> Vec<String> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct TrackerConfig {
  pub bind_addr: IpAddr,
  pub port: u16,
}

/// Handle to a running tracker. The service itself lives on a
/// spawned task that owns the socket.
pub struct Tracker {
  local: SocketAddr,
  registry: Arc<Mutex<HashMap<SocketAddr, u32>>>,
  handle: Option<JoinHandle<()>>,
}

impl Tracker {
  /// Binds the rendezvous socket and starts the receive and
  /// heartbeat loops. Failing to bind is the only fatal error in the
  /// system; everything after this logs and carries on.
  pub async fn bind(
    config: TrackerConfig,
    ballot: BallotProvider,
  ) -> std::io::Result<Self> {
    let socket =
      UdpSocket::bind((config.bind_addr, config.port)).await?;
    let local = socket.local_addr()?;
    let registry = Arc::new(Mutex::new(HashMap::new()));

    let actor = Actor {
      socket,
      registry: Arc::clone(&registry),
      ballot,
    };
    let handle = tokio::spawn(actor.run());

    Ok(Self {
      local,
      registry,
      handle: Some(handle),
    })
  }

  pub fn local_addr(&self) -> SocketAddr {
    self.local
  }

  /// Endpoints currently considered members of the network.
  pub fn peers(&self) -> Vec<SocketAddr> {
    self.registry.lock().unwrap().keys().copied().collect()
  }

  /// Parks the caller for the lifetime of the service.
  pub async fn wait(mut self) {
    if let Some(handle) = self.handle.take() {
      let _ = handle.await;
    }
  }
}

impl Drop for Tracker {
  fn drop(&mut self) {
    if let Some(handle) = &self.handle {
      handle.abort();
    }
  }
}

struct Actor {
  socket: UdpSocket,
  registry: Arc<Mutex<HashMap<SocketAddr, u32>>>,
  ballot: BallotProvider,
}

impl Actor {
  async fn run(self) {
    let mut heartbeat = time::interval_at(
      time::Instant::now() + HEARTBEAT_INTERVAL,
      HEARTBEAT_INTERVAL,
    );
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
      tokio::select! {
        received = self.socket.recv_from(&mut buf) => match received {
          Ok((len, from)) => self.handle_datagram(&buf[..len], from).await,
          Err(e) => warn!("receive failed: {e}"),
        },
        _ = heartbeat.tick() => self.heartbeat().await,
      }
    }
  }

  async fn handle_datagram(&self, bytes: &[u8], from: SocketAddr) {
    let message = match Message::decode(bytes) {
      Ok(message) => message,
      Err(e) => {
        debug!("dropping malformed datagram from {from}: {e}");
        return;
      }
    };
    match message {
      Message::RegisterPeer => {
        let peer_list = {
          let mut registry = self.registry.lock().unwrap();
          registry.insert(from, 0);
          peer_list(&registry)
        };
        info!("registered peer {from}");
        self.send(&Message::RegisterAck { peer_list }, from).await;
        self.broadcast_peer_list().await;
      }
      Message::LeavePeer => {
        let removed =
          self.registry.lock().unwrap().remove(&from).is_some();
        if removed {
          info!("peer {from} left the network");
        } else {
          debug!("ignoring LEAVE_PEER from unknown {from}");
        }
      }
      Message::RequestBallot => {
        let registered =
          self.registry.lock().unwrap().contains_key(&from);
        if !registered {
          debug!("rejecting REQUEST_BALLOT from unregistered {from}");
          return;
        }
        let voting_options = (self.ballot)();
        self
          .send(&Message::BallotOptions { voting_options }, from)
          .await;
        debug!("sent ballot to {from}");
      }
      Message::PokeAck => {
        if let Some(missed) =
          self.registry.lock().unwrap().get_mut(&from)
        {
          *missed = 0;
        }
      }
      other => {
        debug!("ignoring {other:?} from {from}");
      }
    }
  }

  /// One probe round: poke every member, bump its missed counter,
  /// evict whoever crossed the threshold and fan out the updated
  /// membership if anyone did.
  async fn heartbeat(&self) {
    let members: Vec<SocketAddr> =
      self.registry.lock().unwrap().keys().copied().collect();
    for member in members {
      self.send(&Message::Poke, member).await;
      if let Some(missed) =
        self.registry.lock().unwrap().get_mut(&member)
      {
        *missed += 1;
      }
    }

    let evicted: Vec<SocketAddr> = {
      let mut registry = self.registry.lock().unwrap();
      let gone: Vec<SocketAddr> = registry
        .iter()
        .filter(|(_, missed)| **missed >= HEARTBEAT_TIMEOUT_COUNT)
        .map(|(addr, _)| *addr)
        .collect();
      for addr in &gone {
        registry.remove(addr);
      }
      gone
    };

    if !evicted.is_empty() {
      for addr in &evicted {
        info!(
          "evicted {addr} after {HEARTBEAT_TIMEOUT_COUNT} missed probes"
        );
      }
      self.broadcast_peer_list().await;
    }
  }

  async fn broadcast_peer_list(&self) {
    let (members, peer_list) = {
      let registry = self.registry.lock().unwrap();
      (
        registry.keys().copied().collect::<Vec<_>>(),
        peer_list(&registry),
      )
    };
    let message = Message::UpdatePeers { peer_list };
    for member in members {
      self.send(&message, member).await;
    }
    debug!("broadcasted membership to all registered peers");
  }

  /// Best-effort datagram send: failures are logged and the peer is
  /// left to the heartbeat loop to clean up.
  async fn send(&self, message: &Message, to: SocketAddr) {
    let bytes = match message.encode() {
      Ok(bytes) => bytes,
      Err(e) => {
        warn!("failed to encode {message:?}: {e}");
        return;
      }
    };
    if let Err(e) = self.socket.send_to(&bytes, to).await {
      warn!("send to {to} failed: {e}");
    }
  }
}

fn peer_list(registry: &HashMap<SocketAddr, u32>) -> Vec<String> {
  registry.keys().map(|addr| addr.to_string()).collect()
}
