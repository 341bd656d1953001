//! The peer node.
//!
//! A [`Peer`] wraps a UDP socket actor that owns all protocol I/O:
//! registration with the tracker, ballot retrieval, block broadcast,
//! chain sync and heartbeat replies. The embedding application talks
//! to it through a small blocking API (`connect`,
//! `request_ballot_options`, `submit_vote`, `leave_network`) and a
//! [`NodeEvents`] stream of notifications, mirroring how the rest of
//! the system is built out of channel-connected actors.
//!
//! Mining is CPU-bound and runs on a dedicated blocking worker. The
//! chain mutex is only taken to prepare the candidate and to commit
//! the sealed block, so the socket actor keeps answering `POKE` and
//! ingesting `NEW_BLOCK` while a vote is being mined. When a remote
//! block lands first, the worker's sealed block no longer extends
//! the tail; the candidate is re-based onto the new tail and sealed
//! again.

use {
  crate::{
    consensus::{Block, Chain, Transaction},
    network::{
      sync::ChainAssembler,
      wire::{self, Message, WireError, MAX_DATAGRAM},
    },
    view::{ChainSnapshot, NodeInfo},
  },
  futures::Stream,
  serde::Serialize,
  std::{
    collections::{BTreeMap, HashSet},
    net::{IpAddr, SocketAddr},
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Duration,
  },
  thiserror::Error,
  tokio::{
    net::UdpSocket,
    sync::{mpsc, watch},
    task::JoinHandle,
    time,
  },
  tracing::{debug, info, warn},
};

/// Cadence at which unacknowledged registration and ballot requests
/// are re-sent.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Lifecycle of a peer. Transitions are driven by the local API and
/// by inbound tracker traffic; messages that do not match the
/// current state are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeerState {
  Init,
  Registering,
  Connected,
  RequestingBallot,
  ConnectedWithBallot,
  Leaving,
  Closed,
}

impl PeerState {
  fn is_live(&self) -> bool {
    !matches!(self, PeerState::Leaving | PeerState::Closed)
  }
}

#[derive(Debug, Error)]
pub enum NodeError {
  #[error("the peer is closed")]
  Closed,

  #[error("ballot options have not been delivered yet")]
  NotReady,

  #[error("the mining worker was cancelled")]
  MiningCancelled,
}

/// Notifications surfaced to the embedding application. The UI layer
/// renders these; nothing in the protocol depends on them being
/// consumed.
#[derive(Debug, Clone)]
pub enum NodeEvent {
  Registered { peers: Vec<SocketAddr> },
  BallotReceived(Vec<String>),
  BlockAccepted(Block),
  ForkDetected { height: u64 },
  ChainReplaced { height: usize },
  PeersUpdated(Vec<SocketAddr>),
}

/// Stream side of the peer's notification channel.
pub struct NodeEvents {
  receiver: mpsc::UnboundedReceiver<NodeEvent>,
}

impl Stream for NodeEvents {
  type Item = NodeEvent;

  fn poll_next(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
  ) -> Poll<Option<Self::Item>> {
    self.receiver.poll_recv(cx)
  }
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
  pub local_addr: IpAddr,
  pub local_port: u16,
  pub tracker: SocketAddr,
  pub difficulty: usize,
  /// Mine deliberately corrupt blocks. Adversarial testing only.
  pub malicious: bool,
}

enum Command {
  Register,
  RequestBallot,
  Broadcast(Block),
  Leave,
}

/// Handle to a running peer. All I/O lives on the socket actor; this
/// handle carries the command channel, the state watch and shared
/// read access to the chain.
pub struct Peer {
  cmd: mpsc::UnboundedSender<Command>,
  state: watch::Receiver<PeerState>,
  chain: Arc<Mutex<Chain>>,
  peers: Arc<Mutex<HashSet<SocketAddr>>>,
  ballot: Arc<Mutex<Option<Vec<String>>>>,
  vote_lock: tokio::sync::Mutex<()>,
  local: SocketAddr,
  malicious: bool,
  handle: JoinHandle<()>,
}

impl Peer {
  /// Binds the local UDP socket and starts the protocol actor.
  /// Failing to bind is fatal to the caller; everything after this
  /// logs and carries on.
  pub async fn bind(
    config: PeerConfig,
  ) -> std::io::Result<(Self, NodeEvents)> {
    let socket =
      UdpSocket::bind((config.local_addr, config.local_port)).await?;
    // the endpoint identity peers and the tracker know us by; used
    // to exclude ourselves from adopted peer lists
    let local =
      SocketAddr::new(config.local_addr, socket.local_addr()?.port());

    let chain = Arc::new(Mutex::new(Chain::new(config.difficulty)));
    let peers = Arc::new(Mutex::new(HashSet::new()));
    let ballot = Arc::new(Mutex::new(None));
    let (state_tx, state_rx) = watch::channel(PeerState::Init);
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let actor = Actor {
      socket,
      local,
      tracker: config.tracker,
      chain: Arc::clone(&chain),
      peers: Arc::clone(&peers),
      ballot: Arc::clone(&ballot),
      assembler: ChainAssembler::new(),
      state_tx,
      events: event_tx,
      cmd_rx,
    };
    let handle = tokio::spawn(actor.run());

    let peer = Self {
      cmd: cmd_tx,
      state: state_rx,
      chain,
      peers,
      ballot,
      vote_lock: tokio::sync::Mutex::new(()),
      local,
      malicious: config.malicious,
      handle,
    };
    Ok((peer, NodeEvents { receiver: event_rx }))
  }

  /// Registers with the tracker. Blocks the caller until the tracker
  /// acknowledges (the actor retries every 500 ms meanwhile) or the
  /// peer closes.
  pub async fn connect(&self) -> Result<(), NodeError> {
    self
      .cmd
      .send(Command::Register)
      .map_err(|_| NodeError::Closed)?;
    self
      .wait_for(|state| {
        matches!(
          state,
          PeerState::Connected
            | PeerState::RequestingBallot
            | PeerState::ConnectedWithBallot
        )
      })
      .await
  }

  /// Fetches the ballot from the tracker. Blocks until the options
  /// arrive; the actor retries every 500 ms meanwhile.
  pub async fn request_ballot_options(
    &self,
  ) -> Result<Vec<String>, NodeError> {
    if let Some(options) = self.ballot.lock().unwrap().clone() {
      return Ok(options);
    }
    if matches!(
      *self.state.borrow(),
      PeerState::Init | PeerState::Registering
    ) {
      return Err(NodeError::NotReady);
    }
    self
      .cmd
      .send(Command::RequestBallot)
      .map_err(|_| NodeError::Closed)?;
    self
      .wait_for(|state| state == PeerState::ConnectedWithBallot)
      .await?;
    Ok(self.ballot.lock().unwrap().clone().unwrap_or_default())
  }

  /// Records a vote, mines it into a block and broadcasts the block
  /// to every known remote peer. Blocks the caller for the duration
  /// of the mining operation; inbound traffic keeps being serviced
  /// by the socket actor meanwhile.
  pub async fn submit_vote(
    &self,
    tx: Transaction,
  ) -> Result<Block, NodeError> {
    if *self.state.borrow() != PeerState::ConnectedWithBallot {
      return Err(NodeError::NotReady);
    }
    // one local mining operation at a time
    let _guard = self.vote_lock.lock().await;
    let difficulty = self.chain.lock().unwrap().difficulty();

    let mut candidate = {
      let mut chain = self.chain.lock().unwrap();
      chain.add_pending(tx);

      if self.malicious {
        chain.mine_malicious();
        let block = chain.last().clone();
        drop(chain);
        warn!("broadcasting deliberately corrupt {block}");
        let _ = self.cmd.send(Command::Broadcast(block.clone()));
        return Ok(block);
      }

      chain.candidate().expect("a vote was just added to the pool")
    };

    let block = loop {
      let sealed =
        tokio::task::spawn_blocking(move || candidate.seal(difficulty))
          .await
          .map_err(|_| NodeError::MiningCancelled)?;
      let committed = self.chain.lock().unwrap().commit(sealed);
      match committed {
        Ok(block) => break block,
        Err(stale) => {
          debug!("tail moved while sealing {stale}, re-basing");
          candidate = self.chain.lock().unwrap().rebase(stale);
        }
      }
    };

    info!("mined {block}");
    self
      .cmd
      .send(Command::Broadcast(block.clone()))
      .map_err(|_| NodeError::Closed)?;
    Ok(block)
  }

  /// Tells the tracker we are leaving and closes the peer. Best
  /// effort: the socket closes whether or not the datagram arrives.
  pub async fn leave_network(&self) {
    if self.cmd.send(Command::Leave).is_err() {
      return;
    }
    let _ = self.wait_for(|state| state == PeerState::Closed).await;
  }

  pub fn state(&self) -> PeerState {
    *self.state.borrow()
  }

  pub fn local_addr(&self) -> SocketAddr {
    self.local
  }

  /// Remote peers currently known, self excluded.
  pub fn peers(&self) -> Vec<SocketAddr> {
    self.peers.lock().unwrap().iter().copied().collect()
  }

  /// Deep, immutable view of the chain for UI consumption.
  pub fn snapshot(&self) -> ChainSnapshot {
    let chain = self.chain.lock().unwrap();
    ChainSnapshot {
      height: chain.len(),
      blocks: chain.snapshot(),
    }
  }

  /// Per-candidate vote totals derived from the chain.
  pub fn tally(&self) -> BTreeMap<String, u64> {
    self.chain.lock().unwrap().tally()
  }

  /// Everything a UI needs to render this node.
  pub fn info(&self) -> NodeInfo {
    let peers = self
      .peers()
      .iter()
      .map(|addr| addr.to_string())
      .collect();
    let chain = self.chain.lock().unwrap();
    NodeInfo {
      endpoint: self.local.to_string(),
      state: self.state(),
      peers,
      height: chain.len(),
      tally: chain.tally(),
    }
  }

  async fn wait_for(
    &self,
    reached: impl Fn(PeerState) -> bool,
  ) -> Result<(), NodeError> {
    let mut state = self.state.clone();
    loop {
      let current = *state.borrow();
      if reached(current) {
        return Ok(());
      }
      if current == PeerState::Closed || state.changed().await.is_err()
      {
        return Err(NodeError::Closed);
      }
    }
  }
}

impl Drop for Peer {
  fn drop(&mut self) {
    self.handle.abort();
  }
}

enum Verdict {
  Duplicate,
  Fork(u64),
  Accepted(Block),
  Rejected,
}

struct Actor {
  socket: UdpSocket,
  local: SocketAddr,
  tracker: SocketAddr,
  chain: Arc<Mutex<Chain>>,
  peers: Arc<Mutex<HashSet<SocketAddr>>>,
  ballot: Arc<Mutex<Option<Vec<String>>>>,
  assembler: ChainAssembler,
  state_tx: watch::Sender<PeerState>,
  events: mpsc::UnboundedSender<NodeEvent>,
  cmd_rx: mpsc::UnboundedReceiver<Command>,
}

impl Actor {
  async fn run(mut self) {
    let mut retry = time::interval_at(
      time::Instant::now() + RETRY_INTERVAL,
      RETRY_INTERVAL,
    );
    retry.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
      tokio::select! {
        received = self.socket.recv_from(&mut buf) => match received {
          Ok((len, from)) => {
            self.handle_datagram(&buf[..len], from).await;
          }
          Err(e) => warn!("receive failed: {e}"),
        },
        _ = retry.tick() => self.retry_pending().await,
        cmd = self.cmd_rx.recv() => match cmd {
          Some(cmd) => {
            if self.handle_command(cmd).await {
              break;
            }
          }
          // every handle is gone, close quietly
          None => {
            self.set_state(PeerState::Closed);
            break;
          }
        },
      }
    }
  }

  fn state(&self) -> PeerState {
    *self.state_tx.borrow()
  }

  fn set_state(&self, state: PeerState) {
    let _ = self.state_tx.send(state);
  }

  fn emit(&self, event: NodeEvent) {
    let _ = self.events.send(event);
  }

  /// Returns true when the actor should shut down.
  async fn handle_command(&mut self, cmd: Command) -> bool {
    match cmd {
      Command::Register => {
        self.set_state(PeerState::Registering);
        self.send(&Message::RegisterPeer, self.tracker).await;
        false
      }
      Command::RequestBallot => {
        self.set_state(PeerState::RequestingBallot);
        self.send(&Message::RequestBallot, self.tracker).await;
        false
      }
      Command::Broadcast(block) => {
        self.broadcast(&Message::NewBlock { block }).await;
        false
      }
      Command::Leave => {
        self.set_state(PeerState::Leaving);
        self.send(&Message::LeavePeer, self.tracker).await;
        self.set_state(PeerState::Closed);
        true
      }
    }
  }

  /// Re-sends whatever request the current state is still waiting an
  /// acknowledgement for.
  async fn retry_pending(&self) {
    match self.state() {
      PeerState::Registering => {
        debug!("retrying registration with {}", self.tracker);
        self.send(&Message::RegisterPeer, self.tracker).await;
      }
      PeerState::RequestingBallot => {
        debug!("retrying ballot request with {}", self.tracker);
        self.send(&Message::RequestBallot, self.tracker).await;
      }
      _ => {}
    }
  }

  async fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr) {
    let message = match Message::decode(bytes) {
      Ok(message) => message,
      Err(e) => {
        debug!("dropping malformed datagram from {from}: {e}");
        return;
      }
    };
    let state = self.state();
    if !state.is_live() {
      return;
    }
    match message {
      Message::RegisterAck { peer_list } => {
        if state != PeerState::Registering {
          debug!("ignoring REGISTER_ACK outside registration");
          return;
        }
        self.adopt_peers(&peer_list);
        self.set_state(PeerState::Connected);
        info!("registered with tracker {}", self.tracker);
        self.emit(NodeEvent::Registered {
          peers: self.known_peers(),
        });
      }
      Message::BallotOptions { voting_options } => {
        if state != PeerState::RequestingBallot {
          debug!("ignoring BALLOT_OPTIONS outside ballot request");
          return;
        }
        *self.ballot.lock().unwrap() = Some(voting_options.clone());
        self.set_state(PeerState::ConnectedWithBallot);
        info!("received ballot options: {voting_options:?}");
        self.emit(NodeEvent::BallotReceived(voting_options));
      }
      Message::UpdatePeers { peer_list } => {
        self.adopt_peers(&peer_list);
        self.emit(NodeEvent::PeersUpdated(self.known_peers()));
      }
      Message::Poke => {
        self.send(&Message::PokeAck, from).await;
      }
      Message::NewBlock { block } => {
        self.handle_new_block(block).await;
      }
      Message::RequestChain => {
        self.send_chain(from).await;
      }
      Message::ChainResponse { chain } => {
        self.sync_chain(chain);
      }
      Message::ChainBlock {
        index,
        total_blocks,
        block,
      } => {
        if let Some(candidate) =
          self.assembler.accept(index, total_blocks, block)
        {
          self.sync_chain(candidate);
        }
      }
      other => {
        debug!("ignoring {other:?} from {from}");
      }
    }
  }

  /// Replaces the known peer set with a freshly adopted list, always
  /// excluding our own endpoint so we never broadcast to ourselves.
  fn adopt_peers(&self, peer_list: &[String]) {
    let adopted: HashSet<SocketAddr> = peer_list
      .iter()
      .filter_map(|entry| wire::parse_endpoint(entry))
      .filter(|addr| *addr != self.local)
      .collect();
    debug!("peer list is now {adopted:?}");
    *self.peers.lock().unwrap() = adopted;
  }

  fn known_peers(&self) -> Vec<SocketAddr> {
    self.peers.lock().unwrap().iter().copied().collect()
  }

  /// The chain update routine for an inbound block: duplicates are
  /// ignored, a hash mismatch at a height we already occupy is a
  /// fork, and anything that fails to extend the tail triggers a
  /// full chain sync.
  async fn handle_new_block(&mut self, block: Block) {
    let verdict = {
      let mut chain = self.chain.lock().unwrap();
      let height = chain.len() as u64;
      if block.index < height {
        match chain.block_at(block.index as usize) {
          Some(known) if known.hash == block.hash => Verdict::Duplicate,
          _ => Verdict::Fork(block.index),
        }
      } else if chain.add_block(block.clone()) {
        Verdict::Accepted(block)
      } else {
        Verdict::Rejected
      }
    };
    match verdict {
      Verdict::Duplicate => {
        debug!("received duplicate block, ignoring");
      }
      Verdict::Fork(height) => {
        warn!("fork detected at height {height}, requesting chain sync");
        self.emit(NodeEvent::ForkDetected { height });
        self.request_chain().await;
      }
      Verdict::Accepted(block) => {
        info!("accepted {block}");
        self.emit(NodeEvent::BlockAccepted(block));
      }
      Verdict::Rejected => {
        warn!("block does not extend the local chain, requesting sync");
        self.request_chain().await;
      }
    }
  }

  /// Answers a chain sync request: the whole chain in one datagram
  /// while it fits, one `CHAIN_BLOCK` per block beyond that.
  async fn send_chain(&self, to: SocketAddr) {
    let chain = self.chain.lock().unwrap().snapshot();
    let single = Message::ChainResponse {
      chain: chain.clone(),
    };
    match single.encode() {
      Ok(bytes) => {
        if let Err(e) = self.socket.send_to(&bytes, to).await {
          warn!("chain response to {to} failed: {e}");
        }
      }
      Err(WireError::Oversize) => {
        let total_blocks = chain.len() as u64;
        debug!("streaming {total_blocks} blocks to {to}");
        for (index, block) in chain.into_iter().enumerate() {
          let piece = Message::ChainBlock {
            index: index as u64,
            total_blocks,
            block,
          };
          self.send(&piece, to).await;
        }
      }
      Err(e) => warn!("failed to encode chain response: {e}"),
    }
  }

  /// Applies a fully received candidate chain.
  fn sync_chain(&self, candidate: Vec<Block>) {
    let (replaced, height) = {
      let mut chain = self.chain.lock().unwrap();
      (chain.replace_if_better(candidate), chain.len())
    };
    if replaced {
      info!("adopted a longer chain at height {height}");
      self.emit(NodeEvent::ChainReplaced { height });
    } else {
      debug!("candidate chain did not beat the local one");
    }
  }

  async fn request_chain(&self) {
    self.broadcast(&Message::RequestChain).await;
  }

  /// Sends to every known remote peer, logging and skipping past
  /// individual failures.
  async fn broadcast(&self, message: &Message) {
    let bytes = match message.encode() {
      Ok(bytes) => bytes,
      Err(e) => {
        warn!("failed to encode {message:?}: {e}");
        return;
      }
    };
    for peer in self.known_peers() {
      if let Err(e) = self.socket.send_to(&bytes, peer).await {
        warn!("send to {peer} failed: {e}");
      }
    }
  }

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
