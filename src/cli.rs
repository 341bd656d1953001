use {
  crate::{
    consensus::DEFAULT_DIFFICULTY,
    network::{PeerConfig, TrackerConfig},
  },
  clap::Parser,
  std::net::{IpAddr, SocketAddr},
};

/// Command line surface of the voting peer.
#[derive(Debug, Parser)]
#[clap(name = "peer", version, about = "suffrage voting peer")]
pub struct PeerOpts {
  #[clap(help = "UDP port to bind locally")]
  pub local_port: u16,

  #[clap(help = "local IP address to bind")]
  pub local_addr: IpAddr,

  #[clap(help = "port the tracker listens on")]
  pub tracker_port: u16,

  #[clap(help = "IP address of the tracker")]
  pub tracker_addr: IpAddr,

  #[clap(
    long,
    default_value_t = DEFAULT_DIFFICULTY,
    help = "leading zero hex digits required of block hashes"
  )]
  pub difficulty: usize,

  #[clap(
    long,
    help = "mine deliberately corrupt blocks (adversarial testing only)"
  )]
  pub malicious: bool,

  #[clap(
    short,
    long,
    parse(from_occurrences),
    help = "Use verbose output (-vv very verbose output)"
  )]
  pub verbose: u64,
}

impl PeerOpts {
  pub fn tracker(&self) -> SocketAddr {
    SocketAddr::new(self.tracker_addr, self.tracker_port)
  }

  pub fn peer_config(&self) -> PeerConfig {
    PeerConfig {
      local_addr: self.local_addr,
      local_port: self.local_port,
      tracker: self.tracker(),
      difficulty: self.difficulty,
      malicious: self.malicious,
    }
  }
}

/// Command line surface of the tracker.
#[derive(Debug, Parser)]
#[clap(name = "tracker", version, about = "suffrage rendezvous tracker")]
pub struct TrackerOpts {
  #[clap(help = "UDP port to listen on")]
  pub listen_port: u16,

  #[clap(help = "IP address to bind")]
  pub bind_addr: IpAddr,

  #[clap(help = "comma-separated ballot options")]
  pub ballot_options: String,

  #[clap(
    short,
    long,
    parse(from_occurrences),
    help = "Use verbose output (-vv very verbose output)"
  )]
  pub verbose: u64,
}

impl TrackerOpts {
  /// The ordered candidate list: comma-split, trimmed, empties
  /// dropped.
  pub fn ballot(&self) -> Vec<String> {
    self
      .ballot_options
      .split(',')
      .map(|option| option.trim().to_owned())
      .filter(|option| !option.is_empty())
      .collect()
  }

  pub fn tracker_config(&self) -> TrackerConfig {
    TrackerConfig {
      bind_addr: self.bind_addr,
      port: self.listen_port,
    }
  }
}
