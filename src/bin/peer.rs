use {
  clap::Parser,
  futures::StreamExt,
  suffrage::{
    cli::PeerOpts,
    consensus::{genesis, Transaction},
    network::{NodeEvent, Peer},
  },
  tokio::io::{AsyncBufReadExt, BufReader},
  tracing::{info, warn, Level},
  tracing_subscriber::{
    filter::filter_fn,
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
    Layer,
  },
};

fn init_tracing(verbose: u64) {
  let loglevel = match verbose {
    1 => Level::DEBUG,
    2 => Level::TRACE,
    _ => Level::INFO,
  };
  tracing_subscriber::registry()
    .with(
      tracing_subscriber::fmt::layer()
        .with_filter(filter_fn(move |metadata| metadata.level() <= &loglevel)),
    )
    .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let opts = PeerOpts::parse();
  init_tracing(opts.verbose);

  info!("Starting suffrage peer");
  info!("Version: {}", env!("CARGO_PKG_VERSION"));
  info!("Local endpoint: {}:{}", opts.local_addr, opts.local_port);
  info!("Tracker: {}", opts.tracker());
  info!("Difficulty: {}", opts.difficulty);
  info!("Genesis hash: {}", genesis().hash);
  if opts.malicious {
    warn!("adversarial mining enabled, mined blocks will be corrupt");
  }

  let (peer, mut events) = Peer::bind(opts.peer_config()).await?;
  info!("Peer bound to {}", peer.local_addr());

  peer.connect().await?;
  let ballot = peer.request_ballot_options().await?;
  println!("Ballot: {}", ballot.join(", "));
  println!("Commands: vote <voter_id> <candidate>, tally, chain, peers, quit");

  let stdin = BufReader::new(tokio::io::stdin());
  let mut lines = stdin.lines();

  loop {
    tokio::select! {
      Some(event) = events.next() => report(event),
      line = lines.next_line() => match line? {
        Some(line) => {
          if !handle_command(&peer, &ballot, line.trim()).await {
            break;
          }
        }
        None => break,
      },
    }
  }

  peer.leave_network().await;
  info!("peer closed");
  Ok(())
}

fn report(event: NodeEvent) {
  match event {
    NodeEvent::Registered { peers } => {
      info!("registered, {} other peer(s) known", peers.len());
    }
    NodeEvent::BallotReceived(options) => {
      info!("ballot received: {}", options.join(", "));
    }
    NodeEvent::BlockAccepted(block) => {
      info!("accepted {block} from the network");
    }
    NodeEvent::ForkDetected { height } => {
      warn!("fork detected at height {height}, syncing");
    }
    NodeEvent::ChainReplaced { height } => {
      info!("chain replaced, now at height {height}");
    }
    NodeEvent::PeersUpdated(peers) => {
      info!("peer list updated, {} other peer(s) known", peers.len());
    }
  }
}

/// Executes one console command. Returns false when the user asked
/// to quit.
async fn handle_command(peer: &Peer, ballot: &[String], line: &str) -> bool {
  let mut parts = line.split_whitespace();
  match parts.next() {
    None => true,
    Some("vote") => {
      let (voter, candidate) = match (parts.next(), parts.next()) {
        (Some(voter), Some(candidate)) => (voter, candidate),
        _ => {
          println!("usage: vote <voter_id> <candidate>");
          return true;
        }
      };
      if !ballot.iter().any(|option| option == candidate) {
        println!(
          "unknown candidate {candidate}, ballot: {}",
          ballot.join(", ")
        );
        return true;
      }
      match peer.submit_vote(Transaction::new(voter, candidate)).await {
        Ok(block) => println!("vote sealed into {block}"),
        Err(e) => println!("vote failed: {e}"),
      }
      true
    }
    Some("tally") => {
      let tally = peer.tally();
      if tally.is_empty() {
        println!("no votes recorded yet");
      }
      for (candidate, votes) in tally {
        println!("{candidate}: {votes}");
      }
      true
    }
    Some("chain") => {
      let snapshot = peer.snapshot();
      for block in &snapshot.blocks {
        println!(
          "{block} prev={} nonce={} txs={}",
          block.previous_hash.get(..10).unwrap_or(&block.previous_hash),
          block.nonce,
          block.transactions.len()
        );
      }
      true
    }
    Some("peers") => {
      for addr in peer.peers() {
        println!("{addr}");
      }
      true
    }
    Some("quit") | Some("exit") => false,
    Some(other) => {
      println!("unknown command: {other}");
      true
    }
  }
}
