use {
  clap::Parser,
  suffrage::{cli::TrackerOpts, network::Tracker},
  tracing::{info, Level},
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
  let opts = TrackerOpts::parse();
  init_tracing(opts.verbose);

  let ballot = opts.ballot();
  info!("Starting suffrage tracker");
  info!("Version: {}", env!("CARGO_PKG_VERSION"));
  info!("Listen address: {}:{}", opts.bind_addr, opts.listen_port);
  info!("Ballot options: {}", ballot.join(", "));

  let tracker = Tracker::bind(
    opts.tracker_config(),
    Box::new(move || ballot.clone()),
  )
  .await?;
  info!("Tracker listening on {}", tracker.local_addr());

  tracker.wait().await;
  Ok(())
}
