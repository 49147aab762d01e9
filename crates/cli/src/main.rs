// beanbench CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Logs go to stderr so stdout carries only the report (text or json).
// Design Decision: Any pool failure exits non-zero through anyhow.

mod output;
mod run;

use beanbench::config::{DEFAULT_HOST, DEFAULT_TUBE};
use beanbench::RunConfig;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "beanbench")]
#[command(about = "beanbench - Measure beanstalkd publish and read throughput")]
#[command(version)]
pub struct Cli {
    /// Number of concurrent publishers (0 disables publishing)
    #[arg(short, long, default_value_t = 1)]
    pub publishers: usize,

    /// Number of concurrent readers (defaults to the publisher count)
    #[arg(short, long)]
    pub readers: Option<usize>,

    /// Jobs to publish and to read
    #[arg(short = 'n', long, default_value_t = 10_000)]
    pub count: u64,

    /// Queue server address
    #[arg(short = 'H', long, env = "BEANBENCH_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Job body size in bytes
    #[arg(short, long, default_value_t = 256)]
    pub size: usize,

    /// Drain the tube before the run
    #[arg(short, long)]
    pub drain: bool,

    /// Jobs to put before the timed run starts
    #[arg(short, long, default_value_t = 0)]
    pub fill: u64,

    /// Tube to put on and reserve from
    #[arg(long, default_value = DEFAULT_TUBE)]
    pub tube: String,

    /// Upper bound on concurrent puts (defaults to 64 per publisher)
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json"])]
    pub output: String,
}

impl Cli {
    pub fn run_config(&self) -> RunConfig {
        let config = RunConfig::new(self.host.clone())
            .with_publishers(self.publishers)
            .with_readers(self.readers.unwrap_or(self.publishers))
            .with_job_count(self.count)
            .with_payload_size(self.size)
            .with_drain(self.drain)
            .with_prefill(self.fill)
            .with_tube(self.tube.clone());

        match self.max_in_flight {
            Some(max) => config.with_max_in_flight(max),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beanbench=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let output_format = output::OutputFormat::from_str(&cli.output);

    run::run(cli.run_config(), output_format).await
}
