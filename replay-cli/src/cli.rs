use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use graphite::{GraphiteConfig, Protocol};
use replay_engine::{ReplayConfig, RetryPolicy, TimeWindow};

use crate::error::AppError;

#[derive(Parser, Debug, Clone)]
#[command(name = "whisper-replay", author, version, about, long_about = None)]
pub struct Args {
    /// Directory metric names are derived from
    #[arg(
        long = "basedirectory",
        value_name = "DIR",
        default_value = "/var/lib/graphite/whisper"
    )]
    pub base_directory: PathBuf,

    /// Directory tree to replay
    #[arg(
        long = "directory",
        value_name = "DIR",
        default_value = "/var/lib/graphite/whisper/collectd"
    )]
    pub directory: PathBuf,

    /// Graphite host
    #[arg(long, default_value = "127.0.0.1", env = "GRAPHITE_HOST")]
    pub host: String,

    /// Graphite port
    #[arg(long, default_value_t = 2003, env = "GRAPHITE_PORT")]
    pub port: u16,

    /// Transport: tcp, udp or nop
    #[arg(long, default_value = "tcp")]
    pub protocol: String,

    /// Prefix prepended to every metric name
    #[arg(long)]
    pub prefix: Option<String>,

    /// Number of concurrent workers
    #[arg(long, default_value_t = 5)]
    pub workers: usize,

    /// Earliest timestamp to replay (epoch seconds)
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub from: i64,

    /// Latest timestamp to replay (epoch seconds)
    #[arg(long, default_value_t = 2147483647, allow_negative_numbers = true)]
    pub to: i64,

    /// Points per second across all workers, 0 for unlimited
    #[arg(long, default_value_t = 0)]
    pub pps: u64,

    /// Send attempts per file
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// TCP connect timeout in seconds
    #[arg(long, default_value_t = 5)]
    pub timeout: u64,

    /// Do not log metrics with the nop protocol
    #[arg(long)]
    pub disable_log: bool,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}

/// Validated settings for one run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub replay: ReplayConfig,
    pub graphite: GraphiteConfig,
}

impl TryFrom<Args> for RunSettings {
    type Error = AppError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let protocol = Protocol::parse(&args.protocol)?;
        if args.workers == 0 {
            return Err(AppError::InvalidInput(
                "--workers must be at least 1".to_string(),
            ));
        }
        let window = TimeWindow::new(args.from, args.to)?;

        let mut graphite = GraphiteConfig::new(protocol, args.host, args.port)
            .with_timeout(Duration::from_secs(args.timeout))
            .with_disable_log(args.disable_log);
        if let Some(prefix) = args.prefix {
            graphite = graphite.with_prefix(prefix);
        }

        let replay = ReplayConfig::new(args.base_directory, args.directory)
            .with_window(window)
            .with_workers(args.workers)
            .with_points_per_second(args.pps)
            .with_retry(RetryPolicy::new(args.retries));
        replay.validate()?;

        Ok(Self { replay, graphite })
    }
}
