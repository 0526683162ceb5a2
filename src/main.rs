use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use firehose_bench::controller::{parse_window_size, FirehoseDefaults};
use firehose_bench::report::{JsonLinesSink, ReportSink, TracingSink};
use firehose_bench::stream::proto::{FirehoseEndpoint, DEFAULT_RELAY, DEFAULT_START_CURSOR};
use firehose_bench::{BackendKind, Controller, FirehoseConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Measures how fast a relay firehose can be drained.
#[derive(Debug, Parser)]
#[command(name = "firehose-bench", version)]
struct Args {
    /// Concurrency engine: `reactor` (alias `eventmachine`) or `cooperative`
    /// (alias `async`).
    engine: String,

    /// Number of events per throughput report, e.g. 30000.
    #[arg(allow_hyphen_values = true)]
    window: String,

    /// Relay host.
    #[arg(long, default_value = DEFAULT_RELAY)]
    relay: String,

    /// Resumption cursor sent on connect.
    #[arg(long, default_value = DEFAULT_START_CURSOR, conflicts_with = "no_cursor")]
    cursor: String,

    /// Connect without a cursor and start at the live head.
    #[arg(long)]
    no_cursor: bool,

    /// Full websocket URL; overrides --relay and --insecure.
    #[arg(long, env = "FIREHOSE_ENDPOINT")]
    endpoint: Option<String>,

    /// Use plain `ws://` instead of `wss://`.
    #[arg(long)]
    insecure: bool,

    /// Connect timeout in seconds; 0 disables the timeout.
    #[arg(long, default_value_t = FirehoseDefaults::CONNECT_TIMEOUT.as_secs())]
    connect_timeout_secs: u64,

    /// Log a hex preview of the first BYTES bytes of every payload.
    #[arg(long, value_name = "BYTES")]
    inspect: Option<usize>,

    /// Write reports as JSON lines on stdout.
    #[arg(long)]
    json: bool,
}

impl Args {
    fn config(&self) -> anyhow::Result<FirehoseConfig> {
        let backend: BackendKind = self.engine.parse()?;
        let window_size = parse_window_size(&self.window)?;

        let mut endpoint = FirehoseEndpoint::new(&self.relay).with_secure(!self.insecure);
        endpoint = if self.no_cursor {
            endpoint.without_cursor()
        } else {
            endpoint.with_cursor(&self.cursor)
        };
        if let Some(url) = self.endpoint.as_deref() {
            endpoint = endpoint.with_endpoint(url);
        }

        let connect_timeout =
            (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs));

        Ok(FirehoseConfig::default()
            .with_backend(backend)
            .with_endpoint(endpoint)
            .with_window_size(window_size)
            .with_connect_timeout(connect_timeout)
            .with_inspection(self.inspect))
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = args.config()?;
    let sink: Arc<dyn ReportSink> = if args.json {
        Arc::new(JsonLinesSink)
    } else {
        Arc::new(TracingSink)
    };

    let controller = Controller::new(sink);
    let stop = controller.stop_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    info!("Starting firehose process using the {} engine", config.backend);
    let summary = controller
        .start(&config)
        .await
        .context("firehose run failed")?;
    info!(
        outcome = ?summary.outcome,
        messages = summary.messages,
        "Firehose run finished"
    );
    Ok(())
}
