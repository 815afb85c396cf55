use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{debug, info};

use patchbay_engine::{BuiltinLibrary, Engine, EngineConfig, EngineController, OfflineDriver};
use patchbay_interface::{
    uris, ClientInterface, EngineInterface, Path, Properties, Status, Value,
};

/// Standalone Patchbay host running the engine against the offline
/// driver.
#[derive(Parser)]
#[command(author, version, about = "Patchbay engine host")]
struct Cli {
    /// Sample rate in Hz.
    #[arg(long, default_value_t = 48_000)]
    sample_rate: u32,
    /// Frames per audio block.
    #[arg(long, default_value_t = 1024)]
    block_length: u32,
    /// Number of blocks to render before exiting.
    #[arg(long, default_value_t = 100)]
    blocks: usize,
    /// Build the demo patch (sine -> amp -> root output) before running.
    #[arg(long)]
    demo: bool,
}

/// Minimal console client: logs notifications and counts responses so
/// the host can wait for its requests to finish.
struct ConsoleClient {
    responses: AtomicUsize,
    failures: AtomicUsize,
}

impl ConsoleClient {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        })
    }
}

impl ClientInterface for ConsoleClient {
    fn uri(&self) -> &str {
        "urn:patchbay:console"
    }

    fn response(&self, id: i32, status: Status, subject: &str) {
        if status.is_success() {
            debug!(id, subject, "ok");
        } else {
            tracing::warn!(id, subject, %status, "request failed");
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.responses.fetch_add(1, Ordering::Relaxed);
    }

    fn put(&self, subject: &str, _properties: &Properties) {
        debug!(subject, "put");
    }

    fn delta(&self, subject: &str, _remove: &Properties, _add: &Properties) {
        debug!(subject, "delta");
    }

    fn del(&self, path: &Path) {
        debug!(%path, "deleted");
    }

    fn moved(&self, old_path: &Path, new_path: &Path) {
        debug!(%old_path, %new_path, "moved");
    }

    fn connected(&self, src_port: &Path, dst_port: &Path) {
        debug!(%src_port, %dst_port, "connected");
    }

    fn disconnected(&self, src_port: &Path, dst_port: &Path) {
        debug!(%src_port, %dst_port, "disconnected");
    }

    fn disconnected_all(&self, parent: &Path, object: &Path) {
        debug!(%parent, %object, "disconnected all");
    }

    fn property_change(&self, subject: &str, key: &str, _value: &Value) {
        debug!(subject, key, "property");
    }

    fn activity(&self, path: &Path) {
        debug!(%path, "activity");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if cli.block_length == 0 {
        bail!("block length must be non-zero");
    }

    let config = EngineConfig::new(cli.sample_rate, cli.block_length);
    let engine = Engine::new(config, Arc::new(BuiltinLibrary::new()));
    if engine.plugin_library().load() == 0 {
        bail!("plugin library is empty");
    }

    let driver = OfflineDriver::new(cli.sample_rate, cli.block_length);
    engine.set_driver(driver.clone());
    engine.activate().context("engine activation failed")?;

    let controller = EngineController::new(Arc::clone(&engine));
    let client = ConsoleClient::new();
    controller.register_client(client.clone());
    let mut expected = 1;

    if cli.demo {
        expected += build_demo(&controller)?;
    }
    wait_for_responses(&client, &driver, expected)?;
    if client.failures.load(Ordering::Relaxed) > 0 {
        bail!("graph setup failed; see log for the failing requests");
    }

    info!(blocks = cli.blocks, "rendering");
    driver.run_blocks(cli.blocks);

    let summary = engine.metrics().summary();
    info!(
        blocks = summary.blocks,
        mean_block_ns = summary.mean_block_ns,
        max_block_ns = summary.max_block_ns,
        events = summary.events,
        "render finished"
    );

    engine.shutdown();
    Ok(())
}

/// Builds sine -> amp -> root output; returns the number of requests
/// submitted.
fn build_demo(controller: &EngineController) -> Result<usize> {
    let osc = Path::new("/osc").context("demo path")?;
    let amp = Path::new("/amp").context("demo path")?;
    let out = Path::new("/out").context("demo path")?;

    controller.put(
        &osc,
        Properties::new()
            .with(uris::TYPE, Value::Uri(uris::CLASS_NODE.into()))
            .with(uris::INSTANCE_OF, Value::Uri("urn:patchbay:sine".into())),
    );
    controller.put(
        &amp,
        Properties::new()
            .with(uris::TYPE, Value::Uri(uris::CLASS_NODE.into()))
            .with(uris::INSTANCE_OF, Value::Uri("urn:patchbay:amp".into())),
    );
    controller.put(
        &out,
        Properties::new()
            .with(uris::TYPE, Value::Uri(uris::CLASS_PORT.into()))
            .with(uris::PORT_TYPE, Value::Uri(uris::AUDIO_PORT.into()))
            .with(uris::IS_OUTPUT, Value::Bool(true)),
    );
    controller.connect(&Path::new("/osc/out")?, &Path::new("/amp/in")?);
    controller.connect(&Path::new("/amp/out")?, &out);
    controller.set_property(&Path::new("/amp/gain")?, uris::VALUE, Value::Float(0.5));
    Ok(6)
}

/// Pumps empty blocks until every submitted request has been answered.
fn wait_for_responses(
    client: &ConsoleClient,
    driver: &OfflineDriver,
    expected: usize,
) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while client.responses.load(Ordering::Relaxed) < expected {
        // Prepared events only execute at block boundaries.
        driver.run_blocks(1);
        if Instant::now() > deadline {
            bail!("engine did not answer within the startup deadline");
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    Ok(())
}
