use anyhow::{bail, Context};
use clap::Parser;
use futures::StreamExt;
use generator::template::sample_request_json;
use gui_bridge::bridge::GuiBridge;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use trafficcore::scenario_interface::ScenarioRequest;
use trafficcore::session::{ControlChannel, CONTROL_CAPACITY};
use workflow::config::ServerConfig;
use workflow::runner::{LogSink, Runner};

mod generator;
mod gui_bridge;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Traffic scenario generation and live simulation server")]
struct Args {
    /// Load the server config from YAML
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory holding generated scenarios
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Address for the HTTP bridge, e.g. 127.0.0.1:8000
    #[arg(long)]
    bind: Option<String>,
    /// Keep the HTTP bridge alive until Ctrl+C
    #[arg(long, default_value_t = false)]
    serve: bool,
    /// Run the generation pipeline once for a request file and print its progress lines
    #[arg(long, value_name = "REQUEST_JSON")]
    generate: Option<PathBuf>,
    /// Run one simulation of the current scenario for this many steps
    #[arg(long, value_name = "STEPS")]
    simulate: Option<u64>,
    /// Print a sample request built from the vehicle presets
    #[arg(long, default_value_t = false)]
    print_template: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.print_template {
        println!("{}", sample_request_json().context("serializing sample request")?);
        return Ok(());
    }

    let server_config = match &args.config {
        Some(path) => ServerConfig::load(path)?.with_overrides(args.data_dir, args.bind),
        None => ServerConfig::from_args(args.data_dir, args.bind),
    }
    .with_env();
    server_config.validate_origins()?;
    let runner = Runner::new(server_config.to_settings());

    let runtime = TokioBuilder::new_multi_thread()
        .enable_all()
        .build()
        .context("creating tokio runtime")?;

    if let Some(path) = &args.generate {
        runtime.block_on(generate_once(&runner, path))?;
    }
    if let Some(steps) = args.simulate {
        runtime.block_on(simulate_once(&runner, steps))?;
    }
    if args.serve {
        let addr = server_config.bind_addr()?;
        let bridge = GuiBridge::new(runner.clone(), server_config.allowed_origins.clone());
        runtime.block_on(async {
            let (_, server) = bridge.serve(addr, async {
                if let Err(err) = signal::ctrl_c().await {
                    warn!("could not listen for Ctrl+C: {err}");
                }
                info!("shutting down HTTP bridge");
            })?;
            server.await;
            Ok::<(), anyhow::Error>(())
        })?;
    } else if args.generate.is_none() && args.simulate.is_none() {
        info!("nothing to do; pass --serve, --generate, --simulate or --print-template");
    }

    Ok(())
}

async fn generate_once(runner: &Runner, path: &Path) -> anyhow::Result<()> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading request {}", path.display()))?;
    let request: ScenarioRequest = serde_json::from_str(&contents)
        .with_context(|| format!("parsing request {}", path.display()))?;
    let mut events = runner.generate(request).context("validating request")?;

    let mut last = None;
    while let Some(event) = events.next().await {
        print!("{}", event.to_line());
        last = Some(event);
    }
    match last {
        Some(event) if event.is_failure() => bail!("generation failed: {}", event.message),
        Some(_) => Ok(()),
        None => bail!("generation produced no progress events"),
    }
}

async fn simulate_once(runner: &Runner, steps: u64) -> anyhow::Result<()> {
    // Holding the sender keeps the run from being read as a stop request.
    let (_commands, control) = ControlChannel::pair(CONTROL_CAPACITY);
    let mut sink = LogSink::default();
    let outcome = runner
        .simulate(steps, &mut sink, control)
        .await
        .context("starting simulation")?;
    info!("simulation finished: {outcome:?} after {} frames", sink.frames());
    Ok(())
}
