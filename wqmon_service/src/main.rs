//! `wqmon`: water quality monitoring daemon and tools.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use wqmon_service::analysis::score_reading;
use wqmon_service::config::{self, ServiceConfig};
use wqmon_service::cycle::Analyzer;
use wqmon_service::db::PgStore;
use wqmon_service::logging::{self, Component};
use wqmon_service::model::ParameterValues;
use wqmon_service::network::{self, Network};
use wqmon_service::schedule::{Clock, ManualClock, PollLoop, Shutdown, SystemClock};
use wqmon_service::simulate::Simulator;
use wqmon_service::store::{MemoryStore, NodeDirectory};

/// Water quality monitoring for a pump → zone → colony network.
#[derive(Parser)]
#[command(name = "wqmon")]
#[command(about = "Water quality scoring, alerting and contamination simulation")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./wqmon.toml when present)
    #[arg(long, global = true, env = "WQMON_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, overrides the configuration file (e.g. "debug")
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analysis loop against PostgreSQL
    Analyze,

    /// Run the contamination simulator, writing readings to PostgreSQL
    Simulate {
        /// Network file to use instead of the database node directory
        #[arg(long)]
        network: Option<PathBuf>,
    },

    /// Run the simulator and the analyzer side by side
    Run {
        /// Network file to use instead of the database node directory
        #[arg(long)]
        network: Option<PathBuf>,
    },

    /// Score one reading: JSON on stdin, JSON result on stdout
    Score,

    /// Verify the database schema and print row counts
    CheckDb,

    /// Load a network file into the database node directory
    Seed {
        /// Network file
        #[arg(long)]
        network: Option<PathBuf>,
    },

    /// Offline run: simulator and analyzer in memory on a simulated clock,
    /// one JSON cycle report per line
    Demo {
        /// Network file
        #[arg(long)]
        network: Option<PathBuf>,

        /// Number of ticks to simulate
        #[arg(long, default_value = "60")]
        ticks: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ServiceConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    logging::init_logger(level, config.logging.file.as_deref()).context("initialising logging")?;

    match cli.command {
        Commands::Analyze => analyze(&config, &install_shutdown()?),
        Commands::Simulate { network } => {
            simulate(&config, network.as_deref(), &install_shutdown()?)
        }
        Commands::Run { network } => run(&config, network, install_shutdown()?),
        Commands::Score => score(),
        Commands::CheckDb => check_db(&config),
        Commands::Seed { network } => seed(&config, network.as_deref()),
        Commands::Demo { network, ticks } => demo(&config, network.as_deref(), ticks),
    }
}

fn install_shutdown() -> Result<Shutdown> {
    let shutdown = Shutdown::new();
    let handle = shutdown.clone();
    ctrlc::set_handler(move || {
        logging::info(Component::System, None, "shutdown requested");
        handle.trigger();
    })
    .context("installing Ctrl-C handler")?;
    Ok(shutdown)
}

fn open_store(config: &ServiceConfig) -> Result<PgStore> {
    let url = config::database_url()?;
    let store = PgStore::open(&url, config.analysis.store_timeout()).context("opening database")?;
    Ok(store)
}

/// The network file from the flag, else from the configuration.
fn network_path<'a>(config: &'a ServiceConfig, flag: Option<&'a Path>) -> Option<&'a Path> {
    flag.or(config.simulation.network.as_deref().map(Path::new))
}

fn load_network_for(
    config: &ServiceConfig,
    flag: Option<&Path>,
    store: &mut PgStore,
) -> Result<Network> {
    let network = match network_path(config, flag) {
        Some(path) => network::load_network(path)?,
        None => Network::build(store.load_nodes()?)?,
    };
    if network.is_empty() {
        bail!("node directory is empty; run `wqmon seed` first");
    }
    Ok(network)
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

fn analyze(config: &ServiceConfig, shutdown: &Shutdown) -> Result<()> {
    let store = open_store(config)?;
    let mut analyzer = Analyzer::new(store, SystemClock, config.analysis.stale_after());
    PollLoop::new(Component::Analyzer, config.analysis.interval())
        .run(shutdown, |_| analyzer.run_tick().map(|_| ()));
    Ok(())
}

fn simulate(config: &ServiceConfig, network: Option<&Path>, shutdown: &Shutdown) -> Result<()> {
    let mut store = open_store(config)?;
    let network = load_network_for(config, network, &mut store)?;
    logging::info(
        Component::Simulator,
        None,
        &format!("loaded {} nodes ({} pumps)", network.len(), network.pumps().len()),
    );

    let sim_config = &config.simulation;
    let mut simulator = Simulator::new(
        network,
        sim_config.propagation(),
        sim_config.glitch_probability,
        sim_config.seed,
    );
    let clock = SystemClock;
    PollLoop::new(Component::Simulator, sim_config.interval())
        .run(shutdown, |_| simulator.tick(&mut store, clock.now()).map(|_| ()));
    Ok(())
}

fn run(config: &ServiceConfig, network: Option<PathBuf>, shutdown: Shutdown) -> Result<()> {
    let sim_config = config.clone();
    let sim_shutdown = shutdown.clone();
    let simulator = thread::Builder::new()
        .name("simulator".to_string())
        .spawn(move || {
            let result = simulate(&sim_config, network.as_deref(), &sim_shutdown);
            // A simulator that cannot start takes the analyzer down with it.
            sim_shutdown.trigger();
            result
        })
        .context("spawning simulator thread")?;

    let analyzed = analyze(config, &shutdown);
    shutdown.trigger();

    let simulated = simulator
        .join()
        .map_err(|_| anyhow::anyhow!("simulator thread panicked"))?;
    analyzed.and(simulated)
}

// ---------------------------------------------------------------------------
// One-shot commands
// ---------------------------------------------------------------------------

fn score() -> Result<()> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input).context("reading stdin")?;
    let values: ParameterValues = serde_json::from_str(&input).context("parsing reading JSON")?;
    println!("{}", serde_json::to_string_pretty(&score_reading(&values))?);
    Ok(())
}

fn check_db(config: &ServiceConfig) -> Result<()> {
    let mut store = open_store(config)?;
    let counts = store.counts()?;
    println!("schema OK");
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}

fn seed(config: &ServiceConfig, network: Option<&Path>) -> Result<()> {
    let Some(path) = network_path(config, network) else {
        bail!("no network file given (use --network or simulation.network)");
    };
    let network = network::load_network(path)?;
    let records: Vec<_> = network.records().cloned().collect();

    let mut store = open_store(config)?;
    let written = store.upsert_nodes(&records)?;
    logging::info(
        Component::Store,
        None,
        &format!("seeded {} nodes from {}", written, path.display()),
    );
    Ok(())
}

fn demo(config: &ServiceConfig, network: Option<&Path>, ticks: u32) -> Result<()> {
    let path = network_path(config, network).unwrap_or(Path::new("network.toml"));
    let network = network::load_network(path)?;
    let records: Vec<_> = network.records().cloned().collect();

    let sim_config = &config.simulation;
    let mut simulator = Simulator::new(
        network,
        sim_config.propagation(),
        sim_config.glitch_probability,
        sim_config.seed,
    );

    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let mut analyzer = Analyzer::new(
        MemoryStore::with_nodes(records),
        Arc::clone(&clock),
        config.analysis.stale_after(),
    );
    let step = sim_config.step();

    for _ in 0..ticks {
        simulator.tick(analyzer.store_mut(), clock.now())?;
        let report = analyzer.run_tick()?;
        println!("{}", serde_json::to_string(&report)?);
        clock.advance(step);
    }
    Ok(())
}
