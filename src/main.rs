use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use spritetyper::{
    cdp::CdpSurface,
    clock::SystemClock,
    config::{Config, ConfigStore, FileConfigStore},
    round::{RoundController, RoundSettings},
    supervisor::{Supervisor, SupervisorSettings},
};
use std::{error::Error, path::PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// hands-free player for browser typing games
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Watches the word a browser typing game expects, types it at a human cadence through Chrome DevTools, submits the score when the round ends and starts the next one, forever."
)]
pub struct Cli {
    /// DevTools WebSocket of the game tab (ws://127.0.0.1:9222/devtools/page/<id>)
    #[clap(long, required_unless_present = "print_config")]
    devtools_url: Option<String>,

    /// config file to read (defaults to the per-user config directory)
    #[clap(short = 'c', long)]
    config: Option<PathBuf>,

    /// round duration budget in milliseconds
    #[clap(long)]
    round_duration_ms: Option<u64>,

    /// full page refresh interval in milliseconds, 0 disables
    #[clap(long)]
    refresh_interval_ms: Option<u64>,

    /// seed for the timing and typo generator, for reproducible runs
    #[clap(long)]
    seed: Option<u64>,

    /// print the effective configuration as JSON and exit
    #[clap(long)]
    print_config: bool,

    /// write the effective configuration back to the config file before running
    #[clap(long)]
    save_config: bool,
}

impl Cli {
    fn config_store(&self) -> FileConfigStore {
        match &self.config {
            Some(path) => FileConfigStore::with_path(path),
            None => FileConfigStore::new(),
        }
    }

    /// Apply command line overrides on top of the stored config
    fn effective_config(&self, stored: Config) -> Config {
        let mut cfg = stored;
        if let Some(ms) = self.round_duration_ms {
            cfg.round_duration_ms = ms;
        }
        if let Some(ms) = self.refresh_interval_ms {
            cfg.refresh_interval_ms = ms;
        }
        cfg.validated()
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = cli.config_store();
    let cfg = cli.effective_config(store.load());

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(());
    }
    if cli.save_config {
        store.save(&cfg)?;
        info!(path = %store.path().display(), "config saved");
    }

    let url = cli
        .devtools_url
        .as_deref()
        .ok_or("--devtools-url is required")?;
    let surface = CdpSurface::connect(url, cfg.selectors.clone())?;
    let rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let controller = RoundController::new(
        surface,
        SystemClock::new(),
        rng,
        RoundSettings::from(&cfg),
    );
    let mut supervisor = Supervisor::new(controller, SupervisorSettings::from(&cfg));
    supervisor.start();

    Ok(())
}
