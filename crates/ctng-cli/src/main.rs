//! CTng launcher.
//!
//! One binary for every role: `ctng monitor M1`, `ctng ca C1`,
//! `ctng logger L1`, plus `keygen` for generating an environment's
//! settings and keystore and `script` for emitting the tmux run script.
//!
//! Exit codes: 0 on success, 1 on usage or setup failure.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ctng_core::config::TopologyParams;
use ctng_core::{BroadcastMode, CtngId, DistributionMode, Settings};
use ctng_crypto::Keyring;
use ctng_monitor::{Engine, HttpOutbound};
use tracing::info;

mod script;

#[derive(Parser)]
#[command(name = "ctng", about = "CTng gossip network launcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Environment to run in; selects config/<env>/ for settings and keys.
    #[arg(long, global = true, value_enum, default_value_t = Env::Local)]
    env: Env,

    /// Root of the per-environment configuration directories.
    #[arg(long, global = true, default_value = "config")]
    config_dir: PathBuf,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Env {
    Local,
    Deter,
}

impl Env {
    fn as_str(self) -> &'static str {
        match self {
            Env::Local => "local",
            Env::Deter => "deter",
        }
    }
}

impl std::fmt::Display for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a CA for one period.
    Ca {
        /// CA identifier, e.g. C1.
        id: CtngId,
    },
    /// Run a Logger for one period.
    Logger {
        /// Logger identifier, e.g. L1.
        id: CtngId,
    },
    /// Run a Monitor until the MUD timer expires.
    Monitor {
        /// Monitor identifier, e.g. M1.
        id: CtngId,
    },
    /// Generate run.sh, a tmux session launching the whole network.
    Script,
    /// Generate the environment's settings file and keystore.
    Keygen {
        #[arg(long, default_value_t = 1)]
        cas: usize,
        #[arg(long, default_value_t = 1)]
        loggers: usize,
        #[arg(long, default_value_t = 4)]
        monitors: usize,
        /// Tolerated faulty monitors (f); the BLS threshold is f+1.
        #[arg(long, default_value_t = 1)]
        mal: usize,
        #[arg(long, value_enum, default_value_t = Dmode::Eea)]
        dmode: Dmode,
        #[arg(long, value_enum, default_value_t = Bmode::MinWt)]
        bmode: Bmode,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Dmode {
    Default,
    Eea,
}

impl std::fmt::Display for Dmode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Dmode::Default => "default",
            Dmode::Eea => "eea",
        })
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Bmode {
    MinWt,
    MinBc,
}

impl std::fmt::Display for Bmode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Bmode::MinWt => "min-wt",
            Bmode::MinBc => "min-bc",
        })
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Usage errors (and --help/--version) exit through here; only
            // real parse failures are failures.
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ctng: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn run(cli: Cli) -> Result<()> {
    let env_dir = cli.config_dir.join(cli.env.as_str());
    let settings_path = env_dir.join("settings.json");
    let keys_path = env_dir.join("keys.json");

    match cli.command {
        Commands::Ca { id } => {
            let settings = Settings::load(&settings_path)
                .with_context(|| format!("loading {}", settings_path.display()))?;
            let keyring = Keyring::load(&keys_path)
                .with_context(|| format!("loading {}", keys_path.display()))?;
            let ca = ctng_ca::Ca::new(id, keyring, settings)?;
            let mut rng = rand::thread_rng();
            ca.run_period(&mut rng).await?;
        }
        Commands::Logger { id } => {
            let settings = Settings::load(&settings_path)
                .with_context(|| format!("loading {}", settings_path.display()))?;
            let keyring = Keyring::load(&keys_path)
                .with_context(|| format!("loading {}", keys_path.display()))?;
            let logger = ctng_logger::Logger::new(id, keyring, settings)?;
            logger.run_period().await?;
        }
        Commands::Monitor { id } => {
            let settings = Settings::load(&settings_path)
                .with_context(|| format!("loading {}", settings_path.display()))?;
            let keyring = Keyring::load(&keys_path)
                .with_context(|| format!("loading {}", keys_path.display()))?;
            let mud = settings.mud;
            let engine = Engine::new(id, settings, keyring, Box::new(HttpOutbound::new()))?;

            // End-of-experiment timer: dump convergence records, then the
            // process is done.
            let dumper = engine.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(mud)).await;
                match dumper.dump_records(".") {
                    Ok(path) => info!(path = %path.display(), "convergence records dumped"),
                    Err(err) => tracing::error!(%err, "convergence dump failed"),
                }
                std::process::exit(0);
            });

            ctng_monitor::server::serve(engine).await?;
        }
        Commands::Script => {
            let settings = Settings::load(&settings_path)
                .with_context(|| format!("loading {}", settings_path.display()))?;
            let path =
                script::generate_run_script(&settings, cli.env.as_str(), Path::new("."))?;
            info!(path = %path.display(), "run script generated");
        }
        Commands::Keygen {
            cas,
            loggers,
            monitors,
            mal,
            dmode,
            bmode,
        } => {
            std::fs::create_dir_all(&env_dir)
                .with_context(|| format!("creating {}", env_dir.display()))?;
            let params = topology_for(cli.env, cas, loggers, monitors, mal, dmode, bmode);
            let settings = Settings::from_topology(&params);
            settings.validate()?;
            settings.save(&settings_path)?;

            let mut rng = rand::thread_rng();
            let keyring = Keyring::generate(cas, loggers, monitors, mal + 1, &mut rng)?;
            keyring.save(&keys_path)?;
            info!(
                settings = %settings_path.display(),
                keys = %keys_path.display(),
                "environment generated"
            );
        }
    }
    Ok(())
}

fn topology_for(
    env: Env,
    cas: usize,
    loggers: usize,
    monitors: usize,
    mal: usize,
    dmode: Dmode,
    bmode: Bmode,
) -> TopologyParams {
    let distribution_mode = match dmode {
        Dmode::Default => DistributionMode::Default,
        Dmode::Eea => DistributionMode::Eea,
    };
    let broadcasting_mode = match bmode {
        Bmode::MinWt => BroadcastMode::MinWt,
        Bmode::MinBc => BroadcastMode::MinBc,
    };
    match env {
        // Everything on loopback, sequential ports.
        Env::Local => TopologyParams {
            num_cas: cas,
            num_loggers: loggers,
            num_monitors: monitors,
            mal,
            ca_mask: "127.0.0.".into(),
            ca_offset: 1,
            logger_mask: "127.0.0.".into(),
            logger_offset: 1,
            monitor_mask: "127.0.0.".into(),
            monitor_offset: 1,
            starting_port: 8000,
            update_wait_time: 5,
            mature_wait_time: 0,
            response_wait_time: 6,
            verification_wait_time: 10,
            mud: 60,
            distribution_mode,
            broadcasting_mode,
            crv_size: 100_000_000,
            revocation_ratio: 0.002,
            certificate_size: 2000,
            certificate_per_logger: 5000,
        },
        // Testbed address plan: one host per entity on 172.30.0.0/24.
        Env::Deter => TopologyParams {
            num_cas: cas,
            num_loggers: loggers,
            num_monitors: monitors,
            mal,
            ca_mask: "172.30.0.".into(),
            ca_offset: 11,
            logger_mask: "172.30.0.".into(),
            logger_offset: 20,
            monitor_mask: "172.30.0.".into(),
            monitor_offset: 28,
            starting_port: 8000,
            update_wait_time: 5,
            mature_wait_time: 0,
            response_wait_time: 6,
            verification_wait_time: 10,
            mud: 60,
            distribution_mode,
            broadcasting_mode,
            crv_size: 100_000_000,
            revocation_ratio: 0.002,
            certificate_size: 2000,
            certificate_per_logger: 5000,
        },
    }
}
