//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use clap::{Subcommand, ValueEnum};
use eventide_core::catalog::Catalog;
use eventide_core::config::EventideConfig;
use eventide_core::sink::{ConsoleSink, EventSink, FileSink, NullSink, spawn_sink_writer};
use eventide_core::tracing_setup::{CliLogLevel, init_tracing};
use eventide_sim::{ShardOptions, SimulationContext, default_shards, run_sharded};

/// Where generated events go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputKind {
    /// `topic<TAB>json` lines on stdout
    Console,
    /// One newline-delimited JSON file per topic
    File,
    /// Discard events, keep the report
    None,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Generate an event log
    Run {
        /// JSON configuration file; defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// JSON catalog of videos and songs; a small demo catalog when omitted
        #[arg(long)]
        catalog: Option<PathBuf>,
        #[arg(short, long, value_enum, default_value = "console")]
        output: OutputKind,
        /// Directory for `--output file`
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
        #[arg(long)]
        seed: Option<u64>,
        /// Initial number of users
        #[arg(short, long)]
        users: Option<usize>,
        /// Start of the simulated window (RFC 3339)
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        /// End of the simulated window (RFC 3339)
        #[arg(long)]
        end: Option<DateTime<Utc>>,
        /// Scheduler shards; 0 uses one per CPU
        #[arg(long)]
        shards: Option<usize>,
        #[arg(long, value_enum, default_value = "info")]
        log_level: CliLogLevel,
        /// Directory for the full trace log
        #[arg(long)]
        logs_dir: Option<PathBuf>,
    },
    /// Check a configuration and its page graph without generating events
    Validate {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Print the default configuration as JSON
    PrintConfig,
}

/// Overrides given on the command line, applied over file and environment.
#[derive(Debug, Default)]
struct Overrides {
    seed: Option<u64>,
    users: Option<usize>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    shards: Option<usize>,
}

impl Overrides {
    fn apply(&self, config: &mut EventideConfig) {
        if let Some(seed) = self.seed {
            config.simulation.seed = seed;
        }
        if let Some(users) = self.users {
            config.simulation.n_users = users;
        }
        if let Some(start) = self.start {
            config.simulation.start_time = start;
        }
        if let Some(end) = self.end {
            config.simulation.end_time = end;
        }
        match self.shards {
            Some(0) => config.output.shards = default_shards(),
            Some(shards) => config.output.shards = shards,
            None => {}
        }
    }
}

/// Handle the CLI command
///
/// # Errors
/// Returns the error of the command that failed
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            config,
            catalog,
            output,
            output_dir,
            seed,
            users,
            start,
            end,
            shards,
            log_level,
            logs_dir,
        } => {
            init_tracing(log_level.as_tracing_level(), logs_dir.as_deref())
                .context("Failed to initialize tracing")?;
            let overrides = Overrides {
                seed,
                users,
                start,
                end,
                shards,
            };
            run(config.as_deref(), catalog.as_deref(), output, &output_dir, &overrides).await
        }
        Commands::Validate { config, catalog } => validate(&config, catalog.as_deref()),
        Commands::PrintConfig => print_config(),
    }
}

/// Loads the configuration file (or defaults), then environment overrides,
/// then command-line overrides.
fn load_config(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<EventideConfig> {
    let mut config = match path {
        Some(path) => EventideConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => EventideConfig::default(),
    };
    config.apply_env_overrides()?;
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn load_catalog(path: Option<&Path>, config: &EventideConfig) -> anyhow::Result<Catalog> {
    let interval = Duration::try_from_secs_f64(config.ads.breakpoint_interval)
        .context("Breakpoint interval does not fit a duration")?;
    match path {
        Some(path) => Catalog::from_json_file(path, interval)
            .with_context(|| format!("Failed to load catalog {}", path.display())),
        None => {
            tracing::info!("No catalog given, using the demo catalog");
            Ok(Catalog::demo(interval))
        }
    }
}

fn open_sink(output: OutputKind, output_dir: &Path) -> anyhow::Result<Box<dyn EventSink>> {
    Ok(match output {
        OutputKind::Console => Box::new(ConsoleSink),
        OutputKind::File => Box::new(FileSink::new(output_dir)?),
        OutputKind::None => Box::new(NullSink),
    })
}

/// Runs a simulation and streams its events through a buffered sink writer.
///
/// # Errors
/// - Configuration, catalog or output directory cannot be loaded
/// - The simulation fails
/// - The sink writer fails to flush
async fn run(
    config_path: Option<&Path>,
    catalog_path: Option<&Path>,
    output: OutputKind,
    output_dir: &Path,
    overrides: &Overrides,
) -> anyhow::Result<()> {
    let config = load_config(config_path, overrides)?;
    let catalog = load_catalog(catalog_path, &config)?;
    let ctx = Arc::new(SimulationContext::new(&config, catalog)?);
    let options = ShardOptions::from_config(&config.output);

    tracing::info!(
        seed = config.simulation.seed,
        users = config.simulation.n_users,
        shards = options.shards,
        start = %config.simulation.start_time,
        end = %config.simulation.end_time,
        "Starting run"
    );

    let (mut channel, writer) = spawn_sink_writer(open_sink(output, output_dir)?, options.capacity);
    let report = tokio::task::spawn_blocking(move || run_sharded(ctx, options, &mut channel))
        .await
        .context("Simulation task failed")??;
    let stats = writer.finish().await?;

    eprintln!("{}", report.summary());
    eprintln!("sink:               {} delivered, {} failed", stats.delivered, stats.failed);
    if output == OutputKind::File {
        eprintln!("output directory:   {}", output_dir.display());
    }
    Ok(())
}

/// Loads a configuration and builds everything a run needs.
///
/// # Errors
/// - Configuration fails to parse or validate
/// - Page graph or population tables are inconsistent
fn validate(config_path: &Path, catalog_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(Some(config_path), &Overrides::default())?;
    let catalog = load_catalog(catalog_path, &config)?;
    let ctx = SimulationContext::new(&config, catalog)?;

    if ctx.catalog().is_empty() {
        bail!("Catalog holds no videos or songs");
    }

    println!("Configuration OK: {}", config_path.display());
    println!("  States:      {}", ctx.graph().len());
    println!("  Transitions: {}", config.transitions.len());
    println!("  Tiers:       {}", ctx.ladder().tiers().join(" < "));
    println!("  Videos:      {}", ctx.catalog().videos().len());
    println!("  Songs:       {}", ctx.catalog().songs().len());
    println!(
        "  Window:      {} .. {}",
        config.simulation.start_time, config.simulation.end_time
    );
    Ok(())
}

fn print_config() -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&EventideConfig::default())?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = EventideConfig::default();
        let overrides = Overrides {
            seed: Some(9),
            users: Some(3),
            shards: Some(2),
            ..Overrides::default()
        };

        overrides.apply(&mut config);

        assert_eq!(config.simulation.seed, 9);
        assert_eq!(config.simulation.n_users, 3);
        assert_eq!(config.output.shards, 2);
    }

    #[test]
    fn test_zero_shards_means_one_per_cpu() {
        let mut config = EventideConfig::default();
        let overrides = Overrides {
            shards: Some(0),
            ..Overrides::default()
        };

        overrides.apply(&mut config);

        assert_eq!(config.output.shards, default_shards());
    }

    #[test]
    fn test_validate_accepts_default_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let json = serde_json::to_string(&EventideConfig::default()).unwrap();
        std::fs::write(&path, json).unwrap();

        validate(&path, None).unwrap();
    }

    #[test]
    fn test_load_catalog_rejects_unrepresentable_interval() {
        let mut config = EventideConfig::default();
        config.ads.breakpoint_interval = f64::INFINITY;
        assert!(load_catalog(None, &config).is_err());

        config.ads.breakpoint_interval = 900.0;
        assert!(!load_catalog(None, &config).unwrap().is_empty());
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = EventideConfig::default();
        config.simulation.end_time = config.simulation.start_time;
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        assert!(validate(&path, None).is_err());
    }
}
