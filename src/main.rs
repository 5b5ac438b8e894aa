/*!
 * Locus CLI - Command Line Interface
 *
 * Runs a provider chain declared in a TOML file and prints every fix as one
 * JSON object per line on stdout. Diagnostics go to stderr.
 */

use clap::{Parser, Subcommand, ValueEnum};
use locus::{
    config::{LocusConfig, LogLevel, Preset, ProviderSpec},
    error::{LocusError, Result, EXIT_SUCCESS},
    failover::{FailoverError, Reading, ServiceConnectionState, UpdateListener},
    logging, providers::ProviderRegistry, Locus,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "locus")]
#[command(version, about = "Location provider chains with automatic failover", long_about = None)]
struct Cli {
    /// Log level
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Write JSON logs to this file instead of stderr
    #[arg(long = "log", value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    /// Verbose output (debug level)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured provider chain and stream fixes as JSON lines
    Run {
        /// Configuration file
        #[arg(short = 'c', long, value_name = "FILE")]
        config: PathBuf,

        /// Stop after the first fix
        #[arg(long)]
        once: bool,

        /// Override the configured location preset
        #[arg(long, value_enum)]
        preset: Option<PresetArg>,

        /// Stop after this many seconds (default: until interrupted)
        #[arg(long, value_name = "SECS")]
        duration_secs: Option<u64>,
    },

    /// Validate a configuration file and the provider chain it declares
    Check {
        /// Configuration file
        #[arg(short = 'c', long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Write a starter configuration file
    Init {
        /// Destination path
        #[arg(short = 'o', long, value_name = "FILE", default_value = "locus.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum PresetArg {
    Navigation,
    BestEffort,
    Lazy,
}

impl From<PresetArg> for Preset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::Navigation => Preset::Navigation,
            PresetArg::BestEffort => Preset::BestEffort,
            PresetArg::Lazy => Preset::Lazy,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force),
        Commands::Check { config } => {
            let config = load_config(&config, cli.log_level, cli.log, cli.verbose)?;
            check_config(&config)
        }
        Commands::Run {
            config,
            once,
            preset,
            duration_secs,
        } => {
            let mut config = load_config(&config, cli.log_level, cli.log, cli.verbose)?;
            if let Some(preset) = preset {
                config.preset = preset.into();
            }
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(stream_fixes(config, once, duration_secs.map(Duration::from_secs)))
        }
    }
}

/// Load the file, apply CLI overrides and set up logging
fn load_config(
    path: &Path,
    log_level: Option<LogLevelArg>,
    log_file: Option<PathBuf>,
    verbose: bool,
) -> Result<LocusConfig> {
    let mut config = LocusConfig::from_file(path)?;
    if let Some(level) = log_level {
        config.log_level = level.into();
    }
    if log_file.is_some() {
        config.log_file = log_file;
    }
    config.verbose |= verbose;

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }
    Ok(config)
}

fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(LocusError::Config(format!(
            "{} already exists (use --force to overwrite)",
            output.display()
        )));
    }

    let mut config = LocusConfig::default();
    let mut fused = ProviderSpec::new("fused", "simulated");
    fused.service_backed = true;
    fused.single_shot = false;
    fused.connect_after_ms = Some(200);
    fused.origin = Some([51.5007, -0.1246]);
    let mut gps = ProviderSpec::new("gps", "simulated");
    gps.origin = Some([51.5007, -0.1246]);
    config.providers = vec![fused, gps];
    config.connect_timeout_ms = Some(5_000);

    config.to_file(output)?;
    eprintln!("Wrote {}", output.display());
    Ok(())
}

fn check_config(config: &LocusConfig) -> Result<()> {
    config.validate()?;
    let registry = ProviderRegistry::new();
    let chain = registry.create_all(&config.providers)?;

    eprintln!("Session:  {}", config.session);
    eprintln!("Preset:   {:?}", config.preset);
    match config.connect_timeout() {
        Some(timeout) => eprintln!("Timeout:  {:?}", timeout),
        None => eprintln!("Timeout:  disabled"),
    }
    eprintln!("Chain:");
    for (i, provider) in chain.iter().enumerate() {
        eprintln!(
            "  {}. {} ({:?}, single-shot: {})",
            i + 1,
            provider.name(),
            provider.kind(),
            if provider.supports_single_shot() { "yes" } else { "no" }
        );
    }
    Ok(())
}

enum StreamEvent {
    Fix,
    Failed(FailoverError),
}

/// Prints fixes on stdout and forwards terminal conditions to the run loop
struct JsonLines {
    events: mpsc::UnboundedSender<StreamEvent>,
}

impl UpdateListener for JsonLines {
    fn on_location(&self, reading: &Reading) {
        match serde_json::to_string(reading) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "Failed to encode reading"),
        }
        let _ = self.events.send(StreamEvent::Fix);
    }

    fn on_error(&self, error: &FailoverError) {
        let _ = self.events.send(StreamEvent::Failed(error.clone()));
    }
}

async fn stream_fixes(config: LocusConfig, once: bool, duration: Option<Duration>) -> Result<()> {
    let locus = Locus::builder().config(config).build()?;
    let mut control = locus.location_from_config().await?;
    if once {
        control = control.once();
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    control.start(Arc::new(JsonLines { events: tx })).await?;
    info!(session = %locus.session(), once, "Streaming fixes");

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut fixes = 0usize;
    let outcome = loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(StreamEvent::Fix) => {
                    fixes += 1;
                    if once {
                        break Ok(());
                    }
                }
                Some(StreamEvent::Failed(e)) if e.is_exhausted() || e.is_configuration() => {
                    break Err(LocusError::Failover(e));
                }
                Some(StreamEvent::Failed(e)) => warn!(error = %e, "Provider error"),
                None => break Ok(()),
            },
            _ = &mut deadline => break Ok(()),
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break Ok(());
            }
        }
    };

    let snapshot = control.snapshot().await?;
    let failed = snapshot
        .providers
        .iter()
        .filter(|(_, state)| *state == ServiceConnectionState::Failed)
        .count();
    info!(
        fixes,
        failovers = snapshot.failovers,
        failed_providers = failed,
        current = ?snapshot.current_provider,
        "Session finished"
    );

    if outcome.is_ok() {
        control.stop().await?;
    }
    control.shutdown().await?;
    outcome
}
