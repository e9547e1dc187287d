use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use murmur_core::config::{Config, LoggingConfig};
use murmur_media::{KokoroProvider, WhisperHttpProvider};
use murmur_providers::openai::OpenAiProvider;
use murmur_providers::{Providers, SpeechSynthesisProvider};

#[derive(Parser)]
#[command(
    name = "murmur",
    about = "Voice assistant server: live transcription, streamed answers, spoken replies",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on (default: 8765)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List the voices offered by the configured TTS backend
    Voices,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let mut config = Config::load(&config_path)?;

    init_logging(config.logging.as_ref(), cli.verbose);

    match cli.command {
        Commands::Serve { port, bind } => {
            if let Some(bind) = bind {
                config.gateway.get_or_insert_with(default_gateway).bind = Some(bind);
            }
            let port = port.unwrap_or_else(|| config.gateway_port());

            let (warnings, errors) = config.validate();
            for w in &warnings {
                tracing::warn!("{w}");
            }
            if !errors.is_empty() {
                for e in &errors {
                    tracing::error!("{e}");
                }
                anyhow::bail!("invalid configuration in {}", config_path.display());
            }

            let providers = build_providers(&config);
            tracing::info!(?providers, "Starting Murmur gateway on port {port}");

            let state = murmur_gateway::GatewayState::new(Arc::new(config), providers);
            #[cfg(feature = "metrics")]
            let state = state.with_metrics(murmur_gateway::metrics::install_prometheus_recorder()?);

            murmur_gateway::start_gateway(Arc::new(state), port).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("# {}", config_path.display());
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} error(s) in {}", errors.len(), config_path.display());
                }
                println!("Config OK ({} warning(s))", warnings.len());
            }
        },
        Commands::Voices => {
            let Some(tts) = config.tts() else {
                anyhow::bail!("no TTS provider configured");
            };
            let provider = KokoroProvider::new(tts);
            for voice in provider.voices().await? {
                println!("{voice}");
            }
        }
    }

    Ok(())
}

fn default_gateway() -> murmur_core::config::GatewayConfig {
    murmur_core::config::GatewayConfig {
        port: Config::default().gateway_port(),
        bind: None,
    }
}

fn build_providers(config: &Config) -> Providers {
    let llm = OpenAiProvider::from_config(&config.llm_provider());
    let transcription = WhisperHttpProvider::new(config.transcription());
    let synthesis = config
        .tts()
        .map(|tts| Arc::new(KokoroProvider::new(tts)) as Arc<dyn SpeechSynthesisProvider>);
    Providers::new(Arc::new(transcription), Arc::new(llm), synthesis)
}

/// Logging follows the config file; `RUST_LOG` and `--verbose` override it.
fn init_logging(logging: Option<&LoggingConfig>, verbose: bool) {
    let level = match (verbose, logging.and_then(|l| l.level.as_deref())) {
        (true, _) => "debug",
        (false, Some(level)) => level,
        (false, None) => "info",
    };
    let mut directives = level.to_string();
    for filter in logging.map(|l| l.filters.as_slice()).unwrap_or_default() {
        directives.push(',');
        directives.push_str(filter);
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    let json = logging.is_some_and(|l| l.format == "json");
    let stdout = logging.is_some_and(|l| l.output == "stdout");
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}
