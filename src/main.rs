use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xcast::display::{DisplayHandle, DisplayRegistry};
use xcast::events::EventBus;
use xcast::process::ManagedProcess;
use xcast::state::AppState;
use xcast::supervisor::{encoder, AppSupervisor, EncoderConfig, SupervisorConfig, DEFAULT_STREAM_DESTINATION};
use xcast::web;
use xcast::webrtc::{BrokerConfig, SessionBroker};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// xcast command line arguments
#[derive(Parser, Debug)]
#[command(name = "xcast")]
#[command(version, about = "Stream a headless application to remote viewers", long_about = None)]
struct CliArgs {
    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an application under supervision and serve the signaling API
    Serve {
        /// Guest application command (executable plus arguments)
        #[arg(required = true, trailing_var_arg = true)]
        app_command: Vec<String>,

        /// Listen address
        #[arg(short = 'a', long, default_value = "0.0.0.0")]
        address: String,

        /// HTTP port
        #[arg(short = 'p', long, default_value_t = 8080)]
        port: u16,

        /// Stream destination passed to the encoder
        #[arg(long, default_value = DEFAULT_STREAM_DESTINATION)]
        destination: String,

        /// Record inbound viewer audio to this Ogg file
        #[arg(long, value_name = "FILE")]
        record_to: Option<PathBuf>,

        /// Ogg/Opus file offered to each viewer as the audio source
        #[arg(long, value_name = "FILE")]
        audio_source: Option<PathBuf>,
    },

    /// Run and stream an application until interrupted
    StreamApp {
        /// Guest application command (executable plus arguments)
        #[arg(required = true, trailing_var_arg = true)]
        app_command: Vec<String>,

        /// Stream destination passed to the encoder
        #[arg(long, default_value = DEFAULT_STREAM_DESTINATION)]
        destination: String,
    },

    /// Stream an already-running display to a destination
    StreamDisplay {
        /// Display number to capture
        display: u32,

        /// Stream destination passed to the encoder
        #[arg(long, default_value = DEFAULT_STREAM_DESTINATION)]
        destination: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting xcast v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Serve {
            app_command,
            address,
            port,
            destination,
            record_to,
            audio_source,
        } => {
            serve(
                app_command,
                address,
                port,
                destination,
                record_to,
                audio_source,
            )
            .await
        }
        Command::StreamApp {
            app_command,
            destination,
        } => stream_app(app_command, destination).await,
        Command::StreamDisplay {
            display,
            destination,
        } => stream_display(display, destination).await,
    }
}

async fn serve(
    app_command: Vec<String>,
    address: String,
    port: u16,
    destination: String,
    record_to: Option<PathBuf>,
    audio_source: Option<PathBuf>,
) -> anyhow::Result<()> {
    let events = Arc::new(EventBus::new());
    let registry = Arc::new(DisplayRegistry::new());

    let supervisor_config = SupervisorConfig {
        encoder: EncoderConfig {
            destination,
            ..EncoderConfig::default()
        },
        ..SupervisorConfig::default()
    };
    let supervisor = Arc::new(AppSupervisor::new(
        supervisor_config,
        registry.clone(),
        events.clone(),
    ));

    let broker_config = BrokerConfig {
        record_to,
        audio_source,
        ..BrokerConfig::default()
    };
    let broker = Arc::new(SessionBroker::new(broker_config, events.clone()));

    let display_handle = supervisor.start(&app_command).await?;
    tracing::info!("Guest application running on display {}", display_handle);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let state = AppState::new(
        supervisor.clone(),
        broker.clone(),
        registry,
        events,
        shutdown_tx.clone(),
    );
    let router = web::create_router(state);

    let addr: SocketAddr = format!("{address}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

    broker.shutdown().await;
    supervisor.stop().await;
    Ok(())
}

async fn stream_app(app_command: Vec<String>, destination: String) -> anyhow::Result<()> {
    let events = Arc::new(EventBus::new());
    let registry = Arc::new(DisplayRegistry::new());

    let config = SupervisorConfig {
        encoder: EncoderConfig {
            destination,
            ..EncoderConfig::default()
        },
        ..SupervisorConfig::default()
    };
    let supervisor = AppSupervisor::new(config, registry, events);

    let display = supervisor.start(&app_command).await?;
    // The display number goes to stderr for scripting
    eprintln!("{display}");

    shutdown_signal().await;
    supervisor.stop().await;
    Ok(())
}

async fn stream_display(display: u32, destination: String) -> anyhow::Result<()> {
    let config = EncoderConfig {
        destination,
        ..EncoderConfig::default()
    };
    let mut encoder: ManagedProcess = encoder::launch(&config, DisplayHandle(display))?;

    shutdown_signal().await;
    if let Err(e) = encoder.terminate(Duration::from_secs(5)).await {
        tracing::warn!("{}", e);
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
    tracing::info!("Shutdown signal received");
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    // Build filter string based on effective level
    let filter = match effective_level {
        LogLevel::Error => "xcast=error,tower_http=error",
        LogLevel::Warn => "xcast=warn,tower_http=warn",
        LogLevel::Info => "xcast=info,tower_http=info",
        LogLevel::Verbose => "xcast=debug,tower_http=info",
        LogLevel::Debug => "xcast=debug,tower_http=debug",
        LogLevel::Trace => "xcast=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
