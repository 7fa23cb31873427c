use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use osccam::{
    with_session, CommandExecutor, HttpTransport, OscConfig, PreviewEvent, PreviewMode,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "osccam")]
#[command(about = "Client for cameras speaking the Open Spherical Camera HTTP protocol")]
#[command(version)]
#[command(long_about = "Drives a camera over its OSC command protocol: session handling, \
still capture with status polling, and live preview streaming with capture detection.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "osccam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Print camera information
    Info,
    /// Print the current camera state
    State,
    /// Take a still picture and print its file URI
    TakePicture,
    /// Save live preview frames
    Preview {
        /// Stop after this many frames
        #[arg(long, default_value_t = 30)]
        frames: u64,
        /// Directory receiving the frames
        #[arg(long, default_value = "preview")]
        output: PathBuf,
    },
    /// Stream the live preview until a new picture is captured, then print its URI
    WaitCapture {
        /// Directory receiving the preview frames
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Stream the live preview and print every capture until interrupted
    Trigger {
        /// Report captures even before the first preview frame
        #[arg(long)]
        resume: bool,
        /// Directory receiving the preview frames
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting osccam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match OscConfig::load_from_file(&args.config) {
        Ok(config) => {
            info!("Configuration loaded successfully from: {}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    let Some(command) = args.command else {
        bail!("No command given, see --help");
    };

    let transport = HttpTransport::new(&config.camera)?;
    info!("Talking to camera at {}", transport.base_url());
    let executor = CommandExecutor::new(Arc::new(transport));

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    run_command(command, executor, &config, &cancel)
        .await
        .map_err(|e| {
            error!("Command failed: {:#}", e);
            e
        })
}

async fn run_command(
    command: CliCommand,
    executor: CommandExecutor,
    config: &OscConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    match command {
        CliCommand::Info => {
            let info = executor.info(cancel).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        CliCommand::State => {
            let state = executor.state(cancel).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        CliCommand::TakePicture => {
            let file_uri = with_session(executor, config, cancel, |session| {
                let cancel = cancel.clone();
                async move {
                    let report = |completion: f32| info!("Capture {:.0}%", completion * 100.0);
                    session.take_picture(report, &cancel).await
                }
            })
            .await?;
            println!("{}", file_uri);
        }
        CliCommand::Preview { frames, output } => {
            prepare_output(&output).await?;
            // Stopping after N frames cancels only the preview, not session cleanup
            let preview_cancel = cancel.child_token();
            let (tx, writer) =
                spawn_event_writer(Some(output), Some(frames), preview_cancel.clone());
            let preview = config.preview.clone();
            with_session(executor, config, cancel, |session| async move {
                let mut sink = tx;
                session
                    .live_preview(&preview)
                    .run(PreviewMode::Resume, &mut sink, &preview_cancel)
                    .await
            })
            .await?;
            let written = writer.await??;
            info!("Saved {} preview frames", written);
        }
        CliCommand::WaitCapture { output } => {
            if let Some(dir) = &output {
                prepare_output(dir).await?;
            }
            let (tx, writer) = spawn_event_writer(output, None, cancel.clone());
            let preview = config.preview.clone();
            let file_uri = with_session(executor, config, cancel, |session| {
                let cancel = cancel.clone();
                async move {
                    let mut sink = tx;
                    session
                        .live_preview(&preview)
                        .wait_for_capture(&mut sink, &cancel)
                        .await
                }
            })
            .await?;
            writer.await??;
            println!("{}", file_uri);
        }
        CliCommand::Trigger { resume, output } => {
            if let Some(dir) = &output {
                prepare_output(dir).await?;
            }
            let mode = if resume || config.preview.resume_image_progress {
                PreviewMode::Resume
            } else {
                PreviewMode::Trigger
            };
            let (tx, writer) = spawn_event_writer(output, None, cancel.clone());
            let preview = config.preview.clone();
            with_session(executor, config, cancel, |session| {
                let cancel = cancel.clone();
                async move {
                    let mut sink = tx;
                    session
                        .live_preview(&preview)
                        .run(mode, &mut sink, &cancel)
                        .await
                }
            })
            .await?;
            writer.await??;
        }
    }

    Ok(())
}

/// Consume preview events: frames go to `output`, captures to stdout.
/// Cancels `cancel` once `frame_limit` frames have been seen.
fn spawn_event_writer(
    output: Option<PathBuf>,
    frame_limit: Option<u64>,
    cancel: CancellationToken,
) -> (mpsc::UnboundedSender<PreviewEvent>, JoinHandle<Result<u64>>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<PreviewEvent>();

    let handle = tokio::spawn(async move {
        let mut frames_seen = 0u64;
        while let Some(event) = rx.recv().await {
            match event {
                PreviewEvent::Frame(frame) => {
                    if let Some(dir) = &output {
                        let path = dir.join(format!("frame_{:06}.jpg", frames_seen));
                        tokio::fs::write(&path, &frame.data)
                            .await
                            .with_context(|| format!("Failed to write {}", path.display()))?;
                    }
                    if !frame.looks_like_jpeg() {
                        warn!("Preview frame {} is not a JPEG image", frames_seen);
                    }
                    frames_seen += 1;
                    if frame_limit.is_some_and(|limit| frames_seen >= limit) {
                        cancel.cancel();
                    }
                }
                PreviewEvent::Progress(_) => info!("{}", event.description()),
                PreviewEvent::Captured { file_uri } => {
                    info!("New capture: {}", file_uri);
                    println!("{}", file_uri);
                }
            }
        }
        Ok(frames_seen)
    });

    (tx, handle)
}

async fn prepare_output(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create output directory {}", dir.display()))
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, cancelling");
                cancel.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("osccam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# osccam configuration file");
    println!("# Every key can be overridden with OSCCAM_<SECTION>__<KEY> environment variables");
    println!();
    println!("{}", toml::to_string_pretty(&OscConfig::default())?);
    println!("# [session]");
    println!("# client_version = 2");
    Ok(())
}
