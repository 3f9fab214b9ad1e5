//! Swarm - watch Redis streams as they appear.

use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use swarm::messaging::RenderStyle;
use swarm::{
    connect_store, CommandTapDiscovery, Discovery, DiscoveryMode, Engine, EventBus,
    KeyScanDiscovery, ListenerSupervisor, RenderMode, Settings, StreamRegistry,
    TerminalRenderer, XdgDirs,
};

/// Swarm - discover, tail and supervise Redis streams
#[derive(Parser, Debug)]
#[command(name = "swarm")]
#[command(version, about, long_about = None)]
struct Args {
    /// Redis host
    #[arg(long, env = "SWARM_REDIS_HOST")]
    host: Option<String>,

    /// Redis port
    #[arg(long, env = "SWARM_REDIS_PORT")]
    port: Option<u16>,

    /// Redis password
    #[arg(long, env = "SWARM_REDIS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Redis database index
    #[arg(long)]
    db: Option<i64>,

    /// Laravel project directory, or a command prefix such as "docker exec app"
    #[arg(long, env = "SWARM_ARTISAN_PATH")]
    artisan_path: Option<String>,

    /// How to find new streams
    #[arg(long, value_name = "monitor|scan")]
    discovery: Option<DiscoveryMode>,

    /// Do not start stream listeners
    #[arg(long)]
    no_listen: bool,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Config file (default: ./config.json, then the XDG config dir)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log file (default: swarm.log in the XDG state dir)
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Enable debug logging (equivalent to RUST_LOG=debug)
    #[arg(short = 'd', long)]
    debug: bool,

    /// Enable verbose logging (equivalent to RUST_LOG=trace)
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Args {
    /// Apply command-line overrides on top of the file settings.
    fn apply(&self, settings: &mut Settings) {
        if let Some(host) = &self.host {
            settings.redis_host = host.clone();
        }
        if let Some(port) = self.port {
            settings.redis_port = port;
        }
        if let Some(password) = &self.password {
            settings.redis_password = Some(password.clone());
        }
        if let Some(db) = self.db {
            settings.redis_db = db;
        }
        if let Some(path) = &self.artisan_path {
            settings.artisan_path = Some(path.clone());
        }
        if let Some(mode) = self.discovery {
            settings.discovery = mode;
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let dirs = XdgDirs::new();

    let (mut settings, config_path) =
        Settings::load(args.config.as_deref(), &dirs).context("Failed to load configuration")?;
    args.apply(&mut settings);

    if args.print_config {
        println!("{}", settings.to_json());
        return Ok(());
    }

    let log_path = args.log_file.clone().unwrap_or_else(|| dirs.log_file());
    init_tracing(&args, &log_path);
    if let Some(path) = &config_path {
        info!(path = %path.display(), "Using config file");
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(args, settings))
}

/// Log to `path`, or to stderr when the file cannot be opened.
fn init_tracing(args: &Args, path: &Path) {
    let default_filter = if args.verbose {
        "trace"
    } else if args.debug {
        "debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file = path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|_| OpenOptions::new().create(true).append(true).open(path));
    let (writer, ansi) = match file {
        Ok(file) => (BoxMakeWriter::new(Mutex::new(file)), false),
        Err(e) => {
            eprintln!("Cannot open log file {}: {}, logging to stderr", path.display(), e);
            (BoxMakeWriter::new(std::io::stderr), true)
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(ansi)
                .with_writer(writer),
        )
        .init();

    if args.debug || args.verbose {
        info!("Debug logging enabled");
    }
}

async fn run(args: Args, settings: Settings) -> anyhow::Result<()> {
    let mode = if args.json {
        RenderMode::Json
    } else {
        RenderMode::Text
    };
    let style = RenderStyle {
        colored: std::io::stdout().is_terminal(),
        ..RenderStyle::default()
    };
    let renderer = TerminalRenderer::with_style(style).with_mode(mode);

    let store = connect_store(&settings.redis_config()).await?;
    let registry = Arc::new(StreamRegistry::new());
    let bus = Arc::new(EventBus::new());

    let supervisor = if args.no_listen {
        None
    } else {
        ListenerSupervisor::detect(
            settings.runner_command(),
            Arc::clone(&registry),
            Arc::clone(&bus),
        )
        .await
        .map(|supervisor| {
            supervisor
                .with_policy(settings.restart_policy())
                .with_consumer_group(
                    settings.listener_group.clone(),
                    settings.listener_consumer.clone(),
                )
        })
    };
    if supervisor.is_none() {
        renderer.render_notice(&mut std::io::stdout(), "Listening is not available")?;
    }

    let engine = Engine::new(Arc::clone(&store), registry, bus)
        .with_supervisor(supervisor)
        .with_read_retry(settings.read_retry())
        .with_discovery_errors(settings.max_tap_errors, settings.tap_error_delay());

    let receiver = engine.bus().subscribe_channel();
    let render_task = tokio::spawn(async move { renderer.run_loop(receiver).await });

    let token = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            token.cancel();
        }
    });

    let mut discovery: Box<dyn Discovery> = match settings.discovery {
        DiscoveryMode::Monitor => Box::new(CommandTapDiscovery::new(store)),
        DiscoveryMode::Scan => Box::new(KeyScanDiscovery::new(store, settings.scan_interval())),
    };
    info!(discovery = %settings.discovery, "Watching for streams");

    let result = engine.run(discovery.as_mut()).await;
    engine.shutdown().await;
    render_task.abort();

    result?;
    Ok(())
}
