use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use cppbox::{CompileRunService, ServiceLimits, Toolchain, WorkspaceManager};
use cppbox_server::{create_app, run_server};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to listen on
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    addr: SocketAddr,

    /// Path or name of the C++ compiler
    #[arg(short, long, default_value = "g++", env = "CPPBOX_COMPILER")]
    compiler: String,

    /// Scratch directory for sources and artifacts (defaults to `cppbox`
    /// under the system temp dir)
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Compile deadline in seconds
    #[arg(long, default_value = "30")]
    compile_timeout: u64,

    /// Run deadline in seconds, measured from process spawn
    #[arg(long, default_value = "30")]
    run_timeout: u64,

    /// Maximum number of concurrent executions
    #[arg(short, long, default_value = "10")]
    max_concurrent: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let scratch_root = args
        .scratch_dir
        .unwrap_or_else(|| std::env::temp_dir().join("cppbox"));
    let workspace = WorkspaceManager::new(&scratch_root).await?;
    tokio::spawn(
        workspace
            .clone()
            .sweep_loop(cppbox::SWEEP_INTERVAL, cppbox::SWEEP_RETENTION),
    );

    let toolchain = Toolchain::resolve(&args.compiler);
    match toolchain.probe().await {
        Ok(version) => info!(%version, "compiler verified"),
        Err(e) => warn!(error = %e, "compiler may not be available"),
    }

    let limits = ServiceLimits {
        compile_timeout: Duration::from_secs(args.compile_timeout),
        run_timeout: Duration::from_secs(args.run_timeout),
        max_concurrent: args.max_concurrent,
        ..ServiceLimits::default()
    };

    info!(
        compiler = %toolchain.compiler_path().display(),
        scratch = %scratch_root.display(),
        "starting cppbox server"
    );

    let service = CompileRunService::new(toolchain, workspace, limits);
    let app = create_app(service);
    run_server(app, args.addr).await?;

    Ok(())
}
