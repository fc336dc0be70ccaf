//! Capture Agent - Main entry point
//!
//! Runs the capture-buffer-upload pipeline as a daemon. The desktop shell
//! normally owns the pipeline through the library API; this binary covers
//! headless operation, one-shot captures, and buffer maintenance.

use capture_agent::{permissions, CapturePipeline, Config};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Command line options for the agent
#[derive(Debug, Default)]
struct AgentArgs {
    config_path: Option<PathBuf>,
    endpoint: Option<String>,
    auth_token: Option<String>,
    interval_ms: Option<u64>,
    once: bool,
    purge: bool,
}

/// Parse command line arguments
fn parse_args() -> AgentArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = AgentArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("Capture Agent v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i]));
                }
            }
            "--endpoint" => {
                i += 1;
                if i < args.len() {
                    parsed.endpoint = Some(args[i].clone());
                }
            }
            "--token" => {
                i += 1;
                if i < args.len() {
                    parsed.auth_token = Some(args[i].clone());
                }
            }
            "--interval" => {
                i += 1;
                if i < args.len() {
                    if let Ok(interval) = args[i].parse() {
                        parsed.interval_ms = Some(interval);
                    }
                }
            }
            "--once" => {
                parsed.once = true;
            }
            "--purge" => {
                parsed.purge = true;
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                eprintln!("Use --help for usage information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"Capture Agent - background display capture and upload

USAGE:
    capture-agent [OPTIONS]

OPTIONS:
    -h, --help              Show this help message
    -v, --version           Show version
    -c, --config <PATH>     Path to configuration file
    --endpoint <URL>        Collector endpoint (overrides configuration)
    --token <TOKEN>         Authorization header value
    --interval <MS>         Capture interval in milliseconds
    --once                  Capture every display once, attempt delivery, exit
    --purge                 Delete buffered captures past the configured age, exit

BEHAVIOR:
    Every interval the agent captures one PNG per connected display into the
    local buffer and uploads each to the collector. Failed uploads are
    retried with exponential backoff up to the configured retry budget;
    abandoned captures stay on disk.

PERMISSIONS REQUIRED:
    - Screen Recording: System Settings > Privacy & Security > Screen Recording

EXAMPLES:
    capture-agent                                        # run with saved configuration
    capture-agent --endpoint https://host/api/upload --token s3cret
    capture-agent --interval 30000                       # capture every 30s
    capture-agent --once                                 # single manual capture
"#
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let args = parse_args();

    // Load configuration, then apply command line overrides
    let mut config = match args.config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    if args.endpoint.is_some() {
        config.upload.endpoint = args.endpoint;
    }
    if let Some(token) = args.auth_token {
        config.upload.auth_token = token;
    }
    if let Some(interval_ms) = args.interval_ms {
        config.capture.interval_ms = interval_ms;
    }

    let permission = permissions::check();

    println!();
    println!("Capture Agent v{}", env!("CARGO_PKG_VERSION"));
    println!("   Screen recording permission: {}", permission.as_str());
    println!(
        "   Collector endpoint: {}",
        config.upload.endpoint.as_deref().unwrap_or("(not configured)")
    );
    println!("   Capture interval: {}ms", config.capture.interval_ms);
    println!();

    if !permission.is_usable() {
        println!("Screen recording permission not granted; captures may come back empty.");
        println!("Grant it in: System Settings > Privacy & Security > Screen Recording");
        println!();
    }

    let pipeline = Arc::new(CapturePipeline::new(config));
    pipeline.store().ensure_dir();

    if args.purge {
        match pipeline.purge_stale().await {
            Some(removed) => info!("Purged {} buffered captures", removed),
            None => info!("No storage.max_age_hours configured; nothing to purge"),
        }
        return Ok(());
    }

    if args.once {
        let batch = pipeline.capture_now().await;
        let status = pipeline.status().await;
        info!(
            "Captured {} artifacts ({} awaiting retry, {} on disk)",
            batch.len(),
            status.queue_depth,
            status.artifact_count
        );
        return Ok(());
    }

    // Setup shutdown signal
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        println!("\nShutting down...");
        r.store(false, Ordering::SeqCst);
    })?;

    pipeline.start();
    let status = pipeline.status().await;
    info!(
        "Agent running (buffer: {:?}, {} artifacts waiting)",
        status.storage_dir, status.artifact_count
    );

    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    pipeline.stop();
    info!("Shutdown complete");
    Ok(())
}
