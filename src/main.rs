//! WAF ML Agent CLI
//!
//! Serves the request threat-scoring pipeline to an external reverse-proxy
//! rule engine. Default mode listens on a Unix socket for newline-delimited
//! JSON request records and answers one verdict line per record;
//! `--analyze` scores a single record from stdin and reports the decision
//! through the process exit code.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};

use waf_ml_agent::{AgentConfig, AuditConfig, BlockReason, RequestRecord, ScoringAgent, ThresholdConfig, VerdictResponse};

/// Version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "waf-ml-agent")]
#[command(about = "ML request threat-scoring agent for reverse-proxy WAF engines")]
struct Args {
    /// Path to the Unix socket the rule engine connects to
    #[arg(long, default_value = "/tmp/waf-ml.sock", env = "WAF_ML_SOCKET")]
    socket: PathBuf,

    /// Block threshold for the network/metadata detector
    #[arg(long, default_value = "0.2", env = "WAF_ML_NETWORK_THRESHOLD")]
    network_threshold: f32,

    /// Block threshold for the content detector
    #[arg(long, default_value = "0.5", env = "WAF_ML_CONTENT_THRESHOLD")]
    content_threshold: f32,

    /// Allow requests when a detector cannot score (default: fail-closed)
    #[arg(long, env = "WAF_ML_FAIL_OPEN")]
    fail_open: bool,

    /// Per-detector scoring timeout in milliseconds
    #[arg(long, default_value = "25", env = "WAF_ML_DETECTOR_TIMEOUT_MS")]
    detector_timeout_ms: u64,

    /// Network model weights file (JSON); built-in weights when omitted
    #[arg(long, env = "WAF_ML_NETWORK_MODEL")]
    network_model: Option<PathBuf>,

    /// Content model weights file (JSON); built-in weights when omitted
    #[arg(long, env = "WAF_ML_CONTENT_MODEL")]
    content_model: Option<PathBuf>,

    /// Decision audit log path
    #[arg(long, default_value = "./waf_ml_audit.log", env = "WAF_ML_AUDIT_LOG")]
    audit_log: PathBuf,

    /// Timing sample log path
    #[arg(long, default_value = "./waf_ml_timing.log", env = "WAF_ML_TIMING_LOG")]
    timing_log: PathBuf,

    /// Maximum request body bytes retained for content scoring
    #[arg(long, default_value = "1048576", env = "WAF_ML_MAX_BODY_BYTES")]
    max_body_bytes: usize,

    /// Score one JSON request record from stdin and exit (1 = blocked)
    #[arg(long)]
    analyze: bool,

    /// Enable verbose logging
    #[arg(short, long, env = "WAF_ML_VERBOSE")]
    verbose: bool,
}

impl Args {
    fn to_config(&self) -> AgentConfig {
        AgentConfig {
            thresholds: ThresholdConfig {
                network: self.network_threshold.clamp(0.0, 1.0),
                content: self.content_threshold.clamp(0.0, 1.0),
            },
            fail_open: self.fail_open,
            detector_timeout_ms: self.detector_timeout_ms,
            network_model_path: self.network_model.clone(),
            content_model_path: self.content_model.clone(),
            max_body_bytes: self.max_body_bytes,
            audit: AuditConfig {
                audit_log: self.audit_log.clone(),
                timing_log: self.timing_log.clone(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Install panic hook for production diagnostics
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(|s| s.as_str())
            })
            .unwrap_or("Unknown panic payload");

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        // eprintln because tracing may not work during panic
        eprintln!("PANIC: scoring agent panicked at {}: {}", location, payload);

        error!(
            panic_payload = %payload,
            panic_location = %location,
            "scoring agent panicked"
        );

        default_hook(panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    install_panic_hook();

    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("{}={}", env!("CARGO_CRATE_NAME"), log_level))
        .json()
        .init();

    info!(version = VERSION, "starting WAF ML agent");

    let config = args.to_config();
    info!(
        network_threshold = config.thresholds.network,
        content_threshold = config.thresholds.content,
        fail_open = config.fail_open,
        detector_timeout_ms = config.detector_timeout_ms,
        network_model = ?config.network_model_path,
        content_model = ?config.content_model_path,
        audit_log = %config.audit.audit_log.display(),
        "configuration loaded"
    );

    let agent = ScoringAgent::new(config).map_err(|e| {
        error!(error = %e, "failed to initialize scoring agent");
        e
    })?;

    if args.analyze {
        run_analyze(agent).await
    } else {
        run_server(agent, &args.socket).await
    }
}

/// Score one request record from stdin, print the verdict and exit with
/// code 1 when blocked, the invocation contract of script-based callers.
async fn run_analyze(agent: ScoringAgent) -> Result<()> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("reading request record from stdin")?;

    let response = match serde_json::from_str::<RequestRecord>(&input) {
        Ok(record) => VerdictResponse::from(&agent.evaluate(record).await),
        Err(err) => {
            error!(error = %err, "malformed request record on stdin");
            VerdictResponse::failure(BlockReason::InternalError, agent.config().fail_open)
        }
    };

    println!("{}", serde_json::to_string(&response)?);
    agent.flush().await;

    if response.blocked {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_server(agent: ScoringAgent, socket: &Path) -> Result<()> {
    // stale socket from a previous run
    let _ = std::fs::remove_file(socket);

    let listener = UnixListener::bind(socket)
        .with_context(|| format!("binding {}", socket.display()))?;
    info!(socket = %socket.display(), "scoring agent listening");

    let agent = Arc::new(agent);
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let agent = Arc::clone(&agent);
                        tokio::spawn(async move {
                            if let Err(err) = serve_connection(agent, stream).await {
                                debug!(error = %err, "connection closed with error");
                            }
                        });
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                }
            }
        }
    }

    agent.flush().await;
    info!("scoring agent shutdown complete");
    Ok(())
}

/// One request record per line in, one verdict line out.
async fn serve_connection(agent: Arc<ScoringAgent>, stream: UnixStream) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RequestRecord>(&line) {
            Ok(record) => VerdictResponse::from(&agent.evaluate(record).await),
            Err(err) => {
                warn!(error = %err, "malformed request record");
                VerdictResponse::failure(BlockReason::InternalError, agent.config().fail_open)
            }
        };

        let mut payload = serde_json::to_string(&response)?;
        payload.push('\n');
        writer.write_all(payload.as_bytes()).await?;
    }

    Ok(())
}
