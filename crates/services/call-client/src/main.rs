//! Headless call participant
//!
//! Joins the signaling relay as one participant, publishes a sample-fed
//! audio/video stream and logs everything that happens to the call.
//!
//! # Usage
//!
//! ```bash
//! # Join the relay next to a locally served front-end
//! cargo run -p uruti-call-client -- --user-id alice --origin http://localhost:3000
//!
//! # Point at a relay directly and call a peer once it shows up
//! cargo run -p uruti-call-client -- \
//!   --user-id bob \
//!   --signaling-url ws://localhost:8000/api/v1/ws/signal \
//!   --call peer-1700000000000-abc123xyz --name Alice
//!
//! # Load settings from a TOML file
//! cargo run -p uruti-call-client -- --config ./uruti-call.toml --user-id carol
//! ```

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uruti_call::{
    CallEvent, CoordinatorConfig, PeerSessionCoordinator, SampleCaptureDevice, WebRtcBackend,
};

/// Uruti call client
///
/// Joins a multi-party call as a headless participant.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "URUTI_CALL_CONFIG")]
    config: Option<PathBuf>,

    /// User id sent when registering with the relay
    #[arg(short, long, env = "URUTI_USER_ID")]
    user_id: String,

    /// Origin of the web front-end; the relay is derived from it
    #[arg(long, env = "URUTI_PAGE_ORIGIN")]
    origin: Option<String>,

    /// Full relay URL, overriding origin derivation
    #[arg(long, env = "URUTI_SIGNALING_URL")]
    signaling_url: Option<String>,

    /// STUN servers (comma-separated), replacing the configured list
    #[arg(long, value_delimiter = ',', env = "URUTI_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// Peer id to call once it appears in the peer list
    #[arg(long, env = "URUTI_CALL_PEER")]
    call: Option<String>,

    /// Display name to show for the called peer
    #[arg(long, default_value = "Peer", env = "URUTI_CALL_NAME")]
    name: String,

    /// How long to wait for the called peer to appear, in seconds
    #[arg(long, default_value_t = 30, env = "URUTI_CALL_WAIT_SECS")]
    wait_secs: u64,

    /// Emit logs as JSON lines
    #[arg(long, env = "URUTI_JSON_LOGS")]
    json_logs: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(1);
        }
        eprintln!("Ctrl+C received, leaving the call...");
    })
    .context("Failed to set Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().min(4))
        .thread_name("uruti-call")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(args: Args, shutdown_flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    init_tracing(args.json_logs);

    info!(
        version = uruti_call::version(),
        user_id = %args.user_id,
        "Uruti call client starting"
    );

    let config = load_config(&args)?;
    info!(
        endpoint = ?config.signaling.url_override,
        origin = %config.signaling.page_origin,
        stun_servers = config.ice.stun_servers.len(),
        turn_servers = config.ice.turn_servers.len(),
        "Configuration loaded"
    );

    let backend = Arc::new(WebRtcBackend::new().context("Failed to create WebRTC backend")?);
    let devices = Arc::new(SampleCaptureDevice::new());
    let coordinator = Arc::new(
        PeerSessionCoordinator::start(config, args.user_id.clone(), backend, devices).await?,
    );
    info!("Local peer id: {}", coordinator.local_peer_id());

    let status = coordinator.signaling_status();
    if let Some(err) = status.error {
        warn!("Signaling unavailable: {}", err);
    }

    coordinator
        .initialize_local_stream()
        .await
        .context("Failed to acquire local media")?;

    let events = tokio::spawn(log_events(Arc::clone(&coordinator)));

    if let Some(peer_id) = &args.call {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(args.wait_secs);
        let mut peers = coordinator.subscribe_peers();
        loop {
            if peers.borrow().iter().any(|p| &p.peer_id == peer_id) {
                break;
            }
            match tokio::time::timeout_at(deadline, peers.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => break,
                Err(_) => {
                    warn!("Peer {} did not appear within {}s", peer_id, args.wait_secs);
                    break;
                }
            }
        }

        if let Err(e) = coordinator.start_call(peer_id, &args.name).await {
            error!("Call to {} failed: {}", peer_id, e);
        }
    }

    info!("In call. Press Ctrl+C to leave.");
    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    coordinator.shutdown().await;
    events.abort();
    info!("Left the call");

    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<CoordinatorConfig> {
    let mut config = match &args.config {
        Some(path) => CoordinatorConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => CoordinatorConfig::default(),
    };

    if let Some(origin) = &args.origin {
        config.signaling.page_origin = origin.clone();
    }
    if let Some(url) = &args.signaling_url {
        config.signaling.url_override = Some(url.clone());
    }
    if !args.stun_servers.is_empty() {
        config.ice.stun_servers = args.stun_servers.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn log_events(coordinator: Arc<PeerSessionCoordinator>) {
    let mut events = coordinator.events();
    let mut peers = coordinator.subscribe_peers();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(CallEvent::ParticipantJoined { id, display_name }) => {
                    info!("{} ({}) joined the call", display_name, id);
                }
                Ok(CallEvent::ParticipantLeft { id }) => info!("{} left the call", id),
                Ok(CallEvent::QualityChanged { id, quality }) => {
                    info!("Connection to {} is now {}", id, quality);
                }
                Ok(CallEvent::Error(message)) => warn!("{}", message),
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} call events", skipped),
                Err(RecvError::Closed) => break,
            },
            changed = peers.changed() => {
                if changed.is_err() {
                    break;
                }
                let available: Vec<String> =
                    peers.borrow().iter().map(|p| p.peer_id.clone()).collect();
                info!("Available peers: {:?}", available);
            }
        }
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,webrtc=warn"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
