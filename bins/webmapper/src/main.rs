use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use clap::Parser;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mapper_core::normalize::{device_snapshot, map_snapshot, signal_snapshot};
use mapper_core::{Direction, Graph, SignalType};
use mapper_protocol::DiscoveryResponse;
use mapper_server::{CommandHandle, MapperServer, MemoryGraph, ServerConfig};

/// Mirror a signal-mapping graph to a browser UI over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "webmapper")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Signal-mapping graph mirror and command server")]
struct Cli {
    /// WebSocket port
    #[arg(short, long, default_value_t = 50000)]
    port: u16,

    /// HTTP port for discovery, snapshots and the UI (default: port + 1)
    #[arg(long)]
    http_port: Option<u16>,

    /// Directory with the static UI files
    #[arg(long, default_value = "ui")]
    ui_dir: PathBuf,

    /// Network interface to bind the graph to
    #[arg(short, long)]
    interface: Option<String>,

    /// Keep running after the last client disconnects
    #[arg(long)]
    stay_alive: bool,

    /// Log every message on the WebSocket transport
    #[arg(long)]
    trace: bool,

    /// Start with an empty graph instead of the demo devices
    #[arg(long)]
    no_demo: bool,
}

#[derive(Clone)]
struct AppState {
    handle: CommandHandle<MemoryGraph>,
    discovery: serde_json::Value,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.trace {
        "info,mapper_server=trace"
    } else {
        "info,mapper_server=debug"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("webmapper starting...");

    // Configuration
    let http_port = cli.http_port.unwrap_or(cli.port.saturating_add(1));
    let ws_addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let http_addr = SocketAddr::from(([0, 0, 0, 0], http_port));

    let config = ServerConfig {
        name: "webmapper".to_string(),
        bind_addr: ws_addr,
        poll_interval: Duration::from_millis(100),
        quit_on_disconnect: !cli.stay_alive,
        interface: cli.interface.clone(),
    };

    let graph = if cli.no_demo { MemoryGraph::new() } else { demo_graph() };
    let server = MapperServer::new(config, graph);
    let handle = server.handle();

    // Spawn WebSocket server
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!("WebSocket server error: {}", e);
        }
    });

    // Start HTTP server
    let state = AppState {
        handle: handle.clone(),
        discovery: serde_json::to_value(DiscoveryResponse::new(
            "webmapper",
            "localhost",
            cli.port,
            http_port,
        ))?,
    };
    let ui_dir = cli.ui_dir.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(e) = start_http_server(http_addr, state, ui_dir).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    // Start demo device generator
    let no_demo = cli.no_demo;
    let demo_handle = tokio::spawn(async move {
        if !no_demo {
            simulate_devices(handle).await;
        } else {
            std::future::pending::<()>().await;
        }
    });

    tracing::info!("webmapper ready");
    tracing::info!("   WebSocket: ws://localhost:{}", cli.port);
    tracing::info!("   UI:        http://localhost:{}/", http_port);
    tracing::info!("   Discovery: http://localhost:{}/mapper", http_port);

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = ws_handle => {
            tracing::info!("WebSocket server stopped");
        }
        _ = http_handle => {
            tracing::warn!("HTTP server stopped");
        }
        _ = demo_handle => {
            tracing::warn!("Demo device generator stopped");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Start the HTTP server
async fn start_http_server(addr: SocketAddr, state: AppState, ui_dir: PathBuf) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/mapper", get(discovery_handler))
        .route("/mapper/devices", get(devices_handler))
        .route("/mapper/signals", get(signals_handler))
        .route("/mapper/maps", get(maps_handler))
        .fallback_service(ServeDir::new(ui_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Discovery endpoint handler
async fn discovery_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.discovery)
}

async fn devices_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    snapshot(&state.handle, |graph| serde_json::to_value(device_snapshot(graph))).await
}

async fn signals_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    snapshot(&state.handle, |graph| serde_json::to_value(signal_snapshot(graph))).await
}

async fn maps_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    snapshot(&state.handle, |graph| serde_json::to_value(map_snapshot(graph))).await
}

/// Read a snapshot on the graph thread.
async fn snapshot<F>(handle: &CommandHandle<MemoryGraph>, read: F) -> Result<Json<serde_json::Value>, StatusCode>
where
    F: FnOnce(&dyn Graph) -> serde_json::Result<serde_json::Value> + Send + 'static,
{
    match handle.with_context(move |ctx| read(ctx.graph())).await {
        Ok(Ok(value)) => Ok(Json(value)),
        Ok(Err(e)) => {
            tracing::error!("Failed to encode snapshot: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(e) => {
            tracing::warn!("Snapshot unavailable: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// Demo devices: a synth and an LFO feeding a filter.
fn demo_graph() -> MemoryGraph {
    let mut graph = MemoryGraph::new();

    let synth = graph.add_device("synth.1");
    graph.add_signal(synth, "freq", Direction::Output, SignalType::Float32);
    graph.add_signal(synth, "gate", Direction::Output, SignalType::Int32);

    let lfo = graph.add_device("lfo.1");
    let rate = graph.add_signal(lfo, "rate", Direction::Output, SignalType::Float64);
    graph.set_signal_property(rate, "min", serde_json::json!(0.1));
    graph.set_signal_property(rate, "max", serde_json::json!(20.0));

    let filter = graph.add_device("filter.1");
    let cutoff = graph.add_signal(filter, "cutoff", Direction::Input, SignalType::Float32);
    graph.set_signal_property(cutoff, "min", serde_json::json!(20.0));
    graph.set_signal_property(cutoff, "max", serde_json::json!(20000.0));
    graph.add_signal(filter, "resonance", Direction::Input, SignalType::Float32);

    graph
}

/// Simulate a sequencer that keeps joining and leaving the network.
async fn simulate_devices(handle: CommandHandle<MemoryGraph>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    let mut present = false;

    loop {
        interval.tick().await;

        let result = handle
            .with_context(move |ctx| {
                let graph = ctx.graph_mut();
                match graph.device_by_name("sequencer.1").map(|d| d.id) {
                    Some(id) if present => graph.expire_device(id),
                    Some(id) => graph.touch_device(id),
                    None => {
                        let seq = graph.add_device("sequencer.1");
                        graph.add_signal(seq, "step", Direction::Output, SignalType::Int32);
                    }
                }
            })
            .await;

        if result.is_err() {
            tracing::error!("Failed to drive demo devices - server may have stopped");
            break;
        }
        present = !present;
    }
}
