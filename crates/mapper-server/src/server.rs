//! Webmapper WebSocket server implementation.
//!
//! This module provides:
//! - The poll thread, sole owner of the [`MirrorContext`] and its graph
//! - Client connections exchanging commands and events as JSON text frames
//! - Event fan-out to every connected client
//!
//! Connections never touch the graph. They marshal each command onto the
//! poll thread through an unbounded channel and await its reply; the poll
//! thread drains pending commands between polls, so the graph is never
//! mutated while a poll is delivering notifications.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, trace, warn};

use mapper_core::{Graph, InterfaceEnumerator, MapStorage};
use mapper_protocol::codec::{decode_command, encode_event};
use mapper_protocol::{CodecError, InboundCommand, OutboundEvent};

use crate::context::MirrorContext;

/// Configuration for the webmapper server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server name, used in logs and discovery.
    pub name: String,
    /// Address to bind the WebSocket listener to.
    pub bind_addr: SocketAddr,
    /// How long each graph poll may block.
    pub poll_interval: Duration,
    /// Stop serving once the last client has disconnected.
    pub quit_on_disconnect: bool,
    /// Network interface to bind the graph to instead of the default choice.
    pub interface: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "webmapper".to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 50000)),
            poll_interval: Duration::from_millis(100),
            quit_on_disconnect: true,
            interface: None,
        }
    }
}

/// Errors that can occur while running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The poll thread is gone.
    #[error("Graph thread stopped")]
    GraphStopped,
}

/// Work for the poll thread.
type Task<G> = Box<dyn FnOnce(&mut MirrorContext<G>) + Send>;

/// Cloneable handle for running commands on the poll thread.
pub struct CommandHandle<G: Graph> {
    tasks: mpsc::UnboundedSender<Task<G>>,
}

impl<G: Graph> Clone for CommandHandle<G> {
    fn clone(&self) -> Self {
        Self {
            tasks: self.tasks.clone(),
        }
    }
}

impl<G: Graph + 'static> CommandHandle<G> {
    /// Run a closure against the context on the poll thread and await its result.
    pub async fn with_context<R, F>(&self, f: F) -> Result<R, ServerError>
    where
        R: Send + 'static,
        F: FnOnce(&mut MirrorContext<G>) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let task: Task<G> = Box::new(move |ctx| {
            let _ = reply_tx.send(f(ctx));
        });
        self.tasks.send(task).map_err(|_| ServerError::GraphStopped)?;
        reply_rx.await.map_err(|_| ServerError::GraphStopped)
    }

    /// Execute a command and return the replies for the caller.
    ///
    /// A rejected command is logged on the poll thread and yields no replies.
    pub async fn execute(&self, command: InboundCommand) -> Result<Vec<OutboundEvent>, ServerError> {
        self.with_context(move |ctx| {
            let name = command.name();
            ctx.execute(command).unwrap_or_else(|e| {
                warn!("Command {} failed: {}", name, e);
                Vec::new()
            })
        })
        .await
    }
}

/// The webmapper WebSocket server.
pub struct MapperServer<G: Graph> {
    config: ServerConfig,
    context: MirrorContext<G>,
    /// Channel for broadcasting events to all connection handlers.
    event_tx: broadcast::Sender<OutboundEvent>,
    task_tx: mpsc::UnboundedSender<Task<G>>,
    task_rx: mpsc::UnboundedReceiver<Task<G>>,
}

impl<G: Graph + 'static> MapperServer<G> {
    /// Create a new server mirroring `graph`.
    pub fn new(config: ServerConfig, graph: G) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let context = MirrorContext::new(graph, event_tx.clone());

        Self {
            config,
            context,
            event_tx,
            task_tx,
            task_rx,
        }
    }

    pub fn with_enumerator(mut self, enumerator: impl InterfaceEnumerator + 'static) -> Self {
        self.context = self.context.with_enumerator(enumerator);
        self
    }

    pub fn with_storage(mut self, storage: impl MapStorage + 'static) -> Self {
        self.context = self.context.with_storage(storage);
        self
    }

    /// Get a handle for running commands on the graph.
    pub fn handle(&self) -> CommandHandle<G> {
        CommandHandle {
            tasks: self.task_tx.clone(),
        }
    }

    /// Get a receiver for the events sent to clients.
    pub fn events(&self) -> broadcast::Receiver<OutboundEvent> {
        self.event_tx.subscribe()
    }

    /// Run the server until it is told to quit.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("{} listening on {}", self.config.name, self.config.bind_addr);

        let running = Arc::new(AtomicBool::new(true));
        let poll_thread = spawn_poll_thread(
            self.context,
            self.task_rx,
            self.config.poll_interval,
            self.config.interface.clone(),
            running.clone(),
        )?;

        let handle = CommandHandle {
            tasks: self.task_tx.clone(),
        };
        let clients = Arc::new(AtomicUsize::new(0));
        let last_client_left = Arc::new(Notify::new());

        // Accept connections
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let handle = handle.clone();
                        let event_rx = self.event_tx.subscribe();
                        let clients = clients.clone();
                        let last_client_left = last_client_left.clone();
                        let quit_on_disconnect = self.config.quit_on_disconnect;

                        tokio::spawn(async move {
                            info!("New connection from {}", addr);
                            let ws_stream = match tokio_tungstenite::accept_async(stream).await {
                                Ok(ws_stream) => ws_stream,
                                Err(e) => {
                                    warn!("WebSocket handshake with {} failed: {}", addr, e);
                                    return;
                                }
                            };
                            // Only upgraded connections count as clients.
                            clients.fetch_add(1, Ordering::SeqCst);

                            if let Err(e) = handle_connection(ws_stream, addr, handle, event_rx).await {
                                error!("Connection error from {}: {}", addr, e);
                            }
                            let remaining = clients.fetch_sub(1, Ordering::SeqCst) - 1;
                            debug!("{} clients connected", remaining);
                            if remaining == 0 && quit_on_disconnect {
                                last_client_left.notify_one();
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                _ = last_client_left.notified() => {
                    if clients.load(Ordering::SeqCst) == 0 {
                        info!("Last client disconnected, shutting down");
                        break;
                    }
                }
            }
        }

        running.store(false, Ordering::SeqCst);
        drop(handle);
        match tokio::task::spawn_blocking(move || poll_thread.join()).await {
            Ok(Ok(())) => {}
            _ => error!("Graph thread panicked"),
        }
        Ok(())
    }
}

/// Start the thread that owns the context: arm listeners, pick an interface,
/// then alternate between draining queued tasks and polling the graph.
fn spawn_poll_thread<G: Graph + 'static>(
    mut context: MirrorContext<G>,
    mut tasks: mpsc::UnboundedReceiver<Task<G>>,
    interval: Duration,
    interface: Option<String>,
    running: Arc<AtomicBool>,
) -> Result<std::thread::JoinHandle<()>, ServerError> {
    let thread = std::thread::Builder::new()
        .name("graph-poll".to_string())
        .spawn(move || {
            context.refresh();
            context.init_interfaces(interface.as_deref());
            debug!("Graph thread started");

            while running.load(Ordering::SeqCst) {
                loop {
                    match tasks.try_recv() {
                        Ok(task) => task(&mut context),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            debug!("Task channel closed, stopping graph thread");
                            return;
                        }
                    }
                }
                let delivered = context.poll(interval);
                if delivered > 0 {
                    trace!("Delivered {} graph notifications", delivered);
                }
            }
            debug!("Graph thread stopped");
        })?;
    Ok(thread)
}

/// Serve a single upgraded WebSocket connection.
async fn handle_connection<G: Graph + 'static>(
    ws_stream: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    handle: CommandHandle<G>,
    mut event_rx: broadcast::Receiver<OutboundEvent>,
) -> Result<(), ServerError> {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        trace!("<- {}: {}", addr, text);
                        let command = match decode_command(&text) {
                            Ok(command) => command,
                            Err(e) => {
                                warn!("Ignoring message from {}: {}", addr, e);
                                continue;
                            }
                        };
                        for reply in handle.execute(command).await? {
                            let msg = encode_event(&reply)?;
                            trace!("-> {}: {}", addr, msg);
                            ws_tx.send(Message::Text(msg)).await?;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!("Ignoring message from {}: {}", addr, CodecError::BinaryFrame);
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} closed connection", addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_tx.send(Message::Pong(data)).await?;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => {
                        info!("Client {} disconnected", addr);
                        break;
                    }
                    _ => {} // Ignore other message types
                }
            }

            // Handle events broadcast from the graph thread
            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        let msg = encode_event(&event)?;
                        trace!("-> {}: {}", addr, msg);
                        if let Err(e) = ws_tx.send(Message::Text(msg)).await {
                            error!("Failed to send event to {}: {}", addr, e);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} lagged {} messages", addr, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Event channel closed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
