//! The dispatch loop: a single task multiplexing every client
//! connection.
//!
//! [`Dispatcher::run`] uses `tokio::select!` to multiplex:
//!
//! 1. **Accept**: new connections enter Pending-Identify.
//! 2. **Connection events**: one route-cycle per received frame;
//!    reader EOF/errors reap the connection.
//! 3. **Flush tick**: bounded-interval drain of the pending store,
//!    so delivery happens even with no new reads.
//! 4. **Shutdown signal**: persist the queue, close everything.
//!
//! Connection states: Pending-Identify (no account name yet) →
//! Identified (bound in the session registry) → Closed. A duplicate
//! login is answered 403 and the new connection is closed; the
//! established session is untouched.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use jimchat_protocol::codec::MAX_FRAME_LEN;
use jimchat_protocol::{ChatMessage, Frame, Request, Response, WireCodec};
use jimchat_storage::{Directory, PendingStore};
use jimchat_types::config::ServerConfig;
use jimchat_types::{JimError, Result};

use crate::conn::{self, ConnEvent, ConnId};
use crate::session::SessionRegistry;

/// Capacity of the reader-to-dispatcher event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Listener binding
// ---------------------------------------------------------------------------

/// Binds the listening socket, retrying with a fixed backoff while the
/// address is still in use. This tolerates a preceding instance's slow
/// socket teardown instead of failing immediately.
pub async fn bind_listener(config: &ServerConfig) -> Result<TcpListener> {
    let addr = SocketAddr::new(config.address, config.port);

    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                let local = listener.local_addr()?;
                tracing::info!(%local, "server listening");
                return Ok(listener);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::info!(%addr, "address in use, waiting for the socket to free up");
                tokio::time::sleep(Duration::from_secs(config.bind_retry_delay_secs)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Connection bookkeeping
// ---------------------------------------------------------------------------

/// Dispatcher-side half of a live connection.
struct Connection {
    peer_addr: SocketAddr,
    writer: OwnedWriteHalf,
    /// Set once the connection is Identified.
    username: Option<String>,
}

/// What a route-cycle decided.
struct RouteOutcome {
    response: Response,
    /// Close the connection after the response is written.
    disconnect: bool,
    /// Run a flush pass after the response is written.
    flush: bool,
}

impl RouteOutcome {
    fn reply(response: Response) -> Self {
        Self {
            response,
            disconnect: false,
            flush: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Single-task readiness-driven server core.
pub struct Dispatcher {
    codec: WireCodec,
    registry: SessionRegistry,
    pending: PendingStore,
    directory: Box<dyn Directory>,
    conns: HashMap<ConnId, Connection>,
    event_tx: mpsc::Sender<ConnEvent>,
    event_rx: Option<mpsc::Receiver<ConnEvent>>,
    next_conn_id: u64,
    flush_interval: Duration,
}

impl Dispatcher {
    /// Builds a dispatcher over the given collaborators.
    pub fn new(
        codec: WireCodec,
        pending: PendingStore,
        directory: Box<dyn Directory>,
        config: &ServerConfig,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            codec,
            registry: SessionRegistry::new(),
            pending,
            directory,
            conns: HashMap::new(),
            event_tx,
            event_rx: Some(event_rx),
            next_conn_id: 0,
            flush_interval: Duration::from_millis(config.flush_interval_ms),
        }
    }

    /// Runs the dispatch loop until the shutdown signal fires, then
    /// persists the pending store and closes all live connections.
    pub async fn run(
        mut self,
        listener: TcpListener,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        // No session survives a restart.
        self.directory.set_all_inactive()?;

        let mut event_rx = self.event_rx.take().ok_or_else(|| JimError::ConfigError {
            reason: "dispatcher already running".into(),
        })?;

        let mut flush_tick = tokio::time::interval(self.flush_interval);

        tracing::info!("dispatch loop started");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept_connection(stream, addr),
                    Err(e) => tracing::warn!(%e, "accept failed"),
                },

                Some(event) = event_rx.recv() => match event {
                    ConnEvent::Data { id, raw } => self.route_cycle(id, &raw).await,
                    ConnEvent::Closed { id, reason } => self.reap(id, &reason).await,
                },

                _ = flush_tick.tick() => self.flush_pending().await,

                changed = shutdown_rx.changed() => {
                    // A dropped shutdown handle means no one can stop
                    // the server any more; treat it as a shutdown.
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("shutdown signal received, exiting dispatch loop");
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Accept
    // -----------------------------------------------------------------------

    /// Registers a freshly accepted connection in Pending-Identify and
    /// spawns its reader task.
    fn accept_connection(&mut self, stream: TcpStream, peer_addr: SocketAddr) {
        self.next_conn_id += 1;
        let id = ConnId(self.next_conn_id);

        let (read_half, write_half) = stream.into_split();
        self.conns.insert(
            id,
            Connection {
                peer_addr,
                writer: write_half,
                username: None,
            },
        );

        tokio::spawn(conn::run_reader(
            id,
            read_half,
            self.event_tx.clone(),
            MAX_FRAME_LEN,
        ));

        tracing::info!(conn = %id, %peer_addr, "client connected");
    }

    // -----------------------------------------------------------------------
    // Route cycle
    // -----------------------------------------------------------------------

    /// Performs exactly one receive → validate → handle → respond
    /// cycle for a received frame.
    ///
    /// Every request is answered: protocol and handler errors become a
    /// 500-class response and the connection stays open; only a failed
    /// write closes it.
    async fn route_cycle(&mut self, id: ConnId, raw: &[u8]) {
        // A frame may still be queued from a connection that has since
        // been closed; it must not reach the handlers.
        if !self.conns.contains_key(&id) {
            return;
        }

        let outcome = match self.process_frame(id, raw) {
            Ok(outcome) => outcome,
            Err(err) if err.is_protocol() => {
                tracing::warn!(conn = %id, %err, "invalid message received");
                RouteOutcome::reply(Response::server_error(&err.to_string()))
            }
            Err(err) => {
                // Unclassified handler failure: answered, logged,
                // never allowed to take down the loop.
                tracing::error!(conn = %id, %err, "request handling failed");
                RouteOutcome::reply(Response::server_error(&err.to_string()))
            }
        };

        if let Err(err) = self.write_frame(id, &outcome.response).await {
            tracing::warn!(conn = %id, %err, "failed to write response");
            self.close_connection(id).await;
            return;
        }

        if outcome.disconnect {
            self.close_connection(id).await;
        }

        if outcome.flush {
            self.flush_pending().await;
        }
    }

    /// Decodes, validates, and routes one frame.
    fn process_frame(&mut self, id: ConnId, raw: &[u8]) -> Result<RouteOutcome> {
        let value = self.codec.decode(raw)?;
        let frame = Frame::from_value(value)?;

        let request = match frame {
            Frame::Request(request) => request,
            // A response-shaped message is schema-valid but makes no
            // sense inbound.
            Frame::Response(_) => return Ok(RouteOutcome::reply(Response::bad_request())),
        };

        match request {
            Request::Presence { user, .. } => {
                self.handle_identify(id, &user.account_name, None, Some(&user.status))
            }
            Request::Authenticate { user, .. } => {
                self.handle_identify(id, &user.account_name, Some(&user.password), None)
            }
            Request::Msg(chat) => self.handle_chat(chat),
            Request::Probe { .. } => Ok(RouteOutcome::reply(Response::ok())),
            Request::Quit { .. } => Ok(RouteOutcome {
                response: Response::ok(),
                disconnect: true,
                flush: false,
            }),
            // Room semantics are accepted by the schema but not
            // serviced; a deliberate scope gap, not a bug.
            Request::Join { .. } | Request::Leave { .. } => {
                Ok(RouteOutcome::reply(Response::bad_request()))
            }
        }
    }

    /// Handles `presence`/`authenticate`: binds the session, records
    /// the account with the directory, and schedules a flush pass so a
    /// returning user gets queued messages before new live traffic.
    fn handle_identify(
        &mut self,
        id: ConnId,
        username: &str,
        password: Option<&str>,
        status: Option<&str>,
    ) -> Result<RouteOutcome> {
        // Re-identifying under a new name releases the old binding.
        if let Some(conn) = self.conns.get(&id) {
            if let Some(previous) = conn.username.as_deref() {
                if previous != username && self.registry.find(previous) == Some(id) {
                    self.registry.unbind(previous);
                }
            }
        }

        if !self.registry.bind(username, id) {
            tracing::info!(conn = %id, %username, "duplicate login rejected");
            return Ok(RouteOutcome {
                response: Response::forbidden(
                    "a client with this account name is already connected",
                ),
                disconnect: true,
                flush: false,
            });
        }

        let source_ip = self.conns.get(&id).map(|c| c.peer_addr.ip());
        self.directory
            .register_user(username, password, status, source_ip)?;
        self.directory.set_active(username, true)?;

        if let Some(conn) = self.conns.get_mut(&id) {
            conn.username = Some(username.to_string());
        }

        tracing::info!(conn = %id, %username, "session established");
        Ok(RouteOutcome {
            response: Response::ok(),
            disconnect: false,
            flush: true,
        })
    }

    /// Handles `msg`: always enqueue, acknowledge 200 regardless of
    /// whether the recipient exists yet; delivery is asynchronous
    /// best-effort.
    fn handle_chat(&mut self, chat: ChatMessage) -> Result<RouteOutcome> {
        self.directory.add_contact(&chat.from, &chat.to)?;

        tracing::debug!(from = %chat.from, to = %chat.to, "message queued");
        let recipient = chat.to.clone();
        self.pending.enqueue(&recipient, chat)?;

        Ok(RouteOutcome {
            response: Response::ok(),
            disconnect: false,
            flush: true,
        })
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    /// Drains the pending store for every currently-bound recipient.
    ///
    /// A write failure mid-queue closes that recipient's connection and
    /// puts the undelivered tail back at the front of its queue; later
    /// recipients in the same pass are still served.
    async fn flush_pending(&mut self) {
        let registry = &self.registry;
        let batches = match self.pending.take_deliverable(|name| registry.is_active(name)) {
            Ok(batches) => batches,
            Err(err) => {
                tracing::error!(%err, "pending store drain failed");
                return;
            }
        };

        for (recipient, mut messages) in batches {
            let mut delivered = 0usize;
            let mut failed_conn = None;

            if let Some(conn_id) = self.registry.find(&recipient) {
                for message in &messages {
                    match self
                        .write_frame(conn_id, &Request::Msg(message.clone()))
                        .await
                    {
                        Ok(()) => delivered += 1,
                        Err(err) => {
                            tracing::warn!(
                                conn = %conn_id,
                                %recipient,
                                %err,
                                "delivery failed, requeueing"
                            );
                            failed_conn = Some(conn_id);
                            break;
                        }
                    }
                }
            }

            if delivered < messages.len() {
                let undelivered = messages.split_off(delivered);
                if let Err(err) = self.pending.restore_front(&recipient, undelivered) {
                    tracing::error!(%recipient, %err, "failed to requeue undelivered messages");
                }
            } else {
                tracing::debug!(%recipient, count = delivered, "pending messages delivered");
            }

            if let Some(conn_id) = failed_conn {
                self.close_connection(conn_id).await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Reaps a connection whose reader reported EOF or a transport
    /// error.
    async fn reap(&mut self, id: ConnId, reason: &JimError) {
        if self.conns.contains_key(&id) {
            tracing::info!(conn = %id, %reason, "reaping connection");
            self.close_connection(id).await;
        }
    }

    /// Removes a connection from the readiness set, releasing its
    /// session binding and directory active flag if it was identified.
    async fn close_connection(&mut self, id: ConnId) {
        let Some(mut connection) = self.conns.remove(&id) else {
            return;
        };

        if let Some(username) = connection.username.take() {
            if self.registry.find(&username) == Some(id) {
                self.registry.unbind(&username);
                if let Err(err) = self.directory.set_active(&username, false) {
                    tracing::warn!(%username, %err, "failed to clear active flag");
                }
            }
        }

        let _ = connection.writer.shutdown().await;
        tracing::info!(conn = %id, peer_addr = %connection.peer_addr, "client disconnected");
    }

    /// Encodes and writes one frame to a connection.
    async fn write_frame<T: serde::Serialize>(&mut self, id: ConnId, msg: &T) -> Result<()> {
        let raw = self.codec.encode(msg)?;

        let connection = self
            .conns
            .get_mut(&id)
            .ok_or_else(|| JimError::TransportError {
                reason: format!("connection {id} is gone"),
            })?;

        connection.writer.write_all(&raw).await?;
        Ok(())
    }

    /// Orderly shutdown: persist the pending store, then close every
    /// live connection.
    async fn shutdown(&mut self) {
        match self.pending.persist() {
            Ok(()) => tracing::info!("pending queue persisted"),
            Err(err) => tracing::error!(%err, "failed to persist pending queue"),
        }

        let ids: Vec<ConnId> = self.conns.keys().copied().collect();
        for id in ids {
            self.close_connection(id).await;
        }

        tracing::info!("dispatch loop exited");
    }
}
