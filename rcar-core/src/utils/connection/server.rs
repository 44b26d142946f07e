//! TCP Command Server Module
//!
//! This module defines the command server. It accepts TCP connections on a
//! single listening socket, runs one worker thread per connection, decodes
//! each line with [`super::protocol`], executes it against the shared
//! [`CarState`](crate::utils::controllers::CarState) and writes the response
//! back.
//!
//! The car lock is held only while a command executes, never around socket
//! I/O, so a stalled client cannot hold up the others. Commands from one
//! connection apply in order; commands from different connections interleave
//! and the last writer wins.

use std::{
    io::{self, BufReader, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use super::{
    protocol::{decode_request, Encoding, FailureKind, Frame, FrameReader, ProtocolError, Response},
    session::SessionManager,
};
use crate::utils::controllers::{HardwareInterface, SharedCar};

/// How long the accept loop sleeps when no connection is pending.
const ACCEPT_POLL: Duration = Duration::from_millis(10);
/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Listener and per-connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP bind address, e.g. `0.0.0.0:12345`.
    pub bind_address: String,
    /// Socket read timeout; bounds how long a worker takes to notice shutdown.
    pub read_timeout_ms: u64,
    /// Socket write timeout; a client that stops reading is dropped after it.
    pub write_timeout_ms: u64,
    /// Longest accepted line, terminator excluded.
    pub max_line_length: usize,
    /// Concurrent clients; further connections are turned away.
    pub max_connections: usize,
    /// Consecutive accept failures treated as fatal.
    pub max_accept_failures: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0:12345"),
            read_timeout_ms: 500,
            write_timeout_ms: 1000,
            max_line_length: 1024,
            max_connections: 8,
            max_accept_failures: 16,
        }
    }
}

/// Errors that stop the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("accept failed {failures} times in a row: {source}")]
    Accept {
        failures: u32,
        #[source]
        source: io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Stops a running server from another thread.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// The TCP command server.
pub struct CommandServer<H> {
    listener: TcpListener,
    car: SharedCar<H>,
    sessions: SessionManager,
    shutdown: ShutdownHandle,
    config: ServerConfig,
}

impl<H> CommandServer<H>
where
    H: HardwareInterface + Send + 'static,
{
    /// Bind the listening socket. Connections are accepted once
    /// [`CommandServer::run`] is called.
    pub fn bind(
        config: ServerConfig,
        car: SharedCar<H>,
    ) -> Result<Self, ServerError> {
        let listener =
            TcpListener::bind(&config.bind_address).map_err(|source| ServerError::Bind {
                address: config.bind_address.clone(),
                source,
            })?;
        listener.set_nonblocking(true)?;

        Ok(CommandServer {
            listener,
            car,
            sessions: SessionManager::new(),
            shutdown: ShutdownHandle::new(),
            config,
        })
    }

    /// Use an externally created shutdown handle.
    pub fn with_shutdown(
        mut self,
        shutdown: ShutdownHandle,
    ) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn sessions(&self) -> SessionManager {
        self.sessions.clone()
    }

    /// Accept and serve connections until shut down.
    ///
    /// On the way out every worker is joined and the car is driven to its
    /// neutral state, also when the loop stops on repeated accept failures.
    pub fn run(self) -> Result<(), ServerError> {
        match self.local_addr() {
            Ok(addr) => tracing::info!("command server listening on {}", addr),
            Err(e) => tracing::warn!(error = %e, "command server listening on unknown address"),
        }

        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        let mut failures = 0u32;

        let outcome = loop {
            if !self.shutdown.is_running() {
                break Ok(());
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    failures = 0;
                    workers.retain(|w| !w.is_finished());
                    if let Some(worker) = self.admit(stream, peer) {
                        workers.push(worker);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted
                            | io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    tracing::debug!(error = %e, "transient accept error");
                }
                Err(e) => {
                    failures += 1;
                    tracing::error!(error = %e, failures, "accept failed");
                    if failures >= self.config.max_accept_failures.max(1) {
                        break Err(ServerError::Accept {
                            failures,
                            source: e,
                        });
                    }
                    thread::sleep(ACCEPT_BACKOFF);
                }
            }
        };

        tracing::info!(
            clients = self.sessions.len(),
            "command server stopping"
        );
        self.shutdown.shutdown();
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("connection worker panicked");
            }
        }

        if let Err(error) = self.car.lock().neutral() {
            tracing::error!(%error, "failed to drive car to neutral on shutdown");
        } else {
            tracing::info!("car left in neutral state");
        }

        outcome
    }

    /// Start a worker for a freshly accepted connection, or turn it away.
    fn admit(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Option<JoinHandle<()>> {
        if self.sessions.len() >= self.config.max_connections {
            tracing::warn!(?peer, "rejecting connection: client limit reached");
            let busy = Response::error(
                FailureKind::Busy,
                format!("server busy, {} clients connected", self.sessions.len()),
            );
            let _ = stream.set_nonblocking(false);
            let _ = (&stream).write_all(busy.encode(Encoding::Text).as_bytes());
            let _ = stream.shutdown(Shutdown::Both);
            return None;
        }

        if let Err(e) = prepare_stream(&stream, &self.config) {
            tracing::error!(?peer, error = %e, "failed to configure client socket");
            return None;
        }

        // Register before spawning so the client limit counts this one.
        self.sessions.create_session(peer);
        let connection = Connection {
            peer,
            car: Arc::clone(&self.car),
            sessions: self.sessions.clone(),
            shutdown: self.shutdown.clone(),
            max_line: self.config.max_line_length,
        };

        match thread::Builder::new()
            .name(format!("rcar-conn-{peer}"))
            .spawn(move || connection.run(stream))
        {
            Ok(worker) => Some(worker),
            Err(e) => {
                tracing::error!(?peer, error = %e, "failed to spawn connection worker");
                self.sessions.remove_session(&peer);
                None
            }
        }
    }
}

fn prepare_stream(
    stream: &TcpStream,
    config: &ServerConfig,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_millis(config.read_timeout_ms.max(1))))?;
    stream.set_write_timeout(Some(Duration::from_millis(config.write_timeout_ms.max(1))))?;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!(error = %e, "failed to disable Nagle's algorithm");
    }
    Ok(())
}

/// Bind a server on `config.bind_address` and run it until `shutdown` fires.
pub fn run<H>(
    config: ServerConfig,
    car: SharedCar<H>,
    shutdown: ShutdownHandle,
) -> Result<(), ServerError>
where
    H: HardwareInterface + Send + 'static,
{
    CommandServer::bind(config, car)?
        .with_shutdown(shutdown)
        .run()
}

/// One accepted client.
struct Connection<H> {
    peer: SocketAddr,
    car: SharedCar<H>,
    sessions: SessionManager,
    shutdown: ShutdownHandle,
    max_line: usize,
}

impl<H> Connection<H>
where
    H: HardwareInterface,
{
    fn run(
        self,
        stream: TcpStream,
    ) {
        tracing::info!(peer = ?self.peer, "client connected");

        match self.serve(&stream) {
            Ok(()) => {}
            Err(e) => tracing::warn!(peer = ?self.peer, error = %e, "connection broken"),
        }

        if let Some(session) = self.sessions.get_session(&self.peer) {
            tracing::info!(
                peer = ?self.peer,
                commands = session.commands,
                duration = ?session.connected_at.elapsed(),
                "client disconnected"
            );
        }
        self.sessions.remove_session(&self.peer);
        let _ = stream.shutdown(Shutdown::Both);
    }

    /// Read, dispatch and answer lines until the peer leaves, the transport
    /// breaks, or the server shuts down.
    ///
    /// A reply that cannot be written within the write timeout is a broken
    /// transport and ends the connection.
    fn serve(
        &self,
        stream: &TcpStream,
    ) -> io::Result<()> {
        let mut reader = FrameReader::new(BufReader::new(stream), self.max_line);
        let mut writer = stream;

        while self.shutdown.is_running() {
            let (encoding, response) = match reader.read_frame()? {
                Frame::Line(line) => {
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    self.handle_line(&line)
                }
                Frame::TooLong => {
                    let error = ProtocolError::TooLong(self.max_line);
                    tracing::warn!(peer = ?self.peer, %error, "rejected command");
                    (Encoding::Text, Response::from(&error))
                }
                Frame::Idle => continue,
                Frame::Closed => return Ok(()),
            };
            writer.write_all(response.encode(encoding).as_bytes())?;
        }
        Ok(())
    }

    fn handle_line(
        &self,
        line: &[u8],
    ) -> (Encoding, Response) {
        self.sessions.update_session(&self.peer);
        let (encoding, decoded) = decode_request(line);

        let response = match decoded {
            Ok(command) => {
                tracing::debug!(peer = ?self.peer, ?command, "executing command");
                let result = self.car.lock().execute_command(command);
                match result {
                    Ok(value) => Response::ack(value),
                    Err(error) => {
                        tracing::error!(peer = ?self.peer, ?command, %error, "command failed");
                        Response::from(&error)
                    }
                }
            }
            Err(error) => {
                tracing::warn!(peer = ?self.peer, %error, "rejected command");
                Response::from(&error)
            }
        };
        (encoding, response)
    }
}
