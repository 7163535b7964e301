// Copyright 2020 Joyent, Inc.

//! The Connection Manager.
//!
//! One background task owns the socket for the life of the process. It
//! consumes a single command channel and the socket's inbound stream in
//! turn, so every state change and every frame is handled sequentially:
//!
//! ```text
//!  DISCONNECTED --connect--> CONNECTING --open--> OPEN
//!       ^                        |                  |
//!       |     (flat delay)       | fail             | close / error
//!       +------------------------+------------------+
//! ```
//!
//! Each successful open starts a new connection generation. Requests are
//! tagged with the generation they were written on, and answers are only
//! matched within that generation. Requests in flight when a socket drops
//! are not failed here; their own deadlines take care of them.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use slog::{debug, info, o, warn, Drain, Logger};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::pending::PendingTable;
use crate::protocol::CorrelationId;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
}

/// Connection state plus the generation of the most recent socket.
/// `generation` is 0 until the first socket opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub state: ConnectionState,
    pub generation: u64,
}

enum Command {
    Connect,
    Send {
        id: CorrelationId,
        generation: u64,
        frame: String,
    },
}

/// How one connect attempt ended.
enum Attempt {
    Open(Socket),
    Failed,
    Stopped,
}

/// How a served socket came to an end.
enum Exit {
    Dropped,
    Stopped,
}

/// Handle to the background connection task.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<Status>,
    stop: CancellationToken,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
    log: Logger,
}

impl ConnectionManager {
    /// Spawn the connection task and make the first connect attempt.
    pub fn start(
        config: &TransportConfig,
        table: PendingTable,
        log: Option<&Logger>,
    ) -> ConnectionManager {
        let log = match log {
            Some(l) => l.new(o!("component" => "connection",
                                "url" => config.socket_url.clone())),
            None => Logger::root(slog_stdlog::StdLog.fuse(), o!()),
        };
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(Status {
            state: ConnectionState::Disconnected,
            generation: 0,
        });
        let stop = CancellationToken::new();

        let worker = Worker {
            url: config.socket_url.clone(),
            reconnect_delay: config.reconnect_delay,
            connect_timeout: config.connect_timeout,
            table,
            commands: command_rx,
            status: status_tx,
            stop: stop.clone(),
            generation: 0,
            log: log.clone(),
        };
        let task = tokio::spawn(worker.run());

        ConnectionManager {
            commands,
            status,
            stop,
            task: std::sync::Mutex::new(Some(task)),
            log,
        }
    }

    /// Ask for an immediate connect attempt. Does nothing while a socket is
    /// connecting or open.
    pub fn connect(&self) {
        if self.commands.send(Command::Connect).is_err() {
            debug!(self.log, "connect requested after connection task stopped");
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    /// The current generation, if the socket is open right now.
    pub fn open_generation(&self) -> Option<u64> {
        let status = self.status.borrow();
        match status.state {
            ConnectionState::Open => Some(status.generation),
            _ => None,
        }
    }

    /// Queue an encoded frame for the socket of `generation`.
    ///
    /// The caller must already have registered `id` in the pending table; if
    /// that socket is gone by the time the frame is written, the entry is
    /// rejected rather than sent elsewhere.
    pub fn send(
        &self,
        id: CorrelationId,
        generation: u64,
        frame: String,
    ) -> Result<(), TransportError> {
        self.commands
            .send(Command::Send {
                id,
                generation,
                frame,
            })
            .map_err(|_| TransportError::Shutdown)
    }

    /// Wait until the socket is open, for at most `within`.
    pub async fn wait_until_open(&self, within: Duration) -> bool {
        let mut status = self.status.clone();
        let opened = status.wait_for(|s| s.state == ConnectionState::Open);
        let open = matches!(timeout(within, opened).await, Ok(Ok(_)));
        open
    }

    /// Close the socket and end the background task.
    pub async fn stop(&self) {
        self.stop.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(self.log, "connection task ended abnormally"; "err" => %e);
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

struct Worker {
    url: String,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    table: PendingTable,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<Status>,
    stop: CancellationToken,
    generation: u64,
    log: Logger,
}

impl Worker {
    async fn run(mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);

            match self.attempt_connect().await {
                Attempt::Open(socket) => {
                    self.generation += 1;
                    self.set_state(ConnectionState::Open);
                    info!(self.log, "socket open"; "generation" => self.generation);

                    if let Exit::Stopped = self.serve(socket).await {
                        break;
                    }
                }
                Attempt::Failed => (),
                Attempt::Stopped => break,
            }

            self.set_state(ConnectionState::Disconnected);
            info!(self.log, "reconnect scheduled"; "delay" => ?self.reconnect_delay);

            if !self.wait_for_retry().await {
                break;
            }
        }

        self.set_state(ConnectionState::Disconnected);
        debug!(self.log, "connection task stopped");
    }

    /// One bounded connect attempt. Commands keep being consumed meanwhile:
    /// `Connect` is already satisfied and sends cannot be written yet.
    async fn attempt_connect(&mut self) -> Attempt {
        let attempt = timeout(self.connect_timeout, connect_async(self.url.clone()));
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => return Attempt::Stopped,
                result = &mut attempt => return match result {
                    Ok(Ok((socket, _))) => Attempt::Open(socket),
                    Ok(Err(e)) => {
                        warn!(self.log, "connect failed"; "err" => %e);
                        Attempt::Failed
                    }
                    Err(_) => {
                        warn!(self.log, "connect timed out";
                              "timeout" => ?self.connect_timeout);
                        Attempt::Failed
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => (),
                    Some(Command::Send { id, .. }) => {
                        self.table.reject(&id, TransportError::NotConnected);
                    }
                    None => return Attempt::Stopped,
                },
            }
        }
    }

    /// Pump one open socket until it closes, errors or we are stopped.
    async fn serve(&mut self, socket: Socket) -> Exit {
        let (mut sink, mut stream) = socket.split();

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    let _ = sink.close().await;
                    return Exit::Stopped;
                }
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => (),
                    Some(Command::Send { id, generation, frame }) => {
                        if generation != self.generation {
                            self.table.reject(&id, TransportError::NotConnected);
                            continue;
                        }
                        debug!(self.log, "sending request"; "request_id" => %id);
                        if let Err(e) = sink.send(Message::Text(frame)).await {
                            warn!(self.log, "socket write failed";
                                  "request_id" => %id, "err" => %e);
                            self.table.reject(&id, e.into());
                            return Exit::Dropped;
                        }
                    }
                    // Every handle is gone; nobody can issue requests.
                    None => {
                        let _ = sink.close().await;
                        return Exit::Stopped;
                    }
                },
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        self.table.dispatch(self.generation, &text);
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            self.table.dispatch(self.generation, &text);
                        }
                        Err(_) => {
                            warn!(self.log, "discarding non-UTF-8 binary frame");
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!(self.log, "socket closed by peer"; "frame" => ?frame);
                        return Exit::Dropped;
                    }
                    Some(Ok(_)) => (),
                    Some(Err(e)) => {
                        warn!(self.log, "socket error"; "err" => %e);
                        return Exit::Dropped;
                    }
                    None => {
                        info!(self.log, "socket stream ended");
                        return Exit::Dropped;
                    }
                },
            }
        }
    }

    /// Sit out the reconnect delay. Returns false if we were stopped.
    async fn wait_for_retry(&mut self) -> bool {
        let retry = sleep(self.reconnect_delay);
        tokio::pin!(retry);

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => return false,
                _ = &mut retry => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => return true,
                    Some(Command::Send { id, .. }) => {
                        self.table.reject(&id, TransportError::NotConnected);
                    }
                    None => return false,
                },
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let generation = self.generation;
        self.status.send_if_modified(|s| {
            let changed = s.state != state || s.generation != generation;
            s.state = state;
            s.generation = generation;
            changed
        });
    }
}
