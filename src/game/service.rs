//! The sync actor
//!
//! One task owns the [`SyncState`]. Connection handlers talk to it through a
//! [`SyncHandle`]; every join, update, emote, interaction, disconnect and
//! sweep is applied in the order it reaches the command queue, so no two
//! events ever observe a half-applied registry.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::sync::{ConnectionId, Envelope, SyncSettings, SyncState, SyncStats};

/// Depth of the command queue shared by all connections
const COMMAND_BUFFER: usize = 1024;

/// Commands accepted by the sync actor
#[derive(Debug)]
pub enum SyncCommand {
    /// A socket opened; `outbound` feeds its writer task
    Connect {
        conn: ConnectionId,
        outbound: mpsc::Sender<ServerMsg>,
    },
    /// A parsed client message
    Message { conn: ConnectionId, msg: ClientMsg },
    /// The socket closed
    Disconnect { conn: ConnectionId },
    /// Snapshot of counters for the status endpoint
    Stats { reply: oneshot::Sender<SyncStats> },
}

/// The actor has stopped and can no longer accept commands
#[derive(Debug, thiserror::Error)]
#[error("Sync service is not running")]
pub struct SyncUnavailable;

/// Cheap, cloneable sender side of the actor
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    pub async fn connect(
        &self,
        conn: ConnectionId,
        outbound: mpsc::Sender<ServerMsg>,
    ) -> Result<(), SyncUnavailable> {
        self.command(SyncCommand::Connect { conn, outbound }).await
    }

    pub async fn send(&self, conn: ConnectionId, msg: ClientMsg) -> Result<(), SyncUnavailable> {
        self.command(SyncCommand::Message { conn, msg }).await
    }

    pub async fn disconnect(&self, conn: ConnectionId) -> Result<(), SyncUnavailable> {
        self.command(SyncCommand::Disconnect { conn }).await
    }

    pub async fn stats(&self) -> Result<SyncStats, SyncUnavailable> {
        let (reply, rx) = oneshot::channel();
        self.command(SyncCommand::Stats { reply }).await?;
        rx.await.map_err(|_| SyncUnavailable)
    }

    async fn command(&self, cmd: SyncCommand) -> Result<(), SyncUnavailable> {
        self.tx.send(cmd).await.map_err(|_| SyncUnavailable)
    }
}

/// The actor itself. Build with [`SyncService::new`], then spawn [`SyncService::run`].
pub struct SyncService {
    state: SyncState,
    commands: mpsc::Receiver<SyncCommand>,
    /// Writer queues of every open connection
    outbound: HashMap<ConnectionId, mpsc::Sender<ServerMsg>>,
    sweep_interval: Duration,
}

impl SyncService {
    pub fn new(settings: SyncSettings, sweep_interval: Duration) -> (Self, SyncHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_BUFFER);

        let service = Self {
            state: SyncState::new(settings),
            commands,
            outbound: HashMap::new(),
            sweep_interval,
        };

        (service, SyncHandle { tx })
    }

    /// Process commands and periodic sweeps until every handle is dropped
    pub async fn run(mut self) {
        info!(
            cell_size = self.state.settings().cell_size,
            proximity_radius = self.state.settings().proximity_radius,
            inactivity_timeout_ms = self.state.settings().inactivity_timeout.as_millis() as u64,
            sweep_interval_ms = self.sweep_interval.as_millis() as u64,
            "Sync service started"
        );

        let period = self.sweep_interval.max(Duration::from_millis(1));
        let mut sweep = interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                _ = sweep.tick() => self.sweep(),
            }
        }

        info!(
            participants = self.state.registry().len(),
            "Sync service stopped"
        );
    }

    fn handle_command(&mut self, cmd: SyncCommand) {
        let now = Instant::now().into_std();

        match cmd {
            SyncCommand::Connect { conn, outbound } => {
                self.state.connect(conn, now);
                self.outbound.insert(conn, outbound);
            }
            SyncCommand::Message { conn, msg } => {
                let envelopes = self.state.handle(conn, msg, now);
                self.dispatch(envelopes);
            }
            SyncCommand::Disconnect { conn } => {
                self.outbound.remove(&conn);
                let envelopes = self.state.disconnect(conn);
                self.dispatch(envelopes);
            }
            SyncCommand::Stats { reply } => {
                let _ = reply.send(self.state.stats());
            }
        }
    }

    fn sweep(&mut self) {
        let outcome = self.state.sweep(Instant::now().into_std());
        if outcome.closed.is_empty() {
            return;
        }

        // Dropping the sender ends the writer task, which closes the socket
        for conn in &outcome.closed {
            self.outbound.remove(conn);
        }
        info!(
            removed = outcome.closed.len(),
            remaining = self.state.registry().len(),
            "Inactivity sweep"
        );
        self.dispatch(outcome.envelopes);
    }

    /// Best-effort delivery. A full queue means the client is not keeping
    /// up; the message is dropped rather than stalling everyone else.
    fn dispatch(&self, envelopes: Vec<Envelope>) {
        for Envelope { to, msg } in envelopes {
            let Some(tx) = self.outbound.get(&to) else {
                continue;
            };
            match tx.try_send(msg) {
                Ok(()) => {}
                Err(TrySendError::Full(msg)) => {
                    warn!(conn = %to, event = msg.event_name(), "Outbound queue full, dropping message");
                }
                Err(TrySendError::Closed(msg)) => {
                    debug!(conn = %to, event = msg.event_name(), "Outbound queue closed");
                }
            }
        }
    }
}
