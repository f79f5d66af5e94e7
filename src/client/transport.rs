//! Reconnecting WebSocket transport for the client agent
//!
//! The transport owns the socket and never touches agent state. It queues
//! [`Inbound`] events for the agent and forwards whatever the agent puts on
//! the outbound channel.

use std::future::Future;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::agent::Inbound;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Server closed the connection")]
    Closed,
}

/// Exponential backoff with jitter. Each delay is drawn from
/// `[d/2, d]` where `d` doubles from `base` up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// Upper bound of the next delay, before jitter
    pub fn ceiling(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn next_delay(&mut self, rng: &mut impl Rng) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);

        let half = ceiling / 2;
        let spread = (ceiling - half).as_millis() as u64;
        half + Duration::from_millis(rng.gen_range(0..=spread))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// When to stop trying
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up, 0 for never
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.reconnect_attempts,
            base_delay: config.reconnect_delay,
            max_delay: config.reconnect_max_delay,
        }
    }

    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts != 0 && failures >= self.max_attempts
    }
}

/// Why a live session ended
enum SessionEnd {
    /// The agent dropped its side; stop for good
    AgentGone,
    /// The socket failed; reconnect
    Lost(TransportError),
}

/// Spawn the transport task
pub fn spawn_transport(
    url: String,
    policy: ReconnectPolicy,
    inbound: mpsc::Sender<Inbound>,
    outbound: mpsc::Receiver<ClientMsg>,
) -> JoinHandle<()> {
    tokio::spawn(run_transport(url, policy, inbound, outbound))
}

/// Connect to `url`, run the session, and reconnect with backoff until the
/// policy is exhausted or the agent goes away.
pub async fn run_transport(
    url: String,
    policy: ReconnectPolicy,
    inbound: mpsc::Sender<Inbound>,
    outbound: mpsc::Receiver<ClientMsg>,
) {
    info!(url = %url, "Transport starting");
    let connect = || {
        let url = url.clone();
        async move {
            let (socket, _) = connect_async(url.as_str()).await?;
            Ok::<_, TransportError>(socket.split())
        }
    };
    reconnect_loop(connect, policy, inbound, outbound).await
}

/// The reconnect state machine, independent of how a socket is opened
async fn reconnect_loop<C, Fut, Si, St>(
    mut connect: C,
    policy: ReconnectPolicy,
    inbound: mpsc::Sender<Inbound>,
    mut outbound: mpsc::Receiver<ClientMsg>,
) where
    C: FnMut() -> Fut,
    Fut: Future<Output = Result<(Si, St), TransportError>>,
    Si: Sink<Message, Error = WsError> + Unpin,
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut backoff = Backoff::new(policy.base_delay, policy.max_delay);
    let mut rng = StdRng::from_entropy();
    let mut failures = 0u32;

    loop {
        if inbound.is_closed() {
            debug!("Agent dropped, transport stopping");
            return;
        }
        info!(attempt = failures + 1, "Connecting");

        let last_error = match connect().await {
            Ok((sink, stream)) => {
                backoff.reset();
                failures = 0;

                // Anything queued while offline belongs to the old session
                while outbound.try_recv().is_ok() {}

                if inbound.send(Inbound::Connected).await.is_err() {
                    return;
                }

                match run_session(sink, stream, &inbound, &mut outbound).await {
                    SessionEnd::AgentGone => {
                        debug!("Agent dropped, transport stopping");
                        return;
                    }
                    SessionEnd::Lost(e) => {
                        warn!(error = %e, "Connection lost");
                        let reason = e.to_string();
                        if inbound
                            .send(Inbound::Disconnected {
                                reason: reason.clone(),
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                        reason
                    }
                }
            }
            Err(e) => {
                failures += 1;
                warn!(error = %e, failures, "Connect failed");
                e.to_string()
            }
        };

        if policy.exhausted(failures) {
            warn!(failures, "Reconnect attempts exhausted");
            let _ = inbound.send(Inbound::Failed { reason: last_error }).await;
            return;
        }

        let delay = backoff.next_delay(&mut rng);
        debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
        tokio::time::sleep(delay).await;
    }
}

async fn run_session<Si, St>(
    mut sink: Si,
    mut stream: St,
    inbound: &mpsc::Sender<Inbound>,
    outbound: &mut mpsc::Receiver<ClientMsg>,
) -> SessionEnd
where
    Si: Sink<Message, Error = WsError> + Unpin,
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(msg) = msg else {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::AgentGone;
                };
                if let Err(e) = send_msg(&mut sink, &msg).await {
                    return SessionEnd::Lost(e);
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMsg>(&text) {
                    Ok(msg) => {
                        if inbound.send(Inbound::Message(msg)).await.is_err() {
                            return SessionEnd::AgentGone;
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to parse server message"),
                },
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost(TransportError::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Lost(e.into()),
            },
        }
    }
}

async fn send_msg<S>(sink: &mut S, msg: &ClientMsg) -> Result<(), TransportError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let json = serde_json::to_string(msg)?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}
