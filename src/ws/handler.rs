//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::{ConnectionId, SyncHandle};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sink, ws_stream) = socket.split();
    serve_connection(
        ws_sink,
        ws_stream,
        &state.sync,
        state.config.outbound_buffer,
        ConnectionRateLimiter::new(state.config.input_rate_limit),
    )
    .await;
}

/// Register a connection with the sync service, pump frames both ways
/// until either side finishes, then report the disconnect.
pub(crate) async fn serve_connection<Si, St, E>(
    ws_sink: Si,
    ws_stream: St,
    sync: &SyncHandle,
    outbound_buffer: usize,
    limiter: ConnectionRateLimiter,
) where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: fmt::Display,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let conn = ConnectionId::next();
    info!(conn = %conn, "New WebSocket connection");

    let (outbound_tx, outbound_rx) = mpsc::channel(outbound_buffer);
    if let Err(e) = sync.connect(conn, outbound_tx).await {
        error!(conn = %conn, error = %e, "Failed to register connection");
        return;
    }

    run_session(conn, ws_sink, ws_stream, outbound_rx, sync, limiter).await;

    // Cleanup on disconnect
    if sync.disconnect(conn).await.is_err() {
        debug!(conn = %conn, "Sync service gone before disconnect");
    }

    info!(conn = %conn, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split. Returns when either
/// side finishes: the client goes away, or the sync service drops our
/// outbound queue after an inactivity sweep.
async fn run_session<Si, St, E>(
    conn: ConnectionId,
    mut ws_sink: Si,
    mut ws_stream: St,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
    sync: &SyncHandle,
    limiter: ConnectionRateLimiter,
) where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: fmt::Display,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    // Writer task: outbound queue -> WebSocket
    let mut writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(conn = %conn, error = %e, "WebSocket send failed");
                return;
            }
        }
        debug!(conn = %conn, "Outbound queue closed, closing socket");
        let _ = ws_sink.send(Message::Close(None)).await;
    });

    // Reader loop: WebSocket -> sync service
    let reader = async {
        while let Some(result) = ws_stream.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if !limiter.check_input() {
                        warn!(conn = %conn, "Rate limited inbound message");
                        continue;
                    }

                    match serde_json::from_str::<ClientMsg>(&text) {
                        Ok(client_msg) => {
                            if sync.send(conn, client_msg).await.is_err() {
                                debug!(conn = %conn, "Sync service closed");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(conn = %conn, error = %e, "Failed to parse client message");
                        }
                    }
                }
                Ok(Message::Binary(_)) => {
                    warn!(conn = %conn, "Received binary message, ignoring");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    debug!(conn = %conn, "Received ping/pong");
                }
                Ok(Message::Close(_)) => {
                    info!(conn = %conn, "Client initiated close");
                    break;
                }
                Err(e) => {
                    error!(conn = %conn, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    };

    let writer_done = tokio::select! {
        _ = reader => false,
        _ = &mut writer => true,
    };
    if !writer_done {
        writer.abort();
    }
}

/// Send a message over WebSocket
async fn send_msg<Si>(sink: &mut Si, msg: &ServerMsg) -> Result<(), String>
where
    Si: Sink<Message> + Unpin,
    Si::Error: fmt::Display,
{
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{SyncService, SyncSettings};
    use crate::ws::protocol::Vec3;
    use futures::channel::mpsc as frames;
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    /// Client side of an in-process socket
    struct Client {
        tx: frames::UnboundedSender<Result<Message, axum::Error>>,
        rx: frames::UnboundedReceiver<Message>,
        session: JoinHandle<()>,
    }

    impl Client {
        fn open(sync: &SyncHandle, limiter: ConnectionRateLimiter) -> Self {
            let (tx, server_stream) = frames::unbounded();
            let (server_sink, rx) = frames::unbounded();
            let sync = sync.clone();
            let session = tokio::spawn(async move {
                serve_connection(server_sink, server_stream, &sync, 16, limiter).await;
            });
            Self { tx, rx, session }
        }

        fn send_text(&self, text: &str) {
            self.tx.unbounded_send(Ok(Message::Text(text.to_string()))).unwrap();
        }

        fn send(&self, msg: &ClientMsg) {
            self.send_text(&serde_json::to_string(msg).unwrap());
        }

        async fn recv(&mut self) -> Message {
            timeout(Duration::from_secs(1), self.rx.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("socket sink dropped")
        }

        async fn recv_msg(&mut self) -> ServerMsg {
            match self.recv().await {
                Message::Text(text) => serde_json::from_str(&text).unwrap(),
                other => panic!("expected a text frame, got {:?}", other),
            }
        }
    }

    fn start(settings: SyncSettings, sweep: Duration) -> SyncHandle {
        let (service, handle) = SyncService::new(settings, sweep);
        tokio::spawn(service.run());
        handle
    }

    fn join_msg() -> ClientMsg {
        ClientMsg::Join {
            profile: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_unparseable_frame_keeps_connection_open() {
        let sync = start(SyncSettings::default(), Duration::from_secs(60));
        let mut client = Client::open(&sync, ConnectionRateLimiter::default());

        client.send_text("not json");
        client.send_text(r#"{"event":"teleport","data":{}}"#);
        client
            .tx
            .unbounded_send(Ok(Message::Binary(vec![1, 2, 3])))
            .unwrap();
        client.send(&join_msg());

        assert!(matches!(client.recv_msg().await, ServerMsg::Initialize { .. }));
        assert!(!client.session.is_finished());
    }

    #[tokio::test]
    async fn test_rate_limited_message_dropped_without_disconnect() {
        let sync = start(SyncSettings::default(), Duration::from_secs(60));
        let mut client = Client::open(&sync, ConnectionRateLimiter::new(1));

        client.send(&join_msg());
        assert!(matches!(client.recv_msg().await, ServerMsg::Initialize { .. }));

        // Would cross into a new cell and earn a proximityUpdate if accepted
        client.send(&ClientMsg::UpdatePosition {
            position: Vec3::new(500.0, 1.7, 0.0),
            rotation: Default::default(),
        });
        let reply = timeout(Duration::from_millis(50), client.rx.next()).await;
        assert!(reply.is_err(), "unexpected frame: {:?}", reply);
        assert!(!client.session.is_finished());
        let stats = sync.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.participants, 1);
    }

    #[tokio::test]
    async fn test_client_close_disconnects() {
        let sync = start(SyncSettings::default(), Duration::from_secs(60));
        let mut client = Client::open(&sync, ConnectionRateLimiter::default());
        client.send(&join_msg());
        client.recv_msg().await;

        client.tx.unbounded_send(Ok(Message::Close(None))).unwrap();
        timeout(Duration::from_secs(1), client.session)
            .await
            .unwrap()
            .unwrap();

        let stats = sync.stats().await.unwrap();
        assert_eq!(stats.connections, 0);
        assert_eq!(stats.participants, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_closes_socket() {
        let settings = SyncSettings {
            inactivity_timeout: Duration::from_secs(5),
            ..SyncSettings::default()
        };
        let sync = start(settings, Duration::from_secs(1));
        let mut client = Client::open(&sync, ConnectionRateLimiter::default());
        client.send(&join_msg());
        client.recv_msg().await;

        // Paused clock runs forward to the sweep
        assert!(matches!(client.rx.next().await, Some(Message::Close(None))));
        client.session.await.unwrap();
        assert_eq!(sync.stats().await.unwrap().connections, 0);
    }
}
