use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{FieldHandler, FieldTable, Origin, SyncTransport};
use crate::error::{Result, TunnelError};
use crate::protocol::SyncFrame;

/// Mirrors fields to a remote peer over a WebSocket connection
pub struct WsTransport {
    peer: String,
    fields: FieldTable,
    /// Frames queued for the writer task
    outbox: mpsc::UnboundedSender<Message>,
    closed: CancellationToken,
}

impl WsTransport {
    /// Connect to a listening peer, e.g. `ws://127.0.0.1:9300`
    pub async fn connect(url: &str) -> Result<Arc<Self>> {
        debug!("Connecting to {}...", url);
        let (stream, _) = connect_async(url).await?;
        info!("Connected to {}", url);
        Ok(Self::spawn(stream, url.to_string()))
    }

    /// Complete the WebSocket handshake on an accepted TCP connection
    pub async fn accept(stream: TcpStream) -> Result<Arc<Self>> {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let ws = accept_async(stream).await?;
        info!("Accepted peer {}", peer);
        Ok(Self::spawn(ws, peer))
    }

    fn spawn<S>(stream: WebSocketStream<S>, peer: String) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut write, mut read) = stream.split();
        let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<Message>();
        let closed = CancellationToken::new();

        let transport = Arc::new(WsTransport {
            peer,
            fields: FieldTable::default(),
            outbox,
            closed: closed.clone(),
        });

        // Writer task: ends when the transport is dropped or closed
        let writer_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_closed.cancelled() => break,
                    msg = outbox_rx.recv() => match msg {
                        Some(msg) => {
                            if let Err(e) = write.send(msg).await {
                                debug!("Send error (connection closing): {}", e);
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            outbox_rx.close();
            let _ = write.close().await;
            writer_closed.cancel();
        });

        // Reader task holds only a weak handle so dropping the transport stops it
        let weak = Arc::downgrade(&transport);
        let reader_closed = closed;
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = reader_closed.cancelled() => break,
                    next = read.next() => next,
                };
                let Some(transport) = weak.upgrade() else {
                    break;
                };

                match next {
                    Some(Ok(Message::Text(text))) => transport.handle_frame(&text),
                    Some(Ok(Message::Ping(data))) => {
                        debug!("Received ping, sending pong");
                        let _ = transport.outbox.send(Message::Pong(data));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(
                            "Peer {} closed connection: {:?}",
                            transport.peer,
                            frame.map(|f| f.reason.to_string())
                        );
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!("Received binary message (ignoring)");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket read error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
            reader_closed.cancel();
        });

        transport
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is gone
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Stop the reader and writer tasks and close the connection
    pub fn shutdown(&self) {
        self.closed.cancel();
    }

    fn handle_frame(&self, text: &str) {
        let frame = match SyncFrame::from_json(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping unparseable frame from {}: {}", self.peer, e);
                return;
            }
        };
        debug!("Frame for '{}' from {}", frame.field(), self.peer);

        match frame {
            SyncFrame::Declare { field, value } => {
                if !self.fields.apply_declare(&field, value) {
                    debug!("Keeping local value of re-declared field '{}'", field);
                }
            }
            SyncFrame::Update { field, value } => {
                self.fields.apply(&field, value, Origin::Remote);
            }
        }
    }

    fn send_frame(&self, frame: SyncFrame) -> Result<()> {
        let json = frame.to_json()?;
        self.outbox
            .send(Message::Text(json))
            .map_err(|_| TunnelError::Transport(format!("connection to {} is closed", self.peer)))
    }
}

impl SyncTransport for WsTransport {
    fn declare(&self, field: &str, initial: Value) -> Result<()> {
        if self.fields.declare(field, initial.clone()) {
            self.send_frame(SyncFrame::declare(field, initial))?;
        }
        Ok(())
    }

    fn set_value(&self, field: &str, value: Value) -> Result<()> {
        self.fields.apply(field, value.clone(), Origin::Local);
        self.send_frame(SyncFrame::update(field, value))
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        self.fields.get(field)
    }

    fn subscribe(&self, field: &str, handler: FieldHandler) {
        self.fields.subscribe(field, handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Version, VersionedMessage, CLIENT_TO_SERVER_FIELD};
    use crate::transport::FieldChange;
    use crate::tunnel::{Side, Tunnel};
    use serde_json::json;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn connected_pair() -> (Arc<WsTransport>, Arc<WsTransport>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            WsTransport::accept(stream).await.unwrap()
        });
        let client = WsTransport::connect(&format!("ws://{}", addr))
            .await
            .unwrap();

        (client, server.await.unwrap())
    }

    #[tokio::test]
    async fn test_update_reaches_remote_subscriber() {
        let (client, server) = connected_pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.subscribe(
            "client_to_server",
            Arc::new(move |change: &FieldChange| {
                let _ = tx.send((change.value.clone(), change.origin));
            }),
        );

        client
            .set_value("client_to_server", json!([1, "ping"]))
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(received, Some((json!([1, "ping"]), Origin::Remote)));
        assert_eq!(server.get_value("client_to_server"), Some(json!([1, "ping"])));
    }

    #[tokio::test]
    async fn test_shutdown_is_seen_by_peer() {
        let (client, server) = connected_pair().await;

        client.shutdown();

        tokio::time::timeout(Duration::from_secs(5), server.closed())
            .await
            .unwrap();
        assert!(server.is_closed());

        // Let the writer task observe the close and drop its queue
        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio_test::assert_err!(server.set_value("x", json!(1)));
    }

    #[tokio::test]
    async fn test_redeclare_keeps_known_value() {
        let (_client, server) = connected_pair().await;

        server.handle_frame(r#"{"type":"update","field":"f","value":[2,"x"]}"#);
        server.handle_frame(r#"{"type":"declare","field":"f","value":[0,""]}"#);
        server.handle_frame("not a frame");
        assert_eq!(server.get_value("f"), Some(json!([2, "x"])));

        server.handle_frame(r#"{"type":"declare","field":"g","value":[0,""]}"#);
        assert_eq!(server.get_value("g"), Some(json!([0, ""])));
    }

    #[tokio::test]
    async fn test_tunnels_ping_pong_over_websocket() {
        let (client_transport, server_transport) = connected_pair().await;

        let (request_tx, mut requests) = mpsc::unbounded_channel();
        let server = Tunnel::with_handler(
            Side::Server,
            server_transport,
            Some("ws-tunnel".into()),
            move |version: Version, payload: &str| {
                let _ = request_tx.send((version, payload.to_string()));
            },
        );
        let (reply_tx, mut replies) = mpsc::unbounded_channel();
        let client = Tunnel::with_handler(
            Side::Client,
            client_transport,
            Some("ws-tunnel".into()),
            move |version: Version, payload: &str| {
                let _ = reply_tx.send((version, payload.to_string()));
            },
        );

        assert_eq!(client.send_message("ping"), 1);
        assert_eq!(next(&mut requests).await, (1, "ping".to_string()));
        assert!(server.send_message_with_version(1, "PING"));
        assert_eq!(next(&mut replies).await, (1, "PING".to_string()));

        // A newer request supersedes the one still unanswered
        assert_eq!(client.send_message("old"), 2);
        assert_eq!(client.send_message("new"), 3);
        let latest = loop {
            let request = next(&mut requests).await;
            if request.0 == 3 {
                break request;
            }
        };
        assert_eq!(latest.1, "new");
        assert!(server.send_message_with_version(3, "NEW"));
        assert!(!server.send_message_with_version(2, "OLD"));
        assert_eq!(next(&mut replies).await, (3, "NEW".to_string()));
        assert_eq!(client.last_received(), VersionedMessage::new(3, "NEW"));

        wait_until(|| client.is_confirmed() && server.is_confirmed()).await;
    }

    #[tokio::test]
    async fn test_late_tunnel_attach_replays_over_websocket() {
        let (client_transport, server_transport) = connected_pair().await;
        let client = Tunnel::create(Side::Client, client_transport, Some("late".into()));
        client.send_message("early");

        wait_until(|| {
            server_transport.get_value(CLIENT_TO_SERVER_FIELD) == Some(json!([1, "early"]))
        })
        .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let server = Tunnel::with_handler(
            Side::Server,
            server_transport.clone(),
            Some("late".into()),
            move |version: Version, payload: &str| {
                let _ = tx.send((version, payload.to_string()));
            },
        );

        assert_eq!(next(&mut rx).await, (1, "early".to_string()));
        assert!(server.is_confirmed());
        wait_until(|| client.is_confirmed()).await;
    }
}
