//! WebSocket client transport using `tokio-tungstenite`.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{COOKIE, USER_AGENT};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, Connector, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Public broadcast endpoint used when the caller has no host list.
pub const DEFAULT_URL: &str = "wss://broadcastlv.chat.bilibili.com/sub";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Settings for [`WebSocketConnector`].
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// `ws://` or `wss://` endpoint to connect to.
    pub url: String,
    /// Raw `Cookie` header value (e.g. `SESSDATA=...`), if any.
    pub cookie: Option<String>,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Upper bound for TCP + TLS + upgrade.
    pub connect_timeout: Duration,
    /// Upper bound for the close handshake. A peer that never answers
    /// the close frame must not hold up shutdown.
    pub close_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            cookie: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(1),
        }
    }
}

impl WebSocketConfig {
    /// Config for a specific endpoint with default headers and timeouts.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Sets the `Cookie` header sent with the upgrade request.
    #[must_use]
    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }
}

/// A [`Connector`] that opens one WebSocket per room.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    /// Creates a connector from the given config.
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    /// Returns the connector's config.
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }
}

impl Connector for WebSocketConnector {
    type Connection = WebSocketConnection;

    async fn connect(
        &self,
        room_id: u64,
    ) -> Result<Self::Connection, TransportError> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| connect_error(std::io::ErrorKind::InvalidInput, e))?;

        let headers = request.headers_mut();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.config.user_agent)
                .map_err(|e| connect_error(std::io::ErrorKind::InvalidInput, e))?,
        );
        if let Some(cookie) = &self.config.cookie {
            headers.insert(
                COOKIE,
                HeaderValue::from_str(cookie).map_err(|e| {
                    connect_error(std::io::ErrorKind::InvalidInput, e)
                })?,
            );
        }

        let (ws, _response) = time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            operation: "connect",
            elapsed: self.config.connect_timeout,
        })?
        .map_err(|e| connect_error(std::io::ErrorKind::ConnectionRefused, e))?;

        let id = ConnectionId::next();
        tracing::debug!(%id, room_id, url = %self.config.url, "WebSocket connected");

        let (sink, stream) = ws.split();
        let (closed, _) = watch::channel(false);
        Ok(WebSocketConnection {
            id,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed,
            close_timeout: self.config.close_timeout,
        })
    }
}

/// A single client-side WebSocket connection.
///
/// The socket is split into a sink and a stream, each behind its own lock,
/// so the reader parked in [`recv`](Connection::recv) never holds up a
/// writer. `close` flips the `closed` flag first, which wakes the reader
/// immediately instead of waiting for the peer's close reply.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    closed: watch::Sender<bool>,
    close_timeout: Duration,
}

impl Connection for WebSocketConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::ConnectionClosed(
                "send on closed connection".into(),
            ));
        }
        let msg = Message::Binary(data.to_vec().into());
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Ok(None);
        }
        let mut stream = self.stream.lock().await;
        loop {
            let msg = tokio::select! {
                biased;
                _ = closed.wait_for(|c| *c) => return Ok(None),
                msg = stream.next() => msg,
            };
            match msg {
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(data.into()));
                }
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(id = %self.id, ?frame, "peer sent close");
                    return Ok(None);
                }
                None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(
                    tungstenite::Error::ConnectionClosed
                    | tungstenite::Error::AlreadyClosed,
                )) => return Ok(None),
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.send_replace(true) {
            return Ok(());
        }
        let result = time::timeout(self.close_timeout, async {
            self.sink.lock().await.close().await
        })
        .await;
        match result {
            Ok(Ok(()))
            | Ok(Err(
                tungstenite::Error::ConnectionClosed
                | tungstenite::Error::AlreadyClosed,
            )) => Ok(()),
            Ok(Err(e)) => Err(TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))),
            Err(_) => Err(TransportError::Timeout {
                operation: "close",
                elapsed: self.close_timeout,
            }),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

fn connect_error<E>(kind: std::io::ErrorKind, e: E) -> TransportError
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    TransportError::ConnectFailed(std::io::Error::new(kind, e))
}
