//! Integration tests for the WebSocket client transport.
//!
//! Each test spins up a real `tokio-tungstenite` server on a random
//! localhost port and points a [`WebSocketConnector`] at it.

#[cfg(feature = "websocket")]
mod websocket {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use livedm_transport::{
        Connection, Connector, WebSocketConfig, WebSocketConnector,
    };
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    type ServerWs = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

    /// Binds a listener on a random port and returns it with its `ws://` URL.
    async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = listener.local_addr().expect("should have addr");
        (listener, format!("ws://{addr}"))
    }

    async fn accept(listener: &TcpListener) -> ServerWs {
        let (stream, _) = listener.accept().await.expect("should accept");
        tokio_tungstenite::accept_async(stream)
            .await
            .expect("upgrade should succeed")
    }

    #[tokio::test]
    async fn test_websocket_connect_send_receive() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move { accept(&listener).await });

        let connector = WebSocketConnector::new(WebSocketConfig::with_url(url));
        let conn = connector.connect(1).await.expect("should connect");
        let mut server_ws = server.await.expect("task should complete");

        // --- Client sends, server receives ---
        conn.send(b"hello from client").await.expect("send should succeed");
        let msg = server_ws.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), b"hello from client");

        // --- Server sends, client receives ---
        server_ws
            .send(Message::Binary(b"hello from server".to_vec().into()))
            .await
            .unwrap();
        let received = conn
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(received, b"hello from server");

        conn.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_server_close() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move { accept(&listener).await });

        let connector = WebSocketConnector::new(WebSocketConfig::with_url(url));
        let conn = connector.connect(1).await.expect("should connect");
        let mut server_ws = server.await.unwrap();

        server_ws.send(Message::Close(None)).await.unwrap();

        let result = conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on server close");
    }

    #[tokio::test]
    async fn test_websocket_close_unblocks_reader_with_silent_peer() {
        let (listener, url) = listen().await;
        // The server upgrades and then never reads or writes again.
        let server = tokio::spawn(async move {
            let ws = accept(&listener).await;
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(ws);
        });

        let connector = WebSocketConnector::new(WebSocketConfig::with_url(url));
        let conn = Arc::new(connector.connect(1).await.expect("should connect"));

        let reader = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Close result is irrelevant here; the reader must come back fast.
        let _ = conn.close().await;
        let result = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .expect("reader should unblock promptly")
            .unwrap()
            .unwrap();
        assert!(result.is_none());
        assert!(conn.send(b"after close").await.is_err());

        server.abort();
    }

    #[tokio::test]
    async fn test_websocket_sends_cookie_header() {
        use tokio_tungstenite::tungstenite::handshake::server::{
            ErrorResponse, Request, Response,
        };

        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut cookie = None;
            let callback = |req: &Request, resp: Response| {
                cookie = req
                    .headers()
                    .get("cookie")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                Ok::<_, ErrorResponse>(resp)
            };
            let _ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();
            cookie
        });

        let config = WebSocketConfig::with_url(url).cookie("SESSDATA=abc");
        let connector = WebSocketConnector::new(config);
        let _conn = connector.connect(1).await.expect("should connect");

        let cookie = server.await.unwrap();
        assert_eq!(cookie.as_deref(), Some("SESSDATA=abc"));
    }

    #[tokio::test]
    async fn test_websocket_connect_refused_is_error() {
        let (listener, url) = listen().await;
        drop(listener);

        let connector = WebSocketConnector::new(WebSocketConfig::with_url(url));
        assert!(connector.connect(1).await.is_err());
    }
}
