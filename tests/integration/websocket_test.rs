// tests/integration/websocket_test.rs

//! End-to-end tests over real WebSocket framing.

use super::test_helpers::{test_config, wait_until, within};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use riftline::Server;
use riftline::config::MessageFormat;
use riftline::core::dispatcher::{Request, handler_fn};
use riftline::core::protocol::Message;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::Role;

/// Binds type 1 to a handler that reports each payload and acknowledges it with a type 2 reply.
fn echo_server(server: &Server) -> mpsc::UnboundedReceiver<(u64, Bytes)> {
    let (tx, rx) = mpsc::unbounded_channel();
    server
        .add_router(
            1,
            handler_fn(move |req: Request| {
                let tx = tx.clone();
                async move {
                    tx.send((req.conn_id(), req.data().clone()))?;
                    req.reply(2, format!("ack:{}", String::from_utf8_lossy(req.data())))
                        .await?;
                    Ok::<_, anyhow::Error>(())
                }
            }),
        )
        .unwrap();
    rx
}

#[tokio::test]
async fn test_hello_world_over_raw_socket() {
    let server = Server::new(test_config());
    let mut handled = echo_server(&server);
    server.start().unwrap();

    let (client_io, server_io) = tokio::io::duplex(16 * 1024);
    let conn = server.serve_raw_socket(100, server_io).await.unwrap();
    let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

    let mut frame = vec![1, 0, 0, 0, 12, 0, 0, 0];
    frame.extend_from_slice(b"Hello World!");
    client.send(WsMessage::Binary(frame.into())).await.unwrap();

    let (conn_id, payload) = within(handled.recv()).await.unwrap();
    assert_eq!(conn_id, 100);
    assert_eq!(payload.as_ref(), b"Hello World!");

    let reply = within(client.next()).await.unwrap().unwrap();
    let WsMessage::Binary(reply) = reply else {
        panic!("expected a binary reply, got {reply:?}");
    };
    let reply = server.state().codec.decode(&reply, false).unwrap();
    assert_eq!(reply.msg_type(), 2);
    assert_eq!(reply.data().as_ref(), b"ack:Hello World!");

    client.close(None).await.unwrap();
    assert!(wait_until(|| conn.is_closed() && server.connection_count() == 0).await);
}

#[tokio::test]
async fn test_text_format_sends_text_messages() {
    let mut config = test_config();
    config.message.format = MessageFormat::Text;
    config.message.include_type_field = false;
    config.message.include_length_field = false;
    let server = Server::new(config);
    server
        .add_router(
            0,
            handler_fn(|req: Request| async move {
                req.reply(0, "hello back").await?;
                Ok::<_, anyhow::Error>(())
            }),
        )
        .unwrap();

    let (client_io, server_io) = tokio::io::duplex(16 * 1024);
    server.serve_raw_socket(7, server_io).await.unwrap();
    let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

    client.send(WsMessage::Text("hi".into())).await.unwrap();
    let reply = within(client.next()).await.unwrap().unwrap();
    assert_eq!(reply, WsMessage::Text("hello back".into()));
}

/// A text-format server over a raw socket whose type 1 router replies with
/// `reply_len` bytes of `x`.
async fn text_server_with_reply(
    reply_len: usize,
) -> (
    Server,
    Arc<riftline::Connection>,
    WebSocketStream<tokio::io::DuplexStream>,
) {
    let mut config = test_config();
    config.message.format = MessageFormat::Text;
    let server = Server::new(config);
    server
        .add_router(
            1,
            handler_fn(move |req: Request| async move {
                req.reply(2, "x".repeat(reply_len)).await?;
                Ok::<_, anyhow::Error>(())
            }),
        )
        .unwrap();

    let (client_io, server_io) = tokio::io::duplex(16 * 1024);
    let conn = server.serve_raw_socket(8, server_io).await.unwrap();
    let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
    let frame = server.state().codec.encode(&Message::new(1, "go")).unwrap();
    client.send(WsMessage::Binary(frame)).await.unwrap();
    (server, conn, client)
}

#[tokio::test]
async fn test_text_format_keeps_headers_intact() {
    let (server, _conn, mut client) = text_server_with_reply(5).await;

    let reply = within(client.next()).await.unwrap().unwrap();
    let WsMessage::Text(text) = reply else {
        panic!("expected a text reply, got {reply:?}");
    };
    let msg = server.state().codec.decode(text.as_bytes(), false).unwrap();
    assert_eq!(msg.msg_type(), 2);
    assert_eq!(msg.data().as_ref(), b"xxxxx");
}

#[tokio::test]
async fn test_text_format_refuses_frames_that_are_not_utf8() {
    // A 200-byte payload puts 0xC8 in the length field.
    let (_server, conn, mut client) = text_server_with_reply(200).await;

    while let Some(item) = within(client.next()).await {
        match item {
            Ok(WsMessage::Text(text)) => panic!("rewritten frame reached the client: {text:?}"),
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    assert!(wait_until(|| conn.is_closed()).await);
}

#[tokio::test]
async fn test_full_handshake_over_tcp() {
    let server = Arc::new(Server::new(test_config()));
    let mut handled = echo_server(&server);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = {
        let server = server.clone();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            server.accept_websocket(55, ws).unwrap();
        })
    };

    let (mut client, _response) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    within(acceptor).await.unwrap();

    let codec = server.state().codec;
    let frame = codec.encode(&Message::new(1, "over tcp")).unwrap();
    client.send(WsMessage::Binary(frame)).await.unwrap();

    let (conn_id, payload) = within(handled.recv()).await.unwrap();
    assert_eq!(conn_id, 55);
    assert_eq!(payload.as_ref(), b"over tcp");

    let reply = within(client.next()).await.unwrap().unwrap();
    let reply = codec.decode(&reply.into_data(), false).unwrap();
    assert_eq!(reply.data().as_ref(), b"ack:over tcp");

    server.stop();
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_oversized_frame_is_dropped_without_closing() {
    let mut config = test_config();
    config.max_package_size = 8;
    let server = Server::new(config);
    let mut handled = echo_server(&server);

    let (client_io, server_io) = tokio::io::duplex(16 * 1024);
    let conn = server.serve_raw_socket(3, server_io).await.unwrap();
    let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

    let mut big = vec![1, 0, 0, 0, 9, 0, 0, 0];
    big.extend_from_slice(b"123456789");
    client.send(WsMessage::Binary(big.into())).await.unwrap();

    let small = server.state().codec.encode(&Message::new(1, "ok")).unwrap();
    client.send(WsMessage::Binary(small)).await.unwrap();

    let (_, payload) = within(handled.recv()).await.unwrap();
    assert_eq!(payload.as_ref(), b"ok");
    assert!(!conn.is_closed());
}
