#![allow(clippy::unwrap_used)]

// Loopback tests for the WebSocket pump: a tokio-tungstenite server on
// 127.0.0.1 talks to the real connector.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use stationlink_api::{Connector, SocketEvent, WebSocketConnector};

const WAIT: Duration = Duration::from_secs(5);

async fn bind() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = Url::parse(&format!("ws://{addr}")).unwrap();
    (listener, url)
}

#[tokio::test]
async fn echoes_text_frames_both_ways() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let Some(Ok(Message::Text(text))) = ws.next().await else {
            panic!("expected a text frame");
        };
        ws.send(Message::Text(format!("echo:{}", text.as_str()).into()))
            .await
            .unwrap();
        // keep the socket open until the client hangs up
        while let Some(Ok(_)) = ws.next().await {}
    });

    let mut link = WebSocketConnector.connect(&url).await.unwrap();
    link.outbound.send(r#"{"type":"subscribe","id_maquina":7}"#.into()).unwrap();

    let event = tokio::time::timeout(WAIT, link.inbound.recv()).await.unwrap();
    match event {
        Some(SocketEvent::Text(text)) => {
            assert_eq!(text, r#"echo:{"type":"subscribe","id_maquina":7}"#);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    link.cancel.cancel();
    tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn reports_server_close_frame() {
    let (listener, url) = bind().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "maintenance".into(),
        }))
        .await
        .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let mut link = WebSocketConnector.connect(&url).await.unwrap();

    let event = tokio::time::timeout(WAIT, link.inbound.recv()).await.unwrap();
    match event {
        Some(SocketEvent::Closed { code, reason }) => {
            assert_eq!(code, Some(1001));
            assert_eq!(reason, "maintenance");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // The pump is gone after a close, so the inbound channel ends.
    let next = tokio::time::timeout(WAIT, link.inbound.recv()).await.unwrap();
    assert!(next.is_none());
}

#[tokio::test]
async fn dropping_outbound_closes_socket() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let mut saw_close = false;
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                saw_close = true;
            }
        }
        saw_close
    });

    let link = WebSocketConnector.connect(&url).await.unwrap();
    drop(link.outbound);

    let saw_close = tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
    assert!(saw_close, "server should receive a close frame");
}
