use crate::config::TranscriptionConfig;
use crate::specialists::StaticCredentialResolver;
use crate::transcription::*;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

fn config_for(url: String) -> TranscriptionConfig {
    TranscriptionConfig {
        url,
        ..TranscriptionConfig::default()
    }
}

fn tokens(json: &str) -> Message {
    Message::Text(json.to_string())
}

#[tokio::test]
async fn streams_audio_and_reports_utterances() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(tcp).await.expect("handshake");

        let config = match ws.next().await {
            Some(Ok(Message::Text(text))) => serde_json::from_str::<Value>(&text).expect("json"),
            other => panic!("expected config message, got {other:?}"),
        };

        match ws.next().await {
            Some(Ok(Message::Binary(frame))) => assert_eq!(frame.len(), 320),
            other => panic!("expected audio frame, got {other:?}"),
        }
        ws.send(tokens(
            r#"{"tokens":[{"text":"my th","is_final":true},{"text":" ings","is_final":false}]}"#,
        ))
        .await
        .expect("send");
        ws.send(tokens(
            r#"{"tokens":[{"text":" ings are here","is_final":true},{"text":"<end>","is_final":true}]}"#,
        ))
        .await
        .expect("send");

        match ws.next().await {
            Some(Ok(Message::Text(text))) => assert_eq!(text, r#"{"type":"finalize"}"#),
            other => panic!("expected finalize, got {other:?}"),
        }
        ws.send(tokens(
            r#"{"tokens":[{"text":"bye","is_final":true},{"text":"<fin>","is_final":true}]}"#,
        ))
        .await
        .expect("send");

        match ws.next().await {
            Some(Ok(Message::Binary(frame))) => assert!(frame.is_empty()),
            other => panic!("expected end-of-audio frame, got {other:?}"),
        }
        ws.send(tokens(r#"{"tokens":[],"finished":true}"#))
            .await
            .expect("send");
        let _ = ws.close(None).await;
        config
    });

    let client = TranscriptionClient::new(
        config_for(format!("ws://{addr}")),
        Arc::new(StaticCredentialResolver(Some("stt-key".into()))),
    );
    let (mut handle, mut events) = client.connect().await.expect("connect");
    assert_eq!(handle.state(), ConnectionState::Configured);

    handle.send_audio(vec![0u8; 320]).await.expect("audio");
    handle.force_finalize().await.expect("finalize");
    handle.close().await.expect("close");

    let mut received = Vec::new();
    while let Ok(Some(event)) = timeout(Duration::from_secs(5), events.recv()).await {
        received.push(event);
    }

    assert_eq!(
        received,
        vec![
            TranscriptEvent::Accumulated("my th".into()),
            TranscriptEvent::Provisional("ings".into()),
            TranscriptEvent::Endpoint("my things are here".into()),
            TranscriptEvent::Endpoint("bye".into()),
            TranscriptEvent::Finished,
        ]
    );

    timeout(Duration::from_secs(5), handle.closed())
        .await
        .expect("reader finishes");
    assert_eq!(handle.state(), ConnectionState::Disconnected);

    let config = server.await.expect("server task");
    assert_eq!(config["api_key"], "stt-key");
    assert_eq!(config["model"], TranscriptionConfig::default().model);
    assert_eq!(config["audio_format"], "pcm_s16le");
    assert_eq!(config["enable_endpoint_detection"], true);
}

#[tokio::test]
async fn missing_credential_fails_before_connecting() {
    let client = TranscriptionClient::new(
        config_for("ws://127.0.0.1:9".into()),
        Arc::new(StaticCredentialResolver(None)),
    );
    match client.connect().await {
        Err(TranscriptionError::Credential(_)) => {}
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("connect should fail"),
    }
}

#[tokio::test]
async fn refused_connection_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let client = TranscriptionClient::new(
        config_for(format!("ws://{addr}")),
        Arc::new(StaticCredentialResolver(Some("k".into()))),
    );
    match client.connect().await {
        Err(TranscriptionError::Connect(_)) | Err(TranscriptionError::ConnectTimeout) => {}
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("connect should fail"),
    }
}

#[tokio::test]
async fn dropping_the_handle_stops_the_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(tcp).await.expect("handshake");
        // drain until the client goes away
        while let Some(Ok(_)) = ws.next().await {}
    });

    let client = TranscriptionClient::new(
        config_for(format!("ws://{addr}")),
        Arc::new(StaticCredentialResolver(Some("k".into()))),
    );
    let (handle, mut events) = client.connect().await.expect("connect");
    drop(handle);

    let next = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("receiver resolves");
    assert!(next.is_none());
    timeout(Duration::from_secs(5), server)
        .await
        .expect("server notices disconnect")
        .expect("server task");
}
