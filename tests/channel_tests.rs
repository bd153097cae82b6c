// Integration tests for the duplex session channel
//
// A local WebSocket server plays the remote side; these tests cover the
// connection lifecycle, frame routing and the reconnect policy.

mod common;

use anyhow::Result;
use common::{
    fast_channel_config, next_event, next_frame, refused_endpoint, send_text, wait_for_event,
    WsServer, WAIT,
};
use futures::SinkExt;
use interviewflow::channel::{
    ChannelClient, ChannelEvent, ChannelState, CloseKind, WireMessage, WirePayload,
};
use interviewflow::error::ChannelError;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn test_connect_and_receive_transcript() -> Result<()> {
    let mut server = WsServer::start().await?;
    let (client, mut events) = ChannelClient::new(&fast_channel_config());

    client.connect(&server.url).await?;
    assert_eq!(client.state(), ChannelState::Open);
    assert!(matches!(next_event(&mut events).await?, ChannelEvent::Opened));

    let mut socket = server.accept().await?;
    send_text(
        &mut socket,
        r#"{"type":"transcript","sessionId":"s1","data":{"speaker":"ai","text":"Tell me about yourself."},"timestamp":1730000000000}"#,
    )
    .await?;

    match next_event(&mut events).await? {
        ChannelEvent::Message(message) => {
            assert_eq!(message.session_id.as_deref(), Some("s1"));
            match message.payload {
                WirePayload::Transcript(t) => assert_eq!(t.text, "Tell me about yourself."),
                other => panic!("expected transcript, got {:?}", other),
            }
        }
        other => panic!("expected message, got {:?}", other),
    }

    client.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn test_malformed_frame_is_not_fatal() -> Result<()> {
    let mut server = WsServer::start().await?;
    let (client, mut events) = ChannelClient::new(&fast_channel_config());
    client.connect(&server.url).await?;
    let mut socket = server.accept().await?;

    send_text(&mut socket, "{not json").await?;
    send_text(&mut socket, r#"{"type":"error","data":{"message":"Model overloaded"}}"#).await?;

    assert!(matches!(
        wait_for_event(&mut events, |e| !matches!(e, ChannelEvent::Opened)).await?,
        ChannelEvent::ProtocolError(_)
    ));
    match next_event(&mut events).await? {
        ChannelEvent::Message(WireMessage {
            payload: WirePayload::Error(e),
            ..
        }) => assert_eq!(e.message, "Model overloaded"),
        other => panic!("expected error payload, got {:?}", other),
    }
    assert_eq!(client.state(), ChannelState::Open);

    client.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn test_binary_frames_are_playback_audio() -> Result<()> {
    let mut server = WsServer::start().await?;
    let (client, mut events) = ChannelClient::new(&fast_channel_config());
    client.connect(&server.url).await?;
    let mut socket = server.accept().await?;

    socket.send(Message::Binary(vec![9, 8, 7])).await?;

    let event = wait_for_event(&mut events, |e| matches!(e, ChannelEvent::Message(_))).await?;
    match event {
        ChannelEvent::Message(message) => {
            assert_eq!(message.payload, WirePayload::Audio(vec![9, 8, 7]));
        }
        _ => unreachable!(),
    }

    client.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn test_empty_audio_is_skipped() -> Result<()> {
    let mut server = WsServer::start().await?;
    let (client, _events) = ChannelClient::new(&fast_channel_config());
    client.connect(&server.url).await?;
    let mut socket = server.accept().await?;

    client.send_audio(&[])?;
    client.send_audio(&[1, 2, 3])?;

    // The first frame to arrive is the non-empty one
    assert_eq!(next_frame(&mut socket).await?, Message::Binary(vec![1, 2, 3]));

    client.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn test_send_requires_open_channel() -> Result<()> {
    let (client, _events) = ChannelClient::new(&fast_channel_config());

    assert_eq!(client.state(), ChannelState::Idle);
    assert_eq!(
        client.send(&WireMessage::control("end")),
        Err(ChannelError::NotConnected)
    );
    assert_eq!(client.send_audio(&[1]), Err(ChannelError::NotConnected));
    // Empty buffers are a no-op in any state
    assert_eq!(client.send_audio(&[]), Ok(()));
    Ok(())
}

#[tokio::test]
async fn test_control_frame_is_json_text() -> Result<()> {
    let mut server = WsServer::start().await?;
    let (client, _events) = ChannelClient::new(&fast_channel_config());
    client.connect(&server.url).await?;
    let mut socket = server.accept().await?;

    client.send(&WireMessage::control("end").with_session_id("s1"))?;

    match next_frame(&mut socket).await? {
        Message::Text(text) => {
            let value: serde_json::Value = serde_json::from_str(&text)?;
            assert_eq!(value["type"], "control");
            assert_eq!(value["data"]["action"], "end");
            assert_eq!(value["sessionId"], "s1");
            assert!(value["timestamp"].is_string());
        }
        other => panic!("expected text frame, got {:?}", other),
    }

    client.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn test_abrupt_drop_reconnects() -> Result<()> {
    let mut server = WsServer::start().await?;
    let (client, mut events) = ChannelClient::new(&fast_channel_config());
    client.connect(&server.url).await?;

    let socket = server.accept().await?;
    drop(socket);

    let closed = wait_for_event(&mut events, |e| matches!(e, ChannelEvent::Closed { .. })).await?;
    assert!(matches!(
        closed,
        ChannelEvent::Closed {
            kind: CloseKind::Abnormal,
            ..
        }
    ));
    match next_event(&mut events).await? {
        ChannelEvent::ReconnectScheduled { attempt, delay } => {
            assert_eq!(attempt, 1);
            assert_eq!(delay, Duration::from_millis(50));
        }
        other => panic!("expected reconnect, got {:?}", other),
    }

    let _second = server.accept().await?;
    assert!(matches!(next_event(&mut events).await?, ChannelEvent::Opened));
    assert_eq!(client.state(), ChannelState::Open);

    client.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn test_reconnect_gives_up_after_max_attempts() -> Result<()> {
    let endpoint = refused_endpoint().await?;
    let (client, mut events) = ChannelClient::new(&fast_channel_config());

    let first = client.connect(&endpoint).await;
    assert!(matches!(first, Err(ChannelError::Handshake(_))));

    let mut scheduled = Vec::new();
    let failure = loop {
        match next_event(&mut events).await? {
            ChannelEvent::ReconnectScheduled { attempt, .. } => scheduled.push(attempt),
            ChannelEvent::Failed(e) => break e,
            _ => {}
        }
    };

    assert_eq!(scheduled, vec![1, 2, 3]);
    assert_eq!(failure, ChannelError::ReconnectExhausted { attempts: 3 });
    assert!(failure.is_terminal());
    assert_eq!(client.state(), ChannelState::Failed);

    // Nothing further is scheduled
    let quiet = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
    assert!(quiet.is_err());
    Ok(())
}

#[tokio::test]
async fn test_disconnect_during_backoff_cancels_retry() -> Result<()> {
    let endpoint = refused_endpoint().await?;
    let config = interviewflow::config::ChannelConfig {
        max_reconnect_attempts: 3,
        reconnect_interval_ms: 60_000,
    };
    let (client, mut events) = ChannelClient::new(&config);

    let _ = client.connect(&endpoint).await;
    wait_for_event(&mut events, |e| {
        matches!(e, ChannelEvent::ReconnectScheduled { .. })
    })
    .await?;
    assert_eq!(client.state(), ChannelState::Reconnecting);

    tokio::time::timeout(Duration::from_secs(1), client.disconnect()).await?;
    assert_eq!(client.state(), ChannelState::Idle);

    // Idempotent
    client.disconnect().await;
    assert_eq!(client.state(), ChannelState::Idle);
    Ok(())
}

#[tokio::test]
async fn test_disconnect_sends_normal_close() -> Result<()> {
    let mut server = WsServer::start().await?;
    let (client, mut events) = ChannelClient::new(&fast_channel_config());
    client.connect(&server.url).await?;
    let mut socket = server.accept().await?;

    client.disconnect().await;

    match next_frame(&mut socket).await? {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
        other => panic!("expected close frame, got {:?}", other),
    }

    let closed = wait_for_event(&mut events, |e| matches!(e, ChannelEvent::Closed { .. })).await?;
    assert!(matches!(
        closed,
        ChannelEvent::Closed {
            code: Some(1000),
            kind: CloseKind::Normal
        }
    ));
    assert_eq!(client.state(), ChannelState::Idle);
    assert_eq!(client.send_audio(&[1]), Err(ChannelError::NotConnected));
    Ok(())
}

#[tokio::test]
async fn test_remote_normal_close_does_not_reconnect() -> Result<()> {
    let mut server = WsServer::start().await?;
    let (client, mut events) = ChannelClient::new(&fast_channel_config());
    client.connect(&server.url).await?;
    let mut socket = server.accept().await?;

    socket
        .close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "session over".into(),
        }))
        .await?;

    let closed = wait_for_event(&mut events, |e| matches!(e, ChannelEvent::Closed { .. })).await?;
    assert!(matches!(
        closed,
        ChannelEvent::Closed {
            kind: CloseKind::Normal,
            ..
        }
    ));

    let quiet = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
    assert!(quiet.is_err(), "no reconnect expected after a normal close");
    assert_eq!(client.state(), ChannelState::Idle);
    Ok(())
}

#[tokio::test]
async fn test_connect_replaces_existing_channel() -> Result<()> {
    let mut server = WsServer::start().await?;
    let (client, mut events) = ChannelClient::new(&fast_channel_config());

    client.connect(&server.url).await?;
    let mut first = server.accept().await?;

    client.connect(&server.url).await?;
    let _second = server.accept().await?;

    // The first connection was closed by the client, not dropped
    match next_frame(&mut first).await? {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
        other => panic!("expected close frame, got {:?}", other),
    }

    let opened = {
        let mut count = 0;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(200), events.recv()).await
        {
            if matches!(event, ChannelEvent::Opened) {
                count += 1;
            }
            assert!(!matches!(event, ChannelEvent::ReconnectScheduled { .. }));
        }
        count
    };
    assert_eq!(opened, 2);
    assert_eq!(client.state(), ChannelState::Open);

    client.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn test_dropping_client_closes_channel() -> Result<()> {
    let mut server = WsServer::start().await?;
    let (client, mut events) = ChannelClient::new(&fast_channel_config());
    client.connect(&server.url).await?;
    let mut socket = server.accept().await?;

    drop(client);

    match next_frame(&mut socket).await? {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
        other => panic!("expected close frame, got {:?}", other),
    }

    // The driver winds down without scheduling a reconnect
    while let Some(event) = tokio::time::timeout(WAIT, events.recv()).await? {
        assert!(
            !matches!(event, ChannelEvent::ReconnectScheduled { .. }),
            "unexpected event after drop: {:?}",
            event
        );
    }
    let reconnect = tokio::time::timeout(Duration::from_millis(200), server.accept()).await;
    assert!(reconnect.is_err(), "no reconnect expected after drop");
    Ok(())
}

#[tokio::test]
async fn test_disconnect_mid_handshake() -> Result<()> {
    // Accepts TCP but never answers the WebSocket upgrade
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}", listener.local_addr()?);
    let (client, mut events) = ChannelClient::new(&fast_channel_config());

    let stall = async {
        let (stream, _) = tokio::time::timeout(WAIT, listener.accept()).await??;
        let mut state = client.subscribe_state();
        tokio::time::timeout(WAIT, state.wait_for(|s| *s == ChannelState::Connecting)).await??;
        tokio::time::timeout(Duration::from_secs(1), client.disconnect()).await?;
        Ok::<_, anyhow::Error>(stream)
    };
    let (first, stalled) = tokio::join!(client.connect(&url), stall);
    let _stream = stalled?;

    assert_eq!(first, Err(ChannelError::NotConnected));
    assert_eq!(client.state(), ChannelState::Idle);

    // No retry: no new TCP connection and nothing scheduled
    let retry = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(retry.is_err(), "no retry expected after disconnect");
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, ChannelEvent::ReconnectScheduled { .. } | ChannelEvent::Opened),
            "unexpected event: {:?}",
            event
        );
    }
    Ok(())
}
