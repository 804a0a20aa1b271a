// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket integration tests using real connections against an in-process
//! chat server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use parley::config::ServerConfig;
use parley::test_support::{spawn_chat_server, ChatHarness};
use parley::transport::auth::TOKEN_HEADER;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsTx = futures_util::stream::SplitSink<WsStream, WsMessage>;
type WsRx = futures_util::stream::SplitStream<WsStream>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn login(harness: &ChatHarness, name: &str) -> anyhow::Result<String> {
    let resp = reqwest::Client::new()
        .post(format!("{}/api/v1/login", harness.base_url()))
        .json(&json!({ "name": name, "password": "secret" }))
        .send()
        .await?
        .error_for_status()?;
    let body: Value = resp.json().await?;
    body["token"].as_str().map(str::to_owned).ok_or_else(|| anyhow::anyhow!("no token: {body}"))
}

async fn logout(harness: &ChatHarness, token: &str) -> anyhow::Result<reqwest::StatusCode> {
    let resp = reqwest::Client::new()
        .post(format!("{}/api/v1/logout", harness.base_url()))
        .json(&json!({ "token": token }))
        .send()
        .await?;
    Ok(resp.status())
}

/// Open a stream presenting `token` in the token header.
async fn ws_connect(harness: &ChatHarness, token: &str) -> anyhow::Result<(WsTx, WsRx)> {
    let mut request = harness.ws_url().into_client_request()?;
    request.headers_mut().insert(TOKEN_HEADER, HeaderValue::from_str(token)?);
    let (stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| anyhow::anyhow!("ws connect: {e}"))?;
    Ok(stream.split())
}

/// Open a stream and wait until the server has registered it.
async fn join(harness: &ChatHarness, token: &str) -> anyhow::Result<(WsTx, WsRx)> {
    let before = harness.server.streams().len();
    let pair = ws_connect(harness, token).await?;
    wait_for(|| harness.server.streams().len() > before).await?;
    Ok(pair)
}

async fn wait_for(mut cond: impl FnMut() -> bool) -> anyhow::Result<()> {
    tokio::time::timeout(RECV_TIMEOUT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("condition not met in time"))
}

async fn ws_say(stream: &mut WsTx, message: &str) -> anyhow::Result<()> {
    let text = serde_json::to_string(&json!({ "message": message }))?;
    stream.send(WsMessage::Text(text.into())).await.map_err(|e| anyhow::anyhow!("ws send: {e}"))?;
    Ok(())
}

/// Receive the next event, or `None` once the server closes the stream.
async fn ws_next(stream: &mut WsRx) -> anyhow::Result<Option<Value>> {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, stream.next())
            .await
            .map_err(|_| anyhow::anyhow!("ws recv timeout"))?;
        match msg {
            None | Some(Ok(WsMessage::Close(_))) | Some(Err(_)) => return Ok(None),
            Some(Ok(WsMessage::Text(text))) => return Ok(Some(serde_json::from_str(&text)?)),
            Some(Ok(_)) => continue,
        }
    }
}

async fn ws_recv(stream: &mut WsRx) -> anyhow::Result<Value> {
    ws_next(stream).await?.ok_or_else(|| anyhow::anyhow!("ws stream closed"))
}

/// Skip events until one of type `kind` arrives.
async fn ws_recv_kind(stream: &mut WsRx, kind: &str) -> anyhow::Result<Value> {
    loop {
        let event = ws_recv(stream).await?;
        if event["type"] == kind {
            return Ok(event);
        }
    }
}

#[tokio::test]
async fn login_stream_logout_end_to_end() -> anyhow::Result<()> {
    let harness = spawn_chat_server(ServerConfig::test()).await?;

    let t1 = login(&harness, "alice").await?;
    let (_tx, _rx) = join(&harness, &t1).await?;

    let err = ws_connect(&harness, "bogus").await.err();
    assert!(err.is_some_and(|e| e.to_string().contains("401")), "bogus token was accepted");

    assert_eq!(logout(&harness, &t1).await?, reqwest::StatusCode::OK);
    assert_eq!(logout(&harness, &t1).await?, reqwest::StatusCode::NOT_FOUND);

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn query_param_token_is_accepted() -> anyhow::Result<()> {
    let harness = spawn_chat_server(ServerConfig::test()).await?;
    let token = login(&harness, "alice").await?;

    let url = format!("{}?token={token}", harness.ws_url());
    let (_stream, _) = tokio_tungstenite::connect_async(&url).await?;
    wait_for(|| harness.server.streams().contains(&token)).await?;

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn messages_fan_out_to_every_stream_in_order() -> anyhow::Result<()> {
    let harness = spawn_chat_server(ServerConfig::test()).await?;
    let alice = login(&harness, "alice").await?;
    let bob = login(&harness, "bob").await?;
    let (mut alice_tx, mut alice_rx) = join(&harness, &alice).await?;
    let (_bob_tx, mut bob_rx) = join(&harness, &bob).await?;

    for message in ["one", "two", "three"] {
        ws_say(&mut alice_tx, message).await?;
    }

    for rx in [&mut alice_rx, &mut bob_rx] {
        let mut seen = Vec::new();
        while seen.len() < 3 {
            let event = ws_recv_kind(rx, "client_message").await?;
            assert_eq!(event["name"], "alice");
            assert!(event["timestamp"].as_u64().is_some_and(|ts| ts > 0));
            seen.push(event["message"].as_str().unwrap_or_default().to_owned());
        }
        assert_eq!(seen, ["one", "two", "three"]);
    }

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn login_and_logout_are_broadcast() -> anyhow::Result<()> {
    let harness = spawn_chat_server(ServerConfig::test()).await?;
    let alice = login(&harness, "alice").await?;
    let (_tx, mut rx) = join(&harness, &alice).await?;

    let bob = login(&harness, "bob").await?;
    let event = ws_recv_kind(&mut rx, "client_login").await?;
    if event["name"] == "alice" {
        let event = ws_recv_kind(&mut rx, "client_login").await?;
        assert_eq!(event["name"], "bob");
    }

    logout(&harness, &bob).await?;
    let event = ws_recv_kind(&mut rx, "client_logout").await?;
    assert_eq!(event["name"], "bob");

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn shutdown_delivers_exactly_one_server_shutdown() -> anyhow::Result<()> {
    let harness = spawn_chat_server(ServerConfig::test()).await?;
    let alice = login(&harness, "alice").await?;
    let bob = login(&harness, "bob").await?;
    let (_alice_tx, mut alice_rx) = join(&harness, &alice).await?;
    let (_bob_tx, mut bob_rx) = join(&harness, &bob).await?;
    let base_url = harness.base_url();

    let report = harness.stop().await?;
    assert_eq!(report.queues_closed, 2);
    assert!(report.drained);

    for rx in [&mut alice_rx, &mut bob_rx] {
        let mut events = Vec::new();
        while let Some(event) = ws_next(rx).await? {
            events.push(event);
        }
        let shutdowns = events.iter().filter(|e| e["type"] == "server_shutdown").count();
        assert_eq!(shutdowns, 1, "events: {events:?}");
        assert_eq!(events.last().map(|e| e["type"].clone()), Some(json!("server_shutdown")));
    }

    let late = reqwest::Client::new()
        .post(format!("{base_url}/api/v1/login"))
        .json(&json!({ "name": "late", "password": "secret" }))
        .send()
        .await;
    assert!(late.is_err(), "server still accepting after shutdown");
    Ok(())
}

#[tokio::test]
async fn malformed_frame_ends_only_that_stream() -> anyhow::Result<()> {
    let harness = spawn_chat_server(ServerConfig::test()).await?;
    let alice = login(&harness, "alice").await?;
    let bob = login(&harness, "bob").await?;
    let (mut alice_tx, mut alice_rx) = join(&harness, &alice).await?;
    let (mut bob_tx, mut bob_rx) = join(&harness, &bob).await?;

    alice_tx.send(WsMessage::Text("not json".into())).await?;
    wait_for(|| !harness.server.streams().contains(&alice)).await?;
    while ws_next(&mut alice_rx).await?.is_some() {}

    // Her session survives; only the stream is gone.
    assert_eq!(harness.server.sessions().get(&alice).as_deref(), Some("alice"));

    ws_say(&mut bob_tx, "still here").await?;
    let event = ws_recv_kind(&mut bob_rx, "client_message").await?;
    assert_eq!(event["message"], "still here");

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn reopening_a_token_supersedes_the_old_stream() -> anyhow::Result<()> {
    let harness = spawn_chat_server(ServerConfig::test()).await?;
    let alice = login(&harness, "alice").await?;
    let (_old_tx, mut old_rx) = join(&harness, &alice).await?;

    let (mut new_tx, mut new_rx) = ws_connect(&harness, &alice).await?;
    while ws_next(&mut old_rx).await?.is_some() {}
    wait_for(|| harness.server.live_streams() == 1).await?;
    assert!(harness.server.streams().contains(&alice));

    ws_say(&mut new_tx, "from the new stream").await?;
    let event = ws_recv_kind(&mut new_rx, "client_message").await?;
    assert_eq!(event["message"], "from the new stream");

    harness.stop().await?;
    Ok(())
}
