// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;
use crate::error::ErrorCode;
use crate::event::{ChatEvent, EventKind};

fn text_of(event: &SharedEvent) -> Option<&str> {
    match &event.kind {
        EventKind::ClientMessage { message, .. } => Some(message),
        _ => None,
    }
}

fn event(text: &str) -> SharedEvent {
    Arc::new(ChatEvent::message("alice", text))
}

#[tokio::test]
async fn open_registers_bounded_queue() -> anyhow::Result<()> {
    let streams = StreamRegistry::new(2);
    let mut queue = streams.open("t1")?;
    assert!(streams.contains("t1"));

    let mut results = Vec::new();
    streams.for_each(|_, tx| {
        results.push(tx.try_send(event("a")).is_ok());
        results.push(tx.try_send(event("b")).is_ok());
        results.push(tx.try_send(event("c")).is_ok());
    });
    assert_eq!(results, vec![true, true, false]);

    let first = queue.recv().await.ok_or_else(|| anyhow::anyhow!("queue closed"))?;
    assert_eq!(text_of(&first), Some("a"));
    Ok(())
}

#[tokio::test]
async fn close_drains_then_ends_queue() -> anyhow::Result<()> {
    let streams = StreamRegistry::new(4);
    let mut queue = streams.open("t1")?;
    streams.for_each(|_, tx| {
        let _ = tx.try_send(event("last words"));
    });

    assert!(streams.close(queue.ticket()));
    assert!(!streams.contains("t1"));

    let buffered = queue.recv().await.ok_or_else(|| anyhow::anyhow!("lost buffered event"))?;
    assert_eq!(text_of(&buffered), Some("last words"));
    assert!(queue.recv().await.is_none());
    Ok(())
}

#[tokio::test]
async fn reopen_closes_superseded_queue() -> anyhow::Result<()> {
    let streams = StreamRegistry::new(4);
    let mut old = streams.open("t1")?;
    let new = streams.open("t1")?;

    assert_eq!(streams.len(), 1);
    assert!(old.recv().await.is_none());

    // The superseded connection's late close must not evict the new one.
    assert!(!streams.close(old.ticket()));
    assert!(streams.contains("t1"));
    assert!(streams.close(new.ticket()));
    assert!(streams.is_empty());
    Ok(())
}

#[test]
fn close_unknown_token_is_noop() -> anyhow::Result<()> {
    let streams = StreamRegistry::new(4);
    let queue = streams.open("t1")?;
    assert!(streams.close(queue.ticket()));
    assert!(!streams.close(queue.ticket()));
    Ok(())
}

#[tokio::test]
async fn close_all_ends_every_queue() -> anyhow::Result<()> {
    let streams = StreamRegistry::new(4);
    let mut a = streams.open("a")?;
    let mut b = streams.open("b")?;
    assert_eq!(streams.close_all(), 2);
    assert!(streams.is_empty());
    assert!(a.recv().await.is_none());
    assert!(b.recv().await.is_none());

    let late = streams.open("c").err();
    assert_eq!(late.map(|e| e.code), Some(ErrorCode::Unavailable));
    Ok(())
}

#[test]
fn seal_visits_existing_queues_and_refuses_new_ones() -> anyhow::Result<()> {
    let streams = StreamRegistry::new(4);
    let mut queue = streams.open("t1")?;

    let mut visited = Vec::new();
    streams.seal(|token, tx| {
        visited.push(token.to_owned());
        let _ = tx.try_send(event("last"));
    });
    assert_eq!(visited, ["t1"]);
    assert_eq!(queue.try_recv().as_ref().and_then(text_of), Some("last"));

    let late = streams.open("t2").err();
    assert_eq!(late.map(|e| e.code), Some(ErrorCode::Unavailable));
    // Sealing does not close what is already registered.
    assert!(streams.contains("t1"));
    Ok(())
}

#[tokio::test]
async fn deliver_waits_for_room() -> anyhow::Result<()> {
    let streams = StreamRegistry::new(1);
    let mut queue = streams.open("t1")?;
    streams.for_each(|_, tx| {
        let _ = tx.try_send(event("backlog"));
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    let tokens = ["t1".to_owned(), "gone".to_owned()];
    let delivery = streams.deliver(&tokens, event("final"), deadline);
    let reader = async {
        let first = queue.recv().await;
        let second = queue.recv().await;
        (first, second)
    };
    let (delivered, (first, second)) = tokio::join!(delivery, reader);

    assert_eq!(delivered, 1);
    assert_eq!(first.as_ref().and_then(text_of), Some("backlog"));
    assert_eq!(second.as_ref().and_then(text_of), Some("final"));
    Ok(())
}

#[tokio::test]
async fn deliver_gives_up_at_deadline() -> anyhow::Result<()> {
    let streams = StreamRegistry::new(1);
    let mut queue = streams.open("stuck")?;
    streams.for_each(|_, tx| {
        let _ = tx.try_send(event("backlog"));
    });

    let deadline = Instant::now() + Duration::from_millis(50);
    let delivered = streams.deliver(&["stuck".to_owned()], event("final"), deadline).await;
    assert_eq!(delivered, 0);
    assert_eq!(queue.try_recv().as_ref().and_then(text_of), Some("backlog"));
    assert!(queue.try_recv().is_none());
    Ok(())
}

#[test]
fn guard_closes_on_drop() -> anyhow::Result<()> {
    let streams = StreamRegistry::new(4);
    let queue = streams.open("t1")?;
    {
        let _guard = StreamGuard::new(&streams, queue.ticket().clone());
        assert!(streams.contains("t1"));
    }
    assert!(!streams.contains("t1"));
    Ok(())
}
