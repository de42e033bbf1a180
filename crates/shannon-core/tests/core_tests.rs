use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use shannon_core::*;
use tokio::sync::mpsc;

// ── Permission tests ───────────────────────────────────────────

#[test]
fn test_permission_total_order() {
    assert!(PermissionLevel::Public < PermissionLevel::Trusted);
    assert!(PermissionLevel::Trusted < PermissionLevel::Operator);
    assert!(PermissionLevel::Operator < PermissionLevel::Admin);
}

#[test]
fn test_permission_parse() {
    assert_eq!("admin".parse(), Ok(PermissionLevel::Admin));
    assert_eq!(" Operator ".parse(), Ok(PermissionLevel::Operator));
    assert_eq!("trusted".parse(), Ok(PermissionLevel::Trusted));
    assert_eq!("public".parse(), Ok(PermissionLevel::Public));
    assert!("root".parse::<PermissionLevel>().is_err());
}

#[test]
fn test_permission_from_u8_saturates() {
    assert_eq!(PermissionLevel::from_u8(0), PermissionLevel::Public);
    assert_eq!(PermissionLevel::from_u8(3), PermissionLevel::Admin);
    assert_eq!(PermissionLevel::from_u8(200), PermissionLevel::Admin);
}

// ── Channel target tests ───────────────────────────────────────

#[test]
fn test_channel_target_roundtrip() {
    let t = ChannelTarget::parse("discord:42").unwrap();
    assert_eq!(t.platform, "discord");
    assert_eq!(t.channel, "42");
    assert_eq!(t.to_string(), "discord:42");
}

#[test]
fn test_channel_target_keeps_extra_colons() {
    let t = ChannelTarget::parse("signal:+123:group").unwrap();
    assert_eq!(t.channel, "+123:group");
}

#[test]
fn test_channel_target_rejects_malformed() {
    assert!(ChannelTarget::parse("discord").is_none());
    assert!(ChannelTarget::parse(":42").is_none());
    assert!(ChannelTarget::parse("discord:").is_none());
    assert!(ChannelTarget::parse("").is_none());
}

// ── Tool result tests ──────────────────────────────────────────

#[test]
fn test_tool_result_constructors() {
    let ok = ToolResult::ok("done");
    assert!(ok.success);
    assert_eq!(ok.output, "done");
    let err = ToolResult::err("boom");
    assert!(!err.success);
    assert_eq!(err.error, "boom");
}

#[test]
fn test_tool_call_serde() {
    let tc = ToolCall {
        id: "call_1".into(),
        name: "memory_set".into(),
        arguments: serde_json::json!({"key": "k", "value": "v"}),
    };
    let json = serde_json::to_string(&tc).unwrap();
    let restored: ToolCall = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.name, "memory_set");
    assert_eq!(restored.arguments["key"], "k");
}

// ── Event tests ────────────────────────────────────────────────

#[test]
fn test_event_kind_tags() {
    let incoming = Event::MessageIncoming(IncomingMessage::text("discord", "ch", "u1", "hi"));
    assert_eq!(incoming.kind(), EventKind::MessageIncoming);
    let outgoing = Event::MessageOutgoing(OutgoingMessage::new("discord", "ch", "hello"));
    assert_eq!(outgoing.kind(), EventKind::MessageOutgoing);
    let trigger = Event::SchedulerTrigger {
        job_id: 1,
        job_name: "beat".into(),
        action: "check".into(),
    };
    assert_eq!(trigger.kind(), EventKind::SchedulerTrigger);
}

// ── Event bus tests ────────────────────────────────────────────

#[tokio::test]
async fn test_bus_delivers_to_matching_subscriber() {
    let bus = EventBus::default();
    let (tx, mut rx) = mpsc::channel(8);
    bus.subscribe(EventKind::MessageIncoming, "sink", move |event| {
        let tx = tx.clone();
        async move {
            if let Event::MessageIncoming(msg) = event {
                let _ = tx.send(msg.content).await;
            }
        }
    });
    bus.start().await;

    bus.publish(Event::MessageIncoming(IncomingMessage::text(
        "discord", "ch", "u1", "hello",
    )));
    let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got, "hello");

    bus.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_bus_ignores_non_matching_kinds() {
    let bus = EventBus::default();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    bus.subscribe(EventKind::MessageOutgoing, "sink", move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    bus.start().await;

    bus.publish(Event::MessageIncoming(IncomingMessage::text(
        "discord", "ch", "u1", "hi",
    )));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    bus.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_bus_preserves_order_per_subscriber() {
    let bus = EventBus::default();
    let (tx, mut rx) = mpsc::channel(64);
    bus.subscribe(EventKind::MessageIncoming, "ordered", move |event| {
        let tx = tx.clone();
        async move {
            if let Event::MessageIncoming(msg) = event {
                let _ = tx.send(msg.content).await;
            }
        }
    });
    bus.start().await;

    for i in 0..10 {
        bus.publish(Event::MessageIncoming(IncomingMessage::text(
            "discord",
            "ch",
            "u1",
            format!("m{i}"),
        )));
    }
    for i in 0..10 {
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, format!("m{i}"));
    }

    bus.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_bus_drops_on_overflow_without_blocking() {
    // Capacity 2 and no started worker: the third publish must drop, not block.
    let bus = EventBus::new(2);
    bus.subscribe(EventKind::MessageIncoming, "slow", |_| async {});
    for i in 0..5 {
        bus.publish(Event::MessageIncoming(IncomingMessage::text(
            "discord",
            "ch",
            "u1",
            format!("m{i}"),
        )));
    }
    // Reaching here proves publish never blocked.
    bus.start().await;
    bus.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_bus_stop_drains_enqueued_events() {
    let bus = EventBus::default();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    bus.subscribe(EventKind::MessageIncoming, "drain", move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    bus.start().await;
    for _ in 0..5 {
        bus.publish(Event::MessageIncoming(IncomingMessage::text(
            "discord", "ch", "u1", "hi",
        )));
    }
    bus.stop(Duration::from_secs(1)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 5);
}
