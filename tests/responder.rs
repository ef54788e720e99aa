// tests/responder.rs
//
// Responder behaviour against a hand-driven initiator peer.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

use common::{expect_closed, init_logging, recv_frame, send_frame, WAIT};
use port_rpc::{
    // ---
    ActionTable,
    Connector,
    InitiatorBuilder,
    MemoryHub,
    ResponderBuilder,
    Result,
    RpcError,
};

fn arithmetic() -> ActionTable {
    // ---
    ActionTable::new()
        .on("echo", |arg, _ctx| async move { Ok(arg) })
        .on_sync("sum", |arg, ctx| {
            let n = arg.as_i64().unwrap_or(0);
            let total = ctx.with_state(|s| {
                let total = s.get_or_insert_with("total", || 0_i64);
                *total += n;
                *total
            });
            Ok(json!(total))
        })
        .on_sync("fail", |_arg, _ctx| Err(RpcError::Handler("no tab".into())))
        .on_sync("explode", |_arg, _ctx| panic!("handler blew up"))
}

#[tokio::test]
async fn reply_carries_request_id() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let _server = ResponderBuilder::new(arithmetic()).build().spawn(hub.clone());
    let mut peer = hub.connect("raw").await?;

    send_frame(&peer, json!([41, "echo", {"a": [1, 2]}])).await;
    let reply = recv_frame(&mut peer).await;

    assert_eq!(reply, json!([41, {"a": [1, 2]}, null]));
    Ok(())
}

#[tokio::test]
async fn unknown_action_gets_error_reply_and_connection_survives() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let _server = ResponderBuilder::new(arithmetic()).build().spawn(hub.clone());
    let mut peer = hub.connect("raw").await?;

    send_frame(&peer, json!([1, "nope", null])).await;
    let reply = recv_frame(&mut peer).await;
    assert_eq!(reply[0], json!(1));
    assert_eq!(reply[1], Value::Null);
    assert_eq!(reply[2]["error"]["kind"], json!("unknown_action"));

    send_frame(&peer, json!([2, "echo", "still here"])).await;
    assert_eq!(recv_frame(&mut peer).await, json!([2, "still here", null]));
    Ok(())
}

#[tokio::test]
async fn failing_and_panicking_handlers_become_error_replies() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let _server = ResponderBuilder::new(arithmetic()).build().spawn(hub.clone());
    let mut peer = hub.connect("raw").await?;

    send_frame(&peer, json!([1, "fail", null])).await;
    let failed = recv_frame(&mut peer).await;
    assert_eq!(failed[2]["error"]["kind"], json!("handler"));
    assert_eq!(failed[2]["error"]["message"], json!("no tab"));

    send_frame(&peer, json!([2, "explode", null])).await;
    let exploded = recv_frame(&mut peer).await;
    assert_eq!(exploded[0], json!(2));
    assert_eq!(exploded[2]["error"]["kind"], json!("handler"));
    assert_eq!(exploded[2]["error"]["message"], json!("handler blew up"));

    send_frame(&peer, json!([3, "sum", 4])).await;
    assert_eq!(recv_frame(&mut peer).await, json!([3, 4, null]));
    Ok(())
}

#[tokio::test]
async fn push_frame_from_initiator_is_dropped() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let _server = ResponderBuilder::new(arithmetic()).build().spawn(hub.clone());
    let mut peer = hub.connect("raw").await?;

    send_frame(&peer, json!([0, "sum", 100])).await;
    send_frame(&peer, json!([5, "sum", 1])).await;

    // The id-0 frame neither produced a reply nor touched the state
    assert_eq!(recv_frame(&mut peer).await, json!([5, 1, null]));
    Ok(())
}

#[tokio::test]
async fn state_mutations_follow_arrival_order() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let _server = ResponderBuilder::new(arithmetic()).build().spawn(hub.clone());
    let mut peer = hub.connect("raw").await?;

    send_frame(&peer, json!([1, "sum", 7])).await;
    send_frame(&peer, json!([2, "sum", 10])).await;

    let mut replies = vec![recv_frame(&mut peer).await, recv_frame(&mut peer).await];
    replies.sort_by_key(|r| r[0].as_u64());

    assert_eq!(replies[0], json!([1, 7, null]));
    assert_eq!(replies[1], json!([2, 17, null]));
    Ok(())
}

#[tokio::test]
async fn async_handlers_start_in_arrival_order() -> Result<()> {
    // ---
    init_logging();

    // The state is touched before the first await, then the handler yields
    let actions = ActionTable::new().on("sum", |arg, ctx| {
        let n = arg.as_i64().unwrap_or(0);
        async move {
            let total = ctx.with_state(|s| {
                let total = s.get_or_insert_with("total", || 0_i64);
                *total += n;
                *total
            });
            tokio::task::yield_now().await;
            Ok(json!(total))
        }
    });

    let hub = MemoryHub::new();
    let _server = ResponderBuilder::new(actions).build().spawn(hub.clone());
    let mut peer = hub.connect("raw").await?;

    const N: i64 = 50;
    for id in 1..=N {
        send_frame(&peer, json!([id, "sum", id])).await;
    }

    let mut replies = Vec::new();
    for _ in 1..=N {
        replies.push(recv_frame(&mut peer).await);
    }
    replies.sort_by_key(|r| r[0].as_i64());

    for (reply, id) in replies.iter().zip(1..=N) {
        assert_eq!(reply, &json!([id, id * (id + 1) / 2, null]));
    }
    Ok(())
}

#[tokio::test]
async fn suspended_handler_does_not_block_later_requests() -> Result<()> {
    // ---
    init_logging();

    let gate = Arc::new(Notify::new());
    let wait_gate = gate.clone();
    let open_gate = gate.clone();

    let actions = ActionTable::new()
        .on("wait", move |_arg, _ctx| {
            let gate = wait_gate.clone();
            async move {
                gate.notified().await;
                Ok(json!("released"))
            }
        })
        .on_sync("release", move |_arg, _ctx| {
            open_gate.notify_one();
            Ok(json!("ok"))
        });

    let hub = MemoryHub::new();
    let _server = ResponderBuilder::new(actions).build().spawn(hub.clone());
    let mut peer = hub.connect("raw").await?;

    send_frame(&peer, json!([1, "wait", null])).await;
    send_frame(&peer, json!([2, "release", null])).await;

    // The later request is answered first
    assert_eq!(recv_frame(&mut peer).await, json!([2, "ok", null]));
    assert_eq!(recv_frame(&mut peer).await, json!([1, "released", null]));
    Ok(())
}

#[tokio::test]
async fn connections_have_independent_state() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let _server = ResponderBuilder::new(arithmetic()).build().spawn(hub.clone());
    let mut first = hub.connect("first").await?;
    let mut second = hub.connect("second").await?;

    send_frame(&first, json!([1, "sum", 3])).await;
    assert_eq!(recv_frame(&mut first).await, json!([1, 3, null]));

    send_frame(&second, json!([1, "sum", 5])).await;
    assert_eq!(recv_frame(&mut second).await, json!([1, 5, null]));

    send_frame(&first, json!([2, "sum", 3])).await;
    assert_eq!(recv_frame(&mut first).await, json!([2, 6, null]));
    Ok(())
}

#[tokio::test]
async fn connect_hook_can_push_and_disconnect_hook_sees_state() -> Result<()> {
    // ---
    init_logging();

    let (gone_tx, mut gone_rx) = mpsc::unbounded_channel();

    let responder = ResponderBuilder::new(arithmetic())
        .on_connect(|info, pusher, state| {
            state.insert("peer", info.peer.to_string());
            tokio::spawn(async move {
                let _ = pusher.push("welcome", json!("hi")).await;
            });
        })
        .on_disconnect(move |_info, state| {
            let peer = state.get::<String>("peer").cloned();
            let total = state.get::<i64>("total").copied();
            let _ = gone_tx.send((peer, total));
        })
        .build();

    let hub = MemoryHub::new();
    let _server = responder.spawn(hub.clone());
    let mut peer = hub.connect("popup").await?;

    assert_eq!(recv_frame(&mut peer).await, json!([0, "welcome", "hi"]));

    send_frame(&peer, json!([1, "sum", 9])).await;
    assert_eq!(recv_frame(&mut peer).await, json!([1, 9, null]));

    peer.channel.close().await?;

    let (seen_peer, seen_total) = timeout(WAIT, gone_rx.recv()).await.unwrap().unwrap();
    assert_eq!(seen_peer.as_deref(), Some("popup"));
    assert_eq!(seen_total, Some(9));
    Ok(())
}

#[tokio::test]
async fn handler_can_push_before_replying() -> Result<()> {
    // ---
    init_logging();

    let actions = ActionTable::new().on("watch", |arg, ctx| async move {
        ctx.pusher().push("progress", json!(50)).await?;
        Ok::<_, RpcError>(arg)
    });

    let hub = MemoryHub::new();
    let _server = ResponderBuilder::new(actions).build().spawn(hub.clone());
    let mut peer = hub.connect("raw").await?;

    send_frame(&peer, json!([1, "watch", "tab-3"])).await;
    assert_eq!(recv_frame(&mut peer).await, json!([0, "progress", 50]));
    assert_eq!(recv_frame(&mut peer).await, json!([1, "tab-3", null]));
    Ok(())
}

#[tokio::test]
async fn malformed_frame_closes_connection() -> Result<()> {
    // ---
    init_logging();

    let (gone_tx, mut gone_rx) = mpsc::unbounded_channel();
    let responder = ResponderBuilder::new(arithmetic())
        .on_disconnect(move |info, _state| {
            let _ = gone_tx.send(info.clone());
        })
        .build();

    let hub = MemoryHub::new();
    let _server = responder.spawn(hub.clone());
    let mut peer = hub.connect("raw").await?;

    send_frame(&peer, json!(["one", "echo", null])).await;

    let info = timeout(WAIT, gone_rx.recv()).await.unwrap().unwrap();
    assert_eq!(&info, peer.info());
    expect_closed(&mut peer).await;
    Ok(())
}

#[tokio::test]
async fn panicking_connect_hook_closes_only_that_connection() -> Result<()> {
    // ---
    init_logging();

    let (gone_tx, mut gone_rx) = mpsc::unbounded_channel();
    let responder = ResponderBuilder::new(arithmetic())
        .on_connect(|info, _pusher, _state| {
            if &*info.peer == "doomed" {
                panic!("seed failed");
            }
        })
        .on_disconnect(move |info, _state| {
            let _ = gone_tx.send(info.peer.to_string());
        })
        .build();

    let hub = MemoryHub::new();
    let _server = responder.spawn(hub.clone());

    let doomed = InitiatorBuilder::new().connect(hub.as_ref(), "doomed").await?;
    let outcome = timeout(WAIT, doomed.invoke("echo", Value::Null)).await.unwrap();
    assert!(matches!(outcome, Err(RpcError::ConnectionLost)), "{outcome:?}");

    let gone = timeout(WAIT, gone_rx.recv()).await.unwrap().unwrap();
    assert_eq!(gone, "doomed");

    let healthy = InitiatorBuilder::new().connect(hub.as_ref(), "healthy").await?;
    assert_eq!(healthy.invoke("echo", json!(2)).await?, json!(2));
    Ok(())
}

#[tokio::test]
async fn panicking_disconnect_hook_does_not_stop_responder() -> Result<()> {
    // ---
    init_logging();

    let responder = ResponderBuilder::new(arithmetic())
        .on_disconnect(|_info, _state| panic!("teardown failed"))
        .build();

    let hub = MemoryHub::new();
    let _server = responder.spawn(hub.clone());

    let first = hub.connect("first").await?;
    first.channel.close().await?;
    drop(first);

    let mut second = hub.connect("second").await?;
    send_frame(&second, json!([1, "echo", "ok"])).await;
    assert_eq!(recv_frame(&mut second).await, json!([1, "ok", null]));
    Ok(())
}

#[tokio::test]
async fn shutdown_stops_accept_loop() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let responder = ResponderBuilder::new(arithmetic()).build();
    let server = responder.spawn(hub.clone());

    let mut early = hub.connect("early").await?;
    send_frame(&early, json!([1, "echo", 1])).await;
    assert_eq!(recv_frame(&mut early).await, json!([1, 1, null]));

    responder.shutdown();
    timeout(WAIT, server).await.unwrap().unwrap()?;

    // Established connections keep being served
    send_frame(&early, json!([2, "echo", 2])).await;
    assert_eq!(recv_frame(&mut early).await, json!([2, 2, null]));
    Ok(())
}

#[tokio::test]
async fn accept_loop_ends_when_listener_closes() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let server = ResponderBuilder::new(arithmetic()).build().spawn(hub.clone());

    hub.shutdown();
    timeout(WAIT, server).await.unwrap().unwrap()?;
    Ok(())
}
