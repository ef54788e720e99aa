//! Push notification example using the in-memory channel provider.
//!
//! The initiator subscribes to a battery monitor; the responder starts a
//! watcher task per subscription and pushes alerts until the connection
//! closes. The disconnect hook stops the watcher.
//!
//! Run with: cargo run --example alerts_memory

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use port_rpc::{ActionTable, InitiatorBuilder, MemoryHub, PushTable, ResponderBuilder, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::{fmt as tracing_format, EnvFilter};

#[derive(Debug, Serialize, Deserialize)]
struct Subscribe {
    threshold: u8,
    interval_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct BatteryAlert {
    level: u8,
}

/// Watcher task owned by one connection.
struct Watcher(JoinHandle<()>);

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_format()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_line_number(true)
        .init();

    let actions = ActionTable::new().typed("subscribe", |req: Subscribe, ctx| async move {
        // ---
        let pusher = ctx.pusher().clone();
        let task = tokio::spawn(async move {
            let mut level = 30_u8;
            while level > 0 {
                tokio::time::sleep(Duration::from_millis(req.interval_ms)).await;
                level = level.saturating_sub(5);
                if level <= req.threshold {
                    let alert = BatteryAlert { level };
                    if pusher.push_as("battery_low", &alert).await.is_err() {
                        break;
                    }
                }
            }
        });

        ctx.with_state(|state| state.insert("watcher", Watcher(task)));
        Ok(json!("subscribed"))
    });

    let responder = ResponderBuilder::new(actions)
        .on_disconnect(|info, state| {
            if let Some(Watcher(task)) = state.remove::<Watcher>("watcher") {
                task.abort();
                println!("{info}: watcher stopped");
            }
        })
        .build();

    let hub = MemoryHub::new();
    let _server = responder.spawn(hub.clone());

    let (alert_tx, mut alert_rx) = mpsc::unbounded_channel();
    let pushes = PushTable::new().on_typed("battery_low", move |alert: BatteryAlert| {
        let _ = alert_tx.send(alert.level);
    });

    let initiator = InitiatorBuilder::new()
        .push_actions(pushes)
        .request_timeout(Duration::from_secs(5))
        .on_disconnect(|| println!("responder went away"))
        .connect(hub.as_ref(), "battery-widget")
        .await?;

    let reply = initiator
        .invoke_as::<_, String>(
            "subscribe",
            &Subscribe {
                threshold: 15,
                interval_ms: 20,
            },
        )
        .await?;
    println!("subscribe -> {reply}");

    for _ in 0..3 {
        let level = alert_rx.recv().await.expect("alert stream ended");
        println!("battery low: {level}%");
    }

    initiator.close().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}
