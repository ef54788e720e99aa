//! Running-sum example using the in-memory channel provider.
//!
//! The responder keeps a per-connection total; each `sum` request adds its
//! argument and returns the new total. Two requests are issued concurrently
//! and still apply in the order they were sent.
//!
//! Run with: cargo run --example sum_memory

#![allow(clippy::unwrap_used, clippy::expect_used)]

use port_rpc::{ActionTable, InitiatorBuilder, MemoryHub, ResponderBuilder, Result, RpcError};
use serde_json::json;
use tracing_subscriber::{fmt as tracing_format, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_format()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_line_number(true)
        .init();

    let actions = ActionTable::new()
        .on("echo", |arg, _ctx| async move { Ok(arg) })
        .on_sync("sum", |arg, ctx| {
            // ---
            let n = arg
                .as_i64()
                .ok_or_else(|| RpcError::Handler(format!("expected a number, got {arg}")))?;
            let total = ctx.with_state(|state| {
                let total = state.get_or_insert_with("total", || 0_i64);
                *total += n;
                *total
            });
            Ok(json!(total))
        });

    let responder = ResponderBuilder::new(actions)
        .on_connect(|info, _pusher, _state| println!("{info} connected"))
        .on_disconnect(|info, state| {
            let total = state.get::<i64>("total").copied().unwrap_or(0);
            println!("{info} disconnected with total {total}");
        })
        .build();

    let hub = MemoryHub::new();
    let server = responder.spawn(hub.clone());

    let initiator = InitiatorBuilder::new()
        .connect(hub.as_ref(), "calculator")
        .await?;

    let echoed = initiator.invoke("echo", json!({"hello": "world"})).await?;
    println!("echo    -> {echoed}");

    let (a, b) = tokio::join!(
        initiator.invoke("sum", json!(7)),
        initiator.invoke("sum", json!(10)),
    );
    println!("sum(7)  -> {}", a?);
    println!("sum(10) -> {}", b?);

    match initiator.invoke("multiply", json!(3)).await {
        Err(e) => println!("multiply -> {e}"),
        Ok(v) => println!("multiply -> unexpectedly returned {v}"),
    }

    // Clean shutdown
    initiator.close().await?;
    responder.shutdown();
    server.await.expect("accept loop panicked")?;

    // Give the connection task a moment to run its disconnect hook
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    Ok(())
}
