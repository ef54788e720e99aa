//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

use port_rpc::Connection;

pub const WAIT: Duration = Duration::from_secs(2);

static INIT: Once = Once::new();

pub fn init_logging() {
    // ---
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Read the next frame a raw peer receives, as JSON.
pub async fn recv_frame(peer: &mut Connection) -> Value {
    // ---
    let frame = timeout(WAIT, peer.inbox.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("connection closed unexpectedly");
    serde_json::from_slice(&frame).expect("frame is not JSON")
}

/// Send a JSON frame from a raw peer.
pub async fn send_frame(peer: &Connection, frame: Value) {
    // ---
    peer.channel
        .send(Bytes::from(frame.to_string()))
        .await
        .expect("send failed");
}

/// Wait until a raw peer's inbox reports the connection closed.
pub async fn expect_closed(peer: &mut Connection) {
    // ---
    let next = timeout(WAIT, peer.inbox.recv())
        .await
        .expect("timed out waiting for close");
    assert!(next.is_none(), "expected close, got frame {next:?}");
}
