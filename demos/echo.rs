//! Two RPC sockets over the in-memory loopback transport.
//!
//! Run with: `cargo run --example echo`

use std::time::Duration;

use serde_json::{json, Value};

use portlink::rpc::RpcSocket;
use portlink::transport::channel;

#[tokio::main]
async fn main() -> portlink::Result<()> {
    let (local, remote) = channel::link();

    let server = RpcSocket::builder()
        .handle("echo", |v: Value| async move { Ok(v) })
        .handle("sum", |nums: Vec<i64>| async move {
            Ok(nums.iter().sum::<i64>())
        })
        .start(remote.0, remote.1);

    let client = RpcSocket::builder()
        .default_timeout(Duration::from_secs(2))
        .start(local.0, local.1);

    let echoed = client.call("echo", json!({"greeting": "hello"})).await?;
    println!("echo     -> {echoed}");

    let total = client.call("sum", json!([1, 2, 3, 4])).await?;
    println!("sum      -> {total}");

    // Handlers can be swapped at runtime; requests see whatever is
    // registered when they arrive.
    server.register("echo", |v: Value| async move {
        Ok(json!({ "wrapped": v }))
    });
    let wrapped = client.call("echo", json!("again")).await?;
    println!("echo v2  -> {wrapped}");

    match client.call("nope", json!(null)).await {
        Ok(_) => println!("unexpected success"),
        Err(e) => println!("rejected -> {e}"),
    }

    Ok(())
}
